//! Target capability snapshot taken at the start of a compilation unit.

use std::fmt;

/// GPU generation, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Generation {
    R700,
    Evergreen,
    NorthernIslands,
}

impl Generation {
    pub const fn name(self) -> &'static str {
        match self {
            Generation::R700 => "r700",
            Generation::Evergreen => "evergreen",
            Generation::NorthernIslands => "northern-islands",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the emission rules may assume about the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub generation: Generation,
    pub wavefront_width: u32,
    pub simd_units: u32,
    /// Native double-precision division, sqrt and rsqrt.
    pub native_double: bool,
}

impl Capabilities {
    /// Assumptions used when no snapshot is given: a 64-wide wavefront and
    /// emulated double-precision transcendentals.
    pub const fn portable() -> Self {
        Self {
            generation: Generation::R700,
            wavefront_width: 64,
            simd_units: 1,
            native_double: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::portable()
    }
}
