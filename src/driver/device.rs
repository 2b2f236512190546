//! Device presets and the capability query used to configure a compilation unit.

use crate::core::{Capabilities, Generation};
use std::fmt;

/// A target GPU known to the driver layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub name: &'static str,
    pub capabilities: Capabilities,
}

impl Device {
    pub const RV770: Device = Device {
        name: "rv770",
        capabilities: Capabilities {
            generation: Generation::R700,
            wavefront_width: 64,
            simd_units: 10,
            native_double: false,
        },
    };

    pub const CYPRESS: Device = Device {
        name: "cypress",
        capabilities: Capabilities {
            generation: Generation::Evergreen,
            wavefront_width: 64,
            simd_units: 20,
            native_double: false,
        },
    };

    pub const CAYMAN: Device = Device {
        name: "cayman",
        capabilities: Capabilities {
            generation: Generation::NorthernIslands,
            wavefront_width: 64,
            simd_units: 24,
            native_double: true,
        },
    };

    pub const ALL: [Device; 3] = [Device::RV770, Device::CYPRESS, Device::CAYMAN];

    pub fn by_name(name: &str) -> Option<Device> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Identifier mixed into program cache keys.
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.name,
            self.capabilities.generation,
            self.capabilities.wavefront_width,
            self.capabilities.simd_units
        )
    }

    /// Capability query.
    pub fn query(&self) -> Capabilities {
        self.capabilities
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.capabilities.generation)
    }
}
