//! Value type descriptors.
//!
//! A [`TypeDescriptor`] names an element kind and a lane count. The number of
//! physical 32-bit words a value occupies follows from both: float64 lanes take
//! two words each, everything else takes one. A register holds four words.

use super::error::{CodegenError, CodegenResult};
use std::fmt;

/// Words held by one IL register.
pub const REGISTER_WORDS: u32 = 4;

/// Element kind of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    I32,
    U32,
    F32,
    F64,
}

impl ElementKind {
    pub const ALL: [ElementKind; 4] = [
        ElementKind::I32,
        ElementKind::U32,
        ElementKind::F32,
        ElementKind::F64,
    ];

    /// Storage words per lane.
    pub const fn words_per_element(self) -> u32 {
        match self {
            ElementKind::F64 => 2,
            _ => 1,
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(self, ElementKind::I32 | ElementKind::U32)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ElementKind::F32 | ElementKind::F64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::I32 => "i32",
            ElementKind::U32 => "u32",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element kind plus lane count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeDescriptor {
    kind: ElementKind,
    lanes: u8,
}

impl TypeDescriptor {
    pub const I32: Self = Self::scalar(ElementKind::I32);
    pub const U32: Self = Self::scalar(ElementKind::U32);
    pub const F32: Self = Self::scalar(ElementKind::F32);
    pub const F64: Self = Self::scalar(ElementKind::F64);

    /// Create a descriptor, rejecting lane counts other than 1/2/4 and values
    /// that would not fit in one register.
    pub fn new(kind: ElementKind, lanes: u8) -> CodegenResult<Self> {
        if !matches!(lanes, 1 | 2 | 4) {
            return Err(CodegenError::type_mismatch(
                "type",
                format!("{kind}x{lanes}: lane count must be 1, 2 or 4"),
            ));
        }
        let ty = Self { kind, lanes };
        if ty.storage_words() > REGISTER_WORDS {
            return Err(CodegenError::type_mismatch(
                "type",
                format!("{ty}: {} words exceed one register", ty.storage_words()),
            ));
        }
        Ok(ty)
    }

    pub const fn scalar(kind: ElementKind) -> Self {
        Self { kind, lanes: 1 }
    }

    pub const fn kind(&self) -> ElementKind {
        self.kind
    }

    pub const fn lanes(&self) -> u8 {
        self.lanes
    }

    pub const fn storage_words(&self) -> u32 {
        self.lanes as u32 * self.kind.words_per_element()
    }

    /// Same lane count, different element kind.
    pub fn with_kind(&self, kind: ElementKind) -> CodegenResult<Self> {
        Self::new(kind, self.lanes)
    }

    /// Same element kind, different lane count.
    pub fn with_lanes(&self, lanes: u8) -> CodegenResult<Self> {
        Self::new(self.kind, lanes)
    }

    /// Every representable descriptor, in a stable order.
    pub fn all() -> impl Iterator<Item = TypeDescriptor> {
        ElementKind::ALL.into_iter().flat_map(|kind| {
            [1u8, 2, 4]
                .into_iter()
                .filter_map(move |lanes| TypeDescriptor::new(kind, lanes).ok())
        })
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.kind, self.lanes)
    }
}

/// Render an operand type list as used in diagnostics.
pub fn describe_types(types: &[TypeDescriptor]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_words() {
        for ty in TypeDescriptor::all() {
            assert_eq!(
                ty.storage_words(),
                ty.lanes() as u32 * ty.kind().words_per_element()
            );
        }
        assert_eq!(TypeDescriptor::F64.storage_words(), 2);
        assert_eq!(
            TypeDescriptor::new(ElementKind::F64, 2).unwrap().storage_words(),
            4
        );
    }

    #[test]
    fn test_rejects_invalid_shapes() {
        assert!(TypeDescriptor::new(ElementKind::F32, 3).unwrap_err().is_type_mismatch());
        assert!(TypeDescriptor::new(ElementKind::F64, 4).unwrap_err().is_type_mismatch());
        assert_eq!(TypeDescriptor::all().count(), 11);
    }

    #[test]
    fn test_display() {
        let ty = TypeDescriptor::new(ElementKind::U32, 4).unwrap();
        assert_eq!(ty.to_string(), "u32x4");
        assert_eq!(describe_types(&[TypeDescriptor::F32, ty]), "f32x1, u32x4");
    }
}
