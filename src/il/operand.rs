//! Source and destination operand formatting.
//!
//! Sources print as `base.components` with an optional modifier
//! (`r3.xy`, `l2.x`, `cb0[3].xyzw`, `r3.xyzw_neg(yw)`). Destinations print
//! their written components either as a prefix (`r5.xy`) or positionally
//! with holes (`r5.__zw`).

use crate::core::swizzle::{lane_components, value_components};
use crate::core::{Component, ElementKind, LiteralIdx, RegisterId, TypeDescriptor, WriteMask};
use std::fmt;

/// Where a value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base<'a> {
    Register(RegisterId),
    Literal(LiteralIdx),
    Named(&'a str),
}

impl fmt::Display for Base<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Base::Register(reg) => write!(f, "{reg}"),
            Base::Literal(idx) => write!(f, "l{idx}"),
            Base::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Neg(Vec<Component>),
    Abs,
}

/// A typed value location that rules read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source<'a> {
    pub base: Base<'a>,
    pub ty: TypeDescriptor,
}

impl<'a> Source<'a> {
    pub fn new(base: Base<'a>, ty: TypeDescriptor) -> Self {
        Self { base, ty }
    }

    pub fn register(reg: RegisterId, ty: TypeDescriptor) -> Self {
        Self::new(Base::Register(reg), ty)
    }

    /// The whole value.
    pub fn all(&self) -> Operand<'a> {
        self.select(value_components(self.ty))
    }

    /// One logical lane.
    pub fn lane(&self, lane: u8) -> Operand<'a> {
        self.select(lane_components(self.ty.kind(), lane))
    }

    pub fn select(&self, components: Vec<Component>) -> Operand<'a> {
        Operand {
            base: self.base,
            components,
            modifier: None,
        }
    }
}

/// A formatted source operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand<'a> {
    base: Base<'a>,
    components: Vec<Component>,
    modifier: Option<Modifier>,
}

impl<'a> Operand<'a> {
    pub fn negate(mut self, components: Vec<Component>) -> Self {
        self.modifier = Some(Modifier::Neg(components));
        self
    }

    pub fn abs(mut self) -> Self {
        self.modifier = Some(Modifier::Abs);
        self
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }
}

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if !self.components.is_empty() {
            f.write_str(".")?;
            for c in &self.components {
                write!(f, "{}", c.to_char())?;
            }
        }
        match &self.modifier {
            Some(Modifier::Neg(components)) => {
                f.write_str("_neg(")?;
                for c in components {
                    write!(f, "{}", c.to_char())?;
                }
                f.write_str(")")
            }
            Some(Modifier::Abs) => f.write_str("_abs"),
            None => Ok(()),
        }
    }
}

/// Register destination with the physical components it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dest {
    reg: RegisterId,
    /// Indexed by physical component; unset slots are left untouched.
    slots: [bool; 4],
}

impl Dest {
    pub fn components(reg: RegisterId, components: &[Component]) -> Self {
        let mut slots = [false; 4];
        for c in components {
            if let Some(index) = component_index(*c) {
                slots[index] = true;
            }
        }
        Self { reg, slots }
    }

    /// Every word of a value of type `ty`.
    pub fn value(reg: RegisterId, ty: TypeDescriptor) -> Self {
        Self::components(reg, &value_components(ty))
    }

    /// The words of one logical lane.
    pub fn lane(reg: RegisterId, kind: ElementKind, lane: u8) -> Self {
        Self::components(reg, &lane_components(kind, lane))
    }

    pub fn single(reg: RegisterId, component: Component) -> Self {
        Self::components(reg, &[component])
    }

    /// Lanes selected by a write mask.
    pub fn masked(reg: RegisterId, mask: &WriteMask, kind: ElementKind) -> Self {
        let written: Vec<Component> = mask.physical(kind).into_iter().flatten().collect();
        Self::components(reg, &written)
    }

    pub fn reg(&self) -> RegisterId {
        self.reg
    }

    /// Number of leading components written, when the written set is a prefix.
    pub fn prefix_len(&self) -> Option<usize> {
        let count = self.slots.iter().filter(|s| **s).count();
        self.slots[..count].iter().all(|s| *s).then_some(count)
    }
}

impl fmt::Display for Dest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.", self.reg)?;
        match self.prefix_len() {
            Some(count) => {
                for index in 0..count {
                    write!(f, "{}", Component::from_index(index as u8).to_char())?;
                }
            }
            None => {
                for (index, written) in self.slots.iter().enumerate() {
                    let ch = if *written {
                        Component::from_index(index as u8).to_char()
                    } else {
                        '_'
                    };
                    write!(f, "{ch}")?;
                }
            }
        }
        Ok(())
    }
}

fn component_index(component: Component) -> Option<usize> {
    match component {
        Component::X => Some(0),
        Component::Y => Some(1),
        Component::Z => Some(2),
        Component::W => Some(3),
        Component::Zero | Component::One => None,
    }
}
