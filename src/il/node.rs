//! Operation node model.
//!
//! Nodes live in the generator's node table and are referenced by [`NodeId`]
//! handles. A handle carries the compilation unit it was issued in, so handles
//! that outlive their unit are rejected instead of aliasing new nodes.

use super::rules::Rule;
use crate::core::{Component, ElementKind, LiteralIdx, RegisterId, TypeDescriptor};
use std::fmt;

/// Handle to a node of the current compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) unit: u32,
}

impl NodeId {
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Operation selector. Conversions carry their target element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Neg,
    Abs,
    Not,
    Sqrt,
    Rsqrt,
    Floor,
    Fract,
    Convert(ElementKind),
    Swizzle,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    Mad,
    Select,
}

impl Opcode {
    pub const UNARY: [Opcode; 12] = [
        Opcode::Neg,
        Opcode::Abs,
        Opcode::Not,
        Opcode::Sqrt,
        Opcode::Rsqrt,
        Opcode::Floor,
        Opcode::Fract,
        Opcode::Convert(ElementKind::I32),
        Opcode::Convert(ElementKind::U32),
        Opcode::Convert(ElementKind::F32),
        Opcode::Convert(ElementKind::F64),
        Opcode::Swizzle,
    ];

    pub const BINARY: [Opcode; 18] = [
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Min,
        Opcode::Max,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
    ];

    pub const TERNARY: [Opcode; 2] = [Opcode::Mad, Opcode::Select];

    pub fn arity(self) -> usize {
        if Self::TERNARY.contains(&self) {
            3
        } else if Self::BINARY.contains(&self) {
            2
        } else {
            1
        }
    }

    /// Relational operator for comparison opcodes.
    pub fn relop(self) -> Option<Relop> {
        match self {
            Opcode::Eq => Some(Relop::Eq),
            Opcode::Ne => Some(Relop::Ne),
            Opcode::Lt => Some(Relop::Lt),
            Opcode::Le => Some(Relop::Le),
            Opcode::Gt => Some(Relop::Gt),
            Opcode::Ge => Some(Relop::Ge),
            _ => None,
        }
    }

    pub fn name(self) -> String {
        match self {
            Opcode::Convert(kind) => format!("convert<{kind}>"),
            other => format!("{other:?}").to_lowercase(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Relational qualifier of compare-and-branch tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relop {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relop {
    pub const fn name(self) -> &'static str {
        match self {
            Relop::Eq => "eq",
            Relop::Ne => "ne",
            Relop::Lt => "lt",
            Relop::Le => "le",
            Relop::Gt => "gt",
            Relop::Ge => "ge",
        }
    }

    /// The relation that holds exactly when this one does not (ordered operands).
    pub const fn complement(self) -> Self {
        match self {
            Relop::Eq => Relop::Ne,
            Relop::Ne => Relop::Eq,
            Relop::Lt => Relop::Ge,
            Relop::Ge => Relop::Lt,
            Relop::Le => Relop::Gt,
            Relop::Gt => Relop::Le,
        }
    }
}

/// Memory reached through a register-computed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// `cbN[index + offset]`
    ConstantBuffer { buffer: u32, offset: u32 },
    /// Raw byte-addressed UAV load.
    RawUav { id: u32 },
}

/// Tagged node payload.
#[derive(Debug, Clone, Copy)]
pub enum NodeKind<'arena> {
    Literal(LiteralIdx),
    Variable,
    /// Pre-existing machine alias such as `vAbsTidFlat` or `cb0[2]`.
    NamedVariable(&'arena str),
    Unary(Opcode, NodeId),
    Binary(Opcode, NodeId, NodeId),
    Ternary(Opcode, NodeId, NodeId, NodeId),
    RegisterAddress(Address, NodeId),
}

/// One entry of the node table.
#[derive(Debug, Clone, Copy)]
pub struct Node<'arena> {
    pub kind: NodeKind<'arena>,
    pub ty: TypeDescriptor,
    /// Result register; absent for literals and named aliases.
    pub reg: Option<RegisterId>,
    /// Emission rule, fixed at construction.
    pub rule: Option<Rule>,
    /// Physical source components of a swizzle node.
    pub components: &'arena [Component],
    /// Pool entries the rule reads.
    pub constants: &'arena [LiteralIdx],
}

impl<'arena> Node<'arena> {
    /// Child handles in operand order.
    pub fn operands(&self) -> Vec<NodeId> {
        match self.kind {
            NodeKind::Literal(_) | NodeKind::Variable | NodeKind::NamedVariable(_) => Vec::new(),
            NodeKind::Unary(_, a) | NodeKind::RegisterAddress(_, a) => vec![a],
            NodeKind::Binary(_, a, b) => vec![a, b],
            NodeKind::Ternary(_, a, b, c) => vec![a, b, c],
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self.kind {
            NodeKind::Unary(op, ..) | NodeKind::Binary(op, ..) | NodeKind::Ternary(op, ..) => {
                Some(op)
            }
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.kind, NodeKind::Variable)
    }
}
