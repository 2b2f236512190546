//! Register identifier allocation.
//!
//! This module implements the RegisterFile that hands out IL temporary
//! registers (`rN`). Identifiers are issued monotonically and never reused
//! within a compilation unit: there is no liveness tracking and no spilling.
//! A node whose emission rule needs scratch registers reserves them together
//! with its own result slot, contiguously, at construction time.

use std::fmt;

/// An IL temporary register (`rN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(pub u32);

impl RegisterId {
    /// The register `offset` slots after this one.
    pub const fn offset(self, offset: u32) -> Self {
        RegisterId(self.0 + offset)
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// What an issued register was reserved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOwner {
    /// Result slot of an operation node.
    Node,
    /// Extra slot reserved by an emission rule.
    Scratch,
    /// Persistent variable.
    Variable,
    /// Formal parameter of a subroutine.
    Formal,
}

/// Monotonic register allocator for one compilation unit.
#[derive(Debug, Default)]
pub struct RegisterFile {
    /// Owner of each issued register, indexed by id.
    assignments: Vec<RegisterOwner>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one register for `owner`.
    pub fn allocate(&mut self, owner: RegisterOwner) -> RegisterId {
        self.reserve(owner, 0)
    }

    /// Reserve a result register followed by `scratch` contiguous slots.
    ///
    /// Returns the first (result) register; scratch slots are addressed as
    /// `result.offset(1..=scratch)`.
    pub fn reserve(&mut self, owner: RegisterOwner, scratch: u32) -> RegisterId {
        let first = RegisterId(self.assignments.len() as u32);
        self.assignments.push(owner);
        self.assignments
            .extend(std::iter::repeat(RegisterOwner::Scratch).take(scratch as usize));
        first
    }

    /// Number of identifiers issued so far.
    pub fn issued(&self) -> u32 {
        self.assignments.len() as u32
    }

    /// Next identifier that would be issued.
    pub fn peek_next(&self) -> RegisterId {
        RegisterId(self.issued())
    }

    pub fn owner(&self, reg: RegisterId) -> Option<RegisterOwner> {
        self.assignments.get(reg.0 as usize).copied()
    }

    pub fn is_allocated(&self, reg: RegisterId) -> bool {
        (reg.0 as usize) < self.assignments.len()
    }

    /// Count of registers reserved for `owner`.
    pub fn count_owned(&self, owner: RegisterOwner) -> u32 {
        self.assignments.iter().filter(|o| **o == owner).count() as u32
    }

    /// Forget every issued identifier (new compilation unit).
    pub fn reset(&mut self) {
        self.assignments.clear();
    }
}
