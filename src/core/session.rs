// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession borrows an arena owned by the caller and hands out arena-backed
// storage for operand lists and interned names, so node handles and function names stay
// valid for the whole generator lifetime without lifetime gymnastics in the builder API.
// It also tracks per-unit statistics: instructions emitted (with a per-mnemonic
// breakdown), register identifiers issued, literals interned and functions emitted.
// Statistics are reset at the start of every compilation unit; arena memory is not, it
// is released when the caller drops the arena.

//! Arena-based compilation session management.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::fmt;

/// Arena-backed storage plus statistics for one generator.
pub struct CompilationSession<'arena> {
    /// Arena allocator for operand lists and names.
    arena: &'arena Bump,

    /// Interned strings.
    interned_strings: HashMap<&'arena str, ()>,

    /// Statistics for the current compilation unit.
    stats: SessionStats,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            interned_strings: HashMap::new(),
            stats: SessionStats::default(),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate a copy of `slice` in the session arena.
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> &'arena [T] {
        self.arena.alloc_slice_copy(slice)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&mut self, s: &str) -> &'arena str {
        if let Some((&interned, _)) = self.interned_strings.get_key_value(s) {
            return interned;
        }
        let interned: &'arena str = self.arena.alloc_str(s);
        self.interned_strings.insert(interned, ());
        interned
    }

    /// Bytes currently held by the arena.
    pub fn memory_used(&self) -> usize {
        self.arena.allocated_bytes()
    }

    /// Record an emitted instruction.
    pub fn record_instruction(&mut self, mnemonic: &str) {
        self.stats.instructions_emitted += 1;
        *self
            .stats
            .instruction_counts
            .entry(mnemonic.to_string())
            .or_insert(0) += 1;
    }

    /// Record issued register identifiers.
    pub fn record_registers(&mut self, count: u32) {
        self.stats.registers_issued += count as usize;
    }

    /// Record the constructed node count.
    pub fn record_node(&mut self) {
        self.stats.nodes_constructed += 1;
    }

    pub fn set_literal_count(&mut self, count: usize) {
        self.stats.literals = count;
    }

    pub fn record_function_emitted(&mut self, name: &str, body_lines: usize) {
        self.stats.functions_emitted += 1;
        if self.stats.largest_function_lines < body_lines {
            self.stats.largest_function_lines = body_lines;
            self.stats.largest_function_name = name.to_string();
        }
    }

    /// Clear statistics for a new compilation unit.
    pub fn reset_stats(&mut self) {
        self.stats = SessionStats::default();
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }
}

/// Compilation unit statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Instruction lines emitted (control-flow tokens included).
    pub instructions_emitted: usize,

    /// Count of each mnemonic emitted.
    pub instruction_counts: HashMap<String, usize>,

    /// Register identifiers issued, scratch slots included.
    pub registers_issued: usize,

    /// Nodes constructed, reachable or not.
    pub nodes_constructed: usize,

    /// Literal pool entries, seeds included.
    pub literals: usize,

    /// Subroutines emitted.
    pub functions_emitted: usize,

    pub largest_function_lines: usize,

    pub largest_function_name: String,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Unit Statistics:")?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Nodes constructed: {}", self.nodes_constructed)?;
        writeln!(f, "  Registers issued: {}", self.registers_issued)?;
        writeln!(f, "  Literals: {}", self.literals)?;
        writeln!(f, "  Functions emitted: {}", self.functions_emitted)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} lines)",
                self.largest_function_name, self.largest_function_lines
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

            for (mnemonic, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", mnemonic, count)?;
            }
        }

        Ok(())
    }
}
