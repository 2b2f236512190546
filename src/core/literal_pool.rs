//! Literal constant pool.
//!
//! Constants are interned by exact 4-word bit pattern. Two values that are
//! numerically different but share a bit pattern (for example an `i32` and an
//! `f32` reinterpreted to the same bits) share one pool entry; two values that
//! compare equal numerically but differ in bits (`+0.0` and `-0.0`) do not.

use hashbrown::HashMap;

/// A literal bit pattern as declared by `dcl_literal`.
pub type LiteralBits = [u32; 4];

/// Index of a literal in the pool (`lN`).
pub type LiteralIdx = u32;

/// The all-zero pattern, always at index 0.
pub const ZERO_BITS: LiteralBits = [0; 4];

/// The all-one pattern, always at index 1.
pub const ONES_BITS: LiteralBits = [u32::MAX; 4];

/// Entries present in every pool.
const SEEDED: usize = 2;

/// Interning table for literal constants.
#[derive(Debug, Clone)]
pub struct LiteralPool {
    indices: HashMap<LiteralBits, LiteralIdx>,
    entries: Vec<LiteralBits>,
}

impl LiteralPool {
    /// Create a pool pre-seeded with the zero and all-one patterns.
    pub fn new() -> Self {
        let mut pool = Self {
            indices: HashMap::new(),
            entries: Vec::new(),
        };
        pool.reset();
        pool
    }

    /// Drop every entry except the two seeds.
    pub fn reset(&mut self) {
        self.indices.clear();
        self.entries.clear();
        self.intern(ZERO_BITS);
        self.intern(ONES_BITS);
    }

    /// Return the index for `bits`, inserting it if absent.
    pub fn intern(&mut self, bits: LiteralBits) -> LiteralIdx {
        if let Some(&idx) = self.indices.get(&bits) {
            return idx;
        }
        let idx = self.entries.len() as LiteralIdx;
        self.entries.push(bits);
        self.indices.insert(bits, idx);
        idx
    }

    /// Drop every entry at index `len` or above. The seeds always stay.
    pub fn truncate(&mut self, len: usize) {
        let len = len.max(SEEDED);
        if len >= self.entries.len() {
            return;
        }
        for bits in self.entries.drain(len..) {
            self.indices.remove(&bits);
        }
    }

    pub fn get(&self, idx: LiteralIdx) -> Option<LiteralBits> {
        self.entries.get(idx as usize).copied()
    }

    pub fn lookup(&self, bits: &LiteralBits) -> Option<LiteralIdx> {
        self.indices.get(bits).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in pool order.
    pub fn iter(&self) -> impl Iterator<Item = (LiteralIdx, &LiteralBits)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, bits)| (idx as LiteralIdx, bits))
    }

    /// One `dcl_literal` line per entry, in pool order.
    pub fn declarations(&self) -> Vec<String> {
        self.iter()
            .map(|(idx, bits)| {
                format!(
                    "dcl_literal l{}, 0x{:08X}, 0x{:08X}, 0x{:08X}, 0x{:08X}",
                    idx, bits[0], bits[1], bits[2], bits[3]
                )
            })
            .collect()
    }
}

impl Default for LiteralPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast a 32-bit pattern to all four words.
pub fn splat32(bits: u32) -> LiteralBits {
    [bits; 4]
}

/// Broadcast a float64 into both double slots (`[lo, hi, lo, hi]`).
pub fn splat64(value: f64) -> LiteralBits {
    let bits = value.to_bits();
    let lo = bits as u32;
    let hi = (bits >> 32) as u32;
    [lo, hi, lo, hi]
}
