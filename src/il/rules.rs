// This module holds the instruction-selection table of the generator. Every legal
// combination of opcode and exact operand types maps to a RuleEntry; a combination with
// no entry is rejected when the node is constructed, never at serialization. An entry
// carries a native rule and, for double-precision transcendentals, a portable rule used
// when the capability snapshot lacks native double support. Each Rule names its
// lowering (the shape of the instruction sequence emitted for it), its result type and
// the number of scratch registers it needs beyond the result slot. The table is built
// once per generator and is enumerable, so the rejection set can be tested directly.

//! Emission rule table keyed by opcode and operand types.

use super::node::Opcode;
use crate::core::literal_pool::{splat64, LiteralBits, ZERO_BITS};
use crate::core::types::describe_types;
use crate::core::{Capabilities, CodegenError, CodegenResult, ElementKind, TypeDescriptor};
use hashbrown::HashMap;

/// Source modifier applied through a plain move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceModifier {
    Neg,
    Abs,
}

/// Shape of the instruction sequence a rule emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lowering {
    /// One instruction over whole values: `m dst, a, b, ...`.
    Vector(&'static str),
    /// Binary instruction with operands exchanged (`a > b` as `b < a`).
    VectorSwapped(&'static str),
    /// One instruction per float64 lane.
    PerLane(&'static str),
    /// `mov` with a source modifier.
    Modified(SourceModifier),
    /// Flip the sign word of each float64 lane.
    NegateDouble,
    /// Clear the sign bit of each float64 lane with a mask literal.
    AbsDouble,
    /// `max(a, -a)` through one scratch register.
    IntAbs,
    /// `a + (-b)` through one scratch register.
    IntSub,
    /// `dadd` with the second operand negated.
    SubDouble,
    /// Plain move: swizzles and same-width bit casts.
    Move,
    /// Optional 32-bit pre-conversion into scratch, then `f2d` per lane.
    ConvertToDouble(Option<&'static str>),
    /// `d2f` per lane, then an optional 32-bit post-conversion.
    ConvertFromDouble(Option<&'static str>),
    /// Float64 compare, one result word per lane.
    DoubleCompare { mnemonic: &'static str, swapped: bool },
    /// `cmov_logical` with the condition widened to the value's words.
    Select,
    /// Single-precision estimate refined by two Newton-Raphson steps.
    /// A zero operand selects +inf.
    RsqrtDoubleEmulated,
    /// Emulated reciprocal square root multiplied by the operand.
    /// A zero operand passes through unchanged.
    SqrtDoubleEmulated,
    /// Emulated reciprocal of the divisor multiplied by the dividend.
    /// A zero divisor keeps the unrefined signed-infinity estimate.
    DivDoubleEmulated,
}

/// Sign-clearing mask for two float64 lanes.
pub const ABS_DOUBLE_MASK: LiteralBits = [0xFFFF_FFFF, 0x7FFF_FFFF, 0xFFFF_FFFF, 0x7FFF_FFFF];

/// Newton-Raphson iterations used by the emulated float64 rules.
pub const REFINEMENT_STEPS: usize = 2;

impl Lowering {
    /// Literal patterns the lowering reads, in the order it addresses them.
    pub fn constants(&self) -> Vec<LiteralBits> {
        match self {
            Lowering::AbsDouble => vec![ABS_DOUBLE_MASK],
            Lowering::RsqrtDoubleEmulated => {
                vec![splat64(-0.5), splat64(1.5), ZERO_BITS, splat64(f64::INFINITY)]
            }
            Lowering::SqrtDoubleEmulated => vec![splat64(-0.5), splat64(1.5), ZERO_BITS],
            Lowering::DivDoubleEmulated => vec![splat64(1.0), ZERO_BITS],
            _ => Vec::new(),
        }
    }
}

/// A selected emission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub lowering: Lowering,
    pub result: TypeDescriptor,
    /// Registers reserved after the result slot.
    pub scratch: u32,
}

impl Rule {
    const fn new(lowering: Lowering, result: TypeDescriptor) -> Self {
        Self {
            lowering,
            result,
            scratch: 0,
        }
    }

    const fn with_scratch(mut self, scratch: u32) -> Self {
        self.scratch = scratch;
        self
    }
}

/// Table key: opcode plus exact operand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub op: Opcode,
    pub operands: [Option<TypeDescriptor>; 3],
}

impl RuleKey {
    pub fn new(op: Opcode, operands: &[TypeDescriptor]) -> Self {
        let mut slots = [None; 3];
        for (slot, ty) in slots.iter_mut().zip(operands) {
            *slot = Some(*ty);
        }
        Self { op, operands: slots }
    }

    pub fn operand_types(&self) -> Vec<TypeDescriptor> {
        self.operands.iter().flatten().copied().collect()
    }
}

/// Native rule plus optional portable fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleEntry {
    pub native: Rule,
    pub portable: Option<Rule>,
}

impl RuleEntry {
    /// Pick the variant the target supports.
    pub fn select(&self, caps: &Capabilities) -> Rule {
        match self.portable {
            Some(portable) if !caps.native_double => portable,
            _ => self.native,
        }
    }
}

/// Enumerable instruction-selection table.
#[derive(Debug, Clone)]
pub struct RuleTable {
    entries: HashMap<RuleKey, RuleEntry>,
}

impl RuleTable {
    pub fn new() -> Self {
        let mut table = Self {
            entries: HashMap::new(),
        };
        for ty in TypeDescriptor::all() {
            table.add_unary_rules(ty);
            table.add_binary_rules(ty);
            table.add_ternary_rules(ty);
            table.add_conversion_rules(ty);
        }
        log::debug!("Rule table built with {} entries", table.entries.len());
        table
    }

    fn insert(&mut self, op: Opcode, operands: &[TypeDescriptor], native: Rule) {
        self.entries.insert(
            RuleKey::new(op, operands),
            RuleEntry {
                native,
                portable: None,
            },
        );
    }

    fn insert_with_fallback(
        &mut self,
        op: Opcode,
        operands: &[TypeDescriptor],
        native: Rule,
        portable: Rule,
    ) {
        self.entries.insert(
            RuleKey::new(op, operands),
            RuleEntry {
                native,
                portable: Some(portable),
            },
        );
    }

    fn add_unary_rules(&mut self, ty: TypeDescriptor) {
        use ElementKind::*;
        use Lowering::*;

        let same = |lowering| Rule::new(lowering, ty);
        self.insert(Opcode::Swizzle, &[ty], same(Move));

        match ty.kind() {
            F32 => {
                self.insert(Opcode::Neg, &[ty], same(Modified(SourceModifier::Neg)));
                self.insert(Opcode::Abs, &[ty], same(Modified(SourceModifier::Abs)));
                self.insert(Opcode::Sqrt, &[ty], same(Vector("sqrt_vec")));
                self.insert(Opcode::Rsqrt, &[ty], same(Vector("rsq_vec")));
                self.insert(Opcode::Floor, &[ty], same(Vector("flr")));
                self.insert(Opcode::Fract, &[ty], same(Vector("frc")));
            }
            I32 => {
                self.insert(Opcode::Neg, &[ty], same(Vector("inegate")));
                self.insert(Opcode::Abs, &[ty], same(IntAbs).with_scratch(1));
                self.insert(Opcode::Not, &[ty], same(Vector("inot")));
            }
            U32 => {
                self.insert(Opcode::Not, &[ty], same(Vector("inot")));
            }
            F64 => {
                self.insert(Opcode::Neg, &[ty], same(NegateDouble));
                self.insert(Opcode::Abs, &[ty], same(AbsDouble));
                self.insert_with_fallback(
                    Opcode::Sqrt,
                    &[ty],
                    same(PerLane("dsqrt")),
                    same(SqrtDoubleEmulated).with_scratch(2),
                );
                self.insert_with_fallback(
                    Opcode::Rsqrt,
                    &[ty],
                    same(PerLane("drsq")),
                    same(RsqrtDoubleEmulated).with_scratch(2),
                );
            }
        }
    }

    fn add_binary_rules(&mut self, ty: TypeDescriptor) {
        use ElementKind::*;
        use Lowering::*;

        let pair = [ty, ty];
        let same = |lowering| Rule::new(lowering, ty);
        let arithmetic: &[(Opcode, Lowering)] = match ty.kind() {
            F32 => &[
                (Opcode::Add, Vector("add")),
                (Opcode::Sub, Vector("sub")),
                (Opcode::Mul, Vector("mul")),
                (Opcode::Div, Vector("div_zeroop(infinity)")),
                (Opcode::Min, Vector("min")),
                (Opcode::Max, Vector("max")),
            ],
            I32 => &[
                (Opcode::Add, Vector("iadd")),
                (Opcode::Mul, Vector("imul")),
                (Opcode::Div, Vector("idiv")),
                (Opcode::Mod, Vector("imod")),
                (Opcode::Min, Vector("imin")),
                (Opcode::Max, Vector("imax")),
                (Opcode::Shr, Vector("ishr")),
            ],
            U32 => &[
                (Opcode::Add, Vector("iadd")),
                (Opcode::Mul, Vector("umul")),
                (Opcode::Div, Vector("udiv")),
                (Opcode::Mod, Vector("umod")),
                (Opcode::Min, Vector("umin")),
                (Opcode::Max, Vector("umax")),
                (Opcode::Shr, Vector("ushr")),
            ],
            F64 => &[
                (Opcode::Add, PerLane("dadd")),
                (Opcode::Sub, SubDouble),
                (Opcode::Mul, PerLane("dmul")),
                (Opcode::Min, PerLane("dmin")),
                (Opcode::Max, PerLane("dmax")),
            ],
        };
        for (op, lowering) in arithmetic {
            self.insert(*op, &pair, same(*lowering));
        }

        if ty.kind().is_integer() {
            self.insert(Opcode::Sub, &pair, same(IntSub).with_scratch(1));
            self.insert(Opcode::And, &pair, same(Vector("iand")));
            self.insert(Opcode::Or, &pair, same(Vector("ior")));
            self.insert(Opcode::Xor, &pair, same(Vector("ixor")));
            self.insert(Opcode::Shl, &pair, same(Vector("ishl")));
        }

        if ty.kind() == F64 {
            self.insert_with_fallback(
                Opcode::Div,
                &pair,
                same(PerLane("ddiv")),
                same(DivDoubleEmulated).with_scratch(2),
            );
        }

        // Compares yield an all-ones/all-zeros int32 per lane.
        let Ok(mask_ty) = ty.with_kind(I32) else {
            return;
        };
        let compare = |lowering| Rule::new(lowering, mask_ty);
        let (eq, ne, lt, ge) = match ty.kind() {
            F32 | F64 => ("eq", "ne", "lt", "ge"),
            I32 => ("ieq", "ine", "ilt", "ige"),
            U32 => ("ieq", "ine", "ult", "uge"),
        };
        let compares = [
            (Opcode::Eq, eq, false),
            (Opcode::Ne, ne, false),
            (Opcode::Lt, lt, false),
            (Opcode::Ge, ge, false),
            (Opcode::Gt, lt, true),
            (Opcode::Le, ge, true),
        ];
        for (op, mnemonic, swapped) in compares {
            let lowering = match (ty.kind(), swapped) {
                (F64, _) => DoubleCompare {
                    mnemonic: double_compare_mnemonic(mnemonic),
                    swapped,
                },
                (_, true) => VectorSwapped(mnemonic),
                (_, false) => Vector(mnemonic),
            };
            self.insert(op, &pair, compare(lowering));
        }
    }

    fn add_ternary_rules(&mut self, ty: TypeDescriptor) {
        use ElementKind::*;
        use Lowering::*;

        let mad = match ty.kind() {
            F32 => Vector("mad"),
            I32 => Vector("imad"),
            U32 => Vector("umad"),
            F64 => PerLane("dmad"),
        };
        self.insert(Opcode::Mad, &[ty, ty, ty], Rule::new(mad, ty));

        if let Ok(cond_ty) = ty.with_kind(I32) {
            self.insert(Opcode::Select, &[cond_ty, ty, ty], Rule::new(Select, ty));
        }
    }

    fn add_conversion_rules(&mut self, ty: TypeDescriptor) {
        use ElementKind::*;
        use Lowering::*;

        let conversions: &[(ElementKind, Lowering, u32)] = match ty.kind() {
            I32 => &[
                (F32, Vector("itof"), 0),
                (U32, Move, 0),
                (F64, ConvertToDouble(Some("itof")), 1),
            ],
            U32 => &[
                (F32, Vector("utof"), 0),
                (I32, Move, 0),
                (F64, ConvertToDouble(Some("utof")), 1),
            ],
            F32 => &[
                (I32, Vector("ftoi"), 0),
                (U32, Vector("ftou"), 0),
                (F64, ConvertToDouble(None), 0),
            ],
            F64 => &[
                (F32, ConvertFromDouble(None), 0),
                (I32, ConvertFromDouble(Some("ftoi")), 1),
                (U32, ConvertFromDouble(Some("ftou")), 1),
            ],
        };
        for (target, lowering, scratch) in conversions {
            // f32x4 and wider have no float64 counterpart.
            if let Ok(result) = ty.with_kind(*target) {
                self.insert(
                    Opcode::Convert(*target),
                    &[ty],
                    Rule::new(*lowering, result).with_scratch(*scratch),
                );
            }
        }
    }

    pub fn lookup(&self, op: Opcode, operands: &[TypeDescriptor]) -> Option<&RuleEntry> {
        self.entries.get(&RuleKey::new(op, operands))
    }

    /// Select the rule for `op` over `operands`, or fail with TypeMismatch.
    pub fn resolve(
        &self,
        op: Opcode,
        operands: &[TypeDescriptor],
        caps: &Capabilities,
    ) -> CodegenResult<Rule> {
        if operands.len() != op.arity() {
            return Err(CodegenError::type_mismatch(
                op.name(),
                format!("{} operands for arity {}", operands.len(), op.arity()),
            ));
        }
        self.lookup(op, operands)
            .map(|entry| entry.select(caps))
            .ok_or_else(|| CodegenError::type_mismatch(op.name(), describe_types(operands)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RuleKey, &RuleEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

fn double_compare_mnemonic(mnemonic: &'static str) -> &'static str {
    match mnemonic {
        "eq" => "deq",
        "ne" => "dne",
        "lt" => "dlt",
        _ => "dge",
    }
}
