// This module turns one selected rule into instruction text. It is deliberately free of
// generator state: the caller resolves every operand to a typed Source (register,
// literal or named alias), passes the node's result register, its swizzle components
// and the literal indices interned at construction, and receives the lines to append to
// the current stream. Float64 values are handled lane by lane where the dialect's double
// instructions only cover one .xy/.zw pair; scratch registers follow the result register
// contiguously (result + 1, result + 2). Address nodes (indexed constant-buffer reads and
// raw UAV loads) and statements (moves, masked merges, raw stores) have their own
// formatting helpers at the bottom of the file.

//! Rule lowering to IL instruction text.

use super::node::Address;
use super::operand::{Base, Dest, Operand, Source};
use super::rules::{Lowering, Rule, SourceModifier, REFINEMENT_STEPS};
use crate::core::swizzle::{lane_components, value_components};
use crate::core::{
    CodegenError, CodegenResult, Component, ElementKind, LiteralIdx, RegisterId, TypeDescriptor,
};

/// Everything a rule needs to produce its text.
#[derive(Debug, Clone)]
pub struct Lowered<'a, 'b> {
    pub rule: Rule,
    pub dest: RegisterId,
    pub operands: &'b [Source<'a>],
    /// Physical source components of a swizzle node, empty otherwise.
    pub swizzle: &'b [Component],
    pub constants: &'b [LiteralIdx],
}

impl<'a, 'b> Lowered<'a, 'b> {
    fn operand(&self, index: usize) -> CodegenResult<Source<'a>> {
        self.operands.get(index).copied().ok_or_else(|| {
            CodegenError::contract(format!(
                "{:?} reads operand {} of {}",
                self.rule.lowering,
                index,
                self.operands.len()
            ))
        })
    }

    fn constant(&self, index: usize, ty: TypeDescriptor) -> CodegenResult<Source<'a>> {
        let idx = self.constants.get(index).copied().ok_or_else(|| {
            CodegenError::contract(format!(
                "{:?} reads constant {} of {}",
                self.rule.lowering,
                index,
                self.constants.len()
            ))
        })?;
        Ok(Source::new(Base::Literal(idx), ty))
    }

    fn scratch(&self, slot: u32) -> CodegenResult<RegisterId> {
        if slot == 0 || slot > self.rule.scratch {
            return Err(CodegenError::contract(format!(
                "{:?} addresses scratch {} of {}",
                self.rule.lowering, slot, self.rule.scratch
            )));
        }
        Ok(self.dest.offset(slot))
    }

    fn result(&self) -> TypeDescriptor {
        self.rule.result
    }
}

fn instruction(mnemonic: &str, dest: &Dest, sources: &[Operand<'_>]) -> String {
    let mut line = format!("{mnemonic} {dest}");
    for src in sources {
        line.push_str(", ");
        line.push_str(&src.to_string());
    }
    line
}

/// High word of each float64 lane in `ty` (the sign lives there).
fn sign_components(ty: TypeDescriptor) -> Vec<Component> {
    (0..ty.lanes())
        .filter_map(|lane| lane_components(ElementKind::F64, lane).last().copied())
        .collect()
}

/// Lower `ctx.rule` to instruction lines.
pub fn lower(ctx: &Lowered<'_, '_>) -> CodegenResult<Vec<String>> {
    let result = ctx.result();
    let dest = Dest::value(ctx.dest, result);
    let mut lines = Vec::new();

    match ctx.rule.lowering {
        Lowering::Vector(mnemonic) => {
            let sources: Vec<_> = ctx.operands.iter().map(|s| s.all()).collect();
            lines.push(instruction(mnemonic, &dest, &sources));
        }
        Lowering::VectorSwapped(mnemonic) => {
            let (a, b) = (ctx.operand(0)?, ctx.operand(1)?);
            lines.push(instruction(mnemonic, &dest, &[b.all(), a.all()]));
        }
        Lowering::PerLane(mnemonic) => {
            for lane in 0..result.lanes() {
                let sources: Vec<_> = ctx.operands.iter().map(|s| s.lane(lane)).collect();
                let lane_dest = Dest::lane(ctx.dest, result.kind(), lane);
                lines.push(instruction(mnemonic, &lane_dest, &sources));
            }
        }
        Lowering::Modified(modifier) => {
            let a = ctx.operand(0)?;
            let src = match modifier {
                SourceModifier::Neg => {
                    let components = a.all().components().to_vec();
                    a.all().negate(components)
                }
                SourceModifier::Abs => a.all().abs(),
            };
            lines.push(instruction("mov", &dest, &[src]));
        }
        Lowering::NegateDouble => {
            let a = ctx.operand(0)?;
            let src = a.all().negate(sign_components(a.ty));
            lines.push(instruction("mov", &dest, &[src]));
        }
        Lowering::AbsDouble => {
            let a = ctx.operand(0)?;
            let mask = ctx.constant(0, a.ty)?;
            lines.push(instruction("iand", &dest, &[a.all(), mask.all()]));
        }
        Lowering::IntAbs => {
            let a = ctx.operand(0)?;
            let s1 = ctx.scratch(1)?;
            lines.push(instruction("inegate", &Dest::value(s1, a.ty), &[a.all()]));
            let negated = Source::register(s1, a.ty);
            lines.push(instruction("imax", &dest, &[a.all(), negated.all()]));
        }
        Lowering::IntSub => {
            let (a, b) = (ctx.operand(0)?, ctx.operand(1)?);
            let s1 = ctx.scratch(1)?;
            lines.push(instruction("inegate", &Dest::value(s1, b.ty), &[b.all()]));
            let negated = Source::register(s1, b.ty);
            lines.push(instruction("iadd", &dest, &[a.all(), negated.all()]));
        }
        Lowering::SubDouble => {
            let (a, b) = (ctx.operand(0)?, ctx.operand(1)?);
            for lane in 0..result.lanes() {
                let high = lane_components(ElementKind::F64, lane)[1];
                lines.push(instruction(
                    "dadd",
                    &Dest::lane(ctx.dest, ElementKind::F64, lane),
                    &[a.lane(lane), b.lane(lane).negate(vec![high])],
                ));
            }
        }
        Lowering::Move => {
            let a = ctx.operand(0)?;
            let src = if ctx.swizzle.is_empty() {
                a.all()
            } else {
                a.select(ctx.swizzle.to_vec())
            };
            lines.push(instruction("mov", &dest, &[src]));
        }
        Lowering::ConvertToDouble(pre) => {
            let a = ctx.operand(0)?;
            let single = a.ty.with_kind(ElementKind::F32)?;
            let src = match pre {
                Some(mnemonic) => {
                    let s1 = ctx.scratch(1)?;
                    lines.push(instruction(mnemonic, &Dest::value(s1, single), &[a.all()]));
                    Source::register(s1, single)
                }
                None => a,
            };
            for lane in 0..result.lanes() {
                lines.push(instruction(
                    "f2d",
                    &Dest::lane(ctx.dest, ElementKind::F64, lane),
                    &[src.lane(lane)],
                ));
            }
        }
        Lowering::ConvertFromDouble(post) => {
            let a = ctx.operand(0)?;
            let single = result.with_kind(ElementKind::F32)?;
            let target = match post {
                Some(_) => ctx.scratch(1)?,
                None => ctx.dest,
            };
            for lane in 0..result.lanes() {
                lines.push(instruction(
                    "d2f",
                    &Dest::single(target, Component::from_index(lane)),
                    &[a.lane(lane)],
                ));
            }
            if let Some(mnemonic) = post {
                let converted = Source::register(target, single);
                lines.push(instruction(mnemonic, &dest, &[converted.all()]));
            }
        }
        Lowering::DoubleCompare { mnemonic, swapped } => {
            let (mut a, mut b) = (ctx.operand(0)?, ctx.operand(1)?);
            if swapped {
                std::mem::swap(&mut a, &mut b);
            }
            for lane in 0..result.lanes() {
                lines.push(instruction(
                    mnemonic,
                    &Dest::single(ctx.dest, Component::from_index(lane)),
                    &[a.lane(lane), b.lane(lane)],
                ));
            }
        }
        Lowering::Select => {
            let (cond, a, b) = (ctx.operand(0)?, ctx.operand(1)?, ctx.operand(2)?);
            let words = a.ty.kind().words_per_element() as usize;
            let widened: Vec<Component> = (0..a.ty.lanes())
                .flat_map(|lane| std::iter::repeat(Component::from_index(lane)).take(words))
                .collect();
            lines.push(instruction(
                "cmov_logical",
                &dest,
                &[cond.select(widened), a.all(), b.all()],
            ));
        }
        Lowering::RsqrtDoubleEmulated | Lowering::SqrtDoubleEmulated => {
            let a = ctx.operand(0)?;
            let half = ctx.constant(0, a.ty)?;
            let three_halves = ctx.constant(1, a.ty)?;
            let (s1, s2) = (ctx.scratch(1)?, ctx.scratch(2)?);
            let (s1_src, s2_src) = (Source::register(s1, a.ty), Source::register(s2, a.ty));

            for lane in 0..result.lanes() {
                let words = lane_components(ElementKind::F64, lane);
                let lane_dest = |reg| Dest::lane(reg, ElementKind::F64, lane);
                let estimate = Source::register(s1, TypeDescriptor::F32).select(vec![words[0]]);

                lines.push(instruction("d2f", &Dest::single(s1, words[0]), &[a.lane(lane)]));
                lines.push(instruction(
                    "rsq_vec",
                    &Dest::single(s1, words[0]),
                    &[estimate.clone()],
                ));
                lines.push(instruction("f2d", &lane_dest(s2), &[estimate]));
                for _ in 0..REFINEMENT_STEPS {
                    lines.push(instruction(
                        "dmul",
                        &lane_dest(s1),
                        &[s2_src.lane(lane), s2_src.lane(lane)],
                    ));
                    lines.push(instruction(
                        "dmul",
                        &lane_dest(s1),
                        &[s1_src.lane(lane), a.lane(lane)],
                    ));
                    lines.push(instruction(
                        "dmad",
                        &lane_dest(s1),
                        &[s1_src.lane(lane), half.lane(lane), three_halves.lane(lane)],
                    ));
                    lines.push(instruction(
                        "dmul",
                        &lane_dest(s2),
                        &[s2_src.lane(lane), s1_src.lane(lane)],
                    ));
                }
                // The f32 estimate of zero is +inf and the refinement turns it into NaN.
                let guard = if ctx.rule.lowering == Lowering::SqrtDoubleEmulated {
                    lines.push(instruction(
                        "dmul",
                        &lane_dest(ctx.dest),
                        &[s2_src.lane(lane), a.lane(lane)],
                    ));
                    a
                } else {
                    lines.push(instruction("mov", &lane_dest(ctx.dest), &[s2_src.lane(lane)]));
                    ctx.constant(3, a.ty)?
                };
                let zero = ctx.constant(2, a.ty)?;
                lines.extend(zero_guard(ctx.dest, s1, lane, &a, &zero, &guard));
            }
        }
        Lowering::DivDoubleEmulated => {
            let (a, b) = (ctx.operand(0)?, ctx.operand(1)?);
            let one = ctx.constant(0, b.ty)?;
            let (s1, s2) = (ctx.scratch(1)?, ctx.scratch(2)?);
            let (s1_src, s2_src) = (Source::register(s1, b.ty), Source::register(s2, b.ty));

            for lane in 0..result.lanes() {
                let words = lane_components(ElementKind::F64, lane);
                let lane_dest = |reg| Dest::lane(reg, ElementKind::F64, lane);
                let estimate = Source::register(s1, TypeDescriptor::F32).select(vec![words[0]]);

                lines.push(instruction("d2f", &Dest::single(s1, words[0]), &[b.lane(lane)]));
                lines.push(instruction(
                    "rcp_vec",
                    &Dest::single(s1, words[0]),
                    &[estimate.clone()],
                ));
                lines.push(instruction("f2d", &lane_dest(s2), &[estimate.clone()]));
                // The result lane is free until the final multiply; it keeps the
                // unrefined estimate, which is the signed infinity of a zero divisor.
                lines.push(instruction("f2d", &lane_dest(ctx.dest), &[estimate]));
                for _ in 0..REFINEMENT_STEPS {
                    lines.push(instruction(
                        "dmad",
                        &lane_dest(s1),
                        &[
                            b.lane(lane).negate(vec![words[1]]),
                            s2_src.lane(lane),
                            one.lane(lane),
                        ],
                    ));
                    lines.push(instruction(
                        "dmad",
                        &lane_dest(s2),
                        &[s2_src.lane(lane), s1_src.lane(lane), s2_src.lane(lane)],
                    ));
                }
                let zero = ctx.constant(1, b.ty)?;
                let estimate = Source::register(ctx.dest, b.ty);
                lines.extend(zero_guard(s2, s1, lane, &b, &zero, &estimate));
                lines.push(instruction(
                    "dmul",
                    &lane_dest(ctx.dest),
                    &[a.lane(lane), s2_src.lane(lane)],
                ));
            }
        }
    }

    Ok(lines)
}

/// Replace float64 lane `lane` of `target` with `replacement` where `tested` is zero.
///
/// The compare mask goes to the low word of the lane in `flag`.
fn zero_guard(
    target: RegisterId,
    flag: RegisterId,
    lane: u8,
    tested: &Source<'_>,
    zero: &Source<'_>,
    replacement: &Source<'_>,
) -> [String; 2] {
    let words = lane_components(ElementKind::F64, lane);
    let target_lane = Dest::lane(target, ElementKind::F64, lane);
    let current = Source::register(target, tested.ty);
    let mask = Source::register(flag, TypeDescriptor::I32).select(vec![words[0], words[0]]);
    [
        instruction(
            "deq",
            &Dest::single(flag, words[0]),
            &[tested.lane(lane), zero.lane(lane)],
        ),
        instruction(
            "cmov_logical",
            &target_lane,
            &[mask, replacement.lane(lane), current.lane(lane)],
        ),
    ]
}

/// Indexed read or raw load into `dest`.
pub fn lower_address(
    address: Address,
    dest: RegisterId,
    result: TypeDescriptor,
    index: &Source<'_>,
) -> String {
    let dest = Dest::value(dest, result);
    let index = index.all();
    match address {
        Address::ConstantBuffer { buffer, offset } => {
            let mut element = format!("cb{buffer}[{index}");
            if offset > 0 {
                element.push_str(&format!("+{offset}"));
            }
            element.push(']');
            let src = Source::new(Base::Named(&element), result).all();
            instruction("mov", &dest, &[src])
        }
        Address::RawUav { id } => instruction(&format!("uav_raw_load_id({id})"), &dest, &[index]),
    }
}

/// `mov` of a whole value, or of a source aligned with a masked destination.
pub fn lower_move(dest: &Dest, src: Operand<'_>) -> String {
    instruction("mov", dest, &[src])
}

/// Raw UAV store of every word of `value` at byte address `address`.
pub fn lower_raw_store(uav: u32, address: &Source<'_>, value: &Source<'_>) -> String {
    let suffix: String = value_components(value.ty)
        .into_iter()
        .map(Component::to_char)
        .collect();
    format!(
        "uav_raw_store_id({uav}) mem.{suffix}, {}, {}",
        address.all(),
        value.all()
    )
}
