//! Integration tests for the builder API over whole compilation units.
//!
//! Each test runs begin..end on a fresh generator and inspects the serialized
//! program, the binding table or the register file through the public API.

use bumpalo::Bump;
use ilgen::core::{
    match_input_to_output, ElementKind, RegisterId, Selector, Swizzle, TypeDescriptor, WriteMask,
};
use ilgen::il::{Param, SourceGenerator};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Helper to check if output contains expected patterns
fn check_output_contains(output: &str, patterns: &[&str]) {
    for pattern in patterns {
        assert!(
            output.contains(pattern),
            "Output missing expected pattern: '{pattern}'\nFull output:\n{output}"
        );
    }
}

/// Lines whose first token is exactly `mnemonic`.
fn count_mnemonic(code: &str, mnemonic: &str) -> usize {
    code.lines()
        .filter(|line| line.split_whitespace().next() == Some(mnemonic))
        .count()
}

fn ty(kind: ElementKind, lanes: u8) -> TypeDescriptor {
    TypeDescriptor::new(kind, lanes).unwrap()
}

#[test]
fn test_literal_interned_once() {
    init_logging();
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let first = gen.lit_f32(42.0).unwrap();
    let second = gen.lit_f32(42.0).unwrap();
    assert_eq!(
        gen.literal_index(first).unwrap(),
        gen.literal_index(second).unwrap()
    );

    let v = gen.variable(TypeDescriptor::F32).unwrap();
    let sum = gen.add(first, second).unwrap();
    gen.assign(v, sum).unwrap();
    let program = gen.end().unwrap();

    let declarations = program
        .header
        .lines()
        .filter(|line| line.contains("0x42280000"))
        .count();
    assert_eq!(declarations, 1, "header:\n{}", program.header);
    check_output_contains(&program.code, &["add r1.x, l2.x, l2.x"]);
}

#[test]
fn test_literal_pool_survives_only_one_unit() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();
    gen.lit_f32(3.5).unwrap();
    assert_eq!(gen.literal_pool().len(), 3);
    gen.end().unwrap();

    gen.begin(None).unwrap();
    assert_eq!(gen.literal_pool().len(), 2);
    let program = gen.end().unwrap();
    assert_eq!(program.header.lines().filter(|l| l.starts_with("dcl_literal")).count(), 2);
}

#[test]
fn test_if_else_emits_one_of_each() {
    init_logging();
    for body_size in [1, 8] {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();

        let a = gen.variable(TypeDescriptor::I32).unwrap();
        let x = gen.variable(TypeDescriptor::I32).unwrap();
        let y = gen.variable(TypeDescriptor::I32).unwrap();
        let one = gen.lit_i32(1).unwrap();
        let two = gen.lit_i32(2).unwrap();
        let cond = gen.gt(x, y).unwrap();

        gen.if_then_else(
            cond,
            |g| {
                for _ in 0..body_size {
                    g.assign(a, one)?;
                }
                Ok(())
            },
            |g| {
                for _ in 0..body_size {
                    g.assign(a, two)?;
                }
                g.loop_do(|g| g.break_loop())
            },
        )
        .unwrap();
        let program = gen.end().unwrap();
        let code = &program.code;

        assert_eq!(count_mnemonic(code, "if_logicalnz"), 1, "{code}");
        assert_eq!(count_mnemonic(code, "else"), 1, "{code}");
        assert_eq!(count_mnemonic(code, "endif"), 1, "{code}");
        assert_eq!(count_mnemonic(code, "whileloop"), 1, "{code}");
        assert_eq!(count_mnemonic(code, "endloop"), 1, "{code}");
        assert_eq!(count_mnemonic(code, "mov"), 2 * body_size, "{code}");
        // gt is lowered as a swapped lt.
        check_output_contains(code, &["ilt r3.x, r2.x, r1.x", "if_logicalnz r3.x"]);
        assert!(code.lines().any(|l| l == "else"));
        assert!(code.lines().any(|l| l == "        break"));
    }
}

#[test]
fn test_float_compare_branches_on_relop() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let x = gen.variable(TypeDescriptor::F32).unwrap();
    let limit = gen.lit_f32(1.0).unwrap();
    let small = gen.lt(x, limit).unwrap();
    gen.if_then(small, |g| g.assign(x, limit)).unwrap();
    gen.if_then(!small, |g| g.assign(x, limit)).unwrap();
    let program = gen.end().unwrap();

    check_output_contains(
        &program.code,
        &["ifc_relop(lt) r0.x, l2.x", "ifc_relop(ge) r0.x, l2.x"],
    );
    // The compare itself is folded into the branch.
    assert_eq!(count_mnemonic(&program.code, "lt"), 0);
}

#[test]
fn test_condition_types() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let f = gen.variable(TypeDescriptor::F32).unwrap();
    assert!(gen.if_begin(f).unwrap_err().is_type_mismatch());

    let wide = gen.variable(ty(ElementKind::I32, 4)).unwrap();
    assert!(gen.if_begin(wide).unwrap_err().is_type_mismatch());

    let flag = gen.variable(TypeDescriptor::U32).unwrap();
    gen.if_begin(!flag).unwrap();
    gen.if_end().unwrap();
    let program = gen.end().unwrap();
    check_output_contains(&program.code, &["if_logicalz r2.x"]);
}

#[test]
fn test_control_flow_misuse() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    assert!(gen.else_begin().unwrap_err().is_contract_violation());
    assert!(gen.if_end().unwrap_err().is_contract_violation());
    assert!(gen.loop_end().unwrap_err().is_contract_violation());
    assert!(gen.break_loop().unwrap_err().is_contract_violation());
    assert!(gen.continue_loop().unwrap_err().is_contract_violation());

    let flag = gen.variable(TypeDescriptor::I32).unwrap();
    gen.if_begin(flag).unwrap();
    gen.else_begin().unwrap();
    assert!(gen.else_begin().unwrap_err().is_contract_violation());
    assert!(gen.end().unwrap_err().is_contract_violation());

    gen.abort();
    gen.begin(None).unwrap();
    gen.loop_begin().unwrap();
    assert!(gen.if_end().unwrap_err().is_contract_violation());
    gen.loop_end().unwrap();
    gen.end().unwrap();
}

#[test]
fn test_while_do_reevaluates_condition() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let i = gen.variable(TypeDescriptor::I32).unwrap();
    let n = gen.lit_i32(10).unwrap();
    let one = gen.lit_i32(1).unwrap();
    gen.while_do(
        |g| Ok(g.lt(i, n)?.into()),
        |g| {
            let next = g.add(i, one)?;
            g.assign(i, next)
        },
    )
    .unwrap();
    let program = gen.end().unwrap();
    let lines: Vec<_> = program.code.lines().collect();

    assert_eq!(lines[0], "whileloop");
    assert!(lines[1].starts_with("    ilt "), "{}", program.code);
    assert!(lines[2].starts_with("    break_logicalz "), "{}", program.code);
    assert_eq!(lines[lines.len() - 2], "endloop");
}

#[test]
fn test_function_activation_restores_bindings() {
    init_logging();
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let params = [
        Param::input("x", TypeDescriptor::F32),
        Param::output("y", TypeDescriptor::F32),
    ];
    let id = gen.function("scale", &params).unwrap();
    assert_eq!(id, 1);
    let formals = gen.functions().get("scale").unwrap().formals.clone();

    let a = gen.variable(TypeDescriptor::F32).unwrap();
    let b = gen.variable(TypeDescriptor::F32).unwrap();
    let out_a = gen.variable(TypeDescriptor::F32).unwrap();
    let out_b = gen.variable(TypeDescriptor::F32).unwrap();

    for (arg, out) in [(a, out_a), (b, out_b)] {
        gen.bind("x", arg).unwrap();
        let before = gen.bindings().snapshot();

        gen.activate("scale").unwrap();
        assert_eq!(gen.lookup("x").unwrap(), formals[0]);
        assert_eq!(gen.lookup("y").unwrap(), formals[1]);
        assert_eq!(gen.functions().active(), Some("scale"));

        let x = gen.lookup("x").unwrap();
        let y = gen.lookup("y").unwrap();
        let two = gen.lit_f32(2.0).unwrap();
        let doubled = gen.mul(x, two).unwrap();
        gen.assign(y, doubled).unwrap();
        gen.deactivate().unwrap();

        assert_eq!(gen.bindings().snapshot(), before);
        assert_eq!(gen.lookup("x").unwrap(), arg);
        assert!(gen.lookup("y").unwrap_err().is_contract_violation());

        gen.call("scale", &[arg, out]).unwrap();
    }

    let record = gen.functions().get("scale").unwrap();
    assert_eq!(record.activations(), 2);
    assert_eq!(record.body().len(), 2);

    let program = gen.end().unwrap();
    let code = &program.code;
    assert_eq!(count_mnemonic(code, "func"), 1, "{code}");
    assert_eq!(count_mnemonic(code, "endfunc"), 1, "{code}");
    assert_eq!(count_mnemonic(code, "ret"), 1, "{code}");
    assert_eq!(count_mnemonic(code, "endmain"), 1, "{code}");
    assert_eq!(count_mnemonic(code, "call"), 2, "{code}");
    assert_eq!(count_mnemonic(code, "mul"), 1, "{code}");
    check_output_contains(code, &["mov r0.x, r2.x", "call 1", "mov r4.x, r1.x", "func 1"]);
}

#[test]
fn test_activation_does_not_nest() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    gen.function("outer", &[]).unwrap();
    gen.function("inner", &[]).unwrap();
    assert!(gen.deactivate().unwrap_err().is_contract_violation());
    assert!(gen.activate("missing").unwrap_err().is_contract_violation());

    gen.activate("outer").unwrap();
    assert!(gen.activate("inner").unwrap_err().is_contract_violation());
    assert_eq!(gen.functions().depth(), 1);
    gen.deactivate().unwrap();
    assert_eq!(gen.functions().depth(), 0);
    gen.end().unwrap();
}

#[test]
fn test_call_argument_checks() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let params = [Param::inout("v", TypeDescriptor::I32)];
    gen.define_function("bump", &params, |g| {
        let v = g.lookup("v")?;
        let one = g.lit_i32(1)?;
        let next = g.add(v, one)?;
        g.assign(v, next)
    })
    .unwrap();

    let v = gen.variable(TypeDescriptor::I32).unwrap();
    let f = gen.variable(TypeDescriptor::F32).unwrap();
    let lit = gen.lit_i32(4).unwrap();
    assert!(gen.call("bump", &[]).unwrap_err().is_contract_violation());
    assert!(gen.call("bump", &[f]).unwrap_err().is_type_mismatch());
    assert!(gen.call("bump", &[lit]).unwrap_err().is_contract_violation());
    assert!(gen.call("nope", &[v]).unwrap_err().is_contract_violation());
    assert!(gen
        .function("bump", &[Param::input("v", TypeDescriptor::I32)])
        .unwrap_err()
        .is_contract_violation());
    gen.call("bump", &[v]).unwrap();
    gen.end().unwrap();
}

#[test]
fn test_called_but_undefined_function() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();
    gen.function("later", &[]).unwrap();
    gen.call("later", &[]).unwrap();
    assert!(gen.end().unwrap_err().is_contract_violation());
}

#[test]
fn test_register_ids_are_monotonic() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let mut last: Option<RegisterId> = None;
    let mut issued = gen.registers().issued();
    let x = gen.variable(TypeDescriptor::F64).unwrap();
    let y = gen.variable(TypeDescriptor::F64).unwrap();
    let nodes = [
        x,
        y,
        gen.add(x, y).unwrap(),
        gen.rsqrt(x).unwrap(),
        gen.sqrt(y).unwrap(),
        gen.div(x, y).unwrap(),
        gen.neg(x).unwrap(),
    ];
    for node in nodes {
        let reg = gen.register_of(node).unwrap().unwrap();
        if let Some(prev) = last {
            assert!(reg > prev, "{reg} after {prev}");
        }
        last = Some(reg);
        assert!(gen.registers().issued() >= issued);
        issued = gen.registers().issued();
    }
    // Scratch slots follow their result and are never handed out again.
    let rsqrt = gen.register_of(nodes[3]).unwrap().unwrap();
    let sqrt = gen.register_of(nodes[4]).unwrap().unwrap();
    assert!(sqrt.0 > rsqrt.0 + 1);
    gen.end().unwrap();

    gen.begin(None).unwrap();
    assert_eq!(gen.registers().issued(), 0);
    gen.end().unwrap();
}

#[test]
fn test_write_mask_alignment_round_trips() {
    for (kind, lanes) in [(ElementKind::F32, 4u8), (ElementKind::F64, 2), (ElementKind::I32, 2)] {
        let dest_ty = ty(kind, lanes);
        for bits in 1u8..(1 << lanes) {
            let text: String = (0..lanes)
                .map(|lane| match bits & (1 << lane) {
                    0 => '_',
                    _ => ['x', 'y', 'z', 'w'][lane as usize],
                })
                .collect();
            let mask = WriteMask::parse(&text, dest_ty).unwrap();
            let src = Swizzle::identity(mask.count());
            let aligned = match_input_to_output(&mask, &src).unwrap();

            let reparsed = Swizzle::parse(&aligned.to_string(), dest_ty).unwrap();
            assert_eq!(reparsed, aligned, "mask {text}");

            let nonzero: Vec<u8> = aligned
                .selectors()
                .iter()
                .enumerate()
                .filter(|(_, s)| **s != Selector::Zero)
                .map(|(i, _)| i as u8)
                .collect();
            let active: Vec<u8> = mask.active_lanes().collect();
            assert_eq!(nonzero, active, "mask {text}");
        }
    }
}

#[test]
fn test_swizzle_format_errors() {
    let f4 = ty(ElementKind::F32, 4);
    let f2 = ty(ElementKind::F32, 2);
    assert!(Swizzle::parse("xq", f4).unwrap_err().is_format());
    assert!(Swizzle::parse("xyz", f4).unwrap_err().is_format());
    assert!(Swizzle::parse("z", f2).unwrap_err().is_format());
    assert!(WriteMask::parse("yx", f4).unwrap_err().is_format());
    assert!(WriteMask::parse("", f4).unwrap_err().is_format());

    let mask = WriteMask::parse("xz", f4).unwrap();
    let err = match_input_to_output(&mask, &Swizzle::identity(3)).unwrap_err();
    assert!(err.is_format());
}

#[test]
fn test_constant_one_selector_is_float32_only() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let f = gen.variable(ty(ElementKind::F32, 2)).unwrap();
    let ones = gen.swizzle(f, "x1").unwrap();
    let out = gen.variable(ty(ElementKind::F32, 2)).unwrap();
    gen.assign(out, ones).unwrap();

    for kind in [ElementKind::I32, ElementKind::U32, ElementKind::F64] {
        let v = gen.variable(ty(kind, 2)).unwrap();
        let err = gen.swizzle(v, "x1").unwrap_err();
        assert!(err.is_format(), "{kind}: {err}");
        assert!(gen.swizzle(v, "x0").is_ok());
    }

    let program = gen.end().unwrap();
    check_output_contains(&program.code, &["mov r1.xy, r0.x1", "mov r2.xy, r1.xy"]);
}

#[test]
fn test_continue_lowering() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let x = gen.variable(TypeDescriptor::F32).unwrap();
    let flag = gen.variable(TypeDescriptor::I32).unwrap();
    let limit = gen.lit_f32(8.0).unwrap();

    gen.loop_begin().unwrap();
    let below = gen.lt(x, limit).unwrap();
    gen.continue_if(below).unwrap();
    gen.continue_if(!below).unwrap();
    gen.continue_if(flag).unwrap();
    gen.continue_if(!flag).unwrap();
    gen.continue_loop().unwrap();
    gen.break_loop().unwrap();
    gen.loop_end().unwrap();
    let program = gen.end().unwrap();

    let lines: Vec<_> = program.code.lines().collect();
    assert_eq!(
        lines,
        vec![
            "whileloop",
            "    continuec_relop(lt) r0.x, l2.x",
            "    continuec_relop(ge) r0.x, l2.x",
            "    continue_logicalnz r1.x",
            "    continue_logicalz r1.x",
            "    continue",
            "    break",
            "endloop",
            "end",
        ]
    );
}

#[test]
fn test_select_widens_condition() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let cond = gen.variable(ty(ElementKind::I32, 2)).unwrap();
    let a = gen.variable(ty(ElementKind::F64, 2)).unwrap();
    let b = gen.variable(ty(ElementKind::F64, 2)).unwrap();
    let picked = gen.select(cond, a, b).unwrap();
    let out = gen.variable(ty(ElementKind::F64, 2)).unwrap();
    gen.assign(out, picked).unwrap();

    let flag = gen.variable(TypeDescriptor::I32).unwrap();
    let fa = gen.variable(TypeDescriptor::F32).unwrap();
    let fb = gen.variable(TypeDescriptor::F32).unwrap();
    let single = gen.select(flag, fa, fb).unwrap();
    let single_out = gen.variable(TypeDescriptor::F32).unwrap();
    gen.assign(single_out, single).unwrap();
    let program = gen.end().unwrap();

    let lines: Vec<_> = program.code.lines().collect();
    assert_eq!(
        lines,
        vec![
            "cmov_logical r3.xyzw, r0.xxyy, r1.xyzw, r2.xyzw",
            "mov r4.xyzw, r3.xyzw",
            "cmov_logical r8.x, r5.x, r6.x, r7.x",
            "mov r9.x, r8.x",
            "end",
        ]
    );
}

#[test]
fn test_convert_from_double() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let d = gen.variable(ty(ElementKind::F64, 2)).unwrap();
    let to_int = gen.convert(d, ElementKind::I32).unwrap();
    let to_float = gen.convert(d, ElementKind::F32).unwrap();
    let int_out = gen.variable(ty(ElementKind::I32, 2)).unwrap();
    let float_out = gen.variable(ty(ElementKind::F32, 2)).unwrap();
    gen.assign(int_out, to_int).unwrap();
    gen.assign(float_out, to_float).unwrap();
    let program = gen.end().unwrap();

    let lines: Vec<_> = program.code.lines().collect();
    assert_eq!(
        lines,
        vec![
            // Each lane narrows into the scratch register, then one ftoi.
            "d2f r2.x, r0.xy",
            "d2f r2._y__, r0.zw",
            "ftoi r1.xy, r2.xy",
            "mov r4.xy, r1.xy",
            "d2f r3.x, r0.xy",
            "d2f r3._y__, r0.zw",
            "mov r5.xy, r3.xy",
            "end",
        ]
    );
}

#[test]
fn test_indexed_constant_buffer_read() {
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let idx = gen.variable(TypeDescriptor::I32).unwrap();
    let tid = gen.thread_id_local().unwrap();
    assert!(gen
        .load_constant(1, idx, 0, TypeDescriptor::F32)
        .unwrap_err()
        .is_contract_violation());

    gen.declare_constant_buffer(1, 16);
    assert!(gen
        .load_constant(1, idx, 16, TypeDescriptor::F32)
        .unwrap_err()
        .is_contract_violation());

    let row = gen.load_constant(1, idx, 4, ty(ElementKind::F32, 4)).unwrap();
    let row_out = gen.variable(ty(ElementKind::F32, 4)).unwrap();
    gen.assign(row_out, row).unwrap();
    let cell = gen.load_constant(1, tid, 0, TypeDescriptor::F32).unwrap();
    let cell_out = gen.variable(TypeDescriptor::F32).unwrap();
    gen.assign(cell_out, cell).unwrap();
    let program = gen.end().unwrap();

    check_output_contains(&program.header, &["dcl_cb cb1[16]"]);
    let lines: Vec<_> = program.code.lines().collect();
    assert_eq!(
        lines,
        vec![
            "mov r1.xyzw, cb1[r0.x+4].xyzw",
            "mov r2.xyzw, r1.xyzw",
            "mov r3.x, cb1[vTidInGrpFlat.x].x",
            "mov r4.x, r3.x",
            "end",
        ]
    );
}

#[test]
fn test_replayed_body_leaves_no_declarations() {
    init_logging();
    let arena = Bump::new();
    let mut gen = SourceGenerator::new(&arena);
    gen.begin(None).unwrap();

    let params = [Param::inout("v", TypeDescriptor::F32)];
    gen.function("bump", &params).unwrap();

    gen.activate("bump").unwrap();
    let v = gen.lookup("v").unwrap();
    let one = gen.lit_f32(1.0).unwrap();
    let next = gen.add(v, one).unwrap();
    gen.assign(v, next).unwrap();
    gen.deactivate().unwrap();
    assert_eq!(gen.literal_pool().len(), 3);

    // The second activation emits into a dropped buffer.
    gen.activate("bump").unwrap();
    let v = gen.lookup("v").unwrap();
    let big = gen.lit_f32(1234.5).unwrap();
    let scaled = gen.mul(v, big).unwrap();
    let tid = gen.thread_id_abs().unwrap();
    gen.store_raw(7, tid, scaled).unwrap();
    gen.deactivate().unwrap();

    assert_eq!(gen.literal_pool().len(), 3);
    assert!(gen.type_of(scaled).unwrap_err().is_contract_violation());

    let x = gen.variable(TypeDescriptor::F32).unwrap();
    gen.call("bump", &[x]).unwrap();
    let program = gen.end().unwrap();

    assert!(!program.header.contains("dcl_raw_uav_id"), "{}", program.header);
    let literals = program
        .header
        .lines()
        .filter(|line| line.starts_with("dcl_literal"))
        .count();
    assert_eq!(literals, 3, "{}", program.header);
    assert_eq!(count_mnemonic(&program.code, "uav_raw_store_id(7)"), 0);
    check_output_contains(&program.code, &["add r1.x, r0.x, l2.x", "mov r0.x, r1.x"]);
}
