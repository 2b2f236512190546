// This module holds the demo kernels shipped with the generator. Each kernel is a plain
// function over the builder API, registered in KERNELS with a name and a one-line
// description; generate() runs one inside a fresh compilation unit and returns the
// serialized program together with the unit statistics. They double as end-to-end
// fixtures: the CLI prints them and the FileCheck tests validate their text.

//! Demo kernels.

use crate::core::{Capabilities, CodegenResult, ElementKind, SessionStats, TypeDescriptor};
use crate::il::{GeneratorOptions, Param, Program, SourceGenerator};
use bumpalo::Bump;

/// Iteration cap of the mandelbrot kernel.
pub const MANDELBROT_MAX_ITER: i32 = 256;

/// `c0 + c1 x + c2 x^2 + c3 x^3`, lowest order first.
pub const POLY_COEFFS: [f32; 4] = [1.0, 2.0, -0.5, 0.125];

type BuildFn = fn(&mut SourceGenerator<'_>) -> CodegenResult<()>;

/// A named kernel builder.
pub struct Kernel {
    pub name: &'static str,
    pub description: &'static str,
    build: BuildFn,
}

impl Kernel {
    pub fn build(&self, gen: &mut SourceGenerator<'_>) -> CodegenResult<()> {
        (self.build)(gen)
    }
}

pub static KERNELS: [Kernel; 5] = [
    Kernel {
        name: "saxpy",
        description: "y = a * x + y over float4 buffers",
        build: saxpy,
    },
    Kernel {
        name: "mandelbrot",
        description: "escape-time iteration count per thread",
        build: mandelbrot,
    },
    Kernel {
        name: "rsqrt_f64",
        description: "double-precision reciprocal square root",
        build: rsqrt_f64,
    },
    Kernel {
        name: "poly_fn",
        description: "cubic polynomial subroutine called from two sites",
        build: poly_fn,
    },
    Kernel {
        name: "masked_merge",
        description: "write-mask merges into float4 and double2 registers",
        build: masked_merge,
    },
];

pub fn find(name: &str) -> Option<&'static Kernel> {
    KERNELS.iter().find(|k| k.name == name)
}

/// Output of one kernel generation.
#[derive(Debug, Clone)]
pub struct Generated {
    pub program: Program,
    pub stats: SessionStats,
}

/// Run `kernel` in a fresh compilation unit.
pub fn generate(
    kernel: &Kernel,
    capabilities: Option<Capabilities>,
    options: &GeneratorOptions,
) -> CodegenResult<Generated> {
    let arena = Bump::new();
    let mut gen = SourceGenerator::with_options(&arena, options.clone());
    gen.begin(capabilities)?;

    let result = kernel.build(&mut gen).and_then(|()| gen.end());
    match result {
        Ok(program) => {
            log::debug!("Generated kernel '{}'", kernel.name);
            Ok(Generated {
                program,
                stats: gen.stats(),
            })
        }
        Err(err) => {
            gen.abort();
            Err(err)
        }
    }
}

fn float4() -> CodegenResult<TypeDescriptor> {
    TypeDescriptor::new(ElementKind::F32, 4)
}

fn saxpy(gen: &mut SourceGenerator<'_>) -> CodegenResult<()> {
    let f4 = float4()?;
    let tid = gen.thread_id_abs()?;
    let stride = gen.lit_u32(16)?;
    let addr = gen.mul(tid, stride)?;

    let a = gen.constant(0, 0, f4)?;
    let x = gen.load_raw(0, addr, f4)?;
    let y = gen.load_raw(1, addr, f4)?;
    let result = gen.mad(a, x, y)?;
    gen.store_raw(1, addr, result)
}

fn mandelbrot(gen: &mut SourceGenerator<'_>) -> CodegenResult<()> {
    let tid = gen.thread_id_abs()?;
    let stride = gen.lit_u32(4)?;
    let addr = gen.mul(tid, stride)?;
    let addr = gen.variable_init(addr)?;

    let load = gen.load_raw(0, addr, TypeDescriptor::F32)?;
    let cx = gen.variable_init(load)?;
    let load = gen.load_raw(1, addr, TypeDescriptor::F32)?;
    let cy = gen.variable_init(load)?;

    let zero = gen.lit_f32(0.0)?;
    let zx = gen.variable_init(zero)?;
    let zy = gen.variable_init(zero)?;
    let start = gen.lit_i32(0)?;
    let iter = gen.variable_init(start)?;

    let max_iter = gen.lit_i32(MANDELBROT_MAX_ITER)?;
    let escape = gen.lit_f32(4.0)?;
    let two = gen.lit_f32(2.0)?;
    let one = gen.lit_i32(1)?;

    gen.loop_do(|g| {
        let x2 = g.mul(zx, zx)?;
        let y2 = g.mul(zy, zy)?;
        let magnitude = g.add(x2, y2)?;
        let escaped = g.gt(magnitude, escape)?;
        g.break_if(escaped)?;

        let done = g.ge(iter, max_iter)?;
        g.break_if(done)?;

        let diff = g.sub(x2, y2)?;
        let real = g.add(diff, cx)?;
        let next_x = g.variable_init(real)?;

        let twice = g.mul(two, zx)?;
        let imag = g.mad(twice, zy, cy)?;
        g.assign(zy, imag)?;
        g.assign(zx, next_x)?;

        let next_iter = g.add(iter, one)?;
        g.assign(iter, next_iter)
    })?;

    gen.store_raw(2, addr, iter)
}

fn rsqrt_f64(gen: &mut SourceGenerator<'_>) -> CodegenResult<()> {
    let tid = gen.thread_id_abs()?;
    let stride = gen.lit_u32(8)?;
    let addr = gen.mul(tid, stride)?;

    let x = gen.load_raw(0, addr, TypeDescriptor::F64)?;
    let result = gen.rsqrt(x)?;
    gen.store_raw(1, addr, result)
}

fn poly_fn(gen: &mut SourceGenerator<'_>) -> CodegenResult<()> {
    let f4 = float4()?;
    let params = [Param::input("x", f4), Param::output("y", f4)];
    gen.define_function("poly", &params, |g| {
        let x = g.lookup("x")?;
        let y = g.lookup("y")?;
        let [c0, c1, c2, c3] = POLY_COEFFS;
        let c3 = g.lit_f32x4([c3; 4])?;
        let c2 = g.lit_f32x4([c2; 4])?;
        let c1 = g.lit_f32x4([c1; 4])?;
        let c0 = g.lit_f32x4([c0; 4])?;
        let acc = g.mad(c3, x, c2)?;
        let acc = g.mad(acc, x, c1)?;
        let acc = g.mad(acc, x, c0)?;
        g.assign(y, acc)
    })?;

    let tid = gen.thread_id_abs()?;
    let stride = gen.lit_u32(16)?;
    let addr = gen.mul(tid, stride)?;
    let addr = gen.variable_init(addr)?;

    let a = gen.load_raw(0, addr, f4)?;
    let b = gen.load_raw(1, addr, f4)?;
    let pa = gen.variable(f4)?;
    let pb = gen.variable(f4)?;
    gen.call("poly", &[a, pa])?;
    gen.call("poly", &[b, pb])?;

    let sum = gen.add(pa, pb)?;
    gen.store_raw(2, addr, sum)
}

fn masked_merge(gen: &mut SourceGenerator<'_>) -> CodegenResult<()> {
    let f4 = float4()?;
    let f2 = TypeDescriptor::new(ElementKind::F32, 2)?;
    let d2 = TypeDescriptor::new(ElementKind::F64, 2)?;

    let tid = gen.thread_id_abs()?;
    let wide = gen.lit_u32(16)?;
    let narrow = gen.lit_u32(8)?;
    let wide = gen.mul(tid, wide)?;
    let addr16 = gen.variable_init(wide)?;
    let narrow = gen.mul(tid, narrow)?;
    let addr8 = gen.variable_init(narrow)?;

    let load = gen.load_raw(0, addr16, f4)?;
    let v = gen.variable_init(load)?;
    let pair = gen.load_raw(1, addr8, f2)?;
    gen.assign_lanes(v, "yw", pair)?;

    let load = gen.load_raw(2, addr16, d2)?;
    let d = gen.variable_init(load)?;
    let scalar = gen.load_raw(3, addr8, TypeDescriptor::F64)?;
    gen.assign_lanes(d, "y", scalar)?;

    gen.store_raw(0, addr16, v)?;
    gen.store_raw(2, addr16, d)
}
