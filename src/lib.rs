//! ilgen - traced IL source generation for SIMD GPU compute kernels.
//!
//! Kernel code builds typed operation nodes through an explicit builder API.
//! The generator allocates virtual registers, interns literal constants,
//! selects an instruction sequence per operation and operand types, lowers
//! structured control flow and subroutines, and serializes the compilation
//! unit as header plus instruction text.
//!
//! # Primary Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use ilgen::il::SourceGenerator;
//! use ilgen::core::TypeDescriptor;
//!
//! let arena = Bump::new();
//! let mut gen = SourceGenerator::new(&arena);
//! gen.begin(None)?;
//! let x = gen.variable(TypeDescriptor::F32)?;
//! let one = gen.lit_f32(1.0)?;
//! let sum = gen.add(x, one)?;
//! gen.assign(x, sum)?;
//! let program = gen.end()?;
//! print!("{program}");
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Types, swizzles, literal pool, registers, session, errors
//! - [`il`] - Node model, rule table, emitter, control flow, subroutines
//! - [`driver`] - Device presets and the compiled-program cache
//! - [`kernels`] - Built-in demo kernels
//! - [`filecheck`] - FileCheck-style validation of generated text

pub mod core;
pub mod driver;
pub mod filecheck;
pub mod il;
pub mod kernels;

pub use core::{
    Capabilities, CodegenError, CodegenResult, CompilationSession, ElementKind, Generation,
    SessionStats, Swizzle, TypeDescriptor, WriteMask,
};
pub use driver::{Device, ProgramCache};
pub use il::{GeneratorOptions, NodeId, Opcode, Param, Program, SourceGenerator};
