// This module is the hub for the generator's leaf infrastructure, shared by the node
// model, the emitter and the driver layer: value type descriptors, the swizzle engine,
// the literal pool, the monotonic register file, the arena-backed compilation session
// with its statistics, the capability snapshot and the error taxonomy. None of these
// components emit text on their own; they are owned and sequenced by the
// SourceGenerator in the il module.

//! Core code generator infrastructure.
//!
//! # Key Components
//!
//! ## Types (`types`)
//! - Element kind and lane count, storage words per value
//!
//! ## Swizzle Engine (`swizzle`)
//! - Read swizzles and write masks over logical lanes
//! - Logical lane to physical component mapping (float64 lanes span two words)
//!
//! ## Literal Pool (`literal_pool`)
//! - Bit-exact interning of 4-word constants, seeded with all-zero / all-one
//!
//! ## Register File (`register_file`)
//! - Monotonic identifiers with contiguous scratch reservation
//!
//! ## Session Management (`session`)
//! - Arena allocation using `bumpalo`
//! - Per-unit statistics

pub mod capabilities;
pub mod error;
pub mod literal_pool;
pub mod register_file;
pub mod session;
pub mod swizzle;
pub mod types;

pub use capabilities::{Capabilities, Generation};

pub use error::{CodegenError, CodegenResult};

pub use literal_pool::{LiteralBits, LiteralIdx, LiteralPool};

pub use register_file::{RegisterFile, RegisterId, RegisterOwner};

pub use session::{CompilationSession, SessionStats};

pub use swizzle::{match_input_to_output, Component, Selector, Swizzle, WriteMask};

pub use types::{ElementKind, TypeDescriptor};
