// This module is the IL front end and emitter. Kernel code talks to SourceGenerator
// through an explicit builder API that returns node handles; nodes carry the emission
// rule selected for their exact operand types at construction, and statements trigger
// dependency-ordered emission into the main stream or into the active function body.

//! IL code generation.
//!
//! - `node`: node model, opcodes and handles
//! - `rules`: enumerable instruction-selection table
//! - `operand`: source/destination formatting
//! - `emit`: rule lowering to instruction text
//! - `control_flow`: structured blocks and branch conditions
//! - `function`: subroutines, bindings and activation
//! - `generator`: the compilation-unit owner and builder API

pub mod control_flow;
pub mod emit;
pub mod function;
pub mod generator;
pub mod node;
pub mod operand;
pub mod rules;

pub use control_flow::{Block, Condition, ControlStack};
pub use function::{Binding, BindingTable, Direction, FunctionRecord, FunctionTable, Param};
pub use generator::{GeneratorOptions, Program, SourceGenerator};
pub use node::{Address, Node, NodeId, NodeKind, Opcode, Relop};
pub use rules::{Lowering, Rule, RuleEntry, RuleKey, RuleTable};
