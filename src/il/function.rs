// This module implements subroutines. A FunctionRecord is created lazily by name on
// first reference, receives the next numeric id and one formal Variable per parameter.
// Kernel code reaches values through the BindingTable (logical name -> node); activating
// a function applies its pending bindings (parameter name -> formal) while saving the
// caller's prior entries, and redirects every emitted line into the record's private
// body buffer. Deactivation pops the activation, restores the saved bindings in reverse
// order and marks the body defined. A body is recorded once: later activations of a
// defined function apply and undo bindings normally but their emitted lines are
// discarded, together with the nodes, literals and resource declarations created while
// they ran. Activations do not nest. Call sites copy in/inout arguments into the
// formals, emit `call id`, and copy out/inout formals back into argument Variables.

//! Function table, binding table and activation stack.

use super::generator::{Checkpoint, SourceGenerator};
use super::node::NodeId;
use crate::core::types::describe_types;
use crate::core::{CodegenError, CodegenResult, RegisterId, RegisterOwner, TypeDescriptor};
use hashbrown::HashMap;

/// Parameter passing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn reads(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub fn writes(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// Formal parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeDescriptor,
    pub direction: Direction,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor, direction: Direction) -> Self {
        Self {
            name: name.into(),
            ty,
            direction,
        }
    }

    pub fn input(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, ty, Direction::In)
    }

    pub fn output(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, ty, Direction::Out)
    }

    pub fn inout(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, ty, Direction::InOut)
    }
}

/// What a logical name currently stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub node: NodeId,
    pub reg: Option<RegisterId>,
}

/// Logical name to substituted node.
#[derive(Debug, Default)]
pub struct BindingTable {
    entries: HashMap<String, Binding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, returning the binding it replaces.
    pub fn bind(&mut self, name: &str, binding: Binding) -> Option<Binding> {
        self.entries.insert(name.to_string(), binding)
    }

    /// Put back a saved binding (or remove the name when there was none).
    pub fn restore(&mut self, name: &str, prior: Option<Binding>) {
        match prior {
            Some(binding) => {
                self.entries.insert(name.to_string(), binding);
            }
            None => {
                self.entries.remove(name);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.entries.get(name).copied()
    }

    pub fn register(&self, name: &str) -> Option<RegisterId> {
        self.lookup(name).and_then(|b| b.reg)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted copy of the table, for before/after comparisons.
    pub fn snapshot(&self) -> Vec<(String, Binding)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(name, binding)| (name.clone(), *binding))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One named subroutine.
#[derive(Debug)]
pub struct FunctionRecord {
    pub id: u32,
    pub name: String,
    pub params: Vec<Param>,
    /// Formal Variable per parameter, in declaration order.
    pub formals: Vec<NodeId>,
    formal_regs: Vec<Option<RegisterId>>,
    body: Vec<String>,
    defined: bool,
    called: bool,
    activations: usize,
}

impl FunctionRecord {
    pub fn body(&self) -> &[String] {
        &self.body
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn is_called(&self) -> bool {
        self.called
    }

    pub fn activations(&self) -> usize {
        self.activations
    }

    /// Binding changes applied on activation.
    pub fn pending_bindings(&self) -> Vec<(String, Binding)> {
        self.params
            .iter()
            .zip(self.formals.iter().zip(&self.formal_regs))
            .map(|(param, (node, reg))| {
                (
                    param.name.clone(),
                    Binding {
                        node: *node,
                        reg: *reg,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug)]
struct Activation {
    record: usize,
    /// Prior bindings, applied in reverse on deactivation.
    undo: Vec<(String, Option<Binding>)>,
    /// Set while re-activating an already defined body.
    replay: Option<Replay>,
}

/// Output of a replayed activation, dropped on deactivation.
#[derive(Debug)]
struct Replay {
    lines: Vec<String>,
    checkpoint: Checkpoint,
}

/// Records by name plus the activation stack.
#[derive(Debug, Default)]
pub struct FunctionTable {
    records: Vec<FunctionRecord>,
    by_name: HashMap<String, usize>,
    stack: Vec<Activation>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FunctionRecord> {
        self.by_name.get(name).map(|&index| &self.records[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Name of the function whose body currently receives emitted lines.
    pub fn active(&self) -> Option<&str> {
        self.stack
            .last()
            .map(|activation| self.records[activation.record].name.as_str())
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Stream that receives emitted lines, `None` for the main stream.
    pub(crate) fn active_stream(&mut self) -> Option<&mut Vec<String>> {
        let activation = self.stack.last_mut()?;
        match activation.replay.as_mut() {
            Some(replay) => Some(&mut replay.lines),
            None => Some(&mut self.records[activation.record].body),
        }
    }

    /// Functions with an emitted body, in id order.
    pub fn defined(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.records.iter().filter(|r| r.defined)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_name.clear();
        self.stack.clear();
    }
}

impl<'arena> SourceGenerator<'arena> {
    /// Declare (or look up) a function, returning its id.
    pub fn function(&mut self, name: &str, params: &[Param]) -> CodegenResult<u32> {
        self.check_active("function")?;
        if let Some(record) = self.functions.get(name) {
            if record.params != params {
                return Err(CodegenError::contract(format!(
                    "function '{name}' redeclared with a different signature"
                )));
            }
            return Ok(record.id);
        }

        let mut formals = Vec::with_capacity(params.len());
        let mut formal_regs = Vec::with_capacity(params.len());
        for param in params {
            let formal = self.new_variable(param.ty, RegisterOwner::Formal)?;
            formal_regs.push(self.register_of(formal)?);
            formals.push(formal);
        }

        let table = &mut self.functions;
        let id = table.records.len() as u32 + 1;
        table.by_name.insert(name.to_string(), table.records.len());
        table.records.push(FunctionRecord {
            id,
            name: name.to_string(),
            params: params.to_vec(),
            formals,
            formal_regs,
            body: Vec::new(),
            defined: false,
            called: false,
            activations: 0,
        });
        log::debug!("Declared function '{}' as func {}", name, id);
        Ok(id)
    }

    /// Redirect emission into `name`'s body and apply its bindings.
    pub fn activate(&mut self, name: &str) -> CodegenResult<()> {
        self.check_active("activate")?;
        if let Some(open) = self.functions.active() {
            return Err(CodegenError::contract(format!(
                "cannot activate '{name}' while '{open}' is active"
            )));
        }
        let index = *self
            .functions
            .by_name
            .get(name)
            .ok_or_else(|| CodegenError::contract(format!("activate of unregistered function '{name}'")))?;

        let record = &mut self.functions.records[index];
        record.activations += 1;
        let replay = record.defined;
        let mut undo = Vec::new();
        for (param, binding) in record.pending_bindings() {
            let prior = self.bindings.bind(&param, binding);
            undo.push((param, prior));
        }

        let replay_state = replay.then(|| Replay {
            lines: Vec::new(),
            checkpoint: self.checkpoint(),
        });
        self.functions.stack.push(Activation {
            record: index,
            undo,
            replay: replay_state,
        });
        self.control.push_floor();
        log::debug!("Activated function '{}' (replay: {})", name, replay);
        Ok(())
    }

    /// Leave the active function, restoring the caller's bindings.
    pub fn deactivate(&mut self) -> CodegenResult<()> {
        self.check_active("deactivate")?;
        if self.functions.stack.is_empty() {
            return Err(CodegenError::contract("deactivate with an empty activation stack"));
        }
        self.control.pop_floor()?;
        let Some(activation) = self.functions.stack.pop() else {
            return Err(CodegenError::contract("deactivate with an empty activation stack"));
        };
        for (name, prior) in activation.undo.into_iter().rev() {
            self.bindings.restore(&name, prior);
        }

        if let Some(replay) = activation.replay {
            if !replay.lines.is_empty() {
                log::debug!(
                    "Dropped {} lines re-emitted into defined function '{}'",
                    replay.lines.len(),
                    self.functions.records[activation.record].name
                );
            }
            // Literals and resources only the dropped lines used must not reach the header.
            self.rollback(replay.checkpoint);
        }
        let record = &mut self.functions.records[activation.record];
        record.defined = true;
        log::debug!("Deactivated function '{}'", record.name);
        Ok(())
    }

    /// Declare, activate, emit the body once, deactivate.
    pub fn define_function<F>(&mut self, name: &str, params: &[Param], body: F) -> CodegenResult<u32>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        let id = self.function(name, params)?;
        let defined = self.functions.get(name).is_some_and(|r| r.is_defined());
        self.activate(name)?;
        if !defined {
            body(self)?;
        }
        self.deactivate()?;
        Ok(id)
    }

    /// Bind a logical name to a node.
    pub fn bind(&mut self, name: &str, node: NodeId) -> CodegenResult<()> {
        let reg = self.register_of(node)?;
        self.bindings.bind(name, Binding { node, reg });
        Ok(())
    }

    /// Node currently bound to `name`.
    pub fn lookup(&self, name: &str) -> CodegenResult<NodeId> {
        self.bindings
            .lookup(name)
            .map(|b| b.node)
            .ok_or_else(|| CodegenError::contract(format!("'{name}' is not bound")))
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Emit a call of `name` with `args` in parameter order.
    pub fn call(&mut self, name: &str, args: &[NodeId]) -> CodegenResult<()> {
        self.check_active("call")?;
        let record = self
            .functions
            .get(name)
            .ok_or_else(|| CodegenError::contract(format!("call of unregistered function '{name}'")))?;
        if record.params.len() != args.len() {
            return Err(CodegenError::contract(format!(
                "'{name}' takes {} arguments, {} given",
                record.params.len(),
                args.len()
            )));
        }
        let id = record.id;
        let params = record.params.clone();
        let formals = record.formals.clone();

        let arg_types = args
            .iter()
            .map(|&arg| self.type_of(arg))
            .collect::<CodegenResult<Vec<_>>>()?;
        let param_types: Vec<_> = params.iter().map(|p| p.ty).collect();
        if arg_types != param_types {
            return Err(CodegenError::type_mismatch(
                format!("call {name}({})", describe_types(&param_types)),
                describe_types(&arg_types),
            ));
        }
        for (param, &arg) in params.iter().zip(args) {
            if param.direction.writes() && !self.node(arg)?.is_variable() {
                return Err(CodegenError::contract(format!(
                    "argument for '{}' of '{name}' must be a variable",
                    param.name
                )));
            }
        }

        for ((param, &arg), &formal) in params.iter().zip(args).zip(&formals) {
            if param.direction.reads() {
                self.copy_value(formal, arg)?;
            }
        }
        self.push_line(format!("call {id}"));
        for ((param, &arg), &formal) in params.iter().zip(args).zip(&formals) {
            if param.direction.writes() {
                self.copy_value(arg, formal)?;
            }
        }

        if let Some(&index) = self.functions.by_name.get(name) {
            self.functions.records[index].called = true;
        }
        Ok(())
    }

    pub(super) fn check_functions_complete(&self) -> CodegenResult<()> {
        if let Some(open) = self.functions.active() {
            return Err(CodegenError::contract(format!(
                "function '{open}' still active at end of unit"
            )));
        }
        if let Some(record) = self.functions.iter().find(|r| r.called && !r.defined) {
            return Err(CodegenError::contract(format!(
                "function '{}' called but never defined",
                record.name
            )));
        }
        Ok(())
    }
}
