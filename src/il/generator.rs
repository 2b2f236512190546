// This module contains SourceGenerator, the composition root of the code generator. It
// owns the node table, the register file, the literal pool, the rule table, the function
// and binding tables, the control-flow stack, the main instruction stream and the
// resource declarations of one compilation unit at a time. Node construction is eager:
// it validates handles, resolves the emission rule for the exact operand types (failing
// with TypeMismatch when none exists) and reserves the result register plus the rule's
// scratch registers immediately. Emission is deferred to statements (assign, masked
// assign, raw store, branch conditions, call arguments), which walk the operand tree
// post-order and append text to the main stream or to the active function's body.
// begin() resets every table and snapshots the target capabilities; end() checks that
// blocks and activations are balanced and serializes header and code.

//! The source generator and its builder API.

use super::control_flow::ControlStack;
use super::emit::{self, Lowered};
use super::function::{BindingTable, FunctionTable};
use super::node::{Address, Node, NodeId, NodeKind, Opcode};
use super::operand::{Base, Dest, Source};
use super::rules::{Rule, RuleTable};
use crate::core::literal_pool::{splat32, splat64};
use crate::core::types::describe_types;
use crate::core::{
    match_input_to_output, Capabilities, CodegenError, CodegenResult, CompilationSession,
    Component, ElementKind, LiteralBits, LiteralIdx, LiteralPool, RegisterFile, RegisterId,
    RegisterOwner, SessionStats, Swizzle, TypeDescriptor, WriteMask,
};
use bumpalo::Bump;
use hashbrown::HashSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;

/// Generator-wide settings that do not come from the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// Threads per group; the wavefront width when unset.
    pub threads_per_group: Option<u32>,
}

/// Serialized compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub header: String,
    pub code: String,
}

impl Program {
    /// Header followed by code, as handed to the driver compiler.
    pub fn text(&self) -> String {
        format!("{}{}", self.header, self.code)
    }
}

/// Table sizes and resource declarations at the start of a replayed activation.
#[derive(Debug)]
pub(super) struct Checkpoint {
    nodes: u32,
    literals: usize,
    constant_buffers: BTreeMap<u32, u32>,
    uavs: BTreeSet<u32>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header)?;
        f.write_str(&self.code)
    }
}

pub struct SourceGenerator<'arena> {
    session: CompilationSession<'arena>,
    rules: RuleTable,
    options: GeneratorOptions,
    capabilities: Capabilities,

    /// Incremented by every begin; stamped into handles.
    unit: u32,
    active: bool,

    nodes: Vec<Node<'arena>>,
    /// Node indices built by replayed activations; their handles are dead.
    discarded_nodes: Vec<Range<u32>>,
    registers: RegisterFile,
    literals: LiteralPool,

    pub(super) functions: FunctionTable,
    pub(super) bindings: BindingTable,
    pub(super) control: ControlStack,

    main: Vec<String>,
    constant_buffers: BTreeMap<u32, u32>,
    uavs: BTreeSet<u32>,
}

macro_rules! unary_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&mut self, a: NodeId) -> CodegenResult<NodeId> {
                self.unary(Opcode::$op, a)
            }
        )*
    };
}

macro_rules! binary_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&mut self, a: NodeId, b: NodeId) -> CodegenResult<NodeId> {
                self.binary(Opcode::$op, a, b)
            }
        )*
    };
}

impl<'arena> SourceGenerator<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self::with_options(arena, GeneratorOptions::default())
    }

    pub fn with_options(arena: &'arena Bump, options: GeneratorOptions) -> Self {
        Self {
            session: CompilationSession::new(arena),
            rules: RuleTable::new(),
            options,
            capabilities: Capabilities::portable(),
            unit: 0,
            active: false,
            nodes: Vec::new(),
            discarded_nodes: Vec::new(),
            registers: RegisterFile::new(),
            literals: LiteralPool::new(),
            functions: FunctionTable::new(),
            bindings: BindingTable::new(),
            control: ControlStack::new(),
            main: Vec::new(),
            constant_buffers: BTreeMap::new(),
            uavs: BTreeSet::new(),
        }
    }

    // ---- Lifecycle ----

    /// Start a compilation unit, clearing every table.
    pub fn begin(&mut self, capabilities: Option<Capabilities>) -> CodegenResult<()> {
        if self.active {
            return Err(CodegenError::contract(
                "begin while another compilation unit is active",
            ));
        }
        self.reset();
        self.capabilities = capabilities.unwrap_or_default();
        self.active = true;
        log::debug!(
            "Begin compilation unit {} ({}, native double: {})",
            self.unit,
            self.capabilities.generation,
            self.capabilities.native_double
        );
        Ok(())
    }

    /// Abandon the current unit after a failure.
    pub fn abort(&mut self) {
        if self.active {
            log::warn!(
                "Abandoning compilation unit {} after {} nodes",
                self.unit,
                self.nodes.len()
            );
        }
        self.reset();
        self.active = false;
    }

    fn reset(&mut self) {
        self.unit += 1;
        self.nodes.clear();
        self.discarded_nodes.clear();
        self.registers.reset();
        self.literals.reset();
        self.functions.clear();
        self.bindings.clear();
        self.control.reset();
        self.main.clear();
        self.constant_buffers.clear();
        self.uavs.clear();
        self.session.reset_stats();
    }

    /// Finish the unit and serialize it.
    pub fn end(&mut self) -> CodegenResult<Program> {
        self.check_active("end")?;
        self.check_functions_complete()?;
        self.control.check_balanced()?;

        let header = self.emit_header();
        let code = self.emit_code();

        self.session.set_literal_count(self.literals.len());
        for record in self.functions.defined() {
            self.session
                .record_function_emitted(&record.name, record.body().len());
        }
        self.active = false;
        log::debug!(
            "End compilation unit {}: {} registers, {} literals, {} functions",
            self.unit,
            self.registers.issued(),
            self.literals.len(),
            self.functions.defined().count()
        );
        Ok(Program { header, code })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(super) fn check_active(&self, what: &str) -> CodegenResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(CodegenError::contract(format!(
                "{what} outside an active compilation unit"
            )))
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn literal_pool(&self) -> &LiteralPool {
        &self.literals
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn threads_per_group(&self) -> u32 {
        self.options
            .threads_per_group
            .unwrap_or(self.capabilities.wavefront_width)
    }

    // ---- Node table ----

    pub fn node(&self, id: NodeId) -> CodegenResult<&Node<'arena>> {
        if id.unit != self.unit {
            return Err(CodegenError::contract(format!(
                "node handle {} from compilation unit {} used in unit {}",
                id.index, id.unit, self.unit
            )));
        }
        if self.discarded_nodes.iter().any(|range| range.contains(&id.index)) {
            return Err(CodegenError::contract(format!(
                "node handle {} was built while replaying a defined function",
                id.index
            )));
        }
        self.nodes.get(id.index as usize).ok_or_else(|| {
            CodegenError::contract(format!("node handle {} out of range", id.index))
        })
    }

    pub(super) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.len() as u32,
            literals: self.literals.len(),
            constant_buffers: self.constant_buffers.clone(),
            uavs: self.uavs.clone(),
        }
    }

    /// Forget the nodes, literals and resources created since `checkpoint`.
    ///
    /// New pool entries can only be referenced by nodes built after the
    /// checkpoint, and those handles die here too.
    pub(super) fn rollback(&mut self, checkpoint: Checkpoint) {
        let end = self.nodes.len() as u32;
        if end > checkpoint.nodes {
            self.discarded_nodes.push(checkpoint.nodes..end);
        }
        let dropped = self.literals.len().saturating_sub(checkpoint.literals);
        self.literals.truncate(checkpoint.literals);
        self.constant_buffers = checkpoint.constant_buffers;
        self.uavs = checkpoint.uavs;
        log::trace!(
            "Rolled back {} nodes and {} literals",
            end.saturating_sub(checkpoint.nodes),
            dropped
        );
    }

    pub fn type_of(&self, id: NodeId) -> CodegenResult<TypeDescriptor> {
        Ok(self.node(id)?.ty)
    }

    /// Register holding the node's value, absent for literals and named aliases.
    pub fn register_of(&self, id: NodeId) -> CodegenResult<Option<RegisterId>> {
        Ok(self.node(id)?.reg)
    }

    pub fn literal_index(&self, id: NodeId) -> CodegenResult<LiteralIdx> {
        match self.node(id)?.kind {
            NodeKind::Literal(idx) => Ok(idx),
            _ => Err(CodegenError::contract(format!(
                "node {} is not a literal",
                id.index
            ))),
        }
    }

    fn push_node(&mut self, node: Node<'arena>) -> NodeId {
        let id = NodeId {
            index: self.nodes.len() as u32,
            unit: self.unit,
        };
        self.nodes.push(node);
        self.session.record_node();
        id
    }

    fn leaf(&mut self, kind: NodeKind<'arena>, ty: TypeDescriptor, reg: Option<RegisterId>) -> NodeId {
        self.push_node(Node {
            kind,
            ty,
            reg,
            rule: None,
            components: &[],
            constants: &[],
        })
    }

    /// Reserve registers, intern the rule's constants and record the node.
    fn build(
        &mut self,
        kind: NodeKind<'arena>,
        rule: Option<Rule>,
        ty: TypeDescriptor,
        components: &[Component],
    ) -> NodeId {
        let scratch = rule.map_or(0, |r| r.scratch);
        let reg = self.registers.reserve(RegisterOwner::Node, scratch);
        self.session.record_registers(1 + scratch);

        let constants: Vec<LiteralIdx> = rule
            .map(|r| r.lowering.constants())
            .unwrap_or_default()
            .into_iter()
            .map(|bits| self.literals.intern(bits))
            .collect();

        let node = Node {
            kind,
            ty,
            reg: Some(reg),
            rule,
            components: self.session.alloc_slice(components),
            constants: self.session.alloc_slice(&constants),
        };
        self.push_node(node)
    }

    // ---- Leaves ----

    /// Literal of type `ty` holding `bits`.
    pub fn literal(&mut self, bits: LiteralBits, ty: TypeDescriptor) -> CodegenResult<NodeId> {
        self.check_active("literal")?;
        let idx = self.literals.intern(bits);
        Ok(self.leaf(NodeKind::Literal(idx), ty, None))
    }

    pub fn lit_f32(&mut self, value: f32) -> CodegenResult<NodeId> {
        self.literal(splat32(value.to_bits()), TypeDescriptor::F32)
    }

    pub fn lit_i32(&mut self, value: i32) -> CodegenResult<NodeId> {
        self.literal(splat32(value as u32), TypeDescriptor::I32)
    }

    pub fn lit_u32(&mut self, value: u32) -> CodegenResult<NodeId> {
        self.literal(splat32(value), TypeDescriptor::U32)
    }

    pub fn lit_f64(&mut self, value: f64) -> CodegenResult<NodeId> {
        self.literal(splat64(value), TypeDescriptor::F64)
    }

    pub fn lit_f32x4(&mut self, values: [f32; 4]) -> CodegenResult<NodeId> {
        let ty = TypeDescriptor::new(ElementKind::F32, 4)?;
        self.literal(values.map(f32::to_bits), ty)
    }

    pub fn lit_i32x4(&mut self, values: [i32; 4]) -> CodegenResult<NodeId> {
        let ty = TypeDescriptor::new(ElementKind::I32, 4)?;
        self.literal(values.map(|v| v as u32), ty)
    }

    pub fn lit_f64x2(&mut self, values: [f64; 2]) -> CodegenResult<NodeId> {
        let ty = TypeDescriptor::new(ElementKind::F64, 2)?;
        let [lo0, hi0, ..] = splat64(values[0]);
        let [lo1, hi1, ..] = splat64(values[1]);
        self.literal([lo0, hi0, lo1, hi1], ty)
    }

    /// Fresh persistent variable.
    pub fn variable(&mut self, ty: TypeDescriptor) -> CodegenResult<NodeId> {
        self.new_variable(ty, RegisterOwner::Variable)
    }

    pub(super) fn new_variable(
        &mut self,
        ty: TypeDescriptor,
        owner: RegisterOwner,
    ) -> CodegenResult<NodeId> {
        self.check_active("variable")?;
        let reg = self.registers.allocate(owner);
        self.session.record_registers(1);
        Ok(self.leaf(NodeKind::Variable, ty, Some(reg)))
    }

    /// Variable initialized from `value`.
    pub fn variable_init(&mut self, value: NodeId) -> CodegenResult<NodeId> {
        let ty = self.type_of(value)?;
        let var = self.variable(ty)?;
        self.assign(var, value)?;
        Ok(var)
    }

    /// Pre-existing machine alias; never allocates.
    pub fn named(&mut self, name: &str, ty: TypeDescriptor) -> CodegenResult<NodeId> {
        self.check_active("named variable")?;
        let name = self.session.intern_str(name);
        Ok(self.leaf(NodeKind::NamedVariable(name), ty, None))
    }

    /// Flat absolute thread id.
    pub fn thread_id_abs(&mut self) -> CodegenResult<NodeId> {
        self.named("vAbsTidFlat", TypeDescriptor::U32)
    }

    /// Flat thread id within the group.
    pub fn thread_id_local(&mut self) -> CodegenResult<NodeId> {
        self.named("vTidInGrpFlat", TypeDescriptor::U32)
    }

    pub fn group_id(&mut self) -> CodegenResult<NodeId> {
        self.named("vThreadGrpIdFlat", TypeDescriptor::U32)
    }

    /// Constant-buffer field `cbN[index]`.
    pub fn constant(&mut self, buffer: u32, index: u32, ty: TypeDescriptor) -> CodegenResult<NodeId> {
        let id = self.named(&format!("cb{buffer}[{index}]"), ty)?;
        self.declare_constant_buffer(buffer, index + 1);
        Ok(id)
    }

    /// Grow the declared size of constant buffer `buffer` to at least `size`.
    pub fn declare_constant_buffer(&mut self, buffer: u32, size: u32) {
        let declared = self.constant_buffers.entry(buffer).or_insert(0);
        *declared = (*declared).max(size);
    }

    fn check_index(&self, operation: &str, index: NodeId) -> CodegenResult<()> {
        let ty = self.type_of(index)?;
        if ty == TypeDescriptor::I32 || ty == TypeDescriptor::U32 {
            Ok(())
        } else {
            Err(CodegenError::type_mismatch(operation, ty.to_string()))
        }
    }

    /// Read `cbN[index + offset]`.
    ///
    /// The index is only known at run time, so the buffer's size must already
    /// be declared with [`declare_constant_buffer`](Self::declare_constant_buffer)
    /// and must cover `offset`.
    pub fn load_constant(
        &mut self,
        buffer: u32,
        index: NodeId,
        offset: u32,
        ty: TypeDescriptor,
    ) -> CodegenResult<NodeId> {
        self.check_active("constant buffer load")?;
        self.check_index("constant buffer load", index)?;
        match self.constant_buffers.get(&buffer) {
            Some(&size) if offset < size => {}
            Some(&size) => {
                return Err(CodegenError::contract(format!(
                    "indexed read of cb{buffer} at offset {offset} past its declared size {size}"
                )));
            }
            None => {
                return Err(CodegenError::contract(format!(
                    "indexed read of cb{buffer} before its size is declared"
                )));
            }
        }
        let kind = NodeKind::RegisterAddress(Address::ConstantBuffer { buffer, offset }, index);
        Ok(self.build(kind, None, ty, &[]))
    }

    /// Raw load of `ty` from UAV `uav` at byte address `address`.
    pub fn load_raw(&mut self, uav: u32, address: NodeId, ty: TypeDescriptor) -> CodegenResult<NodeId> {
        self.check_active("raw load")?;
        self.check_index("raw load", address)?;
        self.uavs.insert(uav);
        let kind = NodeKind::RegisterAddress(Address::RawUav { id: uav }, address);
        Ok(self.build(kind, None, ty, &[]))
    }

    // ---- Operations ----

    fn construct(&mut self, op: Opcode, operands: &[NodeId]) -> CodegenResult<NodeId> {
        self.check_active(&op.name())?;
        if op == Opcode::Swizzle {
            return Err(CodegenError::contract("swizzle nodes are built with swizzle()"));
        }
        let types = operands
            .iter()
            .map(|&id| self.type_of(id))
            .collect::<CodegenResult<Vec<_>>>()?;
        let rule = self.rules.resolve(op, &types, &self.capabilities)?;
        let kind = match *operands {
            [a] => NodeKind::Unary(op, a),
            [a, b] => NodeKind::Binary(op, a, b),
            [a, b, c] => NodeKind::Ternary(op, a, b, c),
            _ => return Err(CodegenError::type_mismatch(op.name(), describe_types(&types))),
        };
        Ok(self.build(kind, Some(rule), rule.result, &[]))
    }

    pub fn unary(&mut self, op: Opcode, a: NodeId) -> CodegenResult<NodeId> {
        self.construct(op, &[a])
    }

    pub fn binary(&mut self, op: Opcode, a: NodeId, b: NodeId) -> CodegenResult<NodeId> {
        self.construct(op, &[a, b])
    }

    pub fn ternary(&mut self, op: Opcode, a: NodeId, b: NodeId, c: NodeId) -> CodegenResult<NodeId> {
        self.construct(op, &[a, b, c])
    }

    unary_ops! {
        neg => Neg,
        abs => Abs,
        not => Not,
        sqrt => Sqrt,
        rsqrt => Rsqrt,
        floor => Floor,
        fract => Fract,
    }

    binary_ops! {
        add => Add,
        sub => Sub,
        mul => Mul,
        div => Div,
        /// Integer remainder.
        rem => Mod,
        min => Min,
        max => Max,
        and => And,
        or => Or,
        xor => Xor,
        shl => Shl,
        shr => Shr,
        eq => Eq,
        ne => Ne,
        lt => Lt,
        le => Le,
        gt => Gt,
        ge => Ge,
    }

    /// `a * b + c`.
    pub fn mad(&mut self, a: NodeId, b: NodeId, c: NodeId) -> CodegenResult<NodeId> {
        self.ternary(Opcode::Mad, a, b, c)
    }

    /// Per lane `cond ? a : b`.
    pub fn select(&mut self, cond: NodeId, a: NodeId, b: NodeId) -> CodegenResult<NodeId> {
        self.ternary(Opcode::Select, cond, a, b)
    }

    pub fn convert(&mut self, a: NodeId, kind: ElementKind) -> CodegenResult<NodeId> {
        self.unary(Opcode::Convert(kind), a)
    }

    /// Read `a` through a lane swizzle such as `"yx"` or `".xxxx"`.
    pub fn swizzle(&mut self, a: NodeId, text: &str) -> CodegenResult<NodeId> {
        self.check_active("swizzle")?;
        let ty = self.type_of(a)?;
        let swizzle = Swizzle::parse(text, ty)?;
        let result = swizzle.result_type(ty)?;
        let rule = self.rules.resolve(Opcode::Swizzle, &[ty], &self.capabilities)?;
        let rule = Rule { result, ..rule };
        let components = swizzle.physical(ty.kind());
        Ok(self.build(
            NodeKind::Unary(Opcode::Swizzle, a),
            Some(rule),
            result,
            &components,
        ))
    }

    // ---- Emission ----

    pub(super) fn source_of(&self, id: NodeId) -> CodegenResult<Source<'arena>> {
        let node = self.node(id)?;
        let base = match node.kind {
            NodeKind::Literal(idx) => Base::Literal(idx),
            NodeKind::NamedVariable(name) => Base::Named(name),
            _ => Base::Register(node.reg.ok_or_else(|| {
                CodegenError::contract(format!("node {} has no register", id.index))
            })?),
        };
        Ok(Source::new(base, node.ty))
    }

    /// Emit `id` and its operands, each at most once per statement.
    pub(super) fn emit_tree(
        &mut self,
        id: NodeId,
        visited: &mut HashSet<NodeId>,
    ) -> CodegenResult<()> {
        let node = *self.node(id)?;
        if matches!(
            node.kind,
            NodeKind::Literal(_) | NodeKind::Variable | NodeKind::NamedVariable(_)
        ) {
            return Ok(());
        }
        if !visited.insert(id) {
            return Ok(());
        }

        let operands = node.operands();
        for &operand in &operands {
            self.emit_tree(operand, visited)?;
        }
        let sources = operands
            .iter()
            .map(|&operand| self.source_of(operand))
            .collect::<CodegenResult<Vec<_>>>()?;
        let dest = node.reg.ok_or_else(|| {
            CodegenError::contract(format!("node {} has no register", id.index))
        })?;

        let lines = match (node.kind, node.rule) {
            (NodeKind::RegisterAddress(address, _), _) => {
                vec![emit::lower_address(address, dest, node.ty, &sources[0])]
            }
            (_, Some(rule)) => emit::lower(&Lowered {
                rule,
                dest,
                operands: &sources,
                swizzle: node.components,
                constants: node.constants,
            })?,
            (_, None) => {
                return Err(CodegenError::contract(format!(
                    "node {} has no emission rule",
                    id.index
                )))
            }
        };
        for line in lines {
            self.push_line(line);
        }
        Ok(())
    }

    pub(super) fn emit_statement(&mut self, id: NodeId) -> CodegenResult<()> {
        let mut visited = HashSet::new();
        self.emit_tree(id, &mut visited)
    }

    pub(super) fn push_line(&mut self, line: String) {
        let depth = self.control.depth();
        self.push_indented(line, depth);
    }

    pub(super) fn push_outdented(&mut self, line: String) {
        let depth = self.control.depth().saturating_sub(1);
        self.push_indented(line, depth);
    }

    fn push_indented(&mut self, line: String, depth: usize) {
        let mnemonic = line.split_whitespace().next().unwrap_or_default();
        self.session.record_instruction(mnemonic);
        log::trace!("emit: {}", line);
        let text = format!("{}{}", "    ".repeat(depth), line);
        match self.functions.active_stream() {
            Some(stream) => stream.push(text),
            None => self.main.push(text),
        }
    }

    // ---- Statements ----

    /// `target = value` for a variable of the same type.
    pub fn assign(&mut self, target: NodeId, value: NodeId) -> CodegenResult<()> {
        self.check_active("assign")?;
        let target_ty = self.variable_type(target, "assign")?;
        let value_ty = self.type_of(value)?;
        if target_ty != value_ty {
            return Err(CodegenError::type_mismatch(
                "assign",
                describe_types(&[target_ty, value_ty]),
            ));
        }
        self.copy_value(target, value)
    }

    fn variable_type(&self, target: NodeId, operation: &str) -> CodegenResult<TypeDescriptor> {
        let node = self.node(target)?;
        if !node.is_variable() {
            return Err(CodegenError::contract(format!(
                "{operation} target {} is not a variable",
                target.index
            )));
        }
        Ok(node.ty)
    }

    pub(super) fn copy_value(&mut self, target: NodeId, value: NodeId) -> CodegenResult<()> {
        self.emit_statement(value)?;
        let target = self.source_of(target)?;
        let Base::Register(reg) = target.base else {
            return Err(CodegenError::contract("move target has no register"));
        };
        let src = self.source_of(value)?;
        self.push_line(emit::lower_move(&Dest::value(reg, target.ty), src.all()));
        Ok(())
    }

    /// Merge `value` into the lanes of `target` selected by `mask`.
    pub fn assign_lanes(&mut self, target: NodeId, mask: &str, value: NodeId) -> CodegenResult<()> {
        self.check_active("assign_lanes")?;
        let target_ty = self.variable_type(target, "assign_lanes")?;
        let mask = WriteMask::parse(mask, target_ty)?;
        let value_ty = self.type_of(value)?;
        if value_ty.kind() != target_ty.kind() || value_ty.lanes() != mask.count() {
            return Err(CodegenError::type_mismatch(
                format!("assign_lanes .{mask}"),
                describe_types(&[target_ty, value_ty]),
            ));
        }
        let aligned = match_input_to_output(&mask, &Swizzle::identity(value_ty.lanes()))?;

        self.emit_statement(value)?;
        let reg = self.register_of(target)?.ok_or_else(|| {
            CodegenError::contract("assign_lanes target has no register")
        })?;
        let dest = Dest::masked(reg, &mask, target_ty.kind());
        let mut components = aligned.physical(target_ty.kind());
        if let Some(len) = dest.prefix_len() {
            components.truncate(len);
        }
        let src = self.source_of(value)?.select(components);
        self.push_line(emit::lower_move(&dest, src));
        Ok(())
    }

    /// Store every word of `value` to UAV `uav` at byte address `address`.
    pub fn store_raw(&mut self, uav: u32, address: NodeId, value: NodeId) -> CodegenResult<()> {
        self.check_active("raw store")?;
        self.check_index("raw store", address)?;
        let mut visited = HashSet::new();
        self.emit_tree(address, &mut visited)?;
        self.emit_tree(value, &mut visited)?;
        self.uavs.insert(uav);
        let line = emit::lower_raw_store(uav, &self.source_of(address)?, &self.source_of(value)?);
        self.push_line(line);
        Ok(())
    }

    // ---- Serialization ----

    /// Declarations followed by literals in pool order.
    pub fn emit_header(&self) -> String {
        let mut lines = vec![
            "il_cs_2_0".to_string(),
            format!("dcl_num_thread_per_group {}", self.threads_per_group()),
        ];
        for (buffer, size) in &self.constant_buffers {
            lines.push(format!("dcl_cb cb{buffer}[{size}]"));
        }
        for uav in &self.uavs {
            lines.push(format!("dcl_raw_uav_id({uav})"));
        }
        lines.extend(self.literals.declarations());
        join_lines(&lines)
    }

    /// Main stream, then each defined function, then `end`.
    pub fn emit_code(&self) -> String {
        let mut lines = self.main.clone();
        if self.functions.defined().next().is_some() {
            lines.push("endmain".to_string());
        }
        for record in self.functions.defined() {
            lines.push(format!("func {}", record.id));
            lines.extend(record.body().iter().cloned());
            lines.push("ret".to_string());
            lines.push("endfunc".to_string());
        }
        lines.push("end".to_string());
        join_lines(&lines)
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32x4() -> TypeDescriptor {
        TypeDescriptor::new(ElementKind::F32, 4).unwrap()
    }

    #[test]
    fn test_lifecycle_contract() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        assert!(gen.lit_f32(1.0).unwrap_err().is_contract_violation());
        assert!(gen.end().unwrap_err().is_contract_violation());

        gen.begin(None).unwrap();
        assert!(gen.begin(None).unwrap_err().is_contract_violation());
        gen.abort();
        gen.begin(None).unwrap();
        assert!(gen.is_active());
        gen.end().unwrap();
        assert!(!gen.is_active());
    }

    #[test]
    fn test_stale_handle_rejected() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let old = gen.variable(TypeDescriptor::F32).unwrap();
        gen.end().unwrap();

        gen.begin(None).unwrap();
        let err = gen.neg(old).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_literals_take_no_registers() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let a = gen.lit_f32(42.0).unwrap();
        let b = gen.lit_f32(42.0).unwrap();
        assert_eq!(gen.literal_index(a).unwrap(), gen.literal_index(b).unwrap());
        assert_eq!(gen.register_of(a).unwrap(), None);
        assert_eq!(gen.registers().issued(), 0);

        let tid = gen.thread_id_abs().unwrap();
        assert_eq!(gen.register_of(tid).unwrap(), None);
        assert_eq!(gen.registers().issued(), 0);
    }

    #[test]
    fn test_scratch_reserved_at_construction() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let x = gen.variable(TypeDescriptor::F64).unwrap();
        let r = gen.rsqrt(x).unwrap();
        assert_eq!(gen.register_of(r).unwrap(), Some(RegisterId(1)));
        assert_eq!(gen.registers().peek_next(), RegisterId(4));

        // Unreachable nodes keep their identifiers.
        let _unused = gen.add(x, x).unwrap();
        assert_eq!(gen.registers().issued(), 5);
    }

    #[test]
    fn test_assign_emits_operands_first() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let v = gen.variable(f32x4()).unwrap();
        let one = gen.lit_f32x4([1.0; 4]).unwrap();
        let sum = gen.add(v, one).unwrap();
        let product = gen.mul(sum, sum).unwrap();
        gen.assign(v, product).unwrap();
        let program = gen.end().unwrap();

        let lines: Vec<_> = program.code.lines().collect();
        assert_eq!(
            lines,
            vec![
                "add r1.xyzw, r0.xyzw, l2.xyzw",
                "mul r2.xyzw, r1.xyzw, r1.xyzw",
                "mov r0.xyzw, r2.xyzw",
                "end",
            ]
        );
        assert!(program.header.contains("dcl_literal l2, 0x3F800000, 0x3F800000, 0x3F800000, 0x3F800000"));
    }

    #[test]
    fn test_assign_type_checks() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let v = gen.variable(TypeDescriptor::F32).unwrap();
        let i = gen.lit_i32(3).unwrap();
        assert!(gen.assign(v, i).unwrap_err().is_type_mismatch());
        let lit = gen.lit_f32(1.0).unwrap();
        assert!(gen.assign(lit, lit).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_assign_lanes_hole_mask() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let v = gen.variable(f32x4()).unwrap();
        let pair = gen.variable(TypeDescriptor::new(ElementKind::F32, 2).unwrap()).unwrap();
        gen.assign_lanes(v, "xz", pair).unwrap();
        gen.assign_lanes(v, "xy", pair).unwrap();
        assert!(gen.assign_lanes(v, "zx", pair).unwrap_err().is_format());
        assert!(gen.assign_lanes(v, "xyz", pair).unwrap_err().is_type_mismatch());
        let program = gen.end().unwrap();
        assert!(program.code.contains("mov r0.x_z_, r1.x0y0"));
        assert!(program.code.contains("mov r0.xy, r1.xy"));
    }

    #[test]
    fn test_swizzle_node() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let v = gen.variable(TypeDescriptor::new(ElementKind::F64, 2).unwrap()).unwrap();
        let s = gen.swizzle(v, "yx").unwrap();
        let x = gen.swizzle(v, "x").unwrap();
        assert_eq!(gen.type_of(x).unwrap(), TypeDescriptor::F64);
        assert!(gen.swizzle(v, "z").unwrap_err().is_format());
        let out = gen.variable(gen.type_of(s).unwrap()).unwrap();
        gen.assign(out, s).unwrap();
        let program = gen.end().unwrap();
        assert!(program.code.contains("mov r1.xyzw, r0.zwxy"));
    }

    #[test]
    fn test_header_resources() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::with_options(
            &arena,
            GeneratorOptions {
                threads_per_group: Some(128),
            },
        );
        gen.begin(None).unwrap();
        let tid = gen.thread_id_abs().unwrap();
        let scale = gen.constant(0, 2, TypeDescriptor::F32).unwrap();
        let value = gen.load_raw(1, tid, TypeDescriptor::F32).unwrap();
        let scaled = gen.mul(value, scale).unwrap();
        gen.store_raw(1, tid, scaled).unwrap();
        let program = gen.end().unwrap();

        let header: Vec<_> = program.header.lines().collect();
        assert_eq!(header[0], "il_cs_2_0");
        assert_eq!(header[1], "dcl_num_thread_per_group 128");
        assert_eq!(header[2], "dcl_cb cb0[3]");
        assert_eq!(header[3], "dcl_raw_uav_id(1)");
        assert!(header[4].starts_with("dcl_literal l0, 0x00000000"));
        assert!(program.code.contains("uav_raw_load_id(1) r0.x, vAbsTidFlat.x"));
        assert!(program.code.contains("mul r1.x, r0.x, cb0[2].x"));
        assert!(program.code.contains("uav_raw_store_id(1) mem.x, vAbsTidFlat.x, r1.x"));
    }

    #[test]
    fn test_bad_index_type() {
        let arena = Bump::new();
        let mut gen = SourceGenerator::new(&arena);
        gen.begin(None).unwrap();
        let idx = gen.lit_f32(0.0).unwrap();
        let err = gen.load_raw(0, idx, TypeDescriptor::F32).unwrap_err();
        assert!(err.is_type_mismatch());
    }
}
