// This module lowers structured control flow to the dialect's block-delimiter tokens.
// ControlStack tracks the open if/else and loop blocks; each function activation pushes
// a floor so a body can neither close blocks opened by its caller nor leave its own
// blocks open. Conditions are either a value handle or a negation of a condition.
// Lowering depends on the condition node: a one-lane float32 compare becomes a single
// compare-and-branch token (ifc_relop, breakc_relop, continuec_relop) with the compare
// itself never emitted, and a negation selects the complementary relation; a one-lane
// int32/uint32 value becomes a logical test (if_logicalnz / if_logicalz). Anything else
// is rejected with TypeMismatch.

//! Structured control flow: if/else/endif, whileloop/endloop, break, continue.

use super::generator::SourceGenerator;
use super::node::{NodeId, NodeKind, Relop};
use crate::core::{CodegenError, CodegenResult, ElementKind, TypeDescriptor};
use hashbrown::HashSet;

/// Branch condition over a node handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Value(NodeId),
    Not(Box<Condition>),
}

impl Condition {
    /// Innermost value and whether an odd number of negations wraps it.
    pub fn flatten(&self) -> (NodeId, bool) {
        match self {
            Condition::Value(id) => (*id, false),
            Condition::Not(inner) => {
                let (id, negated) = inner.flatten();
                (id, !negated)
            }
        }
    }
}

impl From<NodeId> for Condition {
    fn from(id: NodeId) -> Self {
        Condition::Value(id)
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }
}

impl std::ops::Not for NodeId {
    type Output = Condition;

    fn not(self) -> Condition {
        !Condition::Value(self)
    }
}

/// Open block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    If { has_else: bool },
    Loop,
}

/// Block nesting for the main stream and the active function.
#[derive(Debug, Default)]
pub struct ControlStack {
    blocks: Vec<Block>,
    floors: Vec<usize>,
    opened: usize,
    closed: usize,
}

impl ControlStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn floor(&self) -> usize {
        self.floors.last().copied().unwrap_or(0)
    }

    fn top(&self) -> Option<Block> {
        if self.blocks.len() > self.floor() {
            self.blocks.last().copied()
        } else {
            None
        }
    }

    pub fn open(&mut self, block: Block) {
        self.blocks.push(block);
        self.opened += 1;
    }

    pub fn enter_else(&mut self) -> CodegenResult<()> {
        match self.top() {
            Some(Block::If { has_else: false }) => {
                if let Some(top) = self.blocks.last_mut() {
                    *top = Block::If { has_else: true };
                }
                Ok(())
            }
            Some(Block::If { has_else: true }) => {
                Err(CodegenError::contract("else after else in the same if block"))
            }
            _ => Err(CodegenError::contract("else without an open if block")),
        }
    }

    pub fn close_if(&mut self) -> CodegenResult<()> {
        match self.top() {
            Some(Block::If { .. }) => {
                self.blocks.pop();
                self.closed += 1;
                Ok(())
            }
            _ => Err(CodegenError::contract("endif without an open if block")),
        }
    }

    pub fn close_loop(&mut self) -> CodegenResult<()> {
        match self.top() {
            Some(Block::Loop) => {
                self.blocks.pop();
                self.closed += 1;
                Ok(())
            }
            _ => Err(CodegenError::contract("endloop without an open loop")),
        }
    }

    /// Whether a loop is open above the current floor.
    pub fn in_loop(&self) -> bool {
        self.blocks[self.floor()..].contains(&Block::Loop)
    }

    /// Open blocks above the current floor.
    pub fn depth(&self) -> usize {
        self.blocks.len() - self.floor()
    }

    pub fn push_floor(&mut self) {
        self.floors.push(self.blocks.len());
    }

    pub fn pop_floor(&mut self) -> CodegenResult<()> {
        self.check_balanced()?;
        self.floors
            .pop()
            .map(|_| ())
            .ok_or_else(|| CodegenError::contract("no block floor to pop"))
    }

    pub fn check_balanced(&self) -> CodegenResult<()> {
        match self.depth() {
            0 => Ok(()),
            open => Err(CodegenError::contract(format!(
                "{open} block(s) left open: {:?}",
                &self.blocks[self.floor()..]
            ))),
        }
    }

    /// Blocks opened and closed over the whole unit.
    pub fn counts(&self) -> (usize, usize) {
        (self.opened, self.closed)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A lowered branch test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Test {
    Logical { operand: String, nonzero: bool },
    Relational { relop: Relop, lhs: String, rhs: String },
}

impl Test {
    /// Token for `stem` (`if`, `break`, `continue`).
    pub(crate) fn token(&self, stem: &str) -> String {
        match self {
            Test::Logical { operand, nonzero } => {
                let polarity = if *nonzero { "nz" } else { "z" };
                format!("{stem}_logical{polarity} {operand}")
            }
            Test::Relational { relop, lhs, rhs } => {
                format!("{stem}c_relop({}) {lhs}, {rhs}", relop.name())
            }
        }
    }
}

impl<'arena> SourceGenerator<'arena> {
    fn lower_condition(&mut self, condition: &Condition) -> CodegenResult<Test> {
        let (id, negated) = condition.flatten();
        let node = *self.node(id)?;

        if let NodeKind::Binary(op, lhs, rhs) = node.kind {
            if let Some(relop) = op.relop() {
                if self.type_of(lhs)? == TypeDescriptor::F32 {
                    let mut visited = HashSet::new();
                    self.emit_tree(lhs, &mut visited)?;
                    self.emit_tree(rhs, &mut visited)?;
                    return Ok(Test::Relational {
                        relop: if negated { relop.complement() } else { relop },
                        lhs: self.source_of(lhs)?.all().to_string(),
                        rhs: self.source_of(rhs)?.all().to_string(),
                    });
                }
            }
        }

        let is_flag = node.ty.lanes() == 1
            && matches!(node.ty.kind(), ElementKind::I32 | ElementKind::U32);
        if !is_flag {
            return Err(CodegenError::type_mismatch("condition", node.ty.to_string()));
        }
        self.emit_statement(id)?;
        Ok(Test::Logical {
            operand: self.source_of(id)?.all().to_string(),
            nonzero: !negated,
        })
    }

    /// Open an if block.
    pub fn if_begin(&mut self, condition: impl Into<Condition>) -> CodegenResult<()> {
        self.check_active("if")?;
        let test = self.lower_condition(&condition.into())?;
        self.push_line(test.token("if"));
        self.control.open(Block::If { has_else: false });
        Ok(())
    }

    pub fn else_begin(&mut self) -> CodegenResult<()> {
        self.check_active("else")?;
        self.control.enter_else()?;
        self.push_outdented("else".to_string());
        Ok(())
    }

    pub fn if_end(&mut self) -> CodegenResult<()> {
        self.check_active("endif")?;
        self.control.close_if()?;
        self.push_line("endif".to_string());
        Ok(())
    }

    /// Open an unconditional loop; leave it with a break.
    pub fn loop_begin(&mut self) -> CodegenResult<()> {
        self.check_active("whileloop")?;
        self.push_line("whileloop".to_string());
        self.control.open(Block::Loop);
        Ok(())
    }

    pub fn loop_end(&mut self) -> CodegenResult<()> {
        self.check_active("endloop")?;
        self.control.close_loop()?;
        self.push_line("endloop".to_string());
        Ok(())
    }

    fn loop_exit(&mut self, stem: &str, condition: Option<Condition>) -> CodegenResult<()> {
        self.check_active(stem)?;
        if !self.control.in_loop() {
            return Err(CodegenError::contract(format!("{stem} outside a loop")));
        }
        let line = match condition {
            Some(condition) => self.lower_condition(&condition)?.token(stem),
            None => stem.to_string(),
        };
        self.push_line(line);
        Ok(())
    }

    pub fn break_loop(&mut self) -> CodegenResult<()> {
        self.loop_exit("break", None)
    }

    pub fn break_if(&mut self, condition: impl Into<Condition>) -> CodegenResult<()> {
        self.loop_exit("break", Some(condition.into()))
    }

    pub fn continue_loop(&mut self) -> CodegenResult<()> {
        self.loop_exit("continue", None)
    }

    pub fn continue_if(&mut self, condition: impl Into<Condition>) -> CodegenResult<()> {
        self.loop_exit("continue", Some(condition.into()))
    }

    pub fn if_then<F>(&mut self, condition: impl Into<Condition>, then: F) -> CodegenResult<()>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        self.if_begin(condition)?;
        then(self)?;
        self.if_end()
    }

    pub fn if_then_else<F, G>(
        &mut self,
        condition: impl Into<Condition>,
        then: F,
        otherwise: G,
    ) -> CodegenResult<()>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
        G: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        self.if_begin(condition)?;
        then(self)?;
        self.else_begin()?;
        otherwise(self)?;
        self.if_end()
    }

    /// `whileloop`, exit when `condition` is false, body, `endloop`.
    ///
    /// `condition` is built by the closure so it is re-evaluated inside the
    /// loop on every iteration.
    pub fn while_do<C, F>(&mut self, condition: C, body: F) -> CodegenResult<()>
    where
        C: FnOnce(&mut Self) -> CodegenResult<Condition>,
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        self.loop_begin()?;
        let condition = condition(self)?;
        self.break_if(!condition)?;
        body(self)?;
        self.loop_end()
    }

    /// Unconditional loop; the body must break out.
    pub fn loop_do<F>(&mut self, body: F) -> CodegenResult<()>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        self.loop_begin()?;
        body(self)?;
        self.loop_end()
    }
}
