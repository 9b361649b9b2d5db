//! Stack simulation over a structured chain.
//!
//! Every scope (function body, loop body, branch) owns a `NodeList`: the
//! simulated operand stack interleaved with the statements emitted so far, in
//! program order. A child scope starts with a copy of its parent's
//! expressions, so a value computed before a branch can be used inside it.

use std::rc::Rc;

use crate::DeasError;
use crate::graph::{BlockId, Graph};
use crate::instruction::{FunctionLiteral, Instruction, Opcode};
use crate::naming::{NameTable, sanitize_ident};
use crate::rules::{Outcome, RuleContext, RuleSet};
use crate::structure::{Chain, ChainKind, InstructionRef, LoopJump, StructuredBody, skip_target};
use crate::syntax::{BinaryOp, Expr, FunctionDef, Literal, Statement};

#[derive(Debug, Clone)]
enum Entry {
    Expression {
        expr: Rc<Expr>,
        /// Survives ordinary pops.
        pinned: bool,
        /// Already rendered elsewhere; never printed from this list.
        emitted: bool,
        /// Index of the parent entry this one was copied from.
        seed: Option<usize>,
    },
    Statement(Statement),
}

#[derive(Debug, Clone, Default)]
pub struct NodeList {
    entries: Vec<Entry>,
    /// Entries below this index were seeded from the parent scope.
    division: usize,
    /// Parent indexes of the seeded entries popped by this scope.
    consumed: Vec<usize>,
    /// Test expression left by a conditional branch, for the enclosing case or loop.
    pub condition: Option<Rc<Expr>>,
}

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope seeded with copies of this scope's expressions.
    pub fn child(&self) -> Self {
        let entries: Vec<Entry> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, e)| match e {
                Entry::Expression { expr, pinned, .. } => Some(Entry::Expression {
                    expr: expr.clone(),
                    pinned: *pinned,
                    emitted: true,
                    seed: Some(index),
                }),
                Entry::Statement(_) => None,
            })
            .collect();
        Self { division: entries.len(), entries, consumed: Vec::new(), condition: None }
    }

    pub fn push(&mut self, expr: Rc<Expr>) {
        let pinned = !expr.is_deletable();
        self.entries.push(Entry::Expression { expr, pinned, emitted: false, seed: None });
    }

    fn push_emitted(&mut self, expr: Rc<Expr>) {
        let pinned = !expr.is_deletable();
        self.entries.push(Entry::Expression { expr, pinned, emitted: true, seed: None });
    }

    pub fn emit(&mut self, statement: Statement) {
        self.entries.push(Entry::Statement(statement));
    }

    fn top_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| matches!(e, Entry::Expression { .. }))
    }

    pub fn top(&self) -> Option<Rc<Expr>> {
        match self.entries.get(self.top_index()?) {
            Some(Entry::Expression { expr, .. }) => Some(expr.clone()),
            _ => None,
        }
    }

    /// Pops the topmost expression. A pinned one is returned but stays put;
    /// an empty stack yields `undefined`.
    pub fn pop(&mut self) -> Rc<Expr> {
        self.pop_with(false)
    }

    pub fn pop_forced(&mut self) -> Rc<Expr> {
        self.pop_with(true)
    }

    fn pop_with(&mut self, forced: bool) -> Rc<Expr> {
        let Some(index) = self.top_index() else {
            return Expr::undefined();
        };
        let (expr, pinned) = match &self.entries[index] {
            Entry::Expression { expr, pinned, .. } => (expr.clone(), *pinned),
            Entry::Statement(_) => return Expr::undefined(),
        };
        if pinned && !forced {
            return expr;
        }
        self.remove_at(index);
        expr
    }

    fn remove_at(&mut self, index: usize) {
        if let Entry::Expression { seed: Some(origin), .. } = self.entries.remove(index) {
            self.consumed.push(origin);
        }
        if index < self.division {
            self.division -= 1;
        }
    }

    /// Drops the entries the finished child scopes took from their seed. Must
    /// run before anything else changes this list after `child()`.
    fn settle(&mut self, children: &[&NodeList]) {
        let mut taken: Vec<usize> = children.iter().flat_map(|c| c.consumed.iter().copied()).collect();
        taken.sort_unstable();
        taken.dedup();
        for index in taken.into_iter().rev() {
            if index < self.entries.len() {
                self.remove_at(index);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn consumed(&self) -> usize {
        self.consumed.len()
    }

    fn has_statements(&self) -> bool {
        self.entries.iter().any(|e| matches!(e, Entry::Statement(_)))
    }

    /// Expressions this scope pushed and nobody consumed.
    fn fresh_expressions(&self) -> Vec<Rc<Expr>> {
        self.entries[self.division..]
            .iter()
            .filter_map(|e| match e {
                Entry::Expression { expr, emitted: false, .. } => Some(expr.clone()),
                _ => None,
            })
            .collect()
    }

    /// The single value a branch produced, if that is all it did.
    fn sole_value(&self, consumed: usize) -> Option<Rc<Expr>> {
        if self.has_statements() || self.consumed() != consumed {
            return None;
        }
        match self.fresh_expressions().as_slice() {
            [value] => Some(value.clone()),
            _ => None,
        }
    }

    fn is_untouched(&self) -> bool {
        !self.has_statements() && self.consumed.is_empty() && self.fresh_expressions().is_empty()
    }

    /// Statements in program order, with unconsumed values rendered where
    /// they were produced.
    pub fn into_statements(self) -> Vec<Statement> {
        self.entries
            .into_iter()
            .filter_map(|e| match e {
                Entry::Statement(s) => Some(s),
                Entry::Expression { emitted: true, .. } => None,
                Entry::Expression { expr, .. } if expr.has_side_effects() => Some(Statement::Expression(expr)),
                Entry::Expression { expr, .. } => Some(Statement::Leftover(expr)),
            })
            .collect()
    }
}

struct FunctionScope<'g> {
    graph: &'g Graph,
    body: &'g StructuredBody,
    names: NameTable,
    constants: Vec<Literal>,
    /// Enclosing loops as (header, end), innermost last.
    loops: Vec<(BlockId, BlockId)>,
}

pub struct Reconstructor<'r> {
    rules: &'r RuleSet,
    inherit_register_names: bool,
}

impl<'r> Reconstructor<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Self { rules, inherit_register_names: false }
    }

    pub fn inherit_register_names(mut self, inherit: bool) -> Self {
        self.inherit_register_names = inherit;
        self
    }

    pub fn reconstruct(
        &self,
        graph: &Graph,
        body: &StructuredBody,
        constants: Vec<Literal>,
    ) -> Result<Vec<Statement>, DeasError> {
        Ok(self.simulate(graph, body, constants)?.into_statements())
    }

    /// Runs the top-level chain and returns the resulting scope.
    pub fn simulate(
        &self,
        graph: &Graph,
        body: &StructuredBody,
        constants: Vec<Literal>,
    ) -> Result<NodeList, DeasError> {
        let names = NameTable::for_function(&graph.register_names, None);
        self.run_function(graph, body, names, constants)
    }

    fn run_function(
        &self,
        graph: &Graph,
        body: &StructuredBody,
        names: NameTable,
        constants: Vec<Literal>,
    ) -> Result<NodeList, DeasError> {
        let mut scope = FunctionScope { graph, body, names, constants, loops: Vec::new() };
        let mut stack = NodeList::new();
        self.chain(&mut scope, &body.chain, &mut stack)?;
        Ok(stack)
    }

    fn chain(&self, scope: &mut FunctionScope<'_>, chain: &Chain, stack: &mut NodeList) -> Result<(), DeasError> {
        for node in chain.siblings() {
            self.node(scope, node, stack)?;
        }
        Ok(())
    }

    fn node(&self, scope: &mut FunctionScope<'_>, node: &Chain, stack: &mut NodeList) -> Result<(), DeasError> {
        if node.empty {
            match node.jump {
                Some(LoopJump::Break) => stack.emit(Statement::Break),
                Some(LoopJump::Continue) => stack.emit(Statement::Continue),
                None => {}
            }
            return Ok(());
        }
        match (node.kind, &node.subchain) {
            (ChainKind::Sequential, Some(sub)) => self.chain(scope, sub, stack),
            (ChainKind::Sequential, None) => {
                let last = node.last_block(scope.graph);
                self.leaf(scope, node.start, last, stack)
            }
            (ChainKind::Case, _) => self.case(scope, node, stack),
            (ChainKind::Loop, _) => self.looped(scope, node, stack),
        }
    }

    fn leaf(
        &self,
        scope: &mut FunctionScope<'_>,
        start: BlockId,
        last: BlockId,
        stack: &mut NodeList,
    ) -> Result<(), DeasError> {
        let graph = scope.graph;
        let mut cursor = Some(start);
        while let Some(b) = cursor.filter(|b| *b <= last) {
            log::trace!("reconstructing block {b}");
            let block = &graph[b];
            for (index, (_, inst)) in block.items.iter().enumerate() {
                self.instruction(scope, InstructionRef { block: b, index }, inst, stack)?;
            }
            cursor = skip_target(graph, b).or(block.next_default);
        }
        Ok(())
    }

    fn instruction(
        &self,
        scope: &mut FunctionScope<'_>,
        at: InstructionRef,
        inst: &Instruction,
        stack: &mut NodeList,
    ) -> Result<(), DeasError> {
        match inst.opcode {
            Opcode::BranchIfTrue => {
                let top = stack.pop();
                stack.condition = Some(Expr::not(top));
                return Ok(());
            }
            Opcode::EaBranchIfFalse => {
                stack.condition = Some(stack.pop());
                return Ok(());
            }
            Opcode::BranchAlways => return self.jump(scope, at.block, stack),
            _ => {}
        }
        if let Some(literal) = &inst.function {
            return self.function_literal(scope, at, literal, stack);
        }

        let mut cx = RuleContext { stack: &mut *stack, names: &mut scope.names, constants: &mut scope.constants };
        match self.rules.translate(&mut cx, inst)? {
            Outcome::Push(expr) => stack.push(expr),
            Outcome::Emit(statement) => stack.emit(statement),
            Outcome::Handled => {}
            Outcome::Unhandled => {
                let Some((pops, pushes, name)) = inst.opcode.fixed_effect() else {
                    return Err(DeasError::UnsupportedInstruction(inst.opcode));
                };
                log::warn!("no rule for {}, rendering it as {name}()", inst.opcode);
                let mut args: Vec<Rc<Expr>> = (0..pops).map(|_| stack.pop()).collect();
                args.reverse();
                let call = Expr::call(Expr::name(name), args);
                if pushes > 0 {
                    stack.push(call);
                } else {
                    stack.emit(Statement::Expression(call));
                }
            }
        }
        Ok(())
    }

    /// Unconditional jumps recorded as loop exits or early continues. A jump
    /// back to an enclosing loop's header has no unlabeled form.
    fn jump(&self, scope: &FunctionScope<'_>, b: BlockId, stack: &mut NodeList) -> Result<(), DeasError> {
        let Some(&(header, end)) = scope.loops.last() else {
            return Ok(());
        };
        let target = scope.graph[b].next_branch;
        if scope.body.breaks.contains(&b) && target.is_some_and(|t| t > end) {
            stack.emit(Statement::Break);
        } else if scope.body.continues.contains(&b) {
            match target {
                Some(t) if t == header => {
                    if b != end {
                        stack.emit(Statement::Continue);
                    }
                }
                Some(t) => {
                    return Err(DeasError::MalformedValue(format!(
                        "jump in block {b} continues the outer loop at {t} from inside the loop at {header}"
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }

    fn function_literal(
        &self,
        scope: &mut FunctionScope<'_>,
        at: InstructionRef,
        literal: &FunctionLiteral,
        stack: &mut NodeList,
    ) -> Result<(), DeasError> {
        let body = scope.body.function(at).ok_or_else(|| {
            DeasError::MalformedValue(format!("function literal at {}:{} was not structured", at.block, at.index))
        })?;
        let parent = self.inherit_register_names.then_some(&scope.names);
        let mut names = NameTable::for_function(&literal.body.register_names, parent);
        let params = literal
            .params
            .iter()
            .map(|p| match p.register.filter(|r| *r != 0) {
                Some(register) => names.name_register(register, &p.name),
                None => sanitize_ident(&p.name),
            })
            .collect();
        let statements = self
            .run_function(&literal.body, body, names, scope.constants.clone())?
            .into_statements();

        let def = Rc::new(FunctionDef {
            name: literal.is_statement().then(|| literal.name.clone()),
            params,
            body: statements,
        });
        if literal.is_statement() {
            stack.emit(Statement::Function(def));
        } else {
            stack.push(Rc::new(Expr::Function(def)));
        }
        Ok(())
    }

    fn case(&self, scope: &mut FunctionScope<'_>, node: &Chain, stack: &mut NodeList) -> Result<(), DeasError> {
        let [cond, then, otherwise] = node.children.as_slice() else {
            return Err(DeasError::MalformedValue(format!("case at {} needs three children", node.start)));
        };
        self.node(scope, cond, stack)?;
        let condition = stack
            .condition
            .take()
            .ok_or(DeasError::MissingCondition { block: node.start.index() })?;

        let mut then_stack = stack.child();
        self.chain(scope, then, &mut then_stack)?;
        let mut else_stack = stack.child();
        self.chain(scope, otherwise, &mut else_stack)?;

        if let (Some(a), Some(b)) = (then_stack.sole_value(0), else_stack.sole_value(0)) {
            stack.push(Expr::ternary(condition, a, b));
            return Ok(());
        }
        if let (Some(rhs), Some(lhs)) = (then_stack.sole_value(1), stack.top()) {
            if else_stack.is_untouched() {
                let op = if condition == lhs {
                    Some(BinaryOp::LogicalAnd)
                } else if condition == Expr::not(lhs.clone()) {
                    Some(BinaryOp::LogicalOr)
                } else {
                    None
                };
                if let Some(op) = op {
                    stack.pop();
                    stack.push(Expr::binary(op, lhs, rhs));
                    return Ok(());
                }
            }
        }

        stack.settle(&[&then_stack, &else_stack]);
        let spliced = else_stack.fresh_expressions();
        stack.emit(Statement::if_else(condition, then_stack.into_statements(), else_stack.into_statements()));
        for expr in spliced {
            stack.push_emitted(expr);
        }
        Ok(())
    }

    fn looped(&self, scope: &mut FunctionScope<'_>, node: &Chain, stack: &mut NodeList) -> Result<(), DeasError> {
        let [header, body] = node.children.as_slice() else {
            return Err(DeasError::MalformedValue(format!("loop at {} needs two children", node.start)));
        };
        let end = node.last_block(scope.graph);
        scope.loops.push((node.start, end));
        let result = self.loop_statement(scope, node.start, header, body, stack);
        scope.loops.pop();
        stack.emit(result?);
        Ok(())
    }

    fn loop_statement(
        &self,
        scope: &mut FunctionScope<'_>,
        start: BlockId,
        header: &Chain,
        body: &Chain,
        stack: &mut NodeList,
    ) -> Result<Statement, DeasError> {
        let mut head_stack = stack.child();
        let condition = if header.empty {
            None
        } else {
            self.chain(scope, header, &mut head_stack)?;
            let condition = head_stack.condition.take();
            Some(condition.ok_or(DeasError::MissingCondition { block: start.index() })?)
        };

        let mut body_stack = head_stack.child();
        self.chain(scope, body, &mut body_stack)?;
        head_stack.settle(&[&body_stack]);
        stack.settle(&[&head_stack]);
        let mut statements = body_stack.into_statements();
        if statements.last() == Some(&Statement::Continue) {
            statements.pop();
        }

        if let Some(key) = condition.as_deref().and_then(enumerated_key) {
            if let Some(Expr::Enumerate(object)) = stack.top().as_deref() {
                let statement = Statement::ForIn { key, object: object.clone(), body: statements };
                stack.pop_forced();
                return Ok(statement);
            }
        }

        let condition = condition.unwrap_or_else(|| Expr::literal(Literal::Boolean(true)));
        let maintenance = head_stack.into_statements();
        Ok(Statement::Loop { condition, maintenance, body: statements })
    }
}

/// The key of a `key != null` enumeration test.
fn enumerated_key(condition: &Expr) -> Option<Rc<Expr>> {
    let Expr::Binary { op: BinaryOp::NotEqual | BinaryOp::StrictNotEqual, lhs, rhs } = condition else {
        return None;
    };
    match (lhs.is_null(), rhs.is_null()) {
        (false, true) => Some(lhs.clone()),
        (true, false) => Some(rhs.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::instruction::{Operand, Parameter, PreloadFlags};
    use crate::printer::print_statements;
    use crate::structure::structure;

    fn push(values: Vec<Operand>) -> Instruction {
        Instruction::push(values)
    }

    fn s(v: &str) -> Operand {
        Operand::String(v.to_string())
    }

    fn i(v: i32) -> Operand {
        Operand::Integer(v)
    }

    fn op(opcode: Opcode) -> Instruction {
        Instruction::simple(opcode)
    }

    fn cond() -> Instruction {
        Instruction::branch(Opcode::BranchIfTrue, 0)
    }

    fn jump() -> Instruction {
        Instruction::branch(Opcode::BranchAlways, 0)
    }

    fn decompile(graph: &Graph) -> String {
        let body = structure(graph).unwrap();
        let rules = RuleSet::standard();
        let statements = Reconstructor::new(&rules).reconstruct(graph, &body, Vec::new()).unwrap();
        print_statements(&statements, 4)
    }

    #[test]
    fn test_stack_balance() {
        let mut b = GraphBuilder::new();
        b.add_block(vec![push(vec![i(2), i(3)]), op(Opcode::Add), op(Opcode::End)]);
        let g = b.build().unwrap();
        let body = structure(&g).unwrap();
        let rules = RuleSet::standard();
        let stack = Reconstructor::new(&rules).simulate(&g, &body, Vec::new()).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top().unwrap().to_string(), "2 + 3");
    }

    #[test]
    fn test_node_list_seeding() {
        let mut parent = NodeList::new();
        parent.push(Expr::name("a"));
        parent.emit(Statement::Break);
        parent.push(Expr::name("b"));

        let mut child = parent.child();
        assert_eq!(child.len(), 2);
        assert_eq!(child.pop(), Expr::name("b"));
        child.push(Expr::name("c"));
        assert_eq!(child.consumed(), 1);
        assert_eq!(child.fresh_expressions(), vec![Expr::name("c")]);
        assert_eq!(child.into_statements(), vec![Statement::Leftover(Expr::name("c"))]);
        assert_eq!(parent.len(), 3);
    }

    #[test]
    fn test_pinned_entry_needs_forced_pop() {
        let mut list = NodeList::new();
        let marker = Rc::new(Expr::Enumerate(Expr::name("o")));
        list.push(marker.clone());
        assert_eq!(list.pop(), marker);
        assert_eq!(list.len(), 1);
        assert_eq!(list.pop_forced(), marker);
        assert!(list.is_empty());
        assert_eq!(list.pop(), Expr::undefined());
    }

    #[test]
    fn test_if_else() {
        // if (x < 10) { trace("small"); } else { trace("big"); }
        let mut b = GraphBuilder::new();
        let head = b.add_block(vec![
            push(vec![s("x")]),
            op(Opcode::GetVariable),
            push(vec![i(10)]),
            op(Opcode::LessThan2),
            op(Opcode::LogicalNot),
            cond(),
        ]);
        let then = b.add_block(vec![push(vec![s("small")]), op(Opcode::Trace), jump()]);
        let other = b.add_block(vec![push(vec![s("big")]), op(Opcode::Trace)]);
        let join = b.add_block(vec![op(Opcode::End)]);
        b.branch(head, other).branch(then, join);
        let g = b.build().unwrap();
        assert_eq!(
            decompile(&g),
            "if (x < 10) {\n    trace(\"small\");\n} else {\n    trace(\"big\");\n}\n"
        );
    }

    #[test]
    fn test_while_loop() {
        // while (i < 3) { i = i + 1; }
        let mut b = GraphBuilder::new();
        let head = b.add_block(vec![
            push(vec![s("i")]),
            op(Opcode::GetVariable),
            push(vec![i(3)]),
            op(Opcode::LessThan2),
            op(Opcode::LogicalNot),
            cond(),
        ]);
        let body = b.add_block(vec![
            push(vec![s("i"), s("i")]),
            op(Opcode::GetVariable),
            op(Opcode::Increment),
            op(Opcode::SetVariable),
            jump(),
        ]);
        let exit = b.add_block(vec![op(Opcode::End)]);
        b.branch(head, exit).branch(body, head);
        let g = b.build().unwrap();
        assert_eq!(decompile(&g), "while (i < 3) {\n    i = i + 1;\n}\n");
    }

    #[test]
    fn test_infinite_loop_with_conditional_break() {
        // while (true) { f(); if (done) break; }
        let mut b = GraphBuilder::new();
        let head = b.add_block(vec![push(vec![i(0), s("f")]), op(Opcode::CallFunction), op(Opcode::Pop)]);
        let test = b.add_block(vec![push(vec![s("done")]), op(Opcode::GetVariable), cond()]);
        let back = b.add_block(vec![jump()]);
        let exit = b.add_block(vec![op(Opcode::End)]);
        b.branch(test, exit).branch(back, head);
        let g = b.build().unwrap();
        assert_eq!(
            decompile(&g),
            "while (true) {\n    f();\n    if (done) {\n        break;\n    }\n}\n"
        );
    }

    #[test]
    fn test_ternary_recovery() {
        // y = c ? 1 : 2;
        let mut b = GraphBuilder::new();
        let head = b.add_block(vec![push(vec![s("y"), s("c")]), op(Opcode::GetVariable), op(Opcode::LogicalNot), cond()]);
        let then = b.add_block(vec![push(vec![i(1)]), jump()]);
        let other = b.add_block(vec![push(vec![i(2)])]);
        let join = b.add_block(vec![op(Opcode::SetVariable), op(Opcode::End)]);
        b.branch(head, other).branch(then, join);
        let g = b.build().unwrap();
        assert_eq!(decompile(&g), "y = c ? 1 : 2;\n");
    }

    #[test]
    fn test_short_circuit_recovery() {
        // r = a && b;  r = a || b;
        for (negate, expected) in [(true, "r = a && b;\n"), (false, "r = a || b;\n")] {
            let mut head_items = vec![push(vec![s("r"), s("a")]), op(Opcode::GetVariable), op(Opcode::PushDuplicate)];
            if negate {
                head_items.push(op(Opcode::LogicalNot));
            }
            head_items.push(cond());
            let mut b = GraphBuilder::new();
            let head = b.add_block(head_items);
            b.add_block(vec![op(Opcode::Pop), push(vec![s("b")]), op(Opcode::GetVariable)]);
            let join = b.add_block(vec![op(Opcode::SetVariable), op(Opcode::End)]);
            b.branch(head, join);
            let g = b.build().unwrap();
            assert_eq!(decompile(&g), expected);
        }
    }

    #[test]
    fn test_for_in_recovery() {
        // for (reg1 in obj) { trace(reg1); }
        let mut b = GraphBuilder::new();
        b.add_block(vec![push(vec![s("obj")]), op(Opcode::Enumerate)]);
        let head = b.add_block(vec![
            Instruction::new(Opcode::SetRegister, vec![Operand::Register(1)]),
            push(vec![Operand::Null]),
            op(Opcode::Equals2),
            cond(),
        ]);
        let body = b.add_block(vec![push(vec![Operand::Register(1)]), op(Opcode::Trace), jump()]);
        let exit = b.add_block(vec![op(Opcode::End)]);
        b.branch(head, exit).branch(body, head);
        let mut g = b.build().unwrap();
        g.register_names.insert(1, "key".to_string());
        assert_eq!(decompile(&g), "for (key in obj) {\n    trace(key);\n}\n");
    }

    #[test]
    fn test_continue_inside_loop() {
        // while (i < 9) { if (skip) continue; g(); }
        let mut b = GraphBuilder::new();
        let head = b.add_block(vec![
            push(vec![s("i")]),
            op(Opcode::GetVariable),
            push(vec![i(9)]),
            op(Opcode::LessThan2),
            op(Opcode::LogicalNot),
            cond(),
        ]);
        let test = b.add_block(vec![push(vec![s("skip")]), op(Opcode::GetVariable), op(Opcode::LogicalNot), cond()]);
        let cont = b.add_block(vec![jump()]);
        let rest = b.add_block(vec![push(vec![i(0)]), Instruction::new(Opcode::EaCallNamedFuncPop, vec![s("g")]), jump()]);
        let exit = b.add_block(vec![op(Opcode::End)]);
        b.branch(head, exit).branch(test, rest).branch(cont, head).branch(rest, head);
        let g = b.build().unwrap();
        assert_eq!(
            decompile(&g),
            "while (i < 9) {\n    if (skip) {\n        continue;\n    }\n    g();\n}\n"
        );
    }

    #[test]
    fn test_function_literals() {
        let mut inner = GraphBuilder::new();
        inner.add_block(vec![
            push(vec![Operand::Register(1), Operand::Register(2)]),
            op(Opcode::Add2),
            op(Opcode::Return),
        ]);
        let params = vec![
            Parameter { name: "a".into(), register: Some(1) },
            Parameter { name: "b".into(), register: Some(2) },
        ];
        let named = FunctionLiteral::new("sum", params.clone(), PreloadFlags::empty(), inner.build().unwrap());

        let mut inner = GraphBuilder::new();
        inner.add_block(vec![push(vec![Operand::Register(1)]), op(Opcode::Return)]);
        let anonymous = FunctionLiteral::new("", params[..1].to_vec(), PreloadFlags::empty(), inner.build().unwrap());

        let mut b = GraphBuilder::new();
        b.add_block(vec![
            Instruction::define_function(named),
            push(vec![s("id")]),
            Instruction::define_function(anonymous),
            op(Opcode::SetVariable),
            op(Opcode::End),
        ]);
        let g = b.build().unwrap();
        assert_eq!(
            decompile(&g),
            "function sum(a, b) {\n    return a + b;\n}\nid = function(a) {\n    return a;\n};\n"
        );
    }

    #[test]
    fn test_leftover_values_rendered_in_place() {
        let mut b = GraphBuilder::new();
        b.add_block(vec![
            push(vec![i(7)]),
            push(vec![s("x"), i(1)]),
            op(Opcode::SetVariable),
            push(vec![i(0), s("f")]),
            op(Opcode::CallFunction),
            op(Opcode::End),
        ]);
        let g = b.build().unwrap();
        assert_eq!(decompile(&g), "// push 7\nx = 1;\nf();\n");
    }

    #[test]
    fn test_fixed_effect_fallback() {
        let mut b = GraphBuilder::new();
        b.add_block(vec![
            push(vec![s("n"), i(65)]),
            op(Opcode::Chr),
            op(Opcode::SetVariable),
            op(Opcode::Play),
            op(Opcode::End),
        ]);
        let g = b.build().unwrap();
        assert_eq!(decompile(&g), "n = chr(65);\nplay();\n");
    }

    #[test]
    fn test_unsupported_instruction() {
        let mut b = GraphBuilder::new();
        b.add_block(vec![op(Opcode::Try), op(Opcode::End)]);
        let g = b.build().unwrap();
        let body = structure(&g).unwrap();
        let rules = RuleSet::standard();
        let err = Reconstructor::new(&rules).reconstruct(&g, &body, Vec::new()).unwrap_err();
        assert!(matches!(err, DeasError::UnsupportedInstruction(Opcode::Try)));
    }

    #[test]
    fn test_settle_drops_consumed_seed() {
        let mut parent = NodeList::new();
        parent.push(Expr::name("a"));
        parent.emit(Statement::Break);
        parent.push(Expr::call(Expr::name("f"), vec![]));
        let mut child = parent.child();
        assert_eq!(child.pop(), Expr::call(Expr::name("f"), vec![]));
        assert_eq!(child.consumed(), 1);
        parent.settle(&[&child]);
        assert_eq!(parent.len(), 2);
        assert_eq!(parent.into_statements(), vec![Statement::Leftover(Expr::name("a")), Statement::Break]);
    }

    #[test]
    fn test_value_used_by_both_branches_is_evaluated_once() {
        // f() stays on the stack and feeds both branches
        let mut b = GraphBuilder::new();
        let head = b.add_block(vec![
            push(vec![i(0), s("f")]),
            op(Opcode::CallFunction),
            push(vec![s("c")]),
            op(Opcode::GetVariable),
            cond(),
        ]);
        let then = b.add_block(vec![push(vec![s("x")]), op(Opcode::StackSwap), op(Opcode::SetVariable), jump()]);
        let other = b.add_block(vec![push(vec![s("y")]), op(Opcode::StackSwap), op(Opcode::SetVariable)]);
        let join = b.add_block(vec![op(Opcode::End)]);
        b.branch(head, other).branch(then, join);
        let g = b.build().unwrap();
        assert_eq!(decompile(&g), "if (!c) {\n    x = f();\n} else {\n    y = f();\n}\n");
    }

    #[test]
    fn test_loop_body_value_stays_in_body() {
        let mut b = GraphBuilder::new();
        let head = b.add_block(vec![
            push(vec![s("i")]),
            op(Opcode::GetVariable),
            push(vec![i(3)]),
            op(Opcode::LessThan2),
            op(Opcode::LogicalNot),
            cond(),
        ]);
        let body = b.add_block(vec![push(vec![i(5)]), jump()]);
        let exit = b.add_block(vec![op(Opcode::Trace), op(Opcode::End)]);
        b.branch(head, exit).branch(body, head);
        let g = b.build().unwrap();
        assert_eq!(decompile(&g), "while (i < 3) {\n    // push 5\n}\ntrace(undefined);\n");
    }

    #[test]
    fn test_jump_to_outer_loop_header_is_rejected() {
        let mut b = GraphBuilder::new();
        let outer = b.add_block(vec![push(vec![s("a")]), op(Opcode::GetVariable), op(Opcode::LogicalNot), cond()]);
        let inner = b.add_block(vec![push(vec![s("b")]), op(Opcode::GetVariable), op(Opcode::LogicalNot), cond()]);
        let test = b.add_block(vec![push(vec![s("c")]), op(Opcode::GetVariable), cond()]);
        let restart = b.add_block(vec![jump()]);
        let step = b.add_block(vec![push(vec![i(0), s("f")]), op(Opcode::CallFunction), op(Opcode::Pop), jump()]);
        let back = b.add_block(vec![jump()]);
        let exit = b.add_block(vec![op(Opcode::End)]);
        b.branch(outer, exit)
            .branch(inner, back)
            .branch(test, step)
            .branch(restart, outer)
            .branch(step, inner)
            .branch(back, outer);
        let g = b.build().unwrap();
        let body = structure(&g).unwrap();
        let rules = RuleSet::standard();
        let err = Reconstructor::new(&rules).reconstruct(&g, &body, Vec::new()).unwrap_err();
        assert!(matches!(err, DeasError::MalformedValue(_)));
    }
}
