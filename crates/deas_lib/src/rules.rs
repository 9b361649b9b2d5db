//! Per-opcode translation rules.
//!
//! A rule looks at one instruction and the simulated stack and either pushes
//! an expression, emits a statement, or declines. `RuleSet` tries its rules
//! in order; the reconstructor handles branches, function literals and the
//! fixed-arity fallback itself.

use std::rc::Rc;

use crate::DeasError;
use crate::instruction::{Instruction, Opcode, Operand};
use crate::naming::NameTable;
use crate::reconstruct::NodeList;
use crate::syntax::{BinaryOp, Expr, Literal, Statement, UnaryOp};

/// Flash property indices used by `GetProperty`/`SetProperty`.
const PROPERTY_NAMES: [&str; 22] = [
    "_x",
    "_y",
    "_xscale",
    "_yscale",
    "_currentframe",
    "_totalframes",
    "_alpha",
    "_visible",
    "_width",
    "_height",
    "_rotation",
    "_target",
    "_framesloaded",
    "_name",
    "_droptarget",
    "_url",
    "_highquality",
    "_focusrect",
    "_soundbuftime",
    "_quality",
    "_xmouse",
    "_ymouse",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Push(Rc<Expr>),
    Emit(Statement),
    /// The rule did its own stack work.
    Handled,
    Unhandled,
}

pub struct RuleContext<'a> {
    pub stack: &'a mut NodeList,
    pub names: &'a mut NameTable,
    pub constants: &'a mut Vec<Literal>,
}

impl RuleContext<'_> {
    pub fn pop(&mut self) -> Rc<Expr> {
        self.stack.pop()
    }

    /// Pops an argument count followed by that many values, in pop order.
    pub fn pop_list(&mut self) -> Result<Vec<Rc<Expr>>, DeasError> {
        let count = self.pop_count()?;
        Ok((0..count).map(|_| self.stack.pop()).collect())
    }

    pub fn pop_count(&mut self) -> Result<usize, DeasError> {
        let count = self.stack.pop();
        count
            .as_count()
            .ok_or_else(|| DeasError::MalformedValue(format!("expected a count, found `{count}`")))
    }

    pub fn pop_name(&mut self) -> Result<String, DeasError> {
        let name = self.stack.pop();
        name.as_name()
            .map(str::to_string)
            .ok_or_else(|| DeasError::MalformedValue(format!("expected a name, found `{name}`")))
    }

    /// Resolves an operand to the expression it stands for.
    pub fn value(&mut self, operand: &Operand) -> Result<Rc<Expr>, DeasError> {
        let literal = match operand {
            Operand::String(s) => Literal::String(s.clone()),
            Operand::Integer(v) => Literal::Integer(*v),
            Operand::Float(v) => Literal::Float(*v),
            Operand::Boolean(b) => Literal::Boolean(*b),
            Operand::Null => Literal::Null,
            Operand::Undefined => Literal::Undefined,
            Operand::Constant(index) => self
                .constants
                .get(usize::from(*index))
                .cloned()
                .ok_or(DeasError::ConstantOutOfRange { index: *index, len: self.constants.len() })?,
            Operand::Register(register) => return Ok(Expr::name(self.names.register_name(*register))),
        };
        Ok(Expr::literal(literal))
    }

    fn operand(&mut self, inst: &Instruction, index: usize) -> Result<Rc<Expr>, DeasError> {
        let operand = inst
            .operand(index)
            .ok_or_else(|| DeasError::MalformedValue(format!("{} is missing operand {index}", inst.opcode)))?;
        self.value(operand)
    }

    fn operand_name(&mut self, inst: &Instruction, index: usize) -> Result<String, DeasError> {
        let value = self.operand(inst, index)?;
        value
            .as_name()
            .map(str::to_string)
            .ok_or_else(|| DeasError::MalformedValue(format!("{} expects a name, found `{value}`", inst.opcode)))
    }
}

pub trait TranslationRule {
    fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError>;
}

pub struct RuleSet {
    rules: Vec<Box<dyn TranslationRule>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleSet {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.append(StackRules);
        set.append(ArithmeticRules);
        set.append(VariableRules);
        set.append(ObjectRules);
        set.append(MovieRules);
        set
    }

    /// Adds a rule consulted before every existing one.
    pub fn prepend(&mut self, rule: impl TranslationRule + 'static) {
        self.rules.insert(0, Box::new(rule));
    }

    pub fn append(&mut self, rule: impl TranslationRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
        for rule in &self.rules {
            match rule.translate(cx, inst)? {
                Outcome::Unhandled => continue,
                outcome => return Ok(outcome),
            }
        }
        Ok(Outcome::Unhandled)
    }
}

/// Literal pushes, stack shuffling, registers and the constant pool.
pub struct StackRules;

impl TranslationRule for StackRules {
    fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
        let pushed = match inst.opcode {
            Opcode::PushData => {
                for operand in &inst.operands {
                    let value = cx.value(operand)?;
                    cx.stack.push(value);
                }
                return Ok(Outcome::Handled);
            }
            Opcode::EaPushString
            | Opcode::EaPushFloat
            | Opcode::EaPushByte
            | Opcode::EaPushShort
            | Opcode::EaPushLong
            | Opcode::EaPushConstantByte
            | Opcode::EaPushConstantWord
            | Opcode::EaPushRegister => cx.operand(inst, 0)?,
            Opcode::EaPushZero => Expr::integer(0),
            Opcode::EaPushOne => Expr::integer(1),
            Opcode::EaPushTrue => Expr::literal(Literal::Boolean(true)),
            Opcode::EaPushFalse => Expr::literal(Literal::Boolean(false)),
            Opcode::EaPushNull => Expr::literal(Literal::Null),
            Opcode::EaPushUndefined => Expr::undefined(),
            Opcode::EaPushThis | Opcode::EaPushThisVar => Expr::name("this"),
            Opcode::EaPushGlobal | Opcode::EaPushGlobalVar => Expr::name("_global"),
            Opcode::Pop => {
                let value = cx.pop();
                if value.has_side_effects() {
                    return Ok(Outcome::Emit(Statement::Expression(value)));
                }
                return Ok(Outcome::Handled);
            }
            Opcode::PushDuplicate => cx.stack.top().unwrap_or_else(Expr::undefined),
            Opcode::StackSwap => {
                let a = cx.pop();
                let b = cx.pop();
                cx.stack.push(a);
                b
            }
            Opcode::SetRegister => {
                let register = match inst.operand(0) {
                    Some(Operand::Register(r)) => *r,
                    Some(Operand::Integer(r)) => u8::try_from(*r).map_err(|_| {
                        DeasError::MalformedValue(format!("register {r} out of range"))
                    })?,
                    _ => return Err(DeasError::MalformedValue("SetRegister without a register".into())),
                };
                let name = Expr::name(cx.names.register_name(register));
                let value = cx.pop();
                if matches!(*value, Expr::Enumerate(_)) {
                    return Ok(Outcome::Push(name));
                }
                cx.stack.emit(Statement::assign(name.clone(), value));
                name
            }
            Opcode::ConstantPool => {
                let mut pool = Vec::with_capacity(inst.operands.len());
                for operand in &inst.operands {
                    match cx.value(operand)?.as_ref() {
                        Expr::Literal(literal) => pool.push(literal.clone()),
                        other => {
                            return Err(DeasError::MalformedValue(format!("constant pool entry `{other}`")));
                        }
                    }
                }
                *cx.constants = pool;
                return Ok(Outcome::Handled);
            }
            _ => return Ok(Outcome::Unhandled),
        };
        Ok(Outcome::Push(pushed))
    }
}

/// Operators. The right operand is on top of the stack.
pub struct ArithmeticRules;

impl ArithmeticRules {
    fn binary_op(opcode: Opcode) -> Option<BinaryOp> {
        let op = match opcode {
            Opcode::Add | Opcode::Add2 | Opcode::StringConcat => BinaryOp::Add,
            Opcode::Subtract => BinaryOp::Subtract,
            Opcode::Multiply => BinaryOp::Multiply,
            Opcode::Divide => BinaryOp::Divide,
            Opcode::Modulo => BinaryOp::Modulo,
            Opcode::Equals | Opcode::Equals2 | Opcode::StringEquals => BinaryOp::Equal,
            Opcode::StrictEquals => BinaryOp::StrictEqual,
            Opcode::LessThan | Opcode::LessThan2 | Opcode::StringCompare => BinaryOp::Less,
            Opcode::Greater | Opcode::StringGreater => BinaryOp::Greater,
            Opcode::BitwiseAnd => BinaryOp::BitAnd,
            Opcode::BitwiseOr => BinaryOp::BitOr,
            Opcode::BitwiseXor => BinaryOp::BitXor,
            Opcode::ShiftLeft => BinaryOp::ShiftLeft,
            Opcode::ShiftRight => BinaryOp::ShiftRight,
            Opcode::ShiftRight2 => BinaryOp::UnsignedShiftRight,
            Opcode::LogicalAnd => BinaryOp::LogicalAnd,
            Opcode::LogicalOr => BinaryOp::LogicalOr,
            Opcode::InstanceOf => BinaryOp::InstanceOf,
            _ => return None,
        };
        Some(op)
    }
}

impl TranslationRule for ArithmeticRules {
    fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
        if let Some(op) = Self::binary_op(inst.opcode) {
            let rhs = cx.pop();
            let lhs = cx.pop();
            return Ok(Outcome::Push(Expr::binary(op, lhs, rhs)));
        }
        let pushed = match inst.opcode {
            Opcode::LogicalNot => Expr::not(cx.pop()),
            Opcode::Increment => Expr::binary(BinaryOp::Add, cx.pop(), Expr::integer(1)),
            Opcode::Decrement => Expr::binary(BinaryOp::Subtract, cx.pop(), Expr::integer(1)),
            Opcode::TypeOf => Expr::unary(UnaryOp::TypeOf, cx.pop()),
            Opcode::CastOp => {
                let object = cx.pop();
                let class = cx.pop();
                Expr::call(class, vec![object])
            }
            _ => return Ok(Outcome::Unhandled),
        };
        Ok(Outcome::Push(pushed))
    }
}

/// Variables, properties, deletion and enumeration.
pub struct VariableRules;

impl VariableRules {
    fn variable(name: Rc<Expr>) -> Rc<Expr> {
        match name.as_string_literal() {
            Some(path) if path.starts_with('/') => Expr::call(Expr::name("getTarget"), vec![name.clone()]),
            Some(s) => Expr::name(s),
            None if matches!(*name, Expr::Name(_)) => name,
            None => Expr::call(Expr::name("eval"), vec![name]),
        }
    }

    fn property(target: Rc<Expr>, index: &Expr) -> Result<Rc<Expr>, DeasError> {
        let name = index
            .as_count()
            .and_then(|i| PROPERTY_NAMES.get(i))
            .ok_or_else(|| DeasError::MalformedValue(format!("unknown property index `{index}`")))?;
        Ok(Expr::member(target, Expr::string(*name)))
    }
}

impl TranslationRule for VariableRules {
    fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
        let outcome = match inst.opcode {
            Opcode::GetVariable => Outcome::Push(Self::variable(cx.pop())),
            Opcode::SetVariable => {
                let value = cx.pop();
                let target = Self::variable(cx.pop());
                Outcome::Emit(Statement::assign(target, value))
            }
            Opcode::DefineLocal => {
                let value = cx.pop();
                let target = Expr::name(cx.pop_name()?);
                Outcome::Emit(Statement::Assign { target, value, declare: true })
            }
            Opcode::Var => Outcome::Emit(Statement::Declare(cx.pop_name()?)),
            Opcode::Delete => {
                let key = cx.pop();
                let object = cx.pop();
                Outcome::Push(Expr::unary(UnaryOp::Delete, Expr::member(object, key)))
            }
            Opcode::Delete2 => {
                let name = Self::variable(cx.pop());
                Outcome::Push(Expr::unary(UnaryOp::Delete, name))
            }
            Opcode::GetProperty => {
                let index = cx.pop();
                let target = cx.pop();
                Outcome::Push(Self::property(target, &index)?)
            }
            Opcode::SetProperty => {
                let value = cx.pop();
                let index = cx.pop();
                let target = cx.pop();
                Outcome::Emit(Statement::assign(Self::property(target, &index)?, value))
            }
            Opcode::EaGetStringVar | Opcode::EaPushValueOfVar => Outcome::Push(Expr::name(cx.operand_name(inst, 0)?)),
            Opcode::EaSetStringVar => {
                let target = Self::variable(cx.pop());
                Outcome::Emit(Statement::assign(target, cx.operand(inst, 0)?))
            }
            Opcode::EaZeroVar => {
                let target = Self::variable(cx.pop());
                Outcome::Emit(Statement::assign(target, Expr::integer(0)))
            }
            Opcode::Enumerate => {
                let object = Self::variable(cx.pop());
                Outcome::Push(Rc::new(Expr::Enumerate(object)))
            }
            Opcode::Enumerate2 => Outcome::Push(Rc::new(Expr::Enumerate(cx.pop()))),
            _ => Outcome::Unhandled,
        };
        Ok(outcome)
    }
}

/// Members, construction and calls.
pub struct ObjectRules;

impl ObjectRules {
    fn callee(name: Rc<Expr>) -> Rc<Expr> {
        match name.as_string_literal() {
            Some(s) => Expr::name(s),
            None => name,
        }
    }

    fn method(object: Rc<Expr>, name: Rc<Expr>) -> Rc<Expr> {
        if name.is_empty_receiver() { object } else { Expr::member(object, name) }
    }

    /// Plain calls push their value; the `...Pop` forms discard it.
    fn finish(inst: &Instruction, call: Rc<Expr>) -> Outcome {
        match inst.opcode {
            Opcode::EaCallFuncPop | Opcode::EaCallMethodPop | Opcode::EaCallNamedFuncPop | Opcode::EaCallNamedMethodPop => {
                Outcome::Emit(Statement::Expression(call))
            }
            _ => Outcome::Push(call),
        }
    }
}

impl TranslationRule for ObjectRules {
    fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
        let outcome = match inst.opcode {
            Opcode::GetMember => {
                let key = cx.pop();
                let object = cx.pop();
                Outcome::Push(Expr::member(object, key))
            }
            Opcode::SetMember => {
                let value = cx.pop();
                let key = cx.pop();
                let object = cx.pop();
                Outcome::Emit(Statement::assign(Expr::member(object, key), value))
            }
            Opcode::EaGetNamedMember | Opcode::EaGetStringMember => {
                let key = cx.operand(inst, 0)?;
                let object = cx.pop();
                Outcome::Push(Expr::member(object, key))
            }
            Opcode::EaSetStringMember => {
                let key = cx.pop();
                let object = cx.pop();
                Outcome::Emit(Statement::assign(Expr::member(object, key), cx.operand(inst, 0)?))
            }
            Opcode::InitArray => Outcome::Push(Rc::new(Expr::Array(cx.pop_list()?))),
            Opcode::InitObject => {
                let count = cx.pop_count()?;
                let mut pairs: Vec<_> = (0..count)
                    .map(|_| {
                        let value = cx.pop();
                        let key = cx.pop();
                        (key, value)
                    })
                    .collect();
                pairs.reverse();
                Outcome::Push(Rc::new(Expr::Object(pairs)))
            }
            Opcode::NewObject => {
                let callee = Self::callee(cx.pop());
                Outcome::Push(Expr::construct(callee, cx.pop_list()?))
            }
            Opcode::NewMethod => {
                let name = cx.pop();
                let object = cx.pop();
                Outcome::Push(Expr::construct(Self::method(object, name), cx.pop_list()?))
            }
            Opcode::CallFunction | Opcode::EaCallFunc | Opcode::EaCallFuncPop => {
                let callee = Self::callee(cx.pop());
                let call = Expr::call(callee, cx.pop_list()?);
                Self::finish(inst, call)
            }
            Opcode::CallMethod | Opcode::EaCallMethod | Opcode::EaCallMethodPop => {
                let name = cx.pop();
                let object = cx.pop();
                let call = Expr::call(Self::method(object, name), cx.pop_list()?);
                Self::finish(inst, call)
            }
            Opcode::EaCallNamedFunc | Opcode::EaCallNamedFuncPop => {
                let callee = Expr::name(cx.operand_name(inst, 0)?);
                let call = Expr::call(callee, cx.pop_list()?);
                Self::finish(inst, call)
            }
            Opcode::EaCallNamedMethod | Opcode::EaCallNamedMethodPop => {
                let name = cx.operand(inst, 0)?;
                let object = cx.pop();
                let call = Expr::call(Self::method(object, name), cx.pop_list()?);
                Self::finish(inst, call)
            }
            Opcode::Extends => {
                let parent = cx.pop();
                let class = cx.pop();
                let target = Expr::member(Expr::member(class, Expr::string("prototype")), Expr::string("__proto__"));
                Outcome::Emit(Statement::assign(target, Expr::member(parent, Expr::string("prototype"))))
            }
            Opcode::ImplementsOp => {
                let class = cx.pop();
                let interfaces = cx.pop_list()?;
                let callee = Expr::member(class, Expr::string("implements"));
                Outcome::Emit(Statement::Expression(Expr::call(callee, interfaces)))
            }
            _ => Outcome::Unhandled,
        };
        Ok(outcome)
    }
}

/// Movie control, navigation and function exits.
pub struct MovieRules;

impl MovieRules {
    fn call(name: &str, args: Vec<Rc<Expr>>) -> Outcome {
        Outcome::Emit(Statement::Expression(Expr::call(Expr::name(name), args)))
    }
}

impl TranslationRule for MovieRules {
    fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
        let outcome = match inst.opcode {
            Opcode::End | Opcode::Padding => Outcome::Handled,
            Opcode::Return => {
                let value = cx.pop();
                let value = (!matches!(*value, Expr::Literal(Literal::Undefined))).then_some(value);
                Outcome::Emit(Statement::Return(value))
            }
            Opcode::Throw => Outcome::Emit(Statement::Throw(cx.pop())),
            Opcode::Trace => {
                let value = cx.pop();
                Self::call("trace", vec![value])
            }
            Opcode::GetUrl => {
                let url = cx.operand(inst, 0)?;
                let target = cx.operand(inst, 1)?;
                Self::call("getUrl", vec![url, target])
            }
            Opcode::GetUrl2 => {
                let target = cx.pop();
                let url = cx.pop();
                Self::call("loadVariables", vec![url, target])
            }
            Opcode::GotoFrame => {
                let frame = cx.operand(inst, 0)?;
                Self::call("gotoFrame", vec![frame])
            }
            Opcode::GotoFrame2 => {
                let frame = cx.pop();
                let play = cx.operand(inst, 0)?;
                Self::call("gotoFrame", vec![frame, play])
            }
            Opcode::GotoLabel => {
                let label = cx.operand(inst, 0)?;
                Self::call("gotoLabel", vec![label])
            }
            Opcode::SetTarget => {
                let target = cx.operand(inst, 0)?;
                Self::call("setTarget", vec![target])
            }
            Opcode::StartDragMovie => {
                let target = cx.pop();
                let lock = cx.pop();
                let constrained = cx.pop();
                let mut args = vec![target, lock];
                if constrained.is_truthy_literal() {
                    let mut bounds: Vec<_> = (0..4).map(|_| cx.pop()).collect();
                    bounds.reverse();
                    args.extend(bounds);
                }
                Self::call("startDrag", args)
            }
            _ => Outcome::Unhandled,
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        stack: NodeList,
        names: NameTable,
        constants: Vec<Literal>,
        rules: RuleSet,
    }

    impl Harness {
        fn new() -> Self {
            Self { stack: NodeList::new(), names: NameTable::new(), constants: Vec::new(), rules: RuleSet::standard() }
        }

        fn run(&mut self, inst: Instruction) -> Outcome {
            let mut cx = RuleContext { stack: &mut self.stack, names: &mut self.names, constants: &mut self.constants };
            let outcome = self.rules.translate(&mut cx, &inst).unwrap();
            if let Outcome::Push(e) = &outcome {
                self.stack.push(e.clone());
            }
            outcome
        }

        fn push(&mut self, values: Vec<Operand>) {
            self.run(Instruction::push(values));
        }

        fn top(&self) -> String {
            self.stack.top().map(|e| e.to_string()).unwrap_or_default()
        }
    }

    fn emitted(outcome: Outcome) -> String {
        match outcome {
            Outcome::Emit(s) => s.to_string(),
            other => panic!("expected a statement, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_operand_order() {
        let mut h = Harness::new();
        h.push(vec![Operand::Integer(10), Operand::Integer(4)]);
        h.run(Instruction::simple(Opcode::Subtract));
        assert_eq!(h.top(), "10 - 4");
        assert_eq!(h.stack.len(), 1);
    }

    #[test]
    fn test_increment_is_addition() {
        let mut h = Harness::new();
        h.push(vec![Operand::String("i".into())]);
        h.run(Instruction::simple(Opcode::GetVariable));
        h.run(Instruction::simple(Opcode::Increment));
        assert_eq!(h.top(), "i + 1");
    }

    #[test]
    fn test_constant_pool_lookup() {
        let mut h = Harness::new();
        h.run(Instruction::new(
            Opcode::ConstantPool,
            vec![Operand::String("alpha".into()), Operand::String("beta".into())],
        ));
        h.push(vec![Operand::Constant(1)]);
        assert_eq!(h.top(), "\"beta\"");

        let mut cx = RuleContext { stack: &mut h.stack, names: &mut h.names, constants: &mut h.constants };
        let err = h.rules.translate(&mut cx, &Instruction::push(vec![Operand::Constant(5)])).unwrap_err();
        assert!(matches!(err, DeasError::ConstantOutOfRange { index: 5, len: 2 }));
    }

    #[test]
    fn test_set_variable_and_member() {
        let mut h = Harness::new();
        h.push(vec![Operand::String("x".into()), Operand::Integer(3)]);
        assert_eq!(emitted(h.run(Instruction::simple(Opcode::SetVariable))), "x = 3;\n");

        h.push(vec![Operand::String("obj".into())]);
        h.run(Instruction::simple(Opcode::GetVariable));
        h.push(vec![Operand::String("count".into()), Operand::Integer(0)]);
        assert_eq!(emitted(h.run(Instruction::simple(Opcode::SetMember))), "obj.count = 0;\n");
        assert!(h.stack.is_empty());
    }

    #[test]
    fn test_call_function_pops_count_then_args() {
        let mut h = Harness::new();
        h.push(vec![
            Operand::Integer(2),
            Operand::Integer(1),
            Operand::Integer(2),
            Operand::String("max".into()),
        ]);
        h.run(Instruction::simple(Opcode::CallFunction));
        assert_eq!(h.top(), "max(1, 2)");
        assert_eq!(emitted(h.run(Instruction::simple(Opcode::Pop))), "max(1, 2);\n");
    }

    #[test]
    fn test_call_method_forms() {
        let mut h = Harness::new();
        h.push(vec![Operand::Integer(0), Operand::String("mc".into())]);
        h.run(Instruction::simple(Opcode::GetVariable));
        h.push(vec![Operand::String("play".into())]);
        h.run(Instruction::simple(Opcode::CallMethod));
        assert_eq!(h.top(), "mc.play()");

        let mut h = Harness::new();
        h.push(vec![Operand::Integer(0), Operand::String("f".into())]);
        h.run(Instruction::simple(Opcode::GetVariable));
        h.push(vec![Operand::Undefined]);
        h.run(Instruction::simple(Opcode::CallMethod));
        assert_eq!(h.top(), "f()");
    }

    #[test]
    fn test_pop_discards_pure_values() {
        let mut h = Harness::new();
        h.push(vec![Operand::Integer(1)]);
        assert_eq!(h.run(Instruction::simple(Opcode::Pop)), Outcome::Handled);
        assert!(h.stack.is_empty());
    }

    #[test]
    fn test_set_register_keeps_value_visible() {
        let mut h = Harness::new();
        h.names.name_register(1, "total");
        h.push(vec![Operand::Integer(5)]);
        h.run(Instruction::new(Opcode::SetRegister, vec![Operand::Register(1)]));
        assert_eq!(h.top(), "total");
        let statements = h.stack.clone().into_statements();
        assert_eq!(statements[0].to_string(), "total = 5;\n");
    }

    #[test]
    fn test_enumerate_marker_survives_pops() {
        let mut h = Harness::new();
        h.push(vec![Operand::String("obj".into())]);
        h.run(Instruction::simple(Opcode::Enumerate));
        h.run(Instruction::new(Opcode::SetRegister, vec![Operand::Register(0)]));
        assert_eq!(h.top(), "reg0");
        h.run(Instruction::simple(Opcode::Pop));
        h.run(Instruction::simple(Opcode::Pop));
        assert_eq!(h.top(), "enumerate(obj)");
    }

    #[test]
    fn test_property_names() {
        let mut h = Harness::new();
        h.push(vec![Operand::String("".into()), Operand::Integer(0)]);
        h.run(Instruction::simple(Opcode::GetProperty));
        assert_eq!(h.top(), "_x");

        let mut h = Harness::new();
        h.push(vec![Operand::String("mc".into())]);
        h.run(Instruction::simple(Opcode::GetVariable));
        h.push(vec![Operand::Integer(6), Operand::Integer(50)]);
        assert_eq!(emitted(h.run(Instruction::simple(Opcode::SetProperty))), "mc._alpha = 50;\n");
    }

    #[test]
    fn test_slash_path_variable() {
        let mut h = Harness::new();
        h.push(vec![Operand::String("/clip".into())]);
        h.run(Instruction::simple(Opcode::GetVariable));
        assert_eq!(h.top(), "getTarget(\"/clip\")");
    }

    #[test]
    fn test_init_object_keeps_source_order() {
        let mut h = Harness::new();
        h.push(vec![
            Operand::String("a".into()),
            Operand::Integer(1),
            Operand::String("b".into()),
            Operand::Integer(2),
            Operand::Integer(2),
        ]);
        h.run(Instruction::simple(Opcode::InitObject));
        assert_eq!(h.top(), "{ a: 1, b: 2 }");
    }

    #[test]
    fn test_ea_named_call_pop_emits() {
        let mut h = Harness::new();
        h.push(vec![Operand::Integer(0)]);
        let out = h.run(Instruction::new(Opcode::EaCallNamedFuncPop, vec![Operand::String("stop".into())]));
        assert_eq!(emitted(out), "stop();\n");
        assert!(h.stack.is_empty());
    }

    #[test]
    fn test_url_actions() {
        let mut h = Harness::new();
        let get = Instruction::new(
            Opcode::GetUrl,
            vec![Operand::String("page.html".into()), Operand::String("_blank".into())],
        );
        assert_eq!(emitted(h.run(get)), "getUrl(\"page.html\", \"_blank\");\n");

        h.push(vec![Operand::String("data.txt".into()), Operand::String("_root".into())]);
        let load = h.run(Instruction::simple(Opcode::GetUrl2));
        assert_eq!(emitted(load), "loadVariables(\"data.txt\", \"_root\");\n");
        assert!(h.stack.is_empty());
    }

    #[test]
    fn test_return_undefined_is_bare() {
        let mut h = Harness::new();
        h.run(Instruction::simple(Opcode::EaPushUndefined));
        assert_eq!(emitted(h.run(Instruction::simple(Opcode::Return))), "return;\n");
    }

    #[test]
    fn test_custom_rule_takes_priority() {
        struct TraceAsLog;
        impl TranslationRule for TraceAsLog {
            fn translate(&self, cx: &mut RuleContext<'_>, inst: &Instruction) -> Result<Outcome, DeasError> {
                if inst.opcode != Opcode::Trace {
                    return Ok(Outcome::Unhandled);
                }
                let value = cx.pop();
                Ok(Outcome::Emit(Statement::Expression(Expr::call(Expr::name("log"), vec![value]))))
            }
        }

        let mut h = Harness::new();
        h.rules.prepend(TraceAsLog);
        assert_eq!(h.rules.len(), 6);
        h.push(vec![Operand::String("hi".into())]);
        assert_eq!(emitted(h.run(Instruction::simple(Opcode::Trace))), "log(\"hi\");\n");
    }

    #[test]
    fn test_unknown_opcode_unhandled() {
        let mut h = Harness::new();
        assert_eq!(h.run(Instruction::simple(Opcode::Try)), Outcome::Unhandled);
    }
}
