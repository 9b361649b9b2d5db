use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::graph::Graph;

/// ActionScript 2 action codes, including the EA extension range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    End = 0x00,
    NextFrame = 0x04,
    PrevFrame = 0x05,
    Play = 0x06,
    Stop = 0x07,
    ToggleQuality = 0x08,
    StopSounds = 0x09,
    Add = 0x0A,
    Subtract = 0x0B,
    Multiply = 0x0C,
    Divide = 0x0D,
    Equals = 0x0E,
    LessThan = 0x0F,
    LogicalAnd = 0x10,
    LogicalOr = 0x11,
    LogicalNot = 0x12,
    StringEquals = 0x13,
    StringLength = 0x14,
    SubString = 0x15,
    Pop = 0x17,
    ToInteger = 0x18,
    GetVariable = 0x1C,
    SetVariable = 0x1D,
    SetTarget2 = 0x20,
    StringConcat = 0x21,
    GetProperty = 0x22,
    SetProperty = 0x23,
    CloneSprite = 0x24,
    RemoveSprite = 0x25,
    Trace = 0x26,
    StartDragMovie = 0x27,
    StopDragMovie = 0x28,
    StringCompare = 0x29,
    Throw = 0x2A,
    CastOp = 0x2B,
    ImplementsOp = 0x2C,
    Random = 0x30,
    MbLength = 0x31,
    Ord = 0x32,
    Chr = 0x33,
    GetTime = 0x34,
    MbSubString = 0x35,
    MbOrd = 0x36,
    MbChr = 0x37,
    Delete = 0x3A,
    Delete2 = 0x3B,
    DefineLocal = 0x3C,
    CallFunction = 0x3D,
    Return = 0x3E,
    Modulo = 0x3F,
    NewObject = 0x40,
    Var = 0x41,
    InitArray = 0x42,
    InitObject = 0x43,
    TypeOf = 0x44,
    TargetPath = 0x45,
    Enumerate = 0x46,
    Add2 = 0x47,
    LessThan2 = 0x48,
    Equals2 = 0x49,
    ToNumber = 0x4A,
    ToString = 0x4B,
    PushDuplicate = 0x4C,
    StackSwap = 0x4D,
    GetMember = 0x4E,
    SetMember = 0x4F,
    Increment = 0x50,
    Decrement = 0x51,
    CallMethod = 0x52,
    NewMethod = 0x53,
    InstanceOf = 0x54,
    Enumerate2 = 0x55,
    EaPushThis = 0x56,
    EaPushGlobal = 0x58,
    EaPushZero = 0x59,
    EaPushOne = 0x5A,
    EaCallFuncPop = 0x5B,
    EaCallFunc = 0x5C,
    EaCallMethodPop = 0x5D,
    EaCallMethod = 0x5E,
    BitwiseAnd = 0x60,
    BitwiseOr = 0x61,
    BitwiseXor = 0x62,
    ShiftLeft = 0x63,
    ShiftRight = 0x64,
    ShiftRight2 = 0x65,
    StrictEquals = 0x66,
    Greater = 0x67,
    StringGreater = 0x68,
    Extends = 0x69,
    EaPushThisVar = 0x70,
    EaPushGlobalVar = 0x71,
    EaZeroVar = 0x72,
    EaPushTrue = 0x73,
    EaPushFalse = 0x74,
    EaPushNull = 0x75,
    EaPushUndefined = 0x76,
    TraceStart = 0x77,
    GotoFrame = 0x81,
    GetUrl = 0x83,
    SetRegister = 0x87,
    ConstantPool = 0x88,
    WaitForFrame = 0x8A,
    SetTarget = 0x8B,
    GotoLabel = 0x8C,
    WaitForFrameExpr = 0x8D,
    DefineFunction2 = 0x8E,
    Try = 0x8F,
    With = 0x94,
    PushData = 0x96,
    BranchAlways = 0x99,
    GetUrl2 = 0x9A,
    DefineFunction = 0x9B,
    BranchIfTrue = 0x9D,
    CallFrame = 0x9E,
    GotoFrame2 = 0x9F,
    EaPushString = 0xA1,
    EaPushConstantByte = 0xA2,
    EaPushConstantWord = 0xA3,
    EaGetStringVar = 0xA4,
    EaGetStringMember = 0xA5,
    EaSetStringVar = 0xA6,
    EaSetStringMember = 0xA7,
    EaPushValueOfVar = 0xAE,
    EaGetNamedMember = 0xAF,
    EaCallNamedFuncPop = 0xB0,
    EaCallNamedFunc = 0xB1,
    EaCallNamedMethodPop = 0xB2,
    EaCallNamedMethod = 0xB3,
    EaPushFloat = 0xB4,
    EaPushByte = 0xB5,
    EaPushShort = 0xB6,
    EaPushLong = 0xB7,
    EaBranchIfFalse = 0xB8,
    EaPushRegister = 0xB9,
    Padding = 0xFF,
}

impl Opcode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_conditional_branch(self) -> bool {
        matches!(self, Opcode::BranchIfTrue | Opcode::EaBranchIfFalse)
    }

    pub fn is_unconditional_branch(self) -> bool {
        self == Opcode::BranchAlways
    }

    pub fn is_branch(self) -> bool {
        self.is_conditional_branch() || self.is_unconditional_branch()
    }

    /// Control never falls out of these.
    pub fn terminates(self) -> bool {
        matches!(self, Opcode::Return | Opcode::Throw | Opcode::End)
    }

    pub fn is_function_definition(self) -> bool {
        matches!(self, Opcode::DefineFunction | Opcode::DefineFunction2)
    }

    /// Fixed stack effect `(pops, pushes)` and the builtin the action corresponds to,
    /// for actions simple enough to be rendered as a plain call.
    pub fn fixed_effect(self) -> Option<(usize, usize, &'static str)> {
        let effect = match self {
            Opcode::NextFrame => (0, 0, "nextFrame"),
            Opcode::PrevFrame => (0, 0, "prevFrame"),
            Opcode::Play => (0, 0, "play"),
            Opcode::Stop => (0, 0, "stop"),
            Opcode::ToggleQuality => (0, 0, "toggleHighQuality"),
            Opcode::StopSounds => (0, 0, "stopAllSounds"),
            Opcode::StopDragMovie => (0, 0, "stopDrag"),
            Opcode::StringLength => (1, 1, "length"),
            Opcode::SubString => (3, 1, "substring"),
            Opcode::ToInteger => (1, 1, "int"),
            Opcode::ToNumber => (1, 1, "Number"),
            Opcode::ToString => (1, 1, "String"),
            Opcode::SetTarget2 => (1, 0, "setTarget"),
            Opcode::CloneSprite => (3, 0, "duplicateMovieClip"),
            Opcode::RemoveSprite => (1, 0, "removeMovieClip"),
            Opcode::Random => (1, 1, "random"),
            Opcode::MbLength => (1, 1, "mblength"),
            Opcode::Ord => (1, 1, "ord"),
            Opcode::Chr => (1, 1, "chr"),
            Opcode::GetTime => (0, 1, "getTimer"),
            Opcode::MbSubString => (3, 1, "mbsubstring"),
            Opcode::MbOrd => (1, 1, "mbord"),
            Opcode::MbChr => (1, 1, "mbchr"),
            Opcode::TargetPath => (1, 1, "targetPath"),
            Opcode::CallFrame => (1, 0, "call"),
            _ => return None,
        };
        Some(effect)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An immediate operand, already resolved by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    String(String),
    Integer(i32),
    Float(f64),
    Boolean(bool),
    Constant(u16),
    Register(u8),
    Null,
    Undefined,
}

impl Operand {
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Operand::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Operand::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::String(s) => write!(f, "{s:?}"),
            Operand::Integer(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v:?}"),
            Operand::Boolean(b) => write!(f, "{b}"),
            Operand::Constant(i) => write!(f, "const[{i}]"),
            Operand::Register(r) => write!(f, "reg[{r}]"),
            Operand::Null => write!(f, "null"),
            Operand::Undefined => write!(f, "undefined"),
        }
    }
}

bitflags! {
    /// Registers a `DefineFunction2` body gets populated with on entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct PreloadFlags: u32 {
        const GLOBAL = 0x0001;
        const THIS = 0x0100;
        const ARGUMENTS = 0x0400;
        const SUPER = 0x1000;
        const ROOT = 0x4000;
        const PARENT = 0x8000;
        const EXTERN = 0x01_0000;
    }
}

impl PreloadFlags {
    /// Preloaded names in register order.
    pub fn names(self) -> Vec<&'static str> {
        [
            (PreloadFlags::THIS, "this"),
            (PreloadFlags::ARGUMENTS, "arguments"),
            (PreloadFlags::SUPER, "super"),
            (PreloadFlags::ROOT, "_root"),
            (PreloadFlags::PARENT, "_parent"),
            (PreloadFlags::GLOBAL, "_global"),
            (PreloadFlags::EXTERN, "extern"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// `None` (or register 0) means the argument lives in a named variable.
    #[serde(default)]
    pub register: Option<u8>,
}

/// Body of a `DefineFunction`/`DefineFunction2` action.
#[derive(Debug, Clone)]
pub struct FunctionLiteral {
    pub name: String,
    pub params: Vec<Parameter>,
    pub preload: PreloadFlags,
    pub body: Graph,
}

impl FunctionLiteral {
    /// Builds the literal and seeds the body's register hints from the preload
    /// flags and the register-bound parameters.
    pub fn new(name: impl Into<String>, params: Vec<Parameter>, preload: PreloadFlags, mut body: Graph) -> Self {
        let mut hints = preload_register_names(preload);
        for p in &params {
            if let Some(reg) = p.register.filter(|r| *r != 0) {
                hints.insert(reg, p.name.clone());
            }
        }
        for (reg, name) in hints {
            body.register_names.entry(reg).or_insert(name);
        }
        Self { name: name.into(), params, preload, body }
    }

    pub fn is_statement(&self) -> bool {
        !self.name.is_empty()
    }
}

fn preload_register_names(preload: PreloadFlags) -> BTreeMap<u8, String> {
    preload
        .names()
        .into_iter()
        .enumerate()
        .map(|(i, name)| ((i + 1) as u8, name.to_string()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub function: Option<Box<FunctionLiteral>>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, operands, function: None }
    }

    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, Vec::new())
    }

    pub fn push(values: Vec<Operand>) -> Self {
        Self::new(Opcode::PushData, values)
    }

    pub fn branch(opcode: Opcode, offset: i32) -> Self {
        Self::new(opcode, vec![Operand::Integer(offset)])
    }

    pub fn define_function(literal: FunctionLiteral) -> Self {
        let opcode = if literal.preload.is_empty() && literal.params.iter().all(|p| p.register.is_none()) {
            Opcode::DefineFunction
        } else {
            Opcode::DefineFunction2
        };
        Self { opcode, operands: Vec::new(), function: Some(Box::new(literal)) }
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        if let Some(func) = &self.function {
            let params: Vec<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
            write!(f, " {}({}) [{} blocks]", func.name, params.join(", "), func.body.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_codes() {
        assert_eq!(Opcode::PushData.code(), 0x96);
        assert_eq!(Opcode::EaBranchIfFalse.code(), 0xB8);
        assert_eq!(Opcode::Padding.code(), 0xFF);
    }

    #[test]
    fn test_branch_classification() {
        assert!(Opcode::BranchIfTrue.is_conditional_branch());
        assert!(Opcode::EaBranchIfFalse.is_conditional_branch());
        assert!(Opcode::BranchAlways.is_unconditional_branch());
        assert!(!Opcode::Return.is_branch());
    }

    #[test]
    fn test_preload_names_follow_register_order() {
        let flags = PreloadFlags::GLOBAL | PreloadFlags::THIS | PreloadFlags::ROOT;
        assert_eq!(flags.names(), vec!["this", "_root", "_global"]);
    }

    #[test]
    fn test_function_literal_register_hints() {
        let params = vec![
            Parameter { name: "x".into(), register: Some(3) },
            Parameter { name: "y".into(), register: None },
        ];
        let literal = FunctionLiteral::new("f", params, PreloadFlags::THIS | PreloadFlags::ARGUMENTS, Graph::empty());
        let names = &literal.body.register_names;
        assert_eq!(names.get(&1).map(String::as_str), Some("this"));
        assert_eq!(names.get(&2).map(String::as_str), Some("arguments"));
        assert_eq!(names.get(&3).map(String::as_str), Some("x"));
        assert!(literal.is_statement());
    }
}
