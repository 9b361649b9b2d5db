//! JSON description of a decoded program.
//!
//! ```json
//! {
//!   "constants": [{ "String": "x" }],
//!   "register_names": { "1": "count" },
//!   "code": [
//!     { "opcode": "PushData", "operands": [{ "Constant": 0 }, { "Integer": 1 }] },
//!     { "opcode": "SetVariable" }
//!   ]
//! }
//! ```
//!
//! Positions default to the previous position plus one; branch offsets are
//! relative to the position of the next instruction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DeasError;
use crate::graph::Graph;
use crate::instruction::{FunctionLiteral, Instruction, Opcode, Operand, Parameter, PreloadFlags};
use crate::syntax::Literal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub constants: Vec<Literal>,
    #[serde(default)]
    pub register_names: BTreeMap<u8, String>,
    pub code: Vec<ProgramItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramItem {
    #[serde(default)]
    pub position: Option<usize>,
    pub opcode: Opcode,
    #[serde(default)]
    pub operands: Vec<Operand>,
    #[serde(default)]
    pub function: Option<ProgramFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub preload: PreloadFlags,
    #[serde(default)]
    pub register_names: BTreeMap<u8, String>,
    pub body: Vec<ProgramItem>,
}

impl Program {
    pub fn from_json(json: &[u8]) -> Result<Self, DeasError> {
        Ok(serde_json::from_slice(json)?)
    }

    pub fn graph(&self) -> Result<Graph, DeasError> {
        build_graph(&self.code, &self.register_names)
    }
}

fn build_graph(items: &[ProgramItem], register_names: &BTreeMap<u8, String>) -> Result<Graph, DeasError> {
    let mut positioned = Vec::with_capacity(items.len());
    let mut next = 0usize;
    for item in items {
        let position = item.position.unwrap_or(next);
        next = position + 1;
        positioned.push((position, instruction(item, position)?));
    }
    Ok(Graph::from_instructions(positioned)?.with_register_names(register_names.clone()))
}

fn instruction(item: &ProgramItem, position: usize) -> Result<Instruction, DeasError> {
    match (&item.function, item.opcode.is_function_definition()) {
        (Some(f), true) => {
            let body = build_graph(&f.body, &f.register_names)?;
            let literal = FunctionLiteral::new(f.name.clone(), f.params.clone(), f.preload, body);
            let mut inst = Instruction::define_function(literal);
            inst.opcode = item.opcode;
            inst.operands = item.operands.clone();
            Ok(inst)
        }
        (None, false) => Ok(Instruction::new(item.opcode, item.operands.clone())),
        (None, true) => Err(DeasError::MalformedValue(format!("{} at {position} has no function body", item.opcode))),
        (Some(_), false) => {
            Err(DeasError::MalformedValue(format!("{} at {position} cannot carry a function body", item.opcode)))
        }
    }
}
