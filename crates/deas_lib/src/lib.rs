//! ActionScript 2 bytecode decompiler.
//!
//! The pipeline runs in three passes over a [`Graph`] of basic blocks:
//! [`structure`] turns the flat graph into a tree of chain nodes,
//! [`reconstruct`] simulates the operand stack over that tree to build
//! statements, and [`printer`] renders them as source text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod dominators;
pub mod graph;
pub mod instruction;
pub mod naming;
pub mod printer;
pub mod program;
pub mod reconstruct;
pub mod rules;
pub mod structure;
pub mod syntax;

pub use graph::{Block, BlockId, Graph, GraphBuilder};
pub use instruction::{FunctionLiteral, Instruction, Opcode, Operand, Parameter, PreloadFlags};
pub use program::Program;
pub use rules::{Outcome, RuleContext, RuleSet, TranslationRule};
pub use structure::{Chain, ChainKind, StructuredBody};
pub use syntax::{Expr, Literal, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecompileMode {
    #[default]
    Pseudo,
    /// The chain tree of every function body.
    Structure,
    Disasm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: DecompileMode,
    pub indent_width: usize,
    /// Function literals start from the enclosing function's register names.
    pub inherit_register_names: bool,
    /// Reject graphs with multi-entry loops before structuring.
    pub check_reducibility: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            mode: DecompileMode::Pseudo,
            indent_width: 4,
            inherit_register_names: false,
            check_reducibility: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeasError {
    #[error("block {block} branches to block {target} before the range start {start}")]
    BranchBeforeRange { block: usize, target: usize, start: usize },

    #[error("block {block} branches backward to block {target} outside of a loop")]
    BackwardBranch { block: usize, target: usize },

    #[error("block {block} branches to block {target} past the range end {end}")]
    BranchOutOfRange { block: usize, target: usize, end: usize },

    #[error("loop at block {header} exits to both block {first} and block {second}")]
    AmbiguousLoopExit { header: usize, first: usize, second: usize },

    #[error("loop at block {header} is entered at block {block} without passing its header")]
    IrreducibleLoop { header: usize, block: usize },

    #[error("no condition on the stack at the end of block {block}")]
    MissingCondition { block: usize },

    #[error("unsupported instruction: {0}")]
    UnsupportedInstruction(Opcode),

    #[error("malformed value: {0}")]
    MalformedValue(String),

    #[error("constant pool index {index} out of range (pool size {len})")]
    ConstantOutOfRange { index: u16, len: usize },

    #[error("invalid branch target {target} at position {position}")]
    InvalidBranchTarget { position: usize, target: i64 },

    #[error("branch at position {position} has no offset operand")]
    MissingBranchOperand { position: usize },

    #[error("invalid program description: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeasError {
    /// Errors raised because the control flow has a shape the structurer
    /// cannot express.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DeasError::BranchBeforeRange { .. }
                | DeasError::BackwardBranch { .. }
                | DeasError::BranchOutOfRange { .. }
                | DeasError::AmbiguousLoopExit { .. }
                | DeasError::IrreducibleLoop { .. }
                | DeasError::MissingCondition { .. }
        )
    }
}

pub struct Decompiler {
    options: DecompileOptions,
    rules: RuleSet,
    constants: Vec<Literal>,
}

impl Default for Decompiler {
    fn default() -> Self {
        Self::new(DecompileOptions::default())
    }
}

impl Decompiler {
    pub fn new(options: DecompileOptions) -> Self {
        Self { options, rules: RuleSet::standard(), constants: Vec::new() }
    }

    /// Adds a rule that runs before the standard ones.
    pub fn with_rule(mut self, rule: impl TranslationRule + 'static) -> Self {
        self.rules.prepend(rule);
        self
    }

    /// Initial constant pool, replaced by any `ConstantPool` instruction.
    pub fn with_constants(mut self, constants: Vec<Literal>) -> Self {
        self.constants = constants;
        self
    }

    pub fn options(&self) -> &DecompileOptions {
        &self.options
    }

    pub fn decompile(&self, graph: &Graph) -> Result<String, DeasError> {
        self.run(graph, &self.constants)
    }

    /// Decompiles a program description. Its own constant pool, when it has
    /// one, takes the place of the configured pool.
    pub fn decompile_program(&self, program: &Program) -> Result<String, DeasError> {
        let graph = program.graph()?;
        if program.constants.is_empty() {
            self.run(&graph, &self.constants)
        } else {
            self.run(&graph, &program.constants)
        }
    }

    fn run(&self, graph: &Graph, constants: &[Literal]) -> Result<String, DeasError> {
        if self.options.mode == DecompileMode::Disasm {
            return Ok(graph.disassemble());
        }
        if self.options.check_reducibility {
            check_reducibility(graph)?;
        }

        let body = structure::structure(graph)?;
        log::debug!("structured {} blocks", graph.len());

        if self.options.mode == DecompileMode::Structure {
            let mut out = String::new();
            describe_body(&body, &mut out);
            return Ok(out);
        }
        let statements = reconstruct::Reconstructor::new(&self.rules)
            .inherit_register_names(self.options.inherit_register_names)
            .reconstruct(graph, &body, constants.to_vec())?;
        Ok(printer::print_statements(&statements, self.options.indent_width))
    }
}

fn check_reducibility(graph: &Graph) -> Result<(), DeasError> {
    dominators::DominatorSets::compute(graph).check_back_edges(graph)?;
    for (_, block) in graph.blocks() {
        for (_, inst) in &block.items {
            if let Some(func) = &inst.function {
                check_reducibility(&func.body)?;
            }
        }
    }
    Ok(())
}

fn describe_body(body: &StructuredBody, out: &mut String) {
    out.push_str(&body.chain.describe());
    for (at, function) in &body.functions {
        out.push_str(&format!("function at {}:{}\n", at.block, at.index));
        describe_body(function, out);
    }
}

pub fn decompile(graph: &Graph) -> Result<String, DeasError> {
    Decompiler::default().decompile(graph)
}

pub fn decompile_with_options(graph: &Graph, options: DecompileOptions) -> Result<String, DeasError> {
    Decompiler::new(options).decompile(graph)
}

/// Decompiles a JSON program description (see [`program`]).
pub fn decompile_json(json: &[u8], options: DecompileOptions) -> Result<String, DeasError> {
    let program = Program::from_json(json)?;
    Decompiler::new(options).decompile_program(&program)
}
