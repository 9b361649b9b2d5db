use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Index;

use crate::DeasError;
use crate::instruction::{Instruction, Opcode, Operand};

/// Handle of a block inside its owning [`Graph`]. Ordering follows program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub items: Vec<(usize, Instruction)>,
    pub hierarchy: usize,
    pub next_default: Option<BlockId>,
    pub next_branch: Option<BlockId>,
    pub previous: Option<BlockId>,
}

impl Block {
    fn new(items: Vec<(usize, Instruction)>) -> Self {
        Self { items, hierarchy: 0, next_default: None, next_branch: None, previous: None }
    }

    pub fn last_opcode(&self) -> Option<Opcode> {
        self.items.last().map(|(_, inst)| inst.opcode)
    }

    pub fn has_conditional_branch(&self) -> bool {
        self.next_branch.is_some() && self.last_opcode().is_some_and(Opcode::is_conditional_branch)
    }

    pub fn has_unconditional_branch(&self) -> bool {
        self.next_branch.is_some() && self.last_opcode().is_some_and(Opcode::is_unconditional_branch)
    }

    pub fn has_branch(&self) -> bool {
        self.has_conditional_branch() || self.has_unconditional_branch()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Blocks of one function body in program order, plus register name hints.
#[derive(Debug, Clone)]
pub struct Graph {
    blocks: Vec<Block>,
    pub register_names: BTreeMap<u8, String>,
}

impl Graph {
    /// A body holding a single `End`.
    pub fn empty() -> Self {
        let mut graph = Self {
            blocks: vec![Block::new(vec![(0, Instruction::simple(Opcode::End))])],
            register_names: BTreeMap::new(),
        };
        graph.link(&[None]);
        graph
    }

    /// Partitions a positioned instruction stream into blocks. A block starts at
    /// every branch target and right after every branch. Branch offsets are
    /// relative to the position of the following instruction.
    pub fn from_instructions(mut items: Vec<(usize, Instruction)>) -> Result<Self, DeasError> {
        if items.last().is_none_or(|(_, inst)| inst.opcode != Opcode::End) {
            let pos = items.last().map_or(0, |(p, _)| p + 1);
            items.push((pos, Instruction::simple(Opcode::End)));
        }

        let index_of: HashMap<usize, usize> = items.iter().enumerate().map(|(i, (pos, _))| (*pos, i)).collect();
        let mut leaders: BTreeSet<usize> = BTreeSet::new();
        leaders.insert(0);
        let mut targets: Vec<Option<usize>> = vec![None; items.len()];
        for (i, (pos, inst)) in items.iter().enumerate() {
            if !inst.opcode.is_branch() {
                continue;
            }
            let offset = inst
                .operand(0)
                .and_then(Operand::as_integer)
                .ok_or(DeasError::MissingBranchOperand { position: *pos })?;
            let base = items.get(i + 1).map_or(pos + 1, |(p, _)| *p) as i64;
            let target = base + i64::from(offset);
            let idx = usize::try_from(target)
                .ok()
                .and_then(|t| index_of.get(&t).copied())
                .ok_or(DeasError::InvalidBranchTarget { position: *pos, target })?;
            targets[i] = Some(idx);
            leaders.insert(idx);
            if i + 1 < items.len() {
                leaders.insert(i + 1);
            }
        }

        let mut blocks: Vec<Block> = Vec::new();
        let mut last_index: Vec<usize> = Vec::new();
        let mut block_of: HashMap<usize, usize> = HashMap::new();
        for (i, item) in items.into_iter().enumerate() {
            if leaders.contains(&i) {
                block_of.insert(i, blocks.len());
                blocks.push(Block::new(Vec::new()));
                last_index.push(i);
            }
            if let (Some(block), Some(last)) = (blocks.last_mut(), last_index.last_mut()) {
                block.items.push(item);
                *last = i;
            }
        }

        let branches: Vec<Option<usize>> = last_index
            .iter()
            .map(|&i| targets[i].and_then(|t| block_of.get(&t).copied()))
            .collect();
        let mut graph = Self { blocks, register_names: BTreeMap::new() };
        graph.link(&branches);
        Ok(graph)
    }

    pub fn with_register_names(mut self, names: BTreeMap<u8, String>) -> Self {
        self.register_names.extend(names);
        self
    }

    fn link(&mut self, branches: &[Option<usize>]) {
        let n = self.blocks.len();
        for (k, block) in self.blocks.iter_mut().enumerate() {
            block.hierarchy = k;
            block.previous = k.checked_sub(1).map(BlockId);
            block.next_default = (k + 1 < n).then_some(BlockId(k + 1));
            block.next_branch = branches.get(k).copied().flatten().map(BlockId);
        }
    }

    pub fn base_block(&self) -> BlockId {
        BlockId(0)
    }

    pub fn last_block(&self) -> BlockId {
        BlockId(self.blocks.len().saturating_sub(1))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId(i), b))
    }

    /// Control-flow successors, as opposed to `next_default`, which is program order.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let block = self.block(id);
        match block.last_opcode() {
            Some(op) if op.is_unconditional_branch() => block.next_branch.into_iter().collect(),
            Some(op) if op.is_conditional_branch() => {
                let mut succs: Vec<BlockId> = block.next_default.into_iter().collect();
                if let Some(t) = block.next_branch.filter(|t| !succs.contains(t)) {
                    succs.push(t);
                }
                succs
            }
            Some(op) if op.terminates() => Vec::new(),
            _ => block.next_default.into_iter().collect(),
        }
    }

    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (id, _) in self.blocks() {
            for succ in self.successors(id) {
                preds[succ.0].push(id);
            }
        }
        preds
    }

    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent);
        for (id, block) in self.blocks() {
            out.push_str(&format!("{pad}block {id} (hierarchy {})", block.hierarchy));
            if let Some(n) = block.next_default {
                out.push_str(&format!(" default {n}"));
            }
            if let Some(t) = block.next_branch {
                out.push_str(&format!(" branch {t}"));
            }
            out.push('\n');
            for (pos, inst) in &block.items {
                out.push_str(&format!("{pad}  {pos:04}: 0x{:02x} {inst}\n", inst.opcode.code()));
                if let Some(func) = &inst.function {
                    func.body.disassemble_into(out, indent + 4);
                }
            }
        }
    }
}

impl Index<BlockId> for Graph {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        self.block(id)
    }
}

/// Assembles a graph from blocks that are already partitioned, the way a
/// decoder that tracks its own labels would hand them over.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    blocks: Vec<Vec<Instruction>>,
    branches: BTreeMap<usize, usize>,
    register_names: BTreeMap<u8, String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, items: Vec<Instruction>) -> BlockId {
        self.blocks.push(items);
        BlockId(self.blocks.len() - 1)
    }

    /// Points the branch that ends `from` at `to`.
    pub fn branch(&mut self, from: BlockId, to: BlockId) -> &mut Self {
        self.branches.insert(from.0, to.0);
        self
    }

    pub fn register_name(&mut self, register: u8, name: impl Into<String>) -> &mut Self {
        self.register_names.insert(register, name.into());
        self
    }

    pub fn build(self) -> Result<Graph, DeasError> {
        if self.blocks.is_empty() {
            return Ok(Graph::empty().with_register_names(self.register_names));
        }
        let n = self.blocks.len();
        let mut position = 0usize;
        let mut blocks = Vec::with_capacity(n);
        let mut branches = Vec::with_capacity(n);
        for (k, items) in self.blocks.into_iter().enumerate() {
            let ends_in_branch = items.last().is_some_and(|inst| inst.opcode.is_branch());
            let target = self.branches.get(&k).copied();
            let last_position = position + items.len().saturating_sub(1);
            match (ends_in_branch, target) {
                (true, None) => return Err(DeasError::MissingBranchOperand { position: last_position }),
                (false, Some(_)) => {
                    return Err(DeasError::MalformedValue(format!(
                        "block #{k} has a branch target but does not end in a branch"
                    )));
                }
                (true, Some(t)) if t >= n => {
                    return Err(DeasError::InvalidBranchTarget { position: last_position, target: t as i64 });
                }
                _ => {}
            }
            let positioned = items
                .into_iter()
                .map(|inst| {
                    let p = position;
                    position += 1;
                    (p, inst)
                })
                .collect();
            blocks.push(Block::new(positioned));
            branches.push(target);
        }
        let mut graph = Graph { blocks, register_names: self.register_names };
        graph.link(&branches);
        Ok(graph)
    }
}
