//! Control-flow structuring.
//!
//! A block range is decomposed into a tree of chain nodes. `Sequential`
//! nodes are straight-line runs (or carry a `subchain` when structure was found
//! inside them), `Loop` nodes own a header chain and a body chain, and `Case`
//! nodes own the condition block, the fallthrough ("true") chain and the
//! branch-target ("false") chain.
//!
//! ```text
//!   loop                          case
//!   ────                          ────
//!   ┌──────────┐                  ┌──────────┐
//!   │ header   │──exit─┐          │ cond     │──taken──┐
//!   └────┬─────┘       │          └────┬─────┘         │
//!        ▼             │               ▼               ▼
//!   ┌──────────┐       │          ┌──────────┐   ┌──────────┐
//!   │ body ... │       │          │ true     │   │ false    │
//!   └────┬─────┘       │          └────┬─────┘   └────┬─────┘
//!        └─back-edge   │               └──skip──┐     │
//!                      ▼                        ▼     ▼
//!                 next sibling                next sibling (join)
//! ```
//!
//! Loops are found first by scanning backward for unconditional back-edges,
//! then the range is walked forward and every loop header and two-way branch
//! is replaced by a structured node, recursing into the sub-ranges.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DeasError;
use crate::graph::{BlockId, Graph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainKind {
    Sequential,
    Loop,
    Case,
}

/// Jump out of (or back to the top of) the innermost loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopJump {
    Break,
    Continue,
}

impl fmt::Display for LoopJump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopJump::Break => write!(f, "break"),
            LoopJump::Continue => write!(f, "continue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub start: BlockId,
    /// Inclusive; `None` runs to the end of the graph.
    pub end: Option<BlockId>,
    pub kind: ChainKind,
    /// `Case`: condition, true, false. `Loop`: header, body.
    pub children: Vec<Chain>,
    pub next: Option<Box<Chain>>,
    pub subchain: Option<Box<Chain>>,
    pub empty: bool,
    /// Set on an empty chain standing for a conditional `break`/`continue`.
    pub jump: Option<LoopJump>,
}

impl Chain {
    pub fn sequential(start: BlockId, end: Option<BlockId>) -> Self {
        Self {
            start,
            end,
            kind: ChainKind::Sequential,
            children: Vec::new(),
            next: None,
            subchain: None,
            empty: false,
            jump: None,
        }
    }

    pub fn empty_at(block: BlockId) -> Self {
        Self { empty: true, ..Self::sequential(block, Some(block)) }
    }

    fn jump_at(block: BlockId, jump: LoopJump) -> Self {
        Self { jump: Some(jump), ..Self::empty_at(block) }
    }

    fn node(kind: ChainKind, start: BlockId, end: BlockId, children: Vec<Chain>) -> Self {
        Self { kind, children, ..Self::sequential(start, Some(end)) }
    }

    pub fn last_block(&self, graph: &Graph) -> BlockId {
        self.end.unwrap_or_else(|| graph.last_block())
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == ChainKind::Sequential && self.subchain.is_none()
    }

    /// This node followed by its `next` continuations.
    pub fn siblings(&self) -> Siblings<'_> {
        Siblings { current: Some(self) }
    }

    /// Ranges of the non-empty leaves under this node, in program order.
    pub fn leaf_ranges(&self, graph: &Graph) -> Vec<(BlockId, BlockId)> {
        let mut out = Vec::new();
        self.collect_leaves(graph, &mut out);
        out
    }

    fn collect_leaves(&self, graph: &Graph, out: &mut Vec<(BlockId, BlockId)>) {
        if self.empty {
            return;
        }
        match (self.kind, &self.subchain) {
            (ChainKind::Sequential, Some(sub)) => {
                for chain in sub.siblings() {
                    chain.collect_leaves(graph, out);
                }
            }
            (ChainKind::Sequential, None) => out.push((self.start, self.last_block(graph))),
            _ => {
                for child in &self.children {
                    child.collect_leaves(graph, out);
                }
            }
        }
    }

    /// Indented dump of the tree, one node per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, indent: usize) {
        out.push_str(&format!("{}{self}\n", " ".repeat(indent)));
        for child in &self.children {
            child.describe_into(out, indent + 2);
        }
        if let Some(sub) = &self.subchain {
            for chain in sub.siblings() {
                chain.describe_into(out, indent + 2);
            }
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            return match self.jump {
                Some(jump) => write!(f, "{:?} ({jump})", self.kind),
                None => write!(f, "{:?} (empty)", self.kind),
            };
        }
        match self.end {
            Some(end) => write!(f, "{:?} [{}, {}]", self.kind, self.start, end),
            None => write!(f, "{:?} [{}, end]", self.kind, self.start),
        }
    }
}

pub struct Siblings<'a> {
    current: Option<&'a Chain>,
}

impl<'a> Iterator for Siblings<'a> {
    type Item = &'a Chain;

    fn next(&mut self) -> Option<&'a Chain> {
        let chain = self.current?;
        self.current = chain.next.as_deref();
        Some(chain)
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopFrame {
    header: BlockId,
    exit: Option<BlockId>,
}

/// State shared by every recursive call of one structuring pass. Callers only
/// ever append to the jump lists.
#[derive(Debug, Default)]
pub struct StructuringSession {
    pub continues: Vec<BlockId>,
    pub breaks: Vec<BlockId>,
    frames: Vec<LoopFrame>,
}

impl StructuringSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_active_header(&self, block: BlockId) -> bool {
        self.frames.iter().any(|f| f.header == block)
    }

    fn is_loop_target(&self, block: BlockId) -> bool {
        self.frames.iter().any(|f| f.header == block || f.exit == Some(block))
    }

    fn innermost(&self) -> Option<LoopFrame> {
        self.frames.last().copied()
    }
}

/// Position of an instruction inside a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstructionRef {
    pub block: BlockId,
    pub index: usize,
}

/// A structured function body plus the bodies of the function literals it
/// defines, keyed by the defining instruction.
#[derive(Debug, Clone)]
pub struct StructuredBody {
    pub chain: Chain,
    pub continues: Vec<BlockId>,
    pub breaks: Vec<BlockId>,
    pub functions: BTreeMap<InstructionRef, StructuredBody>,
}

impl StructuredBody {
    pub fn function(&self, at: InstructionRef) -> Option<&StructuredBody> {
        self.functions.get(&at)
    }
}

/// Structures a whole body, nested function literals first.
pub fn structure(graph: &Graph) -> Result<StructuredBody, DeasError> {
    let mut functions = BTreeMap::new();
    for (block, b) in graph.blocks() {
        for (index, (_, inst)) in b.items.iter().enumerate() {
            if let Some(func) = &inst.function {
                functions.insert(InstructionRef { block, index }, structure(&func.body)?);
            }
        }
    }
    let mut session = StructuringSession::new();
    let chain = structure_range(graph, graph.base_block(), None, &mut session)?;
    Ok(StructuredBody { chain, continues: session.continues, breaks: session.breaks, functions })
}

pub fn structure_range(
    graph: &Graph,
    start: BlockId,
    end: Option<BlockId>,
    session: &mut StructuringSession,
) -> Result<Chain, DeasError> {
    let last = end.unwrap_or_else(|| graph.last_block());
    if last < start {
        return Ok(Chain::empty_at(start));
    }
    let loops = discover_loops(graph, start, last, session);

    let mut segments: Vec<Chain> = Vec::new();
    let mut segment_start = Some(start);
    let mut cursor = Some(start);
    while let Some(b) = cursor.filter(|b| *b <= last) {
        let node = if let Some(&loop_end) = loops.get(&b) {
            structure_loop(graph, b, loop_end, last, session)?
        } else if graph[b].has_conditional_branch() {
            structure_case(graph, start, last, b, session)?
        } else {
            cursor = advance(graph, b, &loops);
            continue;
        };
        if let Some(from) = segment_start.filter(|from| *from < b) {
            segments.push(Chain::sequential(from, graph[b].previous));
        }
        let after = node.end.and_then(|e| graph[e].next_default);
        segments.push(node);
        segment_start = after;
        cursor = after;
    }

    if segments.is_empty() {
        return Ok(Chain::sequential(start, end));
    }
    if let Some(from) = segment_start.filter(|from| *from <= last) {
        segments.push(Chain::sequential(from, Some(last)));
    }
    let mut head: Option<Box<Chain>> = None;
    for mut segment in segments.into_iter().rev() {
        segment.next = head.take();
        head = Some(Box::new(segment));
    }
    Ok(Chain { subchain: head, ..Chain::sequential(start, end) })
}

/// Backward scan for unconditional back-edges. Returns header -> loop end.
fn discover_loops(
    graph: &Graph,
    start: BlockId,
    last: BlockId,
    session: &StructuringSession,
) -> BTreeMap<BlockId, BlockId> {
    let mut loops = BTreeMap::new();
    let mut cursor = Some(last);
    while let Some(b) = cursor.filter(|b| *b >= start) {
        let block = &graph[b];
        if block.has_unconditional_branch() {
            let header = block
                .next_branch
                .filter(|t| *t >= start && *t < b && !session.is_active_header(*t));
            if let Some(t) = header {
                loops.insert(t, b);
                cursor = graph[t].previous;
                continue;
            }
        }
        cursor = block.previous;
    }
    loops
}

/// Target of a forward unconditional jump over at least one block.
pub(crate) fn skip_target(graph: &Graph, b: BlockId) -> Option<BlockId> {
    let block = &graph[b];
    if !block.has_unconditional_branch() {
        return None;
    }
    let next = block.next_default?;
    block.next_branch.filter(|t| *t > next)
}

fn advance(graph: &Graph, b: BlockId, loops: &BTreeMap<BlockId, BlockId>) -> Option<BlockId> {
    if let Some(t) = skip_target(graph, b)
        .filter(|t| !loops.keys().any(|h| *h > b && h < t))
    {
        return Some(t);
    }
    graph[b].next_default
}

fn structure_loop(
    graph: &Graph,
    header: BlockId,
    loop_end: BlockId,
    last: BlockId,
    session: &mut StructuringSession,
) -> Result<Chain, DeasError> {
    let mut end = loop_end;
    let mut exit: Option<BlockId> = None;
    let mut cursor = Some(header);
    while let Some(i) = cursor.filter(|i| *i <= end) {
        let block = &graph[i];
        if let Some(target) = block.next_branch {
            if target == header {
                session.continues.push(i);
            } else if target > end {
                if let Some(first) = exit.filter(|e| *e != target) {
                    return Err(DeasError::AmbiguousLoopExit {
                        header: header.index(),
                        first: first.index(),
                        second: target.index(),
                    });
                }
                exit = Some(target);
                session.breaks.push(i);
                if let Some(prev) = graph[target].previous {
                    end = prev.min(last);
                }
            } else if target < header && !session.is_loop_target(target) {
                return Err(DeasError::BranchBeforeRange {
                    block: i.index(),
                    target: target.index(),
                    start: header.index(),
                });
            }
        }
        cursor = block.next_default;
    }
    log::debug!("loop {header}..={end} (back-edge from {loop_end}, exit {exit:?})");

    let head = &graph[header];
    let tested = head.has_conditional_branch() && head.next_branch.is_some_and(|t| t > end);
    session.frames.push(LoopFrame { header, exit });
    let parts = if tested {
        match head.next_default {
            Some(first) => structure_range(graph, first, Some(end), session)
                .map(|body| (Chain::sequential(header, Some(header)), body)),
            None => Ok((Chain::sequential(header, Some(header)), Chain::empty_at(header))),
        }
    } else {
        structure_range(graph, header, Some(end), session).map(|body| (Chain::empty_at(header), body))
    };
    session.frames.pop();
    let (head_chain, body) = parts?;
    Ok(Chain::node(ChainKind::Loop, header, end, vec![head_chain, body]))
}

fn structure_case(
    graph: &Graph,
    start: BlockId,
    last: BlockId,
    b: BlockId,
    session: &mut StructuringSession,
) -> Result<Chain, DeasError> {
    let block = &graph[b];
    let target = block
        .next_branch
        .ok_or_else(|| DeasError::MalformedValue(format!("conditional branch in block {b} has no target")))?;

    if let Some(frame) = session.innermost() {
        let jump = if target == frame.header {
            Some(LoopJump::Continue)
        } else if Some(target) == frame.exit {
            Some(LoopJump::Break)
        } else {
            None
        };
        if let Some(jump) = jump {
            log::debug!("conditional {jump} at {b}");
            let children = vec![Chain::sequential(b, Some(b)), Chain::empty_at(b), Chain::jump_at(b, jump)];
            return Ok(Chain::node(ChainKind::Case, b, b, children));
        }
    }

    if target < start {
        return Err(DeasError::BranchBeforeRange { block: b.index(), target: target.index(), start: start.index() });
    }
    if target <= b {
        return Err(DeasError::BackwardBranch { block: b.index(), target: target.index() });
    }
    let after_last = graph[last].next_default;
    let leaves_range = |t: BlockId| t > last && Some(t) != after_last;
    if leaves_range(target) {
        return Err(DeasError::BranchOutOfRange { block: b.index(), target: target.index(), end: last.index() });
    }

    let then_end = graph[target].previous.unwrap_or(b);
    let mut join = then_end;
    let mut cursor = Some(b);
    while let Some(i) = cursor.filter(|i| *i <= join) {
        let skip = graph[i]
            .next_branch
            .filter(|t| graph[i].has_unconditional_branch() && *t > join)
            .filter(|t| !leaves_range(*t) && !session.is_loop_target(*t));
        if let Some(prev) = skip.and_then(|t| graph[t].previous) {
            join = prev;
        }
        cursor = graph[i].next_default;
    }
    log::debug!("case at {b}: true ..={then_end}, false {target}..={join}");

    let then_chain = match block.next_default {
        Some(first) => structure_range(graph, first, Some(then_end), session)?,
        None => Chain::empty_at(b),
    };
    let else_chain = structure_range(graph, target, Some(join), session)?;
    Ok(Chain::node(ChainKind::Case, b, join, vec![Chain::sequential(b, Some(b)), then_chain, else_chain]))
}
