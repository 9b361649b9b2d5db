//! Dominator sets.
//!
//! Each reachable block is dominated by itself plus the intersection of the
//! dominator sets of its control-flow predecessors. The sets are found by
//! iterating that equation to a fixed point, starting from "everything
//! dominates everything" for every block except the entry.
//!
//! Structuring does not depend on this pass. It backs the optional
//! reducibility check and is available to later passes.

use std::collections::{BTreeSet, VecDeque};

use crate::DeasError;
use crate::graph::{BlockId, Graph};

#[derive(Debug, Clone)]
pub struct DominatorSets {
    entry: BlockId,
    /// `None` for blocks unreachable from the entry.
    sets: Vec<Option<BTreeSet<BlockId>>>,
}

impl DominatorSets {
    pub fn compute(graph: &Graph) -> Self {
        let entry = graph.base_block();
        let preds = graph.predecessors();
        let reachable = reachable_blocks(graph, entry);

        let mut sets: Vec<Option<BTreeSet<BlockId>>> = (0..graph.len())
            .map(|i| {
                let id = BlockId::new(i);
                if id == entry {
                    Some(BTreeSet::from([entry]))
                } else if reachable.contains(&id) {
                    Some(reachable.clone())
                } else {
                    None
                }
            })
            .collect();

        let mut changed = true;
        let mut rounds = 0usize;
        while changed {
            changed = false;
            rounds += 1;
            for &b in reachable.iter().filter(|b| **b != entry) {
                let mut new_set: Option<BTreeSet<BlockId>> = None;
                for p in &preds[b.index()] {
                    let Some(pset) = &sets[p.index()] else {
                        continue;
                    };
                    new_set = Some(match new_set {
                        None => pset.clone(),
                        Some(acc) => acc.intersection(pset).copied().collect(),
                    });
                }
                let mut new_set = new_set.unwrap_or_default();
                new_set.insert(b);
                if sets[b.index()].as_ref() != Some(&new_set) {
                    sets[b.index()] = Some(new_set);
                    changed = true;
                }
            }
        }
        log::trace!("dominator sets converged after {rounds} rounds");

        Self { entry, sets }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn dominators(&self, block: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.sets.get(block.index()).and_then(Option::as_ref)
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.dominators(block).is_some()
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominators(b).is_some_and(|set| set.contains(&a))
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// The strict dominator closest to `block`; `None` for the entry and for
    /// unreachable blocks.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        let set = self.dominators(block)?;
        set.iter()
            .copied()
            .filter(|d| *d != block)
            .max_by_key(|d| self.dominators(*d).map_or(0, BTreeSet::len))
    }

    /// Every reachable backward branch must target a block that dominates it,
    /// otherwise the loop has more than one entry.
    pub fn check_back_edges(&self, graph: &Graph) -> Result<(), DeasError> {
        for (id, block) in graph.blocks() {
            let Some(target) = block.next_branch else {
                continue;
            };
            if target <= id && self.is_reachable(id) && !self.dominates(target, id) {
                return Err(DeasError::IrreducibleLoop { header: target.index(), block: id.index() });
            }
        }
        Ok(())
    }
}

fn reachable_blocks(graph: &Graph, entry: BlockId) -> BTreeSet<BlockId> {
    let mut seen = BTreeSet::from([entry]);
    let mut queue = VecDeque::from([entry]);
    while let Some(b) = queue.pop_front() {
        for succ in graph.successors(b) {
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    seen
}
