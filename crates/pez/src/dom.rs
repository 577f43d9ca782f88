//! Dominator and post-dominator analysis.
//!
//! The iterative Cooper–Harvey–Kennedy fixpoint over reverse-postorder, run
//! forwards for dominators and over the reversed graph for post-dominators.
//! Post-dominance is computed against a single synthetic exit block that
//! collects every terminal block, so it stays well-defined for functions
//! with several `return`s.
//!
//! Loop membership is derived from back-edges: the natural loop of a header
//! is the set of blocks that reach one of its back-edge sources without
//! leaving through the header.

use crate::{
    cfg::{BlockId, Cfg},
    scratch::{BitSet, Scratch},
};

/// Immediate-dominator tree.
#[derive(Debug)]
pub struct DomTree {
    idom: Vec<Option<BlockId>>,
    rpo_index: Vec<usize>,
}

impl DomTree {
    /// Builds the dominator tree of `cfg`.
    #[must_use]
    pub fn build(cfg: &Cfg) -> Self {
        let order = reverse_postorder(cfg);
        let mut rpo_index = vec![usize::MAX; cfg.num_blocks()];
        for (position, &block) in order.iter().enumerate() {
            rpo_index[block.index()] = position;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; cfg.num_blocks()];
        idom[cfg.entry.index()] = Some(cfg.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &cfg.block(block).preds {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_index, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom[block.index()] != Some(new_idom) {
                        idom[block.index()] = Some(new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self { idom, rpo_index }
    }

    /// The immediate dominator, or `None` for the entry and for
    /// unreachable blocks.
    #[must_use]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        match self.idom[block.index()] {
            Some(parent) if parent != block => Some(parent),
            _ => None,
        }
    }

    /// True iff `a` dominates `b` (reflexively).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// The natural-loop body of `header`: `header` itself plus every block
    /// that reaches a back-edge into `header` without passing through it.
    #[must_use]
    pub fn loop_body(&self, cfg: &Cfg, header: BlockId) -> BitSet {
        let mut body = BitSet::with_capacity(cfg.num_blocks());
        body.insert(header.index());
        let mut scratch = Scratch::for_blocks(cfg.num_blocks());

        for &pred in &cfg.block(header).preds {
            let is_back_edge = cfg.block(pred).start_offset >= cfg.block(header).start_offset;
            // Only back-edges from blocks the header dominates form a
            // natural loop; anything else is irreducible flow we leave to
            // the driver's fallback paths.
            if !is_back_edge || !self.dominates(header, pred) {
                continue;
            }
            if body.insert(pred.index()) {
                scratch.worklist.push(pred.index() as u32);
            }
            while let Some(raw) = scratch.worklist.pop() {
                let block = BlockId::new(raw as usize);
                for &p in &cfg.block(block).preds {
                    if p != header && body.insert(p.index()) {
                        scratch.worklist.push(p.index() as u32);
                    }
                }
            }
        }
        body
    }

    /// True iff `block` belongs to the natural loop headed at `header`.
    #[must_use]
    pub fn is_in_loop(&self, cfg: &Cfg, block: BlockId, header: BlockId) -> bool {
        self.dominates(header, block) && self.loop_body(cfg, header).contains(block.index())
    }
}

/// Post-dominator tree over the reversed CFG.
///
/// Built lazily by the driver on first merge query and cached; the reversed
/// graph uses only normal edges, so unwind paths never distort join points.
#[derive(Debug)]
pub struct PostDomTree {
    /// Immediate post-dominator per block; the synthetic exit is
    /// represented as `None`.
    ipdom: Vec<Option<BlockId>>,
    rpo_index: Vec<usize>,
}

impl PostDomTree {
    /// Builds the post-dominator tree of `cfg`.
    #[must_use]
    pub fn build(cfg: &Cfg) -> Self {
        let num_blocks = cfg.num_blocks();
        // Virtual node indices: blocks 0..n, synthetic exit = n.
        let exit = num_blocks;

        // Reverse-graph successors are normal-edge predecessors, plus the
        // synthetic exit's edges into every terminal block.
        let mut reverse_succs: Vec<Vec<usize>> = vec![Vec::new(); num_blocks + 1];
        let mut reverse_preds: Vec<Vec<usize>> = vec![Vec::new(); num_blocks + 1];
        for block in &cfg.blocks {
            let mut terminal = true;
            for edge in block.normal_successors() {
                terminal = false;
                reverse_succs[edge.target.index()].push(block.id.index());
                reverse_preds[block.id.index()].push(edge.target.index());
            }
            if terminal {
                reverse_succs[exit].push(block.id.index());
                reverse_preds[block.id.index()].push(exit);
            }
        }

        // RPO over the reversed graph, rooted at the synthetic exit.
        let mut order = Vec::with_capacity(num_blocks + 1);
        let mut visited = BitSet::with_capacity(num_blocks + 1);
        let mut stack: Vec<(usize, usize)> = vec![(exit, 0)];
        visited.insert(exit);
        while let Some(&mut (node, ref mut next)) = stack.last_mut() {
            if *next < reverse_succs[node].len() {
                let succ = reverse_succs[node][*next];
                *next += 1;
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                order.push(node);
                stack.pop();
            }
        }
        order.reverse();

        let mut rpo_index = vec![usize::MAX; num_blocks + 1];
        for (position, &node) in order.iter().enumerate() {
            rpo_index[node] = position;
        }

        let mut ipdom: Vec<Option<usize>> = vec![None; num_blocks + 1];
        ipdom[exit] = Some(exit);
        let mut changed = true;
        while changed {
            changed = false;
            for &node in order.iter().skip(1) {
                let mut new_idom: Option<usize> = None;
                for &pred in &reverse_preds[node] {
                    if ipdom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => {
                            let mut a = pred;
                            let mut b = current;
                            while a != b {
                                while rpo_index[a] > rpo_index[b] {
                                    a = ipdom[a].unwrap_or(exit);
                                }
                                while rpo_index[b] > rpo_index[a] {
                                    b = ipdom[b].unwrap_or(exit);
                                }
                            }
                            a
                        }
                    });
                }
                if let Some(new_idom) = new_idom {
                    if ipdom[node] != Some(new_idom) {
                        ipdom[node] = Some(new_idom);
                        changed = true;
                    }
                }
            }
        }

        let ipdom = (0..num_blocks)
            .map(|node| match ipdom[node] {
                Some(parent) if parent != exit && parent != node => Some(BlockId::new(parent)),
                _ => None,
            })
            .collect();
        Self {
            ipdom,
            rpo_index,
        }
    }

    /// The immediate post-dominator, or `None` when it is the synthetic
    /// exit (returns, raises).
    #[must_use]
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        self.ipdom[block.index()]
    }

    /// True iff `a` post-dominates `b` (reflexively).
    #[must_use]
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.ipdom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// The nearest block post-dominating both `a` and `b`, if any: the
    /// merge point of a two-armed region.
    #[must_use]
    pub fn common_post_dominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        let mut seen = Vec::new();
        let mut current = Some(a);
        while let Some(block) = current {
            seen.push(block);
            current = self.ipdom(block);
        }
        let mut current = Some(b);
        while let Some(block) = current {
            if seen.contains(&block) {
                return Some(block);
            }
            current = self.ipdom(block);
        }
        None
    }

    /// Position of a block in the reversed-graph RPO; later means closer to
    /// the entry. Exposed for deterministic tie-breaks in detection.
    #[must_use]
    pub fn rpo_position(&self, block: BlockId) -> usize {
        self.rpo_index[block.index()]
    }
}

/// Reverse-postorder over normal + exception edges, rooted at the entry.
fn reverse_postorder(cfg: &Cfg) -> Vec<BlockId> {
    let mut order = Vec::with_capacity(cfg.num_blocks());
    let mut visited = BitSet::with_capacity(cfg.num_blocks());
    let mut stack: Vec<(BlockId, usize)> = vec![(cfg.entry, 0)];
    visited.insert(cfg.entry.index());
    while let Some(&mut (block, ref mut next)) = stack.last_mut() {
        let edges = &cfg.block(block).edges;
        if *next < edges.len() {
            let successor = edges[*next].target;
            *next += 1;
            if visited.insert(successor.index()) {
                stack.push((successor, 0));
            }
        } else {
            order.push(block);
            stack.pop();
        }
    }
    order.reverse();
    order
}

fn intersect(idom: &[Option<BlockId>], rpo_index: &[usize], a: BlockId, b: BlockId) -> BlockId {
    let mut a = a;
    let mut b = b;
    while a != b {
        while rpo_index[a.index()] > rpo_index[b.index()] {
            a = idom[a.index()].unwrap_or(a);
        }
        while rpo_index[b.index()] > rpo_index[a.index()] {
            b = idom[b.index()].unwrap_or(b);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::{DomTree, PostDomTree};
    use crate::{cfg::Cfg, code::Code, version::PythonVersion};

    const PY38: PythonVersion = PythonVersion::new(3, 8);

    fn build(bytes: &[u8]) -> Cfg {
        let code = Code {
            code_bytes: bytes.to_vec(),
            ..Code::default()
        };
        Cfg::build(&code, PY38).unwrap()
    }

    /// if a: x = 1 else: x = 2; return x   (diamond)
    fn diamond() -> Cfg {
        build(&[
            124, 0, // 0: LOAD_FAST 0
            114, 10, // 2: POP_JUMP_IF_FALSE 10
            100, 1, // 4: LOAD_CONST 1
            125, 1, // 6: STORE_FAST 1
            110, 4, // 8: JUMP_FORWARD +4 -> 14
            100, 2, // 10: LOAD_CONST 2
            125, 1, // 12: STORE_FAST 1
            124, 1, // 14: LOAD_FAST 1
            83, 0, // 16: RETURN_VALUE
        ])
    }

    #[test]
    fn diamond_dominance() {
        let cfg = diamond();
        let dom = DomTree::build(&cfg);
        let entry = cfg.entry;
        let then_block = cfg.block_at_offset(4).unwrap();
        let merge = cfg.block_at_offset(14).unwrap();

        assert!(dom.dominates(entry, merge));
        assert!(dom.dominates(entry, then_block));
        assert!(!dom.dominates(then_block, merge));
        assert_eq!(dom.idom(merge), Some(entry));
    }

    #[test]
    fn diamond_post_dominance() {
        let cfg = diamond();
        let pdom = PostDomTree::build(&cfg);
        let entry = cfg.entry;
        let then_block = cfg.block_at_offset(4).unwrap();
        let else_block = cfg.block_at_offset(10).unwrap();
        let merge = cfg.block_at_offset(14).unwrap();

        assert!(pdom.post_dominates(merge, entry));
        assert!(pdom.post_dominates(merge, then_block));
        assert_eq!(pdom.common_post_dominator(then_block, else_block), Some(merge));
        // Nothing past a return.
        assert_eq!(pdom.ipdom(merge), None);
    }

    #[test]
    fn while_loop_body_membership() {
        // 0: LOAD_FAST 0            <- header
        // 2: POP_JUMP_IF_FALSE 8
        // 4: NOP                    <- body
        // 6: JUMP_ABSOLUTE 0
        // 8: LOAD_CONST 0           <- exit
        // 10: RETURN_VALUE
        let cfg = build(&[124, 0, 114, 8, 9, 0, 113, 0, 100, 0, 83, 0]);
        let dom = DomTree::build(&cfg);
        let header = cfg.entry;
        let body = cfg.block_at_offset(4).unwrap();
        let exit = cfg.block_at_offset(8).unwrap();

        assert!(dom.is_in_loop(&cfg, body, header));
        assert!(dom.is_in_loop(&cfg, header, header));
        assert!(!dom.is_in_loop(&cfg, exit, header));
    }
}
