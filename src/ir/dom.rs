//! Dominance information.
//!
//! Immediate dominators are computed with the iterative algorithm over a
//! reverse post-order of the control-flow graph and stored per Block. The
//! `CONSISTENT_DOMINANCE` property guards reads; passes that change control
//! flow clear it.

use rustc_hash::FxHashMap;

use crate::ir::graph::{Graph, GraphProperties};
use crate::ir::node::{NodeId, Opcode};

impl Graph {
    /// Reachable blocks in reverse post-order, starting at the start block
    /// and following control-flow successor edges.
    pub(crate) fn block_rpo(&self) -> Vec<NodeId> {
        // successor lists derived from block predecessor edges
        let mut succs: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for b in self.node_ids() {
            if self.op(b) != Opcode::Block {
                continue;
            }
            for &cf in self.ins(b) {
                if self.op(cf) == Opcode::Deleted || self.op(cf) == Opcode::Bad {
                    continue;
                }
                let pred_block = self.block_of(cf);
                succs.entry(pred_block).or_default().push(b);
            }
        }

        let mut post = Vec::new();
        let mut visited: Vec<bool> = vec![false; self.n_nodes()];
        let mut stack = vec![(self.start_block(), false)];
        while let Some((b, processed)) = stack.pop() {
            if processed {
                post.push(b);
                continue;
            }
            if visited[b.idx()] {
                continue;
            }
            visited[b.idx()] = true;
            stack.push((b, true));
            if let Some(ss) = succs.get(&b) {
                for &s in ss.iter().rev() {
                    if !visited[s.idx()] {
                        stack.push((s, false));
                    }
                }
            }
        }
        post.reverse();
        post
    }

    /// Compute immediate dominators for all reachable blocks and establish
    /// `CONSISTENT_DOMINANCE`.
    pub fn compute_doms(&mut self) {
        let rpo = self.block_rpo();
        let mut rpo_idx: FxHashMap<NodeId, usize> = FxHashMap::default();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_idx.insert(b, i);
        }

        // predecessor blocks per block, restricted to reachable ones
        let preds: Vec<Vec<usize>> = rpo
            .iter()
            .map(|&b| {
                self.ins(b)
                    .iter()
                    .filter(|&&cf| self.op(cf) != Opcode::Deleted && self.op(cf) != Opcode::Bad)
                    .filter_map(|&cf| rpo_idx.get(&self.block_of(cf)).copied())
                    .collect()
            })
            .collect();

        let undef = usize::MAX;
        let mut idom = vec![undef; rpo.len()];
        idom[0] = 0;

        let intersect = |idom: &[usize], mut a: usize, mut b: usize| -> usize {
            while a != b {
                while a > b {
                    a = idom[a];
                }
                while b > a {
                    b = idom[b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..rpo.len() {
                let mut new_idom = undef;
                for &p in &preds[i] {
                    if idom[p] == undef {
                        continue;
                    }
                    new_idom = if new_idom == undef {
                        p
                    } else {
                        intersect(&idom, new_idom, p)
                    };
                }
                if new_idom != undef && idom[i] != new_idom {
                    idom[i] = new_idom;
                    changed = true;
                }
            }
        }

        self.idom.clear();
        self.idom.resize(self.n_nodes(), NodeId::NONE);
        for (i, &b) in rpo.iter().enumerate() {
            if i != 0 && idom[i] != undef {
                self.idom[b.idx()] = rpo[idom[i]];
            }
        }
        self.add_property(GraphProperties::CONSISTENT_DOMINANCE);
    }

    pub fn assure_doms(&mut self) {
        if !self.has_property(GraphProperties::CONSISTENT_DOMINANCE) {
            self.compute_doms();
        }
    }

    /// Immediate dominator of a Block, if it has one.
    pub fn idom(&self, block: NodeId) -> Option<NodeId> {
        debug_assert!(self.has_property(GraphProperties::CONSISTENT_DOMINANCE));
        let d = self.idom.get(block.idx()).copied().unwrap_or(NodeId::NONE);
        if d.is_none() {
            None
        } else {
            Some(d)
        }
    }

    /// Does Block `a` dominate Block `b`? Reflexive.
    pub fn block_dominates(&self, a: NodeId, b: NodeId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(d) => cur = d,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::{ModeRegistry, Relation};
    use crate::core::tarval::Tarval;
    use crate::ir::node::pn;

    #[test]
    fn diamond_dominators() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();
        let entry = g.start_block();
        let c = g.new_const(Tarval::from_i64(1, iu, &reg));
        let zero = g.new_const(Tarval::null(iu));
        let cmp = g.new_cmp(entry, c, zero, Relation::EQ);
        let cond = g.new_cond(entry, cmp);
        let pt = g.new_proj(cond, crate::Mode::X, pn::COND_TRUE);
        let pf = g.new_proj(cond, crate::Mode::X, pn::COND_FALSE);
        let then_b = g.new_block(&[pt]);
        let else_b = g.new_block(&[pf]);
        let jt = g.new_jmp(then_b);
        let je = g.new_jmp(else_b);
        let join = g.new_block(&[jt, je]);
        let ret = g.new_return(join, g.initial_mem(), &[]);
        let end_block = g.end_block();
        g.add_input(end_block, ret);

        g.compute_doms();
        assert_eq!(g.idom(then_b), Some(entry));
        assert_eq!(g.idom(else_b), Some(entry));
        assert_eq!(g.idom(join), Some(entry));
        assert!(g.block_dominates(entry, join));
        assert!(!g.block_dominates(then_b, join));
        assert!(g.block_dominates(join, join));
    }
}
