//! Def-use ("out") edges.
//!
//! The out table caches, per node, the list of (user, input position)
//! pairs referring to it. For Block nodes the table additionally records
//! the nodes the block owns, with [`POS_BLOCK`] as the position marker,
//! which is what lets passes enumerate a block's members.
//!
//! The table is rebuilt by [`Graph::compute_outs`] and kept up to date by
//! the mutation primitives only while `CONSISTENT_OUTS` holds. Nodes
//! created after the last rebuild have no out entries of their own; the
//! loop-unrolling pass relies on exactly that staleness when it duplicates
//! loop bodies.

use crate::ir::graph::{Graph, GraphProperties, POS_BLOCK};
use crate::ir::node::NodeId;

/// One def-use edge: `user`'s input at `pos` refers to this node, or the
/// user is owned by this block when `pos == POS_BLOCK`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OutEdge {
    pub user: NodeId,
    pub pos: u32,
}

impl Graph {
    /// Rebuild the out-edge table and establish `CONSISTENT_OUTS`.
    ///
    /// Edge order is deterministic: users in node-id order, inputs in
    /// position order.
    pub fn compute_outs(&mut self) {
        let n = self.nodes.len();
        let mut outs: Vec<Vec<OutEdge>> = vec![Vec::new(); n];
        for u in 0..n {
            let user = NodeId(u as u32);
            if self.op(user) == crate::ir::node::Opcode::Deleted {
                continue;
            }
            for (i, &pred) in self.ins(user).iter().enumerate() {
                outs[pred.idx()].push(OutEdge {
                    user,
                    pos: i as u32,
                });
            }
            let block = self.nodes[u].block;
            if !block.is_none() {
                outs[block.idx()].push(OutEdge {
                    user,
                    pos: POS_BLOCK,
                });
            }
        }
        self.outs = outs;
        self.add_property(GraphProperties::CONSISTENT_OUTS);
    }

    /// Ensure the out table is usable.
    pub fn assure_outs(&mut self) {
        if !self.has_property(GraphProperties::CONSISTENT_OUTS) {
            self.compute_outs();
        }
    }

    pub fn invalidate_outs(&mut self) {
        self.clear_property(GraphProperties::CONSISTENT_OUTS);
    }

    /// Out edges of `n`. Empty for nodes created after the last rebuild.
    pub fn outs_of(&self, n: NodeId) -> &[OutEdge] {
        self.outs.get(n.idx()).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn n_outs(&self, n: NodeId) -> usize {
        self.outs_of(n).len()
    }

    pub(crate) fn outs_add(&mut self, target: NodeId, user: NodeId, pos: u32) {
        if target.is_none() {
            return;
        }
        if target.idx() < self.outs.len() {
            self.outs[target.idx()].push(OutEdge { user, pos });
        }
    }

    /// Tolerant removal: edges of nodes created after the last rebuild are
    /// not in the table.
    pub(crate) fn outs_remove(&mut self, target: NodeId, user: NodeId, pos: u32) {
        if target.is_none() || target.idx() >= self.outs.len() {
            return;
        }
        let edge = OutEdge { user, pos };
        if let Some(i) = self.outs[target.idx()].iter().position(|e| *e == edge) {
            self.outs[target.idx()].remove(i);
        }
    }

    pub(crate) fn outs_retarget(&mut self, user: NodeId, pos: u32, old: NodeId, new: NodeId) {
        self.outs_remove(old, user, pos);
        self.outs_add(new, user, pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::ModeRegistry;
    use crate::core::tarval::Tarval;

    #[test]
    fn outs_track_uses_and_block_members() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();
        let block = g.start_block();
        let a = g.new_const(Tarval::from_i64(1, iu, &reg));
        let b = g.new_const(Tarval::from_i64(2, iu, &reg));
        let add = g.new_add(block, a, b, iu);
        g.compute_outs();

        assert_eq!(g.outs_of(a), &[OutEdge { user: add, pos: 0 }]);
        assert!(g
            .outs_of(block)
            .iter()
            .any(|e| e.user == add && e.pos == POS_BLOCK));

        // maintained while consistent
        g.set_input(add, 0, b);
        assert!(g.outs_of(a).is_empty());
        assert_eq!(g.n_outs(b), 2);
    }
}
