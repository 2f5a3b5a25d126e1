//! Graph walks.
//!
//! All walks start at the End node and follow predecessor edges: the input
//! list plus the owning-block edge, so blocks and keep-alive-only nodes are
//! reached as well. Phi inputs and back edges make the graph cyclic, which
//! is why every walk marks nodes through the per-graph visited counter
//! instead of recursing def-to-use.
//!
//! The walkers first collect the visit order with an explicit two-phase
//! stack and then run the callbacks over the collected order. Nodes the
//! callbacks create during the run are therefore not visited by the running
//! walk, which is what rewriting passes want.

use crate::ir::graph::Graph;
use crate::ir::node::{NodeId, Opcode};

enum Step {
    Visit(NodeId),
    Leave(NodeId),
}

impl Graph {
    /// Predecessors in deterministic order: owning block first, then the
    /// inputs.
    fn walk_preds(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let block = if self.is_block(n) {
            NodeId::NONE
        } else {
            self.block_of(n)
        };
        let block_iter = if block.is_none() { None } else { Some(block) };
        block_iter.into_iter().chain(self.ins(n).iter().copied())
    }

    /// Collect (pre, post) visit events for every node reachable from End.
    fn collect_walk_events(&mut self) -> Vec<(bool, NodeId)> {
        self.inc_visited();
        let mut events = Vec::with_capacity(self.n_nodes() * 2);
        let mut stack = vec![Step::Visit(self.end())];
        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(n) => {
                    if self.is_visited(n) {
                        continue;
                    }
                    self.mark_visited(n);
                    events.push((false, n));
                    stack.push(Step::Leave(n));
                    // push in reverse so preds pop in deterministic order
                    let preds: Vec<NodeId> = self.walk_preds(n).collect();
                    for &p in preds.iter().rev() {
                        if !self.is_visited(p) {
                            stack.push(Step::Visit(p));
                        }
                    }
                }
                Step::Leave(n) => events.push((true, n)),
            }
        }
        events
    }

    /// Walk every reachable node, calling `pre` before and `post` after its
    /// predecessors have been processed.
    pub fn walk(
        &mut self,
        mut pre: impl FnMut(&mut Graph, NodeId),
        mut post: impl FnMut(&mut Graph, NodeId),
    ) {
        for (is_post, n) in self.collect_walk_events() {
            if is_post {
                post(self, n);
            } else {
                pre(self, n);
            }
        }
    }

    /// Post-order walk (predecessors before users).
    pub fn walk_post(&mut self, mut post: impl FnMut(&mut Graph, NodeId)) {
        for n in self.collect_post_order() {
            post(self, n);
        }
    }

    /// The post-order visit sequence from End.
    pub fn collect_post_order(&mut self) -> Vec<NodeId> {
        self.collect_walk_events()
            .into_iter()
            .filter_map(|(is_post, n)| is_post.then_some(n))
            .collect()
    }

    /// Block-wise order: every reachable Block followed by the reachable
    /// nodes it owns, groups in walk discovery order.
    pub fn collect_blockwise_order(&mut self) -> Vec<NodeId> {
        let post = self.collect_post_order();
        let mut blocks = Vec::new();
        for &n in &post {
            if self.is_block(n) {
                blocks.push(n);
            }
        }
        let mut out = Vec::with_capacity(post.len());
        for &b in &blocks {
            out.push(b);
            for &n in &post {
                if !self.is_block(n) && self.block_of(n) == b {
                    out.push(n);
                }
            }
        }
        out
    }

    /// Walk blocks and their member nodes, blocks first.
    pub fn walk_blockwise(&mut self, mut f: impl FnMut(&mut Graph, NodeId)) {
        for n in self.collect_blockwise_order() {
            f(self, n);
        }
    }

    /// True if `n` lives in this graph's pool and its visited stamp does
    /// not exceed the graph's.
    pub fn node_in_storage(&self, n: NodeId) -> bool {
        n.idx() < self.n_nodes() && self.op(n) != Opcode::Deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::ModeRegistry;
    use crate::core::tarval::Tarval;

    #[test]
    fn post_order_visits_preds_first() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();
        let block = g.start_block();
        let a = g.new_const(Tarval::from_i64(1, iu, &reg));
        let b = g.new_const(Tarval::from_i64(2, iu, &reg));
        let add = g.new_add(block, a, b, iu);
        let ret = g.new_return(block, g.initial_mem(), &[add]);
        let end_block = g.end_block();
        g.add_input(end_block, ret);

        let order = g.collect_post_order();
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(add));
        assert!(pos(b) < pos(add));
        assert!(pos(add) < pos(ret));
        assert!(pos(ret) < pos(g.end()));
    }

    #[test]
    fn each_node_visited_once_despite_cycles() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();
        // loop: header with a phi feeding itself through an Add
        let j = g.new_jmp(g.start_block());
        let header = g.new_block(&[j]);
        let body_jmp = g.new_jmp(header);
        g.add_input(header, body_jmp);
        let init = g.new_const(Tarval::from_i64(0, iu, &reg));
        let one = g.new_const(Tarval::from_i64(1, iu, &reg));
        let phi = g.new_phi(header, &[init, init], iu);
        let incr = g.new_add(header, phi, one, iu);
        g.set_input(phi, 1, incr);
        g.keep_alive(phi);

        let mut counts = std::collections::HashMap::new();
        g.walk_post(|_, n| *counts.entry(n).or_insert(0) += 1);
        assert!(counts.values().all(|&c| c == 1));
        assert!(counts.contains_key(&phi));
        assert!(counts.contains_key(&incr));
    }
}
