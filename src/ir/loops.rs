//! Loop forest construction.
//!
//! Loops are identified on the control-flow graph with the DFS header
//! tagging of Wei et al.; the result is a tree of loops whose elements are
//! member Blocks and nested loops, the shape the unroller consumes. The
//! `CONSISTENT_LOOPS` property guards reads.

use rustc_hash::FxHashMap;

use crate::ir::graph::{Graph, GraphProperties};
use crate::ir::node::NodeId;

/// Index of a loop within its graph's [`LoopTree`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LoopId(u32);

impl LoopId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// A loop element: a member Block or a nested loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoopElement {
    Block(NodeId),
    Loop(LoopId),
}

pub struct LoopData {
    pub parent: Option<LoopId>,
    pub elements: Vec<LoopElement>,
    pub depth: u32,
}

/// The loop forest of one graph. The root loop spans the whole graph.
pub struct LoopTree {
    loops: Vec<LoopData>,
    root: LoopId,
    block_loop: FxHashMap<NodeId, LoopId>,
}

impl LoopTree {
    pub fn root(&self) -> LoopId {
        self.root
    }

    pub fn n_loops(&self) -> usize {
        self.loops.len()
    }

    pub fn loop_ids(&self) -> impl Iterator<Item = LoopId> {
        (0..self.loops.len() as u32).map(LoopId)
    }

    pub fn elements(&self, l: LoopId) -> &[LoopElement] {
        &self.loops[l.idx()].elements
    }

    pub fn outer_loop(&self, l: LoopId) -> Option<LoopId> {
        self.loops[l.idx()].parent
    }

    pub fn depth(&self, l: LoopId) -> u32 {
        self.loops[l.idx()].depth
    }

    /// The innermost loop containing `block`, if any besides the root.
    pub fn loop_of_block(&self, block: NodeId) -> Option<LoopId> {
        self.block_loop.get(&block).copied()
    }

    /// Is `inner` strictly nested inside `outer`?
    pub fn is_inner_loop(&self, outer: LoopId, inner: LoopId) -> bool {
        let mut cur = inner;
        while let Some(p) = self.outer_loop(cur) {
            if p == outer {
                return true;
            }
            cur = p;
        }
        false
    }

    /// Is `block` a member of `l` or of a loop nested in `l`?
    pub fn block_inside_loop(&self, block: NodeId, l: LoopId) -> bool {
        match self.loop_of_block(block) {
            None => false,
            Some(bl) => bl == l || self.is_inner_loop(l, bl),
        }
    }
}

#[derive(Default, Clone)]
struct BlockInfo {
    traversed: bool,
    self_loop: bool,
    dfsp_pos: u32,
    iloop_header: Option<u32>,
}

enum StackState {
    Visit { block_idx: usize, dfsp_pos: u32 },
    PostProcess { block_idx: usize, parent_idx: Option<usize> },
}

fn tag_lhead(infos: &mut [BlockInfo], b: u32, h: Option<u32>) {
    let Some(h) = h else { return };
    if b == h {
        return;
    }
    let mut cur1 = b;
    let mut cur2 = h;
    while let Some(ih) = infos[cur1 as usize].iloop_header {
        if ih == cur2 {
            return;
        }
        if infos[ih as usize].dfsp_pos < infos[cur2 as usize].dfsp_pos {
            infos[cur1 as usize].iloop_header = Some(cur2);
            cur1 = cur2;
            cur2 = ih;
        } else {
            cur1 = ih;
        }
    }
    infos[cur1 as usize].iloop_header = Some(cur2);
}

impl Graph {
    /// Build the loop forest and establish `CONSISTENT_LOOPS`.
    pub fn compute_loops(&mut self) {
        let rpo = self.block_rpo();
        let mut rpo_idx: FxHashMap<NodeId, usize> = FxHashMap::default();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_idx.insert(b, i);
        }
        // successor indices per rpo position
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); rpo.len()];
        for &b in rpo.iter() {
            for &cf in self.ins(b) {
                if self.op(cf) == crate::ir::node::Opcode::Deleted
                    || self.op(cf) == crate::ir::node::Opcode::Bad
                {
                    continue;
                }
                if let Some(&p) = rpo_idx.get(&self.block_of(cf)) {
                    succs[p].push(rpo_idx[&b]);
                }
            }
        }

        let mut infos = vec![BlockInfo::default(); rpo.len()];
        let mut loop_heads: Vec<bool> = vec![false; rpo.len()];

        let mut stack = vec![StackState::Visit {
            block_idx: 0,
            dfsp_pos: 1,
        }];
        let mut dfsp_counter = 1u32;

        while let Some(state) = stack.pop() {
            match state {
                StackState::Visit {
                    block_idx,
                    dfsp_pos,
                } => {
                    if infos[block_idx].traversed {
                        continue;
                    }
                    infos[block_idx].traversed = true;
                    infos[block_idx].dfsp_pos = dfsp_pos;
                    stack.push(StackState::PostProcess {
                        block_idx,
                        parent_idx: None,
                    });

                    let block_succs = succs[block_idx].clone();
                    for &succ_idx in block_succs.iter().rev() {
                        if succ_idx == block_idx {
                            infos[block_idx].self_loop = true;
                        }
                        if !infos[succ_idx].traversed {
                            dfsp_counter += 1;
                            stack.push(StackState::PostProcess {
                                block_idx: succ_idx,
                                parent_idx: Some(block_idx),
                            });
                            stack.push(StackState::Visit {
                                block_idx: succ_idx,
                                dfsp_pos: dfsp_counter,
                            });
                        } else if infos[succ_idx].dfsp_pos > 0 {
                            // back edge
                            tag_lhead(&mut infos, block_idx as u32, Some(succ_idx as u32));
                        } else if let Some(mut h_idx) = infos[succ_idx].iloop_header {
                            // forward edge into an already-closed loop
                            if infos[h_idx as usize].dfsp_pos > 0 {
                                tag_lhead(&mut infos, block_idx as u32, Some(h_idx));
                            } else {
                                while let Some(next) = infos[h_idx as usize].iloop_header {
                                    h_idx = next;
                                    if infos[h_idx as usize].dfsp_pos > 0 {
                                        tag_lhead(&mut infos, block_idx as u32, Some(h_idx));
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                StackState::PostProcess {
                    block_idx,
                    parent_idx,
                } => {
                    infos[block_idx].dfsp_pos = 0;
                    if let Some(parent) = parent_idx {
                        let nh = infos[block_idx].iloop_header;
                        tag_lhead(&mut infos, parent as u32, nh);
                    }
                }
            }
        }

        for info in &infos {
            if let Some(h) = info.iloop_header {
                loop_heads[h as usize] = true;
            }
        }
        for (i, info) in infos.iter().enumerate() {
            if info.self_loop {
                loop_heads[i] = true;
            }
        }

        // build the forest: root loop plus one loop per head
        let mut loops = vec![LoopData {
            parent: None,
            elements: Vec::new(),
            depth: 0,
        }];
        let root = LoopId(0);
        let mut head_loop: Vec<Option<LoopId>> = vec![None; rpo.len()];

        // loop containing a block's body (the loop of its header chain)
        fn enclosing_loop(
            infos: &[BlockInfo],
            head_loop: &[Option<LoopId>],
            i: usize,
        ) -> Option<LoopId> {
            let mut h = infos[i].iloop_header;
            while let Some(hi) = h {
                if let Some(l) = head_loop[hi as usize] {
                    return Some(l);
                }
                h = infos[hi as usize].iloop_header;
            }
            None
        }

        // create loops for heads in RPO order so outer loops come first
        for i in 0..rpo.len() {
            if !loop_heads[i] {
                continue;
            }
            let parent = enclosing_loop(&infos, &head_loop, i).unwrap_or(root);
            let id = LoopId(loops.len() as u32);
            let depth = loops[parent.idx()].depth + 1;
            loops.push(LoopData {
                parent: Some(parent),
                elements: Vec::new(),
                depth,
            });
            loops[parent.idx()].elements.push(LoopElement::Loop(id));
            head_loop[i] = Some(id);
        }

        // assign blocks to their innermost loop
        let mut block_loop: FxHashMap<NodeId, LoopId> = FxHashMap::default();
        for (i, &b) in rpo.iter().enumerate() {
            let l = if let Some(own) = head_loop[i] {
                own
            } else {
                enclosing_loop(&infos, &head_loop, i).unwrap_or(root)
            };
            loops[l.idx()].elements.push(LoopElement::Block(b));
            if l != root {
                block_loop.insert(b, l);
            }
        }

        self.loop_tree = Some(LoopTree {
            loops,
            root,
            block_loop,
        });
        self.add_property(GraphProperties::CONSISTENT_LOOPS);
    }

    pub fn assure_loops(&mut self) {
        if !self.has_property(GraphProperties::CONSISTENT_LOOPS) {
            self.compute_loops();
        }
    }

    pub fn loop_tree(&self) -> &LoopTree {
        debug_assert!(self.has_property(GraphProperties::CONSISTENT_LOOPS));
        self.loop_tree.as_ref().expect("loop info not computed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::{ModeRegistry, Relation};
    use crate::core::tarval::Tarval;
    use crate::ir::node::pn;
    use crate::Mode;

    /// start -> header <-> body, header -> after(end)
    fn build_simple_loop(g: &mut Graph, reg: &ModeRegistry, iu: Mode) -> (NodeId, NodeId, NodeId) {
        let entry_jmp = g.new_jmp(g.start_block());
        let header = g.new_block(&[entry_jmp]);
        let limit = g.new_const(Tarval::from_i64(8, iu, reg));
        let zero = g.new_const(Tarval::null(iu));
        let one = g.new_const(Tarval::from_i64(1, iu, reg));
        let phi = g.new_phi(header, &[zero], iu);
        let cmp = g.new_cmp(header, phi, limit, Relation::LT);
        let cond = g.new_cond(header, cmp);
        let pt = g.new_proj(cond, Mode::X, pn::COND_TRUE);
        let pf = g.new_proj(cond, Mode::X, pn::COND_FALSE);
        let body = g.new_block(&[pt]);
        let incr = g.new_add(body, phi, one, iu);
        let back = g.new_jmp(body);
        g.add_input(header, back);
        g.add_input(phi, incr);
        let after = g.new_block(&[pf]);
        let ret = g.new_return(after, g.initial_mem(), &[]);
        let end_block = g.end_block();
        g.add_input(end_block, ret);
        (header, body, after)
    }

    #[test]
    fn simple_loop_forest() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();
        let (header, body, after) = build_simple_loop(&mut g, &reg, iu);
        g.compute_loops();
        let tree = g.loop_tree();

        let hl = tree.loop_of_block(header).expect("header in a loop");
        assert_eq!(tree.loop_of_block(body), Some(hl));
        assert_eq!(tree.loop_of_block(after), None);
        assert_eq!(tree.outer_loop(hl), Some(tree.root()));
        assert!(tree.block_inside_loop(body, hl));
        assert!(!tree.block_inside_loop(after, hl));
        assert_eq!(tree.depth(hl), 1);
    }
}
