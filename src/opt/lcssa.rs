//! Loop-closed SSA construction.
//!
//! A graph is in LCSSA form when every value defined inside a loop and used
//! outside of it first passes through a Phi in a loop exit Block. The
//! unroller requires this shape: after duplication, only the exit Phis need
//! new inputs, ordinary out-of-loop uses never do.
//!
//! Construction handles loops whose exit Blocks are fed exclusively from
//! inside the loop (the shape frontends emit for structured control flow).
//! A loop with a mixed-predecessor exit Block is left untouched; the
//! unroller later refuses it.

use rustc_hash::{FxHashMap, FxHashSet};

use log::debug;

use crate::core::mode::Mode;
use crate::ir::graph::{Graph, GraphProperties, POS_BLOCK};
use crate::ir::loops::LoopId;
use crate::ir::node::{NodeId, Opcode};

/// Bring `graph` into LCSSA form where possible. Returns the set of loops
/// that could not be closed.
pub fn assure_lcssa(graph: &mut Graph) -> FxHashSet<LoopId> {
    if graph.has_property(GraphProperties::LCSSA) {
        return FxHashSet::default();
    }
    graph.assure_doms();
    graph.assure_loops();
    graph.assure_outs();

    // innermost loops first so values escaping several levels get a Phi
    // chain, one per level
    let mut loops: Vec<LoopId> = graph
        .loop_tree()
        .loop_ids()
        .filter(|&l| l != graph.loop_tree().root())
        .collect();
    loops.sort_by_key(|&l| std::cmp::Reverse(graph.loop_tree().depth(l)));

    let mut open = FxHashSet::default();
    for l in loops {
        let mut changed = false;
        if !close_loop(graph, l, &mut changed) {
            open.insert(l);
        }
        if changed {
            // outer loops must see the new Phis as users of their members
            graph.compute_outs();
        }
    }

    graph.add_property(GraphProperties::LCSSA);
    open
}

/// Member blocks of a loop, nested loops included.
fn loop_blocks(graph: &Graph, l: LoopId) -> Vec<NodeId> {
    let tree = graph.loop_tree();
    let mut blocks = Vec::new();
    let mut stack = vec![l];
    while let Some(cur) = stack.pop() {
        for &el in tree.elements(cur) {
            match el {
                crate::ir::loops::LoopElement::Block(b) => blocks.push(b),
                crate::ir::loops::LoopElement::Loop(sub) => stack.push(sub),
            }
        }
    }
    blocks
}

/// The Block a use lives in. For a Phi the use happens at the end of the
/// corresponding control predecessor, not in the Phi's own Block.
fn use_block(graph: &Graph, user: NodeId, pos: u32) -> NodeId {
    if graph.op(user) == Opcode::Phi {
        let block = graph.block_of(user);
        let cf = graph.input(block, pos as usize);
        return graph.block_of(cf);
    }
    if graph.is_block(user) {
        // a control-flow use: the edge originates in the cf node's block
        let cf = graph.input(user, pos as usize);
        return graph.block_of(cf);
    }
    graph.block_of(user)
}

fn close_loop(graph: &mut Graph, l: LoopId, changed: &mut bool) -> bool {
    let blocks = loop_blocks(graph, l);
    let member_set: FxHashSet<NodeId> = blocks.iter().copied().collect();

    // exit blocks: outside blocks with a control predecessor inside
    let mut exits = Vec::new();
    for b in graph.node_ids() {
        if graph.op(b) != Opcode::Block || member_set.contains(&b) {
            continue;
        }
        let mut preds_inside = 0;
        for &cf in graph.ins(b) {
            if graph.op(cf) == Opcode::Bad || graph.op(cf) == Opcode::Deleted {
                continue;
            }
            if member_set.contains(&graph.block_of(cf)) {
                preds_inside += 1;
            }
        }
        if preds_inside == 0 {
            continue;
        }
        if preds_inside != graph.arity(b) {
            // mixed entry: closing Phis would need values for edges the
            // loop does not produce
            return false;
        }
        exits.push(b);
    }

    // escaping uses, collected before any rewiring
    let mut escapes: Vec<(NodeId, NodeId, u32)> = Vec::new(); // (def, user, pos)
    for &b in &blocks {
        let members: Vec<NodeId> = graph
            .outs_of(b)
            .iter()
            .filter(|e| e.pos == POS_BLOCK)
            .map(|e| e.user)
            .collect();
        for def in members {
            if graph.mode(def) == Mode::X {
                continue;
            }
            for edge in graph.outs_of(def).to_vec() {
                if edge.pos == POS_BLOCK || edge.user == graph.end() {
                    continue;
                }
                let ub = use_block(graph, edge.user, edge.pos);
                if !member_set.contains(&ub) {
                    escapes.push((def, edge.user, edge.pos));
                }
            }
        }
    }

    if escapes.is_empty() {
        return true;
    }
    if exits.len() != 1 {
        // multiple exits would need Phi chains at the post-exit joins
        return false;
    }
    let exit = exits[0];
    let exit_arity = graph.arity(exit);

    let mut closing: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    for (def, user, pos) in escapes {
        let phi = *closing.entry(def).or_insert_with(|| {
            let ins = vec![def; exit_arity];
            let mode = graph.mode(def);
            debug!("lcssa: closing {:?} at exit {:?}", def, exit);
            graph.new_phi(exit, &ins, mode)
        });
        if user == phi {
            continue;
        }
        graph.set_input(user, pos as usize, phi);
        *changed = true;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::{ModeRegistry, Relation};
    use crate::core::tarval::Tarval;
    use crate::ir::node::pn;
    use crate::Mode;

    #[test]
    fn escaping_value_gets_an_exit_phi() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();

        let entry_jmp = g.new_jmp(g.start_block());
        let header = g.new_block(&[entry_jmp]);
        let zero = g.new_const(Tarval::null(iu));
        let one = g.new_const(Tarval::from_i64(1, iu, &reg));
        let limit = g.new_const(Tarval::from_i64(8, iu, &reg));
        let phi = g.new_phi(header, &[zero], iu);
        let incr = g.new_add(header, phi, one, iu);
        let cmp = g.new_cmp(header, incr, limit, Relation::LT);
        let cond = g.new_cond(header, cmp);
        let pt = g.new_proj(cond, Mode::X, pn::COND_TRUE);
        let pf = g.new_proj(cond, Mode::X, pn::COND_FALSE);
        let body = g.new_block(&[pt]);
        let back = g.new_jmp(body);
        g.add_input(header, back);
        g.add_input(phi, incr);
        let after = g.new_block(&[pf]);
        // incr escapes the loop
        let ret = g.new_return(after, g.initial_mem(), &[incr]);
        let end_block = g.end_block();
        g.add_input(end_block, ret);

        let open = assure_lcssa(&mut g);
        assert!(open.is_empty());
        assert!(g.has_property(GraphProperties::LCSSA));

        // the Return result now goes through a Phi in the exit block
        let res = g.input(ret, 1);
        assert_eq!(g.op(res), Opcode::Phi);
        assert_eq!(g.block_of(res), after);
        assert_eq!(g.ins(res), &[incr]);
    }
}
