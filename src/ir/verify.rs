//! Node-level consistency checks.
//!
//! Nothing is repaired here: each violation is one line on the warning
//! channel and the aggregate flag is returned.

use log::warn;

use crate::core::mode::Mode;
use crate::ir::graph::Graph;
use crate::ir::node::{NodeId, Opcode};

/// Verify the structural node invariants of a graph. Returns `true` when
/// everything is fine.
pub fn irg_verify(graph: &mut Graph) -> bool {
    let mut fine = true;
    let order = graph.collect_post_order();
    for n in order {
        fine &= verify_node(graph, n);
    }
    fine
}

fn verify_node(g: &Graph, n: NodeId) -> bool {
    let mut fine = true;
    let op = g.op(n);

    if op == Opcode::Block {
        for &cf in g.ins(n) {
            if g.mode(cf) != Mode::X && g.op(cf) != Opcode::Bad {
                warn!(
                    "verify: Block {:?} has non-control predecessor {:?} ({})",
                    n,
                    cf,
                    g.op(cf).name()
                );
                fine = false;
            }
        }
        return fine;
    }

    let block = g.nodes[n.idx()].block;
    if block.is_none() {
        warn!("verify: {:?} ({}) has no Block", n, op.name());
        fine = false;
    } else if !g.is_block(block) {
        warn!("verify: {:?} ({}) is owned by a non-Block", n, op.name());
        fine = false;
    }

    if op == Opcode::Phi && !block.is_none() && g.arity(n) != g.arity(block) {
        warn!(
            "verify: Phi {:?} arity {} does not match Block arity {}",
            n,
            g.arity(n),
            g.arity(block)
        );
        fine = false;
    }

    if op == Opcode::Proj {
        let pred = g.proj_pred(n);
        if g.mode(pred) != Mode::T {
            warn!(
                "verify: Proj {:?} selects from non-tuple {:?} ({})",
                n,
                pred,
                g.op(pred).name()
            );
            fine = false;
        }
    }

    if g.node_visited(n) > g.graph_visited() {
        warn!(
            "verify: visited stamp of {:?} exceeds the graph counter",
            n
        );
        fine = false;
    }

    fine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::ModeRegistry;
    use crate::core::tarval::Tarval;

    #[test]
    fn healthy_graph_verifies() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();
        let c = g.new_const(Tarval::from_i64(1, iu, &reg));
        let ret = g.new_return(g.start_block(), g.initial_mem(), &[c]);
        let end_block = g.end_block();
        g.add_input(end_block, ret);
        assert!(irg_verify(&mut g));
    }

    #[test]
    fn phi_arity_divergence_is_reported() {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        let mut g = Graph::new();
        let j1 = g.new_jmp(g.start_block());
        let j2 = g.new_jmp(g.start_block());
        let block = g.new_block(&[j1, j2]);
        let c = g.new_const(Tarval::from_i64(1, iu, &reg));
        let phi = g.new_phi(block, &[c, c], iu);
        // diverge the Block arity behind the Phi's back
        let j3 = g.new_jmp(g.start_block());
        g.add_input(block, j3);
        let ret = g.new_return(block, g.initial_mem(), &[phi]);
        let end_block = g.end_block();
        g.add_input(end_block, ret);
        assert!(!irg_verify(&mut g));
    }
}
