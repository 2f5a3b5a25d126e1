// End-to-end tests for loop unrolling: counted loops are built through the
// construction API, unrolled, and checked structurally. Fully unrolled
// loops lose their back edge and feed the after-loop Phis one value per
// iteration; partially unrolled loops keep a header test in every copy.

use mezzo::ir::node::pn;
use mezzo::ir::verify::irg_verify;
use mezzo::opt::unroll_loops;
use mezzo::types::{EntityKind, Segment};
use mezzo::{Graph, GraphProperties, Mode, NodeId, Opcode, Program, Relation, Tarval};

fn setup() -> (Program, Mode) {
    let mut program = Program::new();
    let iu = program.modes.new_int_mode("Iu", 32, false, 32);
    (program, iu)
}

fn add_function(program: &mut Program, name: &str, graph: Graph) -> mezzo::GraphId {
    let mtp = program.types.new_method(vec![], vec![]);
    let seg = program.segment(Segment::Global);
    let ent = program.types.new_entity(seg, name, mtp, EntityKind::Method);
    program.types.entity_mut(ent).ld_name = Some(name.to_string());
    let gid = program.add_graph(graph);
    program.set_entity_graph(ent, gid);
    gid
}

struct CountedLoop {
    header: NodeId,
    body: NodeId,
    after: NodeId,
    sum_phi: NodeId,
}

/// `s = 0; for (i = 0; i < limit; i++) s += i; return s;` with the
/// compare in the loop header and the arithmetic in the body.
fn build_counted_loop(g: &mut Graph, program: &Program, iu: Mode, limit: NodeId) -> CountedLoop {
    let entry_jmp = g.new_jmp(g.start_block());
    let header = g.new_block(&[entry_jmp]);

    let zero = g.new_const(Tarval::null(iu));
    let one = g.new_const(Tarval::from_i64(1, iu, &program.modes));

    let i_phi = g.new_phi(header, &[zero], iu);
    let s_phi = g.new_phi(header, &[zero], iu);
    let cmp = g.new_cmp(header, i_phi, limit, Relation::LT);
    let cond = g.new_cond(header, cmp);
    let pt = g.new_proj(cond, Mode::X, pn::COND_TRUE);
    let pf = g.new_proj(cond, Mode::X, pn::COND_FALSE);

    let body = g.new_block(&[pt]);
    let s_next = g.new_add(body, s_phi, i_phi, iu);
    let i_next = g.new_add(body, i_phi, one, iu);
    let back = g.new_jmp(body);
    g.add_input(header, back);
    g.add_input(i_phi, i_next);
    g.add_input(s_phi, s_next);

    let after = g.new_block(&[pf]);
    let ret = g.new_return(after, g.initial_mem(), &[s_phi]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);

    CountedLoop {
        header,
        body,
        after,
        sum_phi: s_phi,
    }
}

fn count_reachable(g: &mut Graph, op: Opcode) -> usize {
    g.collect_post_order()
        .into_iter()
        .filter(|&n| g.op(n) == op)
        .count()
}

#[test]
fn constant_trip_count_unrolls_fully() {
    let (mut program, iu) = setup();
    let mut g = Graph::new();
    let limit = g.new_const(Tarval::from_i64(8, iu, &program.modes));
    let lp = build_counted_loop(&mut g, &program, iu, limit);
    let gid = add_function(&mut program, "sum8", g);

    let unrolled = unroll_loops(&mut program, gid, 8, 400);
    assert_eq!(unrolled, 1);

    let g = program.graph_mut(gid);
    assert!(g.has_property(GraphProperties::NO_BADS));
    assert!(irg_verify(g));

    // the back edge is gone: the header keeps only its entry, and the
    // loop-carried Phi collapsed into its start value
    assert_eq!(g.arity(lp.header), 1);
    assert_eq!(g.op(lp.sum_phi), Opcode::Deleted);

    // eight iterations feed the after-loop block: the original exit, the
    // seven copies' exits, and the redirected final jump
    assert_eq!(g.arity(lp.after), 9);

    // one summation per iteration survives: 8 sum adds plus 7 increments
    // (the last iteration's increment feeds nothing and goes dead)
    assert_eq!(count_reachable(g, Opcode::Add), 15);

    // End keeps no Bad alive
    let g = program.graph_mut(gid);
    for &k in g.keep_alives() {
        assert_ne!(g.op(k), Opcode::Bad);
    }
}

#[test]
fn unknown_trip_count_unrolls_by_two_with_header_retained() {
    let (mut program, iu) = setup();
    let mut g = Graph::new();
    // the limit comes in as a parameter, so the trip count is unknown
    let limit = g.new_proj(g.args(), iu, 0);
    let lp = build_counted_loop(&mut g, &program, iu, limit);
    let gid = add_function(&mut program, "sumn", g);

    let unrolled = unroll_loops(&mut program, gid, 4, 400);
    assert_eq!(unrolled, 1);

    let g = program.graph_mut(gid);
    assert!(irg_verify(g));

    // partial unroll: the loop survives, the original header still has
    // its entry and one back edge
    assert_eq!(g.arity(lp.header), 2);

    // two copies of the body test-and-add (2 sums + 2 increments), and
    // every copy keeps its own exit test
    assert_eq!(count_reachable(g, Opcode::Add), 4);
    assert_eq!(count_reachable(g, Opcode::Cond), 2);

    // the exit block now merges the original exit and the copy's exit
    assert_eq!(g.arity(lp.after), 2);
}

#[test]
fn trip_count_with_power_of_two_divisor_unrolls_partially() {
    let (mut program, iu) = setup();
    let mut g = Graph::new();
    let limit = g.new_const(Tarval::from_i64(12, iu, &program.modes));
    let lp = build_counted_loop(&mut g, &program, iu, limit);
    let gid = add_function(&mut program, "sum12", g);

    // 12 does not fit below 8, its largest power-of-two divisor 4 does
    let unrolled = unroll_loops(&mut program, gid, 8, 400);
    assert_eq!(unrolled, 1);

    let g = program.graph_mut(gid);
    assert!(irg_verify(g));
    // not a full unroll: back edge retained
    assert_eq!(g.arity(lp.header), 2);
    assert_eq!(count_reachable(g, Opcode::Add), 8);
}

#[test]
fn loop_exceeding_the_size_cap_is_left_alone() {
    let (mut program, iu) = setup();
    let mut g = Graph::new();
    let limit = g.new_const(Tarval::from_i64(8, iu, &program.modes));
    build_counted_loop(&mut g, &program, iu, limit);
    let gid = add_function(&mut program, "sum8", g);

    let before = program.graph(gid).n_nodes();
    let unrolled = unroll_loops(&mut program, gid, 8, 4);
    assert_eq!(unrolled, 0);
    // LCSSA may add exit Phis, duplication must not have happened
    assert!(program.graph(gid).n_nodes() <= before + 2);
}

#[test]
fn opaque_call_in_the_loop_refuses_unrolling() {
    let (mut program, iu) = setup();

    // an external function: entity without a graph
    let ext_mtp = program.types.new_method(vec![], vec![]);
    let seg = program.segment(Segment::Global);
    let ext = program
        .types
        .new_entity(seg, "mystery", ext_mtp, EntityKind::Method);
    program.types.entity_mut(ext).ld_name = Some("mystery".to_string());

    let mut g = Graph::new();
    let limit = g.new_const(Tarval::from_i64(8, iu, &program.modes));
    let lp = build_counted_loop(&mut g, &program, iu, limit);
    // call the unknown function from the loop body
    let callee = g.new_symconv(ext);
    let call = g.new_call(lp.body, g.no_mem(), callee, &[], ext_mtp);
    g.keep_alive(call);
    let gid = add_function(&mut program, "calls", g);

    let unrolled = unroll_loops(&mut program, gid, 8, 400);
    assert_eq!(unrolled, 0);
    assert_eq!(program.graph_mut(gid).arity(lp.header), 2);
}

#[test]
fn nonlinear_induction_refuses_unrolling() {
    let (mut program, iu) = setup();
    let mut g = Graph::new();

    // i = i * i has no single increment over a static base
    let entry_jmp = g.new_jmp(g.start_block());
    let header = g.new_block(&[entry_jmp]);
    let two = g.new_const(Tarval::from_i64(2, iu, &program.modes));
    let limit = g.new_const(Tarval::from_i64(100, iu, &program.modes));
    let i_phi = g.new_phi(header, &[two], iu);
    let cmp = g.new_cmp(header, i_phi, limit, Relation::LT);
    let cond = g.new_cond(header, cmp);
    let pt = g.new_proj(cond, Mode::X, pn::COND_TRUE);
    let pf = g.new_proj(cond, Mode::X, pn::COND_FALSE);
    let body = g.new_block(&[pt]);
    let sq = g.new_mul(body, i_phi, i_phi, iu);
    let back = g.new_jmp(body);
    g.add_input(header, back);
    g.add_input(i_phi, sq);
    let after = g.new_block(&[pf]);
    let ret = g.new_return(after, g.initial_mem(), &[i_phi]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);
    let gid = add_function(&mut program, "square", g);

    let unrolled = unroll_loops(&mut program, gid, 4, 400);
    assert_eq!(unrolled, 0);
    assert_eq!(program.graph_mut(gid).arity(header), 2);
}

#[test]
fn unrolled_graph_keeps_phi_arity_invariant() {
    let (mut program, iu) = setup();
    let mut g = Graph::new();
    let limit = g.new_const(Tarval::from_i64(8, iu, &program.modes));
    let lp = build_counted_loop(&mut g, &program, iu, limit);
    let gid = add_function(&mut program, "sum8", g);

    unroll_loops(&mut program, gid, 8, 400);

    let g = program.graph_mut(gid);
    assert!(g.arity(lp.after) > 1);
    for n in g.collect_post_order() {
        if g.op(n) == Opcode::Phi {
            let owner = g.block_of(n);
            assert_eq!(g.arity(n), g.arity(owner));
        }
    }
}
