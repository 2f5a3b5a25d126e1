// End-to-end tests for the doubleword lowering pass: whole graphs are
// built through the construction API, lowered, and checked against the
// backend contract (no doubleword-mode node remains reachable, arithmetic
// is routed through the runtime intrinsics, control flow compares are
// decomposed into half-word compares).

use mezzo::ir::node::pn;
use mezzo::lower::{lower_dw_ops, DefaultIntrinsicFactory, LowerDwParams};
use mezzo::types::{EntityKind, Segment};
use mezzo::{Graph, Mode, NodeId, Opcode, Program, Relation, Tarval};

struct Setup {
    program: Program,
    l_signed: Mode,
    l_unsigned: Mode,
    w_unsigned: Mode,
}

/// A program with 64-bit doubleword modes and the 32-bit word modes the
/// lowering will reuse.
fn setup() -> Setup {
    let mut program = Program::new();
    let l_signed = program.modes.new_int_mode("Ls", 64, true, 64);
    let l_unsigned = program.modes.new_int_mode("Lu", 64, false, 64);
    let _w_signed = program.modes.new_int_mode("Is", 32, true, 32);
    let w_unsigned = program.modes.new_int_mode("Iu", 32, false, 32);
    Setup {
        program,
        l_signed,
        l_unsigned,
        w_unsigned,
    }
}

/// Register a graph for a method `name` with the given signature.
fn add_function(
    program: &mut Program,
    name: &str,
    params: &[Mode],
    results: &[Mode],
    graph: Graph,
) -> mezzo::GraphId {
    let param_tps: Vec<_> = params
        .iter()
        .map(|&m| program.types.new_primitive(m))
        .collect();
    let res_tps: Vec<_> = results
        .iter()
        .map(|&m| program.types.new_primitive(m))
        .collect();
    let mtp = program.types.new_method(param_tps, res_tps);
    let seg = program.segment(Segment::Global);
    let ent = program.types.new_entity(seg, name, mtp, EntityKind::Method);
    program.types.entity_mut(ent).ld_name = Some(name.to_string());
    let gid = program.add_graph(graph);
    program.set_entity_graph(ent, gid);
    gid
}

fn lower(program: &mut Program) {
    let seg = program.segment(Segment::Global);
    let mut factory = DefaultIntrinsicFactory { segment: seg };
    lower_dw_ops(program, &LowerDwParams::new(64, true), &mut factory);
}

/// All nodes reachable from End.
fn reachable(graph: &mut Graph) -> Vec<NodeId> {
    graph.collect_post_order()
}

fn assert_no_doubleword(program: &mut Program, gid: mezzo::GraphId, dw: &[Mode]) {
    let g = program.graph_mut(gid);
    for n in reachable(g) {
        let mode = g.mode(n);
        assert!(
            !dw.contains(&mode),
            "doubleword node {:?} ({}) survived lowering",
            n,
            g.op(n).name()
        );
    }
}

#[test]
fn doubleword_add_becomes_intrinsic_call() {
    let Setup {
        mut program,
        l_signed,
        l_unsigned,
        w_unsigned,
    } = setup();

    let mut g = Graph::new();
    let block = g.start_block();
    let a = g.new_proj(g.args(), l_unsigned, 0);
    let b = g.new_proj(g.args(), l_unsigned, 1);
    let add = g.new_add(block, a, b, l_unsigned);
    let ret = g.new_return(block, g.initial_mem(), &[add]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);
    let gid = add_function(
        &mut program,
        "f",
        &[l_unsigned, l_unsigned],
        &[l_unsigned],
        g,
    );

    lower(&mut program);
    assert_no_doubleword(&mut program, gid, &[l_signed, l_unsigned]);

    let g = program.graph_mut(gid);
    let calls: Vec<NodeId> = reachable(g)
        .into_iter()
        .filter(|&n| g.op(n) == Opcode::Call)
        .collect();
    assert_eq!(calls.len(), 1);
    let call = calls[0];

    // (lo_a, hi_a, lo_b, hi_b) after memory and callee address
    assert_eq!(g.arity(call), 6);
    for i in 2..6 {
        assert_eq!(g.mode(g.input(call, i)), w_unsigned);
    }
    let callee = g.input(call, 1);
    assert_eq!(g.op(callee), Opcode::SymConv);
    let ent = g.node_entity(callee);
    assert_eq!(program.types.entity(ent).name, "__ladd_ll");

    // the Return now carries the two result Projs
    let g = program.graph_mut(gid);
    let end_block = g.end_block();
    let ret = g.input(end_block, 0);
    assert_eq!(g.op(ret), Opcode::Return);
    assert_eq!(g.arity(ret), 3);
    let lo = g.input(ret, 1);
    let hi = g.input(ret, 2);
    assert_eq!(g.op(lo), Opcode::Proj);
    assert_eq!(g.op(hi), Opcode::Proj);
    assert_eq!(g.proj_num(lo), 0);
    assert_eq!(g.proj_num(hi), 1);
}

#[test]
fn doubleword_constant_splits_into_half_words() {
    let Setup {
        mut program,
        l_signed,
        l_unsigned,
        w_unsigned,
    } = setup();

    let mut g = Graph::new();
    let block = g.start_block();
    let c = g.new_const(Tarval::from_bits(
        0x0000_0001_ffff_ffff,
        l_unsigned,
        &program.modes,
    ));
    let ret = g.new_return(block, g.initial_mem(), &[c]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);
    let gid = add_function(&mut program, "k", &[], &[l_unsigned], g);

    lower(&mut program);
    assert_no_doubleword(&mut program, gid, &[l_signed, l_unsigned]);

    let g = program.graph_mut(gid);
    let end_block = g.end_block();
    let ret = g.input(end_block, 0);
    let lo = g.input(ret, 1);
    let hi = g.input(ret, 2);
    assert_eq!(g.op(lo), Opcode::Const);
    assert_eq!(g.op(hi), Opcode::Const);
    assert_eq!(g.const_value(lo).bits(), 0xffff_ffff);
    assert_eq!(g.const_value(hi).bits(), 0x0000_0001);
    assert_eq!(g.const_value(lo).mode(), w_unsigned);
    assert_eq!(g.const_value(hi).mode(), w_unsigned);
}

#[test]
fn large_constant_shift_folds_into_half_words() {
    let Setup {
        mut program,
        l_signed,
        l_unsigned,
        w_unsigned,
    } = setup();

    // a << 40 becomes high = Shl(lo_a, 8), low = 0
    let mut g = Graph::new();
    let block = g.start_block();
    let a = g.new_proj(g.args(), l_unsigned, 0);
    let count = g.new_const(Tarval::from_i64(40, w_unsigned, &program.modes));
    let shl = g.new_binop(Opcode::Shl, block, a, count, l_unsigned);
    let ret = g.new_return(block, g.initial_mem(), &[shl]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);
    let gid = add_function(&mut program, "s", &[l_unsigned], &[l_unsigned], g);

    lower(&mut program);
    assert_no_doubleword(&mut program, gid, &[l_signed, l_unsigned]);

    let g = program.graph_mut(gid);
    let end_block = g.end_block();
    let ret = g.input(end_block, 0);
    let lo = g.input(ret, 1);
    let hi = g.input(ret, 2);
    assert_eq!(g.op(lo), Opcode::Const);
    assert!(g.const_value(lo).is_null());
    assert_eq!(g.op(hi), Opcode::Shl);
    let shift_count = g.input(hi, 1);
    assert_eq!(g.const_value(shift_count).bits(), 8);
    // no intrinsic call was needed
    let no_calls = reachable(g).iter().all(|&n| g.op(n) != Opcode::Call);
    assert!(no_calls);
}

#[test]
fn equality_with_zero_becomes_or_of_halves() {
    let Setup {
        mut program,
        l_signed,
        l_unsigned,
        w_unsigned,
    } = setup();

    let mut g = Graph::new();
    let entry = g.start_block();
    let x = g.new_proj(g.args(), l_unsigned, 0);
    let zero = g.new_const(Tarval::null(l_unsigned));
    let cmp = g.new_cmp(entry, x, zero, Relation::EQ);
    let cond = g.new_cond(entry, cmp);
    let pt = g.new_proj(cond, Mode::X, pn::COND_TRUE);
    let pf = g.new_proj(cond, Mode::X, pn::COND_FALSE);
    let w_one = g.new_const(Tarval::from_i64(1, w_unsigned, &program.modes));
    let w_two = g.new_const(Tarval::from_i64(2, w_unsigned, &program.modes));
    let then_b = g.new_block(&[pt]);
    let ret_t = g.new_return(then_b, g.initial_mem(), &[w_one]);
    let else_b = g.new_block(&[pf]);
    let ret_f = g.new_return(else_b, g.initial_mem(), &[w_two]);
    let end_block = g.end_block();
    g.add_input(end_block, ret_t);
    g.add_input(end_block, ret_f);
    let gid = add_function(&mut program, "z", &[l_unsigned], &[w_unsigned], g);

    lower(&mut program);
    assert_no_doubleword(&mut program, gid, &[l_signed, l_unsigned]);

    let g = program.graph_mut(gid);
    let conds: Vec<NodeId> = reachable(g)
        .into_iter()
        .filter(|&n| g.op(n) == Opcode::Cond)
        .collect();
    assert_eq!(conds.len(), 1);
    let sel = g.input(conds[0], 0);
    assert_eq!(g.op(sel), Opcode::Cmp);
    assert_eq!(g.cmp_relation(sel), Relation::EQ);
    let or = g.input(sel, 0);
    assert_eq!(g.op(or), Opcode::Or);
    assert_eq!(g.mode(or), w_unsigned);
    assert!(g.const_value(g.input(sel, 1)).is_null());
}

#[test]
fn ordered_compare_builds_short_circuit_control_flow() {
    let Setup {
        mut program,
        l_signed,
        l_unsigned,
        w_unsigned,
    } = setup();

    let mut g = Graph::new();
    let entry = g.start_block();
    let x = g.new_proj(g.args(), l_signed, 0);
    let y = g.new_proj(g.args(), l_signed, 1);
    let cmp = g.new_cmp(entry, x, y, Relation::LT);
    let cond = g.new_cond(entry, cmp);
    let pt = g.new_proj(cond, Mode::X, pn::COND_TRUE);
    let pf = g.new_proj(cond, Mode::X, pn::COND_FALSE);
    let w_one = g.new_const(Tarval::from_i64(1, w_unsigned, &program.modes));
    let w_two = g.new_const(Tarval::from_i64(2, w_unsigned, &program.modes));
    let then_b = g.new_block(&[pt]);
    let ret_t = g.new_return(then_b, g.initial_mem(), &[w_one]);
    let else_b = g.new_block(&[pf]);
    let ret_f = g.new_return(else_b, g.initial_mem(), &[w_two]);
    let end_block = g.end_block();
    g.add_input(end_block, ret_t);
    g.add_input(end_block, ret_f);
    let gid = add_function(&mut program, "lt", &[l_signed, l_signed], &[w_unsigned], g);

    lower(&mut program);
    assert_no_doubleword(&mut program, gid, &[l_signed, l_unsigned]);

    // a < b over pairs needs three compares: high <, high ==, low <
    let g = program.graph_mut(gid);
    let cmps: Vec<NodeId> = reachable(g)
        .into_iter()
        .filter(|&n| g.op(n) == Opcode::Cmp)
        .collect();
    assert_eq!(cmps.len(), 3);
    let rels: Vec<Relation> = cmps.iter().map(|&c| g.cmp_relation(c)).collect();
    assert!(rels.contains(&Relation::EQ));
    assert!(rels.iter().filter(|&&r| r == Relation::LT).count() == 2);

    // both target blocks now merge two control-flow edges
    let g = program.graph_mut(gid);
    assert_eq!(g.arity(then_b), 2);
    assert_eq!(g.arity(else_b), 2);
    assert!(mezzo::ir::verify::irg_verify(g));
}

#[test]
fn lowering_is_idempotent() {
    let Setup {
        mut program,
        l_unsigned,
        ..
    } = setup();

    let mut g = Graph::new();
    let block = g.start_block();
    let a = g.new_proj(g.args(), l_unsigned, 0);
    let b = g.new_proj(g.args(), l_unsigned, 1);
    let add = g.new_add(block, a, b, l_unsigned);
    let ret = g.new_return(block, g.initial_mem(), &[add]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);
    let gid = add_function(
        &mut program,
        "f",
        &[l_unsigned, l_unsigned],
        &[l_unsigned],
        g,
    );

    lower(&mut program);
    let nodes_after_first = program.graph(gid).n_nodes();
    let types_after_first = {
        let ent = program.graph(gid).entity.unwrap();
        program.types.entity(ent).ty
    };

    lower(&mut program);
    assert_eq!(program.graph(gid).n_nodes(), nodes_after_first);
    let ent = program.graph(gid).entity.unwrap();
    assert_eq!(program.types.entity(ent).ty, types_after_first);
}

#[test]
fn signed_conversion_widens_with_sign_extension() {
    let Setup {
        mut program,
        l_signed,
        l_unsigned,
        ..
    } = setup();
    let w_signed = program.modes.find_int_mode(32, true).unwrap();

    // (i64)(i32 x) : high word is an arithmetic shift of the low word
    let mut g = Graph::new();
    let block = g.start_block();
    let x = g.new_proj(g.args(), w_signed, 0);
    let conv = g.new_conv(block, x, l_signed);
    let ret = g.new_return(block, g.initial_mem(), &[conv]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);
    let gid = add_function(&mut program, "ext", &[w_signed], &[l_signed], g);

    lower(&mut program);
    assert_no_doubleword(&mut program, gid, &[l_signed, l_unsigned]);

    let g = program.graph_mut(gid);
    let end_block = g.end_block();
    let ret = g.input(end_block, 0);
    let hi = g.input(ret, 2);
    assert_eq!(g.op(hi), Opcode::Shrs);
    assert_eq!(g.const_value(g.input(hi, 1)).bits(), 31);
}

#[test]
fn doubleword_loads_split_and_share_the_memory_chain() {
    let Setup {
        mut program,
        l_signed,
        l_unsigned,
        ..
    } = setup();

    let mut g = Graph::new();
    let block = g.start_block();
    let ptr = g.new_proj(g.args(), Mode::P, 0);
    let load = g.new_load(block, g.initial_mem(), ptr, l_unsigned, false);
    let mem = g.new_proj(load, Mode::M, pn::LOAD_M);
    let res = g.new_proj(load, l_unsigned, pn::LOAD_RES);
    let ret = g.new_return(block, mem, &[res]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);

    let ptr_ty = {
        let prim = program.types.new_primitive(l_unsigned);
        program.types.new_pointer(prim)
    };
    let res_ty = program.types.new_primitive(l_unsigned);
    let mtp = program.types.new_method(vec![ptr_ty], vec![res_ty]);
    let seg = program.segment(Segment::Global);
    let ent = program
        .types
        .new_entity(seg, "deref", mtp, EntityKind::Method);
    program.types.entity_mut(ent).ld_name = Some("deref".to_string());
    let gid = program.add_graph(g);
    program.set_entity_graph(ent, gid);

    lower(&mut program);
    assert_no_doubleword(&mut program, gid, &[l_signed, l_unsigned]);

    let g = program.graph_mut(gid);
    let loads: Vec<NodeId> = reachable(g)
        .into_iter()
        .filter(|&n| g.op(n) == Opcode::Load)
        .collect();
    assert_eq!(loads.len(), 2);

    // the memory Proj of the original Load now hangs off the second Load,
    // whose own memory input chains through the first
    let end_block = g.end_block();
    let ret = g.input(end_block, 0);
    let mem = g.input(ret, 0);
    assert_eq!(g.op(mem), Opcode::Proj);
    let second = g.proj_pred(mem);
    assert_eq!(g.op(second), Opcode::Load);
    let chain = g.input(second, 0);
    assert_eq!(g.op(chain), Opcode::Proj);
    assert_eq!(g.op(g.proj_pred(chain)), Opcode::Load);
}
