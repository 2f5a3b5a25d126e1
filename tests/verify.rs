// End-to-end verifier tests: programs with deliberate type/entity damage
// must be reported on the warning channel and fail the aggregate check,
// healthy programs and graphs must pass.

use mezzo::ir::verify::irg_verify;
use mezzo::types::{
    tr_verify, EntityKind, Initializer, Linkage, Program, Segment, Visibility,
};
use mezzo::{Graph, Tarval};

#[test]
fn method_entity_graph_back_pointer_is_checked() {
    let mut program = Program::new();
    let mtp = program.types.new_method(vec![], vec![]);
    let seg = program.segment(Segment::Global);
    let a = program.types.new_entity(seg, "a", mtp, EntityKind::Method);
    let b = program.types.new_entity(seg, "b", mtp, EntityKind::Method);
    program.types.entity_mut(a).ld_name = Some("a".into());
    program.types.entity_mut(b).ld_name = Some("b".into());

    let gid = program.add_graph(Graph::new());
    program.set_entity_graph(a, gid);
    assert!(tr_verify(&program));

    // break the relation: b claims the graph that points back to a
    program.types.entity_mut(b).graph = Some(gid);
    assert!(!tr_verify(&program));
}

#[test]
fn initializer_constants_must_live_on_the_const_code_graph() {
    let mut program = Program::new();
    let iu = program.modes.new_int_mode("Iu", 32, false, 32);
    let prim = program.types.new_primitive(iu);
    let seg = program.segment(Segment::Global);
    let ent = program.types.new_entity(seg, "v", prim, EntityKind::Normal);
    program.types.entity_mut(ent).ld_name = Some("v".into());

    let tv = Tarval::from_i64(42, iu, &program.modes);
    let ok = program.const_code.new_const(tv);
    program.types.entity_mut(ent).initializer = Some(Initializer::Const(ok));
    assert!(tr_verify(&program));

    // a node id far outside the const-code pool
    let bogus = {
        let mut other = Graph::new();
        for _ in 0..64 {
            other.new_const(tv);
        }
        let n = other.new_const(tv);
        let gid = program.add_graph(other);
        let _ = gid;
        n
    };
    program.types.entity_mut(ent).initializer = Some(Initializer::Const(bogus));
    assert!(!tr_verify(&program));
}

#[test]
fn weak_linkage_requires_external_visibility_and_a_definition() {
    let mut program = Program::new();
    let iu = program.modes.new_int_mode("Iu", 32, false, 32);
    let prim = program.types.new_primitive(iu);
    let seg = program.segment(Segment::Global);
    let ent = program.types.new_entity(seg, "w", prim, EntityKind::Normal);
    program.types.entity_mut(ent).ld_name = Some("w".into());
    program.types.entity_mut(ent).linkage = Linkage::WEAK;

    // declaration only: must be flagged
    assert!(!tr_verify(&program));

    let tv = Tarval::from_i64(0, iu, &program.modes);
    program.types.entity_mut(ent).initializer = Some(Initializer::Tarval(tv));
    assert!(tr_verify(&program));

    program.types.entity_mut(ent).visibility = Visibility::Local;
    assert!(!tr_verify(&program));
}

#[test]
fn thread_local_segment_rejects_methods_and_constants() {
    let mut program = Program::new();
    let iu = program.modes.new_int_mode("Iu", 32, false, 32);
    let prim = program.types.new_primitive(iu);
    let tls = program.segment(Segment::ThreadLocal);
    let ent = program.types.new_entity(tls, "t", prim, EntityKind::Normal);
    program.types.entity_mut(ent).ld_name = Some("t".into());
    assert!(tr_verify(&program));

    program.types.entity_mut(ent).linkage = Linkage::CONSTANT;
    assert!(!tr_verify(&program));
}

#[test]
fn verifier_does_not_mutate() {
    let mut program = Program::new();
    let iu = program.modes.new_int_mode("Iu", 32, false, 32);
    let prim = program.types.new_primitive(iu);
    let seg = program.segment(Segment::Global);
    let ent = program.types.new_entity(seg, "x", prim, EntityKind::Normal);
    // nameless public member: one violation, reported every run
    let _ = ent;
    assert!(!tr_verify(&program));
    assert!(!tr_verify(&program));
}

#[test]
fn graph_verify_accepts_a_well_formed_function() {
    let mut program = Program::new();
    let iu = program.modes.new_int_mode("Iu", 32, false, 32);
    let mut g = Graph::new();
    let c = g.new_const(Tarval::from_i64(5, iu, &program.modes));
    let ret = g.new_return(g.start_block(), g.initial_mem(), &[c]);
    let end_block = g.end_block();
    g.add_input(end_block, ret);
    let gid = program.add_graph(g);
    assert!(irg_verify(program.graph_mut(gid)));
}
