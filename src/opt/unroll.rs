//! Loop unrolling on LCSSA graphs.
//!
//! Innermost loops are duplicated factor-1 times; the link slot pairs every
//! original node with its most recent copy while the edges are rewired.
//! When the trip count of a linear induction is statically known and the
//! factor equals it, the control-flow loop is removed entirely: the
//! back-jumps are redirected to the block after the loop and its Phis
//! receive the per-iteration values.
//!
//! A loop is refused without mutation when no header is identifiable, the
//! induction is nonlinear or possibly aliased, an opaque call is reachable
//! from the loop body, or LCSSA construction could not close it.

use log::debug;
use rustc_hash::FxHashSet;

use crate::core::mode::{Mode, Relation};
use crate::core::tarval::Tarval;
use crate::ir::graph::{Graph, GraphProperties, Resources, POS_BLOCK};
use crate::ir::loops::{LoopElement, LoopId};
use crate::ir::node::{NodeId, Opcode};
use crate::opt::lcssa::assure_lcssa;
use crate::types::{GraphId, Program};

/// Parameters of one unrolling run.
#[derive(Clone, Copy, Debug)]
pub struct UnrollParams {
    /// Maximum unroll factor.
    pub factor: u32,
    /// Loops with at least this many nodes are left alone.
    pub maxsize: u32,
}

// ---- analysis --------------------------------------------------------

/// Everything the mutation phase needs to know about one loop, collected
/// before any rewriting starts.
struct Decision {
    header: NodeId,
    /// Member blocks, nested loops included (none for innermost loops).
    blocks: Vec<NodeId>,
    members: FxHashSet<NodeId>,
    factor: u32,
    fully_unroll: bool,
}

fn loop_blocks(graph: &Graph, l: LoopId) -> Vec<NodeId> {
    let tree = graph.loop_tree();
    let mut blocks = Vec::new();
    let mut stack = vec![l];
    while let Some(cur) = stack.pop() {
        for &el in tree.elements(cur) {
            match el {
                LoopElement::Block(b) => blocks.push(b),
                LoopElement::Loop(sub) => stack.push(sub),
            }
        }
    }
    blocks
}

fn count_nodes(graph: &Graph, l: LoopId) -> usize {
    loop_blocks(graph, l)
        .iter()
        .map(|&b| graph.n_outs(b))
        .sum()
}

/// The unique Block dominating every Block of the loop, found by walking
/// the immediate-dominator chain upwards while still inside the loop.
fn loop_header(graph: &Graph, l: LoopId) -> Option<NodeId> {
    let tree = graph.loop_tree();
    let mut header = tree.elements(l).iter().find_map(|&el| match el {
        LoopElement::Block(b) => Some(b),
        LoopElement::Loop(_) => None,
    })?;

    while let Some(idom) = graph.idom(header) {
        if graph.loop_tree().block_inside_loop(idom, l) {
            header = idom;
        } else {
            break;
        }
    }

    let dominates_all = loop_blocks(graph, l)
        .iter()
        .all(|&b| graph.block_dominates(header, b));
    dominates_all.then_some(header)
}

/// Member nodes of a block, via the out table.
fn block_members(graph: &Graph, block: NodeId) -> Vec<NodeId> {
    graph
        .outs_of(block)
        .iter()
        .filter(|e| e.pos == POS_BLOCK)
        .map(|e| e.user)
        .collect()
}

/// Address description of a memory access, for the conservative alias
/// test: two accesses are assumed to alias unless both name distinct
/// entities.
#[derive(Clone, Copy, PartialEq, Eq)]
struct AddrDesc {
    entity: Option<crate::types::EntityId>,
}

fn addr_desc(graph: &Graph, addr: NodeId) -> AddrDesc {
    match graph.op(addr) {
        Opcode::Address | Opcode::SymConv | Opcode::Sel => AddrDesc {
            entity: Some(graph.node_entity(addr)),
        },
        _ => AddrDesc { entity: None },
    }
}

fn may_alias(a: AddrDesc, b: AddrDesc) -> bool {
    match (a.entity, b.entity) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Callee graph of a Call, if its target is statically known.
fn call_callee(program: &Program, graph: &Graph, call: NodeId) -> Option<GraphId> {
    let ptr = graph.input(call, 1);
    match graph.op(ptr) {
        Opcode::SymConv | Opcode::Address => {
            let ent = graph.node_entity(ptr);
            program.types.entity(ent).graph
        }
        _ => None,
    }
}

/// Collect the Store address descriptions reachable from the loop:
/// Stores in the loop body plus Stores anywhere in graphs of calls
/// reachable from it. `None` means an opaque call was found, which
/// refuses unrolling of this loop.
fn collect_alias_candidates(
    program: &Program,
    graph: &Graph,
    blocks: &[NodeId],
) -> Option<Vec<AddrDesc>> {
    let mut candidates = Vec::new();
    let mut visited_graphs: FxHashSet<GraphId> = FxHashSet::default();
    let mut callee_queue: Vec<GraphId> = Vec::new();

    for &b in blocks {
        for n in block_members(graph, b) {
            match graph.op(n) {
                Opcode::Store => candidates.push(addr_desc(graph, graph.input(n, 1))),
                Opcode::Call => match call_callee(program, graph, n) {
                    Some(gid) => {
                        if visited_graphs.insert(gid) {
                            callee_queue.push(gid);
                        }
                    }
                    None => {
                        debug!("unroll: opaque call {:?} reachable from loop", n);
                        return None;
                    }
                },
                _ => {}
            }
        }
    }

    while let Some(gid) = callee_queue.pop() {
        let callee = program.graph(gid);
        for n in callee.node_ids() {
            match callee.op(n) {
                Opcode::Store => candidates.push(addr_desc(callee, callee.input(n, 1))),
                Opcode::Call => match call_callee(program, callee, n) {
                    Some(sub) => {
                        if visited_graphs.insert(sub) {
                            callee_queue.push(sub);
                        }
                    }
                    None => return None,
                },
                _ => {}
            }
        }
    }

    Some(candidates)
}

struct LinearInfo {
    cmp: NodeId,
    phi: NodeId,
}

struct AnalysisCtx<'a> {
    program: &'a Program,
    graph: &'a Graph,
    l: LoopId,
    candidates: Vec<AddrDesc>,
}

impl<'a> AnalysisCtx<'a> {
    fn inside(&self, block: NodeId) -> bool {
        self.graph.loop_tree().block_inside_loop(block, self.l)
    }

    fn is_aliased(&self, desc: AddrDesc) -> bool {
        self.candidates.iter().any(|&c| may_alias(c, desc))
    }

    /// A static base: constant for the whole execution of the loop.
    fn is_valid_base(&self, node: NodeId) -> bool {
        let g = self.graph;
        match g.op(node) {
            Opcode::Const => true,
            Opcode::Proj => {
                let pred = g.proj_pred(node);
                match g.op(pred) {
                    Opcode::Load => !self.is_aliased(addr_desc(g, g.input(pred, 1))),
                    Opcode::Proj => {
                        let call = g.proj_pred(pred);
                        if g.op(call) != Opcode::Call {
                            return false;
                        }
                        let Some(gid) = call_callee(self.program, g, call) else {
                            return false;
                        };
                        let callee_ent = self.program.graph(gid).entity;
                        let pure_fn = callee_ent
                            .map(|e| {
                                let ty = self.program.types.entity(e).ty;
                                self.program.types.method(ty).pure_function
                            })
                            .unwrap_or(false);
                        if !pure_fn {
                            return false;
                        }
                        for i in 2..g.arity(call) {
                            if !self.is_valid_base(g.input(call, i)) {
                                return false;
                            }
                        }
                        !self.is_aliased(addr_desc(g, g.input(call, 1)))
                    }
                    _ => false,
                }
            }
            Opcode::Phi => {
                let mut pointing_into_loop = 0;
                for i in 0..g.arity(node) {
                    let pred = g.input(node, i);
                    if self.inside(g.block_of(pred)) {
                        pointing_into_loop += 1;
                    }
                    if !self.is_valid_base(pred) {
                        return false;
                    }
                }
                pointing_into_loop <= 1
            }
            Opcode::Conv => self.is_valid_base(g.input(node, 0)),
            _ => false,
        }
    }

    /// Is `node` the loop increment: a binop combining the header Phi with
    /// a static base?
    fn is_valid_incr(&self, phi: NodeId, node: NodeId) -> bool {
        let g = self.graph;
        if !matches!(g.op(node), Opcode::Add | Opcode::Sub | Opcode::Mul) {
            return false;
        }
        let left = g.input(node, 0);
        let right = g.input(node, 1);
        let other = if left == phi {
            right
        } else if right == phi {
            left
        } else {
            return false;
        };
        self.is_valid_base(other)
    }

    fn check_phi(&self, phi: NodeId) -> bool {
        let g = self.graph;
        let arity = g.arity(phi);
        if arity < 2 {
            return false;
        }
        let mut incr_index = None;
        for i in 0..arity {
            if self.is_valid_incr(phi, g.input(phi, i)) {
                incr_index = Some(i);
            }
        }
        let Some(incr_index) = incr_index else {
            return false;
        };
        for i in 0..arity {
            if i == incr_index {
                continue;
            }
            if !self.is_valid_base(g.input(phi, i)) {
                return false;
            }
        }
        true
    }

    /// Find the controlling compare of the loop and verify the linear
    /// induction behind it.
    fn determine_linear_info(&self, header: NodeId) -> Option<LinearInfo> {
        let g = self.graph;
        for node in block_members(g, header) {
            if g.block_of(node) != header || g.op(node) != Opcode::Cmp {
                continue;
            }
            let rel = g.cmp_relation(node);
            if !rel.is_ordering() {
                continue;
            }
            let left = g.input(node, 0);
            let right = g.input(node, 1);
            if g.op(left) != Opcode::Phi && g.op(right) != Opcode::Phi {
                return None;
            }
            for cand in [left, right] {
                if g.op(cand) == Opcode::Phi && self.check_phi(cand) {
                    return Some(LinearInfo {
                        cmp: node,
                        phi: cand,
                    });
                }
            }
            return None;
        }
        None
    }
}

/// Follow chains of one-input Phis (LCSSA construction builds them) until
/// a real node or the given Phi is found.
fn skip_trivial_phis(graph: &Graph, mut node: NodeId) -> NodeId {
    while graph.op(node) == Opcode::Phi && graph.arity(node) == 1 {
        node = graph.input(node, 0);
    }
    node
}

/// Largest usable factor for a statically counted loop: the trip count
/// itself when small enough, otherwise its largest power-of-two divisor
/// within the limit.
fn find_optimal_factor(number: u64, max: u32) -> u32 {
    if number <= max as u64 {
        return number as u32;
    }
    let mut i = 2;
    while i <= number / 2 {
        if number % i == 0 {
            let candidate = number / i;
            if candidate <= max as u64 && candidate != 0 && candidate & (candidate - 1) == 0 {
                return candidate as u32;
            }
        }
        i += 1;
    }
    0
}

/// Statically derive the trip count from the compare: requires
/// `Cmp(phi, Const)` with constant init and constant step.
fn static_trip_count(graph: &Graph, program: &Program, info: &LinearInfo) -> Option<u64> {
    let g = graph;
    let reg = &program.modes;
    let mut rel = g.cmp_relation(info.cmp);

    let right = g.input(info.cmp, 1);
    if g.op(right) != Opcode::Const || !reg.is_int(g.mode(right)) {
        return None;
    }
    let header_phi = g.input(info.cmp, 0);
    if g.op(header_phi) != Opcode::Phi || header_phi != info.phi {
        return None;
    }
    let mut tv_limit = g.const_value(right);

    let mut tv_init: Option<Tarval> = None;
    let mut tv_step: Option<Tarval> = None;
    let mut cnt_add: Option<NodeId> = None;
    for i in 0..g.arity(header_phi) {
        let pred = g.input(header_phi, i);
        if g.op(pred) == Opcode::Const && reg.is_int(g.mode(pred)) {
            let tv = g.const_value(pred);
            match tv_init {
                None => {
                    tv_init = Some(tv);
                    continue;
                }
                Some(prev) if prev.cmp(&tv, reg) == Relation::EQ => continue,
                Some(_) => {}
            }
        }
        let pred = skip_trivial_phis(g, pred);
        if g.op(pred) == Opcode::Add && cnt_add.is_none() {
            cnt_add = Some(pred);
            let left = g.input(pred, 0);
            let right = g.input(pred, 1);
            if g.op(right) == Opcode::Const && g.op(left) == Opcode::Phi {
                // LCSSA construction may have stacked trivial Phis between
                // the increment and the header Phi
                let mut cur = left;
                let mut found = false;
                loop {
                    if cur == header_phi {
                        found = true;
                        tv_step = Some(g.const_value(right));
                        break;
                    }
                    if g.op(cur) != Opcode::Phi || g.arity(cur) != 1 {
                        break;
                    }
                    cur = g.input(cur, 0);
                }
                if found {
                    continue;
                }
            }
            return None;
        }
        if Some(pred) == cnt_add {
            // multiple uses of the same increment
            continue;
        }
        return None;
    }

    let mut tv_init = tv_init?;
    let mut tv_step = tv_step?;

    // normalize to a less-than/less-equal relation
    if rel.contains(Relation::GT) {
        std::mem::swap(&mut tv_init, &mut tv_limit);
        tv_step = tv_step.neg(reg);
        rel = rel.inversed();
    }

    let mut interval = tv_limit.sub(&tv_init, reg);
    if interval.is_negative(reg) || tv_step.is_negative(reg) || tv_step.is_null() {
        return None;
    }
    let one = Tarval::from_i64(1, interval.mode(), reg);
    if !rel.contains(Relation::EQ) {
        interval = interval.sub(&one, reg);
    }
    let count_tv = interval.div(&tv_step, reg).add(&one, reg);
    let count = count_tv.as_long(reg)?;
    (count > 0).then_some(count as u64)
}

/// Analyze one innermost loop and decide whether and how far to unroll.
fn decide(program: &Program, graph: &Graph, l: LoopId, params: &UnrollParams) -> Option<Decision> {
    if count_nodes(graph, l) >= params.maxsize as usize {
        return None;
    }
    let header = loop_header(graph, l)?;
    debug!("unroll: found loop header {:?}", header);

    let blocks = loop_blocks(graph, l);
    let candidates = collect_alias_candidates(program, graph, &blocks)?;
    let ctx = AnalysisCtx {
        program,
        graph,
        l,
        candidates,
    };
    let info = ctx.determine_linear_info(header)?;

    let (factor, fully_unroll) = match static_trip_count(graph, program, &info) {
        Some(count) => {
            debug!("unroll: static trip count {}", count);
            let f = find_optimal_factor(count, params.factor);
            if f == 0 {
                return None;
            }
            (f, f as u64 == count)
        }
        // the copies keep their header test, so a conservative factor is
        // safe for unknown trip counts
        None => (params.factor.min(2), false),
    };
    if factor < 1 || (factor == 1 && !fully_unroll) {
        return None;
    }

    let members: FxHashSet<NodeId> = blocks.iter().copied().collect();
    Some(Decision {
        header,
        blocks,
        members,
        factor,
        fully_unroll,
    })
}

// ---- mutation --------------------------------------------------------

fn duplicate_node(graph: &mut Graph, node: NodeId, new_block: NodeId) -> NodeId {
    let copy = graph.exact_copy(node);
    if !graph.is_block(copy) {
        graph.set_block(copy, new_block);
    }
    // link the original and the most recent copy to the new node
    let link = graph.link(node);
    if !link.is_none() {
        graph.set_link(link, copy);
    }
    graph.set_link(node, copy);
    graph.set_link(copy, node);
    copy
}

fn duplicate_block(graph: &mut Graph, block: NodeId) {
    let new_block = duplicate_node(graph, block, NodeId::NONE);
    for node in block_members(graph, block) {
        if graph.block_of(node) != block {
            continue;
        }
        duplicate_node(graph, node, new_block);
    }
}

/// A block outside the loop gained a predecessor: mirror the new edge on
/// its Phis, using the copied value where one exists.
fn rewire_successor_block(graph: &mut Graph, block: NodeId, pos: u32) {
    let node = graph.input(block, pos as usize);
    let new_node = graph.link(node);
    assert!(!new_node.is_none());
    graph.add_input(block, new_node);

    for out in graph.outs_of(block).to_vec() {
        if out.pos != POS_BLOCK || graph.op(out.user) != Opcode::Phi {
            continue;
        }
        let phi = out.user;
        let pred = graph.input(phi, pos as usize);
        let mut new_pred = graph.link(pred);
        if new_pred.is_none() {
            new_pred = pred;
        }
        graph.add_input(phi, new_pred);
    }
}

fn rewire_node(graph: &mut Graph, node: NodeId, header: NodeId) {
    let new_node = graph.link(node);
    assert!(!new_node.is_none());
    assert_eq!(graph.arity(node), graph.arity(new_node));

    // successors outside the loop and keep-alive edges
    for out in graph.outs_of(node).to_vec() {
        let succ = out.user;
        if out.pos != POS_BLOCK && graph.link(succ).is_none() && graph.is_block(succ) {
            rewire_successor_block(graph, succ, out.pos);
        } else if graph.op(succ) == Opcode::End {
            graph.keep_alive(new_node);
        }
    }

    // the loop header block: back edges move to the copy, the original
    // keeps the outside entries plus new edges from the copy
    if node == header {
        let ins: Vec<NodeId> = graph.ins(node).to_vec();
        let mut copy_ins = Vec::new();
        for (i, &pred) in ins.iter().enumerate() {
            let new_pred = graph.link(pred);
            if !new_pred.is_none() {
                // jump to the old node from the new copy
                graph.set_input(node, i, new_pred);
                // jump to the new node only from the old one
                copy_ins.push(pred);
            }
        }
        graph.set_inputs(new_node, &copy_ins);
        return;
    }

    // Phis in the header mirror the partition of the header's edges
    if graph.op(node) == Opcode::Phi && graph.block_of(node) == header {
        let arity = graph.arity(node);
        assert_eq!(arity, graph.arity(header));
        let mut copy_ins = Vec::new();
        for i in 0..arity {
            if !graph.link(graph.input(header, i)).is_none() {
                let pred = graph.input(node, i);
                let new_pred = graph.link(pred);
                if !new_pred.is_none() {
                    graph.set_input(node, i, new_pred);
                }
                copy_ins.push(pred);
            }
        }
        graph.set_inputs(new_node, &copy_ins);
        return;
    }

    // ordinary node: point the copy at the copies of its operands
    for i in 0..graph.arity(new_node) {
        let pred = graph.input(new_node, i);
        let new_pred = graph.link(pred);
        if !new_pred.is_none() {
            graph.set_input(new_node, i, new_pred);
        }
    }
}

fn rewire_block(graph: &mut Graph, block: NodeId, header: NodeId) {
    rewire_node(graph, block, header);
    for node in block_members(graph, block) {
        if graph.block_of(node) != block {
            continue;
        }
        rewire_node(graph, node, header);
    }
}

/// Remove control input `idx` of a block together with the matching Phi
/// inputs. Phis collapsing to one input are replaced by it.
fn remove_block_input(graph: &mut Graph, block: NodeId, idx: usize) {
    let n = graph.arity(block) - 1;
    let phis: Vec<NodeId> = graph
        .outs_of(block)
        .to_vec()
        .iter()
        .filter(|e| e.pos == POS_BLOCK && graph.op(e.user) == Opcode::Phi)
        .map(|e| e.user)
        .collect();

    if n == 1 {
        for phi in phis {
            graph.remove_keep_alive(phi);
            let remaining = graph.input(phi, idx ^ 1);
            graph.exchange(phi, remaining);
        }
    } else {
        for phi in phis {
            let mut ins: Vec<NodeId> = graph.ins(phi).to_vec();
            ins.remove(idx);
            graph.set_inputs(phi, &ins);
        }
    }
    let mut ins: Vec<NodeId> = graph.ins(block).to_vec();
    ins.remove(idx);
    graph.set_inputs(block, &ins);
}

/// Memory chain walk from a value in the after-loop block back to the
/// memory Phi of the loop header.
fn trace_memory_phi(graph: &Graph, start: NodeId) -> NodeId {
    let mut cur = start;
    let mut fuel = graph.n_nodes();
    while graph.op(cur) != Opcode::Phi {
        assert!(fuel > 0, "memory chain does not reach a Phi");
        fuel -= 1;
        cur = graph.input(cur, 0);
    }
    cur
}

/// After full duplication the loop body is a straight line: redirect the
/// remaining back-jumps to the block after the loop, extend its Phis with
/// the last-iteration values and drop the corresponding header inputs.
fn rewire_fully_unrolled(graph: &mut Graph, d: &Decision) {
    let header = d.header;

    // 1. find the after-loop block through the header's control Projs
    let mut after_loop = NodeId::NONE;
    let mut n_after = 0u32;
    for out in graph.outs_of(header).to_vec() {
        if out.pos != POS_BLOCK {
            continue;
        }
        let succ = out.user;
        if graph.op(succ) != Opcode::Proj || graph.mode(succ) != Mode::X {
            continue;
        }
        for out2 in graph.outs_of(succ).to_vec() {
            let cf_succ = out2.user;
            if graph.link(cf_succ).is_none()
                && graph.is_block(cf_succ)
                && !d.members.contains(&cf_succ)
            {
                after_loop = cf_succ;
                n_after = out2.pos;
            }
        }
    }
    if after_loop.is_none() {
        return;
    }

    // 2..5. redirect every in-loop jump to the header
    let mut i = 0;
    while i < graph.arity(header) {
        let old_jump = graph.input(header, i);
        let pred_block = graph.block_of(old_jump);
        let link = graph.link(pred_block);
        let inside = d.members.contains(&pred_block)
            || (!link.is_none() && d.members.contains(&link));
        if (link.is_none() && d.factor > 1) || !inside {
            i += 1;
            continue;
        }

        graph.add_input(after_loop, old_jump);

        for out in graph.outs_of(after_loop).to_vec() {
            if out.pos != POS_BLOCK || graph.op(out.user) != Opcode::Phi {
                continue;
            }
            let phi = out.user;
            let pred = graph.input(phi, n_after as usize);
            let new_pred = if graph.op(pred) == Opcode::Phi {
                // value comes from a Phi in the loop header: take its
                // input on the removed edge
                graph.input(pred, i)
            } else if graph.mode(phi) == Mode::M {
                // memory Phi: walk the chain inside the loop header
                let mem_phi = trace_memory_phi(graph, pred);
                graph.input(mem_phi, i)
            } else {
                let l = graph.link(pred);
                if l.is_none() {
                    pred
                } else {
                    l
                }
            };
            graph.add_input(phi, new_pred);
        }

        remove_block_input(graph, header, i);
    }

    // 6. cleanup keep-alives
    graph.remove_end_bads_and_doublets();
    debug!("unroll: fully unrolled loop at header {:?}", header);
}

fn unroll_one(graph: &mut Graph, d: &Decision) {
    debug!(
        "unroll: unrolling loop at {:?} with factor {}",
        d.header, d.factor
    );
    graph.clear_links();

    for _ in 1..d.factor {
        for &b in &d.blocks {
            duplicate_block(graph, b);
        }
        for &b in &d.blocks {
            rewire_block(graph, b, d.header);
        }
    }

    if d.fully_unroll {
        rewire_fully_unrolled(graph, d);
    }
}

// ---- entry point -----------------------------------------------------

/// Unroll the innermost loops of one graph. Returns the number of loops
/// unrolled.
pub fn unroll_loops(program: &mut Program, gid: GraphId, factor: u32, maxsize: u32) -> u32 {
    let params = UnrollParams { factor, maxsize };

    let open = {
        let graph = program.graph_mut(gid);
        let open = assure_lcssa(graph);
        graph.assure_doms();
        graph.assure_loops();
        graph.compute_outs();
        open
    };

    // analysis over the immutable program
    let decisions: Vec<Decision> = {
        let graph = program.graph(gid);
        let tree = graph.loop_tree();
        let innermost: Vec<LoopId> = tree
            .loop_ids()
            .filter(|&l| l != tree.root())
            .filter(|&l| {
                !tree
                    .elements(l)
                    .iter()
                    .any(|e| matches!(e, LoopElement::Loop(_)))
            })
            .filter(|l| !open.contains(l))
            .collect();
        innermost
            .into_iter()
            .filter_map(|l| decide(program, graph, l, &params))
            .collect()
    };

    let graph = program.graph_mut(gid);
    graph.reserve_resources(Resources::LINK);
    let mut unrolled = 0;
    for d in &decisions {
        unroll_one(graph, d);
        unrolled += 1;
    }
    graph.free_resources(Resources::LINK);

    graph.clear_property(GraphProperties::CONSISTENT_DOMINANCE);
    graph.clear_property(GraphProperties::CONSISTENT_LOOPS);
    graph.clear_property(GraphProperties::LCSSA);
    graph.invalidate_outs();
    graph.remove_end_bads_and_doublets();
    graph.add_property(GraphProperties::NO_BADS);

    debug!("unroll: {} loops unrolled", unrolled);
    unrolled
}
