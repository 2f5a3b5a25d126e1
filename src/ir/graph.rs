//! The graph: node pool, construction API, mutation primitives and the
//! resource/property bookkeeping passes rely on.
//!
//! A graph owns all of its nodes in a dense pool; nodes are never freed
//! individually, unreachable ones are simply not visited by walks. The
//! anchor nodes (start/end blocks, Start, End, NoMem, the argument tuple and
//! the initial memory Proj) are created with the graph.

use smallvec::SmallVec;

use crate::core::mode::{Mode, Relation};
use crate::core::tarval::Tarval;
use crate::ir::loops::LoopTree;
use crate::ir::node::{pn, Attr, NodeData, NodeId, Opcode};
use crate::ir::outs::OutEdge;
use crate::types::{EntityId, TypeId};

/// Exclusively reservable per-graph resources. Reservation is not
/// reentrant: reserving a held token is a programming error.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Resources(u8);

impl Resources {
    pub const NONE: Resources = Resources(0);
    /// The per-node link slot.
    pub const LINK: Resources = Resources(1);
    /// The per-block Phi lists.
    pub const PHI_LIST: Resources = Resources(2);
    /// The visited counter (held by long-running marks, not by walks).
    pub const VISITED: Resources = Resources(4);

    pub fn contains(self, other: Resources) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Resources) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: Resources) -> Resources {
        Resources(self.0 | other.0)
    }

    pub fn without(self, other: Resources) -> Resources {
        Resources(self.0 & !other.0)
    }
}

/// Graph state properties asserted and invalidated by passes.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct GraphProperties(u8);

impl GraphProperties {
    pub const NONE: GraphProperties = GraphProperties(0);
    pub const CONSISTENT_DOMINANCE: GraphProperties = GraphProperties(1);
    pub const CONSISTENT_OUTS: GraphProperties = GraphProperties(2);
    pub const CONSISTENT_LOOPS: GraphProperties = GraphProperties(4);
    pub const NO_BADS: GraphProperties = GraphProperties(8);
    pub const LCSSA: GraphProperties = GraphProperties(16);

    pub fn contains(self, other: GraphProperties) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: GraphProperties) -> GraphProperties {
        GraphProperties(self.0 | other.0)
    }

    pub fn without(self, other: GraphProperties) -> GraphProperties {
        GraphProperties(self.0 & !other.0)
    }
}

/// Position marker in an out-edge for "this node's owning block is the
/// target" instead of a real input index.
pub const POS_BLOCK: u32 = u32::MAX;

/// A graph of operation nodes in SSA form.
pub struct Graph {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) visited: u64,
    reserved: Resources,
    properties: GraphProperties,
    /// Link slots, valid while `Resources::LINK` is reserved.
    pub(crate) link: Vec<NodeId>,
    /// Out-edge lists, valid while `CONSISTENT_OUTS` holds.
    pub(crate) outs: Vec<Vec<OutEdge>>,
    /// Immediate dominators, valid while `CONSISTENT_DOMINANCE` holds.
    pub(crate) idom: Vec<NodeId>,
    /// Loop forest, valid while `CONSISTENT_LOOPS` holds.
    pub(crate) loop_tree: Option<LoopTree>,

    start_block: NodeId,
    end_block: NodeId,
    start: NodeId,
    end: NodeId,
    no_mem: NodeId,
    args: NodeId,
    initial_mem: NodeId,

    /// The method entity this graph implements, if any.
    pub entity: Option<EntityId>,
    /// Frame type holding parameter entities, if any.
    pub frame_type: Option<TypeId>,
}

impl Graph {
    pub fn new() -> Graph {
        let mut g = Graph {
            nodes: Vec::new(),
            visited: 0,
            reserved: Resources::NONE,
            properties: GraphProperties::NONE,
            link: Vec::new(),
            outs: Vec::new(),
            idom: Vec::new(),
            loop_tree: None,
            start_block: NodeId::NONE,
            end_block: NodeId::NONE,
            start: NodeId::NONE,
            end: NodeId::NONE,
            no_mem: NodeId::NONE,
            args: NodeId::NONE,
            initial_mem: NodeId::NONE,
            entity: None,
            frame_type: None,
        };
        g.start_block = g.new_block(&[]);
        g.start = g.add(Opcode::Start, Mode::T, g.start_block, &[], Attr::None);
        g.end_block = g.new_block(&[]);
        g.end = g.add(Opcode::End, Mode::X, g.end_block, &[], Attr::None);
        g.no_mem = g.add(Opcode::NoMem, Mode::M, g.start_block, &[], Attr::None);
        g.args = g.new_proj(g.start, Mode::T, pn::START_T_ARGS);
        g.initial_mem = g.new_proj(g.start, Mode::M, pn::START_M);
        g
    }

    // ---- anchors -----------------------------------------------------

    pub fn start_block(&self) -> NodeId {
        self.start_block
    }

    pub fn end_block(&self) -> NodeId {
        self.end_block
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn end(&self) -> NodeId {
        self.end
    }

    /// The memory-less memory input for Calls without memory effects.
    pub fn no_mem(&self) -> NodeId {
        self.no_mem
    }

    /// Tuple of the function arguments (`Proj(Start, T_ARGS)`).
    pub fn args(&self) -> NodeId {
        self.args
    }

    /// Initial memory state (`Proj(Start, M)`).
    pub fn initial_mem(&self) -> NodeId {
        self.initial_mem
    }

    // ---- node pool ---------------------------------------------------

    fn add(&mut self, op: Opcode, mode: Mode, block: NodeId, ins: &[NodeId], attr: Attr) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            op,
            mode,
            block,
            ins: SmallVec::from_slice(ins),
            attr,
            visited: 0,
            dbg_info: None,
            pinned: matches!(
                op,
                Opcode::Load
                    | Opcode::Store
                    | Opcode::Div
                    | Opcode::Mod
                    | Opcode::DivMod
                    | Opcode::Call
                    | Opcode::Phi
                    | Opcode::Cond
                    | Opcode::Return
            ),
        });
        id
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// All node ids, including unreachable and Deleted ones.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn op(&self, n: NodeId) -> Opcode {
        self.nodes[n.idx()].op
    }

    pub fn mode(&self, n: NodeId) -> Mode {
        self.nodes[n.idx()].mode
    }

    pub fn set_mode(&mut self, n: NodeId, mode: Mode) {
        self.nodes[n.idx()].mode = mode;
    }

    pub fn is_block(&self, n: NodeId) -> bool {
        self.op(n) == Opcode::Block
    }

    /// The owning block of a non-Block node.
    pub fn block_of(&self, n: NodeId) -> NodeId {
        debug_assert!(!self.is_block(n), "Blocks own no block");
        self.nodes[n.idx()].block
    }

    pub fn set_block(&mut self, n: NodeId, block: NodeId) {
        debug_assert!(!self.is_block(n));
        let old = self.nodes[n.idx()].block;
        self.nodes[n.idx()].block = block;
        if self.properties.contains(GraphProperties::CONSISTENT_OUTS) {
            self.outs_retarget(n, POS_BLOCK, old, block);
        }
    }

    pub fn arity(&self, n: NodeId) -> usize {
        self.nodes[n.idx()].ins.len()
    }

    pub fn ins(&self, n: NodeId) -> &[NodeId] {
        &self.nodes[n.idx()].ins
    }

    pub fn input(&self, n: NodeId, i: usize) -> NodeId {
        self.nodes[n.idx()].ins[i]
    }

    pub fn dbg_info(&self, n: NodeId) -> crate::ir::node::DbgInfo {
        self.nodes[n.idx()].dbg_info
    }

    pub fn set_dbg_info(&mut self, n: NodeId, dbg: crate::ir::node::DbgInfo) {
        self.nodes[n.idx()].dbg_info = dbg;
    }

    /// Stamp `to` with the debug token of `from`, the pattern rewriting
    /// passes use for their principal replacement nodes.
    pub fn inherit_dbg(&mut self, from: NodeId, to: NodeId) {
        let dbg = self.dbg_info(from);
        if dbg.is_some() {
            self.set_dbg_info(to, dbg);
        }
    }

    pub fn is_pinned(&self, n: NodeId) -> bool {
        self.nodes[n.idx()].pinned
    }

    pub fn set_pinned(&mut self, n: NodeId, pinned: bool) {
        self.nodes[n.idx()].pinned = pinned;
    }

    pub fn attr(&self, n: NodeId) -> &Attr {
        &self.nodes[n.idx()].attr
    }

    pub fn attr_mut(&mut self, n: NodeId) -> &mut Attr {
        &mut self.nodes[n.idx()].attr
    }

    /// Constant value of a Const node.
    pub fn const_value(&self, n: NodeId) -> Tarval {
        match self.attr(n) {
            Attr::Const { value } => *value,
            _ => panic!("{:?} is not a Const", n),
        }
    }

    /// Proj number of a Proj node.
    pub fn proj_num(&self, n: NodeId) -> u32 {
        match self.attr(n) {
            Attr::Proj { num } => *num,
            _ => panic!("{:?} is not a Proj", n),
        }
    }

    pub fn set_proj_num(&mut self, n: NodeId, new_num: u32) {
        match self.attr_mut(n) {
            Attr::Proj { num } => *num = new_num,
            _ => panic!("{:?} is not a Proj", n),
        }
    }

    /// The producer a Proj selects from.
    pub fn proj_pred(&self, n: NodeId) -> NodeId {
        debug_assert_eq!(self.op(n), Opcode::Proj);
        self.input(n, 0)
    }

    pub fn cmp_relation(&self, n: NodeId) -> Relation {
        match self.attr(n) {
            Attr::Cmp { relation } => *relation,
            _ => panic!("{:?} is not a Cmp", n),
        }
    }

    /// Operand mode of a Load node.
    pub fn load_mode(&self, n: NodeId) -> Mode {
        match self.attr(n) {
            Attr::Load { mode, .. } => *mode,
            _ => panic!("{:?} is not a Load", n),
        }
    }

    pub fn load_volatile(&self, n: NodeId) -> bool {
        match self.attr(n) {
            Attr::Load { volatile, .. } => *volatile,
            _ => panic!("{:?} is not a Load", n),
        }
    }

    pub fn store_volatile(&self, n: NodeId) -> bool {
        match self.attr(n) {
            Attr::Store { volatile } => *volatile,
            _ => panic!("{:?} is not a Store", n),
        }
    }

    pub fn call_type(&self, n: NodeId) -> TypeId {
        match self.attr(n) {
            Attr::Call { ty } => *ty,
            _ => panic!("{:?} is not a Call", n),
        }
    }

    pub fn set_call_type(&mut self, n: NodeId, ty: TypeId) {
        match self.attr_mut(n) {
            Attr::Call { ty: t } => *t = ty,
            _ => panic!("{:?} is not a Call", n),
        }
    }

    /// Referenced entity of a SymConv, Address or Sel node.
    pub fn node_entity(&self, n: NodeId) -> EntityId {
        match self.attr(n) {
            Attr::Entity { entity } => *entity,
            _ => panic!("{:?} references no entity", n),
        }
    }

    pub fn set_node_entity(&mut self, n: NodeId, entity: EntityId) {
        match self.attr_mut(n) {
            Attr::Entity { entity: e } => *e = entity,
            _ => panic!("{:?} references no entity", n),
        }
    }

    // ---- construction ------------------------------------------------

    /// Create a Block with the given control-flow predecessors.
    pub fn new_block(&mut self, cfg_preds: &[NodeId]) -> NodeId {
        self.add(
            Opcode::Block,
            Mode::X,
            NodeId::NONE,
            cfg_preds,
            Attr::Block { phis: Vec::new() },
        )
    }

    /// Create a Phi. Its arity must match the block's predecessor arity.
    /// While the phi-list resource is held the Phi is recorded in its
    /// block's list.
    pub fn new_phi(&mut self, block: NodeId, ins: &[NodeId], mode: Mode) -> NodeId {
        debug_assert_eq!(
            ins.len(),
            self.arity(block),
            "Phi arity must match Block arity"
        );
        let phi = self.add(Opcode::Phi, mode, block, ins, Attr::None);
        if self.reserved.contains(Resources::PHI_LIST) {
            self.add_block_phi(block, phi);
        }
        phi
    }

    pub fn new_const(&mut self, value: Tarval) -> NodeId {
        let block = self.start_block;
        self.add(
            Opcode::Const,
            value.mode(),
            block,
            &[],
            Attr::Const { value },
        )
    }

    pub fn new_proj(&mut self, pred: NodeId, mode: Mode, num: u32) -> NodeId {
        let block = if self.is_block(pred) {
            pred
        } else {
            self.block_of(pred)
        };
        self.add(Opcode::Proj, mode, block, &[pred], Attr::Proj { num })
    }

    pub fn new_binop(
        &mut self,
        op: Opcode,
        block: NodeId,
        left: NodeId,
        right: NodeId,
        mode: Mode,
    ) -> NodeId {
        debug_assert!(op.is_binop());
        self.add(op, mode, block, &[left, right], Attr::None)
    }

    pub fn new_add(&mut self, block: NodeId, l: NodeId, r: NodeId, mode: Mode) -> NodeId {
        self.new_binop(Opcode::Add, block, l, r, mode)
    }

    pub fn new_sub(&mut self, block: NodeId, l: NodeId, r: NodeId, mode: Mode) -> NodeId {
        self.new_binop(Opcode::Sub, block, l, r, mode)
    }

    pub fn new_mul(&mut self, block: NodeId, l: NodeId, r: NodeId, mode: Mode) -> NodeId {
        self.new_binop(Opcode::Mul, block, l, r, mode)
    }

    pub fn new_not(&mut self, block: NodeId, op: NodeId, mode: Mode) -> NodeId {
        self.add(Opcode::Not, mode, block, &[op], Attr::None)
    }

    pub fn new_minus(&mut self, block: NodeId, op: NodeId, mode: Mode) -> NodeId {
        self.add(Opcode::Minus, mode, block, &[op], Attr::None)
    }

    pub fn new_conv(&mut self, block: NodeId, op: NodeId, mode: Mode) -> NodeId {
        self.add(Opcode::Conv, mode, block, &[op], Attr::None)
    }

    pub fn new_cmp(&mut self, block: NodeId, l: NodeId, r: NodeId, relation: Relation) -> NodeId {
        self.add(Opcode::Cmp, Mode::B, block, &[l, r], Attr::Cmp { relation })
    }

    pub fn new_cond(&mut self, block: NodeId, selector: NodeId) -> NodeId {
        self.add(Opcode::Cond, Mode::T, block, &[selector], Attr::None)
    }

    pub fn new_mux(
        &mut self,
        block: NodeId,
        sel: NodeId,
        if_false: NodeId,
        if_true: NodeId,
        mode: Mode,
    ) -> NodeId {
        self.add(Opcode::Mux, mode, block, &[sel, if_false, if_true], Attr::None)
    }

    pub fn new_jmp(&mut self, block: NodeId) -> NodeId {
        self.add(Opcode::Jmp, Mode::X, block, &[], Attr::None)
    }

    pub fn new_load(
        &mut self,
        block: NodeId,
        mem: NodeId,
        ptr: NodeId,
        mode: Mode,
        volatile: bool,
    ) -> NodeId {
        self.add(
            Opcode::Load,
            Mode::T,
            block,
            &[mem, ptr],
            Attr::Load { mode, volatile },
        )
    }

    pub fn new_store(
        &mut self,
        block: NodeId,
        mem: NodeId,
        ptr: NodeId,
        value: NodeId,
        volatile: bool,
    ) -> NodeId {
        self.add(
            Opcode::Store,
            Mode::T,
            block,
            &[mem, ptr, value],
            Attr::Store { volatile },
        )
    }

    pub fn new_div(&mut self, block: NodeId, mem: NodeId, l: NodeId, r: NodeId) -> NodeId {
        self.add(Opcode::Div, Mode::T, block, &[mem, l, r], Attr::None)
    }

    pub fn new_mod(&mut self, block: NodeId, mem: NodeId, l: NodeId, r: NodeId) -> NodeId {
        self.add(Opcode::Mod, Mode::T, block, &[mem, l, r], Attr::None)
    }

    pub fn new_divmod(&mut self, block: NodeId, mem: NodeId, l: NodeId, r: NodeId) -> NodeId {
        self.add(Opcode::DivMod, Mode::T, block, &[mem, l, r], Attr::None)
    }

    pub fn new_call(
        &mut self,
        block: NodeId,
        mem: NodeId,
        callee: NodeId,
        params: &[NodeId],
        ty: TypeId,
    ) -> NodeId {
        let mut ins = SmallVec::<[NodeId; 4]>::with_capacity(params.len() + 2);
        ins.push(mem);
        ins.push(callee);
        ins.extend_from_slice(params);
        self.add(Opcode::Call, Mode::T, block, &ins, Attr::Call { ty })
    }

    pub fn new_return(&mut self, block: NodeId, mem: NodeId, ress: &[NodeId]) -> NodeId {
        let mut ins = SmallVec::<[NodeId; 4]>::with_capacity(ress.len() + 1);
        ins.push(mem);
        ins.extend_from_slice(ress);
        self.add(Opcode::Return, Mode::X, block, &ins, Attr::None)
    }

    /// Address of an entity (a code or data symbol).
    pub fn new_symconv(&mut self, entity: EntityId) -> NodeId {
        let block = self.start_block;
        self.add(Opcode::SymConv, Mode::P, block, &[], Attr::Entity { entity })
    }

    pub fn new_address(&mut self, entity: EntityId) -> NodeId {
        let block = self.start_block;
        self.add(Opcode::Address, Mode::P, block, &[], Attr::Entity { entity })
    }

    /// Member selection: address of `entity` within the compound `ptr`
    /// points to.
    pub fn new_sel(&mut self, block: NodeId, ptr: NodeId, entity: EntityId) -> NodeId {
        self.add(Opcode::Sel, Mode::P, block, &[ptr], Attr::Entity { entity })
    }

    pub fn new_sync(&mut self, block: NodeId, mems: &[NodeId]) -> NodeId {
        self.add(Opcode::Sync, Mode::M, block, mems, Attr::None)
    }

    pub fn new_unknown(&mut self, mode: Mode) -> NodeId {
        let block = self.start_block;
        self.add(Opcode::Unknown, mode, block, &[], Attr::None)
    }

    /// Placeholder node, rewired away before a pass finishes.
    pub fn new_dummy(&mut self, mode: Mode) -> NodeId {
        let block = self.start_block;
        self.add(Opcode::Dummy, mode, block, &[], Attr::None)
    }

    pub fn new_bad(&mut self, mode: Mode) -> NodeId {
        let block = self.start_block;
        self.properties = self.properties.without(GraphProperties::NO_BADS);
        self.add(Opcode::Bad, mode, block, &[], Attr::None)
    }

    pub fn new_keep(&mut self, block: NodeId, kept: &[NodeId]) -> NodeId {
        self.add(Opcode::Keep, Mode::X, block, kept, Attr::None)
    }

    /// Structural copy of a node: same opcode, mode, attribute and inputs.
    /// The copy is placed in the same block; callers re-home it as needed.
    pub fn exact_copy(&mut self, n: NodeId) -> NodeId {
        let mut data = self.nodes[n.idx()].clone();
        data.visited = 0;
        if let Attr::Block { phis } = &mut data.attr {
            // a fresh block starts with an empty phi list
            phis.clear();
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(data);
        id
    }

    // ---- mutation ----------------------------------------------------

    /// Set input `i` of `n` to `v`, maintaining out-edges while they are
    /// consistent.
    pub fn set_input(&mut self, n: NodeId, i: usize, v: NodeId) {
        let old = self.nodes[n.idx()].ins[i];
        self.nodes[n.idx()].ins[i] = v;
        if self.properties.contains(GraphProperties::CONSISTENT_OUTS) {
            self.outs_retarget(n, i as u32, old, v);
        }
    }

    /// Replace the whole input list of `n`.
    pub fn set_inputs(&mut self, n: NodeId, ins: &[NodeId]) {
        if self.properties.contains(GraphProperties::CONSISTENT_OUTS) {
            let old: SmallVec<[NodeId; 4]> = self.nodes[n.idx()].ins.clone();
            for (i, &p) in old.iter().enumerate() {
                self.outs_remove(p, n, i as u32);
            }
            for (i, &p) in ins.iter().enumerate() {
                self.outs_add(p, n, i as u32);
            }
        }
        self.nodes[n.idx()].ins = SmallVec::from_slice(ins);
    }

    /// Append one input (an extra control-flow edge on a Block, an extra
    /// Phi operand).
    pub fn add_input(&mut self, n: NodeId, pred: NodeId) {
        let pos = self.nodes[n.idx()].ins.len() as u32;
        self.nodes[n.idx()].ins.push(pred);
        if self.properties.contains(GraphProperties::CONSISTENT_OUTS) {
            self.outs_add(pred, n, pos);
        }
    }

    /// Replace `old` by `new`: every use of `old` becomes a use of `new`,
    /// `old` becomes a Deleted tombstone.
    pub fn exchange(&mut self, old: NodeId, new: NodeId) {
        assert_ne!(old, new, "cannot exchange a node with itself");
        if self.properties.contains(GraphProperties::CONSISTENT_OUTS) {
            let uses: Vec<OutEdge> = self.outs_of(old).to_vec();
            for edge in uses {
                if edge.pos == POS_BLOCK {
                    self.set_block(edge.user, new);
                } else {
                    self.set_input(edge.user, edge.pos as usize, new);
                }
            }
        } else {
            for u in 0..self.nodes.len() {
                if self.nodes[u].op == Opcode::Deleted {
                    continue;
                }
                for i in 0..self.nodes[u].ins.len() {
                    if self.nodes[u].ins[i] == old {
                        self.nodes[u].ins[i] = new;
                    }
                }
                if self.nodes[u].block == old {
                    self.nodes[u].block = new;
                }
            }
        }
        let data = &mut self.nodes[old.idx()];
        data.op = Opcode::Deleted;
        data.mode = Mode::ANY;
        data.ins.clear();
        data.attr = Attr::None;
    }

    // ---- keep-alives -------------------------------------------------

    /// Keep-alive edges are the inputs of the End node.
    pub fn keep_alives(&self) -> &[NodeId] {
        self.ins(self.end)
    }

    pub fn keep_alive(&mut self, n: NodeId) {
        let end = self.end;
        self.add_input(end, n);
    }

    /// Remove one keep-alive edge if present.
    pub fn remove_keep_alive(&mut self, n: NodeId) {
        let end = self.end;
        if let Some(pos) = self.ins(end).iter().position(|&k| k == n) {
            let mut ins: Vec<NodeId> = self.ins(end).to_vec();
            ins.remove(pos);
            self.set_inputs(end, &ins);
        }
    }

    /// Drop Bad and duplicate keep-alive edges from End.
    pub fn remove_end_bads_and_doublets(&mut self) {
        let end = self.end;
        let mut seen = Vec::new();
        for &k in self.ins(end) {
            if self.op(k) == Opcode::Bad || self.op(k) == Opcode::Deleted || seen.contains(&k) {
                continue;
            }
            seen.push(k);
        }
        if seen.len() != self.arity(end) {
            self.set_inputs(end, &seen);
        }
    }

    // ---- resources ---------------------------------------------------

    pub fn reserve_resources(&mut self, res: Resources) {
        assert!(
            !self.reserved.intersects(res),
            "resource already reserved: {:?}",
            res
        );
        self.reserved = self.reserved.union(res);
        if res.contains(Resources::LINK) {
            self.clear_links();
        }
        if res.contains(Resources::PHI_LIST) {
            for n in &mut self.nodes {
                if let Attr::Block { phis } = &mut n.attr {
                    phis.clear();
                }
            }
        }
    }

    pub fn free_resources(&mut self, res: Resources) {
        assert!(
            self.reserved.contains(res),
            "freeing a resource that is not reserved: {:?}",
            res
        );
        self.reserved = self.reserved.without(res);
    }

    pub fn reserved_resources(&self) -> Resources {
        self.reserved
    }

    // ---- link slot ---------------------------------------------------

    pub fn clear_links(&mut self) {
        self.link.clear();
        self.link.resize(self.nodes.len(), NodeId::NONE);
    }

    pub fn set_link(&mut self, n: NodeId, target: NodeId) {
        debug_assert!(self.reserved.contains(Resources::LINK));
        if self.link.len() < self.nodes.len() {
            self.link.resize(self.nodes.len(), NodeId::NONE);
        }
        self.link[n.idx()] = target;
    }

    pub fn link(&self, n: NodeId) -> NodeId {
        debug_assert!(self.reserved.contains(Resources::LINK));
        self.link.get(n.idx()).copied().unwrap_or(NodeId::NONE)
    }

    // ---- phi lists ---------------------------------------------------

    pub fn add_block_phi(&mut self, block: NodeId, phi: NodeId) {
        debug_assert!(self.reserved.contains(Resources::PHI_LIST));
        match self.attr_mut(block) {
            Attr::Block { phis } => phis.push(phi),
            _ => panic!("{:?} is not a Block", block),
        }
    }

    pub fn block_phis(&self, block: NodeId) -> &[NodeId] {
        debug_assert!(self.reserved.contains(Resources::PHI_LIST));
        match self.attr(block) {
            Attr::Block { phis } => phis,
            _ => panic!("{:?} is not a Block", block),
        }
    }

    // ---- visited marks -----------------------------------------------

    pub fn inc_visited(&mut self) -> u64 {
        self.visited += 1;
        self.visited
    }

    pub fn graph_visited(&self) -> u64 {
        self.visited
    }

    pub fn node_visited(&self, n: NodeId) -> u64 {
        self.nodes[n.idx()].visited
    }

    pub fn mark_visited(&mut self, n: NodeId) {
        self.nodes[n.idx()].visited = self.visited;
    }

    pub fn is_visited(&self, n: NodeId) -> bool {
        self.nodes[n.idx()].visited >= self.visited
    }

    // ---- properties --------------------------------------------------

    pub fn has_property(&self, p: GraphProperties) -> bool {
        self.properties.contains(p)
    }

    pub fn add_property(&mut self, p: GraphProperties) {
        self.properties = self.properties.union(p);
    }

    pub fn clear_property(&mut self, p: GraphProperties) {
        self.properties = self.properties.without(p);
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::ModeRegistry;

    fn int_mode() -> (ModeRegistry, Mode) {
        let mut reg = ModeRegistry::new();
        let iu = reg.new_int_mode("Iu", 32, false, 32);
        (reg, iu)
    }

    #[test]
    fn anchors_are_created_with_the_graph() {
        let g = Graph::new();
        assert_eq!(g.op(g.start()), Opcode::Start);
        assert_eq!(g.op(g.end()), Opcode::End);
        assert!(g.is_block(g.start_block()));
        assert_eq!(g.proj_num(g.args()), pn::START_T_ARGS);
        assert_eq!(g.block_of(g.args()), g.start_block());
    }

    #[test]
    fn phi_arity_matches_block_arity() {
        let (reg, iu) = int_mode();
        let mut g = Graph::new();
        let j1 = g.new_jmp(g.start_block());
        let j2 = g.new_jmp(g.start_block());
        let block = g.new_block(&[j1, j2]);
        let c1 = g.new_const(Tarval::from_i64(1, iu, &reg));
        let c2 = g.new_const(Tarval::from_i64(2, iu, &reg));
        let phi = g.new_phi(block, &[c1, c2], iu);
        assert_eq!(g.arity(phi), g.arity(block));
    }

    #[test]
    #[should_panic]
    fn double_reserve_is_a_programming_error() {
        let mut g = Graph::new();
        g.reserve_resources(Resources::LINK);
        g.reserve_resources(Resources::LINK);
    }

    #[test]
    fn exchange_leaves_no_stale_uses() {
        let (reg, iu) = int_mode();
        let mut g = Graph::new();
        let block = g.start_block();
        let a = g.new_const(Tarval::from_i64(1, iu, &reg));
        let b = g.new_const(Tarval::from_i64(2, iu, &reg));
        let c = g.new_const(Tarval::from_i64(3, iu, &reg));
        let add = g.new_add(block, a, b, iu);
        let mul = g.new_mul(block, add, a, iu);
        g.exchange(a, c);
        assert_eq!(g.ins(add), &[c, b]);
        assert_eq!(g.ins(mul), &[add, c]);
        assert_eq!(g.op(a), Opcode::Deleted);
    }

    #[test]
    fn dbg_info_survives_copies() {
        let (reg, iu) = int_mode();
        let mut g = Graph::new();
        let a = g.new_const(Tarval::from_i64(1, iu, &reg));
        g.set_dbg_info(a, Some(17));
        let b = g.exact_copy(a);
        assert_eq!(g.dbg_info(b), Some(17));

        let c = g.new_const(Tarval::from_i64(2, iu, &reg));
        g.inherit_dbg(a, c);
        assert_eq!(g.dbg_info(c), Some(17));
    }

    #[test]
    fn keep_alive_round_trip() {
        let (reg, iu) = int_mode();
        let mut g = Graph::new();
        let c = g.new_const(Tarval::from_i64(7, iu, &reg));
        g.keep_alive(c);
        assert!(g.keep_alives().contains(&c));
        g.remove_keep_alive(c);
        assert!(!g.keep_alives().contains(&c));
    }
}
