//! Doubleword operation lowering.
//!
//! Rewrites every node whose operational mode is the doubleword signed or
//! unsigned integer mode into half-width code: each doubleword value is
//! represented by a (low, high) pair of half-width values. Logical
//! operations split component-wise, shifts by a known large constant fold
//! into half-word shifts, everything else becomes a Call to a runtime
//! intrinsic obtained from a caller-provided factory. Method types taking
//! or returning doubleword values are rewritten, with parameter and result
//! Projs renumbered accordingly.
//!
//! The pass runs two waves per graph: a walk that lowers every node whose
//! operand pairs are ready, and a FIFO deque that re-attempts the rest
//! until a fixpoint. Phis are built from Dummy placeholders and finalized
//! through the deque.

use std::collections::VecDeque;

use log::debug;
use rustc_hash::FxHashMap;

use crate::core::mode::{Mode, ModeKind, ModeRegistry, Relation};
use crate::core::tarval::Tarval;
use crate::ir::graph::{Graph, GraphProperties, Resources};
use crate::ir::node::{pn, NodeId, Opcode};
use crate::types::{CompoundKind, EntityId, EntityKind, Program, TypeId, TypeStore};

/// Parameters of the doubleword lowering.
#[derive(Clone, Copy, Debug)]
pub struct LowerDwParams {
    /// Bit size of the doubleword modes to eliminate (e.g. 64).
    pub doubleword_size: u32,
    pub little_endian: bool,
}

impl LowerDwParams {
    pub fn new(doubleword_size: u32, little_endian: bool) -> LowerDwParams {
        LowerDwParams {
            doubleword_size,
            little_endian,
        }
    }
}

/// Produces the entity of a runtime emulation function for one
/// (opcode, input mode, output mode) triple. Results are cached by the
/// pass, the factory is consulted once per triple.
pub trait IntrinsicFactory {
    fn create_intrinsic(
        &mut self,
        types: &mut TypeStore,
        modes: &ModeRegistry,
        method: TypeId,
        op: Opcode,
        imode: Mode,
        omode: Mode,
    ) -> EntityId;
}

/// Default factory: a global method entity named after the operation,
/// `__l<op>_ll` for doubleword-to-doubleword operations.
pub struct DefaultIntrinsicFactory {
    pub segment: TypeId,
}

impl IntrinsicFactory for DefaultIntrinsicFactory {
    fn create_intrinsic(
        &mut self,
        types: &mut TypeStore,
        modes: &ModeRegistry,
        method: TypeId,
        op: Opcode,
        imode: Mode,
        omode: Mode,
    ) -> EntityId {
        let name = if imode == omode {
            format!("__l{}_ll", op.name().to_lowercase())
        } else {
            format!(
                "__l{}_{}_{}",
                op.name().to_lowercase(),
                modes.name(imode).to_lowercase(),
                modes.name(omode).to_lowercase()
            )
        };
        types.new_global_method(self.segment, &name, method)
    }
}

/// The doubleword and derived half-width modes of one lowering run.
#[derive(Clone, Copy)]
struct LoweredModes {
    high_signed: Mode,
    high_unsigned: Mode,
    low_signed: Mode,
    low_unsigned: Mode,
    /// Byte offset between the two half words in memory.
    word_bytes: i64,
    /// Bit width of a half word.
    word_bits: i64,
}

/// Caches shared across all graphs of one `lower_dw_ops` run.
struct SharedState {
    modes: LoweredModes,
    params: LowerDwParams,
    tp_u: TypeId,
    tp_s: TypeId,
    binop_tp_u: TypeId,
    binop_tp_s: TypeId,
    shiftop_tp_u: TypeId,
    shiftop_tp_s: TypeId,
    unop_tp_u: TypeId,
    unop_tp_s: TypeId,
    intrinsics: FxHashMap<(Opcode, Mode, Mode), EntityId>,
    conv_types: FxHashMap<(Mode, Mode), TypeId>,
    lowered_type: FxHashMap<TypeId, TypeId>,
    mode_types: FxHashMap<Mode, TypeId>,
    value_param_map: FxHashMap<EntityId, EntityId>,
    /// Name suffix of the half word at the lower address.
    first_suffix: &'static str,
    next_suffix: &'static str,
}

impl SharedState {
    fn new(types: &mut TypeStore, modes: LoweredModes, params: LowerDwParams) -> SharedState {
        let tp_u = types.new_primitive(modes.low_unsigned);
        let tp_s = types.new_primitive(modes.low_signed);
        let binop_tp_u = types.new_method(vec![tp_u, tp_u, tp_u, tp_u], vec![tp_u, tp_u]);
        let binop_tp_s = types.new_method(vec![tp_u, tp_s, tp_u, tp_s], vec![tp_u, tp_s]);
        let shiftop_tp_u = types.new_method(vec![tp_u, tp_u, tp_u], vec![tp_u, tp_u]);
        let shiftop_tp_s = types.new_method(vec![tp_u, tp_s, tp_u], vec![tp_u, tp_s]);
        let unop_tp_u = types.new_method(vec![tp_u, tp_u], vec![tp_u, tp_u]);
        let unop_tp_s = types.new_method(vec![tp_u, tp_s], vec![tp_u, tp_s]);
        let mut mode_types = FxHashMap::default();
        mode_types.insert(modes.low_unsigned, tp_u);
        mode_types.insert(modes.low_signed, tp_s);
        SharedState {
            modes,
            params,
            tp_u,
            tp_s,
            binop_tp_u,
            binop_tp_s,
            shiftop_tp_u,
            shiftop_tp_s,
            unop_tp_u,
            unop_tp_s,
            intrinsics: FxHashMap::default(),
            conv_types: FxHashMap::default(),
            lowered_type: FxHashMap::default(),
            mode_types,
            value_param_map: FxHashMap::default(),
            first_suffix: if params.little_endian { ".l" } else { ".h" },
            next_suffix: if params.little_endian { ".h" } else { ".l" },
        }
    }

    fn is_dw(&self, mode: Mode) -> bool {
        mode == self.modes.high_signed || mode == self.modes.high_unsigned
    }
}

/// Find the doubleword modes in the registry and derive the half-width
/// modes. Multiple doubleword modes of the same width are unsupported.
fn setup_modes(reg: &mut ModeRegistry, params: &LowerDwParams) -> LoweredModes {
    let size_bits = params.doubleword_size;
    assert!(size_bits % 2 == 0);

    let mut high_signed = None;
    let mut high_unsigned = None;
    for m in reg.iter().collect::<Vec<_>>() {
        let ModeKind::Int { bits, signed, .. } = reg.kind(m) else {
            continue;
        };
        if bits != size_bits {
            continue;
        }
        if signed {
            if high_signed.is_some() {
                panic!("multiple doubleword signed modes found");
            }
            high_signed = Some(m);
        } else {
            if high_unsigned.is_some() {
                panic!("multiple doubleword unsigned modes found");
            }
            high_unsigned = Some(m);
        }
    }
    let high_signed = high_signed.expect("couldn't find doubleword signed mode");
    let high_unsigned = high_unsigned.expect("couldn't find doubleword unsigned mode");

    let modulo_shift = reg.modulo_shift(high_signed);
    assert_eq!(reg.modulo_shift(high_unsigned), modulo_shift);
    let low_modulo = if modulo_shift == size_bits {
        modulo_shift / 2
    } else if modulo_shift == 0 {
        0
    } else {
        panic!("don't know what modulo shift to use for the lowered mode");
    };
    let low_bits = size_bits / 2;

    let low_signed = reg
        .find_int_mode(low_bits, true)
        .unwrap_or_else(|| reg.new_int_mode("WS", low_bits, true, low_modulo));
    let low_unsigned = reg
        .find_int_mode(low_bits, false)
        .unwrap_or_else(|| reg.new_int_mode("WU", low_bits, false, low_modulo));

    LoweredModes {
        high_signed,
        high_unsigned,
        low_signed,
        low_unsigned,
        word_bytes: (size_bits / 16) as i64,
        word_bits: low_bits as i64,
    }
}

/// The (low, high) replacement of one doubleword node. Both slots are
/// `NONE` until the node is lowered.
#[derive(Clone, Copy)]
struct Pair {
    low: NodeId,
    high: NodeId,
}

impl Pair {
    const EMPTY: Pair = Pair {
        low: NodeId::NONE,
        high: NodeId::NONE,
    };

    fn ready(&self) -> bool {
        !self.low.is_none()
    }
}

struct LowerEnv<'a> {
    graph: &'a mut Graph,
    types: &'a mut TypeStore,
    modes: &'a ModeRegistry,
    factory: &'a mut dyn IntrinsicFactory,
    shared: &'a mut SharedState,
    /// Replacement pairs, indexed densely by node id. `None` means the node
    /// is not a doubleword node.
    entries: Vec<Option<Pair>>,
    waitq: VecDeque<NodeId>,
    /// Proj chains per producer, in prepare-walk discovery order.
    chains: FxHashMap<NodeId, Vec<NodeId>>,
    /// Destination Block of every control-flow Proj used as Block pred.
    proj_to_block: FxHashMap<NodeId, NodeId>,
    handled: Vec<bool>,
    must_be_lowered: bool,
    cf_changed: bool,
    /// The original value-parameter compound of the current method.
    value_param_tp: Option<TypeId>,
}

impl<'a> LowerEnv<'a> {
    fn dw(&self, mode: Mode) -> bool {
        self.shared.is_dw(mode)
    }

    /// The mode an operation computes in, as opposed to the mode of the
    /// node itself (which may be tuple or boolean).
    fn op_mode(&self, n: NodeId) -> Mode {
        let g = &self.graph;
        match g.op(n) {
            Opcode::Load => g.load_mode(n),
            Opcode::Store => g.mode(g.input(n, 2)),
            Opcode::Div | Opcode::Mod | Opcode::DivMod => g.mode(g.input(n, 1)),
            Opcode::Cmp => g.mode(g.input(n, 0)),
            _ => g.mode(n),
        }
    }

    fn alloc_entry(&mut self, n: NodeId) {
        let idx = n.idx();
        if idx >= self.entries.len() {
            // grows only when Rotl rebuilding added nodes, which is rare
            let new_len = idx + (idx >> 3) + 1;
            self.entries.resize(new_len, None);
        }
        self.entries[idx] = Some(Pair::EMPTY);
    }

    fn entry(&self, n: NodeId) -> Option<Pair> {
        self.entries.get(n.idx()).copied().flatten()
    }

    /// The finished pair of `n`, or `None` while it is unresolved.
    fn ready_pair(&self, n: NodeId) -> Option<Pair> {
        self.entry(n).filter(Pair::ready)
    }

    fn set_pair(&mut self, n: NodeId, low: NodeId, high: NodeId) {
        let idx = n.idx();
        assert!(
            idx < self.entries.len() && self.entries[idx].is_some(),
            "no entry allocated for {:?}",
            n
        );
        self.entries[idx] = Some(Pair { low, high });
    }

    fn defer(&mut self, n: NodeId) {
        self.waitq.push_back(n);
    }

    fn mark_handled(&mut self, n: NodeId) {
        let idx = n.idx();
        if idx >= self.handled.len() {
            self.handled.resize(idx + 1, false);
        }
        self.handled[idx] = true;
    }

    fn is_handled(&self, n: NodeId) -> bool {
        self.handled.get(n.idx()).copied().unwrap_or(false)
    }

    fn chain(&self, producer: NodeId) -> Vec<NodeId> {
        self.chains.get(&producer).cloned().unwrap_or_default()
    }

    fn new_const_long(&mut self, mode: Mode, value: i64) -> NodeId {
        let tv = Tarval::from_i64(value, mode, self.modes);
        self.graph.new_const(tv)
    }

    fn new_null(&mut self, mode: Mode) -> NodeId {
        self.graph.new_const(Tarval::null(mode))
    }

    // ---- program-level caches ---------------------------------------

    fn type_for_mode(&mut self, mode: Mode) -> TypeId {
        if let Some(&t) = self.shared.mode_types.get(&mode) {
            return t;
        }
        let t = self.types.new_primitive(mode);
        self.shared.mode_types.insert(mode, t);
        t
    }

    /// Method type for a Conv emulation from `imode` to `omode`.
    fn conv_type(&mut self, imode: Mode, omode: Mode) -> TypeId {
        if let Some(&t) = self.shared.conv_types.get(&(imode, omode)) {
            return t;
        }
        let lm = self.shared.modes;
        let params = if imode == lm.high_signed {
            vec![self.shared.tp_u, self.shared.tp_s]
        } else if imode == lm.high_unsigned {
            vec![self.shared.tp_u, self.shared.tp_u]
        } else {
            vec![self.type_for_mode(imode)]
        };
        let results = if omode == lm.high_signed {
            vec![self.shared.tp_u, self.shared.tp_s]
        } else if omode == lm.high_unsigned {
            vec![self.shared.tp_u, self.shared.tp_u]
        } else {
            vec![self.type_for_mode(omode)]
        };
        let t = self.types.new_method(params, results);
        self.shared.conv_types.insert((imode, omode), t);
        t
    }

    /// A SymConv holding the address of the emulation function for the
    /// (op, imode, omode) triple.
    fn intrinsic_address(&mut self, method: TypeId, op: Opcode, imode: Mode, omode: Mode) -> NodeId {
        let key = (op, imode, omode);
        let ent = match self.shared.intrinsics.get(&key) {
            Some(&e) => e,
            None => {
                let e = self
                    .factory
                    .create_intrinsic(self.types, self.modes, method, op, imode, omode);
                self.shared.intrinsics.insert(key, e);
                e
            }
        };
        self.graph.new_symconv(ent)
    }

    /// Does the method type mention a doubleword parameter?
    fn mtp_must_be_lowered(&self, mtp: TypeId) -> bool {
        self.types
            .method(mtp)
            .params
            .iter()
            .any(|&tp| self.param_is_dw(tp))
    }

    fn param_is_dw(&self, tp: TypeId) -> bool {
        self.types
            .is_primitive(tp)
            .then(|| self.types.type_mode(tp))
            .flatten()
            .map(|m| self.dw(m))
            .unwrap_or(false)
    }

    /// Produce (and cache) the lowered version of a method type: every
    /// doubleword parameter and result becomes two consecutive half-width
    /// entries. Lowered types carry a back reference to the original,
    /// which makes the transformation idempotent.
    fn lower_mtp(&mut self, mtp: TypeId) -> TypeId {
        if self.types.is_lowered_method(mtp) {
            return mtp;
        }
        if let Some(&l) = self.shared.lowered_type.get(&mtp) {
            return l;
        }

        let lm = self.shared.modes;
        let old = self.types.method(mtp).clone();
        let mut params = Vec::with_capacity(old.params.len());
        let mut results = Vec::with_capacity(old.results.len());
        for &tp in &old.params {
            match self.types.type_mode(tp).filter(|_| self.types.is_primitive(tp)) {
                Some(m) if m == lm.high_signed => {
                    params.push(self.shared.tp_u);
                    params.push(self.shared.tp_s);
                }
                Some(m) if m == lm.high_unsigned => {
                    params.push(self.shared.tp_u);
                    params.push(self.shared.tp_u);
                }
                _ => params.push(tp),
            }
        }
        for &tp in &old.results {
            match self.types.type_mode(tp).filter(|_| self.types.is_primitive(tp)) {
                Some(m) if m == lm.high_signed => {
                    results.push(self.shared.tp_u);
                    results.push(self.shared.tp_s);
                }
                Some(m) if m == lm.high_unsigned => {
                    results.push(self.shared.tp_u);
                    results.push(self.shared.tp_u);
                }
                _ => results.push(tp),
            }
        }

        let lowered = self.types.new_method(params, results);
        self.types.method_mut(lowered).higher = Some(mtp);
        self.shared.lowered_type.insert(mtp, lowered);

        if let Some(old_vp) = old.value_params {
            let new_vp = self.types.new_compound(CompoundKind::Frame);
            let old_members = self.types.compound_members(old_vp).to_vec();
            for (i, &ent) in old_members.iter().enumerate() {
                let name = self.types.entity(ent).name.clone();
                let is_dw = old
                    .params
                    .get(i)
                    .map(|&tp| self.param_is_dw(tp))
                    .unwrap_or(false);
                if is_dw {
                    let signed = self.types.type_mode(old.params[i]) == Some(lm.high_signed);
                    let low_name = format!("{}{}", name, self.shared.first_suffix);
                    let high_name = format!("{}{}", name, self.shared.next_suffix);
                    let low_ent = self.types.new_entity(
                        new_vp,
                        &low_name,
                        self.shared.tp_u,
                        EntityKind::Parameter,
                    );
                    let high_tp = if signed {
                        self.shared.tp_s
                    } else {
                        self.shared.tp_u
                    };
                    self.types
                        .new_entity(new_vp, &high_name, high_tp, EntityKind::Parameter);
                    self.shared.value_param_map.insert(ent, low_ent);
                } else {
                    let ty = self.types.entity(ent).ty;
                    let ne = self
                        .types
                        .new_entity(new_vp, &name, ty, EntityKind::Parameter);
                    self.shared.value_param_map.insert(ent, ne);
                }
            }
            self.types.method_mut(lowered).value_params = Some(new_vp);
        }

        lowered
    }

    /// The original signature behind a possibly lowered method type.
    fn unlowered_mtp(&self, mtp: TypeId) -> TypeId {
        self.types.method(mtp).higher.unwrap_or(mtp)
    }

    /// Add a control-flow edge to `block`, duplicating each Phi input from
    /// the position of `tmpl`.
    fn add_block_cf_input(&mut self, block: NodeId, tmpl: NodeId, cf: NodeId) {
        let nr = self
            .graph
            .ins(block)
            .iter()
            .position(|&p| p == tmpl)
            .expect("template edge not found in block");
        self.graph.add_input(block, cf);
        let phis = self.graph.block_phis(block).to_vec();
        for phi in phis {
            let v = self.graph.input(phi, nr);
            self.graph.add_input(phi, v);
        }
    }
}

// ---- prepare wave ----------------------------------------------------

fn prepare_links(env: &mut LowerEnv, n: NodeId) {
    let mode = env.op_mode(n);
    if env.dw(mode) {
        env.alloc_entry(n);
        env.must_be_lowered = true;
    } else if env.graph.op(n) == Opcode::Conv {
        let pred_mode = env.graph.mode(env.graph.input(n, 0));
        if env.dw(pred_mode) {
            env.must_be_lowered = true;
        }
    }

    match env.graph.op(n) {
        Opcode::Proj => {
            let pred = env.graph.proj_pred(n);
            env.chains.entry(pred).or_default().push(n);
        }
        Opcode::Phi => {
            let block = env.graph.block_of(n);
            env.graph.add_block_phi(block, n);
        }
        Opcode::Block => {
            for i in 0..env.graph.arity(n) {
                let cf = env.graph.input(n, i);
                if env.graph.op(cf) == Opcode::Proj {
                    env.proj_to_block.insert(cf, n);
                }
            }
        }
        _ => {}
    }
}

/// Rebuild a general doubleword Rotl into `Or(Shl(x, c), Shr(x, W-c))` so
/// the shift lowering handles it; the half-width rotate (count == W/2)
/// keeps its node and becomes a swap of the halves.
fn prepare_node(env: &mut LowerEnv, n: NodeId) {
    if env.graph.op(n) == Opcode::Rotl {
        let mode = env.op_mode(n);
        if env.dw(mode) {
            let right = env.graph.input(n, 1);
            if env.graph.op(right) == Opcode::Const {
                let tv = env.graph.const_value(right);
                if tv.as_long(env.modes) == Some(env.shared.modes.word_bits) {
                    // swap case, handled by lower_rotl
                    prepare_links(env, n);
                    return;
                }
            }
            let left = env.graph.input(n, 0);
            let omode = env.graph.mode(n);
            let rmode = env.graph.mode(right);
            let block = env.graph.block_of(n);
            let shl = env.graph.new_binop(Opcode::Shl, block, left, right, omode);
            let width = env.modes.bits(omode) as i64;
            let c = env.new_const_long(rmode, width);
            let sub = env.graph.new_sub(block, c, right, rmode);
            let shr = env.graph.new_binop(Opcode::Shr, block, left, sub, omode);
            let or = env.graph.new_binop(Opcode::Or, block, shl, shr, omode);
            env.graph.exchange(n, or);
            for m in [shl, c, sub, shr, or] {
                prepare_links(env, m);
            }
            return;
        }
    }
    prepare_links(env, n);
}

// ---- per-opcode lowering ---------------------------------------------

fn lower_const(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let tv = env.graph.const_value(n);
    let tv_l = tv.convert_to(lm.low_unsigned, env.modes);
    let low = env.graph.new_const(tv_l);
    let tv_h = tv
        .shrs(lm.word_bits as u32, env.modes)
        .convert_to(mode, env.modes);
    let high = env.graph.new_const(tv_h);
    env.graph.inherit_dbg(n, low);
    env.graph.inherit_dbg(n, high);
    env.set_pair(n, low, high);
}

fn lower_load(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let g = &mut *env.graph;
    let adr = g.input(n, 1);
    let mem = g.input(n, 0);
    let block = g.block_of(n);
    let volatile = g.load_volatile(n);
    let adr_mode = g.mode(adr);

    let offs = env.new_const_long(lm.low_unsigned, lm.word_bytes);
    let added = env.graph.new_add(block, adr, offs, adr_mode);
    let (low_adr, high_adr) = if env.shared.params.little_endian {
        (adr, added)
    } else {
        (added, adr)
    };

    let low = env
        .graph
        .new_load(block, mem, low_adr, lm.low_unsigned, volatile);
    let low_mem = env.graph.new_proj(low, Mode::M, pn::LOAD_M);
    let high = env.graph.new_load(block, low_mem, high_adr, mode, volatile);
    env.graph.inherit_dbg(n, low);
    env.graph.inherit_dbg(n, high);

    env.set_pair(n, low, high);

    for proj in env.chain(n) {
        match env.graph.proj_num(proj) {
            pn::LOAD_M => env.graph.set_input(proj, 0, high),
            pn::LOAD_X_EXCEPT => env.graph.set_input(proj, 0, low),
            pn::LOAD_RES => {
                let res_l = env.graph.new_proj(low, lm.low_unsigned, pn::LOAD_RES);
                let res_h = env.graph.new_proj(high, mode, pn::LOAD_RES);
                env.set_pair(proj, res_l, res_h);
            }
            _ => panic!("unexpected Proj number on Load"),
        }
        env.mark_handled(proj);
    }
}

fn lower_store(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    let lm = env.shared.modes;
    let value = env.graph.input(n, 2);
    let Some(vp) = env.ready_pair(value) else {
        env.defer(n);
        return;
    };

    let mem = env.graph.input(n, 0);
    let adr = env.graph.input(n, 1);
    let block = env.graph.block_of(n);
    let volatile = env.graph.store_volatile(n);
    let adr_mode = env.graph.mode(adr);

    let offs = env.new_const_long(lm.low_unsigned, lm.word_bytes);
    let added = env.graph.new_add(block, adr, offs, adr_mode);
    let (low_adr, high_adr) = if env.shared.params.little_endian {
        (adr, added)
    } else {
        (added, adr)
    };

    let low = env.graph.new_store(block, mem, low_adr, vp.low, volatile);
    let low_mem = env.graph.new_proj(low, Mode::M, pn::STORE_M);
    let high = env.graph.new_store(block, low_mem, high_adr, vp.high, volatile);
    env.graph.inherit_dbg(n, low);
    env.graph.inherit_dbg(n, high);

    env.set_pair(n, low, high);

    for proj in env.chain(n) {
        match env.graph.proj_num(proj) {
            pn::STORE_M => env.graph.set_input(proj, 0, high),
            pn::STORE_X_EXCEPT => env.graph.set_input(proj, 0, low),
            _ => panic!("unexpected Proj number on Store"),
        }
        env.mark_handled(proj);
    }
}

/// Add, Sub, Mul: a Call to the runtime intrinsic
/// `(lo_a, hi_a, lo_b, hi_b) -> (lo_r, hi_r)`.
fn lower_binop_call(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let (left, right) = (env.graph.input(n, 0), env.graph.input(n, 1));
    let (Some(lp), Some(rp)) = (env.ready_pair(left), env.ready_pair(right)) else {
        env.defer(n);
        return;
    };

    let signed = env.modes.is_signed(mode);
    let mtp = if signed {
        env.shared.binop_tp_s
    } else {
        env.shared.binop_tp_u
    };
    let op = env.graph.op(n);
    let addr = env.intrinsic_address(mtp, op, mode, mode);
    let block = env.graph.block_of(n);
    let no_mem = env.graph.no_mem();
    let call = env
        .graph
        .new_call(block, no_mem, addr, &[lp.low, lp.high, rp.low, rp.high], mtp);
    let pinned = env.graph.is_pinned(n);
    env.graph.set_pinned(call, pinned);
    env.graph.inherit_dbg(n, call);
    let res = env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT);
    let low = env.graph.new_proj(res, lm.low_unsigned, 0);
    let high = env.graph.new_proj(res, mode, 1);
    env.set_pair(n, low, high);
}

/// Div and Mod: like the binop call but routed through memory.
fn lower_div_mod(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let (left, right) = (env.graph.input(n, 1), env.graph.input(n, 2));
    let (Some(lp), Some(rp)) = (env.ready_pair(left), env.ready_pair(right)) else {
        env.defer(n);
        return;
    };

    let signed = env.modes.is_signed(mode);
    let mtp = if signed {
        env.shared.binop_tp_s
    } else {
        env.shared.binop_tp_u
    };
    let op = env.graph.op(n);
    let opmode = env.op_mode(n);
    let addr = env.intrinsic_address(mtp, op, opmode, opmode);
    let block = env.graph.block_of(n);
    let mem = env.graph.input(n, 0);
    let call = env
        .graph
        .new_call(block, mem, addr, &[lp.low, lp.high, rp.low, rp.high], mtp);
    let pinned = env.graph.is_pinned(n);
    env.graph.set_pinned(call, pinned);
    env.graph.inherit_dbg(n, call);
    let res = env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT);

    let res_pn = if op == Opcode::Div {
        pn::DIV_RES
    } else {
        pn::MOD_RES
    };
    for proj in env.chain(n) {
        let num = env.graph.proj_num(proj);
        if num == pn::DIV_M {
            env.graph.set_input(proj, 0, call);
            env.graph.set_proj_num(proj, pn::CALL_M);
        } else if num == pn::DIV_X_EXCEPT {
            env.graph.set_input(proj, 0, call);
            env.graph.set_proj_num(proj, pn::CALL_X_EXCEPT);
        } else if num == res_pn {
            let low = env.graph.new_proj(res, lm.low_unsigned, 0);
            let high = env.graph.new_proj(res, mode, 1);
            env.set_pair(proj, low, high);
        } else {
            panic!("unexpected Proj number on {:?}", op);
        }
        env.mark_handled(proj);
    }
}

/// DivMod: one or two intrinsic calls depending on which results are
/// observed, memory threaded from the Div call into the Mod call.
fn lower_divmod(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let (left, right) = (env.graph.input(n, 1), env.graph.input(n, 2));
    let (Some(lp), Some(rp)) = (env.ready_pair(left), env.ready_pair(right)) else {
        env.defer(n);
        return;
    };

    let mut want_div = false;
    let mut want_mod = false;
    for proj in env.chain(n) {
        match env.graph.proj_num(proj) {
            pn::DIVMOD_RES_DIV => want_div = true,
            pn::DIVMOD_RES_MOD => want_mod = true,
            _ => {}
        }
    }

    let signed = env.modes.is_signed(mode);
    let mtp = if signed {
        env.shared.binop_tp_s
    } else {
        env.shared.binop_tp_u
    };
    let opmode = env.op_mode(n);
    let block = env.graph.block_of(n);
    let pinned = env.graph.is_pinned(n);
    let ins = [lp.low, lp.high, rp.low, rp.high];
    let mut mem = env.graph.input(n, 0);

    let mut call_div = None;
    let mut res_div = None;
    if want_div {
        let addr = env.intrinsic_address(mtp, Opcode::Div, opmode, opmode);
        let call = env.graph.new_call(block, mem, addr, &ins, mtp);
        env.graph.set_pinned(call, pinned);
        env.graph.inherit_dbg(n, call);
        res_div = Some(env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT));
        call_div = Some(call);
    }
    let mut call_mod = None;
    let mut res_mod = None;
    if want_mod {
        if let Some(cd) = call_div {
            mem = env.graph.new_proj(cd, Mode::M, pn::CALL_M);
        }
        let addr = env.intrinsic_address(mtp, Opcode::Mod, opmode, opmode);
        let call = env.graph.new_call(block, mem, addr, &ins, mtp);
        env.graph.set_pinned(call, pinned);
        env.graph.inherit_dbg(n, call);
        res_mod = Some(env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT));
        call_mod = Some(call);
    }
    let first_call = call_div.or(call_mod);

    for proj in env.chain(n) {
        match env.graph.proj_num(proj) {
            pn::DIVMOD_M => {
                let target = first_call.unwrap_or(mem);
                env.graph.set_input(proj, 0, target);
                env.graph.set_proj_num(proj, pn::CALL_M);
            }
            pn::DIVMOD_X_EXCEPT => {
                let target = first_call.unwrap_or(mem);
                env.graph.set_input(proj, 0, target);
                env.graph.set_proj_num(proj, pn::CALL_X_EXCEPT);
            }
            pn::DIVMOD_RES_DIV => {
                let res = res_div.expect("observed div result");
                let low = env.graph.new_proj(res, lm.low_unsigned, 0);
                let high = env.graph.new_proj(res, mode, 1);
                env.set_pair(proj, low, high);
            }
            pn::DIVMOD_RES_MOD => {
                let res = res_mod.expect("observed mod result");
                let low = env.graph.new_proj(res, lm.low_unsigned, 0);
                let high = env.graph.new_proj(res, mode, 1);
                env.set_pair(proj, low, high);
            }
            _ => panic!("unexpected Proj number on DivMod"),
        }
        env.mark_handled(proj);
    }
}

/// And, Or, Eor: two component-wise operations, no runtime call.
fn lower_logical(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let (left, right) = (env.graph.input(n, 0), env.graph.input(n, 1));
    let (Some(lp), Some(rp)) = (env.ready_pair(left), env.ready_pair(right)) else {
        env.defer(n);
        return;
    };
    let op = env.graph.op(n);
    let block = env.graph.block_of(n);
    let low = env.graph.new_binop(op, block, lp.low, rp.low, lm.low_unsigned);
    let high = env.graph.new_binop(op, block, lp.high, rp.high, mode);
    env.graph.inherit_dbg(n, low);
    env.graph.inherit_dbg(n, high);
    env.set_pair(n, low, high);
}

fn lower_not(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let op = env.graph.input(n, 0);
    let Some(p) = env.ready_pair(op) else {
        env.defer(n);
        return;
    };
    let block = env.graph.block_of(n);
    let low = env.graph.new_not(block, p.low, lm.low_unsigned);
    let high = env.graph.new_not(block, p.high, mode);
    env.graph.inherit_dbg(n, low);
    env.graph.inherit_dbg(n, high);
    env.set_pair(n, low, high);
}

/// Minus: runtime call `(lo, hi) -> (lo_r, hi_r)`.
fn lower_unop_call(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let operand = env.graph.input(n, 0);
    let Some(p) = env.ready_pair(operand) else {
        env.defer(n);
        return;
    };
    let signed = env.modes.is_signed(mode);
    let mtp = if signed {
        env.shared.unop_tp_s
    } else {
        env.shared.unop_tp_u
    };
    let op = env.graph.op(n);
    let addr = env.intrinsic_address(mtp, op, mode, mode);
    let block = env.graph.block_of(n);
    let no_mem = env.graph.no_mem();
    let call = env.graph.new_call(block, no_mem, addr, &[p.low, p.high], mtp);
    let pinned = env.graph.is_pinned(n);
    env.graph.set_pinned(call, pinned);
    env.graph.inherit_dbg(n, call);
    let res = env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT);
    let low = env.graph.new_proj(res, lm.low_unsigned, 0);
    let high = env.graph.new_proj(res, mode, 1);
    env.set_pair(n, low, high);
}

/// General shift: runtime call `(lo, hi, count) -> (lo_r, hi_r)`. The
/// count stays half-width and is never lowered.
fn lower_shiftop(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let left = env.graph.input(n, 0);
    let Some(lp) = env.ready_pair(left) else {
        env.defer(n);
        return;
    };
    let count = env.graph.input(n, 1);
    assert!(
        !env.dw(env.graph.mode(count)),
        "shift counts are half-width"
    );

    let signed = env.modes.is_signed(mode);
    let mtp = if signed {
        env.shared.shiftop_tp_s
    } else {
        env.shared.shiftop_tp_u
    };
    let op = env.graph.op(n);
    let addr = env.intrinsic_address(mtp, op, mode, mode);
    let block = env.graph.block_of(n);
    let no_mem = env.graph.no_mem();
    let call = env
        .graph
        .new_call(block, no_mem, addr, &[lp.low, lp.high, count], mtp);
    let pinned = env.graph.is_pinned(n);
    env.graph.set_pinned(call, pinned);
    env.graph.inherit_dbg(n, call);
    let res = env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT);
    let low = env.graph.new_proj(res, lm.low_unsigned, 0);
    let high = env.graph.new_proj(res, mode, 1);
    env.set_pair(n, low, high);
}

/// Constant shift count of at least a half word width?
fn large_const_shift(env: &LowerEnv, n: NodeId, mode: Mode) -> Option<i64> {
    let right = env.graph.input(n, 1);
    if env.graph.op(right) != Opcode::Const {
        return None;
    }
    let tv = env.graph.const_value(right);
    let cnt = tv.as_long(env.modes)?;
    (cnt >= env.modes.bits(mode) as i64).then_some(cnt)
}

fn lower_shr(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    if let Some(cnt) = large_const_shift(env, n, mode) {
        let left = env.graph.input(n, 0);
        let Some(lp) = env.ready_pair(left) else {
            env.defer(n);
            return;
        };
        let block = env.graph.block_of(n);
        let shf_cnt = cnt - env.modes.bits(mode) as i64;
        let mut high = lp.high;
        if env.graph.mode(high) != lm.low_unsigned {
            high = env.graph.new_conv(block, high, lm.low_unsigned);
        }
        let low = if shf_cnt > 0 {
            let c = env.new_const_long(lm.low_unsigned, shf_cnt);
            env.graph
                .new_binop(Opcode::Shr, block, high, c, lm.low_unsigned)
        } else {
            high
        };
        let zero = env.new_null(mode);
        env.set_pair(n, low, zero);
        return;
    }
    lower_shiftop(env, n, mode);
}

fn lower_shl(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    if let Some(cnt) = large_const_shift(env, n, mode) {
        let left = env.graph.input(n, 0);
        let Some(lp) = env.ready_pair(left) else {
            env.defer(n);
            return;
        };
        let block = env.graph.block_of(n);
        let shf_cnt = cnt - env.modes.bits(mode) as i64;
        let moved = env.graph.new_conv(block, lp.low, mode);
        let high = if shf_cnt > 0 {
            let c = env.new_const_long(lm.low_unsigned, shf_cnt);
            env.graph.new_binop(Opcode::Shl, block, moved, c, mode)
        } else {
            moved
        };
        let zero = env.new_null(lm.low_unsigned);
        env.set_pair(n, zero, high);
        return;
    }
    lower_shiftop(env, n, mode);
}

fn lower_shrs(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    if let Some(cnt) = large_const_shift(env, n, mode) {
        let left = env.graph.input(n, 0);
        let Some(lp) = env.ready_pair(left) else {
            env.defer(n);
            return;
        };
        let block = env.graph.block_of(n);
        let shf_cnt = cnt - env.modes.bits(mode) as i64;
        let mut high_u = lp.high;
        if env.graph.mode(high_u) != lm.low_unsigned {
            high_u = env.graph.new_conv(block, lp.high, lm.low_unsigned);
        }
        let shifted = if shf_cnt > 0 {
            let c = env.new_const_long(lm.low_unsigned, shf_cnt);
            env.graph
                .new_binop(Opcode::Shrs, block, high_u, c, lm.low_unsigned)
        } else {
            high_u
        };
        let low = env.graph.new_conv(block, shifted, lm.low_unsigned);
        let c = env.new_const_long(lm.low_unsigned, lm.word_bits - 1);
        let high = env.graph.new_binop(Opcode::Shrs, block, lp.high, c, mode);
        env.set_pair(n, low, high);
        return;
    }
    lower_shiftop(env, n, mode);
}

/// Rotate by exactly a half word: swap the halves.
fn lower_rotl(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    let right = env.graph.input(n, 1);
    debug_assert_eq!(
        env.graph.const_value(right).as_long(env.modes),
        Some(env.shared.modes.word_bits)
    );
    let left = env.graph.input(n, 0);
    let Some(p) = env.ready_pair(left) else {
        env.defer(n);
        return;
    };
    env.set_pair(n, p.high, p.low);
}

/// Pure boolean lowering of a doubleword Cmp used outside a Cond.
fn lower_boolean_cmp(env: &mut LowerEnv, cmp: NodeId) -> Option<NodeId> {
    let l = env.graph.input(cmp, 0);
    let r = env.graph.input(cmp, 1);
    let lp = env.ready_pair(l)?;
    let rp = env.ready_pair(r)?;

    let rel = env.graph.cmp_relation(cmp);
    let block = env.graph.block_of(cmp);
    let g = &mut *env.graph;

    let res = if rel == Relation::EQ {
        // a == b <=> a_h == b_h && a_l == b_l
        let low = g.new_cmp(block, lp.low, rp.low, Relation::EQ);
        let high = g.new_cmp(block, lp.high, rp.high, Relation::EQ);
        g.new_binop(Opcode::And, block, low, high, Mode::B)
    } else if rel == Relation::LG {
        // a != b <=> a_h != b_h || a_l != b_l
        let low = g.new_cmp(block, lp.low, rp.low, Relation::LG);
        let high = g.new_cmp(block, lp.high, rp.high, Relation::LG);
        g.new_binop(Opcode::Or, block, low, high, Mode::B)
    } else {
        // a rel b <=> a_h REL b_h || (a_h == b_h && a_l rel b_l)
        let low = g.new_cmp(block, lp.low, rp.low, rel);
        let high_eq = g.new_cmp(block, lp.high, rp.high, Relation::EQ);
        let t = g.new_binop(Opcode::And, block, low, high_eq, Mode::B);
        let high_rel = g.new_cmp(block, lp.high, rp.high, rel.without(Relation::EQ));
        g.new_binop(Opcode::Or, block, high_rel, t, Mode::B)
    };
    Some(res)
}

/// Lower a Cond whose selector compares doubleword values: build
/// short-circuit control flow over high and low compares.
fn lower_cond(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    let sel = env.graph.input(n, 0);
    if env.graph.mode(sel) != Mode::B {
        // jump table with a doubleword selector: use the low word
        if env.entry(sel).is_some() {
            match env.ready_pair(sel) {
                Some(p) => env.graph.set_input(n, 0, p.low),
                None => env.defer(n),
            }
        }
        return;
    }
    if env.graph.op(sel) != Opcode::Cmp {
        return;
    }
    let left = env.graph.input(sel, 0);
    if env.entry(left).is_none() {
        // an ordinary compare
        return;
    }
    let right = env.graph.input(sel, 1);
    let (Some(lp), Some(rp)) = (env.ready_pair(left), env.ready_pair(right)) else {
        env.defer(n);
        return;
    };

    let mut proj_t = NodeId::NONE;
    let mut proj_f = NodeId::NONE;
    for proj in env.chain(n) {
        match env.graph.proj_num(proj) {
            pn::COND_TRUE => {
                assert!(proj_t.is_none(), "more than one Proj(true)");
                proj_t = proj;
            }
            pn::COND_FALSE => {
                assert!(proj_f.is_none(), "more than one Proj(false)");
                proj_f = proj;
            }
            _ => panic!("unexpected Proj number on Cond"),
        }
        env.mark_handled(proj);
    }
    assert!(!proj_t.is_none() && !proj_f.is_none());

    let lm = env.shared.modes;
    let rel = env.graph.cmp_relation(sel);
    let block = env.graph.block_of(n);

    // x ==/!= 0 => (low | high) ==/!= 0
    if env.graph.op(right) == Opcode::Const
        && env.graph.const_value(right).is_null()
        && (rel == Relation::EQ || rel == Relation::LG)
    {
        let low = env.graph.new_conv(block, lp.low, lm.low_unsigned);
        let high = env.graph.new_conv(block, lp.high, lm.low_unsigned);
        let or = env
            .graph
            .new_binop(Opcode::Or, block, low, high, lm.low_unsigned);
        let zero = env.new_null(lm.low_unsigned);
        let cmp = env.graph.new_cmp(block, or, zero, rel);
        env.graph.set_input(n, 0, cmp);
        return;
    }

    if rel == Relation::EQ {
        // a == b <=> a_h == b_h && a_l == b_l
        let dst_blk = *env.proj_to_block.get(&proj_f).expect("false target");
        let cmp_h = env.graph.new_cmp(block, lp.high, rp.high, Relation::EQ);
        let cond_h = env.graph.new_cond(block, cmp_h);
        let proj_hf = env.graph.new_proj(cond_h, Mode::X, pn::COND_FALSE);
        env.mark_handled(proj_hf);
        env.graph.exchange(proj_f, proj_hf);
        let proj_ht = env.graph.new_proj(cond_h, Mode::X, pn::COND_TRUE);
        env.mark_handled(proj_ht);

        let new_bl = env.graph.new_block(&[proj_ht]);
        let cmp_l = env.graph.new_cmp(new_bl, lp.low, rp.low, Relation::EQ);
        let cond_l = env.graph.new_cond(new_bl, cmp_l);
        let p = env.graph.new_proj(cond_l, Mode::X, pn::COND_FALSE);
        env.mark_handled(p);
        env.add_block_cf_input(dst_blk, proj_hf, p);
        let p = env.graph.new_proj(cond_l, Mode::X, pn::COND_TRUE);
        env.mark_handled(p);
        env.graph.exchange(proj_t, p);
    } else if rel == Relation::LG {
        // a != b <=> a_h != b_h || a_l != b_l
        let dst_blk = *env.proj_to_block.get(&proj_t).expect("true target");
        let cmp_h = env.graph.new_cmp(block, lp.high, rp.high, Relation::LG);
        let cond_h = env.graph.new_cond(block, cmp_h);
        let proj_ht = env.graph.new_proj(cond_h, Mode::X, pn::COND_TRUE);
        env.mark_handled(proj_ht);
        env.graph.exchange(proj_t, proj_ht);
        let proj_hf = env.graph.new_proj(cond_h, Mode::X, pn::COND_FALSE);
        env.mark_handled(proj_hf);

        let new_bl = env.graph.new_block(&[proj_hf]);
        let cmp_l = env.graph.new_cmp(new_bl, lp.low, rp.low, Relation::LG);
        let cond_l = env.graph.new_cond(new_bl, cmp_l);
        let p = env.graph.new_proj(cond_l, Mode::X, pn::COND_TRUE);
        env.mark_handled(p);
        env.add_block_cf_input(dst_blk, proj_ht, p);
        let p = env.graph.new_proj(cond_l, Mode::X, pn::COND_FALSE);
        env.mark_handled(p);
        env.graph.exchange(proj_f, p);
    } else {
        // a rel b <=> a_h REL b_h || (a_h == b_h && a_l rel b_l)
        let dst_t = *env.proj_to_block.get(&proj_t).expect("true target");
        let dst_f = *env.proj_to_block.get(&proj_f).expect("false target");

        let cmp_h = env
            .graph
            .new_cmp(block, lp.high, rp.high, rel.without(Relation::EQ));
        let cond_h = env.graph.new_cond(block, cmp_h);
        let proj_ht = env.graph.new_proj(cond_h, Mode::X, pn::COND_TRUE);
        env.mark_handled(proj_ht);
        env.graph.exchange(proj_t, proj_ht);
        let proj_t = proj_ht;
        let proj_hf = env.graph.new_proj(cond_h, Mode::X, pn::COND_FALSE);
        env.mark_handled(proj_hf);

        let bl_eq = env.graph.new_block(&[proj_hf]);
        let cmp_eq = env.graph.new_cmp(block, lp.high, rp.high, Relation::EQ);
        let cond_eq = env.graph.new_cond(bl_eq, cmp_eq);
        let p = env.graph.new_proj(cond_eq, Mode::X, pn::COND_FALSE);
        env.mark_handled(p);
        env.graph.exchange(proj_f, p);
        let proj_f = p;
        let p = env.graph.new_proj(cond_eq, Mode::X, pn::COND_TRUE);
        env.mark_handled(p);

        let bl_low = env.graph.new_block(&[p]);
        let cmp_low = env.graph.new_cmp(bl_low, lp.low, rp.low, rel);
        let cond_low = env.graph.new_cond(bl_low, cmp_low);
        let p = env.graph.new_proj(cond_low, Mode::X, pn::COND_TRUE);
        env.mark_handled(p);
        env.add_block_cf_input(dst_t, proj_t, p);
        let p = env.graph.new_proj(cond_low, Mode::X, pn::COND_FALSE);
        env.mark_handled(p);
        env.add_block_cf_input(dst_f, proj_f, p);
    }

    env.cf_changed = true;
}

fn lower_conv(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    let omode = env.graph.mode(n);
    if env.dw(omode) {
        lower_conv_to_dw(env, n);
    } else {
        let imode = env.graph.mode(env.graph.input(n, 0));
        if env.dw(imode) {
            lower_conv_from_dw(env, n);
        }
    }
}

fn lower_conv_to_dw(env: &mut LowerEnv, n: NodeId) {
    let lm = env.shared.modes;
    let omode = env.graph.mode(n);
    let operand = env.graph.input(n, 0);
    let imode = env.graph.mode(operand);
    let block = env.graph.block_of(n);
    let low_signed = if env.modes.is_signed(omode) {
        lm.low_signed
    } else {
        lm.low_unsigned
    };

    if env.modes.is_int(imode) || env.modes.is_reference(imode) {
        if env.dw(imode) {
            // between the two doubleword modes: keep low, retag high
            let Some(p) = env.ready_pair(operand) else {
                env.defer(n);
                return;
            };
            let high = env.graph.new_conv(block, p.high, low_signed);
            env.set_pair(n, p.low, high);
        } else {
            let mut low = operand;
            if imode != lm.low_unsigned {
                low = env.graph.new_conv(block, operand, lm.low_unsigned);
            }
            let high = if env.modes.is_signed(imode) {
                let c = env.new_const_long(lm.low_unsigned, lm.word_bits - 1);
                let mut op_s = low;
                if env.graph.mode(op_s) != low_signed {
                    op_s = env.graph.new_conv(block, low, low_signed);
                }
                env.graph.new_binop(Opcode::Shrs, block, op_s, c, low_signed)
            } else {
                env.new_null(low_signed)
            };
            env.set_pair(n, low, high);
        }
    } else if imode == Mode::B {
        let low = env.graph.new_conv(block, operand, lm.low_unsigned);
        let high = env.new_null(low_signed);
        env.set_pair(n, low, high);
    } else {
        // float source: runtime call
        let mtp = env.conv_type(imode, omode);
        let addr = env.intrinsic_address(mtp, Opcode::Conv, imode, omode);
        let no_mem = env.graph.no_mem();
        let call = env.graph.new_call(block, no_mem, addr, &[operand], mtp);
        let pinned = env.graph.is_pinned(n);
        env.graph.set_pinned(call, pinned);
        let res = env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT);
        let low = env.graph.new_proj(res, lm.low_unsigned, 0);
        let high = env.graph.new_proj(res, low_signed, 1);
        env.set_pair(n, low, high);
    }
}

fn lower_conv_from_dw(env: &mut LowerEnv, n: NodeId) {
    let lm = env.shared.modes;
    let operand = env.graph.input(n, 0);
    let Some(p) = env.ready_pair(operand) else {
        env.defer(n);
        return;
    };
    let omode = env.graph.mode(n);
    let block = env.graph.block_of(n);

    if env.modes.is_int(omode) || env.modes.is_reference(omode) {
        // narrowing: the low word carries the value
        let mut val = p.low;
        if omode != lm.low_unsigned {
            val = env.graph.new_conv(block, val, omode);
        }
        env.graph.set_input(n, 0, val);
    } else if omode == Mode::B {
        // nonzero test: (low | high)
        let or = env
            .graph
            .new_binop(Opcode::Or, block, p.low, p.high, lm.low_unsigned);
        env.graph.set_input(n, 0, or);
    } else {
        let imode = env.graph.mode(operand);
        let mtp = env.conv_type(imode, omode);
        let addr = env.intrinsic_address(mtp, Opcode::Conv, imode, omode);
        let no_mem = env.graph.no_mem();
        let call = env.graph.new_call(block, no_mem, addr, &[p.low, p.high], mtp);
        let pinned = env.graph.is_pinned(n);
        env.graph.set_pinned(call, pinned);
        let res = env.graph.new_proj(call, Mode::T, pn::CALL_T_RESULT);
        let out = env.graph.new_proj(res, omode, 0);
        env.graph.exchange(n, out);
    }
}

/// Phis become one Phi per half. Unresolved operands are filled with
/// Dummy placeholders and completed through the deque.
fn lower_phi(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let arity = env.graph.arity(n);

    if let Some(pair) = env.ready_pair(n) {
        // built before; fill in operands that were dummies
        for i in 0..arity {
            let pred = env.graph.input(n, i);
            match env.ready_pair(pred) {
                Some(pp) => {
                    env.graph.set_input(pair.low, i, pp.low);
                    env.graph.set_input(pair.high, i, pp.high);
                }
                None => {
                    env.defer(n);
                    return;
                }
            }
        }
        return;
    }

    let unk_l = env.graph.new_dummy(lm.low_unsigned);
    let unk_h = env.graph.new_dummy(mode);
    let mut in_l = Vec::with_capacity(arity);
    let mut in_h = Vec::with_capacity(arity);
    let mut incomplete = false;
    for i in 0..arity {
        let pred = env.graph.input(n, i);
        match env.ready_pair(pred) {
            Some(pp) => {
                in_l.push(pp.low);
                in_h.push(pp.high);
            }
            None => {
                in_l.push(unk_l);
                in_h.push(unk_h);
                incomplete = true;
            }
        }
    }

    let block = env.graph.block_of(n);
    let phi_l = env.graph.new_phi(block, &in_l, lm.low_unsigned);
    let phi_h = env.graph.new_phi(block, &in_h, mode);
    env.graph.inherit_dbg(n, phi_l);
    env.graph.inherit_dbg(n, phi_h);
    env.set_pair(n, phi_l, phi_h);

    if incomplete {
        env.defer(n);
    }
}

fn lower_mux(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let (if_false, if_true) = (env.graph.input(n, 1), env.graph.input(n, 2));
    let (Some(fp), Some(tp)) = (env.ready_pair(if_false), env.ready_pair(if_true)) else {
        env.defer(n);
        return;
    };
    let sel = env.graph.input(n, 0);
    let block = env.graph.block_of(n);
    let low = env.graph.new_mux(block, sel, fp.low, tp.low, lm.low_unsigned);
    let high = env.graph.new_mux(block, sel, fp.high, tp.high, mode);
    env.graph.inherit_dbg(n, low);
    env.graph.inherit_dbg(n, high);
    env.set_pair(n, low, high);
}

/// Doubleword operands or results of inline assembly are unsupported.
fn lower_asm(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    for i in 0..env.graph.arity(n) {
        let m = env.graph.mode(env.graph.input(n, i));
        if env.dw(m) {
            panic!("lowering ASM operands is unsupported");
        }
    }
    for proj in env.chain(n) {
        if env.dw(env.graph.mode(proj)) {
            panic!("lowering ASM results is unsupported");
        }
    }
}

/// Rewrite Sels of value-parameter entities when the parameter type of the
/// enclosing method was substituted.
fn lower_sel(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    let Some(vp_tp) = env.value_param_tp else {
        return;
    };
    let ent = env.graph.node_entity(n);
    if env.types.entity(ent).owner == vp_tp {
        let new_ent = *env
            .shared
            .value_param_map
            .get(&ent)
            .expect("value parameter was mapped during method lowering");
        env.graph.set_node_entity(n, new_ent);
    }
}

fn lower_unknown(env: &mut LowerEnv, n: NodeId, mode: Mode) {
    let lm = env.shared.modes;
    let low = env.graph.new_unknown(lm.low_unsigned);
    let high = env.graph.new_unknown(mode);
    env.set_pair(n, low, high);
}

/// Renumber the parameter Projs of Start against the lowered method type,
/// splitting every doubleword parameter into two Projs.
fn lower_start(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    let lm = env.shared.modes;
    let Some(entity) = env.graph.entity else {
        return;
    };
    let tp = env.types.entity(entity).ty;
    let mtp = if env.types.is_lowered_method(tp) {
        env.unlowered_mtp(tp)
    } else {
        tp
    };

    let params = env.types.method(mtp).params.clone();
    if params.is_empty() {
        return;
    }

    let mut new_projs = Vec::with_capacity(params.len());
    let mut j = 0u32;
    for &ptp in &params {
        new_projs.push(j);
        j += 1;
        if env.param_is_dw(ptp) {
            j += 1;
        }
    }
    if j as usize == params.len() {
        return;
    }

    let lowered = env.lower_mtp(mtp);
    env.types.entity_mut(entity).ty = lowered;

    let args = env.graph.args();
    let mut projs = env.chain(n);
    projs.extend(env.chain(args));
    for proj in projs {
        env.mark_handled(proj);
        if env.graph.proj_pred(proj) != args {
            continue;
        }
        let nr = env.graph.proj_num(proj) as usize;
        env.graph.set_proj_num(proj, new_projs[nr]);
        if env.entry(proj).is_some() {
            let mode_h = if env.graph.mode(proj) == lm.high_signed {
                lm.low_signed
            } else {
                lm.low_unsigned
            };
            let low = env.graph.new_proj(args, lm.low_unsigned, new_projs[nr]);
            let high = env.graph.new_proj(args, mode_h, new_projs[nr] + 1);
            env.set_pair(proj, low, high);
        }
    }
}

fn lower_return(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    // does any result need the expansion?
    let mut need_conv = false;
    for i in 1..env.graph.arity(n) {
        let pred = env.graph.input(n, i);
        if env.dw(env.op_mode(pred)) {
            if env.ready_pair(pred).is_none() {
                env.defer(n);
                return;
            }
            need_conv = true;
        }
    }
    if !need_conv {
        return;
    }

    let entity = env.graph.entity.expect("Return in a graph without entity");
    let tp = env.types.entity(entity).ty;
    let mtp = env.lower_mtp(env.unlowered_mtp(tp));
    env.types.entity_mut(entity).ty = mtp;

    let mut ins = vec![env.graph.input(n, 0)];
    for i in 1..env.graph.arity(n) {
        let pred = env.graph.input(n, i);
        match env.ready_pair(pred) {
            Some(p) => {
                ins.push(p.low);
                ins.push(p.high);
            }
            None => ins.push(pred),
        }
    }
    env.graph.set_inputs(n, &ins);
}

fn lower_call(env: &mut LowerEnv, n: NodeId, _mode: Mode) {
    let lm = env.shared.modes;
    let tp = env.graph.call_type(n);
    let call_tp = env.unlowered_mtp(tp);

    let method = env.types.method(call_tp).clone();
    let mut need_lower = method.params.iter().any(|&tp| env.param_is_dw(tp));

    let mut res_numbers = Vec::with_capacity(method.results.len());
    let mut j = 0u32;
    for &rtp in &method.results {
        res_numbers.push(j);
        j += 1;
        if env.param_is_dw(rtp) {
            need_lower = true;
            j += 1;
        }
    }
    if !need_lower {
        return;
    }

    let lowered_tp = env.lower_mtp(call_tp);
    env.graph.set_call_type(n, lowered_tp);

    let mut ins = vec![env.graph.input(n, 0), env.graph.input(n, 1)];
    for i in 0..method.params.len() {
        let pred = env.graph.input(n, 2 + i);
        if env.entry(pred).is_some() {
            let Some(p) = env.ready_pair(pred) else {
                env.defer(n);
                return;
            };
            ins.push(p.low);
            ins.push(p.high);
        } else {
            ins.push(pred);
        }
    }
    env.graph.set_inputs(n, &ins);

    // fix the result Projs
    let results = env
        .chain(n)
        .into_iter()
        .find(|&p| env.graph.proj_num(p) == pn::CALL_T_RESULT);
    let Some(results) = results else {
        return;
    };
    for proj in env.chain(results) {
        let nr = env.graph.proj_num(proj) as usize;
        env.graph.set_proj_num(proj, res_numbers[nr]);
        if env.entry(proj).is_some() {
            let mode_h = if env.graph.mode(proj) == lm.high_signed {
                lm.low_signed
            } else {
                lm.low_unsigned
            };
            let low = env.graph.new_proj(results, lm.low_unsigned, res_numbers[nr]);
            let high = env.graph.new_proj(results, mode_h, res_numbers[nr] + 1);
            env.set_pair(proj, low, high);
        }
        env.mark_handled(proj);
    }
}

// ---- the driver wave -------------------------------------------------

fn always_lower(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Asm
            | Opcode::Proj
            | Opcode::Start
            | Opcode::Call
            | Opcode::Return
            | Opcode::Cond
            | Opcode::Conv
            | Opcode::Sel
    )
}

fn lower_ops(env: &mut LowerEnv, n: NodeId) {
    if env.is_handled(n) {
        return;
    }
    let op = env.graph.op(n);
    if op == Opcode::Deleted {
        return;
    }

    // boolean consumers of doubleword compares get a boolean tree
    let node_mode = env.graph.mode(n);
    if (node_mode == Mode::B || op == Opcode::Mux || op == Opcode::Conv) && op != Opcode::Cmp {
        for i in 0..env.graph.arity(n) {
            let pred = env.graph.input(n, i);
            if env.graph.op(pred) != Opcode::Cmp {
                continue;
            }
            let arg_mode = env.graph.mode(env.graph.input(pred, 0));
            if !env.dw(arg_mode) {
                continue;
            }
            match lower_boolean_cmp(env, pred) {
                Some(res) => env.graph.set_input(n, i, res),
                None => {
                    env.defer(n);
                    return;
                }
            }
        }
    }

    let has_entry = env.entry(n).is_some();
    if !(has_entry || always_lower(op)) {
        return;
    }

    let opm = env.op_mode(n);
    let mode = if opm == env.shared.modes.high_signed {
        env.shared.modes.low_signed
    } else {
        env.shared.modes.low_unsigned
    };

    match op {
        Opcode::Add | Opcode::Sub | Opcode::Mul => lower_binop_call(env, n, mode),
        Opcode::And | Opcode::Or | Opcode::Eor => lower_logical(env, n, mode),
        Opcode::Not => lower_not(env, n, mode),
        Opcode::Minus => lower_unop_call(env, n, mode),
        Opcode::Div | Opcode::Mod => lower_div_mod(env, n, mode),
        Opcode::DivMod => lower_divmod(env, n, mode),
        Opcode::Load => lower_load(env, n, mode),
        Opcode::Store => lower_store(env, n, mode),
        Opcode::Const => lower_const(env, n, mode),
        Opcode::Shl => lower_shl(env, n, mode),
        Opcode::Shr => lower_shr(env, n, mode),
        Opcode::Shrs => lower_shrs(env, n, mode),
        Opcode::Rotl => lower_rotl(env, n, mode),
        Opcode::Conv => lower_conv(env, n, mode),
        Opcode::Cond => lower_cond(env, n, mode),
        Opcode::Phi => lower_phi(env, n, mode),
        Opcode::Mux => lower_mux(env, n, mode),
        Opcode::Start => lower_start(env, n, mode),
        Opcode::Call => lower_call(env, n, mode),
        Opcode::Return => lower_return(env, n, mode),
        Opcode::Sel => lower_sel(env, n, mode),
        Opcode::Asm => lower_asm(env, n, mode),
        Opcode::Unknown => lower_unknown(env, n, mode),
        _ => {}
    }
}

fn lower_graph(
    graph: &mut Graph,
    types: &mut TypeStore,
    modes: &ModeRegistry,
    factory: &mut dyn IntrinsicFactory,
    shared: &mut SharedState,
) {
    let n_idx = graph.n_nodes() + (graph.n_nodes() >> 2);
    graph.reserve_resources(Resources::PHI_LIST);

    let mut env = LowerEnv {
        graph: &mut *graph,
        types: &mut *types,
        modes,
        factory: &mut *factory,
        shared: &mut *shared,
        entries: vec![None; n_idx],
        waitq: VecDeque::new(),
        chains: FxHashMap::default(),
        proj_to_block: FxHashMap::default(),
        handled: Vec::new(),
        must_be_lowered: false,
        cf_changed: false,
        value_param_tp: None,
    };

    if let Some(entity) = env.graph.entity {
        let mtp = env.types.entity(entity).ty;
        if !env.types.is_lowered_method(mtp) && env.mtp_must_be_lowered(mtp) {
            let value_param_tp = env.types.method(mtp).value_params;
            let lowered = env.lower_mtp(mtp);
            env.types.entity_mut(entity).ty = lowered;
            env.value_param_tp = value_param_tp;
            env.must_be_lowered = true;
        }
    }

    // first wave: allocate pair entries, link Projs and Phis, rebuild Rotl
    let order = env.graph.collect_post_order();
    for n in order {
        prepare_node(&mut env, n);
    }

    if env.must_be_lowered {
        debug!("lowering doubleword operations");

        let order = env.graph.collect_post_order();
        for n in order {
            lower_ops(&mut env, n);
        }

        // drain the deque until fixpoint
        let mut fuel = env.graph.n_nodes().saturating_mul(8) + 64;
        while let Some(n) = env.waitq.pop_front() {
            assert!(fuel > 0, "lowering deque did not reach a fixpoint");
            fuel -= 1;
            lower_ops(&mut env, n);
        }
    }

    let cf_changed = env.cf_changed;
    graph.free_resources(Resources::PHI_LIST);
    graph.invalidate_outs();
    if cf_changed {
        graph.clear_property(GraphProperties::CONSISTENT_DOMINANCE);
        graph.clear_property(GraphProperties::CONSISTENT_LOOPS);
    }
}

/// Lower all doubleword operations in every graph of the program.
pub fn lower_dw_ops(
    program: &mut Program,
    params: &LowerDwParams,
    factory: &mut dyn IntrinsicFactory,
) {
    let lowered_modes = setup_modes(&mut program.modes, params);
    let Program {
        modes,
        types,
        graphs,
        ..
    } = program;
    let mut shared = SharedState::new(types, lowered_modes, *params);
    for graph in graphs.iter_mut() {
        lower_graph(graph, types, modes, factory, &mut shared);
    }
}
