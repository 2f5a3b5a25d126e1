//! Node records: opcodes, per-opcode attributes and Proj numbering.
//!
//! Every node is a uniform record identified by a dense [`NodeId`] into its
//! graph's pool. The opcode decides how the ordered input list is
//! interpreted; opcode-specific payload lives in [`Attr`].

use smallvec::SmallVec;
use std::fmt;

use crate::core::mode::{Mode, Relation};
use crate::core::tarval::Tarval;
use crate::types::{EntityId, TypeId};

/// Dense index of a node within its owning graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Sentinel for "no node" (empty link slot, missing idom).
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn idx(self) -> usize {
        self.0 as usize
    }

    pub fn is_none(self) -> bool {
        self == NodeId::NONE
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("n#-")
        } else {
            write!(f, "n#{}", self.0)
        }
    }
}

/// The closed opcode set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    Block,
    Phi,
    Start,
    End,
    Return,
    Call,
    Proj,
    Const,
    SymConv,
    Address,
    Sel,
    Load,
    Store,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    DivMod,
    Shl,
    Shr,
    Shrs,
    Rotl,
    And,
    Or,
    Eor,
    Not,
    Minus,
    Conv,
    Cmp,
    Cond,
    Mux,
    Jmp,
    Sync,
    NoMem,
    Keep,
    Dummy,
    Unknown,
    Bad,
    Asm,
    /// Tombstone left behind by `exchange`.
    Deleted,
}

impl Opcode {
    /// Two-operand arithmetic and logical operations (`ins[0]`, `ins[1]`).
    pub fn is_binop(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Shrs
                | Opcode::Rotl
                | Opcode::And
                | Opcode::Or
                | Opcode::Eor
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Block => "Block",
            Opcode::Phi => "Phi",
            Opcode::Start => "Start",
            Opcode::End => "End",
            Opcode::Return => "Return",
            Opcode::Call => "Call",
            Opcode::Proj => "Proj",
            Opcode::Const => "Const",
            Opcode::SymConv => "SymConv",
            Opcode::Address => "Address",
            Opcode::Sel => "Sel",
            Opcode::Load => "Load",
            Opcode::Store => "Store",
            Opcode::Add => "Add",
            Opcode::Sub => "Sub",
            Opcode::Mul => "Mul",
            Opcode::Div => "Div",
            Opcode::Mod => "Mod",
            Opcode::DivMod => "DivMod",
            Opcode::Shl => "Shl",
            Opcode::Shr => "Shr",
            Opcode::Shrs => "Shrs",
            Opcode::Rotl => "Rotl",
            Opcode::And => "And",
            Opcode::Or => "Or",
            Opcode::Eor => "Eor",
            Opcode::Not => "Not",
            Opcode::Minus => "Minus",
            Opcode::Conv => "Conv",
            Opcode::Cmp => "Cmp",
            Opcode::Cond => "Cond",
            Opcode::Mux => "Mux",
            Opcode::Jmp => "Jmp",
            Opcode::Sync => "Sync",
            Opcode::NoMem => "NoMem",
            Opcode::Keep => "Keep",
            Opcode::Dummy => "Dummy",
            Opcode::Unknown => "Unknown",
            Opcode::Bad => "Bad",
            Opcode::Asm => "Asm",
            Opcode::Deleted => "Deleted",
        }
    }
}

/// Opcode-specific payload.
#[derive(Clone, Debug)]
pub enum Attr {
    None,
    Block {
        /// Phi list, maintained only while the phi-list resource is held.
        phis: Vec<NodeId>,
    },
    Const {
        value: Tarval,
    },
    Proj {
        num: u32,
    },
    Cmp {
        relation: Relation,
    },
    Load {
        mode: Mode,
        volatile: bool,
    },
    Store {
        volatile: bool,
    },
    Call {
        ty: TypeId,
    },
    /// Reference to an entity, materialized as its address.
    Entity {
        entity: EntityId,
    },
}

/// Opaque debug token handed in by the frontend (a source position id).
pub type DbgInfo = Option<u32>;

/// One node record.
#[derive(Clone, Debug)]
pub struct NodeData {
    pub(crate) op: Opcode,
    pub(crate) mode: Mode,
    /// Owning block; `NodeId::NONE` for Block nodes themselves.
    pub(crate) block: NodeId,
    pub(crate) ins: SmallVec<[NodeId; 4]>,
    pub(crate) attr: Attr,
    pub(crate) visited: u64,
    pub(crate) pinned: bool,
    pub(crate) dbg_info: DbgInfo,
}

/// Proj numbers of the multi-result producers. The numbering is part of the
/// backend contract and stays stable across rewrites; passes that renumber
/// (Call/Start lowering) record the mapping explicitly.
pub mod pn {
    pub const LOAD_M: u32 = 0;
    pub const LOAD_RES: u32 = 1;
    pub const LOAD_X_EXCEPT: u32 = 2;

    pub const STORE_M: u32 = 0;
    pub const STORE_X_EXCEPT: u32 = 1;

    pub const DIV_M: u32 = 0;
    pub const DIV_RES: u32 = 1;
    pub const DIV_X_EXCEPT: u32 = 2;

    pub const MOD_M: u32 = 0;
    pub const MOD_RES: u32 = 1;
    pub const MOD_X_EXCEPT: u32 = 2;

    pub const DIVMOD_M: u32 = 0;
    pub const DIVMOD_RES_DIV: u32 = 1;
    pub const DIVMOD_RES_MOD: u32 = 2;
    pub const DIVMOD_X_EXCEPT: u32 = 3;

    pub const CALL_M: u32 = 0;
    pub const CALL_T_RESULT: u32 = 1;
    pub const CALL_X_EXCEPT: u32 = 2;

    pub const START_M: u32 = 0;
    pub const START_T_ARGS: u32 = 1;

    pub const COND_FALSE: u32 = 0;
    pub const COND_TRUE: u32 = 1;
}
