//! The IR graph substrate.
//!
//! - [`node`] - node records, opcodes, attributes, Proj numbering
//! - [`graph`] - the node pool, construction and mutation API
//! - [`walk`] - pre/post/blockwise walks over reachable nodes
//! - [`outs`] - cached def-use edges
//! - [`dom`] - dominance information
//! - [`loops`] - the loop forest
//! - [`verify`] - node-level consistency checks

pub mod dom;
pub mod graph;
pub mod loops;
pub mod node;
pub mod outs;
pub mod verify;
pub mod walk;

pub use graph::{Graph, GraphProperties, Resources, POS_BLOCK};
pub use loops::{LoopElement, LoopId, LoopTree};
pub use node::{pn, Attr, NodeId, Opcode};
pub use outs::OutEdge;
pub use verify::irg_verify;
