//! Core value algebra shared by the graph substrate and the passes.
//!
//! - [`mode`] - arithmetic kinds and the program-wide mode registry
//! - [`tarval`] - mode-tagged constant values with arithmetic
//! - [`error`] - error types surfaced across pass boundaries

pub mod error;
pub mod mode;
pub mod tarval;

pub use error::{PassError, PassResult};
pub use mode::{Mode, ModeRegistry, Relation};
pub use tarval::Tarval;
