//! Graph transformations.
//!
//! - [`lcssa`] - loop-closed SSA construction
//! - [`unroll`] - loop unrolling on LCSSA graphs

pub mod lcssa;
pub mod unroll;

pub use lcssa::assure_lcssa;
pub use unroll::{unroll_loops, UnrollParams};
