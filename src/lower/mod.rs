//! Lowering passes.
//!
//! [`dw`] rewrites every doubleword operation into half-width code, calling
//! target-provided runtime intrinsics where no inline expansion exists.

pub mod dw;

pub use dw::{lower_dw_ops, DefaultIntrinsicFactory, IntrinsicFactory, LowerDwParams};
