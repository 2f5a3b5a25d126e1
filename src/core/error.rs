//! Error types crossing pass boundaries.
//!
//! Only recoverable conditions are modeled here. Internal invariant breaks
//! (unexpected Proj numbers, unresolved nodes after the lowering deque is
//! drained, unsupported constructs like doubleword ASM operands) are
//! programming errors and panic instead.

use thiserror::Error;

/// Errors reported by the pass pipeline.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("type/entity verification failed, see the warning log")]
    VerificationFailed,

    #[error("graph {graph} failed verification, see the warning log")]
    GraphVerificationFailed { graph: usize },
}

/// Result type alias for pipeline operations.
pub type PassResult<T> = Result<T, PassError>;
