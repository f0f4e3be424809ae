//! Virtualizable protocol error types

use marten_boxing::BoxingError;
use thiserror::Error;

/// Consistency faults raised by the forcing protocols.
///
/// These indicate a miscompiled trace or a protocol violation by a
/// collaborator; they are not locally recoverable and propagate to the
/// embedding system as hard failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VableError {
    /// `write_boxes` was handed a box list whose length does not match
    /// the descriptor's field count — an invalid trace.
    #[error("invalid trace: virtualizable expects {expected} boxes, got {got}")]
    InvalidBoxCount {
        /// `num_static + sum(array_lengths)` for the instance
        expected: usize,
        /// Length of the box list supplied
        got: usize,
    },

    /// A box in a `write_boxes` list carried a tag incompatible with the
    /// field it was destined for — an invalid trace.
    #[error("invalid trace: {0}")]
    BadBox(#[from] BoxingError),

    /// A virtual ref was forced after it should already have been
    /// resolved (token `None`, `forced` never set).
    #[error("InvalidVirtualRef: forcing a virtual ref that was never resolved")]
    InvalidVirtualRef,
}

/// Result type for virtualizable operations
pub type VableResult<T> = std::result::Result<T, VableError>;
