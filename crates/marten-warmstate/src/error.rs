//! Warm-state error types

use thiserror::Error;

/// Why the tracer gave up on a promotion attempt.
///
/// Aborts are caught at the `bound_reached` boundary: the call site's
/// TRACING flag is cleared and execution falls back to interpretation.
/// Nothing propagates to the embedding caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceAbort {
    /// The recorded trace exceeded the tracer's length budget.
    #[error("trace too long")]
    TraceTooLong,

    /// The trace hit a call the tracer refuses to inline or record
    /// through.
    #[error("encountered a non-traceable call")]
    NotTraceable,

    /// A virtualizable escaped mid-trace and the tracer bailed out.
    #[error("virtualizable escaped during tracing")]
    VirtualizableEscaped,

    /// Any other tracer-internal failure.
    #[error("tracer failure: {0}")]
    Other(String),
}
