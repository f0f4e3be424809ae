//! Boxing-layer error types

use crate::boxes::BoxTag;
use crate::value::ArgKind;
use thiserror::Error;

/// Errors raised by the boxing layer.
///
/// Both variants are programming errors in a collaborator (a miscompiled
/// trace or a wrong call signature) and are surfaced immediately rather
/// than recovered from.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BoxingError {
    /// A box was projected with an incompatible tag (e.g. asking a float
    /// box for a pointer).
    #[error("TypeMismatch: expected a {expected:?} box, found a {found:?} box")]
    TypeMismatch {
        /// Tag the caller asked for
        expected: BoxTag,
        /// Tag actually carried by the box
        found: BoxTag,
    },

    /// A generic storage value could not be narrowed to the requested
    /// concrete kind.
    #[error("TypeMismatch: cannot specialize {found:?} storage as {requested:?}")]
    SpecializeMismatch {
        /// Concrete kind requested by the call signature
        requested: ArgKind,
        /// Tag of the storage value supplied
        found: BoxTag,
    },
}

/// Result type for boxing operations
pub type BoxingResult<T> = std::result::Result<T, BoxingError>;
