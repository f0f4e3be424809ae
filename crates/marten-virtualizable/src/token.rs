//! The three-state vable token and the traits around it

use std::num::NonZeroU64;

use marten_boxing::RefValue;

/// Opaque handle naming a compiled frame that currently owns a
/// virtualizable's materialized state.
///
/// Handles are minted by the backend; this crate only compares and
/// forwards them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(NonZeroU64);

impl FrameHandle {
    /// Wrap a backend frame id. Zero is reserved for "no frame".
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The backend frame id.
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// The token attached to a live virtualizable instance or virtual-ref
/// cell. Exactly one state holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VableToken {
    /// Not tracked by any in-flight compiled frame
    #[default]
    None,
    /// Tracing is in progress and we are inside a call to unknown code
    TracingRescall,
    /// A compiled routine currently owns the materialized state
    Frame(FrameHandle),
}

impl VableToken {
    /// Is this the untracked state?
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

/// Instance-side access to the token slot.
///
/// Implementors store the token in a `Cell<VableToken>`; the protocol
/// functions in this crate perform all transitions through these two
/// accessors.
pub trait Virtualizable {
    /// Current token.
    fn vable_token(&self) -> VableToken;
    /// Overwrite the token.
    fn set_vable_token(&self, token: VableToken);
}

/// The backend's forced-deoptimization entry points (consumed, not
/// implemented, by this crate).
pub trait DeoptForce {
    /// Materialize the fields owned by `frame` back into `instance` and
    /// leave the instance's token at `VableToken::None`.
    fn force_frame(&self, frame: FrameHandle, instance: &dyn Virtualizable);

    /// Resolve a captured sub-object owned by `frame` to its real
    /// managed reference.
    fn force_ref(&self, frame: FrameHandle) -> RefValue;
}
