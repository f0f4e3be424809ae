//! Virtual references: stand-ins for values captured inside a trace
//!
//! A virtual-ref cell mirrors the virtualizable token machine at the
//! grain of one captured sub-object. During tracing the cell hands out a
//! stand-in reference while remembering the real object; once the real
//! object escapes it is resolved ("forced") exactly once.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use marten_boxing::RefValue;

use crate::error::{VableError, VableResult};
use crate::token::{DeoptForce, VableToken};

/// A heap cell standing in for a captured value during tracing.
#[derive(Debug)]
pub struct VirtualRef {
    token: Cell<VableToken>,
    forced: RefCell<Option<RefValue>>,
}

/// Allocate a ref cell for `real_object`, wrapped as an opaque managed
/// reference so tracer-visible code can pass it around like any other.
///
/// The cell starts with token `None` and `forced` already set, so forcing
/// it before any token transition is a no-op returning `real_object`.
pub fn virtual_ref_during_tracing(real_object: RefValue) -> RefValue {
    RefValue::Object(Rc::new(VirtualRef {
        token: Cell::new(VableToken::None),
        forced: RefCell::new(Some(real_object)),
    }))
}

/// Allocate a ref cell owned from birth by a live compiled frame.
///
/// Used by the backend for captures created inside compiled code: the
/// real object is not known yet, so `forced` stays unset until a deopt
/// resolves it. If the frame exits normally and drops ownership without
/// resolving, a later force is an invalid use.
pub fn virtual_ref_in_frame(frame: crate::token::FrameHandle) -> RefValue {
    RefValue::Object(Rc::new(VirtualRef {
        token: Cell::new(VableToken::Frame(frame)),
        forced: RefCell::new(None),
    }))
}

/// Structural check distinguishing ref cells from ordinary references.
///
/// This is a type-id comparison, not a marker bit on the reference.
pub fn is_virtual_ref(candidate: &RefValue) -> bool {
    candidate.downcast::<VirtualRef>().is_some()
}

/// Borrow the ref cell behind a candidate reference, if it is one.
pub fn as_virtual_ref(candidate: &RefValue) -> Option<&VirtualRef> {
    candidate.downcast::<VirtualRef>()
}

impl VirtualRef {
    /// Current token state.
    pub fn token(&self) -> VableToken {
        self.token.get()
    }

    /// Hand ownership of the cell to a compiled frame.
    ///
    /// Called by the backend when a trace containing the captured object
    /// starts executing; forcing from now on goes through deopt.
    pub fn set_frame_token(&self, token: VableToken) {
        self.token.set(token);
    }

    /// The resolved object, if already known.
    pub fn forced(&self) -> Option<RefValue> {
        self.forced.borrow().clone()
    }

    /// Mark "about to call into code the tracer cannot see into".
    pub fn tracing_before_residual_call(&self) {
        assert!(
            self.token.get().is_none(),
            "residual call entered with a tracked virtual ref"
        );
        self.token.set(VableToken::TracingRescall);
    }

    /// Undo `tracing_before_residual_call`; returns `true` if the callee
    /// changed the token (the captured object escaped during the call).
    pub fn tracing_after_residual_call(&self) -> bool {
        if self.token.get() == VableToken::TracingRescall {
            self.token.set(VableToken::None);
            false
        } else {
            true
        }
    }

    /// Re-arm the cell with the real object when tracing resumes.
    ///
    /// A cell currently owned by a compiled frame is left alone; its
    /// contents must come from the backend's deopt instead.
    pub fn continue_tracing(&self, real_object: RefValue) {
        if let VableToken::Frame(_) = self.token.get() {
            return;
        }
        *self.forced.borrow_mut() = Some(real_object);
    }

    /// Resolve the cell to its real underlying object.
    ///
    /// With token `None` the object must already be resolved; forcing an
    /// unresolved cell in that state is an invalid use
    /// (`InvalidVirtualRef`). A `TracingRescall` token just resets. A
    /// frame token routes through the backend; the token ends at `None`
    /// on every successful return.
    pub fn force_virtual(&self, backend: &dyn DeoptForce) -> VableResult<RefValue> {
        match self.token.get() {
            VableToken::None | VableToken::TracingRescall => {
                self.token.set(VableToken::None);
                self.forced().ok_or(VableError::InvalidVirtualRef)
            }
            VableToken::Frame(frame) => {
                trace!(frame = frame.raw(), "forcing virtual ref out of compiled frame");
                let real = backend.force_ref(frame);
                *self.forced.borrow_mut() = Some(real.clone());
                self.token.set(VableToken::None);
                Ok(real)
            }
        }
    }
}
