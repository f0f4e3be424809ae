//! Per-type virtualizable descriptors
//!
//! A descriptor is built once per virtualizable type and fixes the
//! canonical field order: all static fields first, then every element of
//! every array field, in declaration order. `read_boxes`/`write_boxes`
//! serialize to and from that order; the token operations implement the
//! escape protocol from the tracer's point of view.

use smallvec::SmallVec;
use tracing::trace;

use marten_boxing::{BoxTag, BoxValue, RawValue};

use crate::error::{VableError, VableResult};
use crate::token::{DeoptForce, VableToken, Virtualizable};

/// Element kind of a virtualizable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Signed machine word
    Int,
    /// Opaque managed reference
    Ref,
    /// Floating point
    Float,
}

impl FieldKind {
    fn tag(self) -> BoxTag {
        match self {
            Self::Int => BoxTag::Int,
            Self::Ref => BoxTag::Ref,
            Self::Float => BoxTag::Float,
        }
    }
}

/// Accessor for one scalar field of a virtualizable type.
pub struct StaticField<T> {
    /// Field name, for diagnostics only
    pub name: &'static str,
    /// Element kind
    pub kind: FieldKind,
    /// Read the field from an instance
    pub get: fn(&T) -> RawValue,
    /// Write the field on an instance
    pub set: fn(&T, RawValue),
}

/// Accessor for one array field of a virtualizable type.
pub struct ArrayField<T> {
    /// Field name, for diagnostics only
    pub name: &'static str,
    /// Element kind
    pub kind: FieldKind,
    /// Current length of the array on an instance
    pub len: fn(&T) -> usize,
    /// Read one element
    pub get: fn(&T, usize) -> RawValue,
    /// Write one element
    pub set: fn(&T, usize, RawValue),
}

/// The per-type descriptor: ordered field accessors plus the token
/// protocol operating on instances of `T`.
pub struct VirtualizableDesc<T: Virtualizable> {
    statics: Vec<StaticField<T>>,
    arrays: Vec<ArrayField<T>>,
}

impl<T: Virtualizable> VirtualizableDesc<T> {
    /// Build the descriptor. The given order is canonical from here on.
    pub fn new(statics: Vec<StaticField<T>>, arrays: Vec<ArrayField<T>>) -> Self {
        Self { statics, arrays }
    }

    /// Number of static fields.
    pub fn num_static(&self) -> usize {
        self.statics.len()
    }

    /// Total box-list length for `instance`:
    /// `num_static + sum(array_lengths)`.
    pub fn num_boxes(&self, instance: &T) -> usize {
        self.statics.len() + self.arrays.iter().map(|a| (a.len)(instance)).sum::<usize>()
    }

    /// Serialize the instance's full live state into a flat box list,
    /// statics first, then array elements, in descriptor order.
    pub fn read_boxes(&self, instance: &T) -> SmallVec<[BoxValue; 8]> {
        let mut boxes = SmallVec::with_capacity(self.num_boxes(instance));
        for field in &self.statics {
            boxes.push(BoxValue::wrap((field.get)(instance)));
        }
        for array in &self.arrays {
            for i in 0..(array.len)(instance) {
                boxes.push(BoxValue::wrap((array.get)(instance, i)));
            }
        }
        boxes
    }

    /// Inverse of `read_boxes`: write the box list back into the
    /// instance in the same order.
    ///
    /// The box count must exactly match `num_boxes(instance)`; a mismatch
    /// is an invalid-trace consistency fault, as is a box whose tag does
    /// not fit its destination field.
    pub fn write_boxes(&self, instance: &T, boxes: &[BoxValue]) -> VableResult<()> {
        let expected = self.num_boxes(instance);
        if boxes.len() != expected {
            return Err(VableError::InvalidBoxCount {
                expected,
                got: boxes.len(),
            });
        }
        let mut it = boxes.iter();
        for field in &self.statics {
            let raw = it.next().expect("length checked above").unwrap(field.kind.tag())?;
            (field.set)(instance, raw);
        }
        for array in &self.arrays {
            for i in 0..(array.len)(instance) {
                let raw = it.next().expect("length checked above").unwrap(array.kind.tag())?;
                (array.set)(instance, i, raw);
            }
        }
        Ok(())
    }

    /// Force the token back to `None` if anything still tracks the
    /// instance.
    pub fn clear_vable_token(&self, instance: &T, backend: &dyn DeoptForce) {
        if !instance.vable_token().is_none() {
            self.force_now(instance, backend);
            assert!(
                instance.vable_token().is_none(),
                "vable token must stay None after clearing"
            );
        }
    }

    /// Mark "we are about to call into code the tracer cannot see into".
    ///
    /// The token must be `None` at this point; anything else is a
    /// protocol violation by the tracer.
    pub fn tracing_before_residual_call(&self, instance: &T) {
        assert!(
            instance.vable_token().is_none(),
            "residual call entered with a tracked virtualizable"
        );
        instance.set_vable_token(VableToken::TracingRescall);
    }

    /// Undo `tracing_before_residual_call` after the callee returned.
    ///
    /// Returns `true` if the callee changed the token (the virtualizable
    /// escaped during the call): the token is left as the callee left it
    /// and the tracer must stop accessing the instance unboxed. Returns
    /// `false` if nothing unusual happened; the token is back to `None`.
    pub fn tracing_after_residual_call(&self, instance: &T) -> bool {
        if instance.vable_token() == VableToken::TracingRescall {
            instance.set_vable_token(VableToken::None);
            false
        } else {
            true
        }
    }

    /// Materialize the instance's state immediately.
    ///
    /// Outside a compiled frame (`TracingRescall`) there is nothing real
    /// to force and the token simply resets. A frame-owned token routes
    /// through the backend's forced deoptimization, which must leave the
    /// token at `None`.
    pub fn force_now(&self, instance: &T, backend: &dyn DeoptForce) {
        match instance.vable_token() {
            VableToken::None => {}
            VableToken::TracingRescall => instance.set_vable_token(VableToken::None),
            VableToken::Frame(frame) => {
                trace!(frame = frame.raw(), "forcing virtualizable out of compiled frame");
                backend.force_frame(frame, instance as &dyn Virtualizable);
                assert!(
                    instance.vable_token().is_none(),
                    "backend must reset the vable token when forcing"
                );
            }
        }
    }
}
