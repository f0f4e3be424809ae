//! Tagged boxes: the uniform value representation seen by the tracer
//!
//! `wrap` classifies a raw value into the matching box tag; `unwrap` is
//! the checked inverse; `specialize_value` narrows a generic storage
//! value back to the concrete width a call signature asks for. All three
//! are pure over their inputs.

use std::cell::RefCell;

use crate::error::{BoxingError, BoxingResult};
use crate::value::{ArgKind, FloatStorage, RawValue, RefValue};

/// The immutable tag of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxTag {
    /// Signed machine word (also carries bit-packed single floats)
    Int,
    /// Opaque managed reference
    Ref,
    /// Floating point, in storage form
    Float,
}

/// A tagged box payload.
///
/// Floats are always held as `FloatStorage` bits, never as a native
/// `f64`, which makes `BoxValue` fully `Eq`/`Hash` and gives greenkeys
/// bit-level float equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoxValue {
    /// Integer payload
    Int(i64),
    /// Reference payload
    Ref(RefValue),
    /// Float payload, normalized to storage bits
    Float(FloatStorage),
}

impl BoxValue {
    /// Classify a raw value and produce the matching box.
    ///
    /// Floating values are normalized to the storage representation.
    pub fn wrap(raw: RawValue) -> Self {
        match raw {
            RawValue::Int(i) => Self::Int(i),
            RawValue::Ref(r) => Self::Ref(r),
            RawValue::Float(f) => Self::Float(FloatStorage::from_float(f)),
        }
    }

    /// Bit-pack a single-precision float into an integer box.
    ///
    /// The inverse is `specialize_value(ArgKind::F32, ..)`.
    pub fn wrap_single_float(value: f32) -> Self {
        Self::Int(i64::from(value.to_bits()))
    }

    /// The box's tag.
    pub fn tag(&self) -> BoxTag {
        match self {
            Self::Int(_) => BoxTag::Int,
            Self::Ref(_) => BoxTag::Ref,
            Self::Float(_) => BoxTag::Float,
        }
    }

    /// Project the payload back to a raw value by the box's own tag.
    /// Unlike `unwrap` this cannot fail.
    pub fn to_raw(&self) -> RawValue {
        match self {
            Self::Int(i) => RawValue::Int(*i),
            Self::Ref(r) => RawValue::Ref(r.clone()),
            Self::Float(storage) => RawValue::Float(storage.to_float()),
        }
    }

    /// Checked inverse of `wrap`: project the payload as `expected`.
    ///
    /// Fails with `TypeMismatch` when the box carries a different tag,
    /// e.g. requesting a pointer unwrap from a float box.
    pub fn unwrap(&self, expected: BoxTag) -> BoxingResult<RawValue> {
        match (expected, self) {
            (BoxTag::Int, Self::Int(i)) => Ok(RawValue::Int(*i)),
            (BoxTag::Ref, Self::Ref(r)) => Ok(RawValue::Ref(r.clone())),
            (BoxTag::Float, Self::Float(storage)) => Ok(RawValue::Float(storage.to_float())),
            _ => Err(BoxingError::TypeMismatch {
                expected,
                found: self.tag(),
            }),
        }
    }
}

/// Narrow a generic storage value to the concrete kind a call signature
/// requests, used when crossing from the uniform box representation back
/// to a specific signature.
///
/// Integer narrowing truncates to the requested width and re-extends by
/// that width's signedness, matching what the machine calling convention
/// does with sub-word arguments.
pub fn specialize_value(kind: ArgKind, storage: RawValue) -> BoxingResult<RawValue> {
    let found = raw_tag(&storage);
    match (kind, storage) {
        (ArgKind::I8, RawValue::Int(word)) => Ok(RawValue::Int(i64::from(word as i8))),
        (ArgKind::I16, RawValue::Int(word)) => Ok(RawValue::Int(i64::from(word as i16))),
        (ArgKind::I32, RawValue::Int(word)) => Ok(RawValue::Int(i64::from(word as i32))),
        (ArgKind::I64, RawValue::Int(word)) => Ok(RawValue::Int(word)),
        (ArgKind::U8, RawValue::Int(word)) => Ok(RawValue::Int(i64::from(word as u8))),
        (ArgKind::U16, RawValue::Int(word)) => Ok(RawValue::Int(i64::from(word as u16))),
        (ArgKind::U32, RawValue::Int(word)) => Ok(RawValue::Int(i64::from(word as u32))),
        // Single floats travel bit-packed in integer storage.
        (ArgKind::F32, RawValue::Int(word)) => {
            Ok(RawValue::Float(f64::from(f32::from_bits(word as u32))))
        }
        (ArgKind::F64, RawValue::Float(f)) => Ok(RawValue::Float(f)),
        (ArgKind::Ref, RawValue::Ref(r)) => Ok(RawValue::Ref(r)),
        (requested, _) => Err(BoxingError::SpecializeMismatch { requested, found }),
    }
}

/// Tag a raw value would carry once boxed.
fn raw_tag(raw: &RawValue) -> BoxTag {
    match raw {
        RawValue::Int(_) => BoxTag::Int,
        RawValue::Ref(_) => BoxTag::Ref,
        RawValue::Float(_) => BoxTag::Float,
    }
}

/// An immutable box, the element type of greenkeys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstBox(BoxValue);

impl ConstBox {
    /// Box an already-classified payload.
    pub fn new(value: BoxValue) -> Self {
        Self(value)
    }

    /// Classify and box a raw value in one step.
    pub fn wrap(raw: RawValue) -> Self {
        Self(BoxValue::wrap(raw))
    }

    /// The payload.
    pub fn value(&self) -> &BoxValue {
        &self.0
    }

    /// The box's tag.
    pub fn tag(&self) -> BoxTag {
        self.0.tag()
    }
}

/// A mutable box for red arguments: may be rebound to a new raw value,
/// but only one of the same tag as it was created with.
#[derive(Debug)]
pub struct VarBox {
    value: RefCell<BoxValue>,
}

impl VarBox {
    /// Classify and box a raw value; the resulting tag is fixed for the
    /// box's lifetime.
    pub fn wrap(raw: RawValue) -> Self {
        Self {
            value: RefCell::new(BoxValue::wrap(raw)),
        }
    }

    /// The box's (immutable) tag.
    pub fn tag(&self) -> BoxTag {
        self.value.borrow().tag()
    }

    /// A snapshot of the current payload.
    pub fn get(&self) -> BoxValue {
        self.value.borrow().clone()
    }

    /// Rebind the box to a new raw value of the same tag.
    pub fn rebind(&self, raw: RawValue) -> BoxingResult<()> {
        let new = BoxValue::wrap(raw);
        let tag = self.tag();
        if new.tag() != tag {
            return Err(BoxingError::TypeMismatch {
                expected: tag,
                found: new.tag(),
            });
        }
        *self.value.borrow_mut() = new;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_inverts_wrap_for_all_kinds() {
        let cases = [
            RawValue::Int(-7),
            RawValue::Int(i64::MAX),
            RawValue::Float(3.5),
            RawValue::Float(-0.0),
            RawValue::Ref(RefValue::Null),
            RawValue::Ref(RefValue::str("green")),
        ];
        for raw in cases {
            let boxed = BoxValue::wrap(raw.clone());
            assert_eq!(boxed.unwrap(boxed.tag()).unwrap(), raw);
        }
    }

    #[test]
    fn unwrap_with_wrong_tag_is_a_type_mismatch() {
        let boxed = BoxValue::wrap(RawValue::Float(1.25));
        let err = boxed.unwrap(BoxTag::Ref).unwrap_err();
        assert_eq!(
            err,
            BoxingError::TypeMismatch {
                expected: BoxTag::Ref,
                found: BoxTag::Float,
            }
        );
    }

    #[test]
    fn single_float_round_trips_through_int_storage() {
        let boxed = BoxValue::wrap_single_float(2.5_f32);
        assert_eq!(boxed.tag(), BoxTag::Int);
        let raw = boxed.unwrap(BoxTag::Int).unwrap();
        let narrowed = specialize_value(ArgKind::F32, raw).unwrap();
        assert_eq!(narrowed, RawValue::Float(2.5));
    }

    #[test]
    fn specialize_truncates_by_requested_width() {
        assert_eq!(
            specialize_value(ArgKind::I8, RawValue::Int(0x1FF)).unwrap(),
            RawValue::Int(-1)
        );
        assert_eq!(
            specialize_value(ArgKind::U8, RawValue::Int(0x1FF)).unwrap(),
            RawValue::Int(0xFF)
        );
        assert_eq!(
            specialize_value(ArgKind::I64, RawValue::Int(i64::MIN)).unwrap(),
            RawValue::Int(i64::MIN)
        );
    }

    #[test]
    fn specialize_rejects_incompatible_storage() {
        let err = specialize_value(ArgKind::Ref, RawValue::Int(3)).unwrap_err();
        assert_eq!(
            err,
            BoxingError::SpecializeMismatch {
                requested: ArgKind::Ref,
                found: BoxTag::Int,
            }
        );
        assert!(specialize_value(ArgKind::F64, RawValue::Int(3)).is_err());
    }

    #[test]
    fn varbox_rebinds_only_within_its_tag() {
        let red = VarBox::wrap(RawValue::Int(1));
        red.rebind(RawValue::Int(2)).unwrap();
        assert_eq!(red.get(), BoxValue::Int(2));
        let err = red.rebind(RawValue::Float(2.0)).unwrap_err();
        assert_eq!(
            err,
            BoxingError::TypeMismatch {
                expected: BoxTag::Int,
                found: BoxTag::Float,
            }
        );
        // The failed rebind left the payload untouched.
        assert_eq!(red.get(), BoxValue::Int(2));
    }
}
