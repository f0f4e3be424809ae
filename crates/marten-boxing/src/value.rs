//! Raw machine values and opaque managed references
//!
//! `RawValue` is the un-boxed side of the boundary: what the interpreter
//! holds in its own frames and what compiled routines receive as
//! arguments. `RefValue` is the opaque-reference payload: either a real
//! managed object (identity semantics) or a managed string (content
//! semantics), both usable as greenkey elements.

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Bit-level storage for a floating point value.
///
/// Boxes always carry floats in this form so that two boxes holding the
/// same bit pattern compare equal even when the pattern is a NaN, and so
/// that 32-bit-pointer hosts (where the storage is wider than a native
/// float register) round-trip without precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatStorage(u64);

impl FloatStorage {
    /// Store a double, preserving its exact bit pattern.
    pub fn from_float(value: f64) -> Self {
        Self(value.to_bits())
    }

    /// Recover the double from storage.
    pub fn to_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Raw storage bits.
    pub fn bits(self) -> u64 {
        self.0
    }
}

impl From<f64> for FloatStorage {
    fn from(value: f64) -> Self {
        Self::from_float(value)
    }
}

/// An opaque managed reference crossing the boundary.
#[derive(Clone)]
pub enum RefValue {
    /// The null reference
    Null,
    /// A managed object, compared and hashed by identity
    Object(Rc<dyn Any>),
    /// A managed string, compared and hashed by content
    Str(Rc<str>),
}

impl RefValue {
    /// Wrap a managed object behind an identity-compared handle.
    pub fn object<T: Any>(value: T) -> Self {
        Self::Object(Rc::new(value))
    }

    /// Wrap a managed string.
    pub fn str(value: impl Into<Rc<str>>) -> Self {
        Self::Str(value.into())
    }

    /// Is this the null reference?
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The string contents, if this is a managed string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the underlying object and downcast it.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Address used for identity comparison and hashing of objects.
    fn identity(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Object(obj) => Rc::as_ptr(obj) as *const () as usize,
            Self::Str(_) => unreachable!("strings compare by content"),
        }
    }
}

impl PartialEq for RefValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Object(_), Self::Object(_)) => self.identity() == other.identity(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for RefValue {}

impl Hash for RefValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Object(_) => {
                state.write_u8(1);
                state.write_usize(self.identity());
            }
            Self::Str(s) => {
                state.write_u8(2);
                s.hash(state);
            }
        }
    }
}

impl std::fmt::Debug for RefValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Object(_) => write!(f, "Object({:#x})", self.identity()),
            Self::Str(s) => write!(f, "Str({s:?})"),
        }
    }
}

/// A raw machine value: what lives outside the box representation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// A signed machine word
    Int(i64),
    /// An opaque managed reference
    Ref(RefValue),
    /// A native double
    Float(f64),
}

impl RawValue {
    /// The integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float payload, if any.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The reference payload, if any.
    pub fn as_ref_value(&self) -> Option<&RefValue> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<RefValue> for RawValue {
    fn from(value: RefValue) -> Self {
        Self::Ref(value)
    }
}

/// Concrete kinds a call signature may request when narrowing a generic
/// storage value back to a specific argument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Full signed machine word
    I64,
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Single-precision float, bit-packed in integer storage
    F32,
    /// Native double
    F64,
    /// Opaque managed reference
    Ref,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_storage_preserves_nan_bits() {
        let weird_nan = f64::from_bits(0x7FF8_0000_DEAD_BEEF);
        let storage = FloatStorage::from_float(weird_nan);
        assert_eq!(storage.to_float().to_bits(), weird_nan.to_bits());
    }

    #[test]
    fn object_refs_compare_by_identity() {
        let a = RefValue::object(41_u32);
        let b = RefValue::object(41_u32);
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(a.downcast::<u32>(), Some(&41));
    }

    #[test]
    fn string_refs_compare_by_content() {
        let a = RefValue::str("loop_header");
        let b = RefValue::str(String::from("loop_header"));
        assert_eq!(a, b);
        assert_ne!(a, RefValue::str("other"));
        assert_ne!(a, RefValue::Null);
    }
}
