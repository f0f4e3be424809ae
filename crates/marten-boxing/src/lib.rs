//! # Marten JIT Boxing
//!
//! Uniform tagged "box" representation for values crossing the
//! interpreter / compiled-code boundary, plus the greenkey (structural
//! hash + equality over constant boxes) used to identify call sites.
//!
//! ## Design Principles
//!
//! - **Immutable tags**: a box's tag is fixed at creation; constant boxes
//!   never change at all, variable boxes may only be rebound to a value
//!   of the same tag
//! - **Storage floats**: floating point is carried as raw IEEE 754 bits
//!   inside boxes, so greenkey float comparison is bit-equality and NaN
//!   keys behave as ordinary cache keys
//! - **No GC coupling**: managed references are opaque `Rc` handles with
//!   identity semantics; managed strings compare by content

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod boxes;
pub mod error;
pub mod greenkey;
pub mod value;

pub use boxes::{BoxTag, BoxValue, ConstBox, VarBox, specialize_value};
pub use error::{BoxingError, BoxingResult};
pub use greenkey::GreenKey;
pub use value::{ArgKind, FloatStorage, RawValue, RefValue};
