//! # Marten Virtualizables
//!
//! The forcing protocols that let frame-like structures ("virtualizables")
//! and individually captured sub-objects ("virtual references") be kept
//! unboxed while a compiled trace runs, and be safely materialized when
//! control escapes the traced region.
//!
//! ## Design
//!
//! - **Three-state token**: every tracked instance carries exactly one of
//!   `None` / `TracingRescall` / `Frame(handle)`; all protocol operations
//!   are transitions on that token
//! - **Per-type descriptors**: field serialization order is fixed when the
//!   descriptor is built and is the canonical order for box lists
//! - **Single mutator**: tokens are `Cell`s; concurrent access from two
//!   logical threads of control is a precondition violation, not handled

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod descriptor;
pub mod error;
pub mod token;
pub mod vref;

pub use descriptor::{ArrayField, FieldKind, StaticField, VirtualizableDesc};
pub use error::{VableError, VableResult};
pub use token::{DeoptForce, FrameHandle, VableToken, Virtualizable};
pub use vref::{
    VirtualRef, as_virtual_ref, is_virtual_ref, virtual_ref_during_tracing, virtual_ref_in_frame,
};
