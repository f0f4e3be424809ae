//! # Marten Warm State
//!
//! The per-call-site admission and promotion engine of the Marten
//! tracing JIT. For every greenkey it decides whether to keep
//! interpreting, start recording a trace, dispatch to an already
//! compiled procedure, or abandon compilation attempts.
//!
//! ## Design
//!
//! - **Decaying heat counters**: a shared hash-indexed table of `f32`
//!   heat values, cooled globally each time a site is promoted
//! - **Cells**: promoted sites get a `JitCell` carrying a bitflag state
//!   and a generation-checked token for their compiled procedure
//! - **Control as data**: compiled-code dispatch is returned up a small
//!   trampoline as a `Control` value, never performed by recursion, so
//!   re-entrant compiled code cannot grow the native stack
//! - **Single mutator**: all state is thread-confined; multi-threaded
//!   embedders must serialize access externally

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cell;
pub mod counter;
pub mod error;
pub mod hooks;
pub mod procedure;
pub mod state;

pub use cell::{JitCell, flags};
pub use counter::JitCounter;
pub use error::TraceAbort;
pub use hooks::{Backend, CodeMemory, FailDescriptor, Hooks, Tracer};
pub use procedure::{CompiledProcedure, ProcedureArena, ProcedureToken};
pub use state::{Control, WarmState};
