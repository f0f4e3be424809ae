//! Boundary contracts consumed by the warm-enter engine
//!
//! The tracer, backend, and code-memory manager are external
//! collaborators; this module defines the traits they plug in through,
//! plus the optional per-embedder policy hooks. Absence of a policy hook
//! means "always allow" / "never suppress" / "no description available".

use smallvec::SmallVec;

use marten_boxing::{BoxValue, GreenKey, RawValue};
use marten_virtualizable::DeoptForce;

use crate::error::TraceAbort;
use crate::procedure::{CompiledProcedure, ProcedureArena, ProcedureToken};

/// How a compiled routine's execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FailDescriptor {
    /// Normal completion with a typed result.
    Done(RawValue),
    /// A guard failed; the descriptor index tells the embedder where to
    /// resume interpreting.
    GuardFailure(u32),
    /// The routine exited by jumping to another hot call site. The
    /// dispatch trampoline re-enters the warm-enter logic with these
    /// arguments instead of letting compiled code recurse into it.
    Reenter {
        /// Promotion threshold of the target site
        threshold: u32,
        /// Greenkey of the target site
        greenkey: GreenKey,
        /// Boxed red arguments for the target site
        red_args: SmallVec<[BoxValue; 8]>,
    },
}

/// The external trace recorder and compiler.
pub trait Tracer {
    /// Record and compile one trace for `greenkey`.
    ///
    /// On success the tracer stores the compiled procedure in the arena
    /// and returns its token (or `None` if the trace completed without
    /// producing reusable code). An `Err` is a failed promotion attempt;
    /// the caller falls back to interpretation.
    fn compile_and_run_once(
        &mut self,
        procedures: &mut ProcedureArena,
        greenkey: &GreenKey,
        red_args: &[BoxValue],
    ) -> Result<Option<ProcedureToken>, TraceAbort>;
}

/// The native-code backend: executes compiled procedures and performs
/// forced deoptimization of virtualizables it owns.
pub trait Backend: DeoptForce {
    /// Run the compiled procedure with unboxed red arguments and
    /// classify how execution ended.
    fn execute(&mut self, procedure: &CompiledProcedure, args: &[RawValue]) -> FailDescriptor;
}

/// External LRU/age-based cache for compiled code.
pub trait CodeMemory {
    /// Note that `token` was just used, so the cache keeps it warm.
    fn keep_loop_alive(&mut self, token: ProcedureToken);
}

/// The default code memory: nothing tracks usage, nothing is evicted by
/// age.
pub struct NullCodeMemory;

impl CodeMemory for NullCodeMemory {
    fn keep_loop_alive(&mut self, _token: ProcedureToken) {}
}

/// Optional policy callbacks supplied by the embedding interpreter.
///
/// All hooks are resolved at setup time; there is no ordering guarantee
/// between hook evaluation and cell creation.
#[derive(Default)]
pub struct Hooks {
    /// May veto entry into compiled code (e.g. on stack-depth policy).
    pub confirm_enter: Option<Box<dyn Fn(&GreenKey, &[BoxValue]) -> bool>>,
    /// Marks call sites whose functions must never be traced.
    pub can_never_inline: Option<Box<dyn Fn(&GreenKey) -> bool>>,
    /// Printable description of a call site, for logging only.
    pub get_location: Option<Box<dyn Fn(&GreenKey) -> String>>,
    /// Reports that the native call stack is nearly exhausted.
    pub stack_nearly_full: Option<Box<dyn Fn() -> bool>>,
}

impl Hooks {
    pub(crate) fn check_confirm_enter(&self, greenkey: &GreenKey, red_args: &[BoxValue]) -> bool {
        self.confirm_enter
            .as_ref()
            .is_none_or(|hook| hook(greenkey, red_args))
    }

    pub(crate) fn check_can_never_inline(&self, greenkey: &GreenKey) -> bool {
        self.can_never_inline
            .as_ref()
            .is_some_and(|hook| hook(greenkey))
    }

    pub(crate) fn describe(&self, greenkey: &GreenKey) -> String {
        match &self.get_location {
            Some(hook) => hook(greenkey),
            None => "<unknown location>".to_owned(),
        }
    }

    pub(crate) fn is_stack_nearly_full(&self) -> bool {
        self.stack_nearly_full.as_ref().is_some_and(|hook| hook())
    }
}
