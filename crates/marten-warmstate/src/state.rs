//! The per-call-site decision engine
//!
//! `maybe_compile_and_run` is the single entry point the surrounding
//! interpreter calls at hot-loop checkpoints. Per site it moves through
//! Cold -> Counting -> Tracing -> Compiled -> Evicted, consulting the
//! counter/cell cache and handing compiled-code dispatch up to the
//! `dispatch` trampoline as a `Control` value.

use smallvec::SmallVec;
use tracing::{debug, trace};

use marten_boxing::{BoxValue, GreenKey, RawValue};

use crate::cell::{JitCell, flags};
use crate::counter::JitCounter;
use crate::hooks::{Backend, CodeMemory, FailDescriptor, Hooks, NullCodeMemory, Tracer};
use crate::procedure::{ProcedureArena, ProcedureToken};

/// What the interpreter should do next for this checkpoint.
///
/// Returned instead of transferring control directly so that a compiled
/// routine re-entering the warm-enter logic never grows the native
/// stack: the outer trampoline consumes `Invoke` in a loop.
#[derive(Debug)]
pub enum Control {
    /// Keep interpreting.
    Continue,
    /// Execute the compiled procedure with these unboxed red arguments.
    Invoke(ProcedureToken, SmallVec<[RawValue; 8]>),
}

/// Fraction a skipped promotion attempt leaves behind so the site
/// re-fires soon.
const SKIPPED_ATTEMPT_FRACTION: f32 = 0.98;

/// The warm-enter state of one execution context.
///
/// Owns the counter/cell cache and the compiled-procedure arena;
/// everything else (tracer, backend, code memory, policy hooks) is a
/// plugged-in collaborator.
pub struct WarmState {
    counter: JitCounter,
    procedures: ProcedureArena,
    tracer: Box<dyn Tracer>,
    backend: Box<dyn Backend>,
    code_memory: Box<dyn CodeMemory>,
    hooks: Hooks,
}

impl WarmState {
    /// A warm state with default counter sizing, no code-memory
    /// tracking, and no policy hooks.
    pub fn new(tracer: Box<dyn Tracer>, backend: Box<dyn Backend>) -> Self {
        Self {
            counter: JitCounter::default(),
            procedures: ProcedureArena::new(),
            tracer,
            backend,
            code_memory: Box::new(NullCodeMemory),
            hooks: Hooks::default(),
        }
    }

    /// Replace the policy hooks.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the counter table (sizing/decay tuning).
    pub fn with_counter(mut self, counter: JitCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Plug in an external compiled-code cache.
    pub fn with_code_memory(mut self, code_memory: Box<dyn CodeMemory>) -> Self {
        self.code_memory = code_memory;
        self
    }

    /// The compiled-procedure arena.
    pub fn procedures(&self) -> &ProcedureArena {
        &self.procedures
    }

    /// Mutable access to the arena (the backend evicts through this).
    pub fn procedures_mut(&mut self) -> &mut ProcedureArena {
        &mut self.procedures
    }

    /// The backend, for forcing virtualizables outside of dispatch.
    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    /// The cell cached for `greenkey`, if the site was ever promoted.
    pub fn jit_cell_at(&self, greenkey: &GreenKey) -> Option<&JitCell> {
        self.counter.find_cell(greenkey.hash_value(), greenkey)
    }

    /// The single entry point called at hot-loop checkpoints.
    pub fn maybe_compile_and_run(
        &mut self,
        threshold: u32,
        greenkey: &GreenKey,
        red_args: &[BoxValue],
    ) -> Control {
        if threshold == 0 {
            // Promotion disabled for this site.
            return Control::Continue;
        }
        let hash = greenkey.hash_value();
        let increment = 1.0 / threshold as f32;

        let snapshot = self
            .counter
            .find_cell(hash, greenkey)
            .map(|cell| (cell.flag_bits(), cell.procedure_token()));

        let Some((flag_bits, token)) = snapshot else {
            // Cold or Counting: no cell yet, just heat.
            if self.counter.tick(hash, increment) {
                self.bound_reached(hash, greenkey, red_args);
            }
            return Control::Continue;
        };

        if flag_bits & flags::TRACING != 0 {
            // This site is being traced right now; entering again would
            // trace reentrantly.
            return Control::Continue;
        }
        if flag_bits & flags::TEMPORARY != 0 {
            // Placeholder stub: count normally toward a real trace.
            if self.counter.tick(hash, increment) {
                self.bound_reached(hash, greenkey, red_args);
            }
            return Control::Continue;
        }

        if let Some(token) = token
            && let Some(live) = self.procedures.resolve(token)
        {
            if !self.hooks.check_confirm_enter(greenkey, red_args) {
                // Policy veto: a normal "not now", fall back to
                // interpretation.
                trace!("compiled entry vetoed by confirm_enter");
                return Control::Continue;
            }
            let args = red_args.iter().map(BoxValue::to_raw).collect();
            return Control::Invoke(live, args);
        }

        if flag_bits & flags::DONT_TRACE_HERE != 0 {
            // A previous compilation attempt aborted. One retry per
            // "occurred" cycle: the first threshold crossing after an
            // abort consumes the marker, the next one retries.
            if self.counter.tick(hash, increment) {
                if flag_bits & flags::TRACING_OCCURRED != 0 {
                    if let Some(cell) = self.counter.find_cell(hash, greenkey) {
                        cell.clear_flag(flags::TRACING_OCCURRED);
                    }
                } else {
                    self.bound_reached(hash, greenkey, red_args);
                }
            }
            return Control::Continue;
        }

        // Compiled procedure evicted: drop the stale chain entry and
        // fall through to counting.
        debug!("dropping stale cell for evicted procedure");
        self.counter.remove_cell(hash, greenkey);
        if self.counter.tick(hash, increment) {
            self.bound_reached(hash, greenkey, red_args);
        }
        Control::Continue
    }

    /// A counter crossed its threshold: cool the whole table, then trace
    /// this site once.
    ///
    /// Tracer failure is caught here; the site's TRACING flag is cleared
    /// on every path and nothing propagates to the interpreter caller.
    fn bound_reached(&mut self, hash: u64, greenkey: &GreenKey, red_args: &[BoxValue]) {
        self.counter.decay_all_counters();

        let force_finish = self
            .counter
            .find_cell(hash, greenkey)
            .is_some_and(|cell| cell.flag(flags::FORCE_FINISH));
        if !force_finish && self.hooks.is_stack_nearly_full() {
            // Degrade to "skip this promotion attempt": leave the site
            // hot so it retries once the stack has unwound.
            trace!("skipping promotion attempt, native stack nearly full");
            self.counter.change_current_fraction(hash, SKIPPED_ATTEMPT_FRACTION);
            return;
        }
        if self.hooks.check_can_never_inline(greenkey) {
            self.disable_noninlinable_function(greenkey);
            return;
        }

        self.ensure_cell(hash, greenkey);
        let cell = self
            .counter
            .find_cell(hash, greenkey)
            .expect("cell installed above");
        cell.set_flag(flags::TRACING | flags::TRACING_OCCURRED);
        debug!(location = %self.hooks.describe(greenkey), "starting to trace");

        // Cleared on drop, whether or not the tracer fails.
        let guard = TracingGuard { cell };
        match self
            .tracer
            .compile_and_run_once(&mut self.procedures, greenkey, red_args)
        {
            Ok(Some(token)) => {
                Self::attach_to_cell(guard.cell, &mut self.procedures, token);
                debug!("trace compiled and attached");
            }
            Ok(None) => {}
            Err(abort) => {
                debug!(%abort, "trace aborted, falling back to interpretation");
            }
        }
    }

    /// Install or replace the compiled procedure for `greenkey`.
    ///
    /// If an old procedure was attached, already-compiled call sites
    /// jumping to it are redirected to the new token (a link-time patch,
    /// not a runtime branch).
    pub fn attach_procedure_to_interp(&mut self, greenkey: &GreenKey, token: ProcedureToken) {
        let hash = greenkey.hash_value();
        self.ensure_cell(hash, greenkey);
        let cell = self
            .counter
            .find_cell(hash, greenkey)
            .expect("cell installed above");
        Self::attach_to_cell(cell, &mut self.procedures, token);
    }

    /// Permanent policy hint: never trace this call site. Distinct from
    /// eviction; other flags are left untouched.
    pub fn disable_noninlinable_function(&mut self, greenkey: &GreenKey) {
        let hash = greenkey.hash_value();
        self.ensure_cell(hash, greenkey);
        let cell = self
            .counter
            .find_cell(hash, greenkey)
            .expect("cell installed above");
        cell.set_flag(flags::DONT_TRACE_HERE);
        debug!(location = %self.hooks.describe(greenkey), "call site marked don't-trace-here");
    }

    /// Outer dispatch loop: runs compiled code for this checkpoint, if
    /// any, and follows `Reenter` exits without recursing.
    ///
    /// Returns `None` when the interpreter should just keep going, or
    /// the final fail descriptor of the compiled execution.
    pub fn dispatch(
        &mut self,
        threshold: u32,
        greenkey: &GreenKey,
        red_args: &[BoxValue],
    ) -> Option<FailDescriptor> {
        let mut control = self.maybe_compile_and_run(threshold, greenkey, red_args);
        loop {
            let (token, args) = match control {
                Control::Continue => return None,
                Control::Invoke(token, args) => (token, args),
            };
            self.code_memory.keep_loop_alive(token);
            let Some(procedure) = self.procedures.get(token) else {
                // Evicted between decision and dispatch; interpret.
                return None;
            };
            match self.backend.execute(procedure, &args) {
                FailDescriptor::Reenter {
                    threshold,
                    greenkey,
                    red_args,
                } => {
                    match self.maybe_compile_and_run(threshold, &greenkey, &red_args) {
                        Control::Invoke(next_token, next_args) => {
                            control = Control::Invoke(next_token, next_args);
                        }
                        Control::Continue => {
                            // Target site has no compiled code; hand the
                            // descriptor back so the interpreter resumes
                            // there.
                            return Some(FailDescriptor::Reenter {
                                threshold,
                                greenkey,
                                red_args,
                            });
                        }
                    }
                }
                done => return Some(done),
            }
        }
    }

    fn ensure_cell(&mut self, hash: u64, greenkey: &GreenKey) {
        if self.counter.find_cell(hash, greenkey).is_none() {
            self.counter
                .install_new_cell(hash, JitCell::new(greenkey.clone()), &self.procedures);
        }
    }

    fn attach_to_cell(cell: &JitCell, procedures: &mut ProcedureArena, token: ProcedureToken) {
        if let Some(old) = cell.procedure_token()
            && let Some(old_live) = procedures.resolve(old)
            && old_live != token
        {
            procedures.redirect(old_live, token);
        }
        cell.set_procedure_token(Some(token));
        cell.clear_flag(flags::TEMPORARY);
    }
}

struct TracingGuard<'a> {
    cell: &'a JitCell,
}

impl Drop for TracingGuard<'_> {
    fn drop(&mut self) {
        self.cell.clear_flag(flags::TRACING);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceAbort;
    use crate::procedure::CompiledProcedure;
    use marten_boxing::RawValue;
    use marten_virtualizable::{DeoptForce, FrameHandle, Virtualizable};
    use std::cell::Cell;
    use std::rc::Rc;

    fn key(n: i64) -> GreenKey {
        GreenKey::wrap([RawValue::Int(n)])
    }

    /// Tracer double: optionally installs a procedure, or aborts.
    struct ScriptedTracer {
        install: bool,
        fail: bool,
        calls: Rc<Cell<u32>>,
    }

    impl Tracer for ScriptedTracer {
        fn compile_and_run_once(
            &mut self,
            procedures: &mut ProcedureArena,
            _greenkey: &GreenKey,
            _red_args: &[BoxValue],
        ) -> Result<Option<ProcedureToken>, TraceAbort> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(TraceAbort::TraceTooLong);
            }
            if self.install {
                Ok(Some(procedures.insert(CompiledProcedure::new(()))))
            } else {
                Ok(None)
            }
        }
    }

    struct InertBackend;

    impl DeoptForce for InertBackend {
        fn force_frame(&self, _frame: FrameHandle, instance: &dyn Virtualizable) {
            instance.set_vable_token(marten_virtualizable::VableToken::None);
        }
        fn force_ref(&self, _frame: FrameHandle) -> marten_boxing::RefValue {
            marten_boxing::RefValue::Null
        }
    }

    impl Backend for InertBackend {
        fn execute(&mut self, _procedure: &CompiledProcedure, _args: &[RawValue]) -> FailDescriptor {
            FailDescriptor::Done(RawValue::Int(0))
        }
    }

    fn warm_state(install: bool, fail: bool) -> (WarmState, Rc<Cell<u32>>) {
        let calls = Rc::new(Cell::new(0));
        let tracer = ScriptedTracer {
            install,
            fail,
            calls: calls.clone(),
        };
        let state = WarmState::new(Box::new(tracer), Box::new(InertBackend))
            .with_counter(JitCounter::new(4, 1.0));
        (state, calls)
    }

    #[test]
    fn threshold_zero_disables_promotion() {
        let (mut state, calls) = warm_state(true, false);
        for _ in 0..100 {
            assert!(matches!(
                state.maybe_compile_and_run(0, &key(1), &[]),
                Control::Continue
            ));
        }
        assert_eq!(calls.get(), 0);
        assert!(state.jit_cell_at(&key(1)).is_none());
    }

    #[test]
    fn counter_crossing_promotes_exactly_once() {
        let (mut state, calls) = warm_state(false, false);
        for _ in 0..3 {
            state.maybe_compile_and_run(3, &key(1), &[]);
        }
        assert_eq!(calls.get(), 1);
        let cell = state.jit_cell_at(&key(1)).unwrap();
        assert!(cell.flag(flags::TRACING_OCCURRED));
        assert!(!cell.flag(flags::TRACING));
    }

    #[test]
    fn tracing_flag_cleared_even_when_tracer_aborts() {
        let (mut state, calls) = warm_state(false, true);
        state.maybe_compile_and_run(1, &key(1), &[]);
        assert_eq!(calls.get(), 1);
        let cell = state.jit_cell_at(&key(1)).unwrap();
        assert!(!cell.flag(flags::TRACING));
        assert!(cell.flag(flags::TRACING_OCCURRED));
    }

    #[test]
    fn tracing_cell_blocks_reentrant_tracing() {
        let (mut state, calls) = warm_state(true, false);
        let token = state.procedures_mut().insert(CompiledProcedure::new(()));
        state.attach_procedure_to_interp(&key(1), token);
        state.jit_cell_at(&key(1)).unwrap().set_flag(flags::TRACING);
        // Does not count, does not trace, does not dispatch.
        assert!(matches!(
            state.maybe_compile_and_run(1, &key(1), &[]),
            Control::Continue
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn temporary_cell_counts_toward_a_real_trace() {
        let (mut state, calls) = warm_state(true, false);
        let stub = state.procedures_mut().insert(CompiledProcedure::new(()));
        state.attach_procedure_to_interp(&key(1), stub);
        state.jit_cell_at(&key(1)).unwrap().set_flag(flags::TEMPORARY);

        state.maybe_compile_and_run(2, &key(1), &[]);
        assert_eq!(calls.get(), 0);
        state.maybe_compile_and_run(2, &key(1), &[]);
        assert_eq!(calls.get(), 1);
        // The real trace replaced the stub and cleared TEMPORARY.
        let cell = state.jit_cell_at(&key(1)).unwrap();
        assert!(!cell.flag(flags::TEMPORARY));
        assert_ne!(cell.procedure_token(), Some(stub));
    }

    #[test]
    fn evicted_procedure_drops_the_cell_and_counts_again() {
        let (mut state, _calls) = warm_state(true, false);
        state.maybe_compile_and_run(1, &key(1), &[]);
        let token = state.jit_cell_at(&key(1)).unwrap().procedure_token().unwrap();
        state.procedures_mut().evict(token);

        // Next visit discovers the stale token, removes the cell, and
        // resumes counting (threshold 2 -> no immediate re-trace).
        assert!(matches!(
            state.maybe_compile_and_run(2, &key(1), &[]),
            Control::Continue
        ));
        assert!(state.jit_cell_at(&key(1)).is_none());
    }

    #[test]
    fn dont_trace_here_retries_once_per_occurred_cycle() {
        let (mut state, calls) = warm_state(false, true);
        state.disable_noninlinable_function(&key(1));
        state.jit_cell_at(&key(1)).unwrap().set_flag(flags::TRACING_OCCURRED);

        // First crossing only consumes the occurred marker.
        state.maybe_compile_and_run(1, &key(1), &[]);
        assert_eq!(calls.get(), 0);
        assert!(!state.jit_cell_at(&key(1)).unwrap().flag(flags::TRACING_OCCURRED));

        // Second crossing grants the single retry.
        state.maybe_compile_and_run(1, &key(1), &[]);
        assert_eq!(calls.get(), 1);
        // The abort re-set TRACING_OCCURRED, closing the cycle again.
        assert!(state.jit_cell_at(&key(1)).unwrap().flag(flags::TRACING_OCCURRED));
        // DONT_TRACE_HERE itself never clears.
        assert!(state.jit_cell_at(&key(1)).unwrap().flag(flags::DONT_TRACE_HERE));
    }

    #[test]
    fn stack_exhaustion_skips_the_attempt_but_keeps_the_site_hot() {
        let calls = Rc::new(Cell::new(0));
        let tracer = ScriptedTracer {
            install: false,
            fail: false,
            calls: calls.clone(),
        };
        let hooks = Hooks {
            stack_nearly_full: Some(Box::new(|| true)),
            ..Hooks::default()
        };
        let mut state = WarmState::new(Box::new(tracer), Box::new(InertBackend))
            .with_counter(JitCounter::new(4, 1.0))
            .with_hooks(hooks);
        state.maybe_compile_and_run(1, &key(1), &[]);
        assert_eq!(calls.get(), 0);
        assert!(state.jit_cell_at(&key(1)).is_none());
    }

    #[test]
    fn can_never_inline_hook_disables_the_site() {
        let (tracer_calls, tracer) = {
            let calls = Rc::new(Cell::new(0));
            (
                calls.clone(),
                ScriptedTracer {
                    install: false,
                    fail: false,
                    calls,
                },
            )
        };
        let hooks = Hooks {
            can_never_inline: Some(Box::new(|_| true)),
            ..Hooks::default()
        };
        let mut state = WarmState::new(Box::new(tracer), Box::new(InertBackend))
            .with_counter(JitCounter::new(4, 1.0))
            .with_hooks(hooks);
        state.maybe_compile_and_run(1, &key(1), &[]);
        assert_eq!(tracer_calls.get(), 0);
        assert!(state.jit_cell_at(&key(1)).unwrap().flag(flags::DONT_TRACE_HERE));
    }

    #[test]
    fn attach_redirects_old_procedures_to_the_replacement() {
        let (mut state, _calls) = warm_state(false, false);
        let old = state.procedures_mut().insert(CompiledProcedure::new("old"));
        let new = state.procedures_mut().insert(CompiledProcedure::new("new"));
        state.attach_procedure_to_interp(&key(1), old);
        state.attach_procedure_to_interp(&key(1), new);
        // Call sites still holding the old token reach the new code.
        assert_eq!(state.procedures().resolve(old), Some(new));
    }
}
