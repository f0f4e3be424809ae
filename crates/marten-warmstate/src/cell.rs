//! JitCell: the per-promoted-site cache entry

use std::cell::Cell;

use marten_boxing::GreenKey;

use crate::procedure::{ProcedureArena, ProcedureToken};

/// Bit flags carried by a `JitCell`.
///
/// Stored as a plain `u8`; flag operations are direct bit ops.
pub mod flags {
    /// A trace is being recorded for this site right now.
    pub const TRACING: u8 = 1 << 0;
    /// A compilation attempt aborted; do not keep re-attempting.
    pub const DONT_TRACE_HERE: u8 = 1 << 1;
    /// Placeholder cell holding a temporary compiled stub.
    pub const TEMPORARY: u8 = 1 << 2;
    /// Tracing has happened for this site at least once this cycle.
    pub const TRACING_OCCURRED: u8 = 1 << 3;
    /// The next promotion attempt must run to completion even if the
    /// native stack is nearly exhausted.
    pub const FORCE_FINISH: u8 = 1 << 4;
}

/// Flags that keep a cell in its chain even when its compiled procedure
/// is gone.
const STICKY: u8 = flags::TRACING | flags::DONT_TRACE_HERE | flags::TEMPORARY;

/// Cache entry attached to a promoted greenkey.
///
/// Lives in a collision chain hanging off the counter table. All
/// mutation goes through `Cell`s under the single-mutator precondition.
pub struct JitCell {
    greenkey: GreenKey,
    flag_bits: Cell<u8>,
    procedure: Cell<Option<ProcedureToken>>,
    pub(crate) next: Option<Box<JitCell>>,
}

impl JitCell {
    /// A fresh cell for `greenkey` with no flags and no procedure.
    pub fn new(greenkey: GreenKey) -> Self {
        Self {
            greenkey,
            flag_bits: Cell::new(0),
            procedure: Cell::new(None),
            next: None,
        }
    }

    /// The greenkey this cell caches state for.
    pub fn greenkey(&self) -> &GreenKey {
        &self.greenkey
    }

    /// Raw flag byte.
    pub fn flag_bits(&self) -> u8 {
        self.flag_bits.get()
    }

    /// Is `flag` set?
    pub fn flag(&self, flag: u8) -> bool {
        self.flag_bits.get() & flag != 0
    }

    /// Set `flag`, leaving the others untouched.
    pub fn set_flag(&self, flag: u8) {
        self.flag_bits.set(self.flag_bits.get() | flag);
    }

    /// Clear `flag`, leaving the others untouched.
    pub fn clear_flag(&self, flag: u8) {
        self.flag_bits.set(self.flag_bits.get() & !flag);
    }

    /// The (possibly stale) compiled-procedure token.
    pub fn procedure_token(&self) -> Option<ProcedureToken> {
        self.procedure.get()
    }

    /// Install or drop the compiled-procedure token.
    pub fn set_procedure_token(&self, token: Option<ProcedureToken>) {
        self.procedure.set(token);
    }

    /// Should this cell be dropped from its chain?
    ///
    /// True once the compiled procedure is unreachable and no sticky
    /// flag keeps the cell around as a policy record.
    pub fn should_remove(&self, procedures: &ProcedureArena) -> bool {
        if self.flag_bits.get() & STICKY != 0 {
            return false;
        }
        match self.procedure.get() {
            Some(token) => !procedures.is_alive(token),
            None => true,
        }
    }
}
