//! Generation-checked arena of compiled procedures
//!
//! Compiled-code tokens behave like weak references: the backend may
//! reclaim a procedure at any time without notifying the cells that
//! point at it, and staleness is observed lazily on the next lookup.
//! Instead of host weak pointers this is an arena of slots with
//! generation-checked indices: evicting a procedure bumps its slot's
//! generation, invalidating every outstanding token for it in O(1).

use std::any::Any;

use tracing::debug;

/// A generation-checked handle to a compiled procedure.
///
/// A token is only as alive as the slot generation it was minted with;
/// once the procedure is evicted the token silently dangles and every
/// lookup through it reports the procedure as gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcedureToken {
    index: u32,
    generation: u32,
}

/// A compiled procedure as this subsystem sees it: an opaque executable
/// payload plus an optional printable location for diagnostics.
pub struct CompiledProcedure {
    /// Printable description of the call site this was compiled for
    pub location: Option<String>,
    /// Backend-defined executable payload
    pub payload: Box<dyn Any>,
}

impl CompiledProcedure {
    /// Wrap a backend payload with no printable location.
    pub fn new(payload: impl Any) -> Self {
        Self {
            location: None,
            payload: Box::new(payload),
        }
    }

    /// Wrap a backend payload with a printable location.
    pub fn with_location(payload: impl Any, location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            payload: Box::new(payload),
        }
    }
}

enum SlotEntry {
    Empty,
    Live(CompiledProcedure),
    /// Link-time patch: calls reaching this slot are forwarded.
    Redirected(ProcedureToken),
}

struct Slot {
    generation: u32,
    entry: SlotEntry,
}

/// The arena owning all compiled procedures of one execution context.
#[derive(Default)]
pub struct ProcedureArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ProcedureArena {
    /// An empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-redirected) procedures.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.entry, SlotEntry::Live(_)))
            .count()
    }

    /// Store a procedure and mint its token.
    pub fn insert(&mut self, procedure: CompiledProcedure) -> ProcedureToken {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = SlotEntry::Live(procedure);
            ProcedureToken {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: SlotEntry::Live(procedure),
            });
            ProcedureToken {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, token: ProcedureToken) -> Option<&Slot> {
        let slot = self.slots.get(token.index as usize)?;
        (slot.generation == token.generation).then_some(slot)
    }

    /// Follow redirect chains from `token` to the token of a live
    /// procedure, if one is still reachable.
    pub fn resolve(&self, token: ProcedureToken) -> Option<ProcedureToken> {
        let mut current = token;
        // Redirects only ever point at younger slots, so the chain is
        // bounded by the slot count.
        for _ in 0..=self.slots.len() {
            match &self.slot(current)?.entry {
                SlotEntry::Live(_) => return Some(current),
                SlotEntry::Redirected(next) => current = *next,
                SlotEntry::Empty => return None,
            }
        }
        None
    }

    /// Does `token` still (possibly via redirects) name a live
    /// procedure?
    pub fn is_alive(&self, token: ProcedureToken) -> bool {
        self.resolve(token).is_some()
    }

    /// Borrow the procedure named by `token`, following redirects.
    pub fn get(&self, token: ProcedureToken) -> Option<&CompiledProcedure> {
        let resolved = self.resolve(token)?;
        match &self.slot(resolved)?.entry {
            SlotEntry::Live(procedure) => Some(procedure),
            _ => None,
        }
    }

    /// Reclaim a procedure. Outstanding tokens dangle from here on;
    /// cells holding them discover the eviction lazily.
    ///
    /// Returns `false` if the token was already stale.
    pub fn evict(&mut self, token: ProcedureToken) -> bool {
        let Some(slot) = self.slots.get_mut(token.index as usize) else {
            return false;
        };
        if slot.generation != token.generation || matches!(slot.entry, SlotEntry::Empty) {
            return false;
        }
        debug!(index = token.index, "evicting compiled procedure");
        slot.entry = SlotEntry::Empty;
        slot.generation += 1;
        self.free.push(token.index);
        true
    }

    /// Install a link-time patch: calls that reach `old` are forwarded
    /// to `new` from now on. The old slot's procedure is dropped.
    pub fn redirect(&mut self, old: ProcedureToken, new: ProcedureToken) {
        if old == new {
            return;
        }
        let Some(slot) = self.slots.get_mut(old.index as usize) else {
            return;
        };
        if slot.generation == old.generation {
            slot.entry = SlotEntry::Redirected(new);
        }
    }
}
