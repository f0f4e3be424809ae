//! The shared hash-indexed heat counter and cell cache
//!
//! One `JitCounter` serves every call site of an execution context. A
//! greenkey's hash picks a bucket; the bucket carries a decaying `f32`
//! heat value and, once a site is promoted, a chain of `JitCell`s for
//! all greenkeys colliding on that bucket. Entries are created lazily
//! and only removed by whole-table decay or lazy chain pruning.
//!
//! Single-mutator: mutation happens only on the one interpreter thread;
//! multi-threaded embedders must serialize access externally.

use std::cell::Cell;

use marten_boxing::GreenKey;

use crate::cell::JitCell;
use crate::procedure::ProcedureArena;

/// Default table size exponent (2^11 buckets).
pub const DEFAULT_SIZE_LOG2: u32 = 11;

/// Default global cooling factor applied by `decay_all_counters`.
pub const DEFAULT_DECAY: f32 = 0.9;

/// Hash-indexed table of decaying heat counters and promoted-site cells.
pub struct JitCounter {
    mask: usize,
    decay: f32,
    timetable: Vec<Cell<f32>>,
    celltable: Vec<Option<Box<JitCell>>>,
}

impl Default for JitCounter {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_LOG2, DEFAULT_DECAY)
    }
}

impl JitCounter {
    /// A table with `1 << size_log2` buckets and the given cooling
    /// factor (clamped into `(0, 1]`).
    pub fn new(size_log2: u32, decay: f32) -> Self {
        let size = 1_usize << size_log2;
        Self {
            mask: size - 1,
            decay: decay.clamp(f32::EPSILON, 1.0),
            timetable: (0..size).map(|_| Cell::new(0.0)).collect(),
            celltable: (0..size).map(|_| None).collect(),
        }
    }

    fn index(&self, hash: u64) -> usize {
        hash as usize & self.mask
    }

    /// Add `increment` heat to the bucket for `hash`.
    ///
    /// Returns `true` exactly when the heat crosses 1.0; the bucket is
    /// reset at that moment, so one crossing fires one promotion.
    pub fn tick(&self, hash: u64, increment: f32) -> bool {
        let slot = &self.timetable[self.index(hash)];
        let heat = slot.get() + increment;
        if heat >= 1.0 {
            slot.set(0.0);
            true
        } else {
            slot.set(heat);
            false
        }
    }

    /// Current heat of the bucket for `hash`.
    pub fn current_fraction(&self, hash: u64) -> f32 {
        self.timetable[self.index(hash)].get()
    }

    /// Overwrite the heat of the bucket for `hash`, capped just below
    /// the firing point. Used to keep a site warm after a skipped
    /// promotion attempt.
    pub fn change_current_fraction(&self, hash: u64, fraction: f32) {
        self.timetable[self.index(hash)].set(fraction.clamp(0.0, 0.99));
    }

    /// Zero the heat of the bucket for `hash`.
    pub fn reset(&self, hash: u64) {
        self.timetable[self.index(hash)].set(0.0);
    }

    /// Global cooling: scale every counter down by the decay factor.
    /// Never increases any counter.
    pub fn decay_all_counters(&self) {
        for slot in &self.timetable {
            slot.set(slot.get() * self.decay);
        }
    }

    /// Walk the cell chain for `hash`.
    pub fn lookup_chain(&self, hash: u64) -> impl Iterator<Item = &JitCell> {
        let mut current = self.celltable[self.index(hash)].as_deref();
        std::iter::from_fn(move || {
            let cell = current?;
            current = cell.next.as_deref();
            Some(cell)
        })
    }

    /// The cell cached for `greenkey`, if the site was promoted.
    pub fn find_cell(&self, hash: u64, greenkey: &GreenKey) -> Option<&JitCell> {
        self.lookup_chain(hash).find(|c| c.greenkey() == greenkey)
    }

    /// Insert a new cell at the head of its chain, pruning evicted
    /// non-sticky cells on the way through.
    pub fn install_new_cell(&mut self, hash: u64, cell: JitCell, procedures: &ProcedureArena) {
        let idx = self.index(hash);
        let mut chain = self.celltable[idx].take();
        let mut kept: Option<Box<JitCell>> = None;
        while let Some(mut c) = chain {
            chain = c.next.take();
            if !c.should_remove(procedures) {
                c.next = kept.take();
                kept = Some(c);
            }
        }
        let mut head = Box::new(cell);
        head.next = kept;
        self.celltable[idx] = Some(head);
    }

    /// Unlink the cell cached for `greenkey`, if any.
    pub fn remove_cell(&mut self, hash: u64, greenkey: &GreenKey) -> bool {
        let idx = self.index(hash);
        let mut chain = self.celltable[idx].take();
        let mut kept: Option<Box<JitCell>> = None;
        let mut removed = false;
        while let Some(mut c) = chain {
            chain = c.next.take();
            if !removed && c.greenkey() == greenkey {
                removed = true;
            } else {
                c.next = kept.take();
                kept = Some(c);
            }
        }
        self.celltable[idx] = kept;
        removed
    }
}
