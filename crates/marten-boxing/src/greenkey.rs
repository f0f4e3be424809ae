//! Greenkeys: the constant-argument tuples that identify call sites
//!
//! A greenkey is an ordered, fixed-arity tuple of constant boxes, one per
//! declared green parameter. It is constructed once per call-site
//! invocation and used only for hashing and equality in the counter/cell
//! cache.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::boxes::ConstBox;
use crate::value::RawValue;

/// An ordered tuple of constant boxes identifying one call site.
///
/// Equality is structural: two greenkeys are equivalent iff they have the
/// same arity and each component compares equal under box equality
/// (integers by value, objects by identity, strings by content, floats by
/// storage bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GreenKey {
    elems: SmallVec<[ConstBox; 4]>,
}

impl GreenKey {
    /// Build a greenkey from already-wrapped constant boxes.
    pub fn new(elems: impl IntoIterator<Item = ConstBox>) -> Self {
        Self {
            elems: elems.into_iter().collect(),
        }
    }

    /// Build a greenkey by wrapping the interpreter's live raw values.
    pub fn wrap(raws: impl IntoIterator<Item = RawValue>) -> Self {
        Self::new(raws.into_iter().map(ConstBox::wrap))
    }

    /// Number of green parameters.
    pub fn arity(&self) -> usize {
        self.elems.len()
    }

    /// The component boxes, in declared order.
    pub fn elems(&self) -> &[ConstBox] {
        &self.elems
    }

    /// Structural hash of the whole tuple, used to index the counter
    /// table. Equal greenkeys always produce equal hashes.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}
