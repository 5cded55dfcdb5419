//! Sets of rounds a caller wants skipped.

use std::collections::HashSet;

use crate::round::RoundId;

/// Round ids excluded from a wait-queue lookup.
///
/// Typically holds rounds a client already tried and failed to use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedRounds {
    ids: HashSet<RoundId>,
}

impl ExcludedRounds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude a round. Returns true if it was not already excluded.
    pub fn insert(&mut self, id: RoundId) -> bool {
        self.ids.insert(id)
    }

    /// Stop excluding a round. Returns true if it was excluded.
    pub fn remove(&mut self, id: RoundId) -> bool {
        self.ids.remove(&id)
    }

    pub fn has(&self, id: RoundId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<RoundId> for ExcludedRounds {
    fn from_iter<I: IntoIterator<Item = RoundId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<RoundId> for ExcludedRounds {
    fn extend<I: IntoIterator<Item = RoundId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}
