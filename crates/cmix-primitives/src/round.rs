//! Round identifiers and round-info snapshots.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::state::RoundState;

/// Unique identifier of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RoundId(pub u64);

impl From<u64> for RoundId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot of a round as reported by the network feed.
///
/// Snapshots are plain values: consumers copy them in and out and never share
/// a mutable view of the authoritative round registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoundInfo {
    pub id: RoundId,
    pub state: RoundState,
    /// Nanosecond epoch timestamps, indexed by [`RoundState::index`].
    pub timestamps: [u64; RoundState::COUNT],
}

impl RoundInfo {
    /// Create a snapshot with all timestamps zeroed.
    pub const fn new(id: RoundId, state: RoundState) -> Self {
        Self {
            id,
            state,
            timestamps: [0; RoundState::COUNT],
        }
    }

    /// Zero-value snapshot carrying only the id.
    ///
    /// Handed to round-event callbacks whose subscription timed out.
    pub const fn placeholder(id: RoundId) -> Self {
        Self::new(id, RoundState::Pending)
    }

    /// Set the timestamp for a stage.
    #[must_use]
    pub fn with_timestamp(mut self, state: RoundState, nanos: u64) -> Self {
        self.set_timestamp(state, nanos);
        self
    }

    /// Timestamp recorded for a stage.
    pub const fn timestamp(&self, state: RoundState) -> u64 {
        self.timestamps[state.index()]
    }

    pub fn set_timestamp(&mut self, state: RoundState, nanos: u64) {
        self.timestamps[state.index()] = nanos;
    }

    /// Timestamp of the realtime stage: the wait queue's sort key.
    pub const fn realtime_timestamp(&self) -> u64 {
        self.timestamp(RoundState::Realtime)
    }

    /// The realtime timestamp as wall-clock time.
    pub fn realtime_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.realtime_timestamp())
    }

    pub fn is_queued(&self) -> bool {
        self.state == RoundState::Queued
    }
}
