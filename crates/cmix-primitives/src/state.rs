//! Round lifecycle states.

use std::fmt;

use crate::error::PrimitivesError;

/// Lifecycle stage of a round.
///
/// Discriminants match the wire encoding and double as indices into
/// [`RoundInfo::timestamps`](crate::RoundInfo::timestamps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "u32", try_from = "u32")
)]
#[repr(u32)]
pub enum RoundState {
    Pending = 0,
    Precomputing = 1,
    Standby = 2,
    /// Scheduled for a future realtime phase; tracked by the wait queue.
    Queued = 3,
    Realtime = 4,
    Completed = 5,
    Failed = 6,
}

impl RoundState {
    /// Number of lifecycle states.
    pub const COUNT: usize = 7;

    /// Every state, in lifecycle order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Pending,
        Self::Precomputing,
        Self::Standby,
        Self::Queued,
        Self::Realtime,
        Self::Completed,
        Self::Failed,
    ];

    /// Index of this state's timestamp slot.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl From<RoundState> for u32 {
    fn from(state: RoundState) -> Self {
        state as u32
    }
}

impl TryFrom<u32> for RoundState {
    type Error = PrimitivesError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(PrimitivesError::UnknownState(value))
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Precomputing => "PRECOMPUTING",
            Self::Standby => "STANDBY",
            Self::Queued => "QUEUED",
            Self::Realtime => "REALTIME",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
