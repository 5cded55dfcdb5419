//! cMix Round Scheduling
//!
//! The two concurrent primitives a cMix node or client uses to decide which
//! round to act on next:
//!
//! - [`RoundQueue`]: rounds currently in the QUEUED state, ordered by the time
//!   their realtime phase starts. Supports exclusion-filtered lookups and a
//!   blocking [`get_upcoming_realtime`](RoundQueue::get_upcoming_realtime)
//!   with timeout.
//! - [`RoundEvents`]: per-round, per-state subscriptions. A subscription fires
//!   exactly once, either when the round reaches one of its states or when
//!   its timeout elapses.
//!
//! Both are fed from the same upstream stream of round updates and are
//! otherwise independent; neither orders its effects against the other.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cmix_primitives::{RoundId, RoundInfo, RoundState};
//! use cmix_rounds::{RoundEvents, RoundQueue, SchedulingConfig};
//!
//! let queue = Arc::new(RoundQueue::new());
//! let events = RoundEvents::new();
//!
//! // Feed side
//! let update = RoundInfo::new(RoundId(7), RoundState::Queued)
//!     .with_timestamp(RoundState::Realtime, realtime_ns);
//! queue.insert(update.clone());
//! events.trigger_round_event(&update);
//!
//! // Scheduler side
//! let config = SchedulingConfig::from_env();
//! let round = queue.next_round(&config, None).await?;
//! events.add_round_event(
//!     round.id,
//!     |info, timed_out| println!("round {} done (timed out: {timed_out})", info.id),
//!     config.event_timeout,
//!     &[RoundState::Completed, RoundState::Failed],
//! );
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod queue;

pub use config::SchedulingConfig;
pub use error::{Error, Result};
pub use events::{EventId, RoundEvent, RoundEventCallback, RoundEvents};
pub use queue::{RoundQueue, SelectionMode};

pub use cmix_primitives::{ExcludedRounds, RoundId, RoundInfo, RoundState};
