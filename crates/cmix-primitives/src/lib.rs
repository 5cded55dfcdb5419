//! cMix Round Primitives
//!
//! The round data model shared between the network feed, the round wait
//! queue and the round-event dispatcher.
//!
//! A round is a scheduled unit of mix-network work. It moves through an
//! ordered set of lifecycle states and records, per state, the time at which
//! it entered (or is scheduled to enter) that state:
//!
//! ```text
//! PENDING → PRECOMPUTING → STANDBY → QUEUED → REALTIME → COMPLETED
//!                                                      ↘ FAILED
//! ```
//!
//! The scheduling core only special-cases [`RoundState::Queued`] and orders
//! rounds by their [`RoundState::Realtime`] timestamp.

mod error;
mod excluded;
mod round;
mod state;

pub use error::{PrimitivesError, Result};
pub use excluded::ExcludedRounds;
pub use round::{RoundId, RoundInfo};
pub use state::RoundState;
