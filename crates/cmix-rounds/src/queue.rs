//! Round wait queue.
//!
//! Holds every round whose latest observed state is QUEUED, ordered by the
//! timestamp of its realtime phase (soonest at the front). Schedulers use it
//! to pick the next round to prepare for.
//!
//! # Change signalling
//!
//! The ordered list sits behind a read/write lock. Wake-ups go through a
//! separate [`watch`] generation counter so that waiters never hold the data
//! lock while suspended. Every committed mutation bumps the counter after the
//! data lock is released; every waiter subscribes before its first check and
//! re-evaluates its predicate after each wake-up, so no insert can slip in
//! between a failed check and the wait.

use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cmix_primitives::{ExcludedRounds, RoundId, RoundInfo};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::config::SchedulingConfig;
use crate::error::{Error, Result};

/// Which end of the queue a blocking lookup pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// The soonest qualifying round (see [`RoundQueue::get_closest`]).
    #[default]
    Closest,
    /// The latest qualifying round (see [`RoundQueue::get_furthest`]).
    Furthest,
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closest" => Ok(Self::Closest),
            "furthest" => Ok(Self::Furthest),
            other => Err(format!("unknown selection mode: {other}")),
        }
    }
}

/// Time-ordered set of queued rounds.
///
/// Share it between the feed and the schedulers with an `Arc`.
#[derive(Debug)]
pub struct RoundQueue {
    /// Queued rounds, ascending by realtime timestamp.
    rounds: RwLock<Vec<RoundInfo>>,
    /// Generation counter bumped after every committed change.
    changed: watch::Sender<u64>,
}

impl Default for RoundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            rounds: RwLock::new(Vec::new()),
            changed,
        }
    }

    /// Apply a round update.
    ///
    /// A QUEUED round is inserted (or moved, if its id is already present)
    /// at its sorted position; a round in any other state is removed.
    pub fn insert(&self, round: RoundInfo) {
        let changed = {
            let mut rounds = self.write();
            apply(&mut rounds, round)
        };

        if changed {
            self.notify();
        }
    }

    /// Apply a batch of updates under a single lock.
    ///
    /// Every round in `removed` is dropped regardless of its state, then
    /// every round in `added` is applied as by [`insert`](Self::insert).
    /// Waiters are woken at most once.
    pub fn insert_batch(&self, added: Vec<RoundInfo>, removed: Vec<RoundInfo>) {
        let changed = {
            let mut rounds = self.write();
            let mut changed = false;
            for round in &removed {
                changed |= remove_id(&mut rounds, round.id);
            }
            for round in added {
                changed |= apply(&mut rounds, round);
            }
            changed
        };

        if changed {
            self.notify();
        }
    }

    /// Number of queued rounds.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ordered copy of every queued round.
    pub fn get_slice(&self) -> Vec<RoundInfo> {
        self.read().clone()
    }

    /// The round furthest in the future that is not excluded, provided at
    /// least `min_length` other non-excluded rounds are queued ahead of it.
    pub fn get_furthest(
        &self,
        exclude: Option<&ExcludedRounds>,
        min_length: usize,
    ) -> Option<RoundInfo> {
        furthest(&self.read(), exclude, min_length)
    }

    /// The soonest non-excluded round that has at least `min_length`
    /// non-excluded rounds ahead of it.
    pub fn get_closest(
        &self,
        exclude: Option<&ExcludedRounds>,
        min_length: usize,
    ) -> Option<RoundInfo> {
        closest(&self.read(), exclude, min_length)
    }

    /// Wait for a qualifying round.
    ///
    /// Returns immediately if `mode`'s lookup already yields a round.
    /// Otherwise re-checks after every queue change until one appears or
    /// `timeout` elapses, which yields [`Error::DeadlineExceeded`].
    pub async fn get_upcoming_realtime(
        &self,
        timeout: Duration,
        exclude: Option<&ExcludedRounds>,
        min_length: usize,
        mode: SelectionMode,
    ) -> Result<RoundInfo> {
        // Subscribe before the first check so a concurrent insert is seen.
        let mut changed = self.changed.subscribe();

        if let Some(round) = self.select(exclude, min_length, mode) {
            return Ok(round);
        }

        let wait = async {
            loop {
                if changed.changed().await.is_err() {
                    // The sender lives as long as `self`; only the timeout can end this.
                    std::future::pending::<()>().await;
                }
                if let Some(round) = self.select(exclude, min_length, mode) {
                    return round;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(round) => {
                trace!(round = %round.id, ?mode, "Upcoming round became available");
                Ok(round)
            }
            Err(_) => {
                debug!(?timeout, ?mode, min_length, "Timed out waiting for upcoming round");
                Err(Error::DeadlineExceeded(timeout))
            }
        }
    }

    /// [`get_upcoming_realtime`](Self::get_upcoming_realtime) with the
    /// timeout, depth and mode taken from `config`.
    pub async fn next_round(
        &self,
        config: &SchedulingConfig,
        exclude: Option<&ExcludedRounds>,
    ) -> Result<RoundInfo> {
        self.get_upcoming_realtime(
            config.upcoming_timeout,
            exclude,
            config.min_queue_depth,
            config.selection_mode,
        )
        .await
    }

    /// Number of queued rounds whose realtime phase starts after `now`.
    pub fn num_valid_rounds(&self, now: SystemTime) -> usize {
        let now = unix_nanos(now);
        let rounds = self.read();
        rounds.len() - rounds.partition_point(|r| r.realtime_timestamp() <= now)
    }

    /// Whether any queued round starts its realtime phase after `now`.
    pub fn has_valid_rounds(&self, now: SystemTime) -> bool {
        let now = unix_nanos(now);
        self.read()
            .last()
            .is_some_and(|r| r.realtime_timestamp() > now)
    }

    fn select(
        &self,
        exclude: Option<&ExcludedRounds>,
        min_length: usize,
        mode: SelectionMode,
    ) -> Option<RoundInfo> {
        let rounds = self.read();
        match mode {
            SelectionMode::Closest => closest(&rounds, exclude, min_length),
            SelectionMode::Furthest => furthest(&rounds, exclude, min_length),
        }
    }

    fn notify(&self) {
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<RoundInfo>> {
        self.rounds.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RoundInfo>> {
        self.rounds.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply one update to the ordered list. Returns true if it changed.
fn apply(rounds: &mut Vec<RoundInfo>, round: RoundInfo) -> bool {
    if !round.is_queued() {
        let removed = remove_id(rounds, round.id);
        if removed {
            trace!(round = %round.id, state = %round.state, "Removed round from queue");
        }
        return removed;
    }

    remove_id(rounds, round.id);

    // Scan from the back: new rounds usually land near the tail.
    let timestamp = round.realtime_timestamp();
    let position = rounds
        .iter()
        .rposition(|r| r.realtime_timestamp() <= timestamp)
        .map_or(0, |i| i + 1);

    trace!(round = %round.id, timestamp, position, "Queued round");
    rounds.insert(position, round);
    true
}

fn remove_id(rounds: &mut Vec<RoundInfo>, id: RoundId) -> bool {
    match rounds.iter().rposition(|r| r.id == id) {
        Some(index) => {
            rounds.remove(index);
            true
        }
        None => false,
    }
}

fn is_candidate(round: &RoundInfo, exclude: Option<&ExcludedRounds>) -> bool {
    exclude.map_or(true, |excluded| !excluded.has(round.id))
}

fn closest(
    rounds: &[RoundInfo],
    exclude: Option<&ExcludedRounds>,
    min_length: usize,
) -> Option<RoundInfo> {
    rounds
        .iter()
        .filter(|r| is_candidate(r, exclude))
        .nth(min_length)
        .cloned()
}

fn furthest(
    rounds: &[RoundInfo],
    exclude: Option<&ExcludedRounds>,
    min_length: usize,
) -> Option<RoundInfo> {
    let mut candidates = rounds.iter().filter(|r| is_candidate(r, exclude));
    let last = candidates.next_back()?;
    // Everything still left in the iterator lies ahead of `last`.
    (candidates.count() >= min_length).then(|| last.clone())
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}
