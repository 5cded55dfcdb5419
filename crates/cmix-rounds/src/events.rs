//! Round-event dispatcher.
//!
//! Observers subscribe to a round id and a set of round states. When the
//! network feed reports the round in one of those states the subscription
//! fires exactly once and is removed from every state it was bound to. A
//! subscription whose states never arrive fires once with `timed_out = true`
//! when its timeout elapses.
//!
//! # Concurrency
//!
//! The registry sits behind one mutex that is never held across an await.
//! Each subscription owns a private single-slot [`oneshot`] signal; its
//! waiter suspends on that signal (or its timer) only, so a slow observer
//! never delays [`RoundEvents::trigger_round_event`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cmix_primitives::{RoundId, RoundInfo, RoundState};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Callback invoked once per subscription with the round snapshot and
/// whether the subscription timed out.
///
/// On timeout the snapshot is [`RoundInfo::placeholder`] for the round id.
pub type RoundEventCallback = Box<dyn FnOnce(RoundInfo, bool) + Send + 'static>;

/// Identifies a subscription within a [`RoundEvents`] registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

/// Outcome of waiting on a round event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    /// The round reached one of the requested states.
    Reached(RoundInfo),
    /// No requested state was observed before the timeout.
    TimedOut(RoundId),
}

impl RoundEvent {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    /// Split into the `(round, timed_out)` pair passed to callbacks.
    pub fn into_parts(self) -> (RoundInfo, bool) {
        match self {
            Self::Reached(round) => (round, false),
            Self::TimedOut(id) => (RoundInfo::placeholder(id), true),
        }
    }
}

struct Subscription {
    states: Vec<RoundState>,
    signal: oneshot::Sender<RoundInfo>,
}

/// Subscriptions for a single round.
#[derive(Default)]
struct RoundCallbacks {
    by_state: [HashSet<EventId>; RoundState::COUNT],
    subscriptions: HashMap<EventId, Subscription>,
}

impl RoundCallbacks {
    /// Detach a subscription from every state it is bound to.
    fn take(&mut self, id: EventId) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(&id)?;
        for state in &subscription.states {
            self.by_state[state.index()].remove(&id);
        }
        Some(subscription)
    }

    fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[derive(Default)]
struct Registry {
    rounds: HashMap<RoundId, RoundCallbacks>,
    next_id: u64,
}

/// Registry of round-event subscriptions.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct RoundEvents {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for RoundEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundEvents")
            .field("rounds", &self.round_count())
            .finish()
    }
}

impl RoundEvents {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run once `round_id` reaches any of `states`,
    /// or with `timed_out = true` after `timeout`.
    ///
    /// The subscription is live when this returns. The waiter runs on a
    /// spawned task, so this must be called from within a tokio runtime.
    pub fn add_round_event<F>(
        &self,
        round_id: RoundId,
        callback: F,
        timeout: Duration,
        states: &[RoundState],
    ) -> EventId
    where
        F: FnOnce(RoundInfo, bool) + Send + 'static,
    {
        let waiter = self.register(round_id, states);
        let id = waiter.id;

        tokio::spawn(async move {
            let (round, timed_out) = waiter.wait(timeout).await.into_parts();
            callback(round, timed_out);
        });

        id
    }

    /// [`add_round_event`](Self::add_round_event) for an already boxed callback.
    pub fn add_boxed_round_event(
        &self,
        round_id: RoundId,
        callback: RoundEventCallback,
        timeout: Duration,
        states: &[RoundState],
    ) -> EventId {
        self.add_round_event(round_id, callback, timeout, states)
    }

    /// Register a subscription and return a future resolving to its outcome.
    ///
    /// The subscription is live when this returns, before the future is
    /// first polled. Dropping the future cancels the subscription.
    pub fn wait_for_round_event(
        &self,
        round_id: RoundId,
        timeout: Duration,
        states: &[RoundState],
    ) -> impl Future<Output = RoundEvent> + Send + 'static {
        let waiter = self.register(round_id, states);
        async move { waiter.wait(timeout).await }
    }

    /// Deliver a round update to every subscription waiting on its state.
    ///
    /// Delivered subscriptions are removed from all of their states. Returns
    /// the number of subscriptions signalled.
    pub fn trigger_round_event(&self, round: &RoundInfo) -> usize {
        let mut registry = self.lock();

        let Some(callbacks) = registry.rounds.get_mut(&round.id) else {
            return 0;
        };

        let ready: Vec<EventId> = callbacks.by_state[round.state.index()]
            .iter()
            .copied()
            .collect();

        for id in &ready {
            if let Some(subscription) = callbacks.take(*id) {
                // The waiter may have timed out concurrently; nothing to do then.
                let _ = subscription.signal.send(round.clone());
            }
        }

        if callbacks.is_empty() {
            registry.rounds.remove(&round.id);
            trace!(round = %round.id, "Pruned round from event registry");
        }

        if !ready.is_empty() {
            debug!(
                round = %round.id,
                state = %round.state,
                delivered = ready.len(),
                "Triggered round events"
            );
        }

        ready.len()
    }

    /// Remove a subscription from every state it was registered under.
    ///
    /// A pending waiter observes the removal as a timeout. Unknown ids are
    /// ignored.
    pub fn remove(&self, round_id: RoundId, id: EventId) {
        let mut registry = self.lock();
        remove_locked(&mut registry, round_id, id);
    }

    /// Number of round ids with at least one live subscription.
    pub fn round_count(&self) -> usize {
        self.lock().rounds.len()
    }

    /// Number of live subscriptions for a round.
    pub fn subscription_count(&self, round_id: RoundId) -> usize {
        self.lock()
            .rounds
            .get(&round_id)
            .map_or(0, |callbacks| callbacks.subscriptions.len())
    }

    fn register(&self, round_id: RoundId, states: &[RoundState]) -> Waiter {
        let (signal, receiver) = oneshot::channel();

        let mut unique: Vec<RoundState> = states.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut registry = self.lock();
        let id = EventId(registry.next_id);
        registry.next_id += 1;

        let callbacks = registry.rounds.entry(round_id).or_default();
        for state in &unique {
            callbacks.by_state[state.index()].insert(id);
        }
        callbacks.subscriptions.insert(
            id,
            Subscription {
                states: unique,
                signal,
            },
        );
        drop(registry);

        debug!(round = %round_id, event = id.0, ?states, "Registered round event");

        Waiter {
            events: self.clone(),
            round_id,
            id,
            receiver,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_locked(registry: &mut Registry, round_id: RoundId, id: EventId) {
    let Some(callbacks) = registry.rounds.get_mut(&round_id) else {
        return;
    };

    callbacks.take(id);

    if callbacks.is_empty() {
        registry.rounds.remove(&round_id);
        trace!(round = %round_id, "Pruned round from event registry");
    }
}

/// A registered subscription's receiving end.
///
/// Removes its subscription on drop, so a waiter that stops early never
/// leaves an entry behind.
struct Waiter {
    events: RoundEvents,
    round_id: RoundId,
    id: EventId,
    receiver: oneshot::Receiver<RoundInfo>,
}

impl Waiter {
    async fn wait(mut self, timeout: Duration) -> RoundEvent {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(round)) => {
                trace!(round = %self.round_id, event = self.id.0, "Round event delivered");
                RoundEvent::Reached(round)
            }
            Ok(Err(_)) => {
                debug!(round = %self.round_id, event = self.id.0, "Round event removed before delivery");
                RoundEvent::TimedOut(self.round_id)
            }
            Err(_) => {
                debug!(round = %self.round_id, event = self.id.0, ?timeout, "Round event timed out");
                RoundEvent::TimedOut(self.round_id)
            }
        }
        // Drop removes the subscription before the caller sees the outcome.
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.events.remove(self.round_id, self.id);
    }
}
