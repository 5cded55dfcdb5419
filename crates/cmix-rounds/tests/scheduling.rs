//! End-to-end tests driving the round queue and event dispatcher from a
//! simulated network feed.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use cmix_rounds::{
    Error, ExcludedRounds, RoundEvent, RoundEvents, RoundId, RoundInfo, RoundQueue, RoundState,
    SchedulingConfig, SelectionMode,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cmix_rounds=debug")
        .with_test_writer()
        .try_init();
}

fn nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
}

/// Build `count` rounds where the odd-indexed ones are QUEUED with strictly
/// increasing realtime timestamps. Returns the expected queue contents and
/// the rounds in shuffled feed order.
fn create_test_rounds(count: u64, start: SystemTime) -> (Vec<RoundInfo>, Vec<RoundInfo>) {
    let mut rng = rand::thread_rng();
    let mut expected = Vec::new();
    let mut rounds = Vec::new();
    let mut timestamp = nanos(start);

    for i in 0..count {
        let state = if i % 2 == 1 {
            RoundState::Queued
        } else {
            // Anything but QUEUED
            let other = [
                RoundState::Pending,
                RoundState::Precomputing,
                RoundState::Standby,
                RoundState::Realtime,
                RoundState::Completed,
                RoundState::Failed,
            ];
            other[rng.gen_range(0..other.len())]
        };

        let round = RoundInfo::new(RoundId(i), state).with_timestamp(RoundState::Realtime, timestamp);
        if round.is_queued() {
            expected.push(round.clone());
        }
        rounds.push(round);

        timestamp += Duration::from_millis(100).as_nanos() as u64;
    }

    rounds.shuffle(&mut rng);
    (expected, rounds)
}

#[test]
fn shuffled_feed_yields_ordered_queue() {
    init_tracing();
    let (expected, feed) = create_test_rounds(25, SystemTime::now() + Duration::from_secs(5));
    let queue = RoundQueue::new();

    for round in feed {
        queue.insert(round);
    }

    assert_eq!(queue.len(), expected.len());
    assert_eq!(queue.get_slice(), expected);
    assert_eq!(queue.num_valid_rounds(SystemTime::now()), expected.len());
}

#[test]
fn batch_feed_matches_single_inserts() {
    let (expected, feed) = create_test_rounds(25, SystemTime::now() + Duration::from_secs(5));
    let queue = RoundQueue::new();

    queue.insert_batch(feed, Vec::new());
    assert_eq!(queue.get_slice(), expected);

    queue.insert_batch(Vec::new(), expected.clone());
    assert!(queue.is_empty());
}

#[test]
fn furthest_walks_back_as_rounds_leave() {
    let (expected, feed) = create_test_rounds(25, SystemTime::now() + Duration::from_secs(5));
    let queue = RoundQueue::new();
    for round in feed {
        queue.insert(round);
    }

    for round in expected.iter().rev() {
        assert_eq!(queue.get_furthest(None, 0).as_ref(), Some(round));

        let mut done = round.clone();
        done.state = RoundState::Realtime;
        let before = queue.len();
        queue.insert(done);
        assert_eq!(queue.len(), before - 1);
    }

    assert!(queue.get_furthest(None, 0).is_none());
}

#[test]
fn furthest_honours_exclusions() {
    let (expected, feed) = create_test_rounds(25, SystemTime::now() + Duration::from_secs(5));
    let queue = RoundQueue::new();
    for round in feed {
        queue.insert(round);
    }

    let exclude: ExcludedRounds = expected
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, r)| r.id)
        .collect();

    for (i, round) in expected.iter().enumerate().rev() {
        if i % 2 == 0 {
            continue;
        }
        assert_eq!(queue.get_furthest(Some(&exclude), 0).as_ref(), Some(round));
        queue.insert_batch(Vec::new(), vec![round.clone()]);
    }

    assert!(queue.get_furthest(Some(&exclude), 0).is_none());
    assert_eq!(queue.len(), exclude.len());
}

#[test]
fn stale_rounds_are_not_valid() {
    let (past, past_feed) = create_test_rounds(25, SystemTime::now() - Duration::from_secs(5));
    let (future, future_feed) = create_test_rounds(50, SystemTime::now() + Duration::from_secs(5));
    let queue = RoundQueue::new();

    for round in past_feed {
        queue.insert(round);
    }
    assert_eq!(queue.len(), past.len());
    assert_eq!(queue.num_valid_rounds(SystemTime::now()), 0);
    assert!(!queue.has_valid_rounds(SystemTime::now()));

    // Ids overlap with the first batch, so shift them out of the way.
    for mut round in future_feed {
        round.id = RoundId(round.id.0 + 1_000);
        queue.insert(round);
    }
    assert_eq!(queue.num_valid_rounds(SystemTime::now()), future.len());
    assert!(queue.has_valid_rounds(SystemTime::now()));
}

#[tokio::test]
async fn upcoming_drains_queue_in_order() {
    let (expected, feed) = create_test_rounds(25, SystemTime::now() + Duration::from_secs(5));
    let queue = RoundQueue::new();
    queue.insert_batch(feed, Vec::new());

    for round in &expected {
        let next = queue
            .get_upcoming_realtime(Duration::from_millis(300), None, 0, SelectionMode::Closest)
            .await
            .unwrap();
        assert_eq!(&next, round);
        queue.insert_batch(Vec::new(), vec![next]);
    }

    assert!(queue.is_empty());
}

#[tokio::test]
async fn upcoming_waits_for_each_insert() {
    init_tracing();
    let (expected, _) = create_test_rounds(25, SystemTime::now() + Duration::from_secs(5));
    let queue = Arc::new(RoundQueue::new());

    for round in expected {
        let feed = Arc::clone(&queue);
        let inserted = round.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            feed.insert(inserted);
        });

        let next = queue
            .get_upcoming_realtime(Duration::from_secs(5), None, 0, SelectionMode::Furthest)
            .await
            .unwrap();
        assert_eq!(next, round);

        let mut done = round;
        done.state = RoundState::Completed;
        queue.insert(done);
    }
}

#[tokio::test]
async fn upcoming_deadline_is_never_early() {
    let queue = RoundQueue::new();
    let timeout = Duration::from_millis(200);
    let started = Instant::now();

    let result = queue
        .get_upcoming_realtime(timeout, None, 0, SelectionMode::Closest)
        .await;

    let elapsed = started.elapsed();
    assert_eq!(result, Err(Error::DeadlineExceeded(timeout)));
    assert!(elapsed >= timeout, "returned after {elapsed:?}");
    assert!(elapsed < timeout * 10, "returned after {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_waiters_all_wake() {
    let queue = Arc::new(RoundQueue::new());
    let mut waiters = Vec::new();

    for _ in 0..8 {
        let queue = Arc::clone(&queue);
        waiters.push(tokio::spawn(async move {
            queue
                .get_upcoming_realtime(Duration::from_secs(5), None, 0, SelectionMode::Closest)
                .await
        }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    let round = RoundInfo::new(RoundId(1), RoundState::Queued).with_timestamp(RoundState::Realtime, 1);
    queue.insert(round.clone());

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Ok(round.clone()));
    }
}

#[tokio::test]
async fn next_round_with_depth_waits_for_enough_rounds() {
    let queue = Arc::new(RoundQueue::new());
    let config = SchedulingConfig::default()
        .with_upcoming_timeout(Duration::from_secs(5))
        .with_min_queue_depth(2);

    let feed = Arc::clone(&queue);
    tokio::spawn(async move {
        for id in 0..3u64 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feed.insert(RoundInfo::new(RoundId(id), RoundState::Queued).with_timestamp(RoundState::Realtime, id));
        }
    });

    let round = queue.next_round(&config, None).await.unwrap();
    assert_eq!(round.id, RoundId(2));
}

#[tokio::test]
async fn dispatcher_timeout_fires_once_near_deadline() {
    init_tracing();
    let events = RoundEvents::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = Instant::now();

    events.add_round_event(
        RoundId(10),
        move |info, timed_out| {
            let _ = tx.send((info, timed_out, started.elapsed()));
        },
        Duration::from_millis(50),
        &[RoundState::Queued],
    );

    let (info, timed_out, elapsed) = rx.recv().await.unwrap();
    assert!(timed_out);
    assert_eq!(info.id, RoundId(10));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(rx.recv().await.is_none());

    // Too late: the subscription is gone.
    assert_eq!(events.trigger_round_event(&RoundInfo::new(RoundId(10), RoundState::Queued)), 0);
}

#[tokio::test]
async fn dispatcher_does_not_leak_across_churn() {
    let events = RoundEvents::new();
    let mut outcomes = Vec::new();

    for id in 0..200u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        events.add_round_event(
            RoundId(id),
            move |_, timed_out| {
                let _ = tx.send(timed_out);
            },
            Duration::from_millis(30),
            &[RoundState::Completed, RoundState::Failed],
        );
        outcomes.push(rx);
    }
    assert_eq!(events.round_count(), 200);

    // Half complete, the rest time out.
    for id in (0..200u64).step_by(2) {
        events.trigger_round_event(&RoundInfo::new(RoundId(id), RoundState::Completed));
    }

    let mut timed_out = 0;
    for rx in outcomes {
        if rx.await.unwrap() {
            timed_out += 1;
        }
    }

    assert_eq!(timed_out, 100);
    assert_eq!(events.round_count(), 0);
}

#[tokio::test]
async fn feed_drives_queue_and_events_together() {
    let queue = Arc::new(RoundQueue::new());
    let events = RoundEvents::new();
    let start = nanos(SystemTime::now() + Duration::from_secs(5));

    let scheduler_events = events.clone();
    let scheduler = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move {
            let round = queue
                .get_upcoming_realtime(Duration::from_secs(5), None, 0, SelectionMode::Closest)
                .await?;
            let outcome = scheduler_events
                .wait_for_round_event(
                    round.id,
                    Duration::from_secs(5),
                    &[RoundState::Completed, RoundState::Failed],
                )
                .await;
            Ok::<_, Error>((round, outcome))
        }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    let lifecycle = [RoundState::Queued, RoundState::Realtime, RoundState::Completed];
    for state in lifecycle {
        let update = RoundInfo::new(RoundId(77), state).with_timestamp(RoundState::Realtime, start);
        queue.insert(update.clone());
        events.trigger_round_event(&update);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (round, outcome) = scheduler.await.unwrap().unwrap();
    assert_eq!(round.id, RoundId(77));
    assert!(matches!(outcome, RoundEvent::Reached(ref info) if info.state == RoundState::Completed));
    assert!(queue.is_empty());
    assert_eq!(events.round_count(), 0);
}

#[test]
fn json_feed_updates_queue() {
    let feed = r#"[
        { "id": 1, "state": 3, "timestamps": [0, 0, 0, 0, 300, 0, 0] },
        { "id": 2, "state": 3, "timestamps": [0, 0, 0, 0, 100, 0, 0] },
        { "id": 3, "state": 3, "timestamps": [0, 0, 0, 0, 200, 0, 0] },
        { "id": 3, "state": 4, "timestamps": [0, 0, 0, 0, 200, 0, 0] }
    ]"#;
    let updates: Vec<RoundInfo> = serde_json::from_str(feed).unwrap();
    assert_eq!(updates[3].state, RoundState::Realtime);

    let queue = RoundQueue::new();
    for update in updates {
        queue.insert(update);
    }

    let ids: Vec<RoundId> = queue.get_slice().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![RoundId(2), RoundId(1)]);

    let unknown_state = r#"{ "id": 4, "state": 9, "timestamps": [0, 0, 0, 0, 0, 0, 0] }"#;
    assert!(serde_json::from_str::<RoundInfo>(unknown_state).is_err());
}
