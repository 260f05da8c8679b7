//! Integration tests for topic broadcasting
//!
//! Exercises the full path: updater → `BroadcastHandle` → dispatch task →
//! `TopicBroadcaster` → subscriber, and checks that delivery problems never
//! reach the business operation.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use exam_metrics_core::aggregate::SessionMetrics;
use exam_metrics_core::broadcast::{EventPublisher, Topic, events};
use exam_metrics_core::ids::{InstitutionId, SessionId, VenueId};
use exam_metrics_runtime::{BroadcastDispatcher, IncrementalUpdater, TopicBroadcaster};
use exam_metrics_testing::{FixedClock, InMemoryExamStore, at, schedule, scope};
use std::sync::Arc;
use std::time::Duration;

const SESSION: SessionId = SessionId::new(7);

fn store() -> Arc<InMemoryExamStore> {
    let store = InMemoryExamStore::new();
    store.schedule_session(schedule(7, "2025-06-02T10:00:00Z", "2025-06-02T12:00:00Z"));
    store.put_metrics(SessionMetrics::initialized(
        SESSION,
        scope(),
        50,
        at("2025-06-02T08:00:00Z"),
    ));
    Arc::new(store)
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(at("2025-06-02T10:05:00Z")))
}

#[tokio::test]
async fn test_update_reaches_all_three_topics() {
    let broadcaster = TopicBroadcaster::default();
    let mut by_institution = broadcaster.subscribe(Topic::Institution(InstitutionId::new(1))).await;
    let mut by_venue = broadcaster.subscribe(Topic::Venue(VenueId::new(1))).await;
    let mut by_session = broadcaster.subscribe(Topic::ExamEntry(SESSION)).await;

    let (handle, task) = BroadcastDispatcher::spawn(broadcaster, 16, clock());
    let updater = IncrementalUpdater::new(store(), Arc::new(handle), clock());

    updater.record_presence(SESSION, false).await.unwrap();
    drop(updater);
    task.await.unwrap();

    for (rx, topic) in [
        (&mut by_institution, "institution:1"),
        (&mut by_venue, "venue:1"),
        (&mut by_session, "exam-entry:7"),
    ] {
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic, topic);
        assert_eq!(envelope.event_name, events::PRESENCE_RECORDED);
        assert_eq!(envelope.payload["totalPresent"], 1);
        assert_eq!(envelope.payload["totalAbsent"], 49);
        assert_eq!(envelope.timestamp, at("2025-06-02T10:05:00Z"));
    }
}

#[tokio::test]
async fn test_each_listener_receives_once() {
    let broadcaster = TopicBroadcaster::default();
    let mut first = broadcaster.subscribe(Topic::ExamEntry(SESSION)).await;
    let mut second = broadcaster.subscribe(Topic::ExamEntry(SESSION)).await;

    let (handle, task) = BroadcastDispatcher::spawn(broadcaster, 16, clock());
    handle.publish(
        &[Topic::ExamEntry(SESSION)],
        events::METRICS_SYNCED,
        serde_json::json!({ "sessionId": 7 }),
    );
    drop(handle);
    task.await.unwrap();

    for rx in [&mut first, &mut second] {
        assert_eq!(rx.recv().await.unwrap().payload["sessionId"], 7);
        assert!(rx.try_recv().is_err());
    }
}

#[tokio::test]
async fn test_update_succeeds_with_no_listeners() {
    let (handle, _task) = BroadcastDispatcher::spawn(TopicBroadcaster::default(), 16, clock());
    let updater = IncrementalUpdater::new(store(), Arc::new(handle), clock());

    let metrics = updater.record_script_submission(SESSION).await.unwrap();

    assert_eq!(metrics.counters.scripts_submitted, 1);
}

#[tokio::test]
async fn test_full_queue_never_blocks_or_fails_updates() {
    // Current-thread runtime: the dispatch task cannot drain while this test runs.
    let (handle, task) = BroadcastDispatcher::spawn(TopicBroadcaster::default(), 1, clock());
    let updater = IncrementalUpdater::new(store(), Arc::new(handle), clock());

    let result = tokio::time::timeout(Duration::from_secs(1), async {
        for _ in 0..20 {
            updater.record_presence(SESSION, false).await.unwrap();
        }
    })
    .await;

    assert!(result.is_ok(), "updates must not wait on the broadcast queue");
    drop(updater);
    task.await.unwrap();
}

#[tokio::test]
async fn test_stopped_dispatcher_does_not_fail_updates() {
    let (handle, task) = BroadcastDispatcher::spawn(TopicBroadcaster::default(), 16, clock());
    task.abort();
    let _ = task.await;

    let updater = IncrementalUpdater::new(store(), Arc::new(handle), clock());
    let metrics = updater.record_invigilator_presence(SESSION, true).await.unwrap();

    assert_eq!(metrics.counters.invigilators_present, 1);
}
