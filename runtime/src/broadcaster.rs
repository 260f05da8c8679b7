//! Topic fan-out for aggregate change notifications.
//!
//! # Architecture
//!
//! ```text
//! Updater / Reconciler         BroadcastHandle        dispatch task        TopicBroadcaster
//!        │                           │                      │                     │
//!        ├─ publish(topics, ..) ────>│                      │                     │
//!        │<─ returns immediately ────┤                      │                     │
//!        │                           ├─ try_send ──────────>│                     │
//!        │                           │   (full: warn, drop) ├─ per-topic send ───>│──> subscribers
//! ```
//!
//! The business operation only ever touches the bounded queue. Slow
//! subscribers lag on their own `broadcast` receiver and never back-pressure
//! the updater.

use crate::metrics::BroadcastMetrics;
use chrono::{DateTime, Utc};
use exam_metrics_core::aggregate::SessionMetrics;
use exam_metrics_core::broadcast::{EventEnvelope, EventPublisher, Topic};
use exam_metrics_core::environment::Clock;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

/// Default number of pending publish calls held by the dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default per-topic buffer before slow subscribers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Type alias for the channels map to reduce complexity.
type ChannelsMap = Arc<RwLock<HashMap<Topic, broadcast::Sender<EventEnvelope>>>>;

/// Per-topic broadcast channels.
///
/// Each topic has its own `tokio::sync::broadcast` channel, created the first
/// time anyone publishes to or subscribes to it.
///
/// # Example
///
/// ```ignore
/// let broadcaster = TopicBroadcaster::new(DEFAULT_CHANNEL_CAPACITY);
/// let mut rx = broadcaster.subscribe(Topic::ExamEntry(SessionId::new(7))).await;
/// while let Ok(envelope) = rx.recv().await {
///     println!("{} {}", envelope.topic, envelope.event_name);
/// }
/// ```
#[derive(Clone)]
pub struct TopicBroadcaster {
    channels: ChannelsMap,
    capacity: usize,
}

impl TopicBroadcaster {
    /// Create a broadcaster whose per-topic channels buffer `capacity` envelopes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Deliver `envelope` to every current subscriber of `topic`.
    ///
    /// Returns the number of receivers reached. Zero receivers is not an error.
    pub async fn publish(&self, topic: Topic, envelope: EventEnvelope) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(&topic)
            .and_then(|sender| sender.send(envelope).ok())
            .unwrap_or(0)
    }

    /// Subscribe to `topic`.
    ///
    /// Only envelopes published after this call are received.
    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope> {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Get count of known topics.
    pub async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for TopicBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// A publish call waiting in the dispatch queue.
#[derive(Debug)]
struct BroadcastRequest {
    topics: SmallVec<[Topic; 3]>,
    event_name: String,
    payload: serde_json::Value,
    timestamp: DateTime<Utc>,
}

/// Publisher side of the dispatch queue.
///
/// Cheap to clone; hand one to every component that announces changes.
#[derive(Clone)]
pub struct BroadcastHandle {
    tx: mpsc::Sender<BroadcastRequest>,
    clock: Arc<dyn Clock>,
}

impl EventPublisher for BroadcastHandle {
    fn publish(&self, topics: &[Topic], event_name: &str, payload: serde_json::Value) {
        let request = BroadcastRequest {
            topics: topics.iter().copied().collect(),
            event_name: event_name.to_string(),
            payload,
            timestamp: self.clock.now(),
        };

        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::warn!(
                    event_name = %request.event_name,
                    "Broadcast queue full, dropping event"
                );
                BroadcastMetrics::record_dropped("queue_full");
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                tracing::warn!(
                    event_name = %request.event_name,
                    "Broadcast dispatcher stopped, dropping event"
                );
                BroadcastMetrics::record_dropped("closed");
            }
        }
    }
}

/// Background task draining the dispatch queue into a [`TopicBroadcaster`].
pub struct BroadcastDispatcher;

impl BroadcastDispatcher {
    /// Spawn the dispatch task.
    ///
    /// The task runs until every [`BroadcastHandle`] has been dropped and the
    /// queue is drained.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        broadcaster: TopicBroadcaster,
        queue_capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> (BroadcastHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<BroadcastRequest>(queue_capacity.max(1));

        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let mut topics = request.topics;
                topics.sort_unstable();
                topics.dedup();

                for topic in topics {
                    let envelope = EventEnvelope {
                        topic: topic.to_string(),
                        event_name: request.event_name.clone(),
                        payload: request.payload.clone(),
                        timestamp: request.timestamp,
                    };
                    let reached = broadcaster.publish(topic, envelope).await;
                    tracing::trace!(
                        %topic,
                        reached,
                        event_name = %request.event_name,
                        "Envelope dispatched"
                    );
                    BroadcastMetrics::record_published(1);
                }
            }
            tracing::debug!("Broadcast dispatcher stopped");
        });

        (BroadcastHandle { tx, clock }, task)
    }
}

/// Announce `metrics` on its session's topics.
///
/// A payload that cannot be serialized is logged and dropped.
pub fn announce(publisher: &dyn EventPublisher, metrics: &SessionMetrics, event_name: &str) {
    match serde_json::to_value(metrics) {
        Ok(payload) => {
            let topics = Topic::for_session(metrics.session_id, &metrics.scope);
            publisher.publish(&topics, event_name, payload);
        }
        Err(e) => {
            tracing::warn!(
                session_id = %metrics.session_id,
                event_name,
                error = %e,
                "Failed to serialize broadcast payload"
            );
            BroadcastMetrics::record_dropped("serialization");
        }
    }
}
