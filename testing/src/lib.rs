//! # Exam Metrics Testing
//!
//! Testing utilities and helpers for the exam metrics engine.
//!
//! This crate provides:
//! - [`InMemoryExamStore`]: source store, aggregate store and incident recorder in one
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`RecordingPublisher`]: captures every broadcast for assertions
//! - Fixture helpers for schedules and timestamps
//!
//! ## Example
//!
//! ```ignore
//! use exam_metrics_testing::{InMemoryExamStore, ManualClock, RecordingPublisher, schedule};
//!
//! #[tokio::test]
//! async fn test_check_in_flow() {
//!     let store = Arc::new(InMemoryExamStore::new());
//!     store.schedule_session(schedule(7, "2025-06-02T10:00:00Z", "2025-06-02T12:00:00Z"));
//!     store.register_students(SessionId::new(7), 50);
//!
//!     let reconciler = Reconciler::new(store.clone(), store.clone(), publisher, clock);
//!     reconciler.initialize(SessionId::new(7), 50).await?;
//! }
//! ```

#![allow(clippy::expect_used)] // Fixture helpers fail loudly on bad literals
#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

pub mod in_memory;

use chrono::{DateTime, NaiveDate, Utc};
use exam_metrics_core::aggregate::SessionScope;
use exam_metrics_core::environment::Clock;
use exam_metrics_core::ids::{InstitutionId, SessionId, TimetableId, VenueId};
use exam_metrics_core::source::SessionSchedule;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use exam_metrics_core::broadcast::{EventPublisher, Topic};
    use std::sync::{Arc, Mutex, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use exam_metrics_testing::mocks::FixedClock;
    /// use exam_metrics_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Cloning shares the current time, so a test can hold one handle while
    /// the component under test holds another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// One captured publish call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PublishedEvent {
        /// Topics, formatted
        pub topics: Vec<String>,
        /// Event name
        pub event_name: String,
        /// Payload
        pub payload: serde_json::Value,
    }

    /// Publisher that records every call instead of delivering it.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingPublisher {
        events: Arc<Mutex<Vec<PublishedEvent>>>,
    }

    impl RecordingPublisher {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every publish call so far, in order.
        #[must_use]
        pub fn published(&self) -> Vec<PublishedEvent> {
            self.events.lock().unwrap().clone()
        }

        /// Publish calls with the given event name.
        #[must_use]
        pub fn named(&self, event_name: &str) -> Vec<PublishedEvent> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.event_name == event_name)
                .cloned()
                .collect()
        }

        /// Forget everything recorded so far.
        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, topics: &[Topic], event_name: &str, payload: serde_json::Value) {
            self.events.lock().unwrap().push(PublishedEvent {
                topics: topics.iter().map(ToString::to_string).collect(),
                event_name: event_name.to_string(),
                payload,
            });
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::at("2025-01-01T00:00:00Z"))
    }
}

/// Parse an RFC 3339 timestamp literal.
///
/// # Panics
///
/// Panics on a malformed literal.
#[must_use]
pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("fixture timestamp should parse")
        .with_timezone(&Utc)
}

/// Default scope used by fixtures: institution 1, venue 1, timetable 1, 2025-06-02.
#[must_use]
pub fn scope() -> SessionScope {
    SessionScope {
        institution_id: InstitutionId::new(1),
        venue_id: VenueId::new(1),
        timetable_id: Some(TimetableId::new(1)),
        exam_date: NaiveDate::from_ymd_opt(2025, 6, 2).expect("fixture date should be valid"),
    }
}

/// A schedule in the default [`scope`] with no administrative flags set.
#[must_use]
pub fn schedule(session_id: i64, start: &str, end: &str) -> SessionSchedule {
    SessionSchedule {
        session_id: SessionId::new(session_id),
        scope: scope(),
        scheduled_start: at(start),
        scheduled_end: at(end),
        admin_cancelled: false,
        admin_postponed: false,
    }
}

/// Install a test-friendly tracing subscriber (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exam_metrics=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use in_memory::{CheckIn, InMemoryExamStore, StoredIncident};
pub use mocks::{FixedClock, ManualClock, PublishedEvent, RecordingPublisher, test_clock};
