//! # Exam Metrics Core
//!
//! Core types and traits for the exam-session metrics engine.
//!
//! Every exam session ("exam entry") owns one denormalized aggregate record:
//! expected/present/absent counts, script and invigilator counts, incident
//! flags, a lifecycle status and a post-completion verification status. The
//! record is kept consistent with the underlying event log in two ways:
//!
//! - **Incremental updates**: one atomic delta per real-world event
//!   (check-in, script submission, presence toggle, incident flag change).
//! - **Reconciliation**: a full, idempotent recomputation from source truth
//!   that repairs any drift left by missed deltas.
//!
//! This crate holds the pure parts of that engine and the seams to the outside
//! world. It performs no I/O.
//!
//! ## Modules
//!
//! - [`aggregate`]: the aggregate record, its counters and the delta algebra
//! - [`status`]: session-status derivation and verification classification
//! - [`source`]: read-only contract of the source event store
//! - [`store`]: aggregate storage and transactional incident writes
//! - [`broadcast`]: topics, envelopes and the best-effort publisher contract
//! - [`error`]: the error type shared by all crates
//!
//! ## Example
//!
//! ```
//! use exam_metrics_core::status::{SessionStatus, derive_status};
//! use chrono::{TimeZone, Utc};
//!
//! let start = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
//! let end = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
//! let now = Utc.with_ymd_and_hms(2025, 6, 2, 11, 0, 0).unwrap();
//!
//! assert_eq!(derive_status(now, start, end, false, false), SessionStatus::InProgress);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod broadcast;
pub mod error;
pub mod source;
pub mod status;
pub mod store;

pub use aggregate::{
    MetricsDelta, MetricsSnapshot, SessionCounters, SessionMetrics, SessionScope,
};
pub use error::{MetricsError, Result};
pub use status::{SessionStatus, VerificationStatus};

/// Identifier newtypes used across the engine.
///
/// All identifiers are `BIGINT` keys in the backing database.
pub mod ids {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    macro_rules! id_newtype {
        ($(#[$meta:meta])* $name:ident) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(i64);

            impl $name {
                /// Wrap a raw database key.
                #[must_use]
                pub const fn new(id: i64) -> Self {
                    Self(id)
                }

                /// The raw database key.
                #[must_use]
                pub const fn get(self) -> i64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<i64> for $name {
                fn from(id: i64) -> Self {
                    Self(id)
                }
            }
        };
    }

    id_newtype!(
        /// An exam session (one paper sat at one venue in one slot).
        SessionId
    );
    id_newtype!(
        /// The institution that owns a session.
        InstitutionId
    );
    id_newtype!(
        /// The venue a session is allocated to.
        VenueId
    );
    id_newtype!(
        /// The timetable a session belongs to.
        TimetableId
    );
    id_newtype!(
        /// A registered candidate.
        StudentId
    );
    id_newtype!(
        /// A persisted incident record.
        IncidentId
    );
}

pub use ids::{IncidentId, InstitutionId, SessionId, StudentId, TimetableId, VenueId};

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into the components that need them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use exam_metrics_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
