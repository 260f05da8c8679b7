//! Topics, envelopes and the best-effort publisher contract.
//!
//! # Topic Naming Convention
//!
//! Topics are hierarchical identifiers scoped by institution, venue and session:
//! - `institution:<id>` - everything happening at one institution
//! - `venue:<id>` - everything happening at one venue
//! - `exam-entry:<id>` - one exam session
//!
//! # Delivery
//!
//! Publishing is fire-and-forget: at most once per listener per call, no
//! persistence, no acknowledgment. A publisher never reports failure to its
//! caller, so a slow or broken fan-out can never fail the business operation
//! that triggered it.

use crate::aggregate::SessionScope;
use crate::ids::{InstitutionId, SessionId, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::fmt;

/// Event names published by the engine.
pub mod events {
    /// A fresh aggregate was created
    pub const METRICS_INITIALIZED: &str = "exam-entry.metrics-initialized";
    /// An aggregate was recomputed from source truth
    pub const METRICS_SYNCED: &str = "exam-entry.metrics-synced";
    /// A candidate checked in
    pub const PRESENCE_RECORDED: &str = "exam-entry.presence-recorded";
    /// A script was submitted
    pub const SCRIPT_SUBMITTED: &str = "exam-entry.script-submitted";
    /// An invigilator was marked present or absent
    pub const INVIGILATOR_PRESENCE_CHANGED: &str = "exam-entry.invigilator-presence-changed";
    /// Incident flags changed
    pub const INCIDENT_FLAGS_UPDATED: &str = "exam-entry.incident-flags-updated";
    /// An incident was reported
    pub const INCIDENT_REPORTED: &str = "exam-entry.incident-reported";
    /// The session status was overridden
    pub const STATUS_CHANGED: &str = "exam-entry.status-changed";
}

/// A broadcast topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `institution:<id>`
    Institution(InstitutionId),
    /// `venue:<id>`
    Venue(VenueId),
    /// `exam-entry:<id>`
    ExamEntry(SessionId),
}

impl Topic {
    /// The three topics every change to a session is announced on.
    #[must_use]
    pub fn for_session(session_id: SessionId, scope: &SessionScope) -> SmallVec<[Self; 3]> {
        smallvec![
            Self::Institution(scope.institution_id),
            Self::Venue(scope.venue_id),
            Self::ExamEntry(session_id),
        ]
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Institution(id) => write!(f, "institution:{id}"),
            Self::Venue(id) => write!(f, "venue:{id}"),
            Self::ExamEntry(id) => write!(f, "exam-entry:{id}"),
        }
    }
}

/// The envelope delivered to subscribers.
///
/// Serializes as `{topic, eventName, payload, timestamp}` with an ISO-8601 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Topic the envelope was delivered on
    pub topic: String,
    /// Event name (see [`events`])
    pub event_name: String,
    /// Event payload (the aggregate snapshot for engine events)
    pub payload: serde_json::Value,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
}

/// Best-effort publisher handed to engine components.
///
/// Implementations must not block on delivery and must swallow (log) every
/// failure.
pub trait EventPublisher: Send + Sync {
    /// Publish `payload` under `event_name` to each of `topics`.
    fn publish(&self, topics: &[Topic], event_name: &str, payload: serde_json::Value);
}
