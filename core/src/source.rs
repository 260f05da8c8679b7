//! Read-only contract of the source event store.
//!
//! The source event store holds registrations, check-ins, script records,
//! invigilator assignments, incidents and room allocations. The metrics engine
//! never writes to it except through [`IncidentRecorder`](crate::store::IncidentRecorder).
//!
//! Each method is one narrow query keyed by session. The calculator issues
//! them independently, without an isolation boundary, so a single sync may see
//! a mixture of pre- and post-write state. Repeated syncs converge.

use crate::aggregate::SessionScope;
use crate::error::Result;
use crate::ids::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Scheduling facts about a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSchedule {
    /// The session
    pub session_id: SessionId,
    /// Institution/venue/date scope
    pub scope: SessionScope,
    /// Window start (inclusive)
    pub scheduled_start: DateTime<Utc>,
    /// Window end (exclusive)
    pub scheduled_end: DateTime<Utc>,
    /// Cancelled by an administrator
    pub admin_cancelled: bool,
    /// Postponed by an administrator
    pub admin_postponed: bool,
}

/// Check-in counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceCounts {
    /// Candidates marked present
    pub present: i32,
    /// Present candidates whose check-in was late
    pub late: i32,
}

/// Script record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptCounts {
    /// Scripts with status `SUBMITTED`, `COLLECTED` or `VERIFIED`
    pub submitted: i32,
    /// Scripts with status `COLLECTED` or `VERIFIED`
    pub collected: i32,
}

/// Invigilator assignment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvigilatorCounts {
    /// Assignments not `REMOVED`
    pub assigned: i32,
    /// Assignments `PRESENT`
    pub present: i32,
}

/// Incident counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentCounts {
    /// All incidents reported for the session
    pub total: i32,
    /// Incidents not `RESOLVED`
    pub unresolved: i32,
    /// Most recent report time
    pub last_reported_at: Option<DateTime<Utc>>,
}

/// Status code of a script record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptStatus {
    /// Not handed in
    Pending,
    /// Handed in by the candidate
    Submitted,
    /// Collected by staff
    Collected,
    /// Checked against the attendance register
    Verified,
}

impl ScriptStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Collected => "COLLECTED",
            Self::Verified => "VERIFIED",
        }
    }

    /// Counts towards `scriptsSubmitted`.
    #[must_use]
    pub const fn is_submitted(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Counts towards `scriptsCollected`.
    #[must_use]
    pub const fn is_collected(self) -> bool {
        matches!(self, Self::Collected | Self::Verified)
    }
}

/// Status of an invigilator assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    /// Assigned, presence not yet recorded
    Assigned,
    /// On site
    Present,
    /// Did not turn up
    Absent,
    /// Taken off the session
    Removed,
}

impl AssignmentStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "ASSIGNED",
            Self::Present => "PRESENT",
            Self::Absent => "ABSENT",
            Self::Removed => "REMOVED",
        }
    }

    /// Counts towards `invigilatorsAssigned`.
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        !matches!(self, Self::Removed)
    }
}

/// Read-only access to the source event store.
///
/// # Late Arrivals
///
/// A check-in is late when its explicit late flag is set. Legacy rows that
/// predate the flag count as late when their notes mention "late"
/// (case-insensitive). Implementations must honour both.
///
/// # Example
///
/// ```ignore
/// let schedule = source.session_schedule(session_id).await?
///     .ok_or(MetricsError::UnknownSession(session_id))?;
/// let expected = source.expected_count(session_id).await?;
/// ```
pub trait SourceEventStore: Send + Sync {
    /// Scheduling facts, or `None` if the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn session_schedule(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Option<SessionSchedule>>> + Send;

    /// Number of registered candidates.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn expected_count(&self, session_id: SessionId) -> impl Future<Output = Result<i32>> + Send;

    /// Present and late check-in counts.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn attendance(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<AttendanceCounts>> + Send;

    /// Submitted and collected script counts.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn script_counts(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<ScriptCounts>> + Send;

    /// Assigned and present invigilator counts.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn invigilator_counts(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<InvigilatorCounts>> + Send;

    /// Total and unresolved incident counts.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn incident_counts(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<IncidentCounts>> + Send;

    /// Sum of room capacities allocated to the session.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn allocated_capacity(&self, session_id: SessionId)
    -> impl Future<Output = Result<i32>> + Send;

    /// Every scheduled session, ascending.
    ///
    /// Feeds the batch entrypoints.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn session_ids(&self) -> impl Future<Output = Result<Vec<SessionId>>> + Send;
}

/// Whether free-text check-in notes mark a legacy row as late.
///
/// Only consulted for rows without an explicit late flag.
#[must_use]
pub fn legacy_notes_mark_late(notes: Option<&str>) -> bool {
    notes.is_some_and(|n| n.to_lowercase().contains("late"))
}
