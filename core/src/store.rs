//! Aggregate storage and transactional incident writes.
//!
//! # Atomicity
//!
//! Many actors (one per invigilator, check-in desk or script handler) update
//! the same aggregate row with no coordination. Every
//! [`SessionMetricsStore::apply_delta`] call must therefore be a single atomic
//! increment/decrement at the storage boundary:
//!
//! ```text
//! UPDATE session_metrics
//!    SET total_present = total_present + 1,
//!        total_absent  = total_absent  - 1
//!  WHERE session_id = $1
//! ```
//!
//! Reading the row, computing new values and writing them back loses updates
//! under interleaving and is not an acceptable implementation.

use crate::aggregate::{MetricsDelta, SessionMetrics};
use crate::error::Result;
use crate::ids::{InstitutionId, SessionId, StudentId, TimetableId, VenueId};
use crate::status::SessionStatus;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Filter for fetch-many queries. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFilter {
    /// Only sessions of this institution
    pub institution_id: Option<InstitutionId>,
    /// Only sessions at this venue
    pub venue_id: Option<VenueId>,
    /// Only sessions sat on this date
    pub exam_date: Option<NaiveDate>,
    /// Only sessions of this timetable
    pub timetable_id: Option<TimetableId>,
}

impl SessionFilter {
    /// A filter that matches every session.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one institution.
    #[must_use]
    pub const fn institution(mut self, id: InstitutionId) -> Self {
        self.institution_id = Some(id);
        self
    }

    /// Restrict to one venue.
    #[must_use]
    pub const fn venue(mut self, id: VenueId) -> Self {
        self.venue_id = Some(id);
        self
    }

    /// Restrict to one exam date.
    #[must_use]
    pub const fn date(mut self, date: NaiveDate) -> Self {
        self.exam_date = Some(date);
        self
    }

    /// Restrict to one timetable.
    #[must_use]
    pub const fn timetable(mut self, id: TimetableId) -> Self {
        self.timetable_id = Some(id);
        self
    }

    /// Whether a record falls inside this filter.
    #[must_use]
    pub fn matches(&self, metrics: &SessionMetrics) -> bool {
        let scope = &metrics.scope;
        self.institution_id.is_none_or(|id| scope.institution_id == id)
            && self.venue_id.is_none_or(|id| scope.venue_id == id)
            && self.exam_date.is_none_or(|date| scope.exam_date == date)
            && self
                .timetable_id
                .is_none_or(|id| scope.timetable_id == Some(id))
    }
}

/// Storage backend for session aggregates.
///
/// # Example
///
/// ```ignore
/// let updated = store
///     .apply_delta(session_id, MetricsDelta::Presence { late: false }, clock.now())
///     .await?;
/// assert!(updated.counters.total_present >= 1);
/// ```
pub trait SessionMetricsStore: Send + Sync {
    /// Fetch one aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn fetch(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Option<SessionMetrics>>> + Send;

    /// Fetch every aggregate matching `filter`, ordered by session id.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the query fails.
    fn fetch_many(
        &self,
        filter: &SessionFilter,
    ) -> impl Future<Output = Result<Vec<SessionMetrics>>> + Send;

    /// Insert a brand-new aggregate.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::InvalidInitialization`](crate::MetricsError::InvalidInitialization)
    ///   if an aggregate already exists for the session
    /// - [`MetricsError::Storage`](crate::MetricsError::Storage) if the write fails
    fn insert_new(&self, metrics: &SessionMetrics) -> impl Future<Output = Result<()>> + Send;

    /// Insert or fully overwrite an aggregate, conditional on the stored status.
    ///
    /// The overwrite happens only while the stored status still equals
    /// `expected`; `None` means no aggregate was stored when the caller read.
    /// Returns `None` when the stored row no longer matches, leaving it untouched.
    ///
    /// A stored `session_started_at` / `session_ended_at` wins over the
    /// incoming value once set.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`](crate::MetricsError::Storage) if the write fails.
    fn upsert(
        &self,
        metrics: &SessionMetrics,
        expected: Option<SessionStatus>,
    ) -> impl Future<Output = Result<Option<SessionMetrics>>> + Send;

    /// Apply one delta atomically and return the updated row.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`](crate::MetricsError::NotFound) if no aggregate exists
    /// - [`MetricsError::Storage`](crate::MetricsError::Storage) if the write fails
    fn apply_delta(
        &self,
        session_id: SessionId,
        delta: MetricsDelta,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<SessionMetrics>> + Send;

    /// Compare-and-set the session status.
    ///
    /// Succeeds only while the stored status still equals `expected`, so that
    /// a concurrent writer cannot be overwritten with a stale transition.
    /// Returns `None` when the stored status no longer matches.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`](crate::MetricsError::NotFound) if no aggregate exists
    /// - [`MetricsError::Storage`](crate::MetricsError::Storage) if the write fails
    fn set_status(
        &self,
        session_id: SessionId,
        expected: SessionStatus,
        next: SessionStatus,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<SessionMetrics>>> + Send;
}

/// Lifecycle of a reported incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    /// Reported, not yet looked at
    Open,
    /// Being investigated
    Investigating,
    /// Closed
    Resolved,
}

impl IncidentStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Investigating => "INVESTIGATING",
            Self::Resolved => "RESOLVED",
        }
    }

    /// Whether the incident still needs attention.
    #[must_use]
    pub const fn is_unresolved(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

/// An incident as reported by an invigilator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentReport {
    /// Session the incident happened in
    pub session_id: SessionId,
    /// Short category code (e.g. `MALPRACTICE`, `ILLNESS`)
    pub category: String,
    /// Free-text description
    pub description: String,
    /// Initial status
    pub status: IncidentStatus,
    /// Candidates involved (one junction row each)
    pub affected_students: Vec<StudentId>,
}

/// Transactional writer for incident reports.
///
/// Writes the incident row, one affected-party row per student and the
/// aggregate's incident flags as one unit. Either every row is written or none
/// is; a missing aggregate aborts the whole report.
pub trait IncidentRecorder: Send + Sync {
    /// Record an incident and return the updated aggregate.
    ///
    /// `has_unresolved_incidents` is recomputed from all incidents of the
    /// session, including the new one.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`](crate::MetricsError::NotFound) if no aggregate exists
    /// - [`MetricsError::Storage`](crate::MetricsError::Storage) if any row fails (nothing is kept)
    fn record_incident(
        &self,
        report: &IncidentReport,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<SessionMetrics>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use crate::aggregate::SessionScope;

    fn metrics(institution: i64, venue: i64, timetable: Option<i64>) -> SessionMetrics {
        SessionMetrics::initialized(
            SessionId::new(1),
            SessionScope {
                institution_id: InstitutionId::new(institution),
                venue_id: VenueId::new(venue),
                timetable_id: timetable.map(TimetableId::new),
                exam_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            },
            10,
            Utc::now(),
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(SessionFilter::all().matches(&metrics(1, 2, None)));
    }

    #[test]
    fn test_filter_fields_combine() {
        let filter = SessionFilter::all()
            .institution(InstitutionId::new(1))
            .venue(VenueId::new(2));

        assert!(filter.matches(&metrics(1, 2, None)));
        assert!(!filter.matches(&metrics(1, 3, None)));
        assert!(!filter.matches(&metrics(9, 2, None)));
    }

    #[test]
    fn test_timetable_filter_excludes_unscheduled() {
        let filter = SessionFilter::all().timetable(TimetableId::new(5));

        assert!(filter.matches(&metrics(1, 2, Some(5))));
        assert!(!filter.matches(&metrics(1, 2, None)));
    }

    #[test]
    fn test_date_filter() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let other = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();

        assert!(SessionFilter::all().date(day).matches(&metrics(1, 2, None)));
        assert!(!SessionFilter::all().date(other).matches(&metrics(1, 2, None)));
    }

    #[test]
    fn test_incident_status() {
        assert!(IncidentStatus::Open.is_unresolved());
        assert!(IncidentStatus::Investigating.is_unresolved());
        assert!(!IncidentStatus::Resolved.is_unresolved());
        assert_eq!(IncidentStatus::Investigating.as_str(), "INVESTIGATING");
    }
}
