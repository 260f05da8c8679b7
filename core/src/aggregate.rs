//! The per-session aggregate record.
//!
//! # Overview
//!
//! [`SessionMetrics`] is the denormalized counters-and-status record derived
//! from the underlying event data of one exam session. It is:
//!
//! - **created** by the reconciler's initialize path ([`SessionMetrics::initialized`])
//! - **mutated** by incremental updates ([`MetricsDelta`])
//! - **overwritten** by sync ([`SessionMetrics::from_snapshot`])
//!
//! # Conservation
//!
//! After a sync the counters satisfy:
//!
//! ```text
//! totalPresent       + totalAbsent        == totalExpected
//! scriptsSubmitted   + scriptsPending     == totalPresent
//! invigilatorsPresent + invigilatorsAbsent == invigilatorsAssigned
//! ```
//!
//! Under concurrent incremental updates these hold eventually, not at every
//! instant. Counters are signed so that drift stays representable until the
//! next sync repairs it.

use crate::broadcast::events;
use crate::ids::{InstitutionId, SessionId, TimetableId, VenueId};
use crate::source::{AttendanceCounts, InvigilatorCounts, ScriptCounts};
use crate::status::{SessionStatus, VerificationStatus, classify_verification};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Where a session sits organisationally.
///
/// Copied from the session schedule; drives topic routing and dashboard filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScope {
    /// Owning institution
    pub institution_id: InstitutionId,
    /// Allocated venue
    pub venue_id: VenueId,
    /// Timetable, when the session was scheduled from one
    pub timetable_id: Option<TimetableId>,
    /// Calendar date of the sitting
    pub exam_date: NaiveDate,
}

/// Counter block of the aggregate.
///
/// Compared as a unit when checking sync idempotence (timestamps excluded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    /// Registered candidates
    pub total_expected: i32,
    /// Candidates checked in
    pub total_present: i32,
    /// Candidates not (yet) checked in
    pub total_absent: i32,
    /// Check-ins flagged late
    pub total_late_arrivals: i32,
    /// Scripts handed in
    pub scripts_submitted: i32,
    /// Scripts collected by staff
    pub scripts_collected: i32,
    /// Present candidates without a submitted script
    pub scripts_pending: i32,
    /// Invigilators assigned to the session
    pub invigilators_assigned: i32,
    /// Invigilators marked present
    pub invigilators_present: i32,
    /// Invigilators not present
    pub invigilators_absent: i32,
}

/// One broken conservation equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConservationViolation {
    /// `totalPresent + totalAbsent != totalExpected`
    Attendance,
    /// `scriptsSubmitted + scriptsPending != totalPresent`
    Scripts,
    /// `invigilatorsPresent + invigilatorsAbsent != invigilatorsAssigned`
    Invigilators,
}

impl SessionCounters {
    /// Counters for a freshly scheduled session: everyone absent, every script pending.
    #[must_use]
    pub const fn initialized(total_expected: i32) -> Self {
        Self {
            total_expected,
            total_present: 0,
            total_absent: total_expected,
            total_late_arrivals: 0,
            scripts_submitted: 0,
            scripts_collected: 0,
            scripts_pending: total_expected,
            invigilators_assigned: 0,
            invigilators_present: 0,
            invigilators_absent: 0,
        }
    }

    /// Derive a self-consistent counter block from source counts.
    ///
    /// Absent, pending and absent-invigilator counts are computed so that the
    /// conservation equations hold by construction.
    #[must_use]
    pub const fn from_source(
        total_expected: i32,
        attendance: &AttendanceCounts,
        scripts: &ScriptCounts,
        invigilators: &InvigilatorCounts,
    ) -> Self {
        Self {
            total_expected,
            total_present: attendance.present,
            total_absent: total_expected - attendance.present,
            total_late_arrivals: attendance.late,
            scripts_submitted: scripts.submitted,
            scripts_collected: scripts.collected,
            scripts_pending: attendance.present - scripts.submitted,
            invigilators_assigned: invigilators.assigned,
            invigilators_present: invigilators.present,
            invigilators_absent: invigilators.assigned - invigilators.present,
        }
    }

    /// List every conservation equation the counters currently break.
    #[must_use]
    pub fn conservation_violations(&self) -> Vec<ConservationViolation> {
        let mut violations = Vec::new();
        if self.total_present + self.total_absent != self.total_expected {
            violations.push(ConservationViolation::Attendance);
        }
        if self.scripts_submitted + self.scripts_pending != self.total_present {
            violations.push(ConservationViolation::Scripts);
        }
        if self.invigilators_present + self.invigilators_absent != self.invigilators_assigned {
            violations.push(ConservationViolation::Invigilators);
        }
        violations
    }

    /// Whether all conservation equations hold.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.conservation_violations().is_empty()
    }
}

/// The aggregate record of one exam session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Session this record belongs to
    pub session_id: SessionId,
    /// Institution/venue/date scope
    #[serde(flatten)]
    pub scope: SessionScope,
    /// Counter block
    #[serde(flatten)]
    pub counters: SessionCounters,
    /// At least one incident was reported
    pub has_incidents: bool,
    /// At least one reported incident is not resolved
    pub has_unresolved_incidents: bool,
    /// Expected candidates exceed the allocated room capacity
    pub capacity_exceeded: bool,
    /// Lifecycle status
    pub session_status: SessionStatus,
    /// Post-completion verification status
    pub data_verification_status: VerificationStatus,
    /// First observed entry into `IN_PROGRESS`
    pub session_started_at: Option<DateTime<Utc>>,
    /// First observed entry into `COMPLETED`
    pub session_ended_at: Option<DateTime<Utc>>,
    /// Last write of any kind
    pub last_synced_at: DateTime<Utc>,
    /// Last incident report
    pub last_incident_at: Option<DateTime<Utc>>,
}

impl SessionMetrics {
    /// A fresh aggregate for a newly scheduled session.
    ///
    /// Everyone is absent, every script pending, status `NOT_STARTED`,
    /// verification `PENDING`.
    #[must_use]
    pub const fn initialized(
        session_id: SessionId,
        scope: SessionScope,
        total_expected: i32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            scope,
            counters: SessionCounters::initialized(total_expected),
            has_incidents: false,
            has_unresolved_incidents: false,
            capacity_exceeded: false,
            session_status: SessionStatus::NotStarted,
            data_verification_status: VerificationStatus::Pending,
            session_started_at: None,
            session_ended_at: None,
            last_synced_at: at,
            last_incident_at: None,
        }
    }

    /// Build the record a sync writes, from a freshly calculated snapshot.
    ///
    /// `session_started_at` / `session_ended_at` are preserved from `previous`
    /// once set. When first observed they take the scheduled window bounds.
    #[must_use]
    pub fn from_snapshot(
        snapshot: &MetricsSnapshot,
        previous: Option<&Self>,
        at: DateTime<Utc>,
    ) -> Self {
        let status = snapshot.session_status;
        let started = matches!(status, SessionStatus::InProgress | SessionStatus::Completed);
        let ended = status == SessionStatus::Completed;

        let session_started_at = previous
            .and_then(|p| p.session_started_at)
            .or_else(|| started.then_some(snapshot.scheduled_start));
        let session_ended_at = previous
            .and_then(|p| p.session_ended_at)
            .or_else(|| ended.then_some(snapshot.scheduled_end));

        Self {
            session_id: snapshot.session_id,
            scope: snapshot.scope,
            counters: snapshot.counters,
            has_incidents: snapshot.has_incidents,
            has_unresolved_incidents: snapshot.has_unresolved_incidents,
            capacity_exceeded: snapshot.capacity_exceeded,
            session_status: status,
            data_verification_status: snapshot.data_verification_status,
            session_started_at,
            session_ended_at,
            last_synced_at: at,
            last_incident_at: snapshot.last_incident_at,
        }
    }

    /// Record a status change made outside sync, stamping the lifecycle
    /// timestamps on first entry.
    ///
    /// Entering `COMPLETED` also classifies attendance from the stored counters.
    pub fn enter_status(&mut self, next: SessionStatus, at: DateTime<Utc>) {
        match next {
            SessionStatus::InProgress => {
                self.session_started_at.get_or_insert(at);
            }
            SessionStatus::Completed => {
                self.session_started_at.get_or_insert(at);
                self.session_ended_at.get_or_insert(at);
                self.data_verification_status = classify_verification(
                    next,
                    self.counters.total_expected,
                    self.counters.total_present,
                );
            }
            _ => {}
        }
        self.session_status = next;
        self.last_synced_at = at;
    }
}

/// A complete, self-consistent aggregate computed from source truth.
///
/// Produced by the metrics calculator; never partial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Session the snapshot describes
    pub session_id: SessionId,
    /// Scope from the session schedule
    pub scope: SessionScope,
    /// Derived counters
    pub counters: SessionCounters,
    /// Any incident exists
    pub has_incidents: bool,
    /// Any incident is unresolved
    pub has_unresolved_incidents: bool,
    /// Expected exceeds allocated capacity
    pub capacity_exceeded: bool,
    /// Derived status
    pub session_status: SessionStatus,
    /// Derived verification status
    pub data_verification_status: VerificationStatus,
    /// Latest incident report time
    pub last_incident_at: Option<DateTime<Utc>>,
    /// Scheduled start of the window
    pub scheduled_start: DateTime<Utc>,
    /// Scheduled end of the window
    pub scheduled_end: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// The same snapshot with `status` in place of the derived one.
    ///
    /// Verification is reclassified for `status` from the snapshot's counters.
    #[must_use]
    pub fn with_status(self, status: SessionStatus) -> Self {
        let data_verification_status = classify_verification(
            status,
            self.counters.total_expected,
            self.counters.total_present,
        );
        Self {
            session_status: status,
            data_verification_status,
            ..self
        }
    }
}

/// A single-event delta against a stored aggregate.
///
/// Storage backends apply each variant as one atomic increment/decrement,
/// never as read-compute-write at the application level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricsDelta {
    /// A candidate checked in
    Presence {
        /// The check-in was flagged late
        late: bool,
    },
    /// A script was handed in (and collected)
    ScriptSubmission,
    /// An invigilator was marked present or absent
    InvigilatorPresence {
        /// `true` for present, `false` for absent
        present: bool,
    },
    /// Incident flags changed
    IncidentFlags {
        /// Whether unresolved incidents remain
        has_unresolved: bool,
    },
}

impl MetricsDelta {
    /// Operation label for logs and metrics.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Presence { .. } => "record_presence",
            Self::ScriptSubmission => "record_script_submission",
            Self::InvigilatorPresence { .. } => "record_invigilator_presence",
            Self::IncidentFlags { .. } => "set_incident_flags",
        }
    }

    /// Broadcast event name announcing this delta.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Presence { .. } => events::PRESENCE_RECORDED,
            Self::ScriptSubmission => events::SCRIPT_SUBMITTED,
            Self::InvigilatorPresence { .. } => events::INVIGILATOR_PRESENCE_CHANGED,
            Self::IncidentFlags { .. } => events::INCIDENT_FLAGS_UPDATED,
        }
    }

    /// Apply the delta to an in-memory record.
    ///
    /// Reference semantics for storage backends; callers that share a record
    /// must hold it exclusively while applying.
    pub fn apply(&self, metrics: &mut SessionMetrics, at: DateTime<Utc>) {
        let counters = &mut metrics.counters;
        match *self {
            Self::Presence { late } => {
                counters.total_present += 1;
                counters.total_absent -= 1;
                if late {
                    counters.total_late_arrivals += 1;
                }
            }
            Self::ScriptSubmission => {
                counters.scripts_submitted += 1;
                counters.scripts_collected += 1;
                counters.scripts_pending -= 1;
            }
            Self::InvigilatorPresence { present: true } => {
                counters.invigilators_present += 1;
                counters.invigilators_absent -= 1;
            }
            Self::InvigilatorPresence { present: false } => {
                counters.invigilators_present -= 1;
                counters.invigilators_absent += 1;
            }
            Self::IncidentFlags { has_unresolved } => {
                metrics.has_incidents = true;
                metrics.has_unresolved_incidents = has_unresolved;
                metrics.last_incident_at = Some(at);
            }
        }
        metrics.last_synced_at = at;
    }
}
