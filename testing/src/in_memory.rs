//! In-memory exam store for fast, deterministic testing.
//!
//! [`InMemoryExamStore`] plays every storage role at once:
//! - [`SourceEventStore`]: registrations, check-ins, scripts, invigilators,
//!   incidents and room capacity, seeded through the fixture methods
//! - [`SessionMetricsStore`]: the aggregate rows
//! - [`IncidentRecorder`]: incident + affected-party rows + aggregate flags
//!
//! All state sits behind one lock, so each trait call is atomic with respect
//! to every other call. That mirrors the single-statement / single-transaction
//! guarantees of the `PostgreSQL` backend.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use chrono::{DateTime, Utc};
use exam_metrics_core::aggregate::{MetricsDelta, SessionMetrics};
use exam_metrics_core::error::{MetricsError, Result};
use exam_metrics_core::ids::{IncidentId, SessionId, StudentId};
use exam_metrics_core::source::{
    AssignmentStatus, AttendanceCounts, IncidentCounts, InvigilatorCounts, ScriptCounts,
    ScriptStatus, SessionSchedule, SourceEventStore, legacy_notes_mark_late,
};
use exam_metrics_core::status::SessionStatus;
use exam_metrics_core::store::{
    IncidentRecorder, IncidentReport, IncidentStatus, SessionFilter, SessionMetricsStore,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

/// A check-in row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIn {
    /// Candidate was verified present
    pub present: bool,
    /// Explicit late flag (`None` on legacy rows)
    pub is_late: Option<bool>,
    /// Free-text notes
    pub notes: Option<String>,
}

impl CheckIn {
    fn counts_late(&self) -> bool {
        self.is_late
            .unwrap_or_else(|| legacy_notes_mark_late(self.notes.as_deref()))
    }
}

/// A persisted incident row with its affected-party rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIncident {
    /// Incident key
    pub id: IncidentId,
    /// Category code
    pub category: String,
    /// Description
    pub description: String,
    /// Current status
    pub status: IncidentStatus,
    /// Report time
    pub reported_at: DateTime<Utc>,
    /// Junction rows
    pub affected_students: Vec<StudentId>,
}

/// Source data of one session.
#[derive(Debug, Clone)]
struct SourceSession {
    schedule: SessionSchedule,
    registrations: BTreeSet<StudentId>,
    check_ins: BTreeMap<StudentId, CheckIn>,
    scripts: BTreeMap<StudentId, ScriptStatus>,
    invigilators: BTreeMap<i64, AssignmentStatus>,
    incidents: Vec<StoredIncident>,
    capacity: i32,
}

#[derive(Debug, Default)]
struct State {
    sources: BTreeMap<SessionId, SourceSession>,
    metrics: BTreeMap<SessionId, SessionMetrics>,
    failing_sessions: HashSet<SessionId>,
    next_incident_id: i64,
}

impl State {
    fn source(&self, session_id: SessionId) -> Result<Option<&SourceSession>> {
        if self.failing_sessions.contains(&session_id) {
            return Err(MetricsError::Storage(format!(
                "injected failure for session {session_id}"
            )));
        }
        Ok(self.sources.get(&session_id))
    }

    fn source_or_empty<T: Default>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&SourceSession) -> T,
    ) -> Result<T> {
        Ok(self.source(session_id)?.map(f).unwrap_or_default())
    }
}

/// In-memory implementation of every storage trait of the engine.
///
/// Cloning shares the underlying state.
///
/// # Example
///
/// ```
/// use exam_metrics_testing::{InMemoryExamStore, schedule};
/// use exam_metrics_core::SessionId;
///
/// let store = InMemoryExamStore::new();
/// store.schedule_session(schedule(7, "2025-06-02T10:00:00Z", "2025-06-02T12:00:00Z"));
/// store.register_students(SessionId::new(7), 50);
/// assert_eq!(store.registered(SessionId::new(7)), 50);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryExamStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryExamStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a scheduled session with empty source data.
    pub fn schedule_session(&self, schedule: SessionSchedule) {
        let mut state = self.state.write().unwrap();
        state.sources.insert(
            schedule.session_id,
            SourceSession {
                schedule,
                registrations: BTreeSet::new(),
                check_ins: BTreeMap::new(),
                scripts: BTreeMap::new(),
                invigilators: BTreeMap::new(),
                incidents: Vec::new(),
                capacity: 0,
            },
        );
    }

    /// Delete a session's source record, as if it was removed upstream.
    pub fn remove_session(&self, session_id: SessionId) {
        self.state.write().unwrap().sources.remove(&session_id);
    }

    /// Make every source query for `session_id` fail with a storage error.
    pub fn inject_source_failure(&self, session_id: SessionId) {
        self.state.write().unwrap().failing_sessions.insert(session_id);
    }

    /// Register candidates `1..=count` for a session.
    pub fn register_students(&self, session_id: SessionId, count: i64) {
        self.with_source(session_id, |source| {
            source
                .registrations
                .extend((1..=count).map(StudentId::new));
        });
    }

    /// Check a candidate in with an explicit late flag.
    pub fn check_in(&self, session_id: SessionId, student: StudentId, late: bool) {
        self.with_source(session_id, |source| {
            source.check_ins.insert(
                student,
                CheckIn {
                    present: true,
                    is_late: Some(late),
                    notes: None,
                },
            );
        });
    }

    /// Insert a legacy check-in row that only carries free-text notes.
    pub fn legacy_check_in(&self, session_id: SessionId, student: StudentId, notes: &str) {
        self.with_source(session_id, |source| {
            source.check_ins.insert(
                student,
                CheckIn {
                    present: true,
                    is_late: None,
                    notes: Some(notes.to_string()),
                },
            );
        });
    }

    /// Set the script status of a candidate.
    pub fn set_script(&self, session_id: SessionId, student: StudentId, status: ScriptStatus) {
        self.with_source(session_id, |source| {
            source.scripts.insert(student, status);
        });
    }

    /// Assign an invigilator (by officer key) with a status.
    pub fn assign_invigilator(
        &self,
        session_id: SessionId,
        officer: i64,
        status: AssignmentStatus,
    ) {
        self.with_source(session_id, |source| {
            source.invigilators.insert(officer, status);
        });
    }

    /// Set the room capacity allocated to a session.
    pub fn set_capacity(&self, session_id: SessionId, capacity: i32) {
        self.with_source(session_id, |source| source.capacity = capacity);
    }

    /// Set the administrative cancel/postpone flags.
    pub fn set_admin_flags(&self, session_id: SessionId, cancelled: bool, postponed: bool) {
        self.with_source(session_id, |source| {
            source.schedule.admin_cancelled = cancelled;
            source.schedule.admin_postponed = postponed;
        });
    }

    /// Change the status of a stored incident.
    pub fn set_incident_status(
        &self,
        session_id: SessionId,
        id: IncidentId,
        status: IncidentStatus,
    ) {
        self.with_source(session_id, |source| {
            if let Some(incident) = source.incidents.iter_mut().find(|i| i.id == id) {
                incident.status = status;
            }
        });
    }

    /// Overwrite an aggregate row directly, bypassing every check.
    ///
    /// Useful for simulating drift.
    pub fn put_metrics(&self, metrics: SessionMetrics) {
        self.state
            .write()
            .unwrap()
            .metrics
            .insert(metrics.session_id, metrics);
    }

    /// Number of registered candidates.
    #[must_use]
    pub fn registered(&self, session_id: SessionId) -> usize {
        self.state
            .read()
            .unwrap()
            .sources
            .get(&session_id)
            .map_or(0, |s| s.registrations.len())
    }

    /// Incidents stored for a session.
    #[must_use]
    pub fn incidents(&self, session_id: SessionId) -> Vec<StoredIncident> {
        self.state
            .read()
            .unwrap()
            .sources
            .get(&session_id)
            .map(|s| s.incidents.clone())
            .unwrap_or_default()
    }

    /// Number of aggregate rows.
    #[must_use]
    pub fn metrics_len(&self) -> usize {
        self.state.read().unwrap().metrics.len()
    }

    fn with_source(&self, session_id: SessionId, f: impl FnOnce(&mut SourceSession)) {
        if let Some(source) = self.state.write().unwrap().sources.get_mut(&session_id) {
            f(source);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // Fixture sizes fit in i32
fn count<T>(items: impl Iterator<Item = T>) -> i32 {
    items.count() as i32
}

impl SourceEventStore for InMemoryExamStore {
    async fn session_schedule(&self, session_id: SessionId) -> Result<Option<SessionSchedule>> {
        Ok(self.state.read().unwrap().source(session_id)?.map(|s| s.schedule))
    }

    async fn expected_count(&self, session_id: SessionId) -> Result<i32> {
        self.state
            .read()
            .unwrap()
            .source_or_empty(session_id, |s| count(s.registrations.iter()))
    }

    async fn attendance(&self, session_id: SessionId) -> Result<AttendanceCounts> {
        self.state.read().unwrap().source_or_empty(session_id, |s| {
            let present = || s.check_ins.values().filter(|c| c.present);
            AttendanceCounts {
                present: count(present()),
                late: count(present().filter(|c| c.counts_late())),
            }
        })
    }

    async fn script_counts(&self, session_id: SessionId) -> Result<ScriptCounts> {
        self.state.read().unwrap().source_or_empty(session_id, |s| ScriptCounts {
            submitted: count(s.scripts.values().filter(|st| st.is_submitted())),
            collected: count(s.scripts.values().filter(|st| st.is_collected())),
        })
    }

    async fn invigilator_counts(&self, session_id: SessionId) -> Result<InvigilatorCounts> {
        self.state.read().unwrap().source_or_empty(session_id, |s| InvigilatorCounts {
            assigned: count(s.invigilators.values().filter(|st| st.is_assigned())),
            present: count(
                s.invigilators
                    .values()
                    .filter(|st| **st == AssignmentStatus::Present),
            ),
        })
    }

    async fn incident_counts(&self, session_id: SessionId) -> Result<IncidentCounts> {
        self.state.read().unwrap().source_or_empty(session_id, |s| IncidentCounts {
            total: count(s.incidents.iter()),
            unresolved: count(s.incidents.iter().filter(|i| i.status.is_unresolved())),
            last_reported_at: s.incidents.iter().map(|i| i.reported_at).max(),
        })
    }

    async fn allocated_capacity(&self, session_id: SessionId) -> Result<i32> {
        self.state
            .read()
            .unwrap()
            .source_or_empty(session_id, |s| s.capacity)
    }

    async fn session_ids(&self) -> Result<Vec<SessionId>> {
        Ok(self.state.read().unwrap().sources.keys().copied().collect())
    }
}

impl SessionMetricsStore for InMemoryExamStore {
    async fn fetch(&self, session_id: SessionId) -> Result<Option<SessionMetrics>> {
        Ok(self.state.read().unwrap().metrics.get(&session_id).cloned())
    }

    async fn fetch_many(&self, filter: &SessionFilter) -> Result<Vec<SessionMetrics>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .metrics
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    async fn insert_new(&self, metrics: &SessionMetrics) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.metrics.contains_key(&metrics.session_id) {
            return Err(MetricsError::InvalidInitialization(metrics.session_id));
        }
        state.metrics.insert(metrics.session_id, metrics.clone());
        Ok(())
    }

    async fn upsert(
        &self,
        metrics: &SessionMetrics,
        expected: Option<SessionStatus>,
    ) -> Result<Option<SessionMetrics>> {
        let mut state = self.state.write().unwrap();
        let mut row = metrics.clone();
        match (state.metrics.get(&metrics.session_id), expected) {
            (Some(existing), Some(expected)) if existing.session_status == expected => {
                row.session_started_at = existing.session_started_at.or(row.session_started_at);
                row.session_ended_at = existing.session_ended_at.or(row.session_ended_at);
            }
            (None, None) => {}
            _ => return Ok(None),
        }
        state.metrics.insert(row.session_id, row.clone());
        Ok(Some(row))
    }

    async fn apply_delta(
        &self,
        session_id: SessionId,
        delta: MetricsDelta,
        at: DateTime<Utc>,
    ) -> Result<SessionMetrics> {
        let mut state = self.state.write().unwrap();
        let row = state
            .metrics
            .get_mut(&session_id)
            .ok_or(MetricsError::NotFound(session_id))?;
        delta.apply(row, at);
        Ok(row.clone())
    }

    async fn set_status(
        &self,
        session_id: SessionId,
        expected: SessionStatus,
        next: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SessionMetrics>> {
        let mut state = self.state.write().unwrap();
        let row = state
            .metrics
            .get_mut(&session_id)
            .ok_or(MetricsError::NotFound(session_id))?;
        if row.session_status != expected {
            return Ok(None);
        }
        row.enter_status(next, at);
        Ok(Some(row.clone()))
    }
}

impl IncidentRecorder for InMemoryExamStore {
    async fn record_incident(
        &self,
        report: &IncidentReport,
        at: DateTime<Utc>,
    ) -> Result<SessionMetrics> {
        let mut state = self.state.write().unwrap();
        let session_id = report.session_id;

        // Validate every row before writing any of them.
        if !state.metrics.contains_key(&session_id) {
            return Err(MetricsError::NotFound(session_id));
        }
        let source = state
            .sources
            .get(&session_id)
            .ok_or(MetricsError::UnknownSession(session_id))?;
        if let Some(student) = report
            .affected_students
            .iter()
            .find(|s| !source.registrations.contains(*s))
        {
            return Err(MetricsError::Storage(format!(
                "affected student {student} is not registered for session {session_id}"
            )));
        }

        state.next_incident_id += 1;
        let incident = StoredIncident {
            id: IncidentId::new(state.next_incident_id),
            category: report.category.clone(),
            description: report.description.clone(),
            status: report.status,
            reported_at: at,
            affected_students: report.affected_students.clone(),
        };

        let source = state
            .sources
            .get_mut(&session_id)
            .ok_or(MetricsError::UnknownSession(session_id))?;
        source.incidents.push(incident);
        let has_unresolved = source.incidents.iter().any(|i| i.status.is_unresolved());

        let row = state
            .metrics
            .get_mut(&session_id)
            .ok_or(MetricsError::NotFound(session_id))?;
        MetricsDelta::IncidentFlags { has_unresolved }.apply(row, at);
        Ok(row.clone())
    }
}
