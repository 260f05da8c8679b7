//! Full recomputation of an aggregate from source truth.

use exam_metrics_core::aggregate::{MetricsSnapshot, SessionCounters};
use exam_metrics_core::environment::Clock;
use exam_metrics_core::error::{MetricsError, Result};
use exam_metrics_core::ids::SessionId;
use exam_metrics_core::source::SourceEventStore;
use exam_metrics_core::status::{classify_verification, derive_status};
use std::sync::Arc;

/// Computes a complete [`MetricsSnapshot`] for one session.
///
/// The source queries run concurrently and without a shared isolation
/// boundary. A snapshot taken during heavy write activity may mix pre- and
/// post-write state; the next sync converges.
pub struct MetricsCalculator<S> {
    source: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for MetricsCalculator<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: SourceEventStore> MetricsCalculator<S> {
    /// Create a calculator over `source`, deriving status against `clock`.
    #[must_use]
    pub fn new(source: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    /// Calculate the snapshot for `session_id`.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::UnknownSession`] if the session is not scheduled
    /// - [`MetricsError::Storage`] if any source query fails (no partial snapshot is returned)
    pub async fn calculate(&self, session_id: SessionId) -> Result<MetricsSnapshot> {
        let schedule = self
            .source
            .session_schedule(session_id)
            .await?
            .ok_or(MetricsError::UnknownSession(session_id))?;

        let (expected, attendance, scripts, invigilators, incidents, capacity) = tokio::try_join!(
            self.source.expected_count(session_id),
            self.source.attendance(session_id),
            self.source.script_counts(session_id),
            self.source.invigilator_counts(session_id),
            self.source.incident_counts(session_id),
            self.source.allocated_capacity(session_id),
        )?;

        let session_status = derive_status(
            self.clock.now(),
            schedule.scheduled_start,
            schedule.scheduled_end,
            schedule.admin_cancelled,
            schedule.admin_postponed,
        );
        let counters = SessionCounters::from_source(expected, &attendance, &scripts, &invigilators);

        Ok(MetricsSnapshot {
            session_id,
            scope: schedule.scope,
            counters,
            has_incidents: incidents.total > 0,
            has_unresolved_incidents: incidents.unresolved > 0,
            capacity_exceeded: expected > capacity,
            session_status,
            data_verification_status: classify_verification(
                session_status,
                counters.total_expected,
                counters.total_present,
            ),
            last_incident_at: incidents.last_reported_at,
            scheduled_start: schedule.scheduled_start,
            scheduled_end: schedule.scheduled_end,
        })
    }
}
