//! Incremental updates: one atomic delta per real-world event.
//!
//! Every operation here is business-critical. A storage failure is returned to
//! the caller as a hard error, because a lost delta leaves drift that only the
//! next sync repairs. The broadcast that follows a successful write is
//! best-effort and never affects the result.

use crate::broadcaster::announce;
use crate::metrics::UpdateMetrics;
use exam_metrics_core::aggregate::{MetricsDelta, SessionMetrics};
use exam_metrics_core::broadcast::{EventPublisher, events};
use exam_metrics_core::environment::Clock;
use exam_metrics_core::error::{MetricsError, Result};
use exam_metrics_core::ids::SessionId;
use exam_metrics_core::status::SessionStatus;
use exam_metrics_core::store::{IncidentRecorder, IncidentReport, SessionMetricsStore};
use std::sync::Arc;

/// Applies single-event deltas to stored aggregates.
///
/// # Example
///
/// ```ignore
/// let updater = IncrementalUpdater::new(store, publisher, clock);
///
/// updater.record_presence(session_id, false).await?;
/// updater.record_script_submission(session_id).await?;
/// ```
pub struct IncrementalUpdater<M> {
    store: Arc<M>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl<M> Clone for IncrementalUpdater<M> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<M> IncrementalUpdater<M>
where
    M: SessionMetricsStore + IncidentRecorder,
{
    /// Create an updater writing to `store` and announcing on `publisher`.
    #[must_use]
    pub fn new(store: Arc<M>, publisher: Arc<dyn EventPublisher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    /// A candidate checked in.
    ///
    /// `totalPresent += 1`, `totalAbsent -= 1`, and `totalLateArrivals += 1` when late.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`] if the session has no aggregate
    /// - [`MetricsError::Storage`] if the write fails
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn record_presence(
        &self,
        session_id: SessionId,
        late: bool,
    ) -> Result<SessionMetrics> {
        self.apply(session_id, MetricsDelta::Presence { late }).await
    }

    /// A script was handed in.
    ///
    /// `scriptsSubmitted += 1`, `scriptsCollected += 1`, `scriptsPending -= 1`.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`] if the session has no aggregate
    /// - [`MetricsError::Storage`] if the write fails
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn record_script_submission(&self, session_id: SessionId) -> Result<SessionMetrics> {
        self.apply(session_id, MetricsDelta::ScriptSubmission).await
    }

    /// An invigilator was marked present (`true`) or absent (`false`).
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`] if the session has no aggregate
    /// - [`MetricsError::Storage`] if the write fails
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn record_invigilator_presence(
        &self,
        session_id: SessionId,
        present: bool,
    ) -> Result<SessionMetrics> {
        self.apply(session_id, MetricsDelta::InvigilatorPresence { present })
            .await
    }

    /// Incident flags changed.
    ///
    /// Sets `hasIncidents`, overwrites `hasUnresolvedIncidents` and stamps
    /// `lastIncidentAt`.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`] if the session has no aggregate
    /// - [`MetricsError::Storage`] if the write fails
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn set_incident_flags(
        &self,
        session_id: SessionId,
        has_unresolved: bool,
    ) -> Result<SessionMetrics> {
        self.apply(session_id, MetricsDelta::IncidentFlags { has_unresolved })
            .await
    }

    /// Record an incident with its affected candidates and update the flags,
    /// all in one unit.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`] if the session has no aggregate
    /// - [`MetricsError::Storage`] if any row fails; nothing is written
    #[tracing::instrument(
        skip(self, report),
        fields(session_id = %report.session_id),
        level = "debug"
    )]
    pub async fn report_incident(&self, report: &IncidentReport) -> Result<SessionMetrics> {
        const OPERATION: &str = "report_incident";

        match self.store.record_incident(report, self.clock.now()).await {
            Ok(metrics) => {
                UpdateMetrics::record_update(OPERATION);
                announce(self.publisher.as_ref(), &metrics, events::INCIDENT_REPORTED);
                Ok(metrics)
            }
            Err(e) => Err(Self::failed(OPERATION, report.session_id, e)),
        }
    }

    /// Administratively move the session to `next` (e.g. `POSTPONED`).
    ///
    /// Entering `COMPLETED` classifies attendance from the stored counters.
    ///
    /// The write is a compare-and-set against the status read here, so a
    /// concurrent status change is never overwritten with a stale decision.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::NotFound`] if the session has no aggregate
    /// - [`MetricsError::InvalidTransition`] if `next` is not reachable from
    ///   the stored status, or the stored status changed underneath
    /// - [`MetricsError::Storage`] if the write fails
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn override_status(
        &self,
        session_id: SessionId,
        next: SessionStatus,
    ) -> Result<SessionMetrics> {
        const OPERATION: &str = "override_status";

        let result = async {
            let current = self
                .store
                .fetch(session_id)
                .await?
                .ok_or(MetricsError::NotFound(session_id))?
                .session_status;
            current.ensure_transition(session_id, next)?;

            self.store
                .set_status(session_id, current, next, self.clock.now())
                .await?
                .ok_or(MetricsError::InvalidTransition {
                    session_id,
                    from: current,
                    to: next,
                })
        }
        .await;

        match result {
            Ok(metrics) => {
                UpdateMetrics::record_update(OPERATION);
                tracing::info!(%session_id, status = %next, "Session status overridden");
                announce(self.publisher.as_ref(), &metrics, events::STATUS_CHANGED);
                Ok(metrics)
            }
            Err(e) => Err(Self::failed(OPERATION, session_id, e)),
        }
    }

    async fn apply(&self, session_id: SessionId, delta: MetricsDelta) -> Result<SessionMetrics> {
        let operation = delta.operation();

        match self
            .store
            .apply_delta(session_id, delta, self.clock.now())
            .await
        {
            Ok(metrics) => {
                UpdateMetrics::record_update(operation);
                announce(self.publisher.as_ref(), &metrics, delta.event_name());
                Ok(metrics)
            }
            Err(e) => Err(Self::failed(operation, session_id, e)),
        }
    }

    fn failed(operation: &'static str, session_id: SessionId, error: MetricsError) -> MetricsError {
        tracing::warn!(%session_id, operation, error = %error, "Incremental update failed");
        UpdateMetrics::record_error(operation, error.kind());
        error
    }
}
