//! Initialization and full recomputation of aggregates.
//!
//! Sync is the repair path for every kind of drift: missed deltas, deltas
//! applied out of order, or an aggregate written while source queries were
//! mid-flight. It is idempotent, so batches can be interrupted and re-run.

use crate::broadcaster::announce;
use crate::calculator::MetricsCalculator;
use crate::metrics::SyncMetrics;
use exam_metrics_core::aggregate::SessionMetrics;
use exam_metrics_core::broadcast::{EventPublisher, events};
use exam_metrics_core::environment::Clock;
use exam_metrics_core::error::{MetricsError, Result};
use exam_metrics_core::ids::SessionId;
use exam_metrics_core::source::SourceEventStore;
use exam_metrics_core::status::SessionStatus;
use exam_metrics_core::store::SessionMetricsStore;
use std::sync::Arc;
use std::time::Instant;

/// Conditional writes a sync attempts before giving up on a contended session.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// One session that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// The failing session
    pub session_id: SessionId,
    /// Why it failed
    pub error: MetricsError,
}

/// Outcome of a batch run.
///
/// A batch never fails as a whole because one member failed; failures are
/// collected here instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Sessions written by this run
    pub succeeded: Vec<SessionId>,
    /// Sessions left untouched because they were already initialized
    pub skipped: Vec<SessionId>,
    /// Sessions that failed
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    /// Number of sessions the batch looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    /// Whether every member succeeded or was skipped.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Convert into a hard result for callers that need one (e.g. an exit code).
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::PartialBatchFailure`] if any member failed.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(MetricsError::PartialBatchFailure {
                failed: self.failed.len(),
                total: self.total(),
            })
        }
    }
}

/// Creates aggregates and rebuilds them from source truth.
pub struct Reconciler<S, M> {
    source: Arc<S>,
    store: Arc<M>,
    calculator: MetricsCalculator<S>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl<S, M> Reconciler<S, M>
where
    S: SourceEventStore,
    M: SessionMetricsStore,
{
    /// Create a reconciler reading `source` and writing `store`.
    #[must_use]
    pub fn new(
        source: Arc<S>,
        store: Arc<M>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let calculator = MetricsCalculator::new(Arc::clone(&source), Arc::clone(&clock));
        Self {
            source,
            store,
            calculator,
            publisher,
            clock,
        }
    }

    /// Create a fresh aggregate: everyone absent, every script pending,
    /// `NOT_STARTED` / `PENDING`.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::InvalidInitialization`] if an aggregate already exists
    /// - [`MetricsError::UnknownSession`] if the session is not scheduled
    /// - [`MetricsError::Storage`] if a query or the write fails
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn initialize(
        &self,
        session_id: SessionId,
        total_expected: i32,
    ) -> Result<SessionMetrics> {
        let schedule = self
            .source
            .session_schedule(session_id)
            .await?
            .ok_or(MetricsError::UnknownSession(session_id))?;

        let now = self.clock.now();
        let metrics = SessionMetrics::initialized(session_id, schedule.scope, total_expected, now);
        self.store.insert_new(&metrics).await?;

        SyncMetrics::record_initialization();
        announce(self.publisher.as_ref(), &metrics, events::METRICS_INITIALIZED);
        Ok(metrics)
    }

    /// Recompute the aggregate from source truth and overwrite it.
    ///
    /// Creates the aggregate when none exists. A stored `session_started_at`
    /// / `session_ended_at` is kept. When the derived status is not reachable
    /// from the stored one (e.g. a cancelled session whose source flags were
    /// never set), the stored status is kept and everything else is still
    /// rewritten from the snapshot.
    ///
    /// The write is conditional on the status read here. If a concurrent
    /// status change lands in between, the sync starts over from the read.
    ///
    /// # Errors
    ///
    /// - [`MetricsError::UnknownSession`] if the session is not scheduled
    /// - [`MetricsError::InvalidTransition`] if the stored status keeps
    ///   changing underneath for [`MAX_WRITE_ATTEMPTS`] attempts
    /// - [`MetricsError::Storage`] if a query or the write fails
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn sync(&self, session_id: SessionId) -> Result<SessionMetrics> {
        let started = Instant::now();

        let result = self.sync_inner(session_id).await;
        match &result {
            Ok(_) => SyncMetrics::record_sync(started.elapsed()),
            Err(e) => SyncMetrics::record_error(e.kind()),
        }
        result
    }

    async fn sync_inner(&self, session_id: SessionId) -> Result<SessionMetrics> {
        let snapshot = self.calculator.calculate(session_id).await?;
        let derived = snapshot.session_status;

        let mut attempt = 1;
        loop {
            let previous = self.store.fetch(session_id).await?;
            let expected = previous.as_ref().map(|p| p.session_status);

            let snapshot = match expected {
                Some(stored) if !stored.can_transition_to(derived) => {
                    tracing::warn!(
                        %session_id,
                        stored = %stored,
                        derived = %derived,
                        "Derived status unreachable, keeping stored status"
                    );
                    snapshot.clone().with_status(stored)
                }
                _ => snapshot.clone(),
            };
            let metrics =
                SessionMetrics::from_snapshot(&snapshot, previous.as_ref(), self.clock.now());

            if let Some(stored) = self.store.upsert(&metrics, expected).await? {
                announce(self.publisher.as_ref(), &stored, events::METRICS_SYNCED);
                return Ok(stored);
            }

            if attempt == MAX_WRITE_ATTEMPTS {
                // A row that appeared since the read was inserted NOT_STARTED.
                return Err(MetricsError::InvalidTransition {
                    session_id,
                    from: expected.unwrap_or(SessionStatus::NotStarted),
                    to: metrics.session_status,
                });
            }
            tracing::debug!(%session_id, attempt, "Stored status changed during sync, retrying");
            attempt += 1;
        }
    }

    /// Sync each session independently, in order.
    ///
    /// A failing session is logged, recorded in the report and skipped.
    pub async fn batch_sync(&self, session_ids: &[SessionId]) -> BatchReport {
        let mut report = BatchReport::default();

        for &session_id in session_ids {
            match self.sync(session_id).await {
                Ok(_) => report.succeeded.push(session_id),
                Err(error) => {
                    tracing::warn!(%session_id, error = %error, "Sync failed, continuing batch");
                    report.failed.push(BatchFailure { session_id, error });
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Batch sync finished"
        );
        report
    }

    /// Initialize every scheduled session that has no aggregate yet.
    ///
    /// The expected count comes from the source registrations. Sessions that
    /// gain an aggregate concurrently are reported as skipped.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`] only if the session list itself cannot
    /// be read; per-session failures go into the report.
    pub async fn initialize_missing(&self) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for session_id in self.source.session_ids().await? {
            match self.initialize_if_missing(session_id).await {
                Ok(true) => report.succeeded.push(session_id),
                Ok(false) | Err(MetricsError::InvalidInitialization(_)) => {
                    report.skipped.push(session_id);
                }
                Err(error) => {
                    tracing::warn!(
                        %session_id,
                        error = %error,
                        "Initialization failed, continuing batch"
                    );
                    report.failed.push(BatchFailure { session_id, error });
                }
            }
        }

        tracing::info!(
            initialized = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Initialize-missing finished"
        );
        Ok(report)
    }

    async fn initialize_if_missing(&self, session_id: SessionId) -> Result<bool> {
        if self.store.fetch(session_id).await?.is_some() {
            return Ok(false);
        }
        let expected = self.source.expected_count(session_id).await?;
        self.initialize(session_id, expected).await?;
        Ok(true)
    }

    /// Sync every scheduled session.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Storage`] only if the session list itself cannot
    /// be read; per-session failures go into the report.
    pub async fn recompute_all(&self) -> Result<BatchReport> {
        let session_ids = self.source.session_ids().await?;
        Ok(self.batch_sync(&session_ids).await)
    }
}
