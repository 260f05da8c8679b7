//! Read-only roll-up of many aggregates into one dashboard view.

use exam_metrics_core::aggregate::SessionMetrics;
use exam_metrics_core::error::Result;
use exam_metrics_core::status::SessionStatus;
use exam_metrics_core::store::{SessionFilter, SessionMetricsStore};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Totals across a set of sessions (an institution, a venue, a day...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    /// Sessions folded in
    pub sessions: usize,
    /// Sum of `totalExpected`
    pub total_expected: i64,
    /// Sum of `totalPresent`
    pub total_present: i64,
    /// Sum of `totalAbsent`
    pub total_absent: i64,
    /// Sum of `totalLateArrivals`
    pub total_late_arrivals: i64,
    /// Sum of `scriptsSubmitted`
    pub scripts_submitted: i64,
    /// Sum of `scriptsPending`
    pub scripts_pending: i64,
    /// Sum of `invigilatorsAssigned`
    pub invigilators_assigned: i64,
    /// Sum of `invigilatorsPresent`
    pub invigilators_present: i64,
    /// Sessions with at least one unresolved incident
    pub sessions_with_unresolved_incidents: usize,
    /// Sessions whose expected count exceeds room capacity
    pub sessions_over_capacity: usize,
    /// Session count per status
    pub by_status: BTreeMap<String, usize>,
}

impl DashboardSummary {
    /// Fold a stream of aggregates.
    pub async fn from_stream<St>(snapshots: St) -> Self
    where
        St: Stream<Item = SessionMetrics>,
    {
        snapshots
            .fold(Self::default(), |mut summary, metrics| async move {
                summary.add(&metrics);
                summary
            })
            .await
    }

    /// Fold one aggregate into the totals.
    pub fn add(&mut self, metrics: &SessionMetrics) {
        let c = &metrics.counters;
        self.sessions += 1;
        self.total_expected += i64::from(c.total_expected);
        self.total_present += i64::from(c.total_present);
        self.total_absent += i64::from(c.total_absent);
        self.total_late_arrivals += i64::from(c.total_late_arrivals);
        self.scripts_submitted += i64::from(c.scripts_submitted);
        self.scripts_pending += i64::from(c.scripts_pending);
        self.invigilators_assigned += i64::from(c.invigilators_assigned);
        self.invigilators_present += i64::from(c.invigilators_present);
        if metrics.has_unresolved_incidents {
            self.sessions_with_unresolved_incidents += 1;
        }
        if metrics.capacity_exceeded {
            self.sessions_over_capacity += 1;
        }
        *self
            .by_status
            .entry(metrics.session_status.as_str().to_string())
            .or_default() += 1;
    }

    /// Sessions currently in `status`.
    #[must_use]
    pub fn count(&self, status: SessionStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Present over expected, or `None` when nobody is expected.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Headcounts are far below 2^52
    pub fn attendance_rate(&self) -> Option<f64> {
        (self.total_expected > 0).then(|| self.total_present as f64 / self.total_expected as f64)
    }
}

/// Fetch every aggregate matching `filter` and fold it.
///
/// # Errors
///
/// Returns the store's error if the fetch fails.
pub async fn summarize<M: SessionMetricsStore>(
    store: &M,
    filter: &SessionFilter,
) -> Result<DashboardSummary> {
    let snapshots = store.fetch_many(filter).await?;
    Ok(DashboardSummary::from_stream(stream::iter(snapshots)).await)
}
