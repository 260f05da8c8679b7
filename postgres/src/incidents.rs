//! Transactional incident writes.

use crate::metrics_store::{COLUMNS, MetricsRow, PostgresSessionMetricsStore};
use crate::storage_error;
use chrono::{DateTime, Utc};
use exam_metrics_core::aggregate::SessionMetrics;
use exam_metrics_core::error::{MetricsError, Result};
use exam_metrics_core::store::{IncidentRecorder, IncidentReport};

impl IncidentRecorder for PostgresSessionMetricsStore {
    #[tracing::instrument(
        skip(self, report),
        fields(session_id = %report.session_id),
        level = "debug"
    )]
    async fn record_incident(
        &self,
        report: &IncidentReport,
        at: DateTime<Utc>,
    ) -> Result<SessionMetrics> {
        let session_id = report.session_id.get();
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(storage_error("begin incident transaction"))?;

        // Lock the aggregate first so concurrent reports serialize on it.
        let locked: Option<(i64,)> =
            sqlx::query_as("SELECT session_id FROM session_metrics WHERE session_id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error("lock aggregate"))?;
        if locked.is_none() {
            return Err(MetricsError::NotFound(report.session_id));
        }

        let (incident_id,): (i64,) = sqlx::query_as(
            "INSERT INTO incidents (session_id, category, description, status, reported_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(session_id)
        .bind(&report.category)
        .bind(&report.description)
        .bind(report.status.as_str())
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error("insert incident"))?;

        for student in &report.affected_students {
            sqlx::query(
                "INSERT INTO incident_students (incident_id, session_id, student_id)
                 VALUES ($1, $2, $3)",
            )
            .bind(incident_id)
            .bind(session_id)
            .bind(student.get())
            .execute(&mut *tx)
            .await
            .map_err(storage_error("insert incident student"))?;
        }

        let query = format!(
            "UPDATE session_metrics
             SET has_incidents = TRUE,
                 has_unresolved_incidents = EXISTS(
                     SELECT 1 FROM incidents WHERE session_id = $1 AND status <> 'RESOLVED'
                 ),
                 last_incident_at = $2,
                 last_synced_at = $2
             WHERE session_id = $1
             RETURNING {COLUMNS}"
        );
        let row: MetricsRow = sqlx::query_as(&query)
            .bind(session_id)
            .bind(at)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_error("update incident flags"))?;

        tx.commit()
            .await
            .map_err(storage_error("commit incident transaction"))?;

        tracing::debug!(
            incident_id,
            affected = report.affected_students.len(),
            "Incident recorded"
        );
        SessionMetrics::try_from(row)
    }
}
