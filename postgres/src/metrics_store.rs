//! `PostgreSQL`-backed aggregate store.
//!
//! # Atomic Deltas
//!
//! Each [`MetricsDelta`] is one `UPDATE ... SET col = col + n ... RETURNING`
//! statement. Postgres serializes concurrent updates of the same row on the
//! row lock, so interleaved deltas never overwrite each other.

use crate::storage_error;
use chrono::{DateTime, NaiveDate, Utc};
use exam_metrics_core::aggregate::{MetricsDelta, SessionCounters, SessionMetrics, SessionScope};
use exam_metrics_core::error::{MetricsError, Result};
use exam_metrics_core::ids::{InstitutionId, SessionId, TimetableId, VenueId};
use exam_metrics_core::status::{
    FAILED_THRESHOLD_PERCENT, SessionStatus, VERIFIED_THRESHOLD_PERCENT, VerificationStatus,
};
use exam_metrics_core::store::{SessionFilter, SessionMetricsStore};
use sqlx::PgPool;

/// Column list shared by every query returning a full row.
pub(crate) const COLUMNS: &str = "session_id, institution_id, venue_id, timetable_id, exam_date, \
     total_expected, total_present, total_absent, total_late_arrivals, \
     scripts_submitted, scripts_collected, scripts_pending, \
     invigilators_assigned, invigilators_present, invigilators_absent, \
     has_incidents, has_unresolved_incidents, capacity_exceeded, \
     session_status, data_verification_status, \
     session_started_at, session_ended_at, last_synced_at, last_incident_at";

/// Row shape of `session_metrics`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MetricsRow {
    session_id: i64,
    institution_id: i64,
    venue_id: i64,
    timetable_id: Option<i64>,
    exam_date: NaiveDate,
    total_expected: i32,
    total_present: i32,
    total_absent: i32,
    total_late_arrivals: i32,
    scripts_submitted: i32,
    scripts_collected: i32,
    scripts_pending: i32,
    invigilators_assigned: i32,
    invigilators_present: i32,
    invigilators_absent: i32,
    has_incidents: bool,
    has_unresolved_incidents: bool,
    capacity_exceeded: bool,
    session_status: String,
    data_verification_status: String,
    session_started_at: Option<DateTime<Utc>>,
    session_ended_at: Option<DateTime<Utc>>,
    last_synced_at: DateTime<Utc>,
    last_incident_at: Option<DateTime<Utc>>,
}

impl TryFrom<MetricsRow> for SessionMetrics {
    type Error = MetricsError;

    fn try_from(row: MetricsRow) -> Result<Self> {
        Ok(Self {
            session_id: SessionId::new(row.session_id),
            scope: SessionScope {
                institution_id: InstitutionId::new(row.institution_id),
                venue_id: VenueId::new(row.venue_id),
                timetable_id: row.timetable_id.map(TimetableId::new),
                exam_date: row.exam_date,
            },
            counters: SessionCounters {
                total_expected: row.total_expected,
                total_present: row.total_present,
                total_absent: row.total_absent,
                total_late_arrivals: row.total_late_arrivals,
                scripts_submitted: row.scripts_submitted,
                scripts_collected: row.scripts_collected,
                scripts_pending: row.scripts_pending,
                invigilators_assigned: row.invigilators_assigned,
                invigilators_present: row.invigilators_present,
                invigilators_absent: row.invigilators_absent,
            },
            has_incidents: row.has_incidents,
            has_unresolved_incidents: row.has_unresolved_incidents,
            capacity_exceeded: row.capacity_exceeded,
            session_status: SessionStatus::parse(&row.session_status)?,
            data_verification_status: VerificationStatus::parse(&row.data_verification_status)?,
            session_started_at: row.session_started_at,
            session_ended_at: row.session_ended_at,
            last_synced_at: row.last_synced_at,
            last_incident_at: row.last_incident_at,
        })
    }
}

/// Aggregate store over the `session_metrics` table.
///
/// Also implements [`IncidentRecorder`](exam_metrics_core::store::IncidentRecorder),
/// since an incident report and the aggregate's flags commit together.
#[derive(Clone)]
pub struct PostgresSessionMetricsStore {
    pool: PgPool,
}

impl PostgresSessionMetricsStore {
    /// Create an aggregate store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, session_id: SessionId) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM session_metrics WHERE session_id = $1)")
                .bind(session_id.get())
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error("check aggregate"))?;
        Ok(exists)
    }
}

/// Bind every column of `metrics`, in [`COLUMNS`] order, as `$1..$24`.
fn bind_all<'q>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, MetricsRow, sqlx::postgres::PgArguments>,
    metrics: &SessionMetrics,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, MetricsRow, sqlx::postgres::PgArguments> {
    let c = &metrics.counters;
    query
        .bind(metrics.session_id.get())
        .bind(metrics.scope.institution_id.get())
        .bind(metrics.scope.venue_id.get())
        .bind(metrics.scope.timetable_id.map(TimetableId::get))
        .bind(metrics.scope.exam_date)
        .bind(c.total_expected)
        .bind(c.total_present)
        .bind(c.total_absent)
        .bind(c.total_late_arrivals)
        .bind(c.scripts_submitted)
        .bind(c.scripts_collected)
        .bind(c.scripts_pending)
        .bind(c.invigilators_assigned)
        .bind(c.invigilators_present)
        .bind(c.invigilators_absent)
        .bind(metrics.has_incidents)
        .bind(metrics.has_unresolved_incidents)
        .bind(metrics.capacity_exceeded)
        .bind(metrics.session_status.as_str())
        .bind(metrics.data_verification_status.as_str())
        .bind(metrics.session_started_at)
        .bind(metrics.session_ended_at)
        .bind(metrics.last_synced_at)
        .bind(metrics.last_incident_at)
}

/// Third bind parameter of a delta statement, if any.
enum DeltaArgument {
    None,
    Step(i32),
    Flag(bool),
}

const PLACEHOLDERS: &str = "$1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
     $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24";

impl SessionMetricsStore for PostgresSessionMetricsStore {
    async fn fetch(&self, session_id: SessionId) -> Result<Option<SessionMetrics>> {
        let query = format!("SELECT {COLUMNS} FROM session_metrics WHERE session_id = $1");

        let row: Option<MetricsRow> = sqlx::query_as(&query)
            .bind(session_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("fetch aggregate"))?;

        row.map(SessionMetrics::try_from).transpose()
    }

    async fn fetch_many(&self, filter: &SessionFilter) -> Result<Vec<SessionMetrics>> {
        let query = format!(
            "SELECT {COLUMNS} FROM session_metrics
             WHERE ($1::bigint IS NULL OR institution_id = $1)
               AND ($2::bigint IS NULL OR venue_id = $2)
               AND ($3::date IS NULL OR exam_date = $3)
               AND ($4::bigint IS NULL OR timetable_id = $4)
             ORDER BY session_id"
        );

        let rows: Vec<MetricsRow> = sqlx::query_as(&query)
            .bind(filter.institution_id.map(InstitutionId::get))
            .bind(filter.venue_id.map(VenueId::get))
            .bind(filter.exam_date)
            .bind(filter.timetable_id.map(TimetableId::get))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("fetch aggregates"))?;

        rows.into_iter().map(SessionMetrics::try_from).collect()
    }

    async fn insert_new(&self, metrics: &SessionMetrics) -> Result<()> {
        let query = format!(
            "INSERT INTO session_metrics ({COLUMNS}) VALUES ({PLACEHOLDERS})
             ON CONFLICT (session_id) DO NOTHING
             RETURNING {COLUMNS}"
        );

        let inserted: Option<MetricsRow> = bind_all(sqlx::query_as(&query), metrics)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("insert aggregate"))?;

        match inserted {
            Some(_) => Ok(()),
            None => Err(MetricsError::InvalidInitialization(metrics.session_id)),
        }
    }

    async fn upsert(
        &self,
        metrics: &SessionMetrics,
        expected: Option<SessionStatus>,
    ) -> Result<Option<SessionMetrics>> {
        let query = format!(
            "INSERT INTO session_metrics ({COLUMNS}) VALUES ({PLACEHOLDERS})
             ON CONFLICT (session_id) DO UPDATE SET
                institution_id = EXCLUDED.institution_id,
                venue_id = EXCLUDED.venue_id,
                timetable_id = EXCLUDED.timetable_id,
                exam_date = EXCLUDED.exam_date,
                total_expected = EXCLUDED.total_expected,
                total_present = EXCLUDED.total_present,
                total_absent = EXCLUDED.total_absent,
                total_late_arrivals = EXCLUDED.total_late_arrivals,
                scripts_submitted = EXCLUDED.scripts_submitted,
                scripts_collected = EXCLUDED.scripts_collected,
                scripts_pending = EXCLUDED.scripts_pending,
                invigilators_assigned = EXCLUDED.invigilators_assigned,
                invigilators_present = EXCLUDED.invigilators_present,
                invigilators_absent = EXCLUDED.invigilators_absent,
                has_incidents = EXCLUDED.has_incidents,
                has_unresolved_incidents = EXCLUDED.has_unresolved_incidents,
                capacity_exceeded = EXCLUDED.capacity_exceeded,
                session_status = EXCLUDED.session_status,
                data_verification_status = EXCLUDED.data_verification_status,
                session_started_at =
                    COALESCE(session_metrics.session_started_at, EXCLUDED.session_started_at),
                session_ended_at =
                    COALESCE(session_metrics.session_ended_at, EXCLUDED.session_ended_at),
                last_synced_at = EXCLUDED.last_synced_at,
                last_incident_at = EXCLUDED.last_incident_at
             WHERE session_metrics.session_status = $25::text
             RETURNING {COLUMNS}"
        );

        // A NULL `$25` never matches, so an unexpected existing row is left alone.
        let row: Option<MetricsRow> = bind_all(sqlx::query_as(&query), metrics)
            .bind(expected.map(|status| status.as_str()))
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("upsert aggregate"))?;

        row.map(SessionMetrics::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(operation = delta.operation()), level = "trace")]
    async fn apply_delta(
        &self,
        session_id: SessionId,
        delta: MetricsDelta,
        at: DateTime<Utc>,
    ) -> Result<SessionMetrics> {
        let (set, argument) = match delta {
            MetricsDelta::Presence { late } => (
                "total_present = total_present + 1,
                 total_absent = total_absent - 1,
                 total_late_arrivals = total_late_arrivals + $3::int",
                DeltaArgument::Step(i32::from(late)),
            ),
            MetricsDelta::ScriptSubmission => (
                "scripts_submitted = scripts_submitted + 1,
                 scripts_collected = scripts_collected + 1,
                 scripts_pending = scripts_pending - 1",
                DeltaArgument::None,
            ),
            MetricsDelta::InvigilatorPresence { present } => (
                "invigilators_present = invigilators_present + $3::int,
                 invigilators_absent = invigilators_absent - $3::int",
                DeltaArgument::Step(if present { 1 } else { -1 }),
            ),
            MetricsDelta::IncidentFlags { has_unresolved } => (
                "has_incidents = TRUE,
                 has_unresolved_incidents = $3::bool,
                 last_incident_at = $2",
                DeltaArgument::Flag(has_unresolved),
            ),
        };

        let query = format!(
            "UPDATE session_metrics
             SET {set}, last_synced_at = $2
             WHERE session_id = $1
             RETURNING {COLUMNS}"
        );

        let mut statement = sqlx::query_as::<_, MetricsRow>(&query)
            .bind(session_id.get())
            .bind(at);
        statement = match argument {
            DeltaArgument::None => statement,
            DeltaArgument::Step(step) => statement.bind(step),
            DeltaArgument::Flag(flag) => statement.bind(flag),
        };

        let row = statement
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error(delta.operation()))?;

        row.ok_or(MetricsError::NotFound(session_id))
            .and_then(SessionMetrics::try_from)
    }

    async fn set_status(
        &self,
        session_id: SessionId,
        expected: SessionStatus,
        next: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<SessionMetrics>> {
        let query = format!(
            "UPDATE session_metrics
             SET session_status = $3::text,
                 session_started_at = CASE WHEN $3::text IN ('IN_PROGRESS', 'COMPLETED')
                     THEN COALESCE(session_started_at, $4) ELSE session_started_at END,
                 session_ended_at = CASE WHEN $3::text = 'COMPLETED'
                     THEN COALESCE(session_ended_at, $4) ELSE session_ended_at END,
                 data_verification_status = CASE
                     WHEN $3::text <> 'COMPLETED' THEN data_verification_status
                     WHEN total_expected <= 0 THEN 'ABSENT'
                     WHEN total_present::bigint * 100
                         >= {VERIFIED_THRESHOLD_PERCENT} * total_expected::bigint THEN 'VERIFIED'
                     WHEN total_present::bigint * 100
                         < {FAILED_THRESHOLD_PERCENT} * total_expected::bigint THEN 'FAILED'
                     ELSE 'OVERRIDDEN' END,
                 last_synced_at = $4
             WHERE session_id = $1 AND session_status = $2
             RETURNING {COLUMNS}"
        );

        let row: Option<MetricsRow> = sqlx::query_as(&query)
            .bind(session_id.get())
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("set status"))?;

        match row {
            Some(row) => SessionMetrics::try_from(row).map(Some),
            None if self.exists(session_id).await? => Ok(None),
            None => Err(MetricsError::NotFound(session_id)),
        }
    }
}
