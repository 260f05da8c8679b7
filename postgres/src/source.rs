//! `PostgreSQL`-backed source event store.

use crate::storage_error;
use chrono::{DateTime, NaiveDate, Utc};
use exam_metrics_core::aggregate::SessionScope;
use exam_metrics_core::error::Result;
use exam_metrics_core::ids::{InstitutionId, SessionId, TimetableId, VenueId};
use exam_metrics_core::source::{
    AttendanceCounts, IncidentCounts, InvigilatorCounts, ScriptCounts, SessionSchedule,
    SourceEventStore,
};
use sqlx::PgPool;

/// Row shape of `exam_sessions`.
#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    institution_id: i64,
    venue_id: i64,
    timetable_id: Option<i64>,
    exam_date: NaiveDate,
    scheduled_start: DateTime<Utc>,
    scheduled_end: DateTime<Utc>,
    admin_cancelled: bool,
    admin_postponed: bool,
}

impl From<ScheduleRow> for SessionSchedule {
    fn from(row: ScheduleRow) -> Self {
        Self {
            session_id: SessionId::new(row.id),
            scope: SessionScope {
                institution_id: InstitutionId::new(row.institution_id),
                venue_id: VenueId::new(row.venue_id),
                timetable_id: row.timetable_id.map(TimetableId::new),
                exam_date: row.exam_date,
            },
            scheduled_start: row.scheduled_start,
            scheduled_end: row.scheduled_end,
            admin_cancelled: row.admin_cancelled,
            admin_postponed: row.admin_postponed,
        }
    }
}

/// Read-only queries over the source tables.
///
/// Counts are computed in SQL; nothing is loaded row by row.
#[derive(Clone)]
pub struct PostgresSourceEventStore {
    pool: PgPool,
}

impl PostgresSourceEventStore {
    /// Create a source store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SourceEventStore for PostgresSourceEventStore {
    async fn session_schedule(&self, session_id: SessionId) -> Result<Option<SessionSchedule>> {
        let row: Option<ScheduleRow> = sqlx::query_as(
            "SELECT id, institution_id, venue_id, timetable_id, exam_date,
                    scheduled_start, scheduled_end, admin_cancelled, admin_postponed
             FROM exam_sessions
             WHERE id = $1",
        )
        .bind(session_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("load session schedule"))?;

        Ok(row.map(SessionSchedule::from))
    }

    async fn expected_count(&self, session_id: SessionId) -> Result<i32> {
        let (count,): (i32,) =
            sqlx::query_as("SELECT COUNT(*)::int FROM registrations WHERE session_id = $1")
                .bind(session_id.get())
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error("count registrations"))?;

        Ok(count)
    }

    async fn attendance(&self, session_id: SessionId) -> Result<AttendanceCounts> {
        // Rows without the explicit flag predate it; their notes decide.
        let (present, late): (i32, i32) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE is_present)::int,
                    COUNT(*) FILTER (
                        WHERE is_present AND COALESCE(is_late, notes ILIKE '%late%', FALSE)
                    )::int
             FROM check_ins
             WHERE session_id = $1",
        )
        .bind(session_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error("count check-ins"))?;

        Ok(AttendanceCounts { present, late })
    }

    async fn script_counts(&self, session_id: SessionId) -> Result<ScriptCounts> {
        let (submitted, collected): (i32, i32) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE status IN ('SUBMITTED', 'COLLECTED', 'VERIFIED'))::int,
                    COUNT(*) FILTER (WHERE status IN ('COLLECTED', 'VERIFIED'))::int
             FROM scripts
             WHERE session_id = $1",
        )
        .bind(session_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error("count scripts"))?;

        Ok(ScriptCounts {
            submitted,
            collected,
        })
    }

    async fn invigilator_counts(&self, session_id: SessionId) -> Result<InvigilatorCounts> {
        let (assigned, present): (i32, i32) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE status <> 'REMOVED')::int,
                    COUNT(*) FILTER (WHERE status = 'PRESENT')::int
             FROM invigilator_assignments
             WHERE session_id = $1",
        )
        .bind(session_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error("count invigilators"))?;

        Ok(InvigilatorCounts { assigned, present })
    }

    async fn incident_counts(&self, session_id: SessionId) -> Result<IncidentCounts> {
        let (total, unresolved, last_reported_at): (i32, i32, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT COUNT(*)::int,
                        COUNT(*) FILTER (WHERE status <> 'RESOLVED')::int,
                        MAX(reported_at)
                 FROM incidents
                 WHERE session_id = $1",
            )
            .bind(session_id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error("count incidents"))?;

        Ok(IncidentCounts {
            total,
            unresolved,
            last_reported_at,
        })
    }

    async fn allocated_capacity(&self, session_id: SessionId) -> Result<i32> {
        let (capacity,): (i32,) = sqlx::query_as(
            "SELECT COALESCE(SUM(r.capacity), 0)::int
             FROM session_room_allocations a
             JOIN rooms r ON r.id = a.room_id
             WHERE a.session_id = $1",
        )
        .bind(session_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error("sum room capacity"))?;

        Ok(capacity)
    }

    async fn session_ids(&self) -> Result<Vec<SessionId>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM exam_sessions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("list sessions"))?;

        Ok(rows.into_iter().map(|(id,)| SessionId::new(id)).collect())
    }
}
