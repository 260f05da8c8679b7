//! `PostgreSQL` storage for the exam metrics engine.
//!
//! This crate provides sqlx-backed implementations of every storage seam in
//! `exam-metrics-core`:
//!
//! - [`PostgresSourceEventStore`]: narrow read queries over registrations,
//!   check-ins, scripts, invigilator assignments, incidents and rooms
//! - [`PostgresSessionMetricsStore`]: the `session_metrics` aggregate table,
//!   with every delta applied as one `col = col + n` statement, plus the
//!   transactional incident writer
//!
//! Both stores share one connection pool.
//!
//! # Example
//!
//! ```ignore
//! use exam_metrics_postgres::{PoolSettings, PostgresSessionMetricsStore, connect, migrate};
//!
//! let pool = connect(&PoolSettings::new("postgres://localhost/exams")).await?;
//! migrate(&pool).await?;
//! let store = PostgresSessionMetricsStore::new(pool.clone());
//! ```

#![forbid(unsafe_code)]

mod incidents;
pub mod metrics_store;
pub mod source;

pub use metrics_store::PostgresSessionMetricsStore;
pub use source::PostgresSourceEventStore;
pub use sqlx::PgPool;

use exam_metrics_core::error::{MetricsError, Result};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

impl PoolSettings {
    /// Settings for `url` with default pool sizes (10 max, 2 min, 30s timeout).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: 30,
        }
    }
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`MetricsError::Storage`] if the database cannot be reached.
pub async fn connect(settings: &PoolSettings) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.connect_timeout))
        .connect(&settings.url)
        .await
        .map_err(|e| MetricsError::Storage(format!("Failed to connect: {e}")))
}

/// Run the bundled migrations (source tables and `session_metrics`).
///
/// # Errors
///
/// Returns [`MetricsError::Storage`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| MetricsError::Storage(format!("Migration failed: {e}")))?;
    Ok(())
}

/// Map a sqlx error to [`MetricsError::Storage`], counting it per operation.
pub(crate) fn storage_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> MetricsError {
    move |e| {
        metrics::counter!("exam_metrics_store_errors_total", "operation" => operation).increment(1);
        MetricsError::Storage(format!("Failed to {operation}: {e}"))
    }
}
