//! Exam-session metrics admin CLI.
//!
//! Runs migrations and the batch reconciliation entrypoints against the
//! configured database. Exits non-zero when any session in a batch fails.

use anyhow::Context;
use clap::Parser;
use exam_metrics_admin::{Cli, Command, Config};
use exam_metrics_core::broadcast::EventPublisher;
use exam_metrics_core::environment::{Clock, SystemClock};
use exam_metrics_core::ids::SessionId;
use exam_metrics_postgres::{PgPool, PostgresSessionMetricsStore, PostgresSourceEventStore};
use exam_metrics_runtime::metrics::MetricsServer;
use exam_metrics_runtime::{BatchReport, BroadcastDispatcher, Reconciler, TopicBroadcaster};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut metrics_server = MetricsServer::new(config.metrics_addr);
    if cli.print_metrics {
        metrics_server.start().context("Failed to install metrics recorder")?;
    }

    info!(command = ?cli.command, "Starting exam metrics admin");

    let pool = exam_metrics_postgres::connect(&config.postgres.pool_settings())
        .await
        .context("Failed to connect to database")?;

    let result = match cli.command {
        Command::Migrate => {
            exam_metrics_postgres::migrate(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Migrations applied");
            Ok(())
        }
        command => run_batch(&config, pool, command).await,
    };

    if cli.print_metrics {
        if let Some(rendered) = metrics_server.render() {
            println!("{rendered}");
        }
    }

    result
}

async fn run_batch(config: &Config, pool: PgPool, command: Command) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (handle, dispatcher) = BroadcastDispatcher::spawn(
        TopicBroadcaster::new(config.broadcast.channel_capacity),
        config.broadcast.queue_capacity,
        Arc::clone(&clock),
    );
    let publisher: Arc<dyn EventPublisher> = Arc::new(handle);

    let reconciler = Reconciler::new(
        Arc::new(PostgresSourceEventStore::new(pool.clone())),
        Arc::new(PostgresSessionMetricsStore::new(pool)),
        publisher,
        clock,
    );

    let report = match command {
        Command::InitMissing => reconciler.initialize_missing().await?,
        Command::RecomputeAll => reconciler.recompute_all().await?,
        Command::Sync { sessions } => {
            let ids: Vec<SessionId> = sessions.into_iter().map(SessionId::new).collect();
            reconciler.batch_sync(&ids).await
        }
        Command::Migrate => BatchReport::default(),
    };

    // Dropping the last publisher lets the dispatch task drain and stop.
    drop(reconciler);
    dispatcher.await.context("Broadcast dispatcher panicked")?;

    log_report(&report);
    report.into_result()?;
    Ok(())
}

fn log_report(report: &BatchReport) {
    info!(
        total = report.total(),
        succeeded = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Batch complete"
    );
    for failure in &report.failed {
        error!(session_id = %failure.session_id, error = %failure.error, "Session failed");
    }
}
