//! Command-line interface.

use clap::{Parser, Subcommand};

/// Top-level CLI parser for the `exam-metrics-admin` binary.
#[derive(Debug, Parser)]
#[command(
    name = "exam-metrics-admin",
    version,
    about = "Exam-session metrics: migrations and batch reconciliation"
)]
pub struct Cli {
    /// Operation to run
    #[command(subcommand)]
    pub command: Command,

    /// Print the Prometheus metrics of this run to stdout when done
    #[arg(long, global = true)]
    pub print_metrics: bool,
}

/// Operations the CLI can run. Every batch operation is safe to rerun.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create aggregates for every scheduled session that has none yet
    InitMissing,
    /// Recompute every session's aggregate from source truth
    RecomputeAll,
    /// Recompute the aggregates of the given sessions
    Sync {
        /// Session ids to sync (repeatable)
        #[arg(long = "session", required = true, num_args = 1..)]
        sessions: Vec<i64>,
    },
    /// Apply the bundled database migrations
    Migrate,
}
