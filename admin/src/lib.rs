//! Operational CLI for the exam-session metrics engine.
//!
//! Wraps the idempotent batch entrypoints of [`exam_metrics_runtime::Reconciler`]
//! and the `PostgreSQL` migrations behind a small `clap` command tree.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;

pub use cli::{Cli, Command};
pub use config::Config;
