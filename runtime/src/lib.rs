//! # Exam Metrics Runtime
//!
//! The moving parts of the exam-session metrics engine.
//!
//! ## Core Components
//!
//! - **[`MetricsCalculator`]**: computes a complete snapshot from source truth
//! - **[`IncrementalUpdater`]**: one atomic delta per check-in, submission,
//!   presence toggle or incident
//! - **[`Reconciler`]**: initialize, sync, and the idempotent batch entrypoints
//! - **[`TopicBroadcaster`] / [`BroadcastDispatcher`]**: best-effort fan-out
//!   through a bounded queue drained by a background task
//! - **[`DashboardSummary`]**: read-only fold over many aggregates
//!
//! Every component is constructed with its dependencies (stores, publisher,
//! clock) injected; none of them holds global state.
//!
//! ## Example
//!
//! ```ignore
//! use exam_metrics_runtime::{BroadcastDispatcher, IncrementalUpdater, Reconciler, TopicBroadcaster};
//!
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let (publisher, _task) = BroadcastDispatcher::spawn(TopicBroadcaster::default(), 1024, clock.clone());
//! let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);
//!
//! let reconciler = Reconciler::new(source.clone(), store.clone(), publisher.clone(), clock.clone());
//! reconciler.initialize(SessionId::new(7), 50).await?;
//!
//! let updater = IncrementalUpdater::new(store.clone(), publisher, clock);
//! updater.record_presence(SessionId::new(7), false).await?;
//! ```

pub mod broadcaster;
pub mod calculator;
pub mod dashboard;
pub mod metrics;
pub mod reconciler;
pub mod updater;

pub use broadcaster::{BroadcastDispatcher, BroadcastHandle, TopicBroadcaster};
pub use calculator::MetricsCalculator;
pub use dashboard::{DashboardSummary, summarize};
pub use reconciler::{BatchFailure, BatchReport, Reconciler};
pub use updater::IncrementalUpdater;
