//! Engine Performance Benchmarks
//!
//! - Status derivation: pure, should stay in the nanosecond range
//! - Incremental path: one delta plus broadcast hand-off against the in-memory store
//! - Sync: full recomputation of one session
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use chrono::{Duration, TimeZone, Utc};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use exam_metrics_core::aggregate::SessionMetrics;
use exam_metrics_core::ids::{SessionId, StudentId};
use exam_metrics_core::status::{classify_verification, derive_status};
use exam_metrics_runtime::{IncrementalUpdater, Reconciler};
use exam_metrics_testing::{
    FixedClock, InMemoryExamStore, RecordingPublisher, at, schedule, scope,
};
use std::sync::Arc;

const SESSION: SessionId = SessionId::new(1);

/// Benchmark status derivation and verification in isolation
fn benchmark_status(c: &mut Criterion) {
    let mut group = c.benchmark_group("status");
    group.throughput(Throughput::Elements(1));

    let start = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).single().expect("valid date");
    let end = start + Duration::hours(2);
    let now = start + Duration::minutes(30);

    group.bench_function("derive_status", |b| {
        b.iter(|| derive_status(black_box(now), start, end, false, false));
    });

    group.bench_function("classify_verification", |b| {
        b.iter(|| {
            classify_verification(
                black_box(exam_metrics_core::SessionStatus::Completed),
                black_box(100),
                black_box(96),
            )
        });
    });

    group.finish();
}

fn seeded_store(students: i64) -> InMemoryExamStore {
    let store = InMemoryExamStore::new();
    store.schedule_session(schedule(1, "2025-06-02T10:00:00Z", "2025-06-02T12:00:00Z"));
    store.register_students(SESSION, students);
    store.put_metrics(SessionMetrics::initialized(
        SESSION,
        scope(),
        i32::try_from(students).expect("fits"),
        at("2025-06-02T08:00:00Z"),
    ));
    store
}

/// Benchmark the incremental update path
fn benchmark_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("record_presence", |b| {
        let updater = IncrementalUpdater::new(
            Arc::new(seeded_store(1_000)),
            Arc::new(RecordingPublisher::new()),
            Arc::new(FixedClock::new(at("2025-06-02T10:05:00Z"))),
        );

        b.to_async(&runtime).iter(|| async {
            let _ = updater.record_presence(black_box(SESSION), false).await;
        });
    });

    group.finish();
}

/// Benchmark full recomputation of one session
fn benchmark_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("sync_500_students", |b| {
        let store = Arc::new(seeded_store(500));
        for student in 1..=400 {
            store.check_in(SESSION, StudentId::new(student), student % 17 == 0);
        }
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            store,
            Arc::new(RecordingPublisher::new()),
            Arc::new(FixedClock::new(at("2025-06-02T10:30:00Z"))),
        );

        b.to_async(&runtime).iter(|| async {
            let _ = reconciler.sync(black_box(SESSION)).await;
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_status, benchmark_incremental, benchmark_sync);
criterion_main!(benches);
