//! Log append and flush benchmarks.
//!
//! Measures redo-log performance for:
//! - Record appends into the log buffer
//! - Append plus write (no fsync)
//! - Append plus full flush to disk

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use redolog::{LogConfig, LogEngine};
use tempfile::TempDir;

/// Create an engine with one reasonably sized group
fn create_bench_engine() -> (Arc<LogEngine>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = LogConfig::new(temp_dir.path());
    config.buf_size = 4 * 1024 * 1024;
    config.page_size = 4096;
    let engine = LogEngine::init(config).unwrap();
    engine.group_init(0, 2, 64 * 1024 * 1024, 0, 1).unwrap();
    (Arc::new(engine), temp_dir)
}

/// Benchmark pure buffer appends of several record sizes
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append");

    for size in [64usize, 512, 4096] {
        let (engine, _temp) = create_bench_engine();
        let payload = vec![0xABu8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut record = engine.reserve_and_open(payload.len()).unwrap();
                record.append(black_box(&payload));
                let lsn = record.close();
                // Keep the buffer drained so appends never stall.
                engine.buffer_sync_in_background(false).unwrap();
                lsn
            });
        });
    }

    group.finish();
}

/// Benchmark append followed by a durable flush
fn bench_append_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append_flush");
    group.sample_size(20);

    let (engine, _temp) = create_bench_engine();
    let payload = vec![0x5Au8; 256];

    group.bench_function("append_then_flush", |b| {
        b.iter(|| {
            let mut record = engine.reserve_and_open(payload.len()).unwrap();
            record.append(black_box(&payload));
            let lsn = record.close();
            engine.write_up_to(lsn, true).unwrap();
            lsn
        });
    });

    group.finish();
}

criterion_group!(benches, bench_append, bench_append_flush);
criterion_main!(benches);
