//! Benchmarks for snapshot ring buffers
//!
//! Run with: cargo bench --bench snapshot_ring
//!
//! Measures pushing sampled snapshots into a full ring and the three lookup
//! modes used by instant replay and checksum diagnostics.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fortress_lockstep::snapshot::plan_buffers;
use fortress_lockstep::{FindMode, Frame, SamplingConfig, SnapshotRingBuffer};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

const CAPACITIES: [usize; 3] = [8, 64, 512];
const INTERVAL: i32 = 10;

fn full_ring(capacity: usize) -> SnapshotRingBuffer {
    let mut ring = SnapshotRingBuffer::new(capacity).unwrap_or_else(|err| panic!("ring: {err}"));
    let bytes: Arc<[u8]> = Arc::from(vec![0u8; 1024]);
    for i in 0..capacity as i32 {
        ring.push_back(Frame::new(i * INTERVAL), Arc::clone(&bytes))
            .unwrap_or_else(|err| panic!("push: {err}"));
    }
    ring
}

fn bench_push_back(c: &mut Criterion) {
    let mut group = c.benchmark_group("SnapshotRingBuffer push_back");
    for &capacity in &CAPACITIES {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let mut ring = full_ring(capacity);
            let bytes: Arc<[u8]> = Arc::from(vec![1u8; 1024]);
            let mut tick = capacity as i32 * INTERVAL;
            b.iter(|| {
                tick += INTERVAL;
                black_box(ring.push_back(Frame::new(tick), Arc::clone(&bytes)))
            });
        });
    }
    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("SnapshotRingBuffer find");
    for &capacity in &CAPACITIES {
        let ring = full_ring(capacity);
        let query = Frame::new(capacity as i32 * INTERVAL / 2 + 3);
        for (name, mode) in [
            ("equal", FindMode::Equal),
            ("closest_le", FindMode::ClosestLessThanOrEqual),
            ("closest", FindMode::Closest),
        ] {
            group.bench_with_input(BenchmarkId::new(name, capacity), &ring, |b, ring| {
                b.iter(|| black_box(ring.find(black_box(query), mode)));
            });
        }
    }
    group.finish();
}

fn bench_plan_buffers(c: &mut Criterion) {
    let checksum_history = SamplingConfig::new(30, Duration::from_secs(5));
    let instant_replay = SamplingConfig::new(60, Duration::from_secs(10));
    c.bench_function("plan_buffers shared", |b| {
        b.iter(|| {
            black_box(plan_buffers(
                black_box(60),
                Some(checksum_history),
                Some(instant_replay),
            ))
        });
    });
}

criterion_group!(benches, bench_push_back, bench_find, bench_plan_buffers);
criterion_main!(benches);
