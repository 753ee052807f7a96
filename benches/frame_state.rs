//! Benchmarks for frame state operations
//!
//! Run with: cargo bench --bench frame_state
//!
//! Covers the per-tick costs of the verified frame: checksumming, snapshot
//! serialization and restore, and the copy that rebuilds the predicted frame.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fortress_lockstep::compression::{compress_frame, decompress_frame};
use fortress_lockstep::{
    ComponentSchema, Config, FrameState, PlayerHandle, SerializeMode, SimulationEvent,
};
use serde::{Deserialize, Serialize};
use std::hint::black_box;

#[derive(Clone, Debug, PartialEq, Hash)]
struct NoEvent;

impl SimulationEvent for NoEvent {
    fn event_type(&self) -> u32 {
        0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct BenchInput {
    buttons: u16,
    stick: (i8, i8),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BenchGlobals {
    round: u32,
    scores: [u32; 4],
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
struct Transform {
    x: i32,
    y: i32,
    angle: u16,
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
struct Health(u32);

struct BenchConfig;

impl Config for BenchConfig {
    type Input = BenchInput;
    type Globals = BenchGlobals;
    type PlayerData = u32;
    type Event = NoEvent;
}

/// A four-player frame with `entities` entities, every other one damageable.
fn populated_frame(entities: usize) -> FrameState<BenchConfig> {
    let schema = ComponentSchema::builder(1)
        .register::<Transform>("transform")
        .and_then(|b| b.register::<Health>("health"))
        .map(|b| b.build())
        .unwrap_or_else(|err| panic!("schema: {err}"));
    let mut frame = FrameState::<BenchConfig>::new(schema, 16, 4)
        .unwrap_or_else(|err| panic!("frame: {err}"));
    for i in 0..entities {
        let arena = frame.entities_mut();
        let entity = arena.create().unwrap_or_else(|err| panic!("create: {err}"));
        let transform = Transform {
            x: i as i32 * 3,
            y: -(i as i32),
            angle: (i % 360) as u16,
        };
        arena
            .set(entity, &transform)
            .unwrap_or_else(|err| panic!("set: {err}"));
        if i % 2 == 0 {
            arena
                .set(entity, &Health(100))
                .unwrap_or_else(|err| panic!("set: {err}"));
        }
    }
    for player in 0..4 {
        let config = fortress_lockstep::codec::encode(&(player as u32 * 10))
            .unwrap_or_else(|err| panic!("encode: {err}"));
        frame
            .set_player(PlayerHandle::new(player), player as i32, config)
            .unwrap_or_else(|err| panic!("player: {err}"));
    }
    frame.globals_mut().scores = [3, 1, 4, 1];
    frame
}

const ENTITY_COUNTS: [usize; 3] = [16, 256, 2048];

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("FrameState checksum");
    for &count in &ENTITY_COUNTS {
        let frame = populated_frame(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &frame, |b, frame| {
            b.iter(|| black_box(frame.checksum()));
        });
    }
    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("FrameState serialize");
    for &count in &ENTITY_COUNTS {
        let frame = populated_frame(count);
        let size = frame
            .serialize(SerializeMode::Snapshot)
            .map(|bytes| bytes.len())
            .unwrap_or_default();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &frame, |b, frame| {
            b.iter(|| black_box(frame.serialize(SerializeMode::Snapshot)));
        });
    }
    group.finish();
}

fn bench_deserialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("FrameState deserialize");
    for &count in &ENTITY_COUNTS {
        let frame = populated_frame(count);
        let bytes = frame
            .serialize(SerializeMode::Snapshot)
            .unwrap_or_else(|err| panic!("serialize: {err}"));
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            let mut target = frame.clone();
            b.iter(|| black_box(target.deserialize(bytes)));
        });
    }
    group.finish();
}

fn bench_copy_from(c: &mut Criterion) {
    let mut group = c.benchmark_group("FrameState copy_from");
    for &count in &ENTITY_COUNTS {
        let source = populated_frame(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &source, |b, source| {
            let mut target = source.clone();
            b.iter(|| black_box(target.copy_from(source)));
        });
    }
    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("Frame compression");
    for &count in &ENTITY_COUNTS {
        // Uncompressed payload approximated by repeating the encoded entity columns.
        let raw: Vec<u8> = (0..count * 16).map(|i| (i % 7) as u8).collect();
        let compressed = compress_frame(&raw);
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new("compress", count), &raw, |b, raw| {
            b.iter(|| black_box(compress_frame(raw)));
        });
        group.bench_with_input(
            BenchmarkId::new("decompress", count),
            &compressed,
            |b, compressed| {
                b.iter(|| black_box(decompress_frame(compressed)));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_checksum,
    bench_serialize,
    bench_deserialize,
    bench_copy_from,
    bench_compression
);
criterion_main!(benches);
