//! Rollback log benchmarks.
//!
//! Measures:
//! - Entry serialization (Snappy + SHA-1) for compressible and random pages
//! - Checkpoint frames of 1, 16 and 128 pages
//! - Reverse delta collection and range reconstruction over a busy hour

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rewind::delta::{reconstruct_range, ReverseDelta};
use rewind::timestamp::NANOS_PER_SECOND;
use rewind::{Config, DatabaseKey, Engine, RollbackLogEntry};
use tempfile::TempDir;

const PAGE: usize = 4096;
const BASE: i64 = 1_700_000_000 * NANOS_PER_SECOND;

fn random_page(rng: &mut impl Rng) -> Vec<u8> {
    let mut data = vec![0u8; PAGE];
    rng.fill(&mut data[..]);
    data
}

fn sparse_page(seed: u32) -> Vec<u8> {
    let mut data = vec![0u8; PAGE];
    data[..4].copy_from_slice(&seed.to_le_bytes());
    data
}

/// Benchmark entry serialization
fn bench_entry_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_serialize");
    group.throughput(Throughput::Bytes(PAGE as u64));

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let inputs = [("sparse", sparse_page(42)), ("random", random_page(&mut rng))];

    for (name, data) in inputs {
        group.bench_function(name, |b| {
            let mut encoder = snap::raw::Encoder::new();
            let mut buf = Vec::new();
            b.iter(|| {
                let mut entry = RollbackLogEntry::new(1, BASE, data.clone());
                entry
                    .serialize(&mut encoder, &mut buf)
                    .expect("serialize");
                black_box(buf.len())
            });
        });
    }

    group.finish();
}

/// Benchmark full checkpoints: pre-image logging, page writes, commit
fn bench_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint");
    group.sample_size(20);

    for pages in [1u32, 16, 128] {
        group.throughput(Throughput::Bytes(u64::from(pages) * PAGE as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pages), &pages, |b, &pages| {
            let temp = TempDir::new().expect("temp dir");
            let engine = Engine::new(Config::new(temp.path())).expect("engine");
            let branch = engine
                .branch(&DatabaseKey::new("bench", "main").expect("key"))
                .expect("branch");

            let mut ts = BASE;
            b.iter(|| {
                ts += 1;
                let batch: Vec<(u32, Vec<u8>)> =
                    (1..=pages).map(|p| (p, sparse_page(ts as u32 ^ p))).collect();
                black_box(branch.checkpoint(ts, &batch, pages).expect("checkpoint"))
            });
        });
    }

    group.finish();
}

/// Benchmark delta collection and reconstruction after many small frames
fn bench_reverse_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse_delta");
    group.sample_size(20);

    let temp = TempDir::new().expect("temp dir");
    let engine = Engine::new(Config::new(temp.path()).with_range_max_pages(64)).expect("engine");
    let branch = engine
        .branch(&DatabaseKey::new("bench", "main").expect("key"))
        .expect("branch");

    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let page_count = 256u32;
    let initial: Vec<(u32, Vec<u8>)> = (1..=page_count).map(|p| (p, sparse_page(p))).collect();
    branch.checkpoint(BASE, &initial, page_count).expect("seed");

    for i in 1..=500i64 {
        let batch: Vec<(u32, Vec<u8>)> = (0..8)
            .map(|_| {
                let p = rng.gen_range(1..=page_count);
                (p, sparse_page(p ^ i as u32))
            })
            .collect();
        branch
            .checkpoint(BASE + i * 1_000, &batch, page_count)
            .expect("checkpoint");
    }

    let rollback = Arc::clone(branch.rollback());
    group.bench_function("collect", |b| {
        b.iter(|| black_box(ReverseDelta::collect(&rollback, BASE + 1_000).expect("collect")));
    });

    let delta = ReverseDelta::collect(&rollback, BASE + 1_000).expect("collect");
    group.bench_function("reconstruct_range", |b| {
        b.iter(|| {
            black_box(
                reconstruct_range(branch.store(), &rollback, &delta, 1, page_count)
                    .expect("reconstruct"),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_entry_serialize, bench_checkpoint, bench_reverse_delta);
criterion_main!(benches);
