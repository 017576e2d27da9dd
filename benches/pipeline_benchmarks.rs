//! Benchmarks for scoring and the pending-signal buffer

use classvision::{
    attention::AttentionScorer,
    batcher::{OverflowPolicy, SignalBatcher},
    signal::Signal,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn benchmark_attention(c: &mut Criterion) {
    let scorer = AttentionScorer::default();
    let poses: Vec<(f64, f64)> = (0..64)
        .map(|i| {
            let t = f64::from(i) * 0.1;
            (45.0 * t.sin(), 30.0 * t.cos())
        })
        .collect();

    c.bench_function("attention_score_64", |b| {
        b.iter(|| {
            for &(yaw, pitch) in &poses {
                black_box(scorer.score(Some(yaw), Some(pitch)));
            }
        });
    });
}

fn benchmark_batcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("batcher");

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("append_snapshot_ack", size), &size, |b, &size| {
            let batcher = SignalBatcher::new(10_000, OverflowPolicy::DropOldest);
            b.iter(|| {
                for i in 0..size {
                    batcher.append(Signal::new(i as f64, "all"));
                }
                let snapshot = batcher.snapshot().expect("Batcher is empty");
                black_box(batcher.acknowledge(snapshot.last_seq));
            });
        });
    }

    group.bench_function("append_at_capacity", |b| {
        let batcher = SignalBatcher::new(1_000, OverflowPolicy::DropOldest);
        for i in 0..1_000 {
            batcher.append(Signal::new(f64::from(i), "all"));
        }
        b.iter(|| black_box(batcher.append(Signal::new(0.0, "all"))));
    });

    group.finish();
}

criterion_group!(benches, benchmark_attention, benchmark_batcher);
criterion_main!(benches);
