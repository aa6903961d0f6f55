//! Benchmark: change propagation through the reactive graph

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use filament_core::reactive::{batch, create_effect, create_memo, create_root, Memo, Signal};
use filament_core::{configure, RuntimeConfig};

fn benchmark_memo_chain(c: &mut Criterion) {
    configure(RuntimeConfig::default().with_warn_on_unowned(false));
    let mut group = c.benchmark_group("memo_chain");

    for depth in [10usize, 100, 1000] {
        let owner = create_root(|owner| owner);
        let source = Signal::new(0u64);

        let tail = owner
            .run_with(|| {
                let input = source.clone();
                let mut tail: Memo<u64> = create_memo(move || input.get() + 1);
                for _ in 1..depth {
                    let upstream = tail.clone();
                    tail = create_memo(move || upstream.get() + 1);
                }
                let observed = tail.clone();
                create_effect(move || {
                    black_box(observed.get());
                });
                tail
            })
            .expect("root is alive");

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.set(next);
            });
        });

        black_box(tail.get_untracked());
        owner.dispose();
    }

    group.finish();
}

fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for width in [10usize, 100, 1000] {
        let owner = create_root(|owner| owner);
        let source = Signal::new(0u64);

        owner.run_with(|| {
            for _ in 0..width {
                let input = source.clone();
                create_effect(move || {
                    black_box(input.get());
                });
            }
        });

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                source.set(next);
            });
        });

        owner.dispose();
    }

    group.finish();
}

fn benchmark_batched_writes(c: &mut Criterion) {
    let owner = create_root(|owner| owner);
    let signals: Vec<Signal<u64>> = (0..100).map(Signal::new).collect();

    owner.run_with(|| {
        let inputs = signals.clone();
        create_effect(move || {
            let total: u64 = inputs.iter().map(Signal::get).sum();
            black_box(total);
        });
    });

    c.bench_function("batch_100_writes", |b| {
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            batch(|| {
                for signal in &signals {
                    signal.set(next);
                }
            });
        });
    });

    owner.dispose();
}

criterion_group!(
    benches,
    benchmark_memo_chain,
    benchmark_fan_out,
    benchmark_batched_writes
);
criterion_main!(benches);
