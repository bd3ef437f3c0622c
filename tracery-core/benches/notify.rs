//! Notification-path benchmarks: uncontended reads, write fan-out, and
//! batched flushes.

use criterion::{criterion_group, criterion_main, Criterion};

use tracery_core::{computed, postpone, value};

fn bench_read(c: &mut Criterion) {
    let cell = value(1u64);
    c.bench_function("untracked_read", |b| b.iter(|| cell.get()));
}

fn bench_write_fanout(c: &mut Criterion) {
    let cell = value(0u64);
    let mut watches = Vec::new();
    for _ in 0..16 {
        watches.push(cell.watch(|_, _| {}));
    }

    let mut n = 0u64;
    c.bench_function("write_fanout_16", |b| {
        b.iter(|| {
            n += 1;
            cell.set(n);
        })
    });
}

fn bench_computed_invalidation(c: &mut Criterion) {
    let source = value(0u64);
    let derived = computed({
        let source = source.clone();
        move || source.get() * 2
    });

    let mut n = 0u64;
    c.bench_function("computed_invalidate_and_read", |b| {
        b.iter(|| {
            n += 1;
            source.set(n);
            derived.get()
        })
    });
}

fn bench_batched_writes(c: &mut Criterion) {
    let cell = value(0u64);
    let _watch = cell.watch(|_, _| {});

    let mut n = 0u64;
    c.bench_function("batched_writes_8", |b| {
        b.iter(|| {
            postpone(|| {
                for _ in 0..8 {
                    n += 1;
                    cell.set(n);
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_read,
    bench_write_fanout,
    bench_computed_invalidation,
    bench_batched_writes
);
criterion_main!(benches);
