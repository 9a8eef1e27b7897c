//! Throughput benchmarks for the atomic reference-counted cell

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use petek::{AtomicShared, Shared};

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    let cell = Arc::new(AtomicShared::new(Some(Shared::new(42usize))));

    group.bench_function("single_thread", |b| {
        b.iter(|| {
            let handle = cell.load();
            black_box(&handle);
        });
    });

    for threads in [2, 4, 8].iter() {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(
            BenchmarkId::new("concurrent", threads),
            threads,
            |b, &num_threads| {
                b.iter(|| {
                    let mut handles = Vec::new();
                    for _ in 0..num_threads {
                        let cell = cell.clone();
                        handles.push(thread::spawn(move || {
                            for _ in 0..10_000 / num_threads {
                                let handle = cell.load();
                                black_box(&handle);
                            }
                        }));
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    let cell = AtomicShared::new(Some(Shared::new(42usize)));

    group.bench_function("single_thread", |b| {
        b.iter(|| {
            let snap = cell.get_snapshot();
            black_box(&snap);
        });
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    for batch in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &size| {
            let cell = AtomicShared::null();
            b.iter(|| {
                for i in 0..size {
                    cell.store(Some(Shared::new(i)));
                }
            });
        });
    }

    group.finish();
}

fn bench_clone_vs_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_clone");
    let handle = Shared::new(42usize);

    group.bench_function("clone", |b| {
        b.iter(|| {
            let copy = handle.clone();
            black_box(&copy);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_load,
    bench_snapshot,
    bench_store,
    bench_clone_vs_load
);
criterion_main!(benches);
