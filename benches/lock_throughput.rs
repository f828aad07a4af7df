//! Lock throughput baselines.
//!
//! Measures the uncontended fast paths (they should stay a single RMW)
//! and read-side scaling under thread contention, for both the spin lock
//! and the condition-variable reference lock.

#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicBool, Ordering};

use warden::{RwMutex, Semaphore, SpinRwLock};

fn uncontended_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");

    let spin = SpinRwLock::new();
    group.bench_function("spin/read", |b| {
        b.iter(|| {
            spin.lock_shared();
            spin.unlock_shared();
        });
    });
    group.bench_function("spin/write", |b| {
        b.iter(|| {
            spin.lock_exclusive();
            spin.unlock_exclusive();
        });
    });
    group.bench_function("spin/upgrade", |b| {
        b.iter(|| {
            spin.lock_shared();
            spin.try_upgrade().expect("uncontended upgrade");
            spin.unlock_exclusive();
        });
    });

    let cv = RwMutex::new();
    group.bench_function("cv/read", |b| {
        b.iter(|| {
            cv.lock_shared();
            cv.unlock_shared();
        });
    });
    group.bench_function("cv/write", |b| {
        b.iter(|| {
            cv.lock_exclusive();
            cv.unlock_exclusive();
        });
    });

    let sem = Semaphore::new(1);
    group.bench_function("semaphore/wait_post", |b| {
        b.iter(|| {
            sem.wait();
            sem.post(1);
        });
    });

    group.finish();
}

fn contended_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_reads");
    group.sample_size(20);

    for threads in [2_usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("spin", threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let lock = SpinRwLock::new();
                    let stop = AtomicBool::new(false);
                    std::thread::scope(|scope| {
                        for _ in 0..threads - 1 {
                            scope.spawn(|| {
                                while !stop.load(Ordering::Relaxed) {
                                    lock.lock_shared();
                                    lock.unlock_shared();
                                }
                            });
                        }
                        for _ in 0..10_000 {
                            lock.lock_shared();
                            lock.unlock_shared();
                        }
                        stop.store(true, Ordering::Relaxed);
                    });
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, uncontended_paths, contended_reads);
criterion_main!(benches);
