use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use interruttore::counters::global::GlobalCounter;
use interruttore::counters::tally::Tally;
use interruttore::store::CounterStore;

const NUM_THREADS: usize = 8;
const ITERATIONS_PER_THREAD: usize = 100_000;

fn run_threads(work: impl Fn() + Send + Sync + 'static) {
    let work = Arc::new(work);
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let work = Arc::clone(&work);
            thread::spawn(move || {
                for _ in 0..ITERATIONS_PER_THREAD {
                    work();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

fn bench_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("increment");
    let label = format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD);

    group.bench_function(BenchmarkId::new("GlobalCounter (serialized)", &label), |b| {
        b.iter(|| {
            let counter = Arc::new(GlobalCounter::new("bench", 0, 1));
            // One idle subscriber so every commit pays for a fan-out.
            let _sub = counter.subscribe();
            let shared = Arc::clone(&counter);
            run_threads(move || {
                black_box(shared.increment().unwrap());
            });
            black_box(counter.total())
        })
    });

    group.bench_function(BenchmarkId::new("CounterStore (lookup + commit)", &label), |b| {
        b.iter(|| {
            let store = Arc::new(CounterStore::new(1));
            store.provision("bench", 0);
            let shared = Arc::clone(&store);
            run_threads(move || {
                black_box(shared.increment("bench").unwrap());
            });
            black_box(store.reading("bench").unwrap())
        })
    });

    group.bench_function(BenchmarkId::new("Tally (sharded)", &label), |b| {
        b.iter(|| {
            let tally = Arc::new(Tally::new());
            let shared = Arc::clone(&tally);
            run_threads(move || shared.record());
            black_box(tally.total())
        })
    });

    group.bench_function(BenchmarkId::new("AtomicU64 (single)", &label), |b| {
        b.iter(|| {
            let counter = Arc::new(AtomicU64::new(0));
            let shared = Arc::clone(&counter);
            run_threads(move || {
                shared.fetch_add(1, Ordering::Relaxed);
            });
            black_box(counter.load(Ordering::Relaxed))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_increment);
criterion_main!(benches);
