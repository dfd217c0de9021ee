use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};
use sync_hashmap::SyncHashMap;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn bench_store_new_10k(c: &mut Criterion) {
    c.bench_function("sync_hashmap_store_new_10k", |b| {
        b.iter_batched(
            SyncHashMap::<String, u64>::new,
            |m| {
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    m.store(key(x), i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_load_hit(c: &mut Criterion) {
    c.bench_function("sync_hashmap_load_hit", |b| {
        let m = SyncHashMap::new();
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        for (i, k) in keys.iter().enumerate() {
            m.store(k.clone(), i as u64);
        }
        // Promote so hits are served from the read snapshot.
        m.range(|_, _| true);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.load(k.as_str()));
        })
    });
}

fn bench_load_miss(c: &mut Criterion) {
    c.bench_function("sync_hashmap_load_miss", |b| {
        let m = SyncHashMap::new();
        for (i, x) in lcg(11).take(10_000).enumerate() {
            m.store(key(x), i as u64);
        }
        m.range(|_, _| true);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            let k = key(miss.next().unwrap());
            black_box(m.load(k.as_str()));
        })
    });
}

fn bench_store_existing(c: &mut Criterion) {
    c.bench_function("sync_hashmap_store_existing", |b| {
        let m = SyncHashMap::new();
        let keys: Vec<_> = lcg(13).take(1_000).map(key).collect();
        for k in &keys {
            m.store(k.clone(), 0u64);
        }
        m.range(|_, _| true);
        let mut it = keys.iter().cycle();
        let mut n = 0u64;
        b.iter(|| {
            n = n.wrapping_add(1);
            m.store(it.next().unwrap().clone(), n);
        })
    });
}

fn bench_load_or_store_hit(c: &mut Criterion) {
    c.bench_function("sync_hashmap_load_or_store_hit", |b| {
        let m = SyncHashMap::new();
        m.store(1u64, 1u64);
        m.range(|_, _| true);
        b.iter(|| black_box(m.load_or_store(1, 2)))
    });
}

// Read-mostly workload across threads; measures wall time for a fixed batch
// of loads per thread while one writer overwrites the same keys.
fn bench_parallel_read_mostly(c: &mut Criterion) {
    const READERS: usize = 4;
    const OPS: u64 = 10_000;
    c.bench_function("sync_hashmap_parallel_read_mostly", |b| {
        let m = SyncHashMap::new();
        for i in 0..1_024u64 {
            m.store(i, i);
        }
        m.range(|_, _| true);
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let barrier = Barrier::new(READERS + 1);
                let start = Instant::now();
                thread::scope(|s| {
                    for t in 0..READERS {
                        let (m, barrier) = (&m, &barrier);
                        s.spawn(move || {
                            barrier.wait();
                            for x in lcg(t as u64).take(OPS as usize) {
                                black_box(m.load(&(x % 1_024)));
                            }
                        });
                    }
                    let (m, barrier) = (&m, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        for i in 0..OPS / 10 {
                            m.store(i % 1_024, i);
                        }
                    });
                });
                total += start.elapsed();
            }
            total
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_store_new_10k, bench_load_hit, bench_load_miss,
        bench_store_existing, bench_load_or_store_hit, bench_parallel_read_mostly
}
criterion_main!(benches);
