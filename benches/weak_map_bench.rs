use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use weak_concurrent_map::{Reclamation, Tracked, WeakConcurrentMap};

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn manual_map() -> WeakConcurrentMap<u64, u64> {
    WeakConcurrentMap::new(Reclamation::Manual).unwrap()
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("weak_map_put_10k", |b| {
        b.iter_batched(
            || {
                let keys: Vec<_> = lcg(1).take(10_000).map(Tracked::new).collect();
                (manual_map(), keys)
            },
            |(m, keys)| {
                for (i, k) in keys.iter().enumerate() {
                    m.put(k, i as u64);
                }
                // Keys outlive the loop so no entry dies mid-measurement.
                black_box((m, keys))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("weak_map_get_hit", |b| {
        let m = manual_map();
        let keys: Vec<_> = lcg(7).take(20_000).map(Tracked::new).collect();
        for (i, k) in keys.iter().enumerate() {
            m.put(k, i as u64);
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.get_if_present(k).unwrap());
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("weak_map_get_miss", |b| {
        let m = manual_map();
        let held: Vec<_> = lcg(11).take(10_000).map(Tracked::new).collect();
        for (i, k) in held.iter().enumerate() {
            m.put(k, i as u64);
        }
        let strangers: Vec<_> = lcg(0xdead_beef).take(1_024).map(Tracked::new).collect();
        let mut it = strangers.iter().cycle();
        b.iter(|| {
            black_box(m.get_if_present(it.next().unwrap()));
        })
    });
}

fn bench_put_if_absent_present(c: &mut Criterion) {
    c.bench_function("weak_map_put_if_absent_present", |b| {
        let m = manual_map();
        let k = Tracked::new(1);
        m.put(&k, 1);
        b.iter(|| black_box(m.put_if_absent(&k, 2)))
    });
}

fn bench_expunge(c: &mut Criterion) {
    c.bench_function("weak_map_expunge_10k", |b| {
        b.iter_batched(
            || {
                let m = manual_map();
                let keys: Vec<_> = lcg(3).take(10_000).map(Tracked::new).collect();
                for k in &keys {
                    m.put(k, 0);
                }
                drop(keys);
                m
            },
            |m| black_box(m.expunge_stale_entries()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_contended_put(c: &mut Criterion) {
    c.bench_function("weak_map_put_4_threads_1k_each", |b| {
        b.iter_batched(
            || Arc::new(manual_map()),
            |m| {
                thread::scope(|s| {
                    for t in 0..4u64 {
                        let m = &m;
                        s.spawn(move || {
                            let keys: Vec<_> = lcg(t + 100).take(1_000).map(Tracked::new).collect();
                            for k in &keys {
                                m.put(k, t);
                            }
                            black_box(keys.len())
                        });
                    }
                });
                black_box(m)
            },
            BatchSize::SmallInput,
        )
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
    targets = bench_insert, bench_get_hit, bench_get_miss, bench_put_if_absent_present,
        bench_expunge, bench_contended_put
}
criterion_main!(benches);
