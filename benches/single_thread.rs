use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

const SIZE: usize = 10_000;

#[derive(Clone, Copy)]
struct RandomKeys {
    state: usize,
}

impl RandomKeys {
    fn new() -> Self {
        RandomKeys { state: 0 }
    }
}

impl Iterator for RandomKeys {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        // Add 1 then multiply by some 32 bit prime.
        self.state = self.state.wrapping_add(1).wrapping_mul(3_787_392_781);

        // Keys must be nonzero and leave the top bit clear.
        Some((self.state >> 1) | 1)
    }
}

fn find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");

    group.bench_function("growmap", |b| {
        let m = growmap::HashMap::builder()
            .capacity(SIZE)
            .workers(1)
            .collector(seize::Collector::new().batch_size(128))
            .build();
        let worker = m.register().unwrap();

        for i in RandomKeys::new().take(SIZE) {
            m.pin(&worker).put(i, i);
        }

        b.iter(|| {
            let m = m.pin(&worker);
            for i in RandomKeys::new().take(SIZE) {
                black_box(assert_eq!(m.find(i), Some(i)));
            }
        });
    });

    group.bench_function("std", |b| {
        let mut m = HashMap::<usize, usize>::default();
        for i in RandomKeys::new().take(SIZE) {
            m.insert(i, i);
        }

        b.iter(|| {
            for i in RandomKeys::new().take(SIZE) {
                black_box(assert_eq!(m.get(&i), Some(&i)));
            }
        });
    });

    group.bench_function("dashmap", |b| {
        let m = dashmap::DashMap::<usize, usize>::default();
        for i in RandomKeys::new().take(SIZE) {
            m.insert(i, i);
        }

        b.iter(|| {
            for i in RandomKeys::new().take(SIZE) {
                black_box(assert_eq!(*m.get(&i).unwrap(), i));
            }
        });
    });

    group.finish();
}

fn put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    // Start small so every iteration pays for a chain of resizes.
    group.bench_function("growmap", |b| {
        b.iter_batched(
            || growmap::HashMap::builder().capacity(8).workers(1).build(),
            |m| {
                let worker = m.register().unwrap();
                let pinned = m.pin(&worker);
                for i in RandomKeys::new().take(SIZE) {
                    black_box(pinned.put(i, i));
                }
                drop(pinned);
                m
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("growmap-chained-locked", |b| {
        b.iter_batched(
            || growmap::chained::LockedHashMap::with_capacity(8),
            |m| {
                for i in RandomKeys::new().take(SIZE) {
                    black_box(m.put(i, i));
                }
                m
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("growmap-chained-lock-free", |b| {
        b.iter_batched(
            || growmap::chained::LockFreeHashMap::with_capacity(8),
            |m| {
                for i in RandomKeys::new().take(SIZE) {
                    black_box(m.put(i, i));
                }
                m
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("growmap-hopscotch", |b| {
        b.iter_batched(
            || growmap::hopscotch::HopscotchHashMap::with_capacity(8),
            |m| {
                for i in RandomKeys::new().take(SIZE) {
                    black_box(m.put(i, i));
                }
                m
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("std", |b| {
        b.iter_batched(
            HashMap::<usize, usize>::new,
            |mut m| {
                for i in RandomKeys::new().take(SIZE) {
                    black_box(m.insert(i, i));
                }
                m
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("dashmap", |b| {
        b.iter_batched(
            dashmap::DashMap::<usize, usize>::new,
            |m| {
                for i in RandomKeys::new().take(SIZE) {
                    black_box(m.insert(i, i));
                }
                m
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, find, put);
criterion_main!(benches);
