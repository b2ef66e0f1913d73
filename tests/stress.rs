use growmap::Put;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

mod common;
use common::{threads, with_map, word};

#[test]
fn disjoint_put_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 16 };
    const ENTRIES: usize = if cfg!(miri) { 64 } else { 1 << 14 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let threads = threads();
            let map = map().capacity(8).workers(threads).build();
            let barrier = Barrier::new(threads);

            thread::scope(|s| {
                for t in 0..threads {
                    let worker = map.register().unwrap();
                    let (map, barrier) = (&map, &barrier);

                    s.spawn(move || {
                        barrier.wait();
                        let map = map.pin(&worker);
                        for key in (1..=ENTRIES).filter(|key| key % threads == t) {
                            assert_eq!(map.put(key, key + 1), Put::Inserted);
                        }
                    });
                }
            });

            assert_eq!(map.count(), ENTRIES);

            let guard = map.guard();
            for key in 1..=ENTRIES {
                assert_eq!(map.find(key, &guard), Some(key + 1));
            }
        }
    });
}

#[test]
fn contended_put_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 16 };
    const ENTRIES: usize = if cfg!(miri) { 64 } else { 1 << 12 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let threads = threads();
            let map = map().capacity(8).workers(threads).build();
            let barrier = Barrier::new(threads);

            // Every thread races to insert every key with its own value.
            let results: Vec<Vec<Put>> = thread::scope(|s| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let worker = map.register().unwrap();
                        let (map, barrier) = (&map, &barrier);

                        s.spawn(move || {
                            barrier.wait();
                            let map = map.pin(&worker);
                            (1..=ENTRIES)
                                .map(|key| map.put(key, (key << 8) | (t + 1)))
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();

                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_eq!(map.count(), ENTRIES);

            let guard = map.guard();
            for key in 1..=ENTRIES {
                let value = map.find(key, &guard).unwrap();
                let winner = (value & 0xff) - 1;
                assert_eq!(value >> 8, key);

                // Exactly one thread inserted the key, and everyone else saw its value.
                for (t, puts) in results.iter().enumerate() {
                    let expected = if t == winner {
                        Put::Inserted
                    } else {
                        Put::Occupied(value)
                    };
                    assert_eq!(puts[key - 1], expected);
                }
            }
        }
    });
}

#[test]
fn find_during_resize_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 8 };
    const PRESENT: usize = if cfg!(miri) { 32 } else { 1 << 10 };
    const ENTRIES: usize = if cfg!(miri) { 128 } else { 1 << 15 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let threads = threads();
            let map = map().capacity(8).workers(threads).build();

            {
                let worker = map.register().unwrap();
                let map = map.pin(&worker);
                for key in 1..=PRESENT {
                    map.put(key, key);
                }
            }

            let done = AtomicBool::new(false);
            let writers = (threads / 2).max(1);

            thread::scope(|s| {
                // Readers must always see entries that were present before the
                // resizes started.
                for _ in 0..threads - writers {
                    s.spawn(|| {
                        let guard = map.guard();
                        while !done.load(Ordering::Relaxed) {
                            for key in 1..=PRESENT {
                                assert_eq!(map.find(key, &guard), Some(key));
                            }
                        }
                    });
                }

                let handles: Vec<_> = (0..writers)
                    .map(|t| {
                        let worker = map.register().unwrap();
                        let map = &map;

                        s.spawn(move || {
                            let map = map.pin(&worker);
                            for key in (PRESENT + 1..=ENTRIES).filter(|key| key % writers == t) {
                                map.put(key, key);
                            }
                        })
                    })
                    .collect();

                for handle in handles {
                    handle.join().unwrap();
                }

                done.store(true, Ordering::Relaxed);
            });

            assert_eq!(map.count(), ENTRIES);
        }
    });
}

#[test]
fn random_put_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 8 };
    const ENTRIES: usize = if cfg!(miri) { 64 } else { 1 << 13 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let threads = threads();
            let map = map().capacity(8).workers(threads).build();
            let barrier = Barrier::new(threads);

            let keys: Vec<Vec<usize>> = thread::scope(|s| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let worker = map.register().unwrap();
                        let (map, barrier) = (&map, &barrier);

                        s.spawn(move || {
                            let mut rng = rand::thread_rng();
                            let keys: Vec<_> = (0..ENTRIES).map(|_| word(&mut rng)).collect();

                            barrier.wait();
                            let map = map.pin(&worker);
                            for &key in &keys {
                                map.put(key, key);
                                assert_eq!(map.find(key), Some(key));
                            }

                            keys
                        })
                    })
                    .collect();

                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let distinct: HashSet<_> = keys.iter().flatten().copied().collect();
            assert_eq!(map.count(), distinct.len());

            let guard = map.guard();
            for key in distinct {
                assert_eq!(map.find(key, &guard), Some(key));
            }

            let mut rng = rand::thread_rng();
            let guard = map.guard();
            for _ in 0..64 {
                let key = word(&mut rng);
                if let Some(value) = map.find(key, &guard) {
                    assert_eq!(value, key);
                }
            }
        }
    });
}
