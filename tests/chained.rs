use growmap::chained::{LockFreeHashMap, LockedHashMap};
use growmap::hopscotch::HopscotchHashMap;
use growmap::{ConcurrentMap, HashMap, Put};

use std::sync::Barrier;
use std::thread;

mod common;
use common::threads;

// Run the test on every table behind the shared interface.
fn with_tables(mut test: impl FnMut(&dyn ConcurrentMap)) {
    test(&HashMap::builder().capacity(8).workers(threads()).build());
    test(&LockedHashMap::with_capacity(8));
    test(&LockFreeHashMap::with_capacity(8));
    test(&HopscotchHashMap::with_capacity(8));
}

#[test]
fn names() {
    let mut names = Vec::new();
    with_tables(|table| names.push(table.name()));
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
}

#[test]
fn insert_once() {
    with_tables(|table| {
        let worker = table.register().unwrap();

        assert_eq!(table.put(5, 50, &worker), Put::Inserted);
        assert_eq!(table.put(5, 51, &worker), Put::Occupied(50));
        assert_eq!(table.find(5), Some(50));
        assert_eq!(table.find(6), None);
        assert_eq!(table.count(), 1);
    });
}

#[test]
#[should_panic = "the key 0 is reserved"]
fn locked_reserved_key() {
    LockedHashMap::with_capacity(8).put(0, 1);
}

#[test]
#[should_panic = "is reserved"]
fn lock_free_reserved_value() {
    LockFreeHashMap::with_capacity(8).put(1, 0);
}

#[test]
#[should_panic = "is reserved"]
fn hopscotch_reserved_value() {
    HopscotchHashMap::with_capacity(8).put(1, 1 << (usize::BITS - 1));
}

#[test]
fn default_buckets() {
    assert_eq!(LockedHashMap::new().buckets(), 1 << 20);
    assert_eq!(LockFreeHashMap::new().buckets(), 1 << 20);
    assert_eq!(HopscotchHashMap::new().buckets(), 32 * 1024);
}

#[test]
fn unbounded_registration() {
    let table = HopscotchHashMap::with_capacity(8);
    for id in 0..64 {
        assert_eq!(ConcurrentMap::register(&table).unwrap().id(), id);
    }
}

#[test]
fn resize_stress() {
    const ENTRIES: usize = if cfg!(miri) { 64 } else { 1 << 14 };

    with_tables(|table| {
        let threads = threads();
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let worker = table.register().unwrap();
                let barrier = &barrier;

                s.spawn(move || {
                    barrier.wait();

                    // Half the keys are shared between neighboring threads.
                    for key in 1..=ENTRIES {
                        if key % threads == t || key % threads == (t + 1) % threads {
                            let _ = table.put(key, key + 1, &worker);
                        }
                    }
                });
            }
        });

        assert_eq!(table.count(), ENTRIES, "{}", table.name());
        for key in 1..=ENTRIES {
            assert_eq!(table.find(key), Some(key + 1), "{}", table.name());
        }
    });
}
