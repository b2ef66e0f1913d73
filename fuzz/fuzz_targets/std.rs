#![no_main]

use libfuzzer_sys::fuzz_target;

use arbitrary::Arbitrary;
use growmap::chained::{LockFreeHashMap, LockedHashMap};
use growmap::hopscotch::HopscotchHashMap;
use growmap::{ConcurrentMap, CopyMode, HashMap, Put};
use std::collections::hash_map::Entry;
use std::collections::HashMap as StdHashMap;

#[derive(Debug, Arbitrary)]
enum Operation {
    Put(u16, u32),
    Find(u16),
    Count,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    probe_rounds: u8,
    chunk: u8,
    operations: Vec<Operation>,
}

// Keys and values are shifted out of the reserved patterns.
fn key(k: u16) -> usize {
    k as usize + 1
}

fn value(v: u32) -> usize {
    v as usize + 1
}

fn fuzz_map(table: &dyn ConcurrentMap, operations: &[Operation]) {
    let worker = table.register().unwrap();
    let mut std_map = StdHashMap::new();

    for op in operations {
        match *op {
            Operation::Put(k, v) => {
                let (k, v) = (key(k), value(v));
                let std_result = match std_map.entry(k) {
                    Entry::Occupied(entry) => Put::Occupied(*entry.get()),
                    Entry::Vacant(entry) => {
                        entry.insert(v);
                        Put::Inserted
                    }
                };
                assert_eq!(std_result, table.put(k, v, &worker), "{}", table.name());
            }
            Operation::Find(k) => {
                let k = key(k);
                assert_eq!(std_map.get(&k).copied(), table.find(k), "{}", table.name());
            }
            Operation::Count => {
                assert_eq!(std_map.len(), table.count(), "{}", table.name());
            }
        }
    }

    // Final consistency checks
    for (&k, &v) in std_map.iter() {
        assert_eq!(Some(v), table.find(k));
    }
    assert_eq!(std_map.len(), table.count());
}

fuzz_target!(|input: FuzzInput| {
    // Small tables with varied probing resize often.
    let map = HashMap::builder()
        .capacity(8)
        .workers(1)
        .probe_rounds(input.probe_rounds as usize % 4 + 1)
        .copy_mode(match input.chunk {
            0 => CopyMode::Partitioned,
            chunk => CopyMode::Chunked(chunk as usize),
        })
        .build();

    fuzz_map(&map, &input.operations);
    fuzz_map(&LockedHashMap::with_capacity(8), &input.operations);
    fuzz_map(&LockFreeHashMap::with_capacity(8), &input.operations);
    fuzz_map(&HopscotchHashMap::with_capacity(8), &input.operations);
});
