#![allow(dead_code)]

use growmap::{CopyMode, HashMap, HashMapBuilder};

use std::hash::{BuildHasherDefault, Hasher};

// Run the test on different configurations of a `HashMap`.
pub fn with_map(mut test: impl FnMut(&dyn Fn() -> HashMapBuilder)) {
    // Chunked copying with a single slot per chunk to stress operations on
    // long-lived generation chains.
    test(&(|| HashMap::builder().copy_mode(CopyMode::Chunked(1))));

    // Chunked copying with a medium-sized chunk to promote interference between
    // copiers and writers.
    test(&(|| HashMap::builder().copy_mode(CopyMode::Chunked(16))));

    // Per-worker slices with stealing and sweeps.
    test(&(|| HashMap::builder().copy_mode(CopyMode::Partitioned)));
}

// Prints a log message if `RUST_LOG=debug` is set.
#[macro_export]
macro_rules! debug {
    ($($x:tt)*) => {
        if std::env::var("RUST_LOG").as_deref() == Ok("debug") {
            println!($($x)*);
        }
    };
}

// Returns the number of threads to use for stress testing.
pub fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        num_cpus::get_physical().next_power_of_two().clamp(2, 16)
    }
}

// A hasher that maps every key into the first probe window of a small table.
//
// `key << 3` is a multiple of eight, and so is every rehash of it, so a table of
// capacity 8 fills up after exactly eight keys.
#[derive(Default)]
pub struct ShiftHasher(u64);

impl Hasher for ShiftHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, _: &[u8]) {
        unimplemented!("only words are hashed")
    }

    fn write_usize(&mut self, word: usize) {
        self.0 = (word as u64) << 3;
    }
}

pub type BuildShiftHasher = BuildHasherDefault<ShiftHasher>;

// A hasher that maps every key into the first probe window of tables up to
// capacity 64.
//
// Copying a full table of capacity 8 into its successor fills that window too.
#[derive(Default)]
pub struct PackHasher(u64);

impl Hasher for PackHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, _: &[u8]) {
        unimplemented!("only words are hashed")
    }

    fn write_usize(&mut self, word: usize) {
        self.0 = (word as u64) << 6;
    }
}

pub type BuildPackHasher = BuildHasherDefault<PackHasher>;

// Returns a nonzero word with the top bit clear.
pub fn word(rng: &mut impl rand::Rng) -> usize {
    (rng.gen::<usize>() >> 1) | 1
}
