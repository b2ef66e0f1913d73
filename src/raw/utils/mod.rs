use std::sync::atomic::{AtomicUsize, Ordering};

/// Pads and aligns a value to the length of a cache line.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
// Source: https://github.com/crossbeam-rs/crossbeam/blob/master/crossbeam-utils/src/cache_padded.rs#L63.
#[cfg_attr(
    any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
    ),
    repr(align(128))
)]
#[cfg_attr(
    any(
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips32r6",
        target_arch = "mips64",
        target_arch = "mips64r6",
        target_arch = "riscv64",
    ),
    repr(align(32))
)]
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(
    not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips32r6",
        target_arch = "mips64",
        target_arch = "mips64r6",
        target_arch = "riscv64",
        target_arch = "s390x",
    )),
    repr(align(64))
)]
pub struct CachePadded<T> {
    value: T,
}

// Per-worker insertion counters.
//
// Every worker owns exactly one shard, so increments never contend. The sum is
// only eventually consistent while puts are in flight.
pub struct Counter(Box<[CachePadded<AtomicUsize>]>);

impl Counter {
    // Create a counter with a shard for each of `workers` worker ids.
    pub fn new(workers: usize) -> Counter {
        Counter((0..workers).map(|_| CachePadded::default()).collect())
    }

    // Return the shard for the given worker id.
    #[inline]
    pub fn get(&self, worker: usize) -> &AtomicUsize {
        &self.0[worker].value
    }

    // Returns the sum of all counter shards.
    #[inline]
    pub fn sum(&self) -> usize {
        self.0.iter().map(|x| x.value.load(Ordering::Relaxed)).sum()
    }
}

#[test]
fn counter() {
    let counter = Counter::new(4);
    counter.get(0).fetch_add(2, Ordering::Relaxed);
    counter.get(3).fetch_add(5, Ordering::Relaxed);
    assert_eq!(counter.sum(), 7);
}
