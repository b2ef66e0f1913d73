use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{check_entry, grown, mask_for, overloaded, DEFAULT_CAPACITY};
use crate::cfg::debug;
use crate::hash::BuildWordHasher;
use crate::map::Put;
use crate::error::RegistryError;
use crate::registry::{Worker, Workers};
use crate::traits::ConcurrentMap;

// The number of locks the buckets are striped over.
const SEGMENTS: usize = 12;

/// A chained hash table with buckets striped over a fixed set of locks.
///
/// Operations lock the segment owning the key's bucket. A resize is performed by a
/// single thread that acquires every segment and rehashes all entries into four
/// times as many buckets.
pub struct LockedHashMap<S = BuildWordHasher> {
    segments: Box<[Mutex<Segment>]>,
    // The bucket mask. Only written while every segment is held.
    mask: AtomicUsize,
    size: AtomicUsize,
    resizing: AtomicBool,
    // Hands out workers for callers of the shared interface.
    workers: Workers,
    hasher: S,
}

// The buckets `b` with `b % SEGMENTS == s`, stored at `b / SEGMENTS`.
struct Segment {
    chains: Vec<Vec<(usize, usize)>>,
}

impl Segment {
    fn new(mask: usize) -> Segment {
        Segment {
            chains: vec![Vec::new(); (mask + 1).div_ceil(SEGMENTS)],
        }
    }

    #[inline]
    fn chain(&mut self, bucket: usize) -> &mut Vec<(usize, usize)> {
        &mut self.chains[bucket / SEGMENTS]
    }
}

impl LockedHashMap {
    /// Creates an empty table with `2^20` buckets.
    pub fn new() -> LockedHashMap {
        LockedHashMap::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty table with at least `capacity` buckets.
    pub fn with_capacity(capacity: usize) -> LockedHashMap {
        LockedHashMap::with_capacity_and_hasher(capacity, BuildWordHasher::default())
    }
}

impl Default for LockedHashMap {
    fn default() -> Self {
        LockedHashMap::new()
    }
}

impl<S> LockedHashMap<S> {
    /// Creates an empty table with at least `capacity` buckets, using `hasher` to
    /// hash keys.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> LockedHashMap<S> {
        let mask = mask_for(capacity);

        LockedHashMap {
            segments: (0..SEGMENTS).map(|_| Mutex::new(Segment::new(mask))).collect(),
            mask: AtomicUsize::new(mask),
            size: AtomicUsize::new(0),
            resizing: AtomicBool::new(false),
            workers: Workers::unbounded(),
            hasher,
        }
    }

    /// Returns the number of buckets.
    pub fn buckets(&self) -> usize {
        self.mask.load(Ordering::Acquire) + 1
    }

    /// Returns the number of entries inserted.
    pub fn count(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn lock(&self, segment: usize) -> MutexGuard<'_, Segment> {
        // Segments are consistent between statements, so a poisoned lock is usable.
        self.segments[segment]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S> LockedHashMap<S>
where
    S: BuildHasher,
{
    // Locks the segment owning the key's bucket.
    //
    // The mask may change while we wait for the lock, so the bucket is recomputed
    // once it is held.
    fn lock_bucket(&self, hash: usize) -> (usize, MutexGuard<'_, Segment>) {
        let mut bucket = hash & self.mask.load(Ordering::Acquire);

        loop {
            let segment = self.lock(bucket % SEGMENTS);

            let current = hash & self.mask.load(Ordering::Acquire);
            if current == bucket {
                return (bucket, segment);
            }

            drop(segment);
            bucket = current;
        }
    }

    /// Returns the value associated with the key.
    pub fn find(&self, key: usize) -> Option<usize> {
        assert_ne!(key, 0, "the key 0 is reserved");

        let hash = self.hasher.hash_one(key) as usize;
        let (bucket, mut segment) = self.lock_bucket(hash);

        segment
            .chain(bucket)
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, value)| value)
    }

    /// Inserts a key-value pair if the key is not already present.
    pub fn put(&self, key: usize, value: usize) -> Put {
        check_entry(key, value);

        let hash = self.hasher.hash_one(key) as usize;
        let (bucket, mut segment) = self.lock_bucket(hash);

        let chain = segment.chain(bucket);
        if let Some(&(_, current)) = chain.iter().find(|(k, _)| *k == key) {
            return Put::Occupied(current);
        }

        chain.push((key, value));
        let size = self.size.fetch_add(1, Ordering::Relaxed) + 1;
        drop(segment);

        if overloaded(size, self.mask.load(Ordering::Acquire)) {
            self.resize();
        }

        Put::Inserted
    }

    // Rehashes every entry into a table four times larger.
    #[cold]
    fn resize(&self) {
        if self.resizing.load(Ordering::Relaxed)
            || self
                .resizing
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
        {
            return;
        }

        // Stop the world, acquiring segments in order.
        let mut segments: Vec<_> = (0..SEGMENTS).map(|segment| self.lock(segment)).collect();

        let mask = self.mask.load(Ordering::Acquire);

        // Another thread may have resized since the load factor was checked.
        if overloaded(self.size.load(Ordering::Relaxed), mask) {
            let new_mask = grown(mask);
            let mut rehashed: Vec<_> = (0..SEGMENTS).map(|_| Segment::new(new_mask)).collect();

            for segment in segments.iter_mut() {
                for (key, value) in segment.chains.drain(..).flatten() {
                    let bucket = self.hasher.hash_one(key) as usize & new_mask;
                    rehashed[bucket % SEGMENTS].chain(bucket).push((key, value));
                }
            }

            for (segment, rehashed) in segments.iter_mut().zip(rehashed) {
                **segment = rehashed;
            }

            self.mask.store(new_mask, Ordering::Release);
            debug!(from = mask + 1, to = new_mask + 1, "rehashed locked chained table");
        }

        drop(segments);
        self.resizing.store(false, Ordering::Release);
    }
}

impl<S> ConcurrentMap for LockedHashMap<S>
where
    S: BuildHasher + Send + Sync,
{
    fn register(&self) -> Result<Worker, RegistryError> {
        self.workers.register()
    }

    fn put(&self, key: usize, value: usize, _worker: &Worker) -> Put {
        self.put(key, value)
    }

    fn find(&self, key: usize) -> Option<usize> {
        self.find(key)
    }

    fn count(&self) -> usize {
        self.count()
    }

    fn name(&self) -> &'static str {
        "lock-based chaining"
    }
}

impl<S> fmt::Debug for LockedHashMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedHashMap")
            .field("count", &self.count())
            .field("buckets", &self.buckets())
            .finish()
    }
}
