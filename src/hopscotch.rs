//! A hopscotch hash table with striped insertion locks.
//!
//! Every entry lives within [`HOP_RANGE`] slots of its home bucket, and each home
//! bucket keeps a bitmap of the slots holding its entries. Insertions claim the
//! nearest free slot with a compare-and-swap and then hop it backwards, moving
//! closer entries forward, until it lands inside the neighborhood. Lookups take no
//! lock and validate against the segment timestamp that every move bumps.
//!
//! The table doubles when an insertion cannot make room, excluding every other
//! operation while it rehashes. Like the [chained](crate::chained) tables it
//! implements [`ConcurrentMap`](crate::ConcurrentMap) and exists as a point of
//! comparison.

use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, TryLockError};

use crate::cfg::debug;
use crate::chained::{check_entry, mask_for};
use crate::error::RegistryError;
use crate::hash::BuildWordHasher;
use crate::map::Put;
use crate::raw::MAX_CAPACITY;
use crate::registry::{Worker, Workers};
use crate::traits::ConcurrentMap;

/// The size of a bucket's neighborhood.
pub const HOP_RANGE: usize = u32::BITS as usize;

// How far past its home bucket an insertion searches for a free slot.
const INSERT_RANGE: usize = 4096;

// The default number of buckets.
const DEFAULT_CAPACITY: usize = 32 * 1024;

// The number of insertion locks, each owning runs of `HOP_RANGE` buckets.
const SEGMENTS: usize = 64;

// Value of a slot that is claimed by an insertion but holds no entry.
const BUSY: usize = 1 << (usize::BITS - 1);

/// A concurrent hopscotch hash table.
///
/// See the [module-level documentation](self) for details.
pub struct HopscotchHashMap<S = BuildWordHasher> {
    table: RwLock<Table>,
    count: AtomicUsize,
    // Hands out workers for callers of the shared interface.
    workers: Workers,
    hasher: S,
}

struct Table {
    // `mask + 1` home buckets followed by overflow for the last neighborhoods.
    buckets: Box<[Bucket]>,
    segments: Box<[Segment]>,
    mask: usize,
}

#[derive(Default)]
struct Bucket {
    // Bit `i` is set if slot `home + i` holds an entry of this home bucket.
    hop_info: AtomicU32,
    key: AtomicUsize,
    // Zero if the slot is free, `BUSY` if it is claimed, or the value.
    value: AtomicUsize,
}

#[derive(Default)]
struct Segment {
    // Serializes insertions into, and moves out of, the segment's home buckets.
    lock: Mutex<()>,
    // Bumped every time an entry of one of the segment's home buckets moves.
    timestamp: AtomicUsize,
}

// The outcome of an insertion attempt.
enum Insert {
    Inserted,
    Occupied(usize),
    // No free slot could be moved into the neighborhood.
    Full,
}

// Returns the offsets of the bits set in a neighborhood bitmap, in ascending order.
fn offsets(mut hop_info: u32) -> impl Iterator<Item = usize> {
    std::iter::from_fn(move || {
        (hop_info != 0).then(|| {
            let offset = hop_info.trailing_zeros() as usize;
            hop_info &= hop_info - 1;
            offset
        })
    })
}

#[inline]
fn is_entry(value: usize) -> bool {
    value != 0 && value != BUSY
}

// Locks a segment. Segments hold no invariants across a panic.
fn lock(segment: &Segment) -> MutexGuard<'_, ()> {
    segment
        .lock
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Table {
    fn new(mask: usize) -> Table {
        Table {
            buckets: (0..mask + 1 + HOP_RANGE).map(|_| Bucket::default()).collect(),
            segments: (0..SEGMENTS).map(|_| Segment::default()).collect(),
            mask,
        }
    }

    #[inline]
    fn segment_of(bucket: usize) -> usize {
        (bucket / HOP_RANGE) % SEGMENTS
    }

    // Searches the neighborhood of `home` without taking a lock.
    fn find(&self, home: usize, key: usize) -> Option<usize> {
        let segment = &self.segments[Table::segment_of(home)];

        loop {
            let timestamp = segment.timestamp.load(Ordering::Acquire);
            let found = self.scan(home, key);

            // An entry may have hopped past us while we were scanning.
            if segment.timestamp.load(Ordering::Acquire) == timestamp {
                return found;
            }
        }
    }

    // Returns the value of the key if it is in the neighborhood of `home`.
    fn scan(&self, home: usize, key: usize) -> Option<usize> {
        let hop_info = self.buckets[home].hop_info.load(Ordering::Acquire);

        offsets(hop_info).find_map(|offset| {
            let bucket = &self.buckets[home + offset];
            let value = bucket.value.load(Ordering::Acquire);
            (is_entry(value) && bucket.key.load(Ordering::Acquire) == key).then_some(value)
        })
    }

    fn insert(&self, home: usize, key: usize, value: usize) -> Insert {
        let own = Table::segment_of(home);
        let _lock = lock(&self.segments[own]);

        // No entry of `home` can move while we hold its segment.
        if let Some(current) = self.scan(home, key) {
            return Insert::Occupied(current);
        }

        let Some(mut free) = self.claim_free(home) else {
            return Insert::Full;
        };

        while free - home >= HOP_RANGE {
            match self.hop_closer(free, own) {
                Some(closer) => free = closer,
                None => {
                    self.buckets[free].value.store(0, Ordering::Release);
                    return Insert::Full;
                }
            }
        }

        let bucket = &self.buckets[free];
        bucket.key.store(key, Ordering::Relaxed);
        bucket.value.store(value, Ordering::Release);
        self.buckets[home]
            .hop_info
            .fetch_or(1 << (free - home), Ordering::Release);

        Insert::Inserted
    }

    // Claims the first free slot at or after `home`.
    fn claim_free(&self, home: usize) -> Option<usize> {
        let end = (home + INSERT_RANGE).min(self.buckets.len());

        (home..end).find(|&i| {
            let slot = &self.buckets[i].value;
            slot.load(Ordering::Relaxed) == 0
                && slot
                    .compare_exchange(0, BUSY, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
        })
    }

    // Moves an entry that is closer to its home into the claimed slot `free`,
    // returning the slot it vacated.
    //
    // Segments other than our own are only tried, never waited on.
    fn hop_closer(&self, free: usize, own: usize) -> Option<usize> {
        for candidate in free.saturating_sub(HOP_RANGE - 1)..free {
            let distance = free - candidate;
            let index = Table::segment_of(candidate);
            let segment = &self.segments[index];

            let _lock = if index == own {
                None
            } else {
                match segment.lock.try_lock() {
                    Ok(lock) => Some(lock),
                    Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                    Err(TryLockError::WouldBlock) => continue,
                }
            };

            let home = &self.buckets[candidate];
            let hop_info = home.hop_info.load(Ordering::Acquire);
            let Some(offset) = offsets(hop_info).find(|&offset| offset < distance) else {
                continue;
            };

            let (from, to) = (&self.buckets[candidate + offset], &self.buckets[free]);
            to.key
                .store(from.key.load(Ordering::Relaxed), Ordering::Relaxed);
            to.value
                .store(from.value.load(Ordering::Acquire), Ordering::Release);
            home.hop_info.fetch_or(1 << distance, Ordering::Release);

            // Readers that saw the old slot must notice the move before it is reused.
            segment.timestamp.fetch_add(1, Ordering::AcqRel);
            home.hop_info.fetch_and(!(1 << offset), Ordering::Release);
            from.value.store(BUSY, Ordering::Release);

            return Some(candidate + offset);
        }

        None
    }

    // Returns every entry in the table. The table must not be modified concurrently.
    fn entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.buckets.iter().filter_map(|bucket| {
            let value = bucket.value.load(Ordering::Relaxed);
            is_entry(value).then(|| (bucket.key.load(Ordering::Relaxed), value))
        })
    }
}

impl HopscotchHashMap {
    /// Creates an empty table with `32 * 1024` buckets.
    pub fn new() -> HopscotchHashMap {
        HopscotchHashMap::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty table with at least `capacity` buckets.
    pub fn with_capacity(capacity: usize) -> HopscotchHashMap {
        HopscotchHashMap::with_capacity_and_hasher(capacity, BuildWordHasher::default())
    }
}

impl Default for HopscotchHashMap {
    fn default() -> Self {
        HopscotchHashMap::new()
    }
}

impl<S> HopscotchHashMap<S> {
    /// Creates an empty table with at least `capacity` buckets, using `hasher` to
    /// hash keys.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> HopscotchHashMap<S> {
        HopscotchHashMap {
            table: RwLock::new(Table::new(mask_for(capacity))),
            count: AtomicUsize::new(0),
            workers: Workers::unbounded(),
            hasher,
        }
    }

    /// Returns the number of home buckets.
    pub fn buckets(&self) -> usize {
        self.read().mask + 1
    }

    /// Returns the number of entries inserted.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    // The table is only replaced whole, so a poisoned gate is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S> HopscotchHashMap<S>
where
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: usize) -> usize {
        self.hasher.hash_one(key) as usize
    }

    /// Returns the value associated with the key.
    pub fn find(&self, key: usize) -> Option<usize> {
        assert_ne!(key, 0, "the key 0 is reserved");

        let hash = self.hash(key);
        let table = self.read();
        table.find(hash & table.mask, key)
    }

    /// Inserts a key-value pair if the key is not already present.
    pub fn put(&self, key: usize, value: usize) -> Put {
        check_entry(key, value);

        let hash = self.hash(key);

        loop {
            let table = self.read();

            match table.insert(hash & table.mask, key, value) {
                Insert::Inserted => {
                    self.count.fetch_add(1, Ordering::Relaxed);
                    return Put::Inserted;
                }
                Insert::Occupied(current) => return Put::Occupied(current),
                Insert::Full => {
                    let mask = table.mask;
                    drop(table);
                    self.resize(mask);
                }
            }
        }
    }

    // Rehashes every entry into a table at least twice as large.
    #[cold]
    fn resize(&self, mask: usize) {
        let mut table = self
            .table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Another thread already resized.
        if table.mask != mask {
            return;
        }

        let mut new_mask = mask;
        let rehashed = 'grow: loop {
            new_mask = (new_mask << 1) | 1;
            assert!(
                new_mask < MAX_CAPACITY,
                "HopscotchHashMap exceeded maximum capacity"
            );

            let rehashed = Table::new(new_mask);
            for (key, value) in table.entries() {
                if !matches!(
                    rehashed.insert(self.hash(key) & new_mask, key, value),
                    Insert::Inserted
                ) {
                    continue 'grow;
                }
            }

            break rehashed;
        };

        debug!(from = mask + 1, to = new_mask + 1, "resized hopscotch table");
        *table = rehashed;
    }
}

impl<S> ConcurrentMap for HopscotchHashMap<S>
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
        "hopscotch"
    }
}

impl<S> fmt::Debug for HopscotchHashMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopscotchHashMap")
            .field("count", &self.count())
            .field("buckets", &self.buckets())
            .finish()
    }
}
