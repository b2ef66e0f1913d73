use std::fmt;
use std::hash::BuildHasher;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{check_entry, grown, mask_for, overloaded, DEFAULT_CAPACITY};
use crate::cfg::debug;
use crate::hash::BuildWordHasher;
use crate::map::Put;
use crate::error::RegistryError;
use crate::registry::{Worker, Workers};
use crate::traits::ConcurrentMap;

/// A chained hash table with lock-free buckets.
///
/// Each bucket is a list of immutable nodes, and insertions push a new node at the
/// head with a compare-and-swap. Lookups and insertions share a table-wide gate,
/// which a resize takes exclusively while it relinks every node into four times as
/// many buckets.
pub struct LockFreeHashMap<S = BuildWordHasher> {
    buckets: RwLock<Buckets>,
    size: AtomicUsize,
    // Hands out workers for callers of the shared interface.
    workers: Workers,
    hasher: S,
}

struct Buckets {
    heads: Box<[AtomicPtr<Node>]>,
    mask: usize,
}

// A chain node. Nodes are never modified once published.
struct Node {
    key: usize,
    value: usize,
    next: *mut Node,
}

impl Buckets {
    fn new(mask: usize) -> Buckets {
        Buckets {
            heads: (0..=mask).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
            mask,
        }
    }

    // Searches the chain starting at `node` for the key.
    //
    // # Safety
    //
    // `node` must be null or the head of a published chain, and the gate must be held.
    unsafe fn search(mut node: *mut Node, key: usize) -> Option<usize> {
        while !node.is_null() {
            // Safety: published nodes live until the table is dropped.
            let current = unsafe { &*node };
            if current.key == key {
                return Some(current.value);
            }

            node = current.next;
        }

        None
    }
}

impl LockFreeHashMap {
    /// Creates an empty table with `2^20` buckets.
    pub fn new() -> LockFreeHashMap {
        LockFreeHashMap::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty table with at least `capacity` buckets.
    pub fn with_capacity(capacity: usize) -> LockFreeHashMap {
        LockFreeHashMap::with_capacity_and_hasher(capacity, BuildWordHasher::default())
    }
}

impl Default for LockFreeHashMap {
    fn default() -> Self {
        LockFreeHashMap::new()
    }
}

impl<S> LockFreeHashMap<S> {
    /// Creates an empty table with at least `capacity` buckets, using `hasher` to
    /// hash keys.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> LockFreeHashMap<S> {
        LockFreeHashMap {
            buckets: RwLock::new(Buckets::new(mask_for(capacity))),
            size: AtomicUsize::new(0),
            workers: Workers::unbounded(),
            hasher,
        }
    }

    /// Returns the number of buckets.
    pub fn buckets(&self) -> usize {
        self.read().mask + 1
    }

    /// Returns the number of entries inserted.
    pub fn count(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    // The bucket array is only replaced whole, so a poisoned gate is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S> LockFreeHashMap<S>
where
    S: BuildHasher,
{
    /// Returns the value associated with the key.
    pub fn find(&self, key: usize) -> Option<usize> {
        assert_ne!(key, 0, "the key 0 is reserved");

        let hash = self.hasher.hash_one(key) as usize;
        let buckets = self.read();
        let head = buckets.heads[hash & buckets.mask].load(Ordering::Acquire);

        // Safety: `head` was loaded from a bucket while holding the gate.
        unsafe { Buckets::search(head, key) }
    }

    /// Inserts a key-value pair if the key is not already present.
    pub fn put(&self, key: usize, value: usize) -> Put {
        check_entry(key, value);

        let hash = self.hasher.hash_one(key) as usize;
        let buckets = self.read();
        let mask = buckets.mask;
        let bucket = &buckets.heads[hash & mask];

        let mut node: *mut Node = ptr::null_mut();
        let mut head = bucket.load(Ordering::Acquire);

        loop {
            // Safety: `head` was loaded from a bucket while holding the gate.
            if let Some(current) = unsafe { Buckets::search(head, key) } {
                if !node.is_null() {
                    // Safety: the node was never published.
                    drop(unsafe { Box::from_raw(node) });
                }

                return Put::Occupied(current);
            }

            if node.is_null() {
                node = Box::into_raw(Box::new(Node {
                    key,
                    value,
                    next: head,
                }));
            } else {
                // Safety: the node is not yet published, so we have unique access.
                unsafe { (*node).next = head };
            }

            // Any insertion into the bucket since the search moves the head, so a
            // successful push means the key is still absent.
            match bucket.compare_exchange(head, node, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(found) => head = found,
            }
        }

        let size = self.size.fetch_add(1, Ordering::Relaxed) + 1;
        drop(buckets);

        if overloaded(size, mask) {
            self.extend();
        }

        Put::Inserted
    }

    // Relinks every node into a table four times larger.
    #[cold]
    fn extend(&self) {
        let mut buckets = self.write();

        // Another thread may have extended the table while we waited.
        if !overloaded(self.size.load(Ordering::Relaxed), buckets.mask) {
            return;
        }

        let new = Buckets::new(grown(buckets.mask));

        for head in buckets.heads.iter_mut() {
            let mut node = *head.get_mut();

            while !node.is_null() {
                // Safety: the exclusive gate means no other thread can observe the node.
                let current = unsafe { &mut *node };
                let next = current.next;

                let slot = &new.heads[self.hasher.hash_one(current.key) as usize & new.mask];
                current.next = slot.load(Ordering::Relaxed);
                slot.store(node, Ordering::Relaxed);

                node = next;
            }
        }

        debug!(
            from = buckets.mask + 1,
            to = new.mask + 1,
            "extended lock-free chained table"
        );

        // The nodes now belong to the new array, the old one only holds stale heads.
        *buckets = new;
    }
}

impl<S> Drop for LockFreeHashMap<S> {
    fn drop(&mut self) {
        let buckets = self
            .buckets
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for head in buckets.heads.iter_mut() {
            let mut node = *head.get_mut();

            while !node.is_null() {
                // Safety: we have unique access, and every node is reachable from
                // exactly one bucket.
                let current = unsafe { Box::from_raw(node) };
                node = current.next;
            }
        }
    }
}

impl<S> ConcurrentMap for LockFreeHashMap<S>
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
        "lock-free chaining"
    }
}

impl<S> fmt::Debug for LockFreeHashMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeHashMap")
            .field("count", &self.count())
            .field("buckets", &self.buckets())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_once() {
        let map = LockFreeHashMap::with_capacity(16);
        assert_eq!(map.put(7, 70), Put::Inserted);
        assert_eq!(map.put(7, 71), Put::Occupied(70));
        assert_eq!(map.find(7), Some(70));
        assert_eq!(map.find(8), None);
        assert_eq!(map.count(), 1);
    }

    #[test]
    fn extend() {
        let map = LockFreeHashMap::with_capacity(16);
        for key in 1..=100 {
            assert_eq!(map.put(key, key * 2), Put::Inserted);
        }

        assert_eq!(map.buckets(), 256);
        for key in 1..=100 {
            assert_eq!(map.find(key), Some(key * 2));
        }
    }

    #[test]
    fn concurrent_puts() {
        let map = LockFreeHashMap::with_capacity(8);
        let threads = 4;

        std::thread::scope(|s| {
            for t in 0..threads {
                let map = &map;
                s.spawn(move || {
                    for key in 1..=1000 {
                        map.put(key, key + t);
                    }
                });
            }
        });

        assert_eq!(map.count(), 1000);
        for key in 1..=1000 {
            let value = map.find(key).unwrap();
            assert!((key..key + threads).contains(&value));
        }
    }
}
