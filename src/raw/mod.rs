mod alloc;
mod probe;
mod utils;
mod value;

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::TryLockError;
use std::{hint, ptr};

use seize::{Collector, Guard};

use self::alloc::{Generation, RawGeneration};
use self::probe::Lookup;
use self::utils::Counter;
use self::value::Value;
use crate::cfg::{debug, trace, warning};
use crate::map::{CopyMode, Put};
use crate::registry::{Worker, Workers};

pub use self::probe::{DEFAULT_ROUNDS, MAX_CAPACITY, MAX_ROUNDS};

// The smallest generation capacity, one probe window.
pub const MIN_CAPACITY: usize = probe::WIDTH;

// A lock-free, insert-once hash table of machine words.
//
// The table is a chain of generations. Every operation enters at the root, and a
// resize copies the root into its successor cooperatively, one slot at a time,
// before the successor is promoted in its place.
pub struct HashMap<S> {
    // The root generation.
    root: AtomicPtr<RawGeneration>,
    // Reclaims generations retired by promotion.
    collector: Collector,
    // Per-worker insertion counts.
    count: Counter,
    // The registry that hands out worker ids.
    workers: Workers,
    config: Config,
    hasher: S,
}

// Table configuration, validated by the builder.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub capacity: usize,
    pub probe_rounds: usize,
    pub copy_mode: CopyMode,
    pub workers: usize,
    pub preallocate: bool,
}

// The result of an insertion attempt on a single generation.
enum Status {
    // The entry was inserted.
    Inserted,
    // The key is already present with the given value.
    Occupied(usize),
    // The generation is full or is being retired; continue in its successor.
    Redirect,
    // A different key won the race for the slot; probe again.
    Retry,
}

impl<S> HashMap<S> {
    // Creates a table with the given configuration.
    pub fn new(config: Config, hasher: S, collector: Collector) -> HashMap<S> {
        debug_assert!(config.capacity.is_power_of_two() && config.capacity >= MIN_CAPACITY);

        let root = Generation::alloc(config.capacity, config.workers);

        let map = HashMap {
            root: AtomicPtr::new(root.raw),
            collector,
            count: Counter::new(config.workers),
            workers: Workers::new(config.workers),
            config,
            hasher,
        };

        if config.preallocate {
            map.prepare_pool(root);
        }

        map
    }

    // Returns a reference to the collector.
    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    // Returns the worker registry.
    #[inline]
    pub fn workers(&self) -> &Workers {
        &self.workers
    }

    // Verify a guard is valid to use with this table.
    #[inline]
    pub fn verify(&self, guard: &impl Guard) {
        assert_eq!(
            *guard.collector(),
            self.collector,
            "Attempted to access map with incorrect guard"
        );
    }

    // Verify a worker is valid to use with this table.
    #[inline]
    fn verify_worker(&self, worker: &Worker) {
        assert!(
            self.workers.owns(worker),
            "Attempted to access map with a worker registered elsewhere"
        );
        debug_assert!(worker.id() < self.workers.count());
    }

    // Returns the root generation.
    #[inline]
    fn root(&self, guard: &impl Guard) -> Generation {
        let raw = guard.protect(&self.root, Ordering::Acquire);

        // Safety: the root is never null, and the guard keeps it alive.
        unsafe { Generation::from_raw(raw) }
    }

    // Returns the number of entries inserted into the table.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.sum()
    }

    // Returns the capacity of the root generation.
    #[inline]
    pub fn capacity(&self, guard: &impl Guard) -> usize {
        self.verify(guard);
        self.root(guard).len()
    }

    // Returns the number of generations reachable from the root.
    pub fn generations(&self, guard: &impl Guard) -> usize {
        self.verify(guard);

        let mut table = self.root(guard);
        let mut generations = 1;
        while let Some(next) = table.next() {
            table = next;
            generations += 1;
        }

        generations
    }

    // Returns the pool of a generation, allocating it if it has not been created.
    //
    // The pool is the only successor a generation will ever have. Allocation is
    // serialized so that no thread allocates a generation it then has to discard.
    #[cold]
    #[inline(never)]
    fn prepare_pool(&self, table: Generation) -> Generation {
        // Avoid spinning in tests, which can hide race conditions.
        const SPIN_ALLOC: usize = if cfg!(any(test, debug_assertions)) {
            1
        } else {
            7
        };

        if let Some(pool) = table.pool() {
            return pool;
        }

        let state = table.state();

        let _allocating = match state.allocating.try_lock() {
            Ok(lock) => lock,
            // Allocation holds no invariants across a panic.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            // Someone else is currently allocating.
            Err(TryLockError::WouldBlock) => {
                let mut spun = 0;

                while spun <= SPIN_ALLOC {
                    for _ in 0..(spun * spun) {
                        hint::spin_loop();
                    }

                    if let Some(pool) = table.pool() {
                        return pool;
                    }

                    spun += 1;
                }

                // Otherwise, we have to block.
                state
                    .allocating
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
            }
        };

        // The pool was allocated while we were waiting for the lock.
        if let Some(pool) = table.pool() {
            return pool;
        }

        let capacity = probe::grow(table.len())
            .unwrap_or_else(|| panic!("HashMap exceeded maximum capacity"));

        let pool = Generation::alloc(capacity, self.config.workers);
        state.pool.store(pool.raw, Ordering::Release);
        trace!(capacity, "allocated successor pool");

        pool
    }
}

impl<S> HashMap<S>
where
    S: BuildHasher,
{
    // Hashes a key, or rehashes a probe offset.
    #[inline]
    fn hash(&self, word: usize) -> usize {
        self.hasher.hash_one(word) as usize
    }

    // Probes a generation for the given key.
    #[inline]
    fn lookup(&self, table: Generation, key: usize, hash: usize) -> Lookup {
        probe::lookup(table, key, hash, self.config.probe_rounds, |offset| {
            self.hash(offset)
        })
    }

    // Returns the value associated with the key.
    //
    // Readers never help with copying. A miss in a generation with a successor
    // may be a key that has already moved, so the search continues down the chain.
    pub fn find(&self, key: usize, guard: &impl Guard) -> Option<usize> {
        assert_ne!(key, 0, "the key 0 is reserved");
        self.verify(guard);

        let hash = self.hash(key);
        let mut table = self.root(guard);

        loop {
            if let Some(i) = self.lookup(table, key, hash).found() {
                // Safety: `lookup` returns in-bounds indices.
                let value = unsafe { table.value(i).load(Ordering::Acquire) };

                match Value::decode(value) {
                    Value::Real(value) => return Some(value),
                    // The value was moved to the next generation.
                    Value::Copied => {}
                    // An insertion of this key has claimed the slot but not yet
                    // written the value.
                    Value::Empty => {}
                }
            }

            match table.next() {
                Some(next) => table = next,
                None => return None,
            }
        }
    }

    // Inserts a key-value pair if the key is not already present.
    pub fn put(&self, key: usize, value: usize, worker: &Worker, guard: &impl Guard) -> Put {
        assert_ne!(key, 0, "the key 0 is reserved");
        assert!(
            Value::storable(value),
            "value {value:#x} is reserved: values must be nonzero and leave the top bit clear"
        );
        self.verify(guard);
        self.verify_worker(worker);

        let hash = self.hash(key);
        let mut table = self.root(guard);

        // Help with an in-progress resize before inserting.
        if table.next().is_some() {
            self.help_copy(worker, guard);
            table = self.root(guard);
        }

        let mut helped = false;

        loop {
            match self.put_inner(table, key, value, hash) {
                Status::Inserted => {
                    self.count.get(worker.id()).fetch_add(1, Ordering::Relaxed);
                    return Put::Inserted;
                }
                Status::Occupied(current) => return Put::Occupied(current),
                Status::Retry => unreachable!(),
                Status::Redirect => {
                    let next = self.publish_next(table);

                    // Do a round of copy work in exchange for extending the chain.
                    if !helped {
                        self.help_copy(worker, guard);
                        helped = true;
                    }

                    table = next;
                }
            }
        }
    }

    // Attempts an insertion into a single generation, retrying lost slot races.
    fn put_inner(&self, table: Generation, key: usize, value: usize, hash: usize) -> Status {
        loop {
            let status = match self.lookup(table, key, hash) {
                // Safety: `lookup` returns in-bounds indices.
                Lookup::Found(i) => unsafe { self.claim_value(table, i, value) },
                Lookup::Empty(i) => unsafe { self.claim_slot(table, i, key, value) },
                Lookup::Exhausted => Status::Redirect,
            };

            match status {
                Status::Retry => continue,
                status => return status,
            }
        }
    }

    // Claims an empty key slot for the key, then its value.
    //
    // # Safety
    //
    // The index must be in-bounds for the generation.
    unsafe fn claim_slot(&self, table: Generation, i: usize, key: usize, value: usize) -> Status {
        // An empty slot that was retired by a copy can never be claimed.
        //
        // Safety: guaranteed by caller.
        if let Value::Copied = Value::decode(unsafe { table.value(i).load(Ordering::Acquire) }) {
            return Status::Redirect;
        }

        // Safety: guaranteed by caller.
        let slot = unsafe { table.key(i) };

        match slot.compare_exchange(0, key, Ordering::AcqRel, Ordering::Acquire) {
            // Safety: guaranteed by caller.
            Ok(_) => unsafe { self.claim_value(table, i, value) },
            // Another thread inserted the same key.
            Err(found) if found == key => unsafe { self.claim_value(table, i, value) },
            // Lost the slot to a different key.
            Err(_) => Status::Retry,
        }
    }

    // Writes the value of a claimed key slot, if it has not been written yet.
    //
    // # Safety
    //
    // The index must be in-bounds for the generation.
    unsafe fn claim_value(&self, table: Generation, i: usize, value: usize) -> Status {
        // Safety: guaranteed by caller.
        let slot = unsafe { table.value(i) };

        match slot.compare_exchange(
            Value::EMPTY,
            Value::Real(value).encode(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Status::Inserted,
            Err(found) => match Value::decode(found) {
                Value::Real(current) => Status::Occupied(current),
                Value::Copied => Status::Redirect,
                Value::Empty => unreachable!("value slots never return to empty"),
            },
        }
    }

    // Returns the successor of a generation, publishing its pool if necessary.
    fn publish_next(&self, table: Generation) -> Generation {
        if let Some(next) = table.next() {
            return next;
        }

        let pool = self.prepare_pool(table);

        match table.state().next.compare_exchange(
            ptr::null_mut(),
            pool.raw,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!(
                    from = table.len(),
                    to = pool.len(),
                    "published successor generation"
                );

                if self.config.preallocate {
                    self.prepare_pool(pool);
                }

                pool
            }
            // Only the pool is ever published, so this is the same generation.
            //
            // Safety: `found` is non-null and a live generation.
            Err(found) => unsafe { Generation::from_raw(found) },
        }
    }

    // Does one round of copy work on the root generation, if it is being resized.
    fn help_copy(&self, worker: &Worker, guard: &impl Guard) {
        let table = self.root(guard);

        let Some(next) = table.next() else {
            return;
        };

        // The copy may already be complete.
        if self.try_promote(table, next, 0, guard) {
            return;
        }

        let copied = match self.config.copy_mode {
            CopyMode::Chunked(chunk) => self.copy_chunk(table, next, chunk),
            CopyMode::Partitioned => self.copy_partition(table, next, worker),
        };

        self.try_promote(table, next, copied, guard);
    }

    // Copies the next chunk handed out by the shared cursor.
    fn copy_chunk(&self, table: Generation, next: Generation, chunk: usize) -> usize {
        let start = table.state().copy_scan.fetch_add(chunk, Ordering::Relaxed);

        // Every chunk has been handed out, but their owners may have stalled.
        if start >= table.len() {
            return self.copy_sweep(table, next);
        }

        let end = start.saturating_add(chunk).min(table.len());
        self.copy_range(table, next, start, end)
    }

    // Copies this worker's slice of the generation, or any slice nobody has claimed.
    fn copy_partition(&self, table: Generation, next: Generation, worker: &Worker) -> usize {
        let slices = &table.state().slices;

        let claim = |slice: usize| {
            !slices[slice].load(Ordering::Relaxed) && !slices[slice].swap(true, Ordering::Relaxed)
        };

        let slice = if claim(worker.id()) {
            Some(worker.id())
        } else {
            (0..slices.len()).find(|&slice| claim(slice))
        };

        let Some(slice) = slice else {
            return self.copy_sweep(table, next);
        };

        // The last slice absorbs the remainder.
        let size = table.len() / slices.len();
        let start = slice * size;
        let end = if slice == slices.len() - 1 {
            table.len()
        } else {
            start + size
        };

        self.copy_range(table, next, start, end)
    }

    // Sweeps the entire generation, finishing copies stalled threads left behind.
    //
    // A single sweep retires every remaining slot, so only the first helper to run
    // out of work sweeps. Everyone after it returns without copying.
    #[cold]
    fn copy_sweep(&self, table: Generation, next: Generation) -> usize {
        let sweeping = &table.state().sweeping;
        if sweeping.load(Ordering::Relaxed) || sweeping.swap(true, Ordering::Relaxed) {
            return 0;
        }

        trace!(capacity = table.len(), "sweeping generation for uncopied slots");
        self.copy_range(table, next, 0, table.len())
    }

    // Copies the slots in `start..end`, returning how many this thread retired.
    fn copy_range(&self, table: Generation, next: Generation, start: usize, end: usize) -> usize {
        (start..end)
            // Safety: `end` is at most the generation length.
            .filter(|&i| unsafe { self.copy_entry(table, i, next) })
            .count()
    }

    // Copies a single slot into the next generation, retiring it.
    //
    // Returns `true` if this call retired the slot. Every slot is retired exactly
    // once, so the sum of all `true` results is the generation length.
    //
    // # Safety
    //
    // The index must be in-bounds for the generation.
    unsafe fn copy_entry(&self, table: Generation, i: usize, next: Generation) -> bool {
        // Safety: guaranteed by caller.
        let slot = unsafe { table.value(i) };
        let mut value = slot.load(Ordering::Acquire);

        loop {
            match Value::decode(value) {
                Value::Copied => return false,

                // Retire the empty slot so that no insertion can claim it.
                Value::Empty => {
                    match slot.compare_exchange(
                        Value::EMPTY,
                        Value::COPIED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(found) => value = found,
                    }
                }

                Value::Real(real) => {
                    // Safety: guaranteed by caller.
                    let key = unsafe { table.key(i).load(Ordering::Acquire) };

                    // Make the entry visible in the next generation before the
                    // forwarding marker directs readers there.
                    self.insert_copy(next, key, real);

                    match slot.compare_exchange(
                        value,
                        Value::COPIED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(found) => value = found,
                    }
                }
            }
        }
    }

    // Inserts a copied entry into the chain starting at `next`.
    fn insert_copy(&self, next: Generation, key: usize, value: usize) {
        let hash = self.hash(key);
        let mut table = next;

        loop {
            match self.put_inner(table, key, value, hash) {
                Status::Inserted => return,
                Status::Occupied(current) => {
                    debug_assert_eq!(current, value, "copied entry diverged");
                    return;
                }
                Status::Retry => unreachable!(),
                Status::Redirect => {
                    if table.next().is_none() {
                        warning!(
                            capacity = table.len(),
                            "generation exhausted while copying, extending the chain"
                        );
                    }

                    table = self.publish_next(table);
                }
            }
        }
    }

    // Accounts for copied slots and promotes the successor once the copy is complete.
    //
    // Returns `true` if the generation is fully copied.
    fn try_promote(
        &self,
        table: Generation,
        next: Generation,
        copied: usize,
        guard: &impl Guard,
    ) -> bool {
        let state = table.state();

        let copied = if copied > 0 {
            state.copied.fetch_add(copied, Ordering::AcqRel) + copied
        } else {
            state.copied.load(Ordering::Acquire)
        };

        debug_assert!(copied <= table.len());

        if copied != table.len() {
            return false;
        }

        if self
            .root
            .compare_exchange(table.raw, next.raw, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(capacity = next.len(), "promoted generation");

            // Safety: the CAS above made the generation unreachable from the root,
            // and every slot forwards to `next`, so no new reference can be created.
            unsafe { guard.defer_retire(table.raw, reclaim_generation) };
        }

        true
    }
}

// Frees a retired generation, leaving its successor alive.
unsafe fn reclaim_generation(raw: *mut RawGeneration, _collector: &Collector) {
    // Safety: `raw` was retired after being unlinked from the root.
    unsafe { Generation::dealloc(Generation::from_raw(raw)) }
}

impl<S> Drop for HashMap<S> {
    fn drop(&mut self) {
        // Make sure all retired generations are freed before the chain is walked.
        //
        // Safety: we have a unique reference to the collector.
        unsafe { self.collector.reclaim_all() };

        let mut raw = *self.root.get_mut();

        while !raw.is_null() {
            // Safety: the root and its successors are live generation allocations.
            let mut table = unsafe { Generation::from_raw(raw) };

            let state = table.state_mut();
            let next = *state.next.get_mut();
            let pool = *state.pool.get_mut();
            debug_assert!(next.is_null() || next == pool);

            // Safety: we have unique access and do not touch the generation again.
            unsafe { Generation::dealloc(table) };

            // The pool is the successor, whether or not it was published.
            raw = pool;
        }
    }
}
