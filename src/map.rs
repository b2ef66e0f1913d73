use crate::error::{ConfigError, RegistryError};
use crate::hash::BuildWordHasher;
use crate::raw::{self, Config};
use crate::registry::{Worker, Workers};
use crate::traits::ConcurrentMap;
use seize::{Collector, Guard, LocalGuard, OwnedGuard};

use std::fmt;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;

/// A concurrent, insert-once hash table of machine words.
///
/// Keys and values are `usize` words. The key `0` is reserved, and values must be
/// nonzero with the top bit clear, which every word-aligned pointer satisfies. A
/// key keeps the first value ever inserted for it for the lifetime of the map.
///
/// Most operations require a [`Guard`], which can be acquired through
/// [`HashMap::guard`] or using the [`HashMap::pin`] API, and insertions require a
/// [`Worker`] registered with the map. See the [crate-level documentation](crate)
/// for details.
pub struct HashMap<S = BuildWordHasher> {
    raw: raw::HashMap<S>,
}

/// How the work of copying a generation is divided among threads.
///
/// Copying is cooperative: every insertion that observes a resize in progress does a
/// bounded amount of copy work before continuing. Either way, once all work has been
/// handed out, helpers sweep the whole generation so that a stalled thread can never
/// hold up the resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// Helpers claim chunks of the given number of slots from a shared cursor.
    Chunked(usize),

    /// Each worker copies a fixed slice of the generation determined by its id,
    /// then steals slices no other worker has claimed.
    ///
    /// This is the default copy mode.
    #[default]
    Partitioned,
}

/// The result of [`HashMap::put`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Put {
    /// The entry was inserted.
    Inserted,

    /// The key was already present, and its value was left untouched.
    Occupied(usize),
}

impl Put {
    /// Returns `true` if the entry was inserted.
    #[inline]
    pub fn is_inserted(&self) -> bool {
        matches!(self, Put::Inserted)
    }
}

/// A builder for a [`HashMap`].
///
/// # Examples
///
/// ```rust
/// use growmap::{CopyMode, HashMap};
/// use seize::Collector;
///
/// let map: HashMap = HashMap::builder()
///     // Set the initial capacity.
///     .capacity(2048)
///     // Set the number of probe windows scanned before a generation is full.
///     .probe_rounds(3)
///     // Set how copy work is shared.
///     .copy_mode(CopyMode::Chunked(64))
///     // Set the size of the worker registry.
///     .workers(4)
///     // Set a custom garbage collector.
///     .collector(Collector::new().batch_size(128))
///     // Construct the hash map.
///     .build();
/// ```
pub struct HashMapBuilder<S = BuildWordHasher> {
    hasher: S,
    capacity: usize,
    probe_rounds: usize,
    copy_mode: CopyMode,
    workers: usize,
    preallocate: bool,
    collector: Collector,
}

impl HashMapBuilder {
    /// Set the hash builder used to hash keys.
    ///
    /// The same hasher rehashes probe offsets when a probe window is full, so it
    /// should spread its output over the whole word.
    pub fn hasher<S>(self, hasher: S) -> HashMapBuilder<S> {
        HashMapBuilder {
            hasher,
            capacity: self.capacity,
            probe_rounds: self.probe_rounds,
            copy_mode: self.copy_mode,
            workers: self.workers,
            preallocate: self.preallocate,
            collector: self.collector,
        }
    }
}

impl<S> HashMapBuilder<S> {
    /// Set the initial capacity of the map.
    ///
    /// The capacity is rounded up to a power of two, and is at least 8.
    pub fn capacity(self, capacity: usize) -> HashMapBuilder<S> {
        HashMapBuilder { capacity, ..self }
    }

    /// Set the number of probe windows scanned before a generation is considered full.
    ///
    /// More rounds delay resizing at the cost of longer probes. Must be between 1
    /// and 4, and defaults to 2.
    pub fn probe_rounds(self, probe_rounds: usize) -> HashMapBuilder<S> {
        HashMapBuilder {
            probe_rounds,
            ..self
        }
    }

    /// Set how copy work is shared during a resize. See [`CopyMode`] for details.
    pub fn copy_mode(self, copy_mode: CopyMode) -> HashMapBuilder<S> {
        HashMapBuilder { copy_mode, ..self }
    }

    /// Set the number of workers that may operate on the map.
    ///
    /// Defaults to the available parallelism.
    pub fn workers(self, workers: usize) -> HashMapBuilder<S> {
        HashMapBuilder { workers, ..self }
    }

    /// Set whether the successor of each generation is allocated ahead of time.
    ///
    /// With preallocation, the allocation of a larger generation happens as soon as
    /// the previous one is published rather than when it fills up. Enabled by default.
    pub fn preallocate(self, preallocate: bool) -> HashMapBuilder<S> {
        HashMapBuilder {
            preallocate,
            ..self
        }
    }

    /// Set the [`seize::Collector`] used for garbage collection.
    ///
    /// Note that all `Guard` references used to access the map must be produced by
    /// the provided `collector`.
    pub fn collector(self, collector: Collector) -> HashMapBuilder<S> {
        HashMapBuilder { collector, ..self }
    }

    /// Construct a [`HashMap`] from the builder, using the configured options.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. See [`HashMapBuilder::try_build`].
    pub fn build(self) -> HashMap<S> {
        self.try_build()
            .unwrap_or_else(|err| panic!("invalid `HashMap` configuration: {err}"))
    }

    /// Construct a [`HashMap`] from the builder, returning an error if the
    /// configuration is invalid.
    pub fn try_build(self) -> Result<HashMap<S>, ConfigError> {
        if !(1..=raw::MAX_ROUNDS).contains(&self.probe_rounds) {
            return Err(ConfigError::ProbeRounds(self.probe_rounds));
        }

        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        if self.copy_mode == CopyMode::Chunked(0) {
            return Err(ConfigError::ZeroChunk);
        }

        let capacity = self
            .capacity
            .max(raw::MIN_CAPACITY)
            .checked_next_power_of_two()
            .filter(|&capacity| capacity <= raw::MAX_CAPACITY)
            .ok_or(ConfigError::CapacityOverflow(self.capacity))?;

        let config = Config {
            capacity,
            probe_rounds: self.probe_rounds,
            copy_mode: self.copy_mode,
            workers: self.workers,
            preallocate: self.preallocate,
        };

        Ok(HashMap {
            raw: raw::HashMap::new(config, self.hasher, self.collector),
        })
    }
}

impl<S> fmt::Debug for HashMapBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashMapBuilder")
            .field("capacity", &self.capacity)
            .field("probe_rounds", &self.probe_rounds)
            .field("copy_mode", &self.copy_mode)
            .field("workers", &self.workers)
            .field("preallocate", &self.preallocate)
            .field("collector", &self.collector)
            .finish()
    }
}

impl HashMap {
    /// Creates an empty `HashMap`.
    ///
    /// The map is created with a capacity of `2^20` and a worker registry sized to
    /// the available parallelism.
    ///
    /// # Examples
    ///
    /// ```
    /// use growmap::HashMap;
    /// let map = HashMap::new();
    /// ```
    pub fn new() -> HashMap {
        HashMap::builder().build()
    }

    /// Creates an empty `HashMap` with the specified capacity.
    ///
    /// The capacity is rounded up to a power of two, and is at least 8.
    ///
    /// # Examples
    ///
    /// ```
    /// use growmap::HashMap;
    /// let map = HashMap::with_capacity(10);
    /// ```
    pub fn with_capacity(capacity: usize) -> HashMap {
        HashMap::builder().capacity(capacity).build()
    }

    /// Returns a builder for a `HashMap`.
    ///
    /// The builder can be used for more complex configuration, such as using
    /// a custom [`Collector`], or [`CopyMode`].
    pub fn builder() -> HashMapBuilder {
        HashMapBuilder {
            hasher: BuildWordHasher::default(),
            capacity: 1 << 20,
            probe_rounds: raw::DEFAULT_ROUNDS,
            copy_mode: CopyMode::default(),
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            preallocate: true,
            collector: Collector::new(),
        }
    }
}

impl Default for HashMap {
    fn default() -> Self {
        HashMap::new()
    }
}

impl<S> HashMap<S> {
    /// Registers a worker thread with this map.
    ///
    /// Fails once as many workers as the map was configured with have registered.
    ///
    /// # Examples
    ///
    /// ```
    /// use growmap::HashMap;
    ///
    /// let map = HashMap::builder().workers(1).build();
    /// let worker = map.register().unwrap();
    /// assert_eq!(worker.id(), 0);
    /// assert!(map.register().is_err());
    /// ```
    #[inline]
    pub fn register(&self) -> Result<Worker, RegistryError> {
        self.raw.workers().register()
    }

    /// Returns the worker registry of this map.
    #[inline]
    pub fn workers(&self) -> &Workers {
        self.raw.workers()
    }

    /// Returns a pinned reference to the map for the given worker.
    ///
    /// The returned reference manages a guard internally, preventing garbage collection
    /// for as long as it is held. See the [crate-level documentation](crate) for details.
    #[inline]
    pub fn pin<'map>(&'map self, worker: &'map Worker) -> Pinned<'map, S> {
        Pinned {
            guard: self.guard(),
            worker,
            map: self,
        }
    }

    /// Returns a guard for use with this map.
    ///
    /// Note that holding on to a guard prevents garbage collection.
    /// See the [crate-level documentation](crate) for details.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.raw.collector().enter()
    }

    /// Returns an owned guard for use with this map.
    ///
    /// Owned guards implement `Send` and `Sync`, allowing them to be shared
    /// between threads.
    ///
    /// Note that holding on to a guard prevents garbage collection.
    /// See the [crate-level documentation](crate) for details.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.raw.collector().enter_owned()
    }

    /// Returns the number of entries inserted into the map.
    ///
    /// The count is the sum of per-worker counters, so it may lag behind insertions
    /// that are in flight on other threads.
    ///
    /// # Examples
    ///
    /// ```
    /// use growmap::HashMap;
    ///
    /// let map = HashMap::new();
    /// let worker = map.register().unwrap();
    ///
    /// map.pin(&worker).put(1, 10);
    /// map.pin(&worker).put(2, 20);
    /// assert_eq!(map.count(), 2);
    /// ```
    #[inline]
    pub fn count(&self) -> usize {
        self.raw.count()
    }

    /// Returns `true` if no entries have been inserted into the map.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns the number of slots in the current generation.
    #[inline]
    pub fn capacity(&self, guard: &impl Guard) -> usize {
        self.raw.capacity(guard)
    }

    /// Returns the number of generations reachable from the current one.
    ///
    /// This is `1` unless a resize is in progress.
    #[inline]
    pub fn generations(&self, guard: &impl Guard) -> usize {
        self.raw.generations(guard)
    }
}

impl<S> HashMap<S>
where
    S: BuildHasher,
{
    /// Returns the value associated with the key.
    ///
    /// # Panics
    ///
    /// Panics if `key` is `0`.
    ///
    /// # Examples
    ///
    /// ```
    /// use growmap::HashMap;
    ///
    /// let map = HashMap::new();
    /// let worker = map.register().unwrap();
    ///
    /// let guard = map.guard();
    /// map.put(1, 10, &worker, &guard);
    /// assert_eq!(map.find(1, &guard), Some(10));
    /// assert_eq!(map.find(2, &guard), None);
    /// ```
    #[inline]
    pub fn find(&self, key: usize, guard: &impl Guard) -> Option<usize> {
        self.raw.find(key, guard)
    }

    /// Inserts a key-value pair into the map if the key is not present.
    ///
    /// If the key is already present, its value is left untouched and returned
    /// as [`Put::Occupied`].
    ///
    /// # Panics
    ///
    /// Panics if `key` is `0`, if `value` is `0` or has its top bit set, or if the
    /// worker was not registered with this map.
    ///
    /// # Examples
    ///
    /// ```
    /// use growmap::{HashMap, Put};
    ///
    /// let map = HashMap::new();
    /// let worker = map.register().unwrap();
    ///
    /// let guard = map.guard();
    /// assert_eq!(map.put(37, 1, &worker, &guard), Put::Inserted);
    /// assert_eq!(map.put(37, 2, &worker, &guard), Put::Occupied(1));
    /// ```
    #[inline]
    pub fn put(&self, key: usize, value: usize, worker: &Worker, guard: &impl Guard) -> Put {
        self.raw.put(key, value, worker, guard)
    }
}

impl<S> fmt::Debug for HashMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();

        f.debug_struct("HashMap")
            .field("count", &self.count())
            .field("capacity", &self.capacity(&guard))
            .field("generations", &self.generations(&guard))
            .field("workers", self.workers())
            .finish()
    }
}

impl<S> ConcurrentMap for HashMap<S>
where
    S: BuildHasher + Send + Sync,
{
    fn register(&self) -> Result<Worker, RegistryError> {
        self.register()
    }

    fn put(&self, key: usize, value: usize, worker: &Worker) -> Put {
        self.put(key, value, worker, &self.guard())
    }

    fn find(&self, key: usize) -> Option<usize> {
        self.find(key, &self.guard())
    }

    fn count(&self) -> usize {
        self.count()
    }

    fn name(&self) -> &'static str {
        "lock-free open addressing"
    }
}

/// A pinned reference to a [`HashMap`].
///
/// This type is created with [`HashMap::pin`] and holds a guard and a worker, so
/// operations do not need them passed explicitly.
pub struct Pinned<'map, S = BuildWordHasher> {
    guard: LocalGuard<'map>,
    worker: &'map Worker,
    map: &'map HashMap<S>,
}

impl<'map, S> Pinned<'map, S>
where
    S: BuildHasher,
{
    /// Returns the value associated with the key.
    ///
    /// See [`HashMap::find`] for details.
    #[inline]
    pub fn find(&self, key: usize) -> Option<usize> {
        self.map.find(key, &self.guard)
    }

    /// Inserts a key-value pair into the map if the key is not present.
    ///
    /// See [`HashMap::put`] for details.
    #[inline]
    pub fn put(&self, key: usize, value: usize) -> Put {
        self.map.put(key, value, self.worker, &self.guard)
    }

    /// Returns the number of entries inserted into the map.
    #[inline]
    pub fn count(&self) -> usize {
        self.map.count()
    }

    /// Returns the number of slots in the current generation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.map.capacity(&self.guard)
    }

    /// Returns the number of generations reachable from the current one.
    #[inline]
    pub fn generations(&self) -> usize {
        self.map.generations(&self.guard)
    }
}

impl<S> fmt::Debug for Pinned<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned")
            .field("worker", self.worker)
            .field("map", self.map)
            .finish()
    }
}
