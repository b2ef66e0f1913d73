use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::RegistryError;

/// A registry of worker threads.
///
/// The registry hands out a fixed number of small, contiguous thread ids. Ids key the
/// per-thread insertion counters and the static partitioning of copy work during a
/// resize, so they must be stable for as long as a worker operates on a table.
pub struct Workers {
    // Distinguishes this registry from every other one in the process.
    id: usize,
    count: usize,
    next: AtomicUsize,
}

// The source of registry ids.
static REGISTRIES: AtomicUsize = AtomicUsize::new(0);

impl Workers {
    /// Creates a registry with room for `count` workers.
    pub fn new(count: usize) -> Workers {
        Workers {
            id: REGISTRIES.fetch_add(1, Ordering::Relaxed),
            count,
            next: AtomicUsize::new(0),
        }
    }

    // Creates a registry for tables that do not partition work by worker id.
    pub(crate) fn unbounded() -> Workers {
        Workers::new(usize::MAX)
    }

    /// Returns `true` if the worker was registered with this registry.
    #[inline]
    pub fn owns(&self, worker: &Worker) -> bool {
        worker.registry == self.id
    }

    /// Returns the number of worker ids this registry can hand out.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Registers a new worker, returning its capability.
    ///
    /// Fails once every id in `0..count` has been handed out.
    pub fn register(&self) -> Result<Worker, RegistryError> {
        let id = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                (id < self.count).then_some(id + 1)
            })
            .map_err(|_| RegistryError::Exhausted { count: self.count })?;

        Ok(Worker {
            id,
            count: self.count,
            registry: self.id,
            _unsync: PhantomData,
        })
    }
}

impl fmt::Debug for Workers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workers")
            .field("count", &self.count)
            .field("registered", &self.next.load(Ordering::Relaxed).min(self.count))
            .finish()
    }
}

/// The capability of a registered worker thread.
///
/// A `Worker` carries a stable id in `0..count` and is only accepted by the registry
/// that issued it. It can be moved to another thread but not shared or cloned, so at
/// most one thread acts under a given id at a time.
pub struct Worker {
    id: usize,
    count: usize,
    registry: usize,
    _unsync: PhantomData<std::cell::Cell<()>>,
}

impl Worker {
    /// Returns the id of this worker.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the size of the registry this worker was registered with.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_ids() {
        let workers = Workers::new(3);
        let ids: Vec<_> = (0..3).map(|_| workers.register().unwrap().id()).collect();
        assert_eq!(ids, [0, 1, 2]);
        assert_eq!(
            workers.register().unwrap_err(),
            RegistryError::Exhausted { count: 3 }
        );
    }

    #[test]
    fn ownership() {
        let (a, b) = (Workers::new(2), Workers::new(2));
        let (x, y) = (a.register().unwrap(), b.register().unwrap());

        // Equal ids from different registries are different workers.
        assert_eq!(x.id(), y.id());
        assert!(a.owns(&x) && !a.owns(&y));
        assert!(b.owns(&y) && !b.owns(&x));
    }

    #[test]
    fn concurrent_registration() {
        let workers = Workers::new(8);
        let mut ids = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| workers.register().unwrap().id()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        ids.sort();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }
}
