use crate::error::RegistryError;
use crate::map::Put;
use crate::registry::Worker;

/// The operations shared by every table in this crate.
///
/// All implementations are insert-once maps from nonzero words to nonzero words
/// with the top bit clear. The trait lets tests and benchmarks drive the
/// open-addressing table and the chained baselines interchangeably.
pub trait ConcurrentMap: Send + Sync {
    /// Registers a worker that may insert into this table.
    fn register(&self) -> Result<Worker, RegistryError>;

    /// Inserts a key-value pair if the key is not already present.
    fn put(&self, key: usize, value: usize, worker: &Worker) -> Put;

    /// Returns the value associated with the key.
    fn find(&self, key: usize) -> Option<usize>;

    /// Returns the number of entries inserted.
    fn count(&self) -> usize;

    /// A short, human-readable name for the table's algorithm.
    fn name(&self) -> &'static str;
}
