use thiserror::Error;

/// An invalid [`HashMapBuilder`](crate::HashMapBuilder) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The probe round limit must be between 1 and 4.
    #[error("probe rounds must be in 1..=4, got {0}")]
    ProbeRounds(usize),

    /// The worker registry must have room for at least one thread.
    #[error("the worker registry needs at least one worker")]
    NoWorkers,

    /// A chunked copy must make progress on every help call.
    #[error("copy chunk size must be nonzero")]
    ZeroChunk,

    /// The initial capacity does not fit in a power-of-two table.
    #[error("capacity {0} exceeds the maximum table size")]
    CapacityOverflow(usize),
}

/// A failure to register a worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Every worker id has already been handed out.
    #[error("all {count} worker ids are in use")]
    Exhausted {
        /// The fixed size of the registry.
        count: usize,
    },
}
