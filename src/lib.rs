#![doc = include_str!("../README.md")]
#![deny(unsafe_op_in_unsafe_fn)]

mod cfg;
mod error;
mod map;
mod raw;
mod registry;
mod traits;

pub mod chained;
pub mod hash;
pub mod hopscotch;

pub use error::{ConfigError, RegistryError};
pub use map::{CopyMode, HashMap, HashMapBuilder, Pinned, Put};
pub use registry::{Worker, Workers};
pub use seize::{Guard, LocalGuard, OwnedGuard};
pub use traits::ConcurrentMap;
