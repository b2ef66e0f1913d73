//! Chained hash tables that resize by stopping the world.
//!
//! These tables keep a bucket array of chains and grow it by a factor of four
//! once the number of entries exceeds three quarters of the bucket count. Unlike
//! [`HashMap`](crate::HashMap), a resize excludes every other operation while the
//! entries are rehashed. They implement [`ConcurrentMap`](crate::ConcurrentMap)
//! with the same insert-once semantics, and exist as a point of comparison.

mod lock_free;
mod locked;

pub use lock_free::LockFreeHashMap;
pub use locked::LockedHashMap;

// The default number of buckets.
const DEFAULT_CAPACITY: usize = 1 << 20;

// Returns the bucket mask for a requested capacity.
pub(crate) fn mask_for(capacity: usize) -> usize {
    capacity
        .max(1)
        .checked_next_power_of_two()
        .unwrap_or_else(|| panic!("capacity {capacity} exceeds the maximum table size"))
        - 1
}

// Returns `true` if a table with `size` entries and the given mask should grow.
#[inline]
fn overloaded(size: usize, mask: usize) -> bool {
    size.saturating_mul(4) > mask.saturating_mul(3)
}

// Returns the mask of the table a resize grows into.
#[inline]
fn grown(mask: usize) -> usize {
    ((mask + 1) << 2) - 1
}

// Checks the key and value domain shared with the open-addressing table.
#[inline]
pub(crate) fn check_entry(key: usize, value: usize) {
    assert_ne!(key, 0, "the key 0 is reserved");
    assert!(
        value != 0 && value >> (usize::BITS - 1) == 0,
        "value {value:#x} is reserved: values must be nonzero and leave the top bit clear"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_factor() {
        assert_eq!(mask_for(0), 0);
        assert_eq!(mask_for(1000), 1023);
        assert!(!overloaded(6, 8));
        assert!(overloaded(7, 8));
        assert_eq!(grown(15), 63);
    }
}
