//! The default word hasher.
//!
//! Tables hash keys, and rehash probe offsets, with a fixed integer mix. The mix is
//! deterministic and never reseeded, so recomputing a hash within an operation
//! always agrees with the first computation.

use std::hash::{BuildHasherDefault, Hasher};

/// A [`BuildHasher`](std::hash::BuildHasher) for [`WordHasher`].
pub type BuildWordHasher = BuildHasherDefault<WordHasher>;

/// Mixes a machine word.
///
/// Robert Jenkins' integer avalanche followed by Knuth's multiplicative step.
#[inline]
pub const fn mix(word: usize) -> usize {
    let mut key = word as u64;

    key = key.wrapping_add(key << 12);
    key ^= key >> 22;
    key = key.wrapping_add(key << 4);
    key ^= key >> 9;
    key = key.wrapping_add(key << 10);
    key ^= key >> 2;
    key = key.wrapping_add(key << 7);
    key ^= key >> 12;

    (key >> 3).wrapping_mul(2_654_435_761) as usize
}

/// A [`Hasher`] for word-sized keys, backed by [`mix`].
///
/// Writing a single `usize` (which is what `usize::hash` does) produces exactly
/// `mix(word)`. Other writes are folded in word by word.
#[derive(Clone, Copy, Debug, Default)]
pub struct WordHasher {
    state: u64,
}

impl Hasher for WordHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write_usize(&mut self, word: usize) {
        self.state = mix(word ^ self.state as usize) as u64;
    }

    #[inline]
    fn write_u64(&mut self, word: u64) {
        self.write_usize(word as usize);
    }

    fn write(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(std::mem::size_of::<usize>()) {
            let mut word = [0; std::mem::size_of::<usize>()];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_usize(usize::from_ne_bytes(word));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::BuildHasher;

    #[test]
    fn deterministic() {
        for word in [1, 2, 42, usize::MAX, 1 << 40] {
            assert_eq!(mix(word), mix(word));
            assert_eq!(BuildWordHasher::default().hash_one(word), mix(word) as u64);
        }
    }

    #[test]
    fn spreads_sequential_keys() {
        let mask = (1 << 10) - 1;
        let mut buckets = vec![0; mask + 1];
        for word in 1..=4096 {
            buckets[mix(word) & mask] += 1;
        }

        // Sequential keys should not pile into a handful of buckets.
        assert!(buckets.iter().all(|&n| n < 32));
    }
}
