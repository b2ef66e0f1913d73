use std::sync::atomic::Ordering;

use super::alloc::Generation;

// The number of consecutive slots scanned before the probe offset is rehashed.
//
// Eight words make up a typical cache line.
pub const WIDTH: usize = 8;

// The default number of windows scanned before a probe gives up.
pub const DEFAULT_ROUNDS: usize = 2;

// The largest supported number of probe windows.
pub const MAX_ROUNDS: usize = 4;

// A bounded cache-line probe sequence.
//
// The probe scans `WIDTH` consecutive slots from its offset, then replaces the
// offset with a rehash of itself and scans again, for a total of `rounds` windows.
pub struct Probe {
    offset: usize,
    step: usize,
    round: usize,
    rounds: usize,
    mask: usize,
}

impl Probe {
    // Initialize the probe sequence for the given hash.
    #[inline]
    pub fn start(hash: usize, mask: usize, rounds: usize) -> Probe {
        debug_assert!((1..=MAX_ROUNDS).contains(&rounds));

        Probe {
            offset: hash,
            step: 0,
            round: 0,
            rounds,
            mask,
        }
    }

    // Returns the next slot index, or `None` once every window has been scanned.
    #[inline]
    pub fn next(&mut self, rehash: impl Fn(usize) -> usize) -> Option<usize> {
        if self.step == WIDTH {
            self.round += 1;
            if self.round >= self.rounds {
                return None;
            }

            self.offset = rehash(self.offset);
            self.step = 0;
        }

        let i = self.offset.wrapping_add(self.step) & self.mask;
        self.step += 1;
        Some(i)
    }
}

// The outcome of probing a generation for a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    // The key is stored in this slot.
    Found(usize),

    // The key was not found, and this is the first slot with an empty key.
    Empty(usize),

    // Every slot in the probe sequence holds another key.
    Exhausted,
}

impl Lookup {
    // Returns the slot index if the key was found.
    #[inline]
    pub fn found(self) -> Option<usize> {
        match self {
            Lookup::Found(i) => Some(i),
            _ => None,
        }
    }
}

// Probe a generation for the given key.
//
// Keys are never removed, so the first empty key slot ends the search.
#[inline]
pub fn lookup(
    table: Generation,
    key: usize,
    hash: usize,
    rounds: usize,
    rehash: impl Fn(usize) -> usize,
) -> Lookup {
    let mut probe = Probe::start(hash, table.mask, rounds);

    while let Some(i) = probe.next(&rehash) {
        // Safety: `probe` yields in-bounds indices.
        let found = unsafe { table.key(i).load(Ordering::Acquire) };

        if found == key {
            return Lookup::Found(i);
        }

        if found == 0 {
            return Lookup::Empty(i);
        }
    }

    Lookup::Exhausted
}

// Returns the capacity of the generation that succeeds one with `len` slots.
//
// Small tables grow by a factor of eight, large ones double.
#[inline]
pub fn grow(len: usize) -> Option<usize> {
    const LARGE: usize = 1 << 20;

    let factor = if len < LARGE { 8 } else { 2 };
    len.checked_mul(factor).filter(|&capacity| capacity <= MAX_CAPACITY)
}

// The largest generation capacity, keeping the key and value arrays within
// `isize::MAX` bytes.
pub const MAX_CAPACITY: usize = 1 << (usize::BITS - 6);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_windows() {
        let rehash = |offset: usize| offset + 100;

        let mut probe = Probe::start(6, 255, 2);
        let mut indices = Vec::new();
        while let Some(i) = probe.next(rehash) {
            indices.push(i);
        }

        // Two windows of eight: the first from the hash, the second from its rehash.
        let expected: Vec<_> = (6..14).chain(106..114).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn probe_wraps() {
        let mut probe = Probe::start(5, 7, 1);
        let mut indices = Vec::new();
        while let Some(i) = probe.next(|offset| offset) {
            indices.push(i);
        }

        assert_eq!(indices, [5, 6, 7, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn lookup_states() {
        let table = Generation::alloc(16, 1);
        let rehash = |offset: usize| offset;

        assert_eq!(lookup(table, 9, 3, 1, rehash), Lookup::Empty(3));

        unsafe {
            table.key(3).store(4, Ordering::Relaxed);
            table.key(4).store(9, Ordering::Relaxed);
        }
        assert_eq!(lookup(table, 9, 3, 1, rehash), Lookup::Found(4));
        assert_eq!(lookup(table, 10, 3, 1, rehash), Lookup::Empty(5));

        for i in 0..16 {
            unsafe { table.key(i).store(i + 100, Ordering::Relaxed) };
        }
        assert_eq!(lookup(table, 10, 3, 2, rehash), Lookup::Exhausted);

        unsafe { Generation::dealloc(table) };
    }

    #[test]
    fn growth() {
        assert_eq!(grow(8), Some(64));
        assert_eq!(grow(1 << 17), Some(1 << 20));
        assert_eq!(grow(1 << 20), Some(1 << 21));
        assert_eq!(grow(MAX_CAPACITY), None);
    }
}
