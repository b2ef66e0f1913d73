use std::alloc::Layout;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::{alloc, mem, ptr};

// A generation laid out in a single allocation.
#[repr(transparent)]
pub struct RawGeneration(u8);

// The layout of the generation allocation.
//
// The header is followed by `len` key words and then `len` value words.
#[repr(C)]
struct GenerationLayout {
    mask: usize,
    state: State,
    keys: [AtomicUsize; 0],
}

// Resize bookkeeping for a generation.
pub struct State {
    // The generation this one is being copied into, once published.
    pub next: AtomicPtr<RawGeneration>,

    // The pre-allocated, unpublished successor.
    pub pool: AtomicPtr<RawGeneration>,

    // A lock acquired to allocate the pool.
    pub allocating: Mutex<()>,

    // The chunk cursor handed out to copiers in chunked mode.
    pub copy_scan: AtomicUsize,

    // The number of slots that have been retired into the next generation.
    pub copied: AtomicUsize,

    // Claim flags for the per-worker slices in partitioned mode.
    pub slices: Box<[AtomicBool]>,

    // Set by the single helper that sweeps the generation once all work is handed out.
    pub sweeping: AtomicBool,
}

impl State {
    fn new(slices: usize) -> State {
        State {
            next: AtomicPtr::new(ptr::null_mut()),
            pool: AtomicPtr::new(ptr::null_mut()),
            allocating: Mutex::new(()),
            copy_scan: AtomicUsize::new(0),
            copied: AtomicUsize::new(0),
            slices: (0..slices).map(|_| AtomicBool::new(false)).collect(),
            sweeping: AtomicBool::new(false),
        }
    }
}

// Manages a generation allocation.
#[derive(Clone, Copy)]
pub struct Generation {
    // Mask for the generation length.
    pub mask: usize,
    // The raw generation pointer.
    pub raw: *mut RawGeneration,
}

impl Generation {
    // Allocate a generation with the provided length and copy slice count.
    pub fn alloc(len: usize, slices: usize) -> Generation {
        assert!(len.is_power_of_two());

        let mask = len - 1;

        unsafe {
            let layout = Generation::layout(len);

            // Allocate the generation, zeroing the slots.
            //
            // Zero is `EMPTY` for both keys and values.
            let ptr = alloc::alloc_zeroed(layout);
            if ptr.is_null() {
                alloc::handle_alloc_error(layout);
            }

            // Write the generation state.
            ptr.cast::<GenerationLayout>().write(GenerationLayout {
                mask,
                state: State::new(slices),
                keys: [],
            });

            Generation {
                mask,
                raw: ptr.cast::<RawGeneration>(),
            }
        }
    }

    // Creates a `Generation` from a raw pointer.
    //
    // # Safety
    //
    // The pointer must be a live generation allocation.
    #[inline]
    pub unsafe fn from_raw(raw: *mut RawGeneration) -> Generation {
        debug_assert!(!raw.is_null());

        let layout = unsafe { &*raw.cast::<GenerationLayout>() };

        Generation {
            raw,
            mask: layout.mask,
        }
    }

    // Returns the key slot at the given index.
    //
    // # Safety
    //
    // The index must be in-bounds for the generation.
    #[inline]
    pub unsafe fn key(&self, i: usize) -> &AtomicUsize {
        debug_assert!(i < self.len());

        let offset = mem::size_of::<GenerationLayout>() + i * mem::size_of::<AtomicUsize>();
        unsafe { &*self.raw.add(offset).cast::<AtomicUsize>() }
    }

    // Returns the value slot at the given index.
    //
    // # Safety
    //
    // The index must be in-bounds for the generation.
    #[inline]
    pub unsafe fn value(&self, i: usize) -> &AtomicUsize {
        debug_assert!(i < self.len());

        let offset = mem::size_of::<GenerationLayout>()
            + mem::size_of::<AtomicUsize>() * self.len()
            + i * mem::size_of::<AtomicUsize>();
        unsafe { &*self.raw.add(offset).cast::<AtomicUsize>() }
    }

    // Returns the number of slots in the generation.
    #[inline]
    pub fn len(&self) -> usize {
        self.mask + 1
    }

    // Returns a reference to the generation state.
    #[inline]
    pub fn state(&self) -> &State {
        unsafe { &(*self.raw.cast::<GenerationLayout>()).state }
    }

    // Returns a mutable reference to the generation state.
    #[inline]
    pub fn state_mut(&mut self) -> &mut State {
        unsafe { &mut (*self.raw.cast::<GenerationLayout>()).state }
    }

    // Returns the published successor, if a resize has started.
    #[inline]
    pub fn next(&self) -> Option<Generation> {
        let next = self.state().next.load(Ordering::Acquire);

        // Safety: `next` is either null or a live generation, which outlives
        // this one.
        (!next.is_null()).then(|| unsafe { Generation::from_raw(next) })
    }

    // Returns the pre-allocated successor, if it has been allocated.
    #[inline]
    pub fn pool(&self) -> Option<Generation> {
        let pool = self.state().pool.load(Ordering::Acquire);

        // Safety: same as `next`, the pool is never freed before this generation.
        (!pool.is_null()).then(|| unsafe { Generation::from_raw(pool) })
    }

    // Deallocate the generation.
    //
    // Neither the successor nor the pool is freed.
    //
    // # Safety
    //
    // The generation must not be accessed after this call.
    pub unsafe fn dealloc(generation: Generation) {
        let layout = Generation::layout(generation.len());
        unsafe {
            ptr::drop_in_place(generation.raw.cast::<GenerationLayout>());
            alloc::dealloc(generation.raw.cast::<u8>(), layout);
        }
    }

    // The generation layout used for allocation.
    fn layout(len: usize) -> Layout {
        let size = mem::size_of::<GenerationLayout>()
            + (mem::size_of::<AtomicUsize>() * len) // keys
            + (mem::size_of::<AtomicUsize>() * len); // values
        Layout::from_size_align(size, mem::align_of::<GenerationLayout>())
            .unwrap_or_else(|_| panic!("generation of {len} slots exceeds the address space"))
    }
}

#[test]
fn layout() {
    unsafe {
        let generation = Generation::alloc(8, 2);
        let generation = Generation::from_raw(generation.raw);
        assert_eq!(generation.mask, 7);
        assert_eq!(generation.len(), 8);
        assert_eq!(generation.state().slices.len(), 2);
        assert!(generation.next().is_none());
        assert!(generation.pool().is_none());

        // Keys and values are zeroed and do not alias.
        for i in 0..8 {
            assert_eq!(generation.key(i).load(Ordering::Relaxed), 0);
            assert_eq!(generation.value(i).load(Ordering::Relaxed), 0);
        }

        generation.key(7).store(3, Ordering::Relaxed);
        generation.value(0).store(4, Ordering::Relaxed);
        assert_eq!(generation.value(7).load(Ordering::Relaxed), 0);
        assert_eq!(generation.key(0).load(Ordering::Relaxed), 0);

        Generation::dealloc(generation);
    }
}
