//! Segregated-fit allocator for embedded systems
//!
//! This crate provides a single type called [`Allocator`]. This type implements
//! the [`core::alloc::GlobalAlloc`]-trait, which is required to use the
//! [`alloc`-crate][alloc] on `#![no_std]`-targets.
//!
//! # Usage
//! Just copy and paste the following code snippet into your binary crate and
//! adjust the number of bytes of the heap (here 16K) to your needs:
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: seglloc::Allocator<16384> = seglloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore. Now you can just `use alloc::vec::Vec` or even
//! `use alloc::collections::BTreeMap`, i.e. every collection which is
//! normally provided by `std`.
//!
//! # Implementation
//! Internally the heap is a single contiguous arena, grown by a bump pointer
//! as requests come in, and carved up with boundary-tag headers into blocks.
//! Freed blocks are kept on one of fourteen segregated size-class free lists
//! (see [`raw_allocator`]) instead of a single linear list, so a fit is
//! usually found without scanning the whole heap; the four smallest classes
//! are exact-size so their first entry is always usable, the middle classes
//! are scanned for a close fit, and the remainder coalesce immediately on
//! release. Requests under 8 bytes are routed to a sub-allocator that carves
//! 128-byte blocks into six 16-byte "mini-blocks", since a plain 32-byte
//! minimum block would waste most of a tiny request.
//!
//! Every payload handed out is 16-byte aligned; requests for a coarser
//! alignment than that are rejected (see [`GlobalAlloc::alloc`] below).
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

mod raw_allocator;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use raw_allocator::RawAllocator;
use spin::mutex::SpinMutex;

/// Largest alignment this allocator can service. Every payload it hands out
/// is 16-byte aligned by construction (the block layout itself demands it),
/// so an alignment request coarser than this cannot be honored.
const MAX_SUPPORTED_ALIGN: usize = 16;

/// Smallest arena big enough to get through `init`: prologue + epilogue
/// sentinels (16 bytes) plus one chunk-sized extension.
const MIN_HEAP_SIZE: usize = 32 + 4096;

/// The segregated-fit memory allocator for embedded systems.
///
/// This is the core type of this crate: it is an allocator with a predefined
/// heap size, so heap memory usage is statically bounded and counted into the
/// program's static memory (e.g. `.data`/`.bss` sections) rather than growing
/// unboundedly at runtime.
///
/// Its usage is simple: just copy and paste the following into the binary
/// crate you're developing. The heap size is `16384` bytes (16K) in this
/// example; adjust it to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: seglloc::Allocator<16384> = seglloc::Allocator::new();
/// ```
///
/// Note to users with things like MPUs, MMUs, etc.: this crate doesn't use
/// any such feature itself. If memory protection of the heap region is
/// desired, take the address of the static and its known size `N` and set
/// that up separately.
pub struct Allocator<const N: usize>(SpinMutex<RawAllocator<N>>);

impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the static allocator.
    ///
    /// # Panics
    /// This function will panic if the supplied buffer size, i.e. `N`, is
    /// less than the minimum required to hold the sentinel blocks and one
    /// chunk-sized extension, or is not divisible by 16 (every block in this
    /// allocator, including the arena itself, is 16-byte aligned).
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        assert!(N >= MIN_HEAP_SIZE, "too small heap memory");
        assert!(N % 16 == 0, "memory size has to be divisible by 16");
        Self(SpinMutex::new(RawAllocator::new()))
    }

    /// Runs the allocator's internal consistency checks, panicking (in debug
    /// builds only) if any of them fail. `line` is only used to identify the
    /// call site in the panic message.
    ///
    /// This is a debugging aid, not a public guarantee: a full heap walk is
    /// too slow to run unconditionally, so in release builds this function
    /// does nothing.
    #[cfg(debug_assertions)]
    pub fn debug_check(&self, line: u32) {
        assert!(
            self.0.lock().heap_check(line),
            "heap consistency check failed at line {line}"
        );
    }
}

impl<const N: usize> Default for Allocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a `Layout` into the raw byte count [`RawAllocator::acquire`]
/// expects, or `None` if the alignment is coarser than this allocator can
/// honor.
///
/// Every payload is already 16-byte aligned, so any `align() <= 16` is
/// trivially satisfied; `align() <= size_of::<usize>()` is guaranteed by
/// `Layout` itself to be no coarser than the block's own natural alignment,
/// but a `repr(align(32))` type, for instance, is out of reach.
fn raw_size_for(layout: Layout) -> Option<usize> {
    if layout.align() > MAX_SUPPORTED_ALIGN {
        return None;
    }
    Some(layout.size())
}

unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(size) = raw_size_for(layout) else {
            return core::ptr::null_mut();
        };
        self.0
            .lock()
            .acquire(size)
            .map_or(core::ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let _ = self.0.lock().release(NonNull::new(ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(new_size) = raw_size_for(Layout::from_size_align_unchecked(new_size, layout.align())) else {
            return core::ptr::null_mut();
        };
        let Some(ptr) = NonNull::new(ptr) else {
            // realloc(NULL, size) is equivalent to acquire, matching mm.c's
            // `if (ptr == NULL) { return malloc(size); }`.
            return self
                .0
                .lock()
                .acquire(new_size)
                .map_or(core::ptr::null_mut(), NonNull::as_ptr);
        };
        self.0
            .lock()
            .resize(ptr, new_size)
            .map_or(core::ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let Some(size) = raw_size_for(layout) else {
            return core::ptr::null_mut();
        };
        self.0
            .lock()
            .zeroed_acquire(1, size)
            .map_or(core::ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_a_const_fn_with_sensible_defaults() {
        const _ALLOCATOR: Allocator<16384> = Allocator::new();
    }

    #[test]
    #[should_panic(expected = "too small heap memory")]
    fn new_panics_on_heap_too_small() {
        let _ = Allocator::<64>::new();
    }

    #[test]
    #[should_panic(expected = "divisible by 16")]
    fn new_panics_on_misaligned_size() {
        let _ = Allocator::<{ MIN_HEAP_SIZE + 4 }>::new();
    }

    #[test]
    fn alloc_dealloc_round_trips_through_global_alloc_trait() {
        let allocator = Allocator::<16384>::new();
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            core::ptr::write_bytes(ptr, 0xAB, 64);
            allocator.dealloc(ptr, layout);
        }
    }

    #[test]
    fn alloc_rejects_alignment_coarser_than_sixteen() {
        let allocator = Allocator::<16384>::new();
        let layout = Layout::from_size_align(64, 32).unwrap();
        unsafe {
            assert!(allocator.alloc(layout).is_null());
        }
    }

    #[test]
    fn alloc_zeroed_clears_the_returned_memory() {
        let allocator = Allocator::<16384>::new();
        let layout = Layout::from_size_align(128, 8).unwrap();
        unsafe {
            let ptr = allocator.alloc(layout);
            core::ptr::write_bytes(ptr, 0xFF, 128);
            allocator.dealloc(ptr, layout);

            let zeroed = allocator.alloc_zeroed(layout);
            assert!(!zeroed.is_null());
            for i in 0..128 {
                assert_eq!(*zeroed.add(i), 0);
            }
        }
    }

    #[test]
    fn realloc_grows_in_place_or_copies_and_preserves_contents() {
        let allocator = Allocator::<16384>::new();
        let layout = Layout::from_size_align(32, 8).unwrap();
        unsafe {
            let ptr = allocator.alloc(layout);
            core::ptr::write_bytes(ptr, 0x42, 32);
            let grown = allocator.realloc(ptr, layout, 256);
            assert!(!grown.is_null());
            for i in 0..32 {
                assert_eq!(*grown.add(i), 0x42);
            }
        }
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_null() {
        let allocator = Allocator::<16384>::new();
        let layout = Layout::from_size_align(32, 8).unwrap();
        unsafe {
            let ptr = allocator.alloc(layout);
            assert!(allocator.realloc(ptr, layout, 0).is_null());
        }
    }

    #[test]
    fn realloc_of_null_falls_back_to_acquire() {
        let allocator = Allocator::<16384>::new();
        let layout = Layout::from_size_align(32, 8).unwrap();
        unsafe {
            let ptr = allocator.realloc(core::ptr::null_mut(), layout, 64);
            assert!(!ptr.is_null());
            allocator.dealloc(ptr, Layout::from_size_align(64, 8).unwrap());
        }
    }

    #[test]
    fn debug_check_passes_after_normal_use() {
        let allocator = Allocator::<16384>::new();
        let layout = Layout::from_size_align(48, 8).unwrap();
        unsafe {
            let ptr = allocator.alloc(layout);
            allocator.dealloc(ptr, layout);
        }
        #[cfg(debug_assertions)]
        allocator.debug_check(line!());
    }
}
