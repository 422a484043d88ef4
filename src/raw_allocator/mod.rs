//! This module provides the raw allocator and its support types.
//!
//! A "raw allocator" is one, that simply gets a request for a specific
//! memory size (already rounded up for the header and for 16-byte
//! alignment) and hands back a pointer, without worrying about the
//! conversion from a [`core::alloc::Layout`].
mod block;
mod buffer;
mod cluster;
mod coalesce;
mod freelist;
mod placement;
mod split;
mod tag;

use block::{Block, ALIGN, MIN_BLOCK_SIZE, WORD};
use buffer::{round_up, Buffer, BumpExtender};
use core::ptr::NonNull;
use freelist::FreeListRegistry;

/// Bytes requested from the arena extender the first time it is grown, and
/// on every miss thereafter that doesn't itself ask for more.
const CHUNK_SIZE: usize = 4096;

/// An error occurred when calling [`RawAllocator::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    /// The pointer does not point into this arena at all.
    AllocationNotFound,
}

/// A raw memory allocator for contiguous slices of bytes without any
/// alignment handling of its own.
///
/// This allocator is an intermediate one: it does not need to handle the
/// alignment of a [`core::alloc::Layout`]. This abstracts the parts
/// "allocating memory with segregated free lists and a cluster
/// sub-allocator" and "translating a client's alignment request".
///
/// Note, that every payload handed out is 16-byte aligned.
pub struct RawAllocator<const N: usize> {
    buffer: Buffer<N>,
    extender: BumpExtender,
    registry: FreeListRegistry,
    epilogue_offset: usize,
    initialized: bool,
}

impl<const N: usize> RawAllocator<N> {
    /// Create a new, not-yet-initialized [`RawAllocator`].
    ///
    /// Initialization (writing the prologue/epilogue sentinels and making
    /// the first arena extension) happens lazily, on the first call to
    /// [`Self::acquire`] — a `const fn` cannot itself write into the
    /// buffer, since doing so requires the bump extender to run.
    pub const fn new() -> Self {
        Self {
            buffer: Buffer::new(),
            extender: BumpExtender::new(),
            registry: FreeListRegistry::new(),
            epilogue_offset: 0,
            initialized: false,
        }
    }

    /// Writes the prologue footer and epilogue header, then performs the
    /// first chunk-sized arena extension.
    ///
    /// # Panics
    /// Panics if the arena is too small to hold even the two sentinel words
    /// plus one chunk. Since [`crate::Allocator::new`] already asserts
    /// `N >= MIN_HEAP_SIZE`, this should never trigger in practice.
    fn init(&mut self) {
        if self.initialized {
            return;
        }

        // Both sentinel words are reserved in one extension: two separate
        // word-sized extends would each independently round up to 16 bytes
        // and leave an 8-byte gap between them, which would desynchronize
        // `epilogue_offset` from the extender's own high-water mark (an
        // invariant `extend_heap` below relies on to stay in bounds).
        let prologue_offset = self
            .extender
            .extend::<N>(2 * WORD)
            .expect("arena too small for the sentinel words");
        let epilogue_offset = prologue_offset + WORD;
        unsafe {
            Block::at(prologue_offset).write(&mut self.buffer, 0, true, true, false);
            Block::at(epilogue_offset).write(&mut self.buffer, 0, true, true, false);
        }
        self.epilogue_offset = epilogue_offset;
        self.initialized = true;

        if let Some((free_block, new_epilogue_offset)) = unsafe {
            placement::extend_heap(
                &mut self.buffer,
                &mut self.registry,
                &mut self.extender,
                self.epilogue_offset,
                CHUNK_SIZE,
            )
        } {
            self.epilogue_offset = new_epilogue_offset;
            let size = unsafe { free_block.size(&self.buffer) };
            let class = freelist::class_of(size);
            unsafe {
                self.registry
                    .push_front(&mut self.buffer, class, free_block.header_offset());
            }
        }
    }

    /// Finds a free block of at least `requested` bytes, extending the
    /// arena if the free lists can't satisfy it. The returned block is not
    /// linked into any free list.
    fn find_or_extend(&mut self, requested: usize) -> Option<Block> {
        unsafe {
            if let Some(block) = placement::find_fit(&mut self.buffer, &mut self.registry, requested) {
                return Some(block);
            }
            let (block, new_epilogue_offset) = placement::extend_heap(
                &mut self.buffer,
                &mut self.registry,
                &mut self.extender,
                self.epilogue_offset,
                requested,
            )?;
            self.epilogue_offset = new_epilogue_offset;
            Some(block)
        }
    }

    /// Marks `block` allocated (preserving its current size and
    /// `prev_allocated` bit), then splits off any usable remainder.
    fn place(&mut self, block: Block, requested: usize) {
        unsafe {
            let full_size = block.size(&self.buffer);
            let prev_allocated = block.prev_allocated(&self.buffer);
            block.write(&mut self.buffer, full_size, true, prev_allocated, false);
            split::split(&mut self.buffer, &mut self.registry, block, requested);
        }
    }

    /// Services a sub-8-byte request through the mini-block cluster
    /// sub-allocator, opening a fresh cluster if none has a free slot.
    fn acquire_mini(&mut self) -> Option<NonNull<u8>> {
        let cluster_offset = match self.registry.head(freelist::CLUSTER_CLASS) {
            Some(offset) => offset,
            None => {
                let block = self.find_or_extend(cluster::CLUSTER_SIZE)?;
                let prev_allocated = unsafe { block.prev_allocated(&self.buffer) };
                self.place(block, cluster::CLUSTER_SIZE);
                unsafe {
                    cluster::open(&mut self.buffer, block.header_offset(), prev_allocated);
                    self.registry.push_cluster(&mut self.buffer, block.header_offset());
                }
                block.header_offset()
            }
        };

        unsafe {
            let (payload_offset, became_full) = cluster::reserve_mini(&mut self.buffer, cluster_offset);
            if became_full {
                self.registry.pop_cluster(&mut self.buffer);
            }
            Some(self.buffer.ptr_at(payload_offset))
        }
    }

    /// Acquires `n` bytes, 16-byte aligned. Returns `None` for `n == 0` or
    /// on arena exhaustion.
    pub fn acquire(&mut self, n: usize) -> Option<NonNull<u8>> {
        self.init();

        if n == 0 {
            return None;
        }
        if n < WORD {
            return self.acquire_mini();
        }

        let requested = round_up(n + WORD, ALIGN).max(MIN_BLOCK_SIZE);
        let block = self.find_or_extend(requested)?;
        self.place(block, requested);
        Some(unsafe { self.buffer.ptr_at(block.payload_offset()) })
    }

    /// Acquires room for `count` elements of `elem_size` bytes each, zeroed.
    /// Returns `None` without touching the arena if `count * elem_size`
    /// overflows `usize`, matching `mm.c`'s `mm_calloc` overflow guard
    /// (`asize / elements != size`) ported to a `checked_mul`.
    pub fn zeroed_acquire(&mut self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(elem_size)?;
        let ptr = self.acquire(total)?;
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Releases a pointer previously returned by [`Self::acquire`]. A null
    /// pointer is a no-op; any other invalid pointer is a precondition
    /// violation (undefined behavior) — this debug build surfaces it as
    /// [`FreeError`] instead where it can be detected cheaply.
    ///
    /// # Safety
    /// `ptr`, if `Some`, must have been returned by a prior call to
    /// [`Self::acquire`] on this same allocator and not yet released.
    pub unsafe fn release(&mut self, ptr: Option<NonNull<u8>>) -> Result<(), FreeError> {
        let Some(ptr) = ptr else {
            return Ok(());
        };
        let payload_offset = self
            .buffer
            .offset_of(ptr.as_ptr())
            .ok_or(FreeError::AllocationNotFound)?;

        let header_offset = payload_offset - WORD;
        let word = self.buffer.read_word(header_offset);
        if tag::cluster(word) {
            let (cluster_offset, was_full, now_empty) = cluster::release_mini(&mut self.buffer, payload_offset);
            if was_full {
                self.registry.push_cluster(&mut self.buffer, cluster_offset);
            }
            if now_empty {
                if !was_full {
                    self.registry.remove_cluster_linear(&mut self.buffer, cluster_offset);
                }
                cluster::close(&mut self.buffer, cluster_offset);
                let block = Block::at(cluster_offset);
                let merged = coalesce::coalesce(&mut self.buffer, &mut self.registry, block);
                let class = freelist::class_of(merged.size(&self.buffer));
                self.registry.push_front(&mut self.buffer, class, merged.header_offset());
            }
            return Ok(());
        }

        let block = Block::at(header_offset);
        let size = block.size(&self.buffer);
        let prev_allocated = block.prev_allocated(&self.buffer);
        block.write(&mut self.buffer, size, false, prev_allocated, false);
        block.propagate_prev_allocated(&mut self.buffer);

        let merged = coalesce::coalesce(&mut self.buffer, &mut self.registry, block);
        let class = freelist::class_of(merged.size(&self.buffer));
        self.registry.push_front(&mut self.buffer, class, merged.header_offset());
        Ok(())
    }

    /// Resizes a previously-acquired block to `new_size` bytes. Equivalent
    /// to `acquire`/copy/`release`; kept here (instead of only at the
    /// `GlobalAlloc` layer) so it can read the old payload's size via the tag
    /// codec directly rather than trusting a `Layout` the caller might get
    /// wrong.
    ///
    /// # Safety
    /// Same precondition as [`Self::release`].
    pub unsafe fn resize(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 {
            let _ = self.release(Some(ptr));
            return None;
        }

        let old_payload_len = self.payload_len(ptr);
        let new_ptr = self.acquire(new_size)?;
        let copy_len = old_payload_len.min(new_size);
        core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len);
        let _ = self.release(Some(ptr));
        Some(new_ptr)
    }

    /// The usable payload length backing `ptr`, read from its (mini-)header.
    ///
    /// # Safety
    /// `ptr` must currently be allocated by this allocator.
    unsafe fn payload_len(&self, ptr: NonNull<u8>) -> usize {
        let payload_offset = self.buffer.offset_of(ptr.as_ptr()).expect("pointer outside arena");
        let header_offset = payload_offset - WORD;
        let word = self.buffer.read_word(header_offset);
        if tag::cluster(word) {
            cluster::MINI_PAYLOAD_SIZE
        } else {
            tag::size(word) - WORD
        }
    }

    /// Runs every heap-check listed in the crate's testable properties,
    /// stopping at the first violation. `line` identifies the call site for
    /// diagnostics and is otherwise unused; kept to mirror
    /// `dbg_requires(mm_checkheap(__LINE__))`-style instrumentation.
    ///
    /// Intended for debug assertions and tests only — a full scan is too
    /// slow to run unconditionally.
    pub fn heap_check(&self, _line: u32) -> bool {
        self.check_implicit_list() && self.check_free_lists()
    }

    fn check_implicit_list(&self) -> bool {
        if !self.initialized {
            return true;
        }
        let mut offset = 0;
        let mut prev_allocated_bit = true;
        let mut free_count = 0usize;
        loop {
            let block = Block::at(offset);
            let size = unsafe { block.size(&self.buffer) };
            if offset != 0 && size == 0 {
                if unsafe { block.prev_allocated(&self.buffer) } != prev_allocated_bit {
                    return false;
                }
                break; // epilogue
            }
            if offset != 0 {
                if size % 16 != 0 || size < MIN_BLOCK_SIZE {
                    return false;
                }
                if unsafe { block.prev_allocated(&self.buffer) } != prev_allocated_bit {
                    return false;
                }
            }
            let allocated = unsafe { block.allocated(&self.buffer) };
            let is_cluster = unsafe { block.is_cluster(&self.buffer) };
            if is_cluster && !allocated {
                return false;
            }
            if !allocated {
                free_count += 1;
                let tag_word = unsafe { block.tag(&self.buffer) };
                let footer = unsafe { self.buffer.read_word(block.footer_offset(&self.buffer)) };
                if tag_word != footer {
                    return false;
                }
            }
            if offset != 0 && !allocated && !prev_allocated_bit {
                return false; // two adjacent free blocks
            }
            prev_allocated_bit = allocated;
            offset += size.max(WORD);
            if offset > N {
                return false;
            }
        }
        let _ = free_count;
        true
    }

    fn check_free_lists(&self) -> bool {
        for class in 0..freelist::NUM_CLASSES {
            if class == freelist::CLUSTER_CLASS {
                continue;
            }
            for offset in unsafe { self.registry.iter(&self.buffer, class) } {
                let size = unsafe { Block::at(offset).size(&self.buffer) };
                if freelist::class_of(size) != class {
                    return false;
                }
            }
        }
        true
    }
}
