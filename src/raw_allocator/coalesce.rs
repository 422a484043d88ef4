//! Boundary-tag coalescing.
//!
//! Takes a block that has just become free and is not yet on any free list,
//! and merges it with whichever of its address-order neighbours are also
//! free, using `prev_allocated` to decide whether a left neighbour even
//! needs to be looked at (and its footer to find where it starts).
use super::block::Block;
use super::buffer::Buffer;
use super::freelist::{self, FreeListRegistry};

/// Merges `block` with its free neighbours, removing any merged neighbour
/// from its free list. Returns the resulting block (which may be `block`
/// itself, or a neighbour that absorbed it). Does not insert the result
/// into any free list and does not write its footer for the final size —
/// callers finish both of those once they've chosen a final size is
/// final (callers typically call this once right before insertion).
///
/// Ah, to be precise: this function *does* write the merged block's
/// header+footer and propagates `prev_allocated` to whatever now follows it,
/// since those need to be correct the instant neighbours are merged away.
/// It simply never pushes the result onto a class list — that decision
/// belongs to the caller.
///
/// # Safety
/// `block.allocated(buffer) == false` and `block` is not currently linked
/// into any free list.
pub unsafe fn coalesce<const N: usize>(
    buffer: &mut Buffer<N>,
    registry: &mut FreeListRegistry,
    block: Block,
) -> Block {
    debug_assert!(!block.allocated(buffer));

    let prev_is_free = !block.prev_allocated(buffer);
    let next = block.next(buffer);
    let next_is_free = !next.allocated(buffer);

    let (start, end_block) = match (prev_is_free, next_is_free) {
        (false, false) => (block, block),
        (false, true) => {
            unlink_free_block(buffer, registry, next);
            (block, next)
        }
        (true, false) => {
            let prev = block.prev(buffer);
            unlink_free_block(buffer, registry, prev);
            (prev, block)
        }
        (true, true) => {
            let prev = block.prev(buffer);
            unlink_free_block(buffer, registry, prev);
            unlink_free_block(buffer, registry, next);
            (prev, next)
        }
    };

    let merged_size = end_block.next(buffer).header_offset() - start.header_offset();
    let prev_allocated = start.prev_allocated(buffer);
    start.write(buffer, merged_size, false, prev_allocated, false);
    start.propagate_prev_allocated(buffer);
    start
}

/// Removes a free, non-cluster block from whatever class its size maps to.
///
/// # Safety
/// `victim` must currently be a free block on the list its size indicates.
unsafe fn unlink_free_block<const N: usize>(
    buffer: &mut Buffer<N>,
    registry: &mut FreeListRegistry,
    victim: Block,
) {
    let size = victim.size(buffer);
    let class = freelist::class_of(size);
    debug_assert_ne!(
        class,
        freelist::CLUSTER_CLASS,
        "an ordinary free block can never land in the cluster class"
    );
    registry.remove(buffer, class, victim.header_offset());
}
