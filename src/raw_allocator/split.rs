//! Splitting a placed block down to the requested size.
use super::block::{Block, MIN_BLOCK_SIZE};
use super::buffer::Buffer;
use super::freelist::{self, FreeListRegistry};

/// `block`, of total size `block.size()`, has just been chosen to satisfy a
/// request of `requested` bytes (`requested <= block.size()`) and is already
/// marked allocated. If the leftover is big enough to be its own block, it
/// is carved off, given a fresh header/footer, and pushed onto the free list
/// for its size; otherwise `block` is handed out whole. Either way, the
/// `prev_allocated` bit of whatever block now follows the allocation is
/// brought up to date.
///
/// # Safety
/// `block` must already be marked allocated with its original (pre-split)
/// size, and `requested` must be a 16-byte-aligned size no larger than that.
pub unsafe fn split<const N: usize>(
    buffer: &mut Buffer<N>,
    registry: &mut FreeListRegistry,
    block: Block,
    requested: usize,
) {
    debug_assert!(block.allocated(buffer));
    debug_assert_eq!(requested % 16, 0);

    let total = block.size(buffer);
    debug_assert!(requested <= total);
    let remainder = total - requested;

    if remainder >= MIN_BLOCK_SIZE {
        let prev_allocated = block.prev_allocated(buffer);
        block.write(buffer, requested, true, prev_allocated, false);

        let free_block = block.next(buffer);
        free_block.write(buffer, remainder, false, true, false);
        registry.push_front(buffer, freelist::class_of(remainder), free_block.header_offset());
        free_block.propagate_prev_allocated(buffer);
    } else {
        block.propagate_prev_allocated(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_off_a_usable_remainder() {
        let mut buffer = Buffer::<128>::new();
        let mut registry = FreeListRegistry::new();
        let block = Block::at(0);
        unsafe {
            block.write(&mut buffer, 96, true, true, false);
            let epilogue = block.next(&buffer);
            epilogue.write(&mut buffer, 0, true, false, false);

            split(&mut buffer, &mut registry, block, 32);

            assert_eq!(block.size(&buffer), 32);
            assert!(block.allocated(&buffer));

            let remainder = block.next(&buffer);
            assert_eq!(remainder.size(&buffer), 64);
            assert!(!remainder.allocated(&buffer));
            assert!(remainder.prev_allocated(&buffer));

            let after = remainder.next(&buffer);
            assert!(!after.prev_allocated(&buffer));

            assert_eq!(
                registry.head(freelist::class_of(64)),
                Some(remainder.header_offset())
            );
        }
    }

    #[test]
    fn does_not_split_when_remainder_too_small() {
        let mut buffer = Buffer::<128>::new();
        let mut registry = FreeListRegistry::new();
        let block = Block::at(0);
        unsafe {
            // remainder would be 16, below MIN_BLOCK_SIZE (32)
            block.write(&mut buffer, 48, true, true, false);
            let epilogue = block.next(&buffer);
            epilogue.write(&mut buffer, 0, true, false, false);

            split(&mut buffer, &mut registry, block, 32);

            assert_eq!(block.size(&buffer), 48);
            assert!(block.allocated(&buffer));
            let after = block.next(&buffer);
            assert!(after.prev_allocated(&buffer));
            for class in 0..freelist::NUM_CLASSES {
                assert!(registry.is_empty(class));
            }
        }
    }
}
