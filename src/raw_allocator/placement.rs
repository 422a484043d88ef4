//! Choosing which free block satisfies a request, and growing the arena
//! when none does.
use super::block::{Block, MIN_BLOCK_SIZE, WORD};
use super::buffer::{Buffer, BumpExtender};
use super::coalesce;
use super::freelist::{self, FreeListRegistry};

/// Below this many bytes of growth it is not worth asking the extender at
/// all; mirrors `extend_heap`'s `MAX(words, CHUNKSIZE)` in the CS:APP
/// skeleton this module traces back to.
const MIN_EXTENSION: usize = 4096;

/// Searches the free lists for a block that can satisfy `requested` bytes,
/// removing it from whichever list holds it. Returns `None` if no existing
/// free block qualifies; the caller then has to grow the arena via
/// [`extend_heap`].
///
/// The exact classes (32/48/64 bytes) are plain first-fit: every block on
/// those lists is already exactly the right size, so the head is always
/// usable. Every other class (both range classes and the top class) is
/// scanned by [`scan_class`]: an exact size match is taken immediately, and
/// otherwise only a block with at least `MIN_BLOCK_SIZE` bytes to spare is
/// accepted, since anything closer can't be split into a usable remainder
/// (see `split.rs`). A miss in the request's own class escalates class by
/// class, applying that same test at each step, all the way to the top
/// class; if every class misses, the caller has to grow the arena.
///
/// # Safety
/// `requested` must be a 16-byte-aligned size at least `MIN_BLOCK_SIZE`.
pub unsafe fn find_fit<const N: usize>(
    buffer: &mut Buffer<N>,
    registry: &mut FreeListRegistry,
    requested: usize,
) -> Option<Block> {
    let class = freelist::class_of(requested);
    debug_assert_ne!(class, freelist::CLUSTER_CLASS);

    if freelist::is_exact_class(class) {
        if let Some(offset) = registry.pop_front(buffer, class) {
            return Some(Block::at(offset));
        }
    } else if let Some(block) = scan_class(buffer, registry, class, requested) {
        return Some(block);
    }

    // Escalate to every class above the natural one, applying the same
    // exact-match-or-clean-split-margin test at each step: a range class
    // above ours is, by construction, populated with blocks bigger than
    // anything sent to a lower class, but that alone doesn't guarantee a
    // clean split (a block just one class up can still be only 16 bytes
    // larger than `requested`), so each class still has to be scanned
    // rather than just popped from.
    let mut next_class = class + 1;
    while next_class < freelist::NUM_CLASSES {
        if let Some(block) = scan_class(buffer, registry, next_class, requested) {
            return Some(block);
        }
        next_class += 1;
    }
    None
}

/// Scans `class`'s free list for a block that can satisfy `requested` bytes.
/// An exact size match is returned immediately (using it whole needs no
/// split, so the margin below doesn't apply); otherwise the first block with
/// at least `MIN_BLOCK_SIZE` bytes of slack over `requested` is remembered
/// and returned, since a smaller margin would leave a remainder too small to
/// become its own block. A block that merely fits but falls short of that
/// margin is skipped rather than settled for — the caller escalates to the
/// next class (or, failing all of them, extends the arena) instead.
unsafe fn scan_class<const N: usize>(
    buffer: &mut Buffer<N>,
    registry: &mut FreeListRegistry,
    class: usize,
    requested: usize,
) -> Option<Block> {
    let mut exact_match: Option<usize> = None;
    let mut first_adequate: Option<usize> = None;
    for offset in registry.iter(buffer, class) {
        let size = Block::at(offset).size(buffer);
        if size < requested {
            continue;
        }
        if size == requested {
            exact_match = Some(offset);
            break;
        }
        if first_adequate.is_none() && size >= requested + MIN_BLOCK_SIZE {
            first_adequate = Some(offset);
        }
    }
    let offset = exact_match.or(first_adequate)?;
    registry.remove(buffer, class, offset);
    Some(Block::at(offset))
}

/// Grows the arena to make room for `requested` bytes, coalescing the new
/// space with a free block that may already sit just before the old
/// epilogue. Returns the resulting free block (not linked into any free
/// list, same contract as [`find_fit`]) together with the offset of the
/// fresh epilogue, or `None` if the extender is exhausted.
///
/// # Safety
/// `epilogue_offset` must name the arena's current epilogue (an allocated,
/// zero-size block with no successor).
pub unsafe fn extend_heap<const N: usize>(
    buffer: &mut Buffer<N>,
    registry: &mut FreeListRegistry,
    extender: &mut BumpExtender,
    epilogue_offset: usize,
    requested: usize,
) -> Option<(Block, usize)> {
    let growth = requested.max(MIN_EXTENSION);
    debug_assert_eq!(growth % 16, 0);
    let epilogue = Block::at(epilogue_offset);
    let prev_allocated = epilogue.prev_allocated(buffer);

    // `growth` is always a 16-byte multiple and `epilogue_offset` is always
    // exactly `extender.high_water() - WORD` (the one word reserved for the
    // epilogue); advancing the mark by exactly `growth` keeps that
    // invariant intact for the new epilogue written below.
    extender.extend::<N>(growth)?;

    let new_block = Block::at(epilogue_offset);
    new_block.write(buffer, growth, false, prev_allocated, false);
    let new_epilogue = new_block.next(buffer);
    new_epilogue.write(buffer, 0, true, false, false);

    let merged = coalesce::coalesce(buffer, registry, new_block);
    Some((merged, new_epilogue.header_offset()))
}
