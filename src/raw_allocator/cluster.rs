//! The mini-block cluster sub-allocator.
//!
//! Requests under 8 bytes would waste most of a 32-byte minimum block, so
//! they are routed through here instead: six 16-byte "mini-blocks" are
//! carved out of one ordinary 128-byte block, with a bitmap tracking which
//! of the six are in use. From the outside — the walker, the coalescer, the
//! placement engine — a cluster is just an allocated 128-byte block; all of
//! the bookkeeping below is local to this module.
use super::block::{Block, WORD};
use super::buffer::Buffer;
use super::tag;

/// Total size of a cluster block, including its own header.
pub const CLUSTER_SIZE: usize = 128;
/// Number of mini-blocks per cluster.
pub const MINI_COUNT: usize = 6;
/// Size of one mini-block: an 8-byte mini-header plus 8 payload bytes.
pub const MINI_SLOT_SIZE: usize = 16;
/// Usable payload size of a mini-block.
pub const MINI_PAYLOAD_SIZE: usize = WORD;

// Layout mirrors an ordinary doubly-linked free block: header, then the
// word that would hold `next`, then the word that would hold `prev`. A
// cluster keeps the `next` word (it is still singly-linked into class 0)
// but repurposes the `prev` word as its bitmap, per spec. header(8) +
// next(8) + bitmap(8) + 6 * 16-byte slots(96) = 120; the remaining 8 bytes
// of the 128-byte cluster are unused padding.
const NEXT_OFFSET: usize = WORD;
const BITMAP_OFFSET: usize = 2 * WORD;
const SLOTS_OFFSET: usize = 3 * WORD;
const FULL_MASK: u64 = (1 << MINI_COUNT) - 1;

const fn build_mini_lookup() -> [u8; 64] {
    let mut table = [MINI_COUNT as u8; 64];
    let mut bitmap = 0usize;
    while bitmap < 64 {
        let mut bit = 0;
        while bit < MINI_COUNT {
            if bitmap & (1 << bit) == 0 {
                table[bitmap] = bit as u8;
                break;
            }
            bit += 1;
        }
        bitmap += 1;
    }
    table
}

/// `bitmap -> lowest clear bit, or MINI_COUNT if none` lookup table.
static MINI_LOOKUP: [u8; 64] = build_mini_lookup();

fn slot_offset(cluster_offset: usize, ordinal: usize) -> usize {
    cluster_offset + SLOTS_OFFSET + ordinal * MINI_SLOT_SIZE
}

/// Converts an allocated, empty block of at least [`CLUSTER_SIZE`] bytes
/// into a freshly opened cluster: sets the cluster bit, clears the bitmap,
/// and stamps each mini-block's ordinal into its mini-header. Does not touch
/// the class-0 list; the caller pushes it there itself once opened.
///
/// The block's existing size is kept as-is rather than forced to
/// `CLUSTER_SIZE`: the placement engine's splitter only carves a clean
/// remainder off when what's left over is itself a usable block, so the
/// block found to satisfy a request for `CLUSTER_SIZE` bytes may come back
/// slightly larger. The extra bytes simply sit unused past the sixth
/// mini-slot.
///
/// # Safety
/// `cluster_offset` must name an allocated block of at least [`CLUSTER_SIZE`]
/// bytes.
pub unsafe fn open<const N: usize>(
    buffer: &mut Buffer<N>,
    cluster_offset: usize,
    prev_allocated: bool,
) {
    let block = Block::at(cluster_offset);
    let size = block.size(buffer);
    debug_assert!(size >= CLUSTER_SIZE, "cluster backing block too small");
    block.write(buffer, size, true, prev_allocated, true);
    buffer.write_word(cluster_offset + BITMAP_OFFSET, 0);
    let mut ordinal = 0;
    while ordinal < MINI_COUNT {
        buffer.write_word(slot_offset(cluster_offset, ordinal), mini_header(ordinal));
        ordinal += 1;
    }
}

/// Packs a mini-block's ordinal into the same tag shape as an ordinary
/// header, with the `cluster` flag set. This lets [`super::RawAllocator::release`]
/// tell a mini-block payload apart from an ordinary block payload using the
/// exact same "read the word at `p - 8`, check the cluster bit" test it uses
/// for everything else, instead of a separate code path.
fn mini_header(ordinal: usize) -> tag::Tag {
    tag::pack(ordinal * MINI_SLOT_SIZE, false, false, true)
}

fn mini_ordinal(word: tag::Tag) -> usize {
    debug_assert!(tag::cluster(word), "not a mini-header word");
    tag::size(word) / MINI_SLOT_SIZE
}

fn bitmap_of<const N: usize>(buffer: &Buffer<N>, cluster_offset: usize) -> u64 {
    // SAFETY: callers only ever pass an opened cluster's offset.
    unsafe { buffer.read_word(cluster_offset + BITMAP_OFFSET) }
}

/// Whether every mini-block in this cluster is in use.
pub fn is_full<const N: usize>(buffer: &Buffer<N>, cluster_offset: usize) -> bool {
    bitmap_of(buffer, cluster_offset) & FULL_MASK == FULL_MASK
}

/// Whether no mini-block in this cluster is in use.
pub fn is_empty<const N: usize>(buffer: &Buffer<N>, cluster_offset: usize) -> bool {
    bitmap_of(buffer, cluster_offset) & FULL_MASK == 0
}

/// Reserves the lowest free mini-block, returning its payload offset and
/// whether this reservation just filled the cluster.
///
/// # Safety
/// `cluster_offset` must name an opened cluster with at least one free
/// mini-block.
pub unsafe fn reserve_mini<const N: usize>(
    buffer: &mut Buffer<N>,
    cluster_offset: usize,
) -> (usize, bool) {
    let bitmap = bitmap_of(buffer, cluster_offset);
    let ordinal = MINI_LOOKUP[(bitmap & 0x3F) as usize] as usize;
    debug_assert!(ordinal < MINI_COUNT, "reserve_mini called on a full cluster");
    let new_bitmap = bitmap | (1 << ordinal);
    buffer.write_word(cluster_offset + BITMAP_OFFSET, new_bitmap);
    let payload_offset = slot_offset(cluster_offset, ordinal) + WORD;
    (payload_offset, new_bitmap & FULL_MASK == FULL_MASK)
}

/// Releases the mini-block owning `payload_offset`, returning the owning
/// cluster's offset, whether the cluster was full before this release, and
/// whether it is now completely empty.
///
/// # Safety
/// `payload_offset` must be a pointer previously returned by
/// [`reserve_mini`] and not yet released.
pub unsafe fn release_mini<const N: usize>(
    buffer: &mut Buffer<N>,
    payload_offset: usize,
) -> (usize, bool, bool) {
    let mini_header_offset = payload_offset - WORD;
    let ordinal = mini_ordinal(buffer.read_word(mini_header_offset));
    debug_assert!(ordinal < MINI_COUNT, "corrupt mini-header ordinal");
    let cluster_offset = mini_header_offset - SLOTS_OFFSET - ordinal * MINI_SLOT_SIZE;

    let bitmap = bitmap_of(buffer, cluster_offset);
    let was_full = bitmap & FULL_MASK == FULL_MASK;
    let new_bitmap = bitmap & !(1 << ordinal);
    buffer.write_word(cluster_offset + BITMAP_OFFSET, new_bitmap);
    let now_empty = new_bitmap & FULL_MASK == 0;
    (cluster_offset, was_full, now_empty)
}

/// Reads the class-0 forward link out of a cluster. Exposed so
/// [`super::freelist::FreeListRegistry`]'s generic link accessors (which
/// read/write at `offset + WORD`) agree with this module's layout; kept
/// here only as documentation that the two must never drift apart.
pub const fn next_link_offset(cluster_offset: usize) -> usize {
    cluster_offset + NEXT_OFFSET
}

/// Clears the cluster bit on an all-free cluster, turning it back into a
/// plain free block tag ready for the coalescer. Does not write a footer:
/// the caller (the coalescer) writes the footer once it knows the block's
/// final, possibly-merged size.
///
/// # Safety
/// `cluster_offset` must name a cluster with [`is_empty`] true.
pub unsafe fn close<const N: usize>(buffer: &mut Buffer<N>, cluster_offset: usize) {
    debug_assert!(is_empty(buffer, cluster_offset));
    let block = Block::at(cluster_offset);
    let current = block.tag(buffer);
    let cleared = tag::pack(
        tag::size(current),
        false,
        tag::prev_allocated(current),
        false,
    );
    block.set_tag(buffer, cleared);
}
