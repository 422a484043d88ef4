//! Packing and unpacking of header/footer words.
//!
//! A tag is a single 64-bit word that carries a block's size together with
//! three one-bit flags. Blocks are always a multiple of 16 bytes, so the low
//! four bits of the size are always zero and can be reused for flags without
//! losing any information. This module is the only place that is allowed to
//! know about that bit layout; everywhere else a tag is just an opaque
//! [`Tag`].

/// A packed header/footer word.
pub type Tag = u64;

/// Marks a block as currently handed out to the client.
const ALLOCATED: Tag = 1 << 0;
/// Marks the preceding block (in address order) as allocated.
///
/// This lets an allocated block skip writing a footer, since nothing will
/// ever need to walk backwards from it.
const PREV_ALLOCATED: Tag = 1 << 1;
/// Marks the block as a mini-block cluster (see [`crate::raw_allocator::cluster`]).
const CLUSTER: Tag = 1 << 2;

const SIZE_MASK: Tag = !0xF;

/// Packs a block size and its flags into a tag word.
///
/// # Panics
/// Panics (in debug builds) if `size` is not a multiple of 16.
pub const fn pack(size: usize, allocated: bool, prev_allocated: bool, cluster: bool) -> Tag {
    debug_assert!(size & 0xF == 0, "block size must be 16-byte aligned");
    let mut word = size as Tag;
    if allocated {
        word |= ALLOCATED;
    }
    if prev_allocated {
        word |= PREV_ALLOCATED;
    }
    if cluster {
        word |= CLUSTER;
    }
    word
}

/// Extracts the size encoded in a tag, in bytes.
pub const fn size(tag: Tag) -> usize {
    (tag & SIZE_MASK) as usize
}

/// Whether the block described by `tag` is allocated.
pub const fn allocated(tag: Tag) -> bool {
    tag & ALLOCATED != 0
}

/// Whether the block immediately preceding the one described by `tag` is
/// allocated.
pub const fn prev_allocated(tag: Tag) -> bool {
    tag & PREV_ALLOCATED != 0
}

/// Whether the block described by `tag` is a mini-block cluster.
pub const fn cluster(tag: Tag) -> bool {
    tag & CLUSTER != 0
}

/// Replaces the size of a tag, keeping its flags.
pub const fn with_size(tag: Tag, size: usize) -> Tag {
    debug_assert!(size & 0xF == 0, "block size must be 16-byte aligned");
    (tag & !SIZE_MASK) | (size as Tag)
}

/// Replaces the `prev_allocated` flag of a tag, keeping everything else.
pub const fn with_prev_allocated(tag: Tag, prev_allocated: bool) -> Tag {
    if prev_allocated {
        tag | PREV_ALLOCATED
    } else {
        tag & !PREV_ALLOCATED
    }
}

/// Replaces the `allocated` flag of a tag, keeping everything else.
pub const fn with_allocated(tag: Tag, allocated: bool) -> Tag {
    if allocated {
        tag | ALLOCATED
    } else {
        tag & !ALLOCATED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_size_and_flags() {
        let tag = pack(48, true, false, true);
        assert_eq!(size(tag), 48);
        assert!(allocated(tag));
        assert!(!prev_allocated(tag));
        assert!(cluster(tag));
    }

    #[test]
    fn encodes_large_sizes_losslessly() {
        // 2**36 bytes, the lossless bound this encoding must hold up to.
        let huge = 1usize << 36;
        let tag = pack(huge, false, false, false);
        assert_eq!(size(tag), huge);
    }

    #[test]
    fn with_size_preserves_flags() {
        let tag = pack(32, true, true, false);
        let resized = with_size(tag, 64);
        assert_eq!(size(resized), 64);
        assert!(allocated(resized));
        assert!(prev_allocated(resized));
    }

    #[test]
    fn with_prev_allocated_toggles_only_that_bit() {
        let tag = pack(32, true, false, false);
        let updated = with_prev_allocated(tag, true);
        assert!(prev_allocated(updated));
        assert!(allocated(updated));
        let cleared = with_prev_allocated(updated, false);
        assert!(!prev_allocated(cleared));
    }
}
