//! Block representation and the implicit-list walker.
//!
//! A [`Block`] is a lightweight handle (just a byte offset into the arena)
//! to a header word. It knows how to read/write its own header and footer
//! and how to find its neighbours in address order; it knows nothing about
//! free lists, classes, or clusters — those live one layer up.
use super::buffer::Buffer;
use super::tag::{self, Tag};

/// Size of one header/footer/link word, in bytes.
pub const WORD: usize = core::mem::size_of::<u64>();
/// Required alignment of every block and payload.
pub const ALIGN: usize = 16;
/// Smallest possible block: header + free-list `next` + free-list `prev` +
/// footer.
pub const MIN_BLOCK_SIZE: usize = 4 * WORD;

/// A handle to a block's header, identified by its byte offset in the
/// arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    header_offset: usize,
}

impl Block {
    pub const fn at(header_offset: usize) -> Self {
        Self { header_offset }
    }

    pub const fn header_offset(&self) -> usize {
        self.header_offset
    }

    /// The offset of this block's payload (first byte after the header).
    pub const fn payload_offset(&self) -> usize {
        self.header_offset + WORD
    }

    /// # Safety
    /// The header at `header_offset` must have been written.
    pub unsafe fn tag<const N: usize>(&self, buffer: &Buffer<N>) -> Tag {
        buffer.read_word(self.header_offset)
    }

    /// # Safety
    /// `header_offset + 8 <= N`.
    pub unsafe fn set_tag<const N: usize>(&self, buffer: &mut Buffer<N>, tag: Tag) {
        buffer.write_word(self.header_offset, tag);
    }

    /// # Safety
    /// Same as [`Self::tag`].
    pub unsafe fn size<const N: usize>(&self, buffer: &Buffer<N>) -> usize {
        tag::size(self.tag(buffer))
    }

    /// # Safety
    /// Same as [`Self::tag`].
    pub unsafe fn allocated<const N: usize>(&self, buffer: &Buffer<N>) -> bool {
        tag::allocated(self.tag(buffer))
    }

    /// # Safety
    /// Same as [`Self::tag`].
    pub unsafe fn prev_allocated<const N: usize>(&self, buffer: &Buffer<N>) -> bool {
        tag::prev_allocated(self.tag(buffer))
    }

    /// # Safety
    /// Same as [`Self::tag`].
    pub unsafe fn is_cluster<const N: usize>(&self, buffer: &Buffer<N>) -> bool {
        tag::cluster(self.tag(buffer))
    }

    /// Offset of the footer word of this block. Only meaningful for free,
    /// non-cluster blocks.
    ///
    /// # Safety
    /// Same as [`Self::tag`].
    pub unsafe fn footer_offset<const N: usize>(&self, buffer: &Buffer<N>) -> usize {
        self.header_offset + self.size(buffer) - WORD
    }

    /// Writes the matching footer for a free, non-cluster block. `tag` must
    /// already carry `allocated = false`.
    ///
    /// # Safety
    /// `tag` must describe this block's actual size.
    pub unsafe fn write_footer<const N: usize>(&self, buffer: &mut Buffer<N>, tag: Tag) {
        let offset = self.footer_offset(buffer);
        buffer.write_word(offset, tag);
    }

    /// Writes header and, if `allocated` is false, the matching footer.
    ///
    /// # Safety
    /// `size` must be a multiple of 16, at least [`MIN_BLOCK_SIZE`], and must
    /// fit within the arena.
    pub unsafe fn write<const N: usize>(
        &self,
        buffer: &mut Buffer<N>,
        size: usize,
        allocated: bool,
        prev_allocated: bool,
        cluster: bool,
    ) {
        let tag = tag::pack(size, allocated, prev_allocated, cluster);
        self.set_tag(buffer, tag);
        if !allocated {
            debug_assert!(!cluster, "a free block can never be a cluster");
            self.write_footer(buffer, tag);
        }
    }

    /// The block immediately following this one in address order.
    ///
    /// # Safety
    /// This block must not be the epilogue (size 0).
    pub unsafe fn next<const N: usize>(&self, buffer: &Buffer<N>) -> Block {
        Block::at(self.header_offset + self.size(buffer))
    }

    /// The block immediately preceding this one in address order.
    ///
    /// # Safety
    /// This block must not be the first block in the arena, and the caller
    /// must already know (via [`Self::prev_allocated`]) that the preceding
    /// block is free — only free blocks leave a readable footer behind.
    pub unsafe fn prev<const N: usize>(&self, buffer: &Buffer<N>) -> Block {
        let prev_footer_offset = self.header_offset - WORD;
        let prev_footer = buffer.read_word(prev_footer_offset);
        let prev_size = tag::size(prev_footer);
        Block::at(self.header_offset - prev_size)
    }

    /// Updates the `prev_allocated` bit of the block following `self`,
    /// keeping that block's footer (if it has one) in sync.
    ///
    /// Centralizing this update here is what keeps the footer-elision
    /// invariant correct: every operation that changes whether `self` is
    /// allocated (split, coalesce, acquire, release, cluster open/close)
    /// must call this afterwards instead of poking the next block's tag
    /// directly.
    ///
    /// # Safety
    /// `self` must not be the epilogue, and `self`'s header must already
    /// reflect its new allocation state.
    pub unsafe fn propagate_prev_allocated<const N: usize>(&self, buffer: &mut Buffer<N>) {
        let allocated = self.allocated(buffer);
        let next = self.next(buffer);
        let next_tag = next.tag(buffer);
        let updated = tag::with_prev_allocated(next_tag, allocated);
        next.set_tag(buffer, updated);
        if !tag::allocated(updated) {
            next.write_footer(buffer, updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_free_block_sets_matching_footer() {
        let mut buffer = Buffer::<64>::new();
        let block = Block::at(0);
        unsafe {
            block.write(&mut buffer, 32, false, true, false);
            assert_eq!(block.size(&buffer), 32);
            assert!(!block.allocated(&buffer));
            assert!(block.prev_allocated(&buffer));
            assert_eq!(block.tag(&buffer), buffer.read_word(block.footer_offset(&buffer)));
        }
    }

    #[test]
    fn write_allocated_block_has_no_footer_write() {
        let mut buffer = Buffer::<64>::new();
        // poison the footer area so we can tell it was left untouched
        unsafe { buffer.write_word(24, 0xBAD) };
        let block = Block::at(0);
        unsafe {
            block.write(&mut buffer, 32, true, true, false);
            assert_eq!(buffer.read_word(24), 0xBAD);
        }
    }

    #[test]
    fn next_and_prev_are_inverses() {
        let mut buffer = Buffer::<96>::new();
        let first = Block::at(0);
        unsafe {
            first.write(&mut buffer, 32, false, true, false);
            let second = first.next(&buffer);
            second.write(&mut buffer, 32, false, false, false);
            assert_eq!(second.header_offset(), 32);
            assert_eq!(second.prev(&buffer), first);
        }
    }

    #[test]
    fn propagate_prev_allocated_updates_following_footer() {
        let mut buffer = Buffer::<96>::new();
        let first = Block::at(0);
        unsafe {
            first.write(&mut buffer, 32, true, true, false);
            let second = first.next(&buffer);
            second.write(&mut buffer, 32, false, true, false);

            first.write(&mut buffer, 32, false, true, false);
            first.propagate_prev_allocated(&mut buffer);

            assert!(!second.prev_allocated(&buffer));
            assert_eq!(
                second.tag(&buffer),
                buffer.read_word(second.footer_offset(&buffer))
            );
        }
    }
}
