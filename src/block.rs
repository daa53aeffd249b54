//! Block references and implicit-list navigation.
//!
//! A [`BlockRef`] points at the header word of one block. The byte range
//! of the block depends on its regime and allocation status:
//!
//! ```text
//! allocated block (size >= 32):
//! +----------+--------------------------------------------+
//! |  header  |                  payload                   |
//! +----------+--------------------------------------------+
//!
//! free block (size >= 32):
//! +----------+----------+----------+----------+-----------+
//! |  header  |   prev   |   next   |   ....   |  footer   |
//! +----------+----------+----------+----------+-----------+
//!
//! allocated mini block (size == 16):
//! +----------+----------+
//! |  header  | payload  |
//! +----------+----------+
//!
//! free mini block (size == 16):
//! +----------+----------+
//! |  header  |   next   |
//! +----------+----------+
//! ```
//!
//! The footer duplicates the header so that `prev_block` can discover the
//! block in front of it by reading one word backwards. Mini blocks have
//! no room for a footer; the `prev_mini` header bit teaches the backward
//! scan to step over them by a fixed 16 bytes instead.
//!
//! The three payload interpretations (user bytes, prev/next links, mini
//! next link) are exposed as accessor methods that assert the regime the
//! header claims, instead of the union the layout would suggest.

use std::ptr::NonNull;

use crate::header::{self, MIN_BLOCK_SIZE, Word};

/// Reference to a block on the heap, addressed by its header word.
///
/// Copyable and purely positional: all state lives in the heap words it
/// points at, never in the reference itself.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockRef(NonNull<Word>);

impl BlockRef {
    /// Wraps a pointer to a header word.
    #[inline]
    pub fn from_header(header: NonNull<Word>) -> Self {
        Self(header)
    }

    /// Recovers the block from a payload pointer previously handed out.
    ///
    /// **SAFETY**: `payload` must point one word past a live header.
    #[inline]
    pub unsafe fn from_payload(payload: *mut u8) -> Self {
        unsafe { Self(NonNull::new_unchecked(payload.cast::<Word>().sub(1))) }
    }

    #[inline]
    pub fn header_ptr(self) -> *mut Word {
        self.0.as_ptr()
    }

    /// Address of the header, for bounds comparisons.
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// **SAFETY**: the header word must be initialized and in bounds.
    #[inline]
    pub unsafe fn header(self) -> Word {
        unsafe { self.0.as_ptr().read() }
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        header::extract_size(unsafe { self.header() })
    }

    #[inline]
    pub unsafe fn is_allocated(self) -> bool {
        header::extract_alloc(unsafe { self.header() })
    }

    #[inline]
    pub unsafe fn prev_allocated(self) -> bool {
        header::extract_prev_alloc(unsafe { self.header() })
    }

    #[inline]
    pub unsafe fn prev_mini(self) -> bool {
        header::extract_prev_mini(unsafe { self.header() })
    }

    #[inline]
    pub unsafe fn is_mini(self) -> bool {
        unsafe { self.size() == MIN_BLOCK_SIZE }
    }

    /// The payload starts one word past the header.
    #[inline]
    pub unsafe fn payload(self) -> *mut u8 {
        unsafe { self.0.as_ptr().add(1).cast() }
    }

    /// Bytes usable by the caller: the block minus its header word.
    #[inline]
    pub unsafe fn payload_size(self) -> usize {
        unsafe { self.size() - header::WSIZE }
    }

    /// The footer occupies the last word of the block.
    #[inline]
    unsafe fn footer_ptr(self) -> *mut Word {
        unsafe { self.0.as_ptr().byte_add(self.size()).sub(1) }
    }

    /// Reads the footer of a free normal block.
    pub unsafe fn footer(self) -> Word {
        debug_assert!(unsafe { !self.is_allocated() && self.size() > MIN_BLOCK_SIZE });
        unsafe { self.footer_ptr().read() }
    }

    /// Writes the block metadata.
    ///
    /// The header is always written. A footer (equal to the header) is
    /// written iff the block is free and larger than a mini block; mini
    /// blocks and allocated blocks carry no footer.
    pub unsafe fn write(self, size: usize, alloc: bool, prev_alloc: bool, prev_mini: bool) {
        debug_assert!(size >= MIN_BLOCK_SIZE);

        let word = header::pack(size, alloc, prev_alloc, prev_mini);
        unsafe {
            self.0.as_ptr().write(word);
            if !alloc && size > MIN_BLOCK_SIZE {
                self.footer_ptr().write(word);
            }
        }
    }

    /// Writes a size-0 allocated epilogue header at this position.
    pub unsafe fn write_epilogue(self, prev_alloc: bool, prev_mini: bool) {
        unsafe {
            self.0.as_ptr().write(header::pack(0, true, prev_alloc, prev_mini));
        }
    }

    /// Rewrites the header with new previous-block bits, keeping size and
    /// allocation status.
    ///
    /// Header only: any footer is left untouched, which is fine because a
    /// stale footer is always rewritten before the block is next scanned
    /// backwards.
    pub unsafe fn set_prev_flags(self, prev_alloc: bool, prev_mini: bool) {
        unsafe {
            let (size, alloc) = (self.size(), self.is_allocated());
            self.0
                .as_ptr()
                .write(header::pack(size, alloc, prev_alloc, prev_mini));
        }
    }

    /// The next consecutive block on the heap; on the last real block this
    /// yields the epilogue.
    #[inline]
    pub unsafe fn next_block(self) -> BlockRef {
        unsafe { Self(NonNull::new_unchecked(self.0.as_ptr().byte_add(self.size()))) }
    }

    /// The previous consecutive block, or `None` when this is the first
    /// block on the heap (the word in front of it is the prologue).
    ///
    /// A mini predecessor is found by stepping back a fixed 16 bytes, since
    /// mini blocks carry no footer to scan through. Otherwise the word in
    /// front of the header is the predecessor's footer and holds its size.
    pub unsafe fn prev_block(self) -> Option<BlockRef> {
        unsafe {
            if self.prev_mini() {
                let header = self.0.as_ptr().byte_sub(MIN_BLOCK_SIZE);
                return Some(Self(NonNull::new_unchecked(header)));
            }

            let footer = self.0.as_ptr().sub(1).read();
            let size = header::extract_size(footer);
            if size == 0 {
                return None; // ran into the prologue
            }

            Some(Self(NonNull::new_unchecked(self.0.as_ptr().byte_sub(size))))
        }
    }

    // The free-list links live in the first payload words: prev and next
    // for normal free blocks, a single next for mini free blocks. They are
    // plain heap addresses, never owning references.

    #[inline]
    unsafe fn link_slot(self, slot: usize) -> *mut *mut Word {
        unsafe { self.0.as_ptr().add(1 + slot).cast() }
    }

    unsafe fn read_link(self, slot: usize) -> Option<BlockRef> {
        let raw = unsafe { self.link_slot(slot).read() };
        NonNull::new(raw).map(Self)
    }

    unsafe fn write_link(self, slot: usize, link: Option<BlockRef>) {
        let raw = link.map_or(std::ptr::null_mut(), |block| block.0.as_ptr());
        unsafe { self.link_slot(slot).write(raw) };
    }

    pub unsafe fn free_prev(self) -> Option<BlockRef> {
        debug_assert!(unsafe { !self.is_allocated() && !self.is_mini() });
        unsafe { self.read_link(0) }
    }

    pub unsafe fn set_free_prev(self, prev: Option<BlockRef>) {
        debug_assert!(unsafe { !self.is_allocated() && !self.is_mini() });
        unsafe { self.write_link(0, prev) }
    }

    pub unsafe fn free_next(self) -> Option<BlockRef> {
        debug_assert!(unsafe { !self.is_allocated() && !self.is_mini() });
        unsafe { self.read_link(1) }
    }

    pub unsafe fn set_free_next(self, next: Option<BlockRef>) {
        debug_assert!(unsafe { !self.is_allocated() && !self.is_mini() });
        unsafe { self.write_link(1, next) }
    }

    pub unsafe fn mini_next(self) -> Option<BlockRef> {
        debug_assert!(unsafe { !self.is_allocated() && self.is_mini() });
        unsafe { self.read_link(0) }
    }

    pub unsafe fn set_mini_next(self, next: Option<BlockRef>) {
        debug_assert!(unsafe { !self.is_allocated() && self.is_mini() });
        unsafe { self.write_link(0, next) }
    }
}
