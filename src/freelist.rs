//! Segregated free lists to keep track of free [`BlockRef`] by size class.
//!
//! The registry is an array of 15 list heads. Index 0 holds the mini free
//! list: 16-byte blocks chained through a single next link, because a mini
//! block has no room for a back link once its header is accounted for.
//! Indices 1..15 hold doubly-linked lists of normal free blocks:
//!
//! ```text
//!  heads[0]  ->  mini -> mini -> mini                  (next only)
//!  heads[1]  ->  32..64
//!  heads[2]  ->  65..128
//!    ...           ...                                  (prev and next)
//!  heads[13] ->  131073..262144
//!  heads[14] ->  262145..
//! ```
//!
//! The links are written straight into the payload words of the free
//! blocks themselves; being the allocator, we cannot allocate nodes for
//! our own bookkeeping.
//!
//! Inserts push at the head in O(1) for both flavors. Removing a normal
//! block unlinks in O(1) through its prev/next pair; removing a mini
//! block walks from the head to find its predecessor. That walk is the
//! price of the missing back link and stays cheap because mini lists are
//! short in practice.

use crate::block::BlockRef;

/// Number of segregated list heads.
pub(crate) const SEG_LIST_NUM: usize = 15;

/// Maps a block size to its list index.
///
/// Returns 0 iff `size` is below the normal minimum of 32 bytes, else the
/// smallest class whose upper bound covers `size`, capped at 14. Pure and
/// deterministic; resolved as a comparison tree over the class bounds.
pub(crate) fn class_of(size: usize) -> usize {
    if size <= 4096 {
        if size <= 256 {
            if size <= 64 {
                if size < 32 { 0 } else { 1 }
            } else if size <= 128 {
                2
            } else {
                3
            }
        } else if size <= 1024 {
            if size <= 512 { 4 } else { 5 }
        } else if size <= 2048 {
            6
        } else {
            7
        }
    } else if size <= 65536 {
        if size <= 16384 {
            if size <= 8192 { 8 } else { 9 }
        } else if size <= 32768 {
            10
        } else {
            11
        }
    } else if size <= 262144 {
        if size <= 131072 { 12 } else { 13 }
    } else {
        14
    }
}

/// The segregated free-list registry.
pub(crate) struct FreeLists {
    heads: [Option<BlockRef>; SEG_LIST_NUM],
}

impl FreeLists {
    /// Creates the registry with every list empty.
    pub fn new() -> Self {
        Self {
            heads: [None; SEG_LIST_NUM],
        }
    }

    /// Head of the given class list.
    #[inline]
    pub fn head(&self, class: usize) -> Option<BlockRef> {
        self.heads[class]
    }

    /// Head of the mini free list.
    #[inline]
    pub fn mini_head(&self) -> Option<BlockRef> {
        self.heads[0]
    }

    /// Inserts a free block, routing to the mini list or its size class.
    ///
    /// **SAFETY**: `block` must be a live free block that is not on any
    /// list.
    pub unsafe fn insert(&mut self, block: BlockRef) {
        unsafe {
            debug_assert!(!block.is_allocated());

            if block.is_mini() {
                self.insert_mini(block);
            } else {
                self.insert_normal(block);
            }
        }
    }

    /// Removes a free block from whichever list its size routes it to.
    ///
    /// **SAFETY**: `block` must be a live free block currently on the
    /// matching list.
    pub unsafe fn remove(&mut self, block: BlockRef) {
        unsafe {
            debug_assert!(!block.is_allocated());

            if block.is_mini() {
                self.remove_mini(block);
            } else {
                self.remove_normal(block);
            }
        }
    }

    unsafe fn insert_normal(&mut self, block: BlockRef) {
        unsafe {
            let class = class_of(block.size());
            let head = self.heads[class];

            block.set_free_prev(None);
            block.set_free_next(head);
            if let Some(head) = head {
                head.set_free_prev(Some(block));
            }

            self.heads[class] = Some(block);
        }
    }

    unsafe fn remove_normal(&mut self, block: BlockRef) {
        unsafe {
            let class = class_of(block.size());
            let prev = block.free_prev();
            let next = block.free_next();

            match prev {
                // The block was the head; advance the head.
                None => self.heads[class] = next,
                Some(prev) => prev.set_free_next(next),
            }

            if let Some(next) = next {
                next.set_free_prev(prev);
            }
        }
    }

    unsafe fn insert_mini(&mut self, block: BlockRef) {
        unsafe {
            block.set_mini_next(self.heads[0]);
            self.heads[0] = Some(block);
        }
    }

    unsafe fn remove_mini(&mut self, block: BlockRef) {
        unsafe {
            let Some(head) = self.heads[0] else {
                debug_assert!(false, "removing from an empty mini list");
                return;
            };

            if head == block {
                self.heads[0] = block.mini_next();
                return;
            }

            // Mini blocks have no back link; walk from the head to find
            // the predecessor.
            let mut prev = head;
            while let Some(current) = prev.mini_next() {
                if current == block {
                    prev.set_mini_next(block.mini_next());
                    return;
                }
                prev = current;
            }

            debug_assert!(false, "mini block was not on the mini list");
        }
    }
}
