//! The heap core: bootstrap, extension, coalescing and placement.
//!
//! [`Heap`] owns the page broker, the segregated free lists and the
//! heap-start anchor, and implements the allocate/free machinery the
//! public entry points orchestrate:
//!
//! ```text
//! allocate:  find_fit -> (extend on miss) -> unlink -> mark -> split
//! free:      mark -> fix successor bits -> coalesce -> relink
//! ```
//!
//! Both paths finish by propagating the block's new status into the
//! header of the block that follows it, so that every header's
//! previous-block bits stay truthful.

use std::ptr::NonNull;

use crate::block::BlockRef;
use crate::broker::PageBroker;
use crate::freelist::{FreeLists, SEG_LIST_NUM, class_of};
use crate::header::{DSIZE, MIN_BLOCK_SIZE, WSIZE, Word, pack};
use crate::utils::round_up;

#[cfg(debug_assertions)]
use crate::checker;

/// Default heap extension granularity: 2KB.
pub(crate) const CHUNK_SIZE: usize = 1 << 11;

/// Best-fit probe budget per size class.
const SEARCH_LIMIT: usize = 10;

/// A fit whose excess is at most this many bytes ends the search early.
const CLOSE_ENOUGH: usize = 46;

/// A bootstrapped heap: one contiguous block sequence fenced by the
/// prologue and epilogue sentinels.
pub(crate) struct Heap {
    broker: PageBroker,
    lists: FreeLists,
    /// Header position of the first real block, one word past the
    /// prologue. Written as the epilogue at bootstrap and overwritten by
    /// the first extension.
    start: BlockRef,
}

impl Heap {
    /// Establishes the sentinels and seeds the heap with one free chunk.
    ///
    /// Lays out two words — prologue and epilogue, both size 0 and
    /// allocated — then grows the heap by [`CHUNK_SIZE`]. Returns `None`
    /// when the broker refuses either grant.
    pub fn bootstrap() -> Option<Self> {
        let mut broker = PageBroker::new()?;

        let start = broker.sbrk(DSIZE)?.as_ptr().cast::<Word>();
        unsafe {
            start.write(pack(0, true, true, false)); // prologue
            start.add(1).write(pack(0, true, true, false)); // epilogue
        }

        let mut heap = Self {
            broker,
            lists: FreeLists::new(),
            start: BlockRef::from_header(unsafe { NonNull::new_unchecked(start.add(1)) }),
        };

        unsafe { heap.extend(CHUNK_SIZE)? };
        Some(heap)
    }

    /// First real block on the heap.
    #[inline]
    pub fn first_block(&self) -> BlockRef {
        self.start
    }

    #[inline]
    pub fn lists(&self) -> &FreeLists {
        &self.lists
    }

    #[inline]
    pub fn heap_lo(&self) -> *mut u8 {
        self.broker.heap_lo()
    }

    #[inline]
    pub fn heap_hi(&self) -> *mut u8 {
        self.broker.heap_hi()
    }

    #[inline]
    pub fn heap_size(&self) -> usize {
        self.broker.heap_size()
    }

    /// Allocates at least `size` payload bytes, 16-byte aligned.
    ///
    /// Returns null for size 0 and on broker exhaustion.
    ///
    /// **SAFETY**: the heap must be the one that owns every pointer it
    /// has handed out so far (guaranteed by [`crate::SegAlloc`]).
    pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
        self.debug_check();

        if size == 0 {
            return std::ptr::null_mut();
        }

        // One extra word covers the header; allocated blocks reserve no
        // footer. Requests up to a word fit the mini layout.
        let asize = if size <= WSIZE {
            MIN_BLOCK_SIZE
        } else {
            round_up(size + WSIZE, DSIZE)
        };

        let block = match unsafe { self.find_fit(asize) } {
            Some(block) => block,
            None => {
                // No fit anywhere; grow the heap and place into the fresh
                // block. Always request at least a full chunk.
                match unsafe { self.extend(asize.max(CHUNK_SIZE)) } {
                    Some(block) => block,
                    None => return std::ptr::null_mut(),
                }
            }
        };

        unsafe {
            debug_assert!(!block.is_allocated());
            self.lists.remove(block);

            let block_size = block.size();
            block.write(block_size, true, block.prev_allocated(), block.prev_mini());

            // The successor learns the block ahead of it is allocated now.
            block
                .next_block()
                .set_prev_flags(true, block_size == MIN_BLOCK_SIZE);

            self.split(block, asize);

            let payload = block.payload();
            self.debug_check();
            payload
        }
    }

    /// Returns a payload pointer's block to the free state and merges it
    /// with its neighbours.
    ///
    /// **SAFETY**: `payload` must have been returned by this heap and not
    /// freed since; freeing foreign or stale pointers is undefined.
    pub unsafe fn free(&mut self, payload: *mut u8) {
        self.debug_check();

        unsafe {
            let block = BlockRef::from_payload(payload);
            let size = block.size();
            debug_assert!(block.is_allocated(), "block is already free");

            block.write(size, false, block.prev_allocated(), block.prev_mini());

            block
                .next_block()
                .set_prev_flags(false, size == MIN_BLOCK_SIZE);

            self.coalesce(block);
        }

        self.debug_check();
    }

    /// Grows the heap by at least `size` bytes and returns the resulting
    /// free block, already merged with a trailing free block if the heap
    /// ended in one.
    ///
    /// The broker hands back the payload position of the block-to-be: its
    /// header lands exactly on the old epilogue's word, which already
    /// holds the previous block's status bits for it to inherit.
    unsafe fn extend(&mut self, size: usize) -> Option<BlockRef> {
        let size = round_up(size, DSIZE);
        let payload = self.broker.sbrk(size)?;

        unsafe {
            let block = BlockRef::from_payload(payload.as_ptr());
            block.write(size, false, block.prev_allocated(), block.prev_mini());

            block
                .next_block()
                .write_epilogue(false, size == MIN_BLOCK_SIZE);

            Some(self.coalesce(block))
        }
    }

    /// Merges a just-freed block with free neighbours and inserts the
    /// result into its class list.
    ///
    /// The input block must be marked free and on no list; its successor's
    /// header must already carry `prev_alloc = 0`.
    unsafe fn coalesce(&mut self, block: BlockRef) -> BlockRef {
        unsafe {
            debug_assert!(!block.is_allocated());

            let next = block.next_block();
            let prev_alloc = block.prev_allocated();
            let next_alloc = next.is_allocated();

            // Both neighbours allocated: nothing to merge, and the freeing
            // path has already fixed the successor's bits.
            if prev_alloc && next_alloc {
                self.lists.insert(block);
                return block;
            }

            let merged = if !prev_alloc && next_alloc {
                // Merge into the free predecessor.
                let prev = block
                    .prev_block()
                    .expect("prologue is always marked allocated");
                let merged_size = prev.size() + block.size();
                let (pa, pm) = (prev.prev_allocated(), prev.prev_mini());

                self.lists.remove(prev);
                prev.write(merged_size, false, pa, pm);
                prev
            } else if prev_alloc {
                // Absorb the free successor.
                let merged_size = block.size() + next.size();
                let (pa, pm) = (block.prev_allocated(), block.prev_mini());

                self.lists.remove(next);
                block.write(merged_size, false, pa, pm);
                block
            } else {
                // Both neighbours free: a three-way merge at the
                // predecessor's address.
                let prev = block
                    .prev_block()
                    .expect("prologue is always marked allocated");
                let merged_size = prev.size() + block.size() + next.size();
                let (pa, pm) = (prev.prev_allocated(), prev.prev_mini());

                self.lists.remove(next);
                self.lists.remove(prev);
                prev.write(merged_size, false, pa, pm);
                prev
            };

            self.lists.insert(merged);

            // The block past the merge now follows a free block that
            // cannot be mini (merged blocks are at least 32 bytes).
            merged.next_block().set_prev_flags(false, false);

            merged
        }
    }

    /// Best-fit search with bounded work.
    ///
    /// A mini-sized request takes the head of the mini list immediately.
    /// Otherwise the classes from the request's own upward are scanned,
    /// keeping the block of minimum excess; a class is abandoned after
    /// probing more than [`SEARCH_LIMIT`] blocks, and an excess within
    /// [`CLOSE_ENOUGH`] bytes ends the search on the spot.
    unsafe fn find_fit(&self, asize: usize) -> Option<BlockRef> {
        let class = class_of(asize);

        if class == 0 {
            if let Some(head) = self.lists.mini_head() {
                return Some(head);
            }
        }

        let mut best: Option<BlockRef> = None;
        let mut min_excess = usize::MAX;

        // Start at class 1 at the lowest: the mini list is answered above
        // and must never be walked through the normal link accessors.
        for class in class.max(1)..SEG_LIST_NUM {
            let mut probes = 0;
            let mut cursor = self.lists.head(class);

            while let Some(block) = cursor {
                let size = unsafe { block.size() };
                if size >= asize {
                    let excess = size - asize;
                    if excess < min_excess {
                        min_excess = excess;
                        best = Some(block);
                    }
                    if min_excess <= CLOSE_ENOUGH {
                        return best;
                    }
                }

                probes += 1;
                if probes > SEARCH_LIMIT {
                    break;
                }
                cursor = unsafe { block.free_next() };
            }
        }

        best
    }

    /// Splits an allocated block in two when the tail beyond `asize` can
    /// stand as a block of its own; the tail is written free and listed.
    ///
    /// With a remainder under the minimum block size the whole block
    /// stays allocated as is.
    unsafe fn split(&mut self, block: BlockRef, asize: usize) {
        unsafe {
            debug_assert!(block.is_allocated());

            let block_size = block.size();
            let rest_size = block_size - asize;
            if rest_size < MIN_BLOCK_SIZE {
                return;
            }

            block.write(asize, true, block.prev_allocated(), block.prev_mini());

            let rest = block.next_block();
            rest.write(rest_size, false, true, asize == MIN_BLOCK_SIZE);

            rest.next_block()
                .set_prev_flags(false, rest_size == MIN_BLOCK_SIZE);

            self.lists.insert(rest);
        }
    }

    /// Full consistency sweep at public-entry boundaries, debug builds
    /// only.
    #[cfg(debug_assertions)]
    fn debug_check(&self) {
        let report = checker::check(self);
        assert!(report.is_empty(), "heap inconsistent: {report:#?}");
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    fn debug_check(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_lays_out_sentinels_and_one_chunk() {
        let heap = Heap::bootstrap().expect("bootstrap failed");

        // Prologue + epilogue words plus the first chunk.
        assert_eq!(heap.heap_size(), DSIZE + CHUNK_SIZE);

        unsafe {
            let first = heap.first_block();
            assert_eq!(first.addr(), heap.heap_lo() as usize + WSIZE);
            assert_eq!(first.size(), CHUNK_SIZE);
            assert!(!first.is_allocated());
            assert!(first.prev_allocated());

            // The whole chunk sits in the 1025..=2048 class.
            assert_eq!(heap.lists().head(6), Some(first));

            let epilogue = first.next_block();
            assert_eq!(epilogue.size(), 0);
            assert!(epilogue.is_allocated());
            assert_eq!(epilogue.addr(), heap.heap_hi() as usize - 7);
        }
    }

    #[test]
    fn split_carves_the_requested_size() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            // 100 bytes round up to a 112-byte block; the rest of the
            // chunk survives as one listed free block.
            let payload = heap.allocate(100);
            assert!(!payload.is_null());

            let block = BlockRef::from_payload(payload);
            assert_eq!(block.size(), 112);
            assert!(block.is_allocated());

            let rest = block.next_block();
            assert_eq!(rest.size(), CHUNK_SIZE - 112);
            assert!(!rest.is_allocated());
            assert!(rest.prev_allocated());
            assert_eq!(heap.lists().head(class_of(CHUNK_SIZE - 112)), Some(rest));
        }
    }

    #[test]
    fn tiny_requests_use_the_mini_layout() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            let payload = heap.allocate(8);
            let block = BlockRef::from_payload(payload);

            assert_eq!(block.size(), MIN_BLOCK_SIZE);
            assert_eq!(block.payload_size(), 8);

            // The successor knows its predecessor is an allocated mini.
            let guard = heap.allocate(32);
            let next = block.next_block();
            assert_eq!(next, BlockRef::from_payload(guard));
            assert!(next.prev_allocated());
            assert!(next.prev_mini());

            // Freeing it lands it on the mini list; the next mini request
            // takes it straight back.
            heap.free(payload);
            assert_eq!(heap.lists().mini_head(), Some(block));

            let again = heap.allocate(4);
            assert_eq!(again, payload);
        }
    }

    #[test]
    fn no_split_below_minimum_remainder() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            // Free block of exactly 32 bytes, then a 24-byte request that
            // needs all of it: a split would leave an impossible 0-byte
            // tail.
            let a = heap.allocate(24);
            let guard = heap.allocate(64);
            heap.free(a);

            let b = heap.allocate(24);
            assert_eq!(b, a);
            assert_eq!(BlockRef::from_payload(b).size(), 32);

            heap.free(guard);
            heap.free(b);
        }
    }

    #[test]
    fn coalesce_absorbs_both_neighbours() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            // Three 80-byte blocks and a guard to keep the chunk's tail
            // from joining the party.
            let a = heap.allocate(64);
            let b = heap.allocate(64);
            let c = heap.allocate(64);
            let _guard = heap.allocate(64);

            heap.free(a);
            heap.free(c);
            heap.free(b);

            // One three-way merge at a's address: 3 * 80 = 240 bytes,
            // listed under the 129..=256 class.
            let merged = BlockRef::from_payload(a);
            assert_eq!(merged.size(), 240);
            assert!(!merged.is_allocated());
            assert_eq!(heap.lists().head(3), Some(merged));

            // The guard block knows what is in front of it.
            let after = merged.next_block();
            assert!(after.is_allocated());
            assert!(!after.prev_allocated());
            assert!(!after.prev_mini());
        }
    }

    #[test]
    fn free_mini_keeps_successor_bits_truthful() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            let mini = heap.allocate(8);
            let guard = heap.allocate(64);
            heap.free(mini);

            // A lone freed mini block stays mini; its successor must keep
            // saying so or backward scans would misfire.
            let next = BlockRef::from_payload(mini).next_block();
            assert_eq!(next, BlockRef::from_payload(guard));
            assert!(!next.prev_allocated());
            assert!(next.prev_mini());
        }
    }

    #[test]
    fn extension_merges_with_a_trailing_free_block() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            // Nothing fits 3000 bytes, so the heap grows; the fresh bytes
            // merge with the untouched bootstrap chunk.
            let payload = heap.allocate(3000);
            assert!(!payload.is_null());

            let block = BlockRef::from_payload(payload);
            assert_eq!(block.size(), 3008);
            assert_eq!(block.addr(), heap.heap_lo() as usize + WSIZE);
            assert_eq!(heap.heap_size(), DSIZE + CHUNK_SIZE + 3008);

            // The remainder of the merged space is one free block.
            let rest = block.next_block();
            assert_eq!(rest.size(), CHUNK_SIZE);
            assert!(!rest.is_allocated());
        }
    }

    #[test]
    fn close_enough_fit_is_taken_over_a_perfect_one() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            // Lay out two free blocks of 112 and 80 bytes in the same
            // class, separated by guards.
            let a = heap.allocate(104); // 112-byte block
            let _g1 = heap.allocate(8);
            let b = heap.allocate(72); // 80-byte block
            let _g2 = heap.allocate(8);
            heap.free(b);
            heap.free(a); // a is now the class head

            // An 80-byte request meets a first. Its excess of 32 is
            // within the close-enough threshold, so the search stops
            // there instead of walking on to the perfectly-fitting b.
            let c = heap.allocate(72);
            assert_eq!(c, a);
        }
    }

    #[test]
    fn broker_exhaustion_surfaces_as_null() {
        let mut heap = Heap::bootstrap().unwrap();

        unsafe {
            let too_big = heap.allocate(crate::broker::MAX_HEAP_SIZE);
            assert!(too_big.is_null());

            // The failed extension left the heap fully usable.
            let ok = heap.allocate(128);
            assert!(!ok.is_null());
        }
    }
}
