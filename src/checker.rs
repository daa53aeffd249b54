//! Heap consistency checker.
//!
//! Walks the implicit block list and every free list and reports each
//! violated invariant as its own message, so one broken property never
//! shadows another. The sweep runs at public-entry boundaries in debug
//! builds (see [`crate::heap::Heap`]); release builds never call it.
//!
//! The checker reads link words raw instead of going through the
//! asserting accessors of [`BlockRef`]: its job is to diagnose a
//! malformed heap, not to trip over one.

use std::ptr::NonNull;

use crate::block::BlockRef;
use crate::freelist::{SEG_LIST_NUM, class_of};
use crate::header::{self, DSIZE, MIN_BLOCK_SIZE, WSIZE, Word};
use crate::heap::Heap;

/// Runs every sub-check and collects the failures.
pub(crate) fn check(heap: &Heap) -> Vec<String> {
    let mut report = Vec::new();

    unsafe {
        check_prologue(heap, &mut report);
        check_epilogue(heap, &mut report);
        check_blocks(heap, &mut report);
        check_lists(heap, &mut report);
        check_membership(heap, &mut report);
    }

    report
}

/// The prologue sits one word before the first block: size 0, allocated.
unsafe fn check_prologue(heap: &Heap, report: &mut Vec<String>) {
    let prologue = unsafe { heap.first_block().header_ptr().sub(1) };

    if prologue as usize != heap.heap_lo() as usize {
        report.push("prologue is not at the bottom of the heap".to_string());
    }

    let word = unsafe { prologue.read() };
    if header::extract_size(word) != 0 || !header::extract_alloc(word) {
        report.push("prologue is not a size-0 allocated word".to_string());
    }
}

/// The epilogue terminates the implicit list at the top of the heap:
/// size 0, allocated.
unsafe fn check_epilogue(heap: &Heap, report: &mut Vec<String>) {
    unsafe {
        let mut block = heap.first_block();
        while block.size() != 0 {
            block = block.next_block();
        }

        if !block.is_allocated() {
            report.push("epilogue is not marked allocated".to_string());
        }
        if block.addr() != heap.heap_hi() as usize - (WSIZE - 1) {
            report.push("epilogue is not at the top of the heap".to_string());
        }
        if block.addr() != heap.heap_lo() as usize + heap.heap_size() - WSIZE {
            report.push("granted bytes extend past the epilogue".to_string());
        }
    }
}

/// Per-block checks over the implicit list: bounds, sizing, alignment,
/// footer agreement, no adjacent free pair, truthful previous-block bits.
unsafe fn check_blocks(heap: &Heap, report: &mut Vec<String>) {
    let lo = heap.heap_lo() as usize;
    let hi = heap.heap_hi() as usize;

    unsafe {
        let mut block = heap.first_block();
        // The prologue counts as the allocated non-mini predecessor of
        // the first block.
        let mut prev_free = false;
        let mut expect_prev_alloc = true;
        let mut expect_prev_mini = false;

        while block.size() != 0 {
            let size = block.size();
            let addr = block.addr();

            if addr < lo || addr > hi {
                report.push(format!("block {addr:#x} lies outside the heap"));
                // Navigation past this point is meaningless.
                return;
            }
            if size % DSIZE != 0 || size < MIN_BLOCK_SIZE {
                report.push(format!("block {addr:#x} has invalid size {size}"));
                return;
            }
            if (block.payload() as usize) % DSIZE != 0 {
                report.push(format!("block {addr:#x} payload is misaligned"));
            }

            if !block.is_allocated() {
                if prev_free {
                    report.push(format!("adjacent free blocks at {addr:#x}"));
                }
                if size > MIN_BLOCK_SIZE && block.footer() != block.header() {
                    report.push(format!("block {addr:#x} footer differs from header"));
                }
            }

            if block.prev_allocated() != expect_prev_alloc {
                report.push(format!("block {addr:#x} has a stale prev-alloc bit"));
            }
            if block.prev_mini() != expect_prev_mini {
                report.push(format!("block {addr:#x} has a stale prev-mini bit"));
            }

            prev_free = !block.is_allocated();
            expect_prev_alloc = block.is_allocated();
            expect_prev_mini = size == MIN_BLOCK_SIZE;
            block = block.next_block();
        }

        // The epilogue's bits describe the last real block too.
        if block.prev_allocated() != expect_prev_alloc {
            report.push("epilogue has a stale prev-alloc bit".to_string());
        }
        if block.prev_mini() != expect_prev_mini {
            report.push("epilogue has a stale prev-mini bit".to_string());
        }
    }
}

/// Reads a link word without the state assertions of the accessors.
unsafe fn raw_link(block: BlockRef, slot: usize) -> Option<BlockRef> {
    let raw = unsafe { block.header_ptr().add(1 + slot).cast::<*mut Word>().read() };
    NonNull::new(raw).map(BlockRef::from_header)
}

/// Floyd cycle detection over one list's next links.
unsafe fn has_cycle(head: Option<BlockRef>, next_slot: usize) -> bool {
    unsafe {
        let mut tortoise = head;
        let mut hare = head;

        while let Some(h) = hare {
            let step = match raw_link(h, next_slot) {
                Some(step) => step,
                None => return false,
            };
            hare = raw_link(step, next_slot);

            tortoise = match tortoise {
                Some(t) => raw_link(t, next_slot),
                None => return false,
            };

            if hare.is_some() && hare == tortoise {
                return true;
            }
        }

        false
    }
}

/// Per-list checks: node state, bounds, class fit, back-pointer
/// symmetry, acyclicity.
unsafe fn check_lists(heap: &Heap, report: &mut Vec<String>) {
    let lo = heap.heap_lo() as usize;
    let hi = heap.heap_hi() as usize;

    unsafe {
        // The mini list first: next links only, every node 16 bytes.
        if has_cycle(heap.lists().mini_head(), 0) {
            report.push("mini free list contains a cycle".to_string());
        } else {
            let mut cursor = heap.lists().mini_head();
            while let Some(node) = cursor {
                let addr = node.addr();
                if addr < lo || addr > hi {
                    report.push(format!("mini list node {addr:#x} outside the heap"));
                    break;
                }
                if node.is_allocated() {
                    report.push(format!("allocated block {addr:#x} on the mini list"));
                }
                if node.size() != MIN_BLOCK_SIZE {
                    report.push(format!("non-mini block {addr:#x} on the mini list"));
                }
                cursor = raw_link(node, 0);
            }
        }

        for class in 1..SEG_LIST_NUM {
            let head = heap.lists().head(class);

            if has_cycle(head, 1) {
                report.push(format!("free list {class} contains a cycle"));
                continue;
            }

            if let Some(head) = head {
                if raw_link(head, 0).is_some() {
                    report.push(format!("head of free list {class} has a prev link"));
                }
            }

            let mut cursor = head;
            while let Some(node) = cursor {
                let addr = node.addr();
                if addr < lo || addr > hi {
                    report.push(format!("list {class} node {addr:#x} outside the heap"));
                    break;
                }
                if node.is_allocated() {
                    report.push(format!("allocated block {addr:#x} on free list {class}"));
                }
                if class_of(node.size()) != class {
                    report.push(format!(
                        "block {addr:#x} of size {} filed under class {class}",
                        node.size()
                    ));
                }

                let next = raw_link(node, 1);
                if let Some(next) = next {
                    if raw_link(next, 0) != Some(node) {
                        report.push(format!(
                            "inconsistent prev/next pair in free list {class} at {addr:#x}"
                        ));
                    }
                }
                cursor = next;
            }
        }
    }
}

/// Every free block is on exactly one list, and the lists hold nothing
/// else.
unsafe fn check_membership(heap: &Heap, report: &mut Vec<String>) {
    unsafe {
        let mut free_blocks = Vec::new();
        let mut block = heap.first_block();
        while block.size() != 0 {
            if !block.is_allocated() {
                free_blocks.push(block);
            }
            block = block.next_block();
        }

        // Membership walks are bounded so a cyclic list (reported above)
        // cannot hang the checker.
        let cap = free_blocks.len() + 1;

        let mut listed = 0usize;
        for class in 0..SEG_LIST_NUM {
            let next_slot = if class == 0 { 0 } else { 1 };
            let mut cursor = heap.lists().head(class);
            let mut steps = 0;
            while let Some(node) = cursor {
                steps += 1;
                if steps > cap {
                    break;
                }
                listed += 1;
                cursor = raw_link(node, next_slot);
            }
        }

        if listed != free_blocks.len() {
            report.push(format!(
                "{} free blocks on the heap but {listed} list entries",
                free_blocks.len()
            ));
        }

        for block in free_blocks {
            let class = class_of(block.size());
            let next_slot = if class == 0 { 0 } else { 1 };

            let mut found = false;
            let mut cursor = heap.lists().head(class);
            let mut steps = 0;
            while let Some(node) = cursor {
                steps += 1;
                if steps > cap {
                    break;
                }
                if node == block {
                    found = true;
                    break;
                }
                cursor = raw_link(node, next_slot);
            }

            if !found {
                report.push(format!(
                    "free block {:#x} missing from its class list {class}",
                    block.addr()
                ));
            }
        }
    }
}
