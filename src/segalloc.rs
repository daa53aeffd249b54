//! The public allocator type and the four-primitive interface.

use std::ptr;

use crate::block::BlockRef;
use crate::heap::Heap;

/// A segregated free-list allocator over one growable heap.
///
/// The heap is bootstrapped lazily on the first allocation; constructing
/// the value costs nothing. All state is owned by this value and every
/// method takes `&mut self`: the allocator is strictly single-threaded,
/// and the data model would not survive sharing, so no `Sync` facade is
/// offered.
///
/// ```no_run
/// use segalloc::SegAlloc;
///
/// let mut alloc = SegAlloc::new();
///
/// unsafe {
///     let p = alloc.allocate(24);
///     assert!(!p.is_null());
///     alloc.free(p);
/// }
/// ```
pub struct SegAlloc {
    heap: Option<Heap>,
}

impl SegAlloc {
    /// Creates an allocator with no heap behind it yet.
    pub const fn new() -> Self {
        Self { heap: None }
    }

    /// Bootstraps the heap on first use. `None` means the broker refused
    /// the initial grants, which surfaces as a null return upstream.
    fn heap(&mut self) -> Option<&mut Heap> {
        if self.heap.is_none() {
            self.heap = Heap::bootstrap();
        }
        self.heap.as_mut()
    }

    /// Allocates at least `size` bytes, aligned to 16.
    ///
    /// Returns null when `size` is 0 or when the broker cannot grow the
    /// heap any further.
    ///
    /// # Safety
    ///
    /// The returned region is valid until passed to [`free`] or
    /// [`reallocate`] on this same allocator. The caller must not mix
    /// pointers between allocator instances.
    ///
    /// [`free`]: SegAlloc::free
    /// [`reallocate`]: SegAlloc::reallocate
    pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
        let Some(heap) = self.heap() else {
            return ptr::null_mut();
        };
        unsafe { heap.allocate(size) }
    }

    /// Frees a pointer previously returned by [`allocate`] or
    /// [`reallocate`]. A null pointer is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer handed out by this allocator;
    /// double frees are undefined.
    ///
    /// [`allocate`]: SegAlloc::allocate
    /// [`reallocate`]: SegAlloc::reallocate
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let Some(heap) = self.heap.as_mut() else {
            debug_assert!(false, "free of a pointer this allocator never produced");
            return;
        };
        unsafe { heap.free(ptr) }
    }

    /// Resizes an allocation by moving it.
    ///
    /// A null `ptr` behaves like [`allocate`]; `size` 0 behaves like
    /// [`free`] and returns null. Otherwise a fresh block is allocated,
    /// the smaller of the old and new payload sizes is copied over and
    /// the old block is freed. When the new allocation fails, null is
    /// returned and the original block is left untouched.
    ///
    /// # Safety
    ///
    /// Same contract as [`free`] for `ptr`; the returned pointer replaces
    /// it.
    ///
    /// [`allocate`]: SegAlloc::allocate
    /// [`free`]: SegAlloc::free
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        unsafe {
            if size == 0 {
                self.free(ptr);
                return ptr::null_mut();
            }

            if ptr.is_null() {
                return self.allocate(size);
            }

            let new = self.allocate(size);
            if new.is_null() {
                return ptr::null_mut();
            }

            let old_payload = BlockRef::from_payload(ptr).payload_size();
            ptr::copy_nonoverlapping(ptr, new, size.min(old_payload));

            self.free(ptr);
            new
        }
    }

    /// Allocates a zero-filled array of `count` elements of `elem_size`
    /// bytes.
    ///
    /// Returns null when `count` is 0, when the element product
    /// overflows, or when allocation fails; an overflowing request leaves
    /// the heap untouched.
    ///
    /// # Safety
    ///
    /// Same contract as [`allocate`].
    ///
    /// [`allocate`]: SegAlloc::allocate
    pub unsafe fn zero_alloc(&mut self, count: usize, elem_size: usize) -> *mut u8 {
        if count == 0 {
            return ptr::null_mut();
        }
        let Some(total) = count.checked_mul(elem_size) else {
            return ptr::null_mut();
        };

        let payload = unsafe { self.allocate(total) };
        if !payload.is_null() {
            unsafe { ptr::write_bytes(payload, 0, total) };
        }
        payload
    }
}

impl Default for SegAlloc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker;
    use crate::header::MIN_BLOCK_SIZE;

    fn is_aligned(ptr: *mut u8, align: usize) -> bool {
        (ptr as usize) % align == 0
    }

    #[test]
    fn first_allocation_bootstraps_the_heap() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let p = alloc.allocate(24);
            assert!(!p.is_null());
            assert!(is_aligned(p, 16));

            // 24 bytes plus the header round up to a 32-byte block.
            let block = BlockRef::from_payload(p);
            assert_eq!(block.size(), 32);
            assert!(block.is_allocated());

            let heap = alloc.heap.as_ref().unwrap();
            assert!(p as usize >= heap.heap_lo() as usize + 8);
            assert!(p as usize <= heap.heap_hi() as usize - 7);
        }
    }

    #[test]
    fn zero_sized_allocation_returns_null() {
        let mut alloc = SegAlloc::new();
        unsafe {
            assert!(alloc.allocate(0).is_null());
        }
    }

    #[test]
    fn eight_byte_requests_fit_a_mini_block() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let p = alloc.allocate(8);
            assert!(!p.is_null());
            assert_eq!(BlockRef::from_payload(p).size(), MIN_BLOCK_SIZE);
        }
    }

    #[test]
    fn free_null_is_a_noop() {
        let mut alloc = SegAlloc::new();
        unsafe {
            alloc.free(std::ptr::null_mut());
        }
    }

    #[test]
    fn freed_memory_is_reused() {
        let mut alloc = SegAlloc::new();

        unsafe {
            // Keep a second allocation alive so the first does not merge
            // into the surrounding free space.
            let p = alloc.allocate(64);
            let _guard = alloc.allocate(64);
            alloc.free(p);

            let q = alloc.allocate(64);
            assert_eq!(p, q);
        }
    }

    #[test]
    fn reallocate_null_allocates() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let p = alloc.reallocate(std::ptr::null_mut(), 40);
            assert!(!p.is_null());
            assert_eq!(BlockRef::from_payload(p).size(), 48);
        }
    }

    #[test]
    fn reallocate_to_zero_frees() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let p = alloc.allocate(40);
            let _guard = alloc.allocate(8);

            let q = alloc.reallocate(p, 0);
            assert!(q.is_null());
            assert!(!BlockRef::from_payload(p).is_allocated());
        }
    }

    #[test]
    fn reallocate_grows_and_preserves_content() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let p = alloc.allocate(40);
            for i in 0..40 {
                p.add(i).write(i as u8);
            }

            let q = alloc.reallocate(p, 200);
            assert!(!q.is_null());
            assert_ne!(q, p);
            for i in 0..40 {
                assert_eq!(q.add(i).read(), i as u8, "byte {i}");
            }

            // The old block went back to the free state.
            assert!(!BlockRef::from_payload(p).is_allocated());
        }
    }

    #[test]
    fn reallocate_shrink_copies_the_new_size() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let p = alloc.allocate(64);
            for i in 0..64 {
                p.add(i).write(0xC3);
            }

            let q = alloc.reallocate(p, 8);
            assert!(!q.is_null());
            assert_eq!(BlockRef::from_payload(q).size(), MIN_BLOCK_SIZE);
            for i in 0..8 {
                assert_eq!(q.add(i).read(), 0xC3);
            }
        }
    }

    #[test]
    fn zero_alloc_zero_fills() {
        let mut alloc = SegAlloc::new();

        unsafe {
            // Dirty some memory first so reuse would show through.
            let p = alloc.allocate(256);
            std::ptr::write_bytes(p, 0xFF, 256);
            let _guard = alloc.allocate(8);
            alloc.free(p);

            let q = alloc.zero_alloc(32, 8);
            assert!(!q.is_null());
            for i in 0..256 {
                assert_eq!(q.add(i).read(), 0, "byte {i}");
            }
        }
    }

    #[test]
    fn zero_alloc_rejects_overflow_without_touching_the_heap() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let p = alloc.allocate(24);
            assert!(!p.is_null());
            let size_before = alloc.heap.as_ref().unwrap().heap_size();

            assert!(alloc.zero_alloc(usize::MAX, 2).is_null());
            assert!(alloc.zero_alloc(0, 8).is_null());

            assert_eq!(alloc.heap.as_ref().unwrap().heap_size(), size_before);
        }
    }

    #[test]
    fn heap_stays_consistent_through_mixed_traffic() {
        let mut alloc = SegAlloc::new();

        unsafe {
            let mut live = Vec::new();

            // A deterministic mix of sizes across every class regime,
            // freeing every other pointer along the way.
            for round in 0..4usize {
                for &size in &[1, 8, 24, 100, 500, 3000, 70000] {
                    let p = alloc.allocate(size + round);
                    assert!(!p.is_null());
                    live.push(p);
                }
                for p in live.split_off(live.len() / 2) {
                    alloc.free(p);
                }
            }

            let grown = alloc.reallocate(live.pop().unwrap(), 4096);
            assert!(!grown.is_null());
            live.push(grown);

            for p in live {
                alloc.free(p);
            }

            let report = checker::check(alloc.heap.as_ref().unwrap());
            assert!(report.is_empty(), "{report:#?}");
        }
    }
}
