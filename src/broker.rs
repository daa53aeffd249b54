//! The page broker: the allocator's single downstream dependency.
//!
//! The heap must stay one contiguous byte range so that the implicit
//! block list can be walked by plain size arithmetic. The broker
//! therefore reserves one region of [`MAX_HEAP_SIZE`] bytes up front and
//! deals it out through [`PageBroker::sbrk`], a monotonic break pointer:
//!
//! ```text
//!          granted bytes                  still reserved
//! +------------------------------+--------------------------------+
//! | prologue | blocks | epilogue |                                |
//! +------------------------------+--------------------------------+
//! ^                              ^
//! heap_lo()                      break (next sbrk returns this)
//! ```
//!
//! The region is requested from the OS through the [`PlatformMemory`]
//! trait, which hides the platform syscalls: `mmap` on Unix,
//! `VirtualAlloc` on Windows. Heap bytes are never handed back while the
//! broker lives; the whole reservation is returned on drop.

use std::ptr::NonNull;

/// Total address space reserved for the heap. Pages are only touched as
/// the break moves, so the reservation itself is cheap.
pub(crate) const MAX_HEAP_SIZE: usize = 256 * 1024 * 1024;

/// This trait provides an abstraction to handle low level memory
/// operations and syscalls. The allocator, our top level view of this,
/// has nothing to do with the concrete APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the
    /// kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);
}

/// Grants heap bytes and reports the current heap bounds.
pub(crate) struct PageBroker {
    /// Start of the reservation; also the lowest heap address.
    base: NonNull<u8>,
    /// Bytes granted so far.
    brk: usize,
}

impl PageBroker {
    /// Reserves the backing region, or `None` when the OS refuses the
    /// mapping.
    pub fn new() -> Option<Self> {
        let base = unsafe { Self::request_memory(MAX_HEAP_SIZE)? };
        Some(Self { base, brk: 0 })
    }

    /// Grows the heap by `len` bytes and returns the address of the first
    /// new byte, or `None` once the reservation is exhausted.
    ///
    /// Either the whole grant happens or nothing does; a failed call
    /// leaves the break untouched.
    pub fn sbrk(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > MAX_HEAP_SIZE - self.brk {
            return None;
        }

        let old_brk = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        self.brk += len;
        Some(old_brk)
    }

    /// Lowest heap address.
    #[inline]
    pub fn heap_lo(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Highest heap address, inclusive.
    #[inline]
    pub fn heap_hi(&self) -> *mut u8 {
        debug_assert!(self.brk > 0, "empty heap has no highest byte");
        unsafe { self.base.as_ptr().add(self.brk - 1) }
    }

    /// Bytes granted so far.
    #[inline]
    pub fn heap_size(&self) -> usize {
        self.brk
    }
}

impl Drop for PageBroker {
    fn drop(&mut self) {
        unsafe { Self::return_memory(self.base.as_ptr(), MAX_HEAP_SIZE) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{PageBroker, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for PageBroker {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::{PageBroker, PlatformMemory};

    use std::{os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::Memory;

    impl PlatformMemory for PageBroker {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }
    }
}
