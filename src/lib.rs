//! SegAlloc is a general-purpose dynamic memory allocator over a single
//! contiguous, monotonically growable heap.
//!
//! The heap bytes come from a page broker which reserves one region from
//! the kernel using:
//!
//! [`mmap`](https://man7.org/linux/man-pages/man2/mmap.2.html) on Unix
//! [`VirtualAlloc`](https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc)
//! on Windows.
//!
//! The internal structure of the allocator looks like this:
//!
//! ```text
//!             implicit list: every block, walked by size arithmetic
//!            +--------------------------------------------------+
//!            |                                                  |
//! +----------+-------+------+-------+------+-------+------------+----------+
//! | prologue | alloc | free | alloc | free | alloc |    free    | epilogue |
//! +----------+---+---+--+---+-------+--+---+-------+-----+------+----------+
//!                |      |              |                 |
//!                |      +--------------+--------+--------+
//!                |                              |
//!                |        segregated free lists: 15 heads by size class
//!                +-- payload handed to the caller
//! ```
//!
//! Every block starts with one packed header word; free blocks are
//! threaded onto one of 15 segregated lists partitioned by size class.
//! Two size-0 sentinel words, the prologue and
//! the epilogue, fence the block sequence so scans in either direction
//! terminate without bounds tests.
//!
//! The main optimizations which are implemented are:
//! - **Block splitting**: an oversized fit is split so the tail stays
//!   available
//! - **Boundary-tag coalescing**: adjacent free blocks always merge into
//!   a bigger one
//! - **Mini blocks**: 16-byte blocks drop the footer and the back link,
//!   trading an O(n) list removal for zero metadata overhead beyond the
//!   header
//! - **Bounded best-fit**: the search stops early on a close-enough fit
//!   and caps the probes spent per size class
//!
//! The allocator is strictly single-threaded: all state lives in one
//! [`SegAlloc`] value and every operation takes `&mut self`. The main
//! structure is [`SegAlloc`], you can follow the codebase from there.

mod block;
mod broker;
mod checker;
mod freelist;
mod header;
mod heap;
mod segalloc;
mod utils;

pub use segalloc::SegAlloc;
