//! This file contains the helper functions for the allocator.
//! These are functions that don't particularly belong to any concrete module of the program.

/// Rounds `size` up to the next multiple of `n`.
///
/// `n` must be a power of two. This is used to keep every block size a
/// multiple of the 16-byte alignment unit and to round heap-extension
/// requests.
#[inline]
pub(crate) fn round_up(size: usize, n: usize) -> usize {
    debug_assert!(n.is_power_of_two());
    (size + n - 1) & !(n - 1)
}
