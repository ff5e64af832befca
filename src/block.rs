//! Block navigation: the thin unsafe layer mapping between payload
//! pointers, block headers, and neighbouring blocks.
//!
//! Every function here operates on raw `*mut u8` addresses into the heap
//! buffer a [`crate::provider::HeapProvider`] owns. None of them bounds-check;
//! callers stay within `[heap_base, heap_limit)` via the prologue and
//! epilogue sentinels every allocator variant maintains.

use crate::encoding::{self, Word, WSIZE};

/// Reads the word at `ptr`.
///
/// # Safety
/// `ptr` must be valid for an aligned `Word` read.
#[inline]
pub(crate) unsafe fn read_word(ptr: *mut u8) -> Word {
    unsafe { (ptr as *mut Word).read() }
}

/// Writes `word` at `ptr`, overwriting it entirely.
///
/// # Safety
/// `ptr` must be valid for an aligned `Word` write.
#[inline]
pub(crate) unsafe fn write_word(ptr: *mut u8, word: Word) {
    unsafe { (ptr as *mut Word).write(word) }
}

/// # Safety
/// `block` must point at a valid header word.
#[inline]
pub(crate) unsafe fn header_size(block: *mut u8) -> usize {
    encoding::extract_size(unsafe { read_word(block) })
}

/// # Safety
/// `block` must point at a valid header word.
#[inline]
pub(crate) unsafe fn header_alloc(block: *mut u8) -> bool {
    encoding::extract_alloc(unsafe { read_word(block) })
}

/// # Safety
/// `block` must point at a valid header word.
#[inline]
pub(crate) unsafe fn header_prev_alloc(block: *mut u8) -> bool {
    encoding::extract_prev_alloc(unsafe { read_word(block) })
}

/// # Safety
/// `block` must point at a valid header word.
#[inline]
pub(crate) unsafe fn write_header(block: *mut u8, size: usize, alloc: bool, prev_alloc: bool) {
    unsafe { write_word(block, encoding::pack(size, alloc, prev_alloc)) }
}

/// Address of `block`'s footer, given its (already known) size.
///
/// # Safety
/// `block` must be a block of exactly `size` bytes that carries a footer.
#[inline]
pub(crate) unsafe fn footer_ptr(block: *mut u8, size: usize) -> *mut u8 {
    unsafe { block.add(size - WSIZE) }
}

/// # Safety
/// `block` must be a block of exactly `size` bytes that carries a footer.
#[inline]
pub(crate) unsafe fn write_footer(block: *mut u8, size: usize, alloc: bool, prev_alloc: bool) {
    unsafe { write_word(footer_ptr(block, size), encoding::pack(size, alloc, prev_alloc)) }
}

/// Payload address for a block: one word past its header.
#[inline]
pub(crate) unsafe fn payload_ptr(block: *mut u8) -> *mut u8 {
    unsafe { block.add(WSIZE) }
}

/// Inverse of [`payload_ptr`].
#[inline]
pub(crate) unsafe fn block_from_payload(payload: *mut u8) -> *mut u8 {
    unsafe { payload.sub(WSIZE) }
}

/// The block immediately following `block` in heap order.
///
/// # Safety
/// `block` must point at a valid header.
#[inline]
pub(crate) unsafe fn next_block(block: *mut u8) -> *mut u8 {
    unsafe { block.add(header_size(block)) }
}

/// Address of the footer word of the block preceding `block`.
#[inline]
pub(crate) unsafe fn prev_footer_ptr(block: *mut u8) -> *mut u8 {
    unsafe { block.sub(WSIZE) }
}

/// The block immediately preceding `block` in heap order, computed via its
/// trailing footer.
///
/// # Safety
/// The predecessor of `block` must carry a footer (always true in the
/// both-sides policy; in the footer-elided policy only valid when
/// `block`'s `prev_alloc` bit is false).
#[inline]
pub(crate) unsafe fn prev_block(block: *mut u8) -> *mut u8 {
    unsafe {
        let size = encoding::extract_size(read_word(prev_footer_ptr(block)));
        block.sub(size)
    }
}
