//! Header/footer word encoding.
//!
//! A block's header (and, when present, footer) is a single machine word
//! packing a size and up to two flag bits into the low 4 bits, which are
//! otherwise unused because every block size is a multiple of [`DSIZE`].
//!
//! ```text
//!   63                                            4 3 2 1 0
//!   +----------------------------------------------+-+-+-+-+
//!   |                     size                      | | |P|A|
//!   +----------------------------------------------+-+-+-+-+
//!                                                       ^ ^
//!                                      prev_alloc (bit1)| |
//!                                              alloc (bit0)
//! ```

use std::mem;

use static_assertions::const_assert;

/// The word type blocks are packed into. 8 bytes on every platform this
/// crate targets.
pub type Word = u64;

/// Machine word size in bytes.
pub const WSIZE: usize = mem::size_of::<Word>();

/// Double-word size in bytes: the alignment and block-size granularity.
pub const DSIZE: usize = 2 * WSIZE;

/// Minimum usable block size: header, footer, and the two payload words the
/// explicit variant's free list threads its `pred`/`succ` links through.
pub const MIN_BLOCK_SIZE: usize = 4 * WSIZE;

/// Default heap growth increment requested when no free block satisfies a
/// placement request.
pub const CHUNKSIZE: usize = 1 << 12;

const ALLOC_MASK: Word = 0x1;
const PREV_ALLOC_MASK: Word = 0x2;
const SIZE_MASK: Word = !(0xF as Word);

const_assert!(MIN_BLOCK_SIZE % DSIZE == 0);
const_assert!(MIN_BLOCK_SIZE >= 4 * WSIZE);
const_assert!(CHUNKSIZE % DSIZE == 0);

/// Rounds `size` up to the next multiple of `n`.
#[inline]
pub fn round_up(size: usize, n: usize) -> usize {
    n * ((size + (n - 1)) / n)
}

/// Packs a block size and its allocation flags into a header/footer word.
///
/// `size` must be a positive multiple of 16; the caller is responsible for
/// having rounded it already (this function does not round on your behalf,
/// matching the allocator's convention of rounding once, at the call site
/// that first learns the requested size).
#[inline]
pub fn pack(size: usize, alloc: bool, prev_alloc: bool) -> Word {
    debug_assert_eq!(size & 0xF, 0, "block size must be a multiple of 16");
    let mut word = size as Word;
    if alloc {
        word |= ALLOC_MASK;
    }
    if prev_alloc {
        word |= PREV_ALLOC_MASK;
    }
    word
}

/// Unpacks a header/footer word into `(size, alloc, prev_alloc)`.
#[inline]
pub fn unpack(word: Word) -> (usize, bool, bool) {
    (extract_size(word), extract_alloc(word), extract_prev_alloc(word))
}

#[inline]
pub fn extract_size(word: Word) -> usize {
    (word & SIZE_MASK) as usize
}

#[inline]
pub fn extract_alloc(word: Word) -> bool {
    word & ALLOC_MASK != 0
}

#[inline]
pub fn extract_prev_alloc(word: Word) -> bool {
    word & PREV_ALLOC_MASK != 0
}
