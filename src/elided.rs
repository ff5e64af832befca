//! The footer-elided implicit free-list allocator: allocated blocks carry
//! only a header, recording whether their *predecessor* was allocated in
//! the header's `prev_alloc` bit. Free blocks still carry a footer, since
//! a block's successor needs it to walk backwards when that predecessor is
//! free.
//!
//! This trims one word of overhead off every allocated block versus
//! [`crate::implicit::ImplicitAllocator`], at the cost of needing to keep the
//! `prev_alloc` bit of every block's header in lockstep with its actual
//! predecessor's allocation state.

use std::io::{self, Write};

use crate::block::{
    block_from_payload, header_alloc, header_prev_alloc, header_size, next_block, payload_ptr,
    prev_block, write_footer, write_header,
};
use crate::checker;
use crate::config::Config;
use crate::encoding::{round_up, DSIZE, MIN_BLOCK_SIZE, WSIZE};
use crate::error::AllocError;
use crate::fit::FitStrategy;
use crate::provider::{HeapProvider, SimHeapProvider};

/// A footer-elided implicit free-list allocator over a pluggable
/// [`HeapProvider`].
pub struct ElidedAllocator<P: HeapProvider = SimHeapProvider> {
    provider: P,
    config: Config,
    heap_start: *mut u8,
    rover: *mut u8,
}

impl ElidedAllocator<SimHeapProvider> {
    /// Builds an allocator backed by a freshly reserved simulated heap.
    pub fn with_defaults() -> Result<Self, AllocError> {
        Self::new(SimHeapProvider::default(), Config::default())
    }
}

impl<P: HeapProvider> ElidedAllocator<P> {
    pub fn new(mut provider: P, config: Config) -> Result<Self, AllocError> {
        let base = provider
            .grow_heap(4 * WSIZE)
            .ok_or(AllocError::OutOfHeap)?;

        let heap_start = unsafe {
            let prologue = base.add(WSIZE);
            write_header(prologue, DSIZE, true, true);
            write_footer(prologue, DSIZE, true, true);
            let epilogue = prologue.add(DSIZE);
            write_header(epilogue, 0, true, true);
            prologue
        };

        let mut allocator = Self {
            provider,
            config,
            heap_start,
            rover: heap_start,
        };
        allocator.extend_heap(allocator.config.chunksize)?;
        Ok(allocator)
    }

    /// New blocks carved off the end of the heap are always free, so this
    /// looks identical to the both-sides-footer variant: the new block
    /// gets a header and footer, carrying forward the `prev_alloc` bit from
    /// the old epilogue it overwrites, and a fresh epilogue header is
    /// appended after it.
    fn extend_heap(&mut self, min_bytes: usize) -> Result<*mut u8, AllocError> {
        let size = round_up(min_bytes, DSIZE).max(MIN_BLOCK_SIZE);
        let bp = self.provider.grow_heap(size).ok_or(AllocError::OutOfHeap)?;

        let block = unsafe {
            let block = block_from_payload(bp);
            let prev_alloc = header_prev_alloc(block);
            write_header(block, size, false, prev_alloc);
            write_footer(block, size, false, prev_alloc);
            let epilogue = next_block(block);
            write_header(epilogue, 0, true, false);
            block
        };

        Ok(self.coalesce_block(block))
    }

    fn coalesce_block(&mut self, block: *mut u8) -> *mut u8 {
        unsafe {
            let prev_alloc = block == self.heap_start || header_prev_alloc(block);
            let next = next_block(block);
            let next_size = header_size(next);
            let next_alloc = next_size == 0 || header_alloc(next);
            let size = header_size(block);

            let result = match (prev_alloc, next_alloc) {
                (true, true) => block,
                (true, false) => {
                    let new_size = size + next_size;
                    write_header(block, new_size, false, true);
                    write_footer(block, new_size, false, true);
                    block
                }
                (false, true) => {
                    let prev = prev_block(block);
                    let prev_prev_alloc = header_prev_alloc(prev);
                    let new_size = header_size(prev) + size;
                    write_header(prev, new_size, false, prev_prev_alloc);
                    write_footer(prev, new_size, false, prev_prev_alloc);
                    prev
                }
                (false, false) => {
                    let prev = prev_block(block);
                    let prev_prev_alloc = header_prev_alloc(prev);
                    let new_size = header_size(prev) + size + next_size;
                    write_header(prev, new_size, false, prev_prev_alloc);
                    write_footer(prev, new_size, false, prev_prev_alloc);
                    prev
                }
            };

            if self.rover == block || self.rover == next {
                self.rover = result;
            }
            result
        }
    }

    fn find_fit(&mut self, asize: usize) -> Option<*mut u8> {
        match self.config.fit_strategy {
            FitStrategy::First => self.scan(self.heap_start, asize),
            FitStrategy::Best => {
                let mut best: Option<(*mut u8, usize)> = None;
                let mut cur = self.heap_start;
                loop {
                    let size = unsafe { header_size(cur) };
                    if size == 0 {
                        break;
                    }
                    if !unsafe { header_alloc(cur) } && size >= asize {
                        if best.is_none_or(|(_, bsz)| size < bsz) {
                            best = Some((cur, size));
                        }
                    }
                    cur = unsafe { next_block(cur) };
                }
                best.map(|(blk, _)| blk)
            }
            FitStrategy::Next => {
                if let Some(blk) = self.scan(self.rover, asize) {
                    self.rover = blk;
                    return Some(blk);
                }
                if let Some(blk) = self.scan(self.heap_start, asize) {
                    self.rover = blk;
                    return Some(blk);
                }
                None
            }
        }
    }

    fn scan(&self, start: *mut u8, asize: usize) -> Option<*mut u8> {
        let mut cur = start;
        loop {
            let size = unsafe { header_size(cur) };
            if size == 0 {
                return None;
            }
            if !unsafe { header_alloc(cur) } && size >= asize {
                return Some(cur);
            }
            cur = unsafe { next_block(cur) };
        }
    }

    /// Marks the block after `block` (if any) as having `block`'s new
    /// allocation state as its `prev_alloc` bit, rewriting its header (and,
    /// if it is free, its footer) in place.
    unsafe fn retag_successor_prev_alloc(&self, block: *mut u8, block_is_alloc: bool) {
        unsafe {
            let next = next_block(block);
            let next_size = header_size(next);
            if next_size == 0 {
                write_header(next, 0, true, block_is_alloc);
                return;
            }
            let next_alloc = header_alloc(next);
            write_header(next, next_size, next_alloc, block_is_alloc);
            if !next_alloc {
                write_footer(next, next_size, next_alloc, block_is_alloc);
            }
        }
    }

    /// Splits `block` (currently free, of size `csize`) to carve out
    /// `asize` bytes for allocation.
    ///
    /// The allocated portion gets a header only: footers are elided for
    /// allocated blocks in this variant. When a free tail remains, its
    /// `prev_alloc` bit is always set true, since whatever immediately
    /// precedes it is the block we just marked allocated.
    fn place(&mut self, block: *mut u8, asize: usize) {
        unsafe {
            let csize = header_size(block);
            let prev_alloc = header_prev_alloc(block);

            if csize - asize >= MIN_BLOCK_SIZE {
                write_header(block, asize, true, prev_alloc);
                let tail = next_block(block);
                let tail_size = csize - asize;
                write_header(tail, tail_size, false, true);
                write_footer(tail, tail_size, false, true);
            } else {
                write_header(block, csize, true, prev_alloc);
                self.retag_successor_prev_alloc(block, true);
            }
        }
    }

    fn requested_to_block_size(requested: usize) -> usize {
        round_up(requested + WSIZE, DSIZE).max(MIN_BLOCK_SIZE)
    }

    /// A `requested` size of zero returns a null pointer without touching
    /// the heap.
    pub fn allocate(&mut self, requested: usize) -> Result<*mut u8, AllocError> {
        if requested == 0 {
            return Ok(std::ptr::null_mut());
        }
        let asize = Self::requested_to_block_size(requested);

        if let Some(block) = self.find_fit(asize) {
            self.place(block, asize);
            return Ok(unsafe { payload_ptr(block) });
        }

        let extend_size = asize.max(self.config.chunksize);
        let block = self.extend_heap(extend_size)?;
        self.place(block, asize);
        Ok(unsafe { payload_ptr(block) })
    }

    fn is_live_payload(&self, ptr: *mut u8) -> bool {
        if ptr.is_null() {
            return false;
        }
        let lo = unsafe { payload_ptr(self.heap_start) };
        if (ptr as usize) < (lo as usize) || (ptr as usize) >= (self.provider.heap_limit() as usize)
        {
            return false;
        }
        if (ptr as usize - lo as usize) % WSIZE != 0 {
            return false;
        }
        let block = unsafe { block_from_payload(ptr) };
        unsafe { header_alloc(block) }
    }

    /// A pointer that does not correspond to a currently-allocated block is
    /// a fatal programmer error: this logs and aborts the process rather
    /// than returning an error a caller could ignore.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if !self.is_live_payload(ptr) {
            crate::error::abort_invalid_free(ptr);
        }

        let block = unsafe { block_from_payload(ptr) };
        unsafe {
            let size = header_size(block);
            let prev_alloc = header_prev_alloc(block);
            write_header(block, size, false, prev_alloc);
            write_footer(block, size, false, prev_alloc);
            self.retag_successor_prev_alloc(block, false);
        }
        self.coalesce_block(block);
    }

    /// A pointer that is neither null nor a live allocation aborts the
    /// process, as in [`Self::free`].
    pub fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> Result<*mut u8, AllocError> {
        if new_size == 0 {
            self.free(ptr);
            return Ok(std::ptr::null_mut());
        }
        if ptr.is_null() {
            return self.allocate(new_size);
        }
        if !self.is_live_payload(ptr) {
            crate::error::abort_invalid_free(ptr);
        }

        let block = unsafe { block_from_payload(ptr) };
        let old_payload_cap = unsafe { header_size(block) } - WSIZE;

        let new_ptr = self.allocate(new_size)?;
        let copy_len = old_payload_cap.min(new_size);
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
        }
        self.free(ptr);
        Ok(new_ptr)
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        checker::check_elided_heap(self.heap_start, self.provider.heap_limit())
    }

    pub fn status(&self, sink: &mut dyn Write) -> io::Result<()> {
        checker::dump_elided_heap(self.heap_start, self.provider.heap_limit(), sink)
    }
}
