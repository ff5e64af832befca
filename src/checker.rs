//! Heap-wide invariant checking and diagnostic dumps.
//!
//! These walks are deliberately kept outside the allocator variants
//! themselves: they exist for tests and for [`status`](crate::implicit::ImplicitAllocator::status)-style
//! diagnostics, not for the hot allocate/free path, so they re-derive
//! everything from the header/footer words rather than trusting any cached
//! state.

use std::io::{self, Write};

use crate::block::{header_alloc, header_prev_alloc, header_size, next_block};
use crate::freelist::FreeList;

/// Walks a heap where every block (free or allocated) carries both a header
/// and a footer, checking:
/// - every header/footer pair agrees on size and alloc bit,
/// - no two free blocks are ever heap-adjacent (a missed coalesce),
/// - the walk lands exactly on the zero-size epilogue at `heap_limit`.
pub fn check_both_sided_heap(heap_start: *mut u8, heap_limit: *mut u8) -> Result<(), String> {
    let mut cur = heap_start;
    let mut prev_was_free = false;

    loop {
        let size = unsafe { header_size(cur) };
        if size == 0 {
            return Ok(());
        }
        if (cur as usize) >= (heap_limit as usize) {
            return Err(format!(
                "heap walk ran past heap_limit at {:p} without hitting the epilogue",
                cur
            ));
        }

        let alloc = unsafe { header_alloc(cur) };
        let footer = unsafe { (cur.add(size - 8) as *mut u64).read() };
        let footer_size = (footer & !0xFu64) as usize;
        let footer_alloc = footer & 0x1 != 0;
        if footer_size != size || footer_alloc != alloc {
            return Err(format!(
                "header/footer mismatch at {:p}: header=({}, {}) footer=({}, {})",
                cur, size, alloc, footer_size, footer_alloc
            ));
        }

        if !alloc && prev_was_free {
            return Err(format!("two adjacent free blocks meeting at {:p}", cur));
        }
        prev_was_free = !alloc;

        cur = unsafe { next_block(cur) };
    }
}

/// Like [`check_both_sided_heap`], but for the footer-elided variant where
/// only free blocks carry a footer and every header's `prev_alloc` bit must
/// agree with its predecessor's actual allocation state.
pub fn check_elided_heap(heap_start: *mut u8, heap_limit: *mut u8) -> Result<(), String> {
    let mut cur = heap_start;
    let mut prev_alloc = true;

    loop {
        let size = unsafe { header_size(cur) };
        if size == 0 {
            return Ok(());
        }
        if (cur as usize) >= (heap_limit as usize) {
            return Err(format!(
                "heap walk ran past heap_limit at {:p} without hitting the epilogue",
                cur
            ));
        }

        let alloc = unsafe { header_alloc(cur) };
        let recorded_prev_alloc = unsafe { header_prev_alloc(cur) };
        if recorded_prev_alloc != prev_alloc {
            return Err(format!(
                "prev_alloc bit at {:p} says {} but predecessor was {}",
                cur, recorded_prev_alloc, prev_alloc
            ));
        }

        if !alloc {
            let footer = unsafe { (cur.add(size - 8) as *mut u64).read() };
            let footer_size = (footer & !0xFu64) as usize;
            if footer_size != size {
                return Err(format!(
                    "free block at {:p} header/footer size mismatch: {} vs {}",
                    cur, size, footer_size
                ));
            }
            if !prev_alloc {
                return Err(format!("two adjacent free blocks meeting at {:p}", cur));
            }
        }

        prev_alloc = alloc;
        cur = unsafe { next_block(cur) };
    }
}

/// Walks the heap in address order counting free blocks, independently of
/// anything the free list itself believes. Mirrors walking the whole heap to
/// double check a free list's claimed length against ground truth rather
/// than trusting the list's own bookkeeping.
pub fn count_free_blocks_in_heap(heap_start: *mut u8, heap_limit: *mut u8) -> usize {
    let mut cur = heap_start;
    let mut count = 0;
    loop {
        let size = unsafe { header_size(cur) };
        if size == 0 || (cur as usize) >= (heap_limit as usize) {
            return count;
        }
        if !unsafe { header_alloc(cur) } {
            count += 1;
        }
        cur = unsafe { next_block(cur) };
    }
}

/// Walks `list` forward and backward, checking the two directions agree,
/// that every node visited is actually marked free in the heap, and that the
/// list's own length matches `heap_free_count` — an independently computed
/// count of free blocks found by walking the whole heap. A block that went
/// missing from the list during a buggy coalesce (while its memory was
/// folded into a neighbour) would leave the list internally consistent but
/// short of the heap's true free-block count, which this last check catches.
pub fn check_free_list_soundness(list: &FreeList, heap_free_count: usize) -> Result<(), String> {
    let forward: Vec<*mut u8> = list.iter().collect();
    for &node in &forward {
        if unsafe { header_alloc(node) } {
            return Err(format!(
                "free list contains block {:p} that is marked allocated",
                node
            ));
        }
    }

    let mut backward: Vec<*mut u8> = list.iter_rev().collect();
    backward.reverse();
    if backward != forward {
        return Err(format!(
            "free list forward walk {:?} disagrees with reversed backward walk {:?}",
            forward, backward
        ));
    }

    if forward.len() != list.len() {
        return Err(format!(
            "free list length {} disagrees with forward walk of {} nodes",
            list.len(),
            forward.len()
        ));
    }

    if forward.len() != heap_free_count {
        return Err(format!(
            "free list claims {} free blocks but an independent heap walk found {}",
            forward.len(),
            heap_free_count
        ));
    }

    Ok(())
}

/// Writes one line per block, in heap order, for a both-sides-footer heap.
pub fn dump_both_sided_heap(
    heap_start: *mut u8,
    heap_limit: *mut u8,
    sink: &mut dyn Write,
) -> io::Result<()> {
    let mut cur = heap_start;
    loop {
        let size = unsafe { header_size(cur) };
        if size == 0 {
            writeln!(sink, "{:p}: epilogue", cur)?;
            return Ok(());
        }
        let alloc = unsafe { header_alloc(cur) };
        writeln!(
            sink,
            "{:p}: size={} {}",
            cur,
            size,
            if alloc { "alloc" } else { "free" }
        )?;
        if (cur as usize) >= (heap_limit as usize) {
            return Ok(());
        }
        cur = unsafe { next_block(cur) };
    }
}

/// Writes one line per block, in heap order, for a footer-elided heap.
pub fn dump_elided_heap(
    heap_start: *mut u8,
    heap_limit: *mut u8,
    sink: &mut dyn Write,
) -> io::Result<()> {
    let mut cur = heap_start;
    loop {
        let size = unsafe { header_size(cur) };
        if size == 0 {
            writeln!(sink, "{:p}: epilogue", cur)?;
            return Ok(());
        }
        let alloc = unsafe { header_alloc(cur) };
        let prev_alloc = unsafe { header_prev_alloc(cur) };
        writeln!(
            sink,
            "{:p}: size={} {} prev_alloc={}",
            cur,
            size,
            if alloc { "alloc" } else { "free" },
            prev_alloc
        )?;
        if (cur as usize) >= (heap_limit as usize) {
            return Ok(());
        }
        cur = unsafe { next_block(cur) };
    }
}
