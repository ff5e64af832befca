//! The heap provider abstraction: the external collaborator that hands the
//! allocator freshly appended bytes on request.
//!
//! This plays the role `memlib.c`/`sbrk` play for the design this crate
//! implements: the allocator never owns or allocates memory from the OS
//! directly, it only ever asks a [`HeapProvider`] to extend a single
//! monotonically-growing region and hands back a pointer into it.

use std::fmt;

/// A byte-granular, monotonically-growing heap region.
///
/// Implementors must guarantee that the base address returned by
/// [`HeapProvider::heap_base`] never changes once the first successful
/// [`HeapProvider::grow_heap`] call has been made: every pointer the
/// allocator has ever handed to a client must stay valid for the lifetime
/// of the provider.
pub trait HeapProvider {
    /// Extends the heap by exactly `n_bytes` and returns a pointer to the
    /// first newly appended byte, or `None` if the provider cannot grow
    /// further.
    fn grow_heap(&mut self, n_bytes: usize) -> Option<*mut u8>;

    /// The lowest address ever handed out by this provider.
    fn heap_base(&self) -> *mut u8;

    /// The current upper bound of the heap, i.e. `heap_base()` plus the
    /// total number of bytes granted so far.
    fn heap_limit(&self) -> *mut u8;
}

/// Default capacity reserved by [`SimHeapProvider::default`]: 16 MiB.
pub const DEFAULT_CAPACITY: usize = 1 << 24;

/// A simulated heap backed by a single fixed-capacity buffer, in the style
/// of the CMU malloc-lab `memlib.c` this design was distilled from.
///
/// The whole capacity is reserved up front so that growth never moves the
/// backing storage — a precondition the allocator's raw-pointer arithmetic
/// depends on. This is the provider exercised by this crate's test suite:
/// unlike the real process break, several instances can coexist safely in
/// one test binary.
pub struct SimHeapProvider {
    buffer: Box<[u8]>,
    used: usize,
}

impl SimHeapProvider {
    /// Reserves `capacity` bytes up front; the heap can never grow past
    /// this ceiling.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    /// Bytes granted to the allocator so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Total reserved capacity.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for SimHeapProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HeapProvider for SimHeapProvider {
    fn grow_heap(&mut self, n_bytes: usize) -> Option<*mut u8> {
        if self.used.checked_add(n_bytes)? > self.buffer.len() {
            tracing::error!(
                requested = n_bytes,
                remaining = self.buffer.len() - self.used,
                "simulated heap provider exhausted"
            );
            return None;
        }

        let ptr = unsafe { self.buffer.as_mut_ptr().add(self.used) };
        self.used += n_bytes;
        Some(ptr)
    }

    fn heap_base(&self) -> *mut u8 {
        self.buffer.as_ptr() as *mut u8
    }

    fn heap_limit(&self) -> *mut u8 {
        unsafe { self.buffer.as_ptr().add(self.used) as *mut u8 }
    }
}

impl fmt::Debug for SimHeapProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimHeapProvider")
            .field("used", &self.used)
            .field("capacity", &self.buffer.len())
            .finish()
    }
}

/// A heap provider backed by the real process break, via `libc::sbrk`, in
/// the style of the crate this design was adapted from.
///
/// # Safety
///
/// `sbrk` manipulates process-wide state. At most one `SbrkHeapProvider`
/// (and no other code calling `sbrk` directly) may be in use per process,
/// or heaps will corrupt each other.
pub struct SbrkHeapProvider {
    base: *mut u8,
}

impl SbrkHeapProvider {
    pub fn new() -> Self {
        Self {
            base: std::ptr::null_mut(),
        }
    }
}

impl Default for SbrkHeapProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapProvider for SbrkHeapProvider {
    fn grow_heap(&mut self, n_bytes: usize) -> Option<*mut u8> {
        let raw = unsafe { libc::sbrk(n_bytes as libc::intptr_t) };
        if raw == usize::MAX as *mut libc::c_void {
            tracing::error!(n_bytes, "sbrk failed to grow the process heap");
            return None;
        }

        if self.base.is_null() {
            self.base = raw as *mut u8;
        }

        Some(raw as *mut u8)
    }

    fn heap_base(&self) -> *mut u8 {
        self.base
    }

    fn heap_limit(&self) -> *mut u8 {
        unsafe { libc::sbrk(0) as *mut u8 }
    }
}
