//! # heaplab - Dynamic storage allocators over a pluggable heap
//!
//! Three allocator designs built on the same header/footer encoding, each
//! trading placement simplicity against per-allocation overhead:
//!
//! ```text
//!   heaplab
//!   ├── encoding  - Header/footer word packing shared by every variant
//!   ├── block     - Raw navigation between headers, footers and payloads
//!   ├── provider  - The HeapProvider abstraction (simulated heap or sbrk)
//!   ├── freelist  - Doubly-linked explicit free list
//!   ├── fit       - Placement strategy selection
//!   ├── config    - Construction-time tunables
//!   ├── error     - AllocError
//!   ├── checker   - Heap-wide invariant walks, used by tests
//!   ├── implicit  - ImplicitAllocator: both-sides footers, no free list
//!   ├── elided    - ElidedAllocator: footer-elided, no free list
//!   └── explicit  - ExplicitAllocator: both-sides footers, explicit free list
//! ```
//!
//! ## Which variant to reach for
//!
//! [`ImplicitAllocator`] is the simplest and easiest to reason about: every
//! block, free or allocated, carries both a header and a footer, so any
//! block can walk to either neighbour without consulting anything else.
//! That robustness costs two words of overhead per allocation.
//!
//! [`ElidedAllocator`] drops the footer on allocated blocks, carrying a
//! `prev_alloc` bit in each header instead. One word of overhead per
//! allocation, at the cost of needing the bit kept in lockstep with every
//! neighbour's actual state.
//!
//! [`ExplicitAllocator`] keeps both-sides footers but threads free blocks
//! through a free list, so `allocate` only ever scans free blocks rather
//! than the whole heap.
//!
//! None of the three ever allocates or frees memory from the process
//! directly; they all go through a [`provider::HeapProvider`], which plays
//! the role a simulated `memlib`/`sbrk` layer plays in a traditional
//! allocator test harness. [`provider::SimHeapProvider`] is the default and
//! is what every test in this crate uses; [`provider::SbrkHeapProvider`] is
//! provided for driving the real process heap.
//!
//! ## Example
//!
//! ```
//! use heaplab::ImplicitAllocator;
//!
//! let mut heap = ImplicitAllocator::with_defaults().unwrap();
//! let ptr = heap.allocate(128).unwrap();
//! unsafe { std::ptr::write_bytes(ptr, 0, 128) };
//! heap.free(ptr);
//! ```

mod block;
pub mod checker;
pub mod config;
pub mod elided;
pub mod encoding;
pub mod error;
pub mod explicit;
pub mod fit;
pub mod freelist;
pub mod implicit;
pub mod provider;

pub use config::Config;
pub use elided::ElidedAllocator;
pub use error::AllocError;
pub use explicit::ExplicitAllocator;
pub use fit::FitStrategy;
pub use freelist::InsertPolicy;
pub use implicit::ImplicitAllocator;
pub use provider::{HeapProvider, SbrkHeapProvider, SimHeapProvider};
