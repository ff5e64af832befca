//! Tunables shared by every allocator variant.

use crate::encoding::CHUNKSIZE;
use crate::fit::FitStrategy;
use crate::freelist::InsertPolicy;
use crate::provider::DEFAULT_CAPACITY;

/// Construction-time configuration for any of the three allocator variants.
///
/// `insert_policy` is only consulted by [`crate::explicit::ExplicitAllocator`];
/// the two implicit variants ignore it since they keep no separate free
/// list to insert into.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Placement policy used by `find_fit`.
    pub fit_strategy: FitStrategy,
    /// Free-list insertion policy, consulted only by the explicit variant.
    pub insert_policy: InsertPolicy,
    /// Number of bytes requested from the heap provider whenever no
    /// existing free block satisfies a placement request.
    pub chunksize: usize,
    /// Capacity reserved up front when an allocator is constructed with the
    /// default [`crate::provider::SimHeapProvider`].
    pub initial_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fit_strategy: FitStrategy::First,
            insert_policy: InsertPolicy::Fifo,
            chunksize: CHUNKSIZE,
            initial_capacity: DEFAULT_CAPACITY,
        }
    }
}
