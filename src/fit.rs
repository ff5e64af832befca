//! Placement policy selection.
//!
//! This only names the strategies; each allocator variant implements its
//! own `find_fit` walking whatever structure it maintains (heap-order
//! blocks for the implicit variants, free-list order for the explicit
//! one), since the three variants don't share enough scanning logic to be
//! worth a common trait.

/// Which free block a `find_fit` scan should settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStrategy {
    /// Take the first free block large enough, scanning from the start.
    First,
    /// Like [`FitStrategy::First`], but resume scanning from wherever the
    /// previous search left off (a "roving pointer"), wrapping around.
    Next,
    /// Scan the whole structure and take the smallest free block that still
    /// satisfies the request.
    Best,
}

impl Default for FitStrategy {
    fn default() -> Self {
        FitStrategy::First
    }
}
