//! Bounded storage tiers.

pub mod disk;
pub mod memory;

use crate::entry::CacheEntry;

/// Outcome of an exact lookup in one tier.
#[derive(Debug)]
pub enum TierLookup {
    /// A live entry was found.
    Hit(CacheEntry),
    /// The key was present but past expiry; the tier removed it.
    ExpiredMiss,
    /// The key is not resident.
    Miss,
}
