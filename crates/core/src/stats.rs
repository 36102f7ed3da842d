//! Aggregate statistics counters.

use std::sync::atomic::{AtomicU64, Ordering};

use dejavu_events::CacheStatistics;

/// Lock-free counters behind [`CacheStatistics`] snapshots.
///
/// Counters only ever increase; occupancy numbers are sampled from the
/// tiers at snapshot time.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    similarity_hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl StatsRecorder {
    /// Fresh recorder with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an exact hit served from memory.
    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an exact hit served from disk.
    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a perceptual-similarity hit.
    pub fn record_similarity_hit(&self) {
        self.similarity_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a lookup no tier could serve.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a stored value.
    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a disk-to-memory promotion.
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count entries removed by a capacity pass.
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Count entries removed because their TTL passed.
    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot the counters merged with live tier occupancy.
    #[must_use]
    pub fn snapshot(
        &self,
        memory_entries: u64,
        memory_bytes: u64,
        disk_entries: u64,
        disk_bytes: u64,
    ) -> CacheStatistics {
        CacheStatistics {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            similarity_hits: self.similarity_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            memory_entries,
            memory_bytes,
            disk_entries,
            disk_bytes,
        }
    }
}
