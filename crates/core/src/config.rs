//! Cache configuration and TTL policy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Configuration for a [`RecognitionCache`](crate::RecognitionCache) instance.
///
/// All fields have working defaults; construct with struct update syntax
/// to override the handful that matter for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Memory tier budget in bytes.
    pub memory_budget_bytes: u64,
    /// Disk tier budget in bytes, counted over stored (possibly compressed) sizes.
    pub disk_budget_bytes: u64,
    /// Disk tier root directory; resolved under the OS cache dir when unset.
    pub disk_root: Option<PathBuf>,
    /// Entry lifetime in seconds when `set` passes no explicit TTL.
    pub default_ttl_secs: u64,
    /// Serialized payloads above this size are candidates for compression.
    pub compression_threshold_bytes: usize,
    /// Minimum similarity for a perceptual match, in (0, 1].
    pub similarity_threshold: f64,
    /// Eviction drains a tier to this fraction of its budget.
    pub eviction_hysteresis: f64,
    /// Seconds between background maintenance ticks.
    pub maintenance_interval_secs: u64,
    /// The similarity index is rebuilt every this many maintenance ticks.
    pub index_rebuild_every: u32,
    /// How many recent signatures a new signature is compared against.
    pub candidate_window: usize,
    /// Frame hash memo capacity in entries; zero disables memoization.
    pub hash_memo_capacity: usize,
    /// Broadcast capacity of the event bus.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 32 * 1024 * 1024,
            disk_budget_bytes: 256 * 1024 * 1024,
            disk_root: None,
            default_ttl_secs: 3600,
            compression_threshold_bytes: 4096,
            similarity_threshold: 0.8,
            eviction_hysteresis: 0.75,
            maintenance_interval_secs: 60,
            index_rebuild_every: 10,
            candidate_window: 256,
            hash_memo_capacity: dejavu_hash::DEFAULT_MEMO_CAPACITY,
            event_capacity: dejavu_events::DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Check the configuration for values the cache cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.memory_budget_bytes == 0 {
            return Err(Error::configuration("memoryBudgetBytes must be non-zero"));
        }
        if self.disk_budget_bytes == 0 {
            return Err(Error::configuration("diskBudgetBytes must be non-zero"));
        }
        if self.default_ttl_secs == 0 {
            return Err(Error::configuration("defaultTtlSecs must be non-zero"));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(Error::configuration(
                "similarityThreshold must be within (0, 1]",
            ));
        }
        if !(self.eviction_hysteresis > 0.0 && self.eviction_hysteresis <= 1.0) {
            return Err(Error::configuration(
                "evictionHysteresis must be within (0, 1]",
            ));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(Error::configuration(
                "maintenanceIntervalSecs must be non-zero",
            ));
        }
        if self.index_rebuild_every == 0 {
            return Err(Error::configuration("indexRebuildEvery must be non-zero"));
        }
        if self.candidate_window == 0 {
            // an empty window silently disables similarity matching
            return Err(Error::configuration("candidateWindow must be non-zero"));
        }
        Ok(())
    }

    /// TTL applied when `set` passes none.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Interval between maintenance ticks.
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Directory the disk tier lives in.
    ///
    /// Falls back to the OS cache directory, then to the temp directory,
    /// when no explicit root is configured.
    #[must_use]
    pub fn resolve_disk_root(&self) -> PathBuf {
        if let Some(root) = &self.disk_root {
            return root.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("dejavu")
    }
}

/// Maps a recognition confidence to the lifetime a cached entry gets.
///
/// The orchestrator consults the policy on every store, both for fresh
/// `set` calls and for entries re-cached after a similarity hit.
pub trait TtlPolicy: Send + Sync + std::fmt::Debug {
    /// Lifetime for an entry whose value carries `confidence`.
    fn ttl_for(&self, confidence: f32, requested: Duration) -> Duration;
}

/// Scales the requested TTL linearly with confidence.
///
/// A result the recognizer was sure about stays cached for the full
/// requested lifetime; shakier results age out sooner. The multiplier
/// never drops below `floor`, so even low-confidence entries get a
/// useful residency.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceWeightedTtl {
    /// Smallest multiplier a low-confidence entry can receive.
    pub floor: f32,
}

impl Default for ConfidenceWeightedTtl {
    fn default() -> Self {
        Self { floor: 0.25 }
    }
}

impl TtlPolicy for ConfidenceWeightedTtl {
    fn ttl_for(&self, confidence: f32, requested: Duration) -> Duration {
        if !confidence.is_finite() {
            return requested;
        }
        let factor = confidence.clamp(self.floor, 1.0);
        requested.mul_f64(f64::from(factor))
    }
}

/// Ignores confidence and applies the requested TTL unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTtl;

impl TtlPolicy for FixedTtl {
    fn ttl_for(&self, _confidence: f32, requested: Duration) -> Duration {
        requested
    }
}
