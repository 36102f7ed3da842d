//! Event type definitions for the cache event stream.
//!
//! Every observable cache transition (hit, miss, store, eviction, expiry,
//! maintenance results) is expressed as a [`CacheEvent`] so downstream
//! consumers - dashboards, loggers, tests - subscribe instead of polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A structured cache event with envelope metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The event kind and payload.
    pub kind: CacheEventKind,
}

impl CacheEvent {
    /// Create a new event with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(kind: CacheEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Storage tier that served or holds an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// The bounded in-memory tier.
    Memory,
    /// The bounded persistent tier.
    Disk,
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The content hash matched an entry exactly.
    Exact,
    /// A perceptually similar entry was served with rescaled confidence.
    Similar,
}

/// Cache lifecycle events published by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum CacheEventKind {
    /// A lookup was served from a tier.
    Hit {
        /// Content hash of the request.
        key: String,
        /// Tier that held the served entry.
        tier: TierKind,
        /// Exact or similarity match.
        kind: MatchKind,
        /// Measured similarity for similarity matches.
        similarity: Option<f64>,
    },
    /// A lookup found nothing in either tier or the similarity index.
    Miss {
        /// Content hash of the request.
        key: String,
    },
    /// An entry was written to a tier.
    Stored {
        /// Content hash of the entry.
        key: String,
        /// Tier the entry was written to.
        tier: TierKind,
        /// Serialized payload size.
        size_bytes: u64,
    },
    /// A disk hit was copied into the memory tier.
    Promoted {
        /// Content hash of the promoted entry.
        key: String,
    },
    /// A capacity pass removed entries from a tier.
    Evicted {
        /// Tier the pass ran on.
        tier: TierKind,
        /// Keys removed, lowest score first.
        keys: Vec<String>,
        /// Bytes released by the pass.
        freed_bytes: u64,
    },
    /// Entries past their expiry were removed.
    Expired {
        /// Keys removed.
        keys: Vec<String>,
    },
    /// An entry was explicitly removed.
    Removed {
        /// Content hash of the removed entry.
        key: String,
    },
    /// All entries were removed from every structure.
    Cleared,
    /// A maintenance expiry sweep finished.
    SweepCompleted {
        /// Entries removed by the sweep.
        expired: usize,
        /// Wall-clock duration of the sweep.
        duration_ms: u64,
    },
    /// A similarity-index rebuild pass finished.
    IndexRebuilt {
        /// Nodes in the rebuilt graph.
        nodes: usize,
        /// Symmetric edges in the rebuilt graph.
        edges: usize,
        /// Wall-clock duration of the pass.
        duration_ms: u64,
    },
    /// A periodic statistics snapshot.
    Statistics(CacheStatistics),
}

impl CacheEventKind {
    /// Short name used in structured log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hit { .. } => "hit",
            Self::Miss { .. } => "miss",
            Self::Stored { .. } => "stored",
            Self::Promoted { .. } => "promoted",
            Self::Evicted { .. } => "evicted",
            Self::Expired { .. } => "expired",
            Self::Removed { .. } => "removed",
            Self::Cleared => "cleared",
            Self::SweepCompleted { .. } => "sweep_completed",
            Self::IndexRebuilt { .. } => "index_rebuilt",
            Self::Statistics(_) => "statistics",
        }
    }
}

/// Aggregate hit/miss counters split by tier and match kind, plus live
/// tier sizes at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    /// Exact hits served by the memory tier.
    pub memory_hits: u64,
    /// Exact hits served by the disk tier.
    pub disk_hits: u64,
    /// Hits served through the similarity index.
    pub similarity_hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries written by `set`.
    pub stores: u64,
    /// Disk hits copied into memory.
    pub promotions: u64,
    /// Entries removed by capacity passes.
    pub evictions: u64,
    /// Entries removed because their TTL passed.
    pub expirations: u64,
    /// Entries currently resident in memory.
    pub memory_entries: u64,
    /// Bytes currently resident in memory.
    pub memory_bytes: u64,
    /// Entries currently indexed on disk.
    pub disk_entries: u64,
    /// Bytes currently indexed on disk.
    pub disk_bytes: u64,
}

impl CacheStatistics {
    /// Hits across all tiers and match kinds.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.memory_hits + self.disk_hits + self.similarity_hits
    }

    /// Total lookups observed.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_hits() + self.misses
    }

    /// Fraction of lookups served from cache; 0.0 before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let requests = self.total_requests();
        if requests == 0 {
            return 0.0;
        }
        self.total_hits() as f64 / requests as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_has_fresh_id_and_timestamp() {
        let a = CacheEvent::new(CacheEventKind::Cleared);
        let b = CacheEvent::new(CacheEventKind::Cleared);
        assert_ne!(a.id, b.id);
        assert!(a.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_kind_serde_shape() {
        let kind = CacheEventKind::Hit {
            key: "abc123".to_string(),
            tier: TierKind::Memory,
            kind: MatchKind::Exact,
            similarity: None,
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["event"], "hit");
        assert_eq!(value["data"]["tier"], "memory");
        assert_eq!(value["data"]["kind"], "exact");
    }

    #[test]
    fn test_event_kind_roundtrip() {
        let kind = CacheEventKind::Evicted {
            tier: TierKind::Disk,
            keys: vec!["k1".to_string(), "k2".to_string()],
            freed_bytes: 600,
        };
        let json = serde_json::to_string(&kind).unwrap();
        let back: CacheEventKind = serde_json::from_str(&json).unwrap();
        match back {
            CacheEventKind::Evicted {
                tier,
                keys,
                freed_bytes,
            } => {
                assert_eq!(tier, TierKind::Disk);
                assert_eq!(keys.len(), 2);
                assert_eq!(freed_bytes, 600);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(CacheEventKind::Cleared.name(), "cleared");
        assert_eq!(
            CacheEventKind::Statistics(CacheStatistics::default()).name(),
            "statistics"
        );
    }

    #[test]
    fn test_hit_rate_zero_requests() {
        let stats = CacheStatistics::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_partitioned_counts() {
        let stats = CacheStatistics {
            memory_hits: 6,
            disk_hits: 2,
            similarity_hits: 1,
            misses: 3,
            ..CacheStatistics::default()
        };
        assert_eq!(stats.total_hits(), 9);
        assert_eq!(stats.total_requests(), 12);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_statistics_serde_camel_case() {
        let stats = CacheStatistics {
            memory_bytes: 1024,
            ..CacheStatistics::default()
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["memoryBytes"], 1024);
        assert!(value.get("memory_bytes").is_none());
    }
}
