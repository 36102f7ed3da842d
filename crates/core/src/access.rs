//! Per-key access history for disk eviction scoring.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use dejavu_events::TierKind;
use dejavu_hash::ContentHash;

/// Access history of one key.
#[derive(Debug, Clone)]
pub struct AccessPattern {
    /// Lookups observed for the key.
    pub total_accesses: u64,
    /// Lookups that were served from a tier.
    pub hits: u64,
    /// When the pattern started recording.
    pub created_at: DateTime<Utc>,
    /// Most recent lookup.
    pub last_accessed: DateTime<Utc>,
    /// Tier that served the most recent hit.
    pub last_hit_tier: Option<TierKind>,
}

impl AccessPattern {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_accesses: 0,
            hits: 0,
            created_at: now,
            last_accessed: now,
            last_hit_tier: None,
        }
    }

    /// Fraction of lookups that were served.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }

    /// Observed lookups per hour since the pattern began.
    #[must_use]
    pub fn frequency_per_hour(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_secs = (now - self.created_at).num_seconds().max(1);
        self.total_accesses as f64 * 3600.0 / elapsed_secs as f64
    }
}

/// Access patterns for every key the cache has seen recently.
///
/// The log feeds disk eviction: keys that are looked up often and
/// actually serve hits are kept, one-shot keys go first.
#[derive(Debug, Default)]
pub struct AccessLog {
    patterns: HashMap<ContentHash, AccessPattern>,
}

impl AccessLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup; `served_by` names the tier on a hit, `None` on a miss.
    pub fn record(&mut self, key: &ContentHash, served_by: Option<TierKind>, now: DateTime<Utc>) {
        let pattern = self
            .patterns
            .entry(key.clone())
            .or_insert_with(|| AccessPattern::new(now));
        pattern.total_accesses = pattern.total_accesses.saturating_add(1);
        pattern.last_accessed = now;
        if let Some(tier) = served_by {
            pattern.hits = pattern.hits.saturating_add(1);
            pattern.last_hit_tier = Some(tier);
        }
    }

    /// Pattern recorded for a key.
    #[must_use]
    pub fn get(&self, key: &ContentHash) -> Option<&AccessPattern> {
        self.patterns.get(key)
    }

    /// Disk eviction score: access frequency weighted by hit rate.
    ///
    /// Keys with no recorded pattern score zero and are evicted first.
    #[must_use]
    pub fn score(&self, key: &ContentHash, now: DateTime<Utc>) -> f64 {
        self.patterns
            .get(key)
            .map_or(0.0, |p| p.frequency_per_hour(now) * p.hit_rate())
    }

    /// Drop the pattern for an invalidated key.
    pub fn remove(&mut self, key: &ContentHash) {
        self.patterns.remove(key);
    }

    /// Keys with a recorded pattern.
    #[must_use]
    pub fn keys(&self) -> Vec<ContentHash> {
        self.patterns.keys().cloned().collect()
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.patterns.len()
    }

    /// Drop every pattern.
    pub fn clear(&mut self) {
        self.patterns.clear();
    }
}
