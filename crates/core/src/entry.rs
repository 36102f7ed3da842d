//! Tier-resident cache entries.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One cached value as a tier holds it.
///
/// Entries are owned by exactly one tier; promotion copies the payload
/// into the destination rather than sharing it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized value payload.
    pub payload: Bytes,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// When the entry stops being servable.
    pub expires_at: DateTime<Utc>,
    /// Lookups that returned this entry.
    pub access_count: u64,
    /// When the entry was last returned.
    pub last_accessed: DateTime<Utc>,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Whether the payload is currently zstd-compressed.
    pub compressed: bool,
}

impl CacheEntry {
    /// Build a fresh entry expiring `ttl` after `now`.
    #[must_use]
    pub fn new(payload: Bytes, ttl: Duration, now: DateTime<Utc>) -> Self {
        let lifetime = chrono::Duration::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX);
        let expires_at = now
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            size_bytes: payload.len() as u64,
            payload,
            created_at: now,
            expires_at,
            access_count: 0,
            last_accessed: now,
            compressed: false,
        }
    }

    /// Whether the entry is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Record a served lookup.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now;
    }

    /// Memory eviction score: access count over age since last access.
    ///
    /// Cold entries score near zero and are evicted first; an entry
    /// touched moments ago scores high regardless of its total count.
    #[must_use]
    pub fn score(&self, now: DateTime<Utc>) -> f64 {
        let age_secs = ((now - self.last_accessed).num_milliseconds() as f64 / 1000.0).max(0.001);
        self.access_count as f64 / age_secs
    }
}
