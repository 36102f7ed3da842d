//! Bounded in-memory tier.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dejavu_hash::ContentHash;

use super::TierLookup;
use crate::entry::CacheEntry;

/// Result of a memory insert.
#[derive(Debug)]
pub struct MemorySet {
    /// Whether the entry is now resident.
    pub inserted: bool,
    /// Keys removed by the capacity pass, lowest score first.
    pub evicted: Vec<ContentHash>,
    /// Bytes released by the capacity pass.
    pub freed_bytes: u64,
}

/// Volatile key-to-entry store with a byte budget.
///
/// All mutation goes through `&mut self`; the orchestrator serializes
/// access behind one async lock, so the tier itself stays lock-free.
#[derive(Debug)]
pub struct MemoryTier {
    entries: HashMap<ContentHash, CacheEntry>,
    total_bytes: u64,
    budget_bytes: u64,
    hysteresis: f64,
}

impl MemoryTier {
    /// Empty tier with the given budget and eviction hysteresis.
    #[must_use]
    pub fn new(budget_bytes: u64, hysteresis: f64) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            budget_bytes,
            hysteresis,
        }
    }

    /// Exact lookup. Serves live entries and lazily removes expired ones.
    pub fn get(&mut self, key: &ContentHash, now: DateTime<Utc>) -> TierLookup {
        match self.entries.get_mut(key) {
            None => return TierLookup::Miss,
            Some(entry) => {
                if !entry.is_expired(now) {
                    entry.touch(now);
                    return TierLookup::Hit(entry.clone());
                }
            }
        }
        // never serve expired data
        self.discard(key);
        TierLookup::ExpiredMiss
    }

    /// Insert an entry, evicting first when it would exceed the budget.
    ///
    /// An entry larger than the whole budget is not inserted at all;
    /// callers may still persist it to disk.
    pub fn set(&mut self, key: ContentHash, entry: CacheEntry, now: DateTime<Utc>) -> MemorySet {
        let incoming = entry.size_bytes;
        let mut outcome = MemorySet {
            inserted: false,
            evicted: Vec::new(),
            freed_bytes: 0,
        };
        if incoming > self.budget_bytes {
            tracing::warn!(
                size_bytes = incoming,
                budget_bytes = self.budget_bytes,
                "entry larger than the memory budget, keeping it out of memory"
            );
            return outcome;
        }
        // replacing an entry frees its bytes before the capacity check
        self.discard(&key);
        if self.total_bytes + incoming > self.budget_bytes {
            let (evicted, freed) = self.evict_for(incoming, now);
            outcome.evicted = evicted;
            outcome.freed_bytes = freed;
        }
        self.total_bytes += incoming;
        self.entries.insert(key, entry);
        outcome.inserted = true;
        outcome
    }

    /// Remove an entry, returning it if it was resident.
    pub fn remove(&mut self, key: &ContentHash) -> Option<CacheEntry> {
        self.discard(key)
    }

    /// Whether a live entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &ContentHash, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove every expired entry, returning their keys.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<ContentHash> {
        let expired: Vec<ContentHash> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.discard(key);
        }
        expired
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Number of resident entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes held across all resident entries.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Evict lowest-scored entries until `incoming` fits under the
    /// hysteresis target. Ties evict the oldest creation first.
    fn evict_for(&mut self, incoming: u64, now: DateTime<Utc>) -> (Vec<ContentHash>, u64) {
        let target = (self.budget_bytes as f64 * self.hysteresis) as u64;
        let mut ranked: Vec<(ContentHash, f64, DateTime<Utc>, u64)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.score(now), entry.created_at, entry.size_bytes))
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.2.cmp(&b.2))
        });
        let mut evicted = Vec::new();
        let mut freed = 0u64;
        for (key, _, _, size) in ranked {
            if self.total_bytes + incoming <= target {
                break;
            }
            self.entries.remove(&key);
            self.total_bytes = self.total_bytes.saturating_sub(size);
            freed += size;
            evicted.push(key);
        }
        (evicted, freed)
    }

    fn discard(&mut self, key: &ContentHash) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if let Some(entry) = &removed {
            self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        }
        removed
    }
}
