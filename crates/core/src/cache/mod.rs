//! The cache orchestrator.
//!
//! [`RecognitionCache`] is the only surface downstream code talks to.
//! It owns both tiers, the similarity index, the access log, and the
//! event bus, and keeps them consistent: lookups fall from memory to
//! disk to perceptual neighbors, stores land in memory synchronously
//! and on disk in the background, and removals cascade everywhere.
//!
//! Lock discipline: `remove` and `clear` are the only operations that
//! hold the memory and similarity locks together (always in that
//! order). Every other path takes one lock at a time.

mod maintenance;

pub use maintenance::MaintenanceHandle;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use dejavu_events::{
    CacheEventKind, CacheStatistics, EventBus, EventReceiver, MatchKind, TierKind,
};
use dejavu_hash::{ContentHash, Frame, FrameHashes, Hasher, PerceptualHash};

use crate::access::AccessLog;
use crate::config::{CacheConfig, ConfidenceWeightedTtl, TtlPolicy};
use crate::entry::CacheEntry;
use crate::similarity::SimilarityIndex;
use crate::stats::StatsRecorder;
use crate::tier::disk::DiskTier;
use crate::tier::memory::{MemorySet, MemoryTier};
use crate::tier::TierLookup;
use crate::Result;

use maintenance::MaintenanceContext;

/// How many similarity candidates a lookup tries to resolve.
const SIMILAR_CANDIDATE_LIMIT: usize = 8;

/// Values the cache can hold: serializable recognition results that
/// carry a confidence score.
pub trait ConfidenceScored: Serialize + DeserializeOwned + Send + Sync {
    /// Recognition confidence in `[0, 1]`.
    fn confidence(&self) -> f32;

    /// Replace the confidence; used to rescale similarity hits.
    fn set_confidence(&mut self, confidence: f32);
}

/// A served lookup.
#[derive(Debug, Clone)]
pub struct CacheHit<V> {
    /// The cached value; similarity hits carry a rescaled confidence.
    pub value: V,
    /// Whether the match was exact or perceptual.
    pub kind: MatchKind,
    /// Tier that held the serving entry.
    pub tier: TierKind,
    /// Measured similarity, present on similar matches.
    pub similarity: Option<f64>,
}

/// Tiered cache for frame recognition results.
///
/// Keys are derived from frame content, never supplied by the caller:
/// an exact key is the hash of the canonicalized pixels, and a
/// perceptual signature links near-duplicate frames. `get` and `set`
/// never fail the caller; storage problems degrade to misses and are
/// reported through [`tracing`] and the event stream.
///
/// Cloning is intentionally absent: wrap the cache in an [`Arc`] to
/// share it.
pub struct RecognitionCache<V> {
    config: CacheConfig,
    hasher: Arc<Hasher>,
    memory: Arc<RwLock<MemoryTier>>,
    disk: Arc<DiskTier>,
    similarity: Arc<RwLock<SimilarityIndex>>,
    access: Arc<RwLock<AccessLog>>,
    stats: Arc<StatsRecorder>,
    bus: EventBus,
    policy: Arc<dyn TtlPolicy>,
    /// Orders same-key disk writes; see [`Self::store_value`].
    write_version: AtomicU64,
    _marker: PhantomData<fn() -> V>,
}

impl<V: ConfidenceScored> RecognitionCache<V> {
    /// Create a cache instance from configuration.
    ///
    /// The disk tier opens its persisted index during construction and
    /// starts cold when the index is missing or unreadable. No tasks are
    /// spawned until [`start_maintenance`](Self::start_maintenance) or
    /// the first [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration)
    /// when the configuration is invalid and
    /// [`Error::Io`](crate::Error::Io) when the disk root cannot be
    /// created.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let disk = DiskTier::open(
            config.resolve_disk_root(),
            config.disk_budget_bytes,
            config.eviction_hysteresis,
            config.compression_threshold_bytes,
        )?;
        Ok(Self {
            hasher: Arc::new(Hasher::new(config.hash_memo_capacity)),
            memory: Arc::new(RwLock::new(MemoryTier::new(
                config.memory_budget_bytes,
                config.eviction_hysteresis,
            ))),
            disk: Arc::new(disk),
            similarity: Arc::new(RwLock::new(SimilarityIndex::new(
                config.similarity_threshold,
                config.candidate_window,
            ))),
            access: Arc::new(RwLock::new(AccessLog::new())),
            stats: Arc::new(StatsRecorder::new()),
            bus: EventBus::with_capacity(config.event_capacity),
            policy: Arc::new(ConfidenceWeightedTtl::default()),
            write_version: AtomicU64::new(0),
            config,
            _marker: PhantomData,
        })
    }

    /// Replace the confidence-to-TTL policy.
    #[must_use]
    pub fn with_ttl_policy(mut self, policy: Arc<dyn TtlPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The configuration this instance runs with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up the recognition result for a frame.
    ///
    /// Resolution order: exact match in memory, exact match on disk
    /// (promoting the entry into memory), then perceptual neighbors.
    /// A similarity hit rescales the stored confidence by the measured
    /// similarity and re-caches the value under the probe's own hash.
    ///
    /// Never fails: hashing or storage problems are logged and
    /// reported as a miss.
    pub async fn get(&self, frame: &Frame) -> Option<CacheHit<V>> {
        let Some(hashes) = self.hash_frame(frame).await else {
            self.stats.record_miss();
            return None;
        };
        if hashes.degraded {
            tracing::debug!("degraded frame, lookup always misses");
            self.stats.record_miss();
            return None;
        }
        let key = hashes.content;
        let now = Utc::now();

        if let Some(hit) = self.lookup_memory(&key, now).await {
            return Some(hit);
        }
        if let Some(hit) = self.lookup_disk(&key, now).await {
            return Some(hit);
        }
        if let Some(signature) = hashes.perceptual {
            if let Some(hit) = self.lookup_similar(&key, signature, now).await {
                return Some(hit);
            }
        }

        // the key may have a leftover similarity node from a past life
        self.cleanup_if_absent(&key, now).await;
        self.record_access(&key, None, now).await;
        self.stats.record_miss();
        self.emit(CacheEventKind::Miss {
            key: key.as_hex().to_string(),
        });
        None
    }

    /// Cache a recognition result for a frame.
    ///
    /// The entry lands in memory before this returns and reaches disk
    /// in the background. The effective TTL comes from the configured
    /// [`TtlPolicy`] applied to `ttl` (or the configured default).
    ///
    /// Never fails: serialization or storage problems are logged and
    /// the call becomes a no-op.
    pub async fn set(&self, frame: &Frame, value: &V, ttl: Option<Duration>) {
        let Some(hashes) = self.hash_frame(frame).await else {
            return;
        };
        if hashes.degraded {
            tracing::warn!("degraded frame, result not cached");
            return;
        }
        let now = Utc::now();
        self.store_value(&hashes.content, hashes.perceptual, value, ttl, now, None)
            .await;
    }

    /// Remove a frame's entry from both tiers and the similarity index.
    ///
    /// Holds the memory and similarity locks across the disk removal so
    /// no interleaved lookup can see the key in one structure but not
    /// the other. Removing an absent key is a no-op.
    pub async fn remove(&self, frame: &Frame) {
        let Some(hashes) = self.hash_frame(frame).await else {
            return;
        };
        if hashes.degraded {
            return;
        }
        let key = hashes.content;
        let mut memory = self.memory.write().await;
        let mut similarity = self.similarity.write().await;
        let removed_memory = memory.remove(&key).is_some();
        similarity.remove(&key);
        let removed_disk = self.disk.remove(&key).await;
        drop(similarity);
        drop(memory);
        {
            self.access.write().await.remove(&key);
        }
        if removed_memory || removed_disk {
            self.emit(CacheEventKind::Removed {
                key: key.as_hex().to_string(),
            });
        }
    }

    /// Drop every entry, every similarity node, and every access pattern.
    pub async fn clear(&self) {
        let mut memory = self.memory.write().await;
        let mut similarity = self.similarity.write().await;
        memory.clear();
        similarity.clear();
        self.disk.clear().await;
        drop(similarity);
        drop(memory);
        {
            self.access.write().await.clear();
        }
        self.emit(CacheEventKind::Cleared);
    }

    /// Whether a live entry exists for the frame in either tier.
    pub async fn contains(&self, frame: &Frame) -> bool {
        let Some(hashes) = self.hash_frame(frame).await else {
            return false;
        };
        if hashes.degraded {
            return false;
        }
        let now = Utc::now();
        let in_memory = { self.memory.read().await.contains(&hashes.content, now) };
        in_memory || self.disk.contains(&hashes.content, now).await
    }

    /// Counters since construction plus current tier occupancy.
    pub async fn statistics(&self) -> CacheStatistics {
        let (memory_entries, memory_bytes) = {
            let memory = self.memory.read().await;
            (memory.entry_count() as u64, memory.total_bytes())
        };
        let (disk_entries, disk_bytes) = self.disk.usage().await;
        self.stats
            .snapshot(memory_entries, memory_bytes, disk_entries, disk_bytes)
    }

    /// Subscribe to the cache event stream.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    /// Number of live event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Start the background maintenance worker.
    #[must_use = "dropping the handle leaves the worker running"]
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        let token = CancellationToken::new();
        let ctx = MaintenanceContext {
            memory: Arc::clone(&self.memory),
            disk: Arc::clone(&self.disk),
            similarity: Arc::clone(&self.similarity),
            access: Arc::clone(&self.access),
            stats: Arc::clone(&self.stats),
            events: self.bus.sender(),
            interval: self.config.maintenance_interval(),
            rebuild_every: self.config.index_rebuild_every,
            threshold: self.config.similarity_threshold,
        };
        let task = tokio::spawn(maintenance::run(ctx, token.clone()));
        MaintenanceHandle::new(token, task)
    }

    /// Warm the memory tier from the newest live disk entries.
    ///
    /// Returns how many entries were copied. Checks `token` between
    /// entries, so a preload can be abandoned mid-way without leaving
    /// anything inconsistent.
    pub async fn preload(&self, max_entries: usize, token: &CancellationToken) -> usize {
        let now = Utc::now();
        let mut snapshot = self.disk.index_snapshot().await;
        snapshot.retain(|(_, meta)| now < meta.expires_at);
        snapshot.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        snapshot.truncate(max_entries);

        let mut loaded = 0usize;
        for (key, _) in snapshot {
            if token.is_cancelled() {
                break;
            }
            if let TierLookup::Hit(entry) = self.disk.get(&key, now).await {
                let outcome = { self.memory.write().await.set(key.clone(), entry, now) };
                if outcome.inserted {
                    loaded += 1;
                }
                self.handle_memory_evictions(outcome, now).await;
            }
        }
        if loaded > 0 {
            tracing::info!(loaded, "memory tier preloaded from disk");
        }
        loaded
    }

    /// Flush the disk index and stop publishing events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) when the final index
    /// flush fails.
    pub async fn shutdown(&self) -> Result<()> {
        self.disk.flush().await?;
        self.bus.shutdown();
        Ok(())
    }

    // ===== lookup paths =====

    async fn lookup_memory(&self, key: &ContentHash, now: DateTime<Utc>) -> Option<CacheHit<V>> {
        let lookup = { self.memory.write().await.get(key, now) };
        match lookup {
            TierLookup::Hit(entry) => {
                if let Some(value) = self.decode(&entry.payload) {
                    self.record_access(key, Some(TierKind::Memory), now).await;
                    self.stats.record_memory_hit();
                    self.emit(CacheEventKind::Hit {
                        key: key.as_hex().to_string(),
                        tier: TierKind::Memory,
                        kind: MatchKind::Exact,
                        similarity: None,
                    });
                    return Some(CacheHit {
                        value,
                        kind: MatchKind::Exact,
                        tier: TierKind::Memory,
                        similarity: None,
                    });
                }
                self.purge_key(key).await;
                None
            }
            TierLookup::ExpiredMiss => {
                self.stats.record_expirations(1);
                None
            }
            TierLookup::Miss => None,
        }
    }

    async fn lookup_disk(&self, key: &ContentHash, now: DateTime<Utc>) -> Option<CacheHit<V>> {
        match self.disk.get(key, now).await {
            TierLookup::Hit(mut entry) => {
                if let Some(value) = self.decode(&entry.payload) {
                    entry.touch(now);
                    let outcome = { self.memory.write().await.set(key.clone(), entry, now) };
                    if outcome.inserted {
                        self.stats.record_promotion();
                        self.emit(CacheEventKind::Promoted {
                            key: key.as_hex().to_string(),
                        });
                    }
                    self.handle_memory_evictions(outcome, now).await;
                    self.record_access(key, Some(TierKind::Disk), now).await;
                    self.stats.record_disk_hit();
                    self.emit(CacheEventKind::Hit {
                        key: key.as_hex().to_string(),
                        tier: TierKind::Disk,
                        kind: MatchKind::Exact,
                        similarity: None,
                    });
                    return Some(CacheHit {
                        value,
                        kind: MatchKind::Exact,
                        tier: TierKind::Disk,
                        similarity: None,
                    });
                }
                self.purge_key(key).await;
                None
            }
            TierLookup::ExpiredMiss => {
                self.stats.record_expirations(1);
                None
            }
            TierLookup::Miss => None,
        }
    }

    /// Resolve perceptual neighbors of the probe, best first. A hit
    /// rescales the stored confidence by the measured similarity and
    /// re-caches the value under the probe's own hash, linked to the
    /// neighbor that served it.
    async fn lookup_similar(
        &self,
        key: &ContentHash,
        signature: PerceptualHash,
        now: DateTime<Utc>,
    ) -> Option<CacheHit<V>> {
        let candidates = {
            self.similarity
                .read()
                .await
                .closest(&signature, SIMILAR_CANDIDATE_LIMIT)
        };
        for (neighbor, similarity) in candidates {
            if neighbor == *key {
                continue;
            }
            let lookup = { self.memory.write().await.get(&neighbor, now) };
            let (entry, tier) = match lookup {
                TierLookup::Hit(entry) => (entry, TierKind::Memory),
                _ => match self.disk.get(&neighbor, now).await {
                    TierLookup::Hit(entry) => (entry, TierKind::Disk),
                    _ => {
                        // node outlived its entry everywhere: drop it
                        self.cleanup_if_absent(&neighbor, now).await;
                        continue;
                    }
                },
            };
            let Some(mut value) = self.decode(&entry.payload) else {
                self.purge_key(&neighbor).await;
                continue;
            };

            let scaled = (f64::from(value.confidence()) * similarity) as f32;
            value.set_confidence(scaled);
            self.store_value(key, Some(signature), &value, None, now, Some(&neighbor))
                .await;

            self.record_access(key, Some(tier), now).await;
            self.stats.record_similarity_hit();
            self.emit(CacheEventKind::Hit {
                key: key.as_hex().to_string(),
                tier,
                kind: MatchKind::Similar,
                similarity: Some(similarity),
            });
            return Some(CacheHit {
                value,
                kind: MatchKind::Similar,
                tier,
                similarity: Some(similarity),
            });
        }
        None
    }

    // ===== write paths =====

    /// Serialize and store a value: memory synchronously, similarity
    /// node immediately, disk in the background.
    async fn store_value(
        &self,
        key: &ContentHash,
        signature: Option<PerceptualHash>,
        value: &V,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
        link_to: Option<&ContentHash>,
    ) {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => Bytes::from(payload),
            Err(error) => {
                tracing::warn!(%error, "value serialization failed, result not cached");
                return;
            }
        };
        let requested = ttl.unwrap_or_else(|| self.config.default_ttl());
        let effective = self.policy.ttl_for(value.confidence(), requested);
        let entry = CacheEntry::new(payload.clone(), effective, now);
        let created_at = entry.created_at;
        let expires_at = entry.expires_at;
        let size_bytes = entry.size_bytes;

        // the version is taken under the memory lock, so same-key disk
        // writes install in the same order the memory tier saw them
        let (outcome, version) = {
            let mut memory = self.memory.write().await;
            let outcome = memory.set(key.clone(), entry, now);
            (outcome, self.write_version.fetch_add(1, Ordering::Relaxed))
        };
        self.stats.record_store();
        if outcome.inserted {
            self.emit(CacheEventKind::Stored {
                key: key.as_hex().to_string(),
                tier: TierKind::Memory,
                size_bytes,
            });
        }
        self.handle_memory_evictions(outcome, now).await;

        if let Some(signature) = signature {
            let mut similarity = self.similarity.write().await;
            similarity.insert(key.clone(), signature);
            if let Some(neighbor) = link_to {
                similarity.connect(key, neighbor);
            }
        }

        self.spawn_disk_write(key.clone(), payload, created_at, expires_at, version);
    }

    /// Persist a payload to disk off the caller's latency path, running
    /// a disk eviction pass when the write pushed the tier over budget.
    fn spawn_disk_write(
        &self,
        key: ContentHash,
        payload: Bytes,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        version: u64,
    ) {
        let disk = Arc::clone(&self.disk);
        let memory = Arc::clone(&self.memory);
        let similarity = Arc::clone(&self.similarity);
        let access = Arc::clone(&self.access);
        let stats = Arc::clone(&self.stats);
        let events = self.bus.sender();

        tokio::spawn(async move {
            let stored = match disk
                .set(key.clone(), payload, created_at, expires_at, version)
                .await
            {
                Ok(stored) => stored,
                Err(error) => {
                    tracing::warn!(%error, key = %key, "disk write failed, entry stays memory-only");
                    return;
                }
            };
            if !stored.installed {
                // a newer write for this key already landed
                return;
            }
            if let Some(sender) = &events {
                sender
                    .emit(CacheEventKind::Stored {
                        key: key.as_hex().to_string(),
                        tier: TierKind::Disk,
                        size_bytes: stored.stored_bytes,
                    })
                    .ok();
            }
            if !stored.over_budget {
                return;
            }

            let now = Utc::now();
            let keys = disk.keys().await;
            let scores: HashMap<ContentHash, f64> = {
                let log = access.read().await;
                keys.iter().map(|k| (k.clone(), log.score(k, now))).collect()
            };
            let (evicted, freed_bytes) = disk.evict(&scores).await;
            if evicted.is_empty() {
                return;
            }
            stats.record_evictions(evicted.len() as u64);

            let mut orphaned = Vec::new();
            {
                let memory = memory.read().await;
                for key in &evicted {
                    if !memory.contains(key, now) {
                        orphaned.push(key.clone());
                    }
                }
            }
            {
                let mut similarity = similarity.write().await;
                for key in &orphaned {
                    similarity.remove(key);
                }
            }
            {
                let mut log = access.write().await;
                for key in &orphaned {
                    log.remove(key);
                }
            }
            if let Some(sender) = &events {
                sender
                    .emit(CacheEventKind::Evicted {
                        tier: TierKind::Disk,
                        keys: evicted.iter().map(|k| k.as_hex().to_string()).collect(),
                        freed_bytes,
                    })
                    .ok();
            }
        });
    }

    // ===== consistency helpers =====

    /// Cascade a memory eviction: similarity nodes and access patterns
    /// survive only while the key is still on disk.
    async fn handle_memory_evictions(&self, outcome: MemorySet, now: DateTime<Utc>) {
        if outcome.evicted.is_empty() {
            return;
        }
        self.stats.record_evictions(outcome.evicted.len() as u64);

        let mut orphaned = Vec::new();
        for key in &outcome.evicted {
            if !self.disk.contains(key, now).await {
                orphaned.push(key.clone());
            }
        }
        {
            let mut similarity = self.similarity.write().await;
            for key in &orphaned {
                similarity.remove(key);
            }
        }
        {
            let mut access = self.access.write().await;
            for key in &orphaned {
                access.remove(key);
            }
        }
        self.emit(CacheEventKind::Evicted {
            tier: TierKind::Memory,
            keys: outcome
                .evicted
                .iter()
                .map(|k| k.as_hex().to_string())
                .collect(),
            freed_bytes: outcome.freed_bytes,
        });
    }

    /// Drop an entry that failed to decode so it stops failing forever.
    async fn purge_key(&self, key: &ContentHash) {
        {
            self.memory.write().await.remove(key);
        }
        self.disk.remove(key).await;
        {
            self.similarity.write().await.remove(key);
        }
        {
            self.access.write().await.remove(key);
        }
    }

    /// Remove the similarity node and access pattern for a key that is
    /// resident in neither tier.
    async fn cleanup_if_absent(&self, key: &ContentHash, now: DateTime<Utc>) {
        let has_node = { self.similarity.read().await.contains(key) };
        if !has_node {
            return;
        }
        let in_memory = { self.memory.read().await.contains(key, now) };
        if in_memory || self.disk.contains(key, now).await {
            return;
        }
        {
            self.similarity.write().await.remove(key);
        }
        {
            self.access.write().await.remove(key);
        }
    }

    async fn record_access(&self, key: &ContentHash, served_by: Option<TierKind>, now: DateTime<Utc>) {
        self.access.write().await.record(key, served_by, now);
    }

    /// Hash the frame off the runtime. `None` means the hashing task
    /// itself failed, which callers treat as a miss.
    async fn hash_frame(&self, frame: &Frame) -> Option<FrameHashes> {
        let hasher = Arc::clone(&self.hasher);
        let frame = frame.clone();
        match tokio::task::spawn_blocking(move || hasher.hash_frame(&frame)).await {
            Ok(hashes) => Some(hashes),
            Err(error) => {
                tracing::warn!(%error, "hashing task failed");
                None
            }
        }
    }

    fn decode(&self, payload: &[u8]) -> Option<V> {
        match serde_json::from_slice(payload) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(%error, "cached payload undecodable, evicting");
                None
            }
        }
    }

    fn emit(&self, kind: CacheEventKind) {
        if let Some(sender) = self.bus.sender() {
            sender.emit(kind).ok();
        }
    }
}
