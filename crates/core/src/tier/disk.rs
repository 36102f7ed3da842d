//! Bounded persistent tier with a JSON side-file index.
//!
//! Payloads live as one file per key under the tier root, named by the
//! content hash. Entry metadata lives in `index.json` next to them; the
//! index is rewritten atomically after every mutation, so a crash can
//! lose at most the latest writes, never corrupt older ones.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use dejavu_hash::ContentHash;

use super::TierLookup;
use crate::entry::CacheEntry;
use crate::{Error, Result};

/// Layout version of the persisted index.
const INDEX_VERSION: u32 = 1;
/// File name of the persisted index inside the tier root.
const INDEX_FILE: &str = "index.json";
/// Extension of payload files.
const ENTRY_SUFFIX: &str = "bin";
/// zstd compression level for stored payloads.
const COMPRESSION_LEVEL: i32 = 3;

/// Index metadata for one persisted entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskIndexEntry {
    /// Stored size in bytes (compressed size when `compressed`).
    pub size_bytes: u64,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// When the entry stops being servable.
    pub expires_at: DateTime<Utc>,
    /// Whether the payload file is zstd-compressed.
    pub compressed: bool,
}

/// Persisted form of the index side-file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedIndex {
    version: u32,
    entries: BTreeMap<ContentHash, DiskIndexEntry>,
}

#[derive(Debug, Default)]
struct DiskState {
    entries: BTreeMap<ContentHash, DiskIndexEntry>,
    /// Last installed write version per key; never persisted. Gates out
    /// stale same-key writes that finish after a newer one.
    versions: HashMap<ContentHash, u64>,
    total_bytes: u64,
    dirty: bool,
}

/// Result of a disk insert.
#[derive(Debug)]
pub struct DiskSet {
    /// Bytes written to disk (after compression, when applied); zero
    /// when the write was superseded.
    pub stored_bytes: u64,
    /// Whether the payload was stored compressed.
    pub compressed: bool,
    /// Whether the tier now exceeds its budget and wants an eviction pass.
    pub over_budget: bool,
    /// False when a newer write for the same key had already installed
    /// and this payload was discarded.
    pub installed: bool,
}

/// Bounded persistent key-to-entry store.
#[derive(Debug)]
pub struct DiskTier {
    root: PathBuf,
    budget_bytes: u64,
    hysteresis: f64,
    compression_threshold: usize,
    state: RwLock<DiskState>,
}

impl DiskTier {
    /// Open (or create) a disk tier rooted at `root`.
    ///
    /// A missing index means an empty tier. An unreadable or
    /// version-mismatched index is logged and the tier starts cold;
    /// stray payload files are removed either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the root directory cannot be created.
    pub fn open(
        root: impl Into<PathBuf>,
        budget_bytes: u64,
        hysteresis: f64,
        compression_threshold: usize,
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create_dir_all"))?;

        let index_path = root.join(INDEX_FILE);
        let mut entries = match Self::load_index(&index_path) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(%error, "cache index unreadable, starting cold");
                BTreeMap::new()
            }
        };
        Self::reconcile(&root, &mut entries);
        let total_bytes = entries.values().map(|meta| meta.size_bytes).sum();

        tracing::debug!(
            root = %root.display(),
            entries = entries.len(),
            total_bytes,
            "disk tier opened"
        );
        Ok(Self {
            root,
            budget_bytes,
            hysteresis,
            compression_threshold,
            state: RwLock::new(DiskState {
                entries,
                versions: HashMap::new(),
                total_bytes,
                dirty: false,
            }),
        })
    }

    /// Exact lookup. Decompresses off the runtime and never fails the
    /// caller: unreadable entries are logged, dropped, and reported as
    /// misses.
    pub async fn get(&self, key: &ContentHash, now: DateTime<Utc>) -> TierLookup {
        let meta = { self.state.read().await.entries.get(key).cloned() };
        let Some(meta) = meta else {
            return TierLookup::Miss;
        };
        if now >= meta.expires_at {
            self.remove(key).await;
            return TierLookup::ExpiredMiss;
        }

        let path = self.entry_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(key = %key, "payload file missing, repairing index");
                self.forget(key).await;
                return TierLookup::Miss;
            }
            Err(error) => {
                tracing::warn!(%error, key = %key, "payload unreadable, dropping entry");
                self.remove(key).await;
                return TierLookup::Miss;
            }
        };

        let payload = if meta.compressed {
            let decoded = tokio::task::spawn_blocking(move || {
                match zstd::decode_all(raw.as_slice()) {
                    Ok(decoded) => decoded,
                    Err(error) => {
                        // pre-compression entry or flag drift: serve the bytes as-is
                        tracing::warn!(%error, "decompression failed, serving stored bytes");
                        raw
                    }
                }
            })
            .await;
            match decoded {
                Ok(bytes) => Bytes::from(bytes),
                Err(error) => {
                    tracing::warn!(%error, key = %key, "decompression task failed");
                    return TierLookup::Miss;
                }
            }
        } else {
            Bytes::from(raw)
        };

        TierLookup::Hit(CacheEntry {
            size_bytes: payload.len() as u64,
            payload,
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            access_count: 0,
            last_accessed: now,
            compressed: false,
        })
    }

    /// Persist a payload under `key`.
    ///
    /// Payloads above the compression threshold are zstd-compressed off
    /// the runtime and stored compressed only when that actually made
    /// them smaller. The payload file is written to a temporary name
    /// and renamed into place, so readers never observe a torn file.
    ///
    /// `version` orders concurrent writes for the same key: the rename
    /// and the index row are installed together under the state lock,
    /// and a write whose version is below the last installed one is
    /// discarded whole, so a slow older write can never shadow a newer
    /// payload or leave the index describing the wrong file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the payload or index cannot be written.
    pub async fn set(
        &self,
        key: ContentHash,
        payload: Bytes,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        version: u64,
    ) -> Result<DiskSet> {
        let (stored, compressed) = if payload.len() > self.compression_threshold {
            let source = payload.clone();
            match tokio::task::spawn_blocking(move || {
                zstd::encode_all(source.as_ref(), COMPRESSION_LEVEL)
            })
            .await
            {
                Ok(Ok(encoded)) if encoded.len() < payload.len() => (Bytes::from(encoded), true),
                Ok(Ok(_)) => (payload, false),
                Ok(Err(error)) => {
                    tracing::warn!(%error, "compression failed, storing raw");
                    (payload, false)
                }
                Err(error) => {
                    tracing::warn!(%error, "compression task failed, storing raw");
                    (payload, false)
                }
            }
        } else {
            (payload, false)
        };

        let path = self.entry_path(&key);
        let tmp = temp_path(&path);
        write_file(&tmp, &stored).await?;

        let size_bytes = stored.len() as u64;
        let over_budget = {
            let mut state = self.state.write().await;
            if state.versions.get(&key).is_some_and(|&seen| seen > version) {
                drop(state);
                tracing::debug!(key = %key, "newer write already installed, discarding stale payload");
                let _ = tokio::fs::remove_file(&tmp).await;
                return Ok(DiskSet {
                    stored_bytes: 0,
                    compressed,
                    over_budget: false,
                    installed: false,
                });
            }
            if let Err(error) = tokio::fs::rename(&tmp, &path).await {
                drop(state);
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(Error::io(error, &path, "rename"));
            }
            state.versions.insert(key.clone(), version);
            if let Some(old) = state.entries.insert(
                key,
                DiskIndexEntry {
                    size_bytes,
                    created_at,
                    expires_at,
                    compressed,
                },
            ) {
                state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
            }
            state.total_bytes += size_bytes;
            state.dirty = true;
            state.total_bytes > self.budget_bytes
        };
        self.flush().await?;

        Ok(DiskSet {
            stored_bytes: size_bytes,
            compressed,
            over_budget,
            installed: true,
        })
    }

    /// Evict lowest-scored entries until occupancy is at or below the
    /// hysteresis target. Ties evict the oldest creation first. Returns
    /// the evicted keys and the bytes they freed.
    pub async fn evict(&self, scores: &HashMap<ContentHash, f64>) -> (Vec<ContentHash>, u64) {
        let target = (self.budget_bytes as f64 * self.hysteresis) as u64;
        let (evicted, freed) = {
            let mut state = self.state.write().await;
            if state.total_bytes <= self.budget_bytes {
                return (Vec::new(), 0);
            }
            let mut ranked: Vec<(ContentHash, f64, DateTime<Utc>, u64)> = state
                .entries
                .iter()
                .map(|(key, meta)| {
                    (
                        key.clone(),
                        scores.get(key).copied().unwrap_or(0.0),
                        meta.created_at,
                        meta.size_bytes,
                    )
                })
                .collect();
            ranked.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.2.cmp(&b.2))
            });
            let mut evicted = Vec::new();
            let mut freed = 0u64;
            for (key, _, _, size) in ranked {
                if state.total_bytes <= target {
                    break;
                }
                state.entries.remove(&key);
                state.total_bytes = state.total_bytes.saturating_sub(size);
                freed += size;
                evicted.push(key);
            }
            if !evicted.is_empty() {
                state.dirty = true;
            }
            (evicted, freed)
        };

        for key in &evicted {
            self.delete_payload(key).await;
        }
        if !evicted.is_empty() {
            if let Err(error) = self.flush().await {
                tracing::warn!(%error, "index flush after eviction failed");
            }
        }
        (evicted, freed)
    }

    /// Remove an entry and its payload file. Returns whether the key
    /// was present; removing an absent key is a no-op.
    pub async fn remove(&self, key: &ContentHash) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            match state.entries.remove(key) {
                Some(meta) => {
                    state.total_bytes = state.total_bytes.saturating_sub(meta.size_bytes);
                    state.dirty = true;
                    true
                }
                None => false,
            }
        };
        if removed {
            self.delete_payload(key).await;
            if let Err(error) = self.flush().await {
                tracing::warn!(%error, "index flush after remove failed");
            }
        }
        removed
    }

    /// Remove every expired entry, returning their keys.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<ContentHash> {
        let expired = {
            let mut state = self.state.write().await;
            let keys: Vec<ContentHash> = state
                .entries
                .iter()
                .filter(|(_, meta)| now >= meta.expires_at)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                if let Some(meta) = state.entries.remove(key) {
                    state.total_bytes = state.total_bytes.saturating_sub(meta.size_bytes);
                }
            }
            if !keys.is_empty() {
                state.dirty = true;
            }
            keys
        };
        for key in &expired {
            self.delete_payload(key).await;
        }
        if !expired.is_empty() {
            if let Err(error) = self.flush().await {
                tracing::warn!(%error, "index flush after sweep failed");
            }
        }
        expired
    }

    /// Drop every entry and payload file.
    pub async fn clear(&self) {
        let keys: Vec<ContentHash> = {
            let mut state = self.state.write().await;
            let keys = state.entries.keys().cloned().collect();
            state.entries.clear();
            state.total_bytes = 0;
            state.dirty = true;
            keys
        };
        for key in &keys {
            self.delete_payload(key).await;
        }
        if let Err(error) = self.flush().await {
            tracing::warn!(%error, "index flush after clear failed");
        }
    }

    /// Whether a live entry exists for `key`.
    pub async fn contains(&self, key: &ContentHash, now: DateTime<Utc>) -> bool {
        self.state
            .read()
            .await
            .entries
            .get(key)
            .is_some_and(|meta| now < meta.expires_at)
    }

    /// All indexed keys.
    pub async fn keys(&self) -> Vec<ContentHash> {
        self.state.read().await.entries.keys().cloned().collect()
    }

    /// All indexed keys with their metadata.
    pub async fn index_snapshot(&self) -> Vec<(ContentHash, DiskIndexEntry)> {
        self.state
            .read()
            .await
            .entries
            .iter()
            .map(|(key, meta)| (key.clone(), meta.clone()))
            .collect()
    }

    /// Current occupancy as `(entries, bytes)`.
    pub async fn usage(&self) -> (u64, u64) {
        let state = self.state.read().await;
        (state.entries.len() as u64, state.total_bytes)
    }

    /// Persist the index side-file if it has unsaved changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Serialization`] when the index
    /// cannot be written.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.state.write().await;
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            PersistedIndex {
                version: INDEX_VERSION,
                entries: state.entries.clone(),
            }
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::serialization(e.to_string()))?;
        write_atomic(&self.root.join(INDEX_FILE), json.as_bytes()).await
    }

    fn entry_path(&self, key: &ContentHash) -> PathBuf {
        self.root.join(format!("{}.{ENTRY_SUFFIX}", key.as_hex()))
    }

    /// Drop an index row without touching the payload file.
    async fn forget(&self, key: &ContentHash) {
        {
            let mut state = self.state.write().await;
            if let Some(meta) = state.entries.remove(key) {
                state.total_bytes = state.total_bytes.saturating_sub(meta.size_bytes);
                state.dirty = true;
            }
        }
        if let Err(error) = self.flush().await {
            tracing::warn!(%error, "index flush after repair failed");
        }
    }

    async fn delete_payload(&self, key: &ContentHash) {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "payload deletion failed");
            }
        }
    }

    fn load_index(path: &Path) -> Result<BTreeMap<ContentHash, DiskIndexEntry>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        let parsed: PersistedIndex = serde_json::from_str(&content)
            .map_err(|e| Error::corrupt_index(path, e.to_string()))?;
        if parsed.version != INDEX_VERSION {
            return Err(Error::corrupt_index(
                path,
                format!("unsupported index version {}", parsed.version),
            ));
        }
        Ok(parsed.entries)
    }

    /// Make the index and the directory contents agree: drop index rows
    /// whose payload file is gone, delete files the index does not
    /// describe (including leftover temporaries).
    fn reconcile(root: &Path, entries: &mut BTreeMap<ContentHash, DiskIndexEntry>) {
        entries.retain(|key, _| {
            let present = root
                .join(format!("{}.{ENTRY_SUFFIX}", key.as_hex()))
                .is_file();
            if !present {
                tracing::warn!(key = %key, "indexed entry has no payload file, dropping");
            }
            present
        });
        match std::fs::read_dir(root) {
            Ok(dir) => {
                for dirent in dir.flatten() {
                    let path = dirent.path();
                    if !path.is_file() {
                        continue;
                    }
                    if path.file_name().is_some_and(|name| name == INDEX_FILE) {
                        continue;
                    }
                    let described = path.extension().is_some_and(|ext| ext == ENTRY_SUFFIX)
                        && path
                            .file_stem()
                            .and_then(|stem| stem.to_str())
                            .and_then(ContentHash::from_hex)
                            .is_some_and(|hash| entries.contains_key(&hash));
                    if !described {
                        tracing::debug!(path = %path.display(), "removing stray cache file");
                        let _ = std::fs::remove_file(&path);
                    }
                }
            }
            Err(error) => tracing::warn!(%error, "cache directory scan failed"),
        }
    }
}

/// Unique temporary sibling of `path`.
fn temp_path(path: &Path) -> PathBuf {
    path.with_extension(format!("tmp{}", Uuid::new_v4().simple()))
}

/// Write bytes and sync them to a file.
async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::io(e, path, "create"))?;
    file.write_all(bytes)
        .await
        .map_err(|e| Error::io(e, path, "write"))?;
    file.sync_all()
        .await
        .map_err(|e| Error::io(e, path, "sync"))?;
    Ok(())
}

/// Write bytes to a unique temporary file, then rename into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    write_file(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::io(e, path, "rename"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn key(label: &str) -> ContentHash {
        ContentHash::from_data(label.as_bytes())
    }

    fn stamps(ttl_secs: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now, now + chrono::Duration::seconds(ttl_secs))
    }

    fn open_tier(dir: &TempDir, budget: u64) -> DiskTier {
        DiskTier::open(dir.path(), budget, 0.75, 4096).unwrap()
    }

    /// Deterministic noise that zstd cannot shrink.
    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                (state >> 56) as u8
            })
            .collect()
    }

    // ===== round trip tests =====

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let (created, expires) = stamps(60);

        let result = tier
            .set(key("a"), Bytes::from_static(b"payload"), created, expires, 1)
            .await
            .unwrap();
        assert!(!result.compressed);
        assert!(!result.over_budget);
        assert!(result.installed);
        assert_eq!(result.stored_bytes, 7);

        match tier.get(&key("a"), Utc::now()).await {
            TierLookup::Hit(entry) => {
                assert_eq!(entry.payload.as_ref(), b"payload");
                assert!(!entry.compressed);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(tier.usage().await, (1, 7));
    }

    #[tokio::test]
    async fn test_compression_applied_above_threshold() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let (created, expires) = stamps(60);
        let payload = vec![0u8; 10_000];

        let result = tier
            .set(key("zeros"), Bytes::from(payload.clone()), created, expires, 1)
            .await
            .unwrap();
        assert!(result.compressed);
        assert!(result.stored_bytes < 10_000);

        match tier.get(&key("zeros"), Utc::now()).await {
            TierLookup::Hit(entry) => assert_eq!(entry.payload.as_ref(), payload.as_slice()),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_incompressible_payload_stays_raw() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let (created, expires) = stamps(60);
        let payload = noise(8192);

        let result = tier
            .set(key("noise"), Bytes::from(payload.clone()), created, expires, 1)
            .await
            .unwrap();
        assert!(!result.compressed);
        assert_eq!(result.stored_bytes, 8192);

        match tier.get(&key("noise"), Utc::now()).await {
            TierLookup::Hit(entry) => assert_eq!(entry.payload.as_ref(), payload.as_slice()),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    // ===== write ordering tests =====

    #[tokio::test]
    async fn test_newer_version_replaces_older_payload() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let (created, expires) = stamps(60);

        tier.set(key("a"), Bytes::from_static(b"v1"), created, expires, 1)
            .await
            .unwrap();
        tier.set(key("a"), Bytes::from_static(b"v2-longer"), created, expires, 2)
            .await
            .unwrap();

        match tier.get(&key("a"), Utc::now()).await {
            TierLookup::Hit(entry) => assert_eq!(entry.payload.as_ref(), b"v2-longer"),
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(tier.usage().await, (1, 9));
    }

    #[tokio::test]
    async fn test_stale_version_never_shadows_newer_payload() {
        // a slow older write finishing after a newer one must not land
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let (created, expires) = stamps(60);

        tier.set(key("a"), Bytes::from_static(b"newer"), created, expires, 2)
            .await
            .unwrap();
        let stale = tier
            .set(
                key("a"),
                Bytes::from_static(b"stale-and-longer"),
                created,
                expires,
                1,
            )
            .await
            .unwrap();
        assert!(!stale.installed);
        assert_eq!(stale.stored_bytes, 0);

        // payload, index metadata, and byte accounting all still
        // describe the newer write
        match tier.get(&key("a"), Utc::now()).await {
            TierLookup::Hit(entry) => assert_eq!(entry.payload.as_ref(), b"newer"),
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(tier.usage().await, (1, 5));

        // the discarded payload left no file behind: index + one entry
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
    }

    // ===== removal and expiry tests =====

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let (created, expires) = stamps(60);
        tier.set(key("a"), Bytes::from_static(b"x"), created, expires, 1)
            .await
            .unwrap();

        assert!(tier.remove(&key("a")).await);
        assert!(!tier.remove(&key("a")).await);
        assert!(matches!(
            tier.get(&key("a"), Utc::now()).await,
            TierLookup::Miss
        ));
    }

    #[tokio::test]
    async fn test_expired_entry_removed_on_get() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let created = Utc::now() - chrono::Duration::seconds(100);
        let expires = created + chrono::Duration::seconds(10);
        tier.set(key("stale"), Bytes::from_static(b"x"), created, expires, 1)
            .await
            .unwrap();

        assert!(matches!(
            tier.get(&key("stale"), Utc::now()).await,
            TierLookup::ExpiredMiss
        ));
        // entry and file are both gone
        assert!(matches!(
            tier.get(&key("stale"), Utc::now()).await,
            TierLookup::Miss
        ));
        let path = dir.path().join(format!("{}.bin", key("stale").as_hex()));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_payload_file_repairs_index() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let (created, expires) = stamps(60);
        tier.set(key("a"), Bytes::from_static(b"x"), created, expires, 1)
            .await
            .unwrap();

        let path = dir.path().join(format!("{}.bin", key("a").as_hex()));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            tier.get(&key("a"), Utc::now()).await,
            TierLookup::Miss
        ));
        assert!(!tier.contains(&key("a"), Utc::now()).await);
        assert_eq!(tier.usage().await, (0, 0));
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_only_expired() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1 << 20);
        let now = Utc::now();
        tier.set(
            key("old"),
            Bytes::from_static(b"x"),
            now - chrono::Duration::seconds(100),
            now - chrono::Duration::seconds(50),
            1,
        )
        .await
        .unwrap();
        tier.set(
            key("live"),
            Bytes::from_static(b"y"),
            now,
            now + chrono::Duration::seconds(100),
            2,
        )
        .await
        .unwrap();

        let swept = tier.sweep_expired(now).await;
        assert_eq!(swept, vec![key("old")]);
        assert!(tier.contains(&key("live"), now).await);
        assert_eq!(tier.usage().await, (1, 1));
    }

    // ===== persistence tests =====

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (created, expires) = stamps(600);
        {
            let tier = open_tier(&dir, 1 << 20);
            tier.set(key("a"), Bytes::from_static(b"first"), created, expires, 1)
                .await
                .unwrap();
            tier.set(key("b"), Bytes::from_static(b"second"), created, expires, 2)
                .await
                .unwrap();
        }

        let reopened = open_tier(&dir, 1 << 20);
        assert_eq!(reopened.usage().await, (2, 11));
        match reopened.get(&key("b"), Utc::now()).await {
            TierLookup::Hit(entry) => assert_eq!(entry.payload.as_ref(), b"second"),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_corrupt_index_starts_cold_and_cleans_strays() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.json"), b"{ not json").unwrap();
        let stray = dir.path().join(format!("{}.bin", key("ghost").as_hex()));
        std::fs::write(&stray, b"orphan").unwrap();

        let tier = open_tier(&dir, 1 << 20);
        assert_eq!(tier.usage().await, (0, 0));
        assert!(!stray.exists());
    }

    #[tokio::test]
    async fn test_version_mismatch_starts_cold() {
        let dir = TempDir::new().unwrap();
        let index = serde_json::json!({ "version": 99, "entries": {} });
        std::fs::write(
            dir.path().join("index.json"),
            serde_json::to_string(&index).unwrap(),
        )
        .unwrap();

        let tier = open_tier(&dir, 1 << 20);
        assert_eq!(tier.usage().await, (0, 0));
    }

    #[tokio::test]
    async fn test_reopen_drops_dangling_index_rows() {
        let dir = TempDir::new().unwrap();
        let (created, expires) = stamps(600);
        {
            let tier = open_tier(&dir, 1 << 20);
            tier.set(key("a"), Bytes::from_static(b"x"), created, expires, 1)
                .await
                .unwrap();
        }
        std::fs::remove_file(dir.path().join(format!("{}.bin", key("a").as_hex()))).unwrap();

        let reopened = open_tier(&dir, 1 << 20);
        assert_eq!(reopened.usage().await, (0, 0));
        assert!(matches!(
            reopened.get(&key("a"), Utc::now()).await,
            TierLookup::Miss
        ));
    }

    // ===== capacity tests =====

    #[tokio::test]
    async fn test_eviction_order_and_target() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1000);
        let now = Utc::now();
        for (i, label) in ["k1", "k2", "k3"].iter().enumerate() {
            let created = now + chrono::Duration::seconds(i as i64);
            let result = tier
                .set(
                    key(label),
                    Bytes::from(vec![b'x'; 400]),
                    created,
                    created + chrono::Duration::seconds(600),
                    i as u64 + 1,
                )
                .await
                .unwrap();
            if *label == "k3" {
                assert!(result.over_budget);
            }
        }

        let scores: HashMap<ContentHash, f64> =
            [(key("k1"), 0.1), (key("k2"), 5.0), (key("k3"), 3.0)]
                .into_iter()
                .collect();
        let (evicted, freed) = tier.evict(&scores).await;
        // lowest score first, drained to 75% of budget
        assert_eq!(evicted, vec![key("k1"), key("k3")]);
        assert_eq!(freed, 800);
        let (entries, bytes) = tier.usage().await;
        assert_eq!(entries, 1);
        assert!(bytes <= 750);
        assert!(tier.contains(&key("k2"), Utc::now()).await);
        assert!(!dir
            .path()
            .join(format!("{}.bin", key("k3").as_hex()))
            .exists());
    }

    #[tokio::test]
    async fn test_eviction_tie_breaks_on_creation_time() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1000);
        let now = Utc::now();
        for (i, label) in ["older", "newer"].iter().enumerate() {
            let created = now + chrono::Duration::seconds(i as i64 * 10);
            tier.set(
                key(label),
                Bytes::from(vec![b'x'; 600]),
                created,
                created + chrono::Duration::seconds(600),
                i as u64 + 1,
            )
            .await
            .unwrap();
        }

        let (evicted, _) = tier.evict(&HashMap::new()).await;
        assert_eq!(evicted[0], key("older"));
    }

    #[tokio::test]
    async fn test_evict_noop_when_under_budget() {
        let dir = TempDir::new().unwrap();
        let tier = open_tier(&dir, 1000);
        let (created, expires) = stamps(600);
        tier.set(key("a"), Bytes::from_static(b"tiny"), created, expires, 1)
            .await
            .unwrap();

        let (evicted, freed) = tier.evict(&HashMap::new()).await;
        assert!(evicted.is_empty());
        assert_eq!(freed, 0);
    }

    #[tokio::test]
    async fn test_clear_persists_emptiness() {
        let dir = TempDir::new().unwrap();
        let (created, expires) = stamps(600);
        {
            let tier = open_tier(&dir, 1 << 20);
            tier.set(key("a"), Bytes::from_static(b"x"), created, expires, 1)
                .await
                .unwrap();
            tier.clear().await;
            assert_eq!(tier.usage().await, (0, 0));
        }
        let reopened = open_tier(&dir, 1 << 20);
        assert_eq!(reopened.usage().await, (0, 0));
    }
}
