//! Background maintenance: TTL sweeps, pattern pruning, and periodic
//! similarity index rebuilds.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dejavu_events::{CacheEventKind, EventSender};
use dejavu_hash::ContentHash;

use crate::access::AccessLog;
use crate::similarity::SimilarityIndex;
use crate::stats::StatsRecorder;
use crate::tier::disk::DiskTier;
use crate::tier::memory::MemoryTier;

/// Handle to the periodic maintenance worker.
///
/// Dropping the handle does not stop the worker; call
/// [`shutdown`](Self::shutdown) (or [`cancel`](Self::cancel)) to end it.
#[derive(Debug)]
pub struct MaintenanceHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { token, task }
    }

    /// Request cancellation without waiting for the worker to stop.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the worker and wait for any in-flight pass to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(error) = self.task.await {
            if !error.is_cancelled() {
                tracing::warn!(%error, "maintenance task ended abnormally");
            }
        }
    }
}

/// Everything a maintenance pass needs, cloned out of the orchestrator.
pub(crate) struct MaintenanceContext {
    pub(crate) memory: Arc<RwLock<MemoryTier>>,
    pub(crate) disk: Arc<DiskTier>,
    pub(crate) similarity: Arc<RwLock<SimilarityIndex>>,
    pub(crate) access: Arc<RwLock<AccessLog>>,
    pub(crate) stats: Arc<StatsRecorder>,
    pub(crate) events: Option<EventSender>,
    pub(crate) interval: Duration,
    pub(crate) rebuild_every: u32,
    pub(crate) threshold: f64,
}

/// Worker loop. Sweeps every tick, rebuilds the similarity index every
/// `rebuild_every` ticks, and stops promptly on cancellation.
pub(crate) async fn run(ctx: MaintenanceContext, token: CancellationToken) {
    let start = tokio::time::Instant::now() + ctx.interval;
    let mut ticker = tokio::time::interval_at(start, ctx.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                tick += 1;
                ctx.sweep(&token).await;
                if token.is_cancelled() {
                    break;
                }
                if tick % u64::from(ctx.rebuild_every) == 0 {
                    ctx.rebuild_index(&token).await;
                }
                ctx.publish_statistics().await;
            }
        }
    }
    tracing::debug!("maintenance worker stopped");
}

impl MaintenanceContext {
    /// Remove expired entries from both tiers and cascade the removals
    /// into the similarity index and access log.
    async fn sweep(&self, token: &CancellationToken) {
        let started = std::time::Instant::now();
        let now = Utc::now();

        let mut expired: HashSet<ContentHash> = {
            let mut memory = self.memory.write().await;
            memory.sweep_expired(now).into_iter().collect()
        };
        if token.is_cancelled() {
            return;
        }
        expired.extend(self.disk.sweep_expired(now).await);

        // a key swept from one tier may still be live in the other
        let mut gone = Vec::new();
        for key in &expired {
            let in_memory = { self.memory.read().await.contains(key, now) };
            if in_memory || self.disk.contains(key, now).await {
                continue;
            }
            gone.push(key.clone());
        }
        if !gone.is_empty() {
            {
                let mut similarity = self.similarity.write().await;
                for key in &gone {
                    similarity.remove(key);
                }
            }
            let mut access = self.access.write().await;
            for key in &gone {
                access.remove(key);
            }
        }

        self.prune_patterns(now).await;

        if !expired.is_empty() {
            self.stats.record_expirations(expired.len() as u64);
            self.emit(CacheEventKind::Expired {
                keys: expired.iter().map(|k| k.as_hex().to_string()).collect(),
            });
            tracing::debug!(expired = expired.len(), "ttl sweep removed entries");
        }
        self.emit(CacheEventKind::SweepCompleted {
            expired: expired.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Drop access patterns for keys no longer resident in either tier.
    async fn prune_patterns(&self, now: chrono::DateTime<Utc>) {
        let tracked = { self.access.read().await.keys() };
        let mut dead = Vec::new();
        for key in tracked {
            let in_memory = { self.memory.read().await.contains(&key, now) };
            if in_memory || self.disk.contains(&key, now).await {
                continue;
            }
            dead.push(key);
        }
        if !dead.is_empty() {
            let mut access = self.access.write().await;
            for key in &dead {
                access.remove(key);
            }
        }
    }

    /// Recompute the similarity graph from resident nodes.
    ///
    /// The pairwise pass runs on a snapshot without holding any lock,
    /// checking for cancellation between rows. An aborted rebuild
    /// leaves the previous graph untouched; the new graph is installed
    /// in one swap at the end.
    async fn rebuild_index(&self, token: &CancellationToken) {
        let started = std::time::Instant::now();
        let snapshot = { self.similarity.read().await.snapshot() };
        if snapshot.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut live = Vec::with_capacity(snapshot.len());
        for (hash, signature) in snapshot {
            if token.is_cancelled() {
                return;
            }
            let in_memory = { self.memory.read().await.contains(&hash, now) };
            if in_memory || self.disk.contains(&hash, now).await {
                live.push((hash, signature));
            }
        }

        let mut edges = Vec::new();
        for (i, (hash_a, sig_a)) in live.iter().enumerate() {
            if token.is_cancelled() {
                return;
            }
            for (hash_b, sig_b) in &live[i + 1..] {
                if sig_a.similarity(sig_b) >= self.threshold {
                    edges.push((hash_a.clone(), hash_b.clone()));
                }
            }
        }

        let (nodes, edge_count) = {
            let mut similarity = self.similarity.write().await;
            similarity.rebuild(live, edges);
            (similarity.node_count(), similarity.edge_count())
        };
        self.emit(CacheEventKind::IndexRebuilt {
            nodes,
            edges: edge_count,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        tracing::debug!(nodes, edges = edge_count, "similarity index rebuilt");
    }

    async fn publish_statistics(&self) {
        let (memory_entries, memory_bytes) = {
            let memory = self.memory.read().await;
            (memory.entry_count() as u64, memory.total_bytes())
        };
        let (disk_entries, disk_bytes) = self.disk.usage().await;
        let snapshot = self
            .stats
            .snapshot(memory_entries, memory_bytes, disk_entries, disk_bytes);
        self.emit(CacheEventKind::Statistics(snapshot));
    }

    fn emit(&self, kind: CacheEventKind) {
        if let Some(sender) = &self.events {
            sender.emit(kind).ok();
        }
    }
}
