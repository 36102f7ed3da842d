//! End-to-end tests for the tiered recognition cache.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use dejavu_core::{
    CacheConfig, CacheEventKind, CancellationToken, ConfidenceScored, FixedTtl, Frame, MatchKind,
    PixelFormat, RecognitionCache, TierKind,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Recognition {
    label: String,
    confidence: f32,
}

impl ConfidenceScored for Recognition {
    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn set_confidence(&mut self, confidence: f32) {
        self.confidence = confidence;
    }
}

fn recognition(label: &str, confidence: f32) -> Recognition {
    Recognition {
        label: label.to_string(),
        confidence,
    }
}

fn test_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        disk_root: Some(dir.path().to_path_buf()),
        ..CacheConfig::default()
    }
}

fn solid_frame(rgba: [u8; 4]) -> Frame {
    let data: Vec<u8> = rgba.iter().copied().cycle().take(100 * 100 * 4).collect();
    Frame::new(100, 100, PixelFormat::Rgba8, data)
}

fn red_frame() -> Frame {
    solid_frame([255, 0, 0, 255])
}

/// A red frame with a barely dimmed 3x3 block in the middle: different
/// content hash, same perceptual signature.
fn nearly_red_frame() -> Frame {
    let mut data: Vec<u8> = [255, 0, 0, 255]
        .iter()
        .copied()
        .cycle()
        .take(100 * 100 * 4)
        .collect();
    for y in 48..51 {
        for x in 48..51 {
            data[(y * 100 + x) * 4] = 215;
        }
    }
    Frame::new(100, 100, PixelFormat::Rgba8, data)
}

/// Opt-in trace output for debugging, driven by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Disk writes are asynchronous; poll until they land.
async fn wait_for_disk_entries(cache: &RecognitionCache<Recognition>, want: u64) {
    for _ in 0..300 {
        if cache.statistics().await.disk_entries >= want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("disk tier never reached {want} entries");
}

// ===== exact match tests =====

#[tokio::test]
async fn test_exact_hit_served_from_memory() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let frame = red_frame();

    cache.set(&frame, &recognition("mug", 0.97), None).await;
    let hit = cache.get(&frame).await.expect("exact hit");

    assert_eq!(hit.kind, MatchKind::Exact);
    assert_eq!(hit.tier, TierKind::Memory);
    assert_eq!(hit.similarity, None);
    assert_eq!(hit.value.label, "mug");

    let stats = cache.statistics().await;
    assert_eq!(stats.stores, 1);
    assert_eq!(stats.memory_hits, 1);
    assert_eq!(stats.memory_entries, 1);
}

#[tokio::test]
async fn test_miss_on_unknown_frame() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();

    assert!(cache.get(&red_frame()).await.is_none());
    assert!(!cache.contains(&red_frame()).await);

    let stats = cache.statistics().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate(), 0.0);
}

#[tokio::test]
async fn test_statistics_partition_hits_and_misses() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let known = red_frame();

    cache.set(&known, &recognition("mug", 0.9), None).await;
    for _ in 0..3 {
        assert!(cache.get(&known).await.is_some());
    }
    // a solid blue frame is perceptually far from red: a true miss
    assert!(cache.get(&solid_frame([0, 0, 255, 255])).await.is_none());

    let stats = cache.statistics().await;
    assert_eq!(stats.memory_hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_requests(), 4);
    assert!((stats.hit_rate() - 0.75).abs() < 1e-9);
}

// ===== similarity tests =====

#[tokio::test]
async fn test_similarity_hit_rescales_confidence() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();

    cache.set(&red_frame(), &recognition("mug", 0.9), None).await;

    let hit = cache
        .get(&nearly_red_frame())
        .await
        .expect("similarity hit");
    assert_eq!(hit.kind, MatchKind::Similar);
    let similarity = hit.similarity.expect("measured similarity");
    assert!(similarity >= 0.8, "similarity {similarity} below threshold");
    assert_eq!(hit.value.label, "mug");
    let expected = 0.9 * similarity as f32;
    assert!(
        (hit.value.confidence - expected).abs() < 1e-3,
        "confidence {} not rescaled to {expected}",
        hit.value.confidence
    );

    let stats = cache.statistics().await;
    assert_eq!(stats.similarity_hits, 1);

    // the similar probe was re-cached under its own hash
    let second = cache.get(&nearly_red_frame()).await.expect("exact hit");
    assert_eq!(second.kind, MatchKind::Exact);
    assert!((second.value.confidence - hit.value.confidence).abs() < 1e-3);
}

#[tokio::test]
async fn test_distant_frames_do_not_match() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();

    cache.set(&red_frame(), &recognition("mug", 0.9), None).await;
    assert!(cache.get(&solid_frame([0, 0, 255, 255])).await.is_none());
}

// ===== disk tier tests =====

#[tokio::test]
async fn test_disk_promotion_after_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let frame = red_frame();
    {
        let cache: RecognitionCache<Recognition> =
            RecognitionCache::new(test_config(&dir)).unwrap();
        cache.set(&frame, &recognition("mug", 0.97), None).await;
        wait_for_disk_entries(&cache, 1).await;
        cache.shutdown().await.unwrap();
    }

    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let hit = cache.get(&frame).await.expect("disk hit");
    assert_eq!(hit.kind, MatchKind::Exact);
    assert_eq!(hit.tier, TierKind::Disk);
    assert_eq!(hit.value.label, "mug");

    // the disk hit promoted the entry into memory
    let second = cache.get(&frame).await.expect("memory hit");
    assert_eq!(second.tier, TierKind::Memory);

    let stats = cache.statistics().await;
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.memory_hits, 1);
    assert_eq!(stats.promotions, 1);
}

#[tokio::test]
async fn test_rewritten_frame_keeps_latest_value_on_disk() {
    let dir = TempDir::new().unwrap();
    let frame = red_frame();
    {
        let cache: RecognitionCache<Recognition> =
            RecognitionCache::new(test_config(&dir)).unwrap();
        // a large first value followed immediately by a small rewrite;
        // the two background disk writes race
        let big = format!("first-{}", "x".repeat(500));
        cache.set(&frame, &recognition(&big, 0.9), None).await;
        cache.set(&frame, &recognition("second", 0.95), None).await;

        let mut settled = false;
        for _ in 0..300 {
            let stats = cache.statistics().await;
            if stats.disk_entries == 1 && stats.disk_bytes < 200 {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "disk never settled on the rewritten payload");

        // a slow first write finishing late must not shadow the rewrite
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = cache.statistics().await;
        assert_eq!(stats.disk_entries, 1);
        assert!(
            stats.disk_bytes < 200,
            "older payload shadowed the rewrite ({} bytes on disk)",
            stats.disk_bytes
        );
        cache.shutdown().await.unwrap();
    }

    // after a restart only the disk copy exists; it must be the rewrite
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let hit = cache.get(&frame).await.expect("disk hit");
    assert_eq!(hit.value.label, "second");
}

#[tokio::test]
async fn test_preload_warms_memory_tier() {
    let dir = TempDir::new().unwrap();
    let frame = red_frame();
    {
        let cache: RecognitionCache<Recognition> =
            RecognitionCache::new(test_config(&dir)).unwrap();
        cache.set(&frame, &recognition("mug", 0.97), None).await;
        wait_for_disk_entries(&cache, 1).await;
        cache.shutdown().await.unwrap();
    }

    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    assert_eq!(cache.statistics().await.memory_entries, 0);

    let loaded = cache.preload(16, &CancellationToken::new()).await;
    assert_eq!(loaded, 1);
    assert_eq!(cache.statistics().await.memory_entries, 1);

    let hit = cache.get(&frame).await.expect("preloaded hit");
    assert_eq!(hit.tier, TierKind::Memory);
}

#[tokio::test]
async fn test_cancelled_preload_loads_nothing() {
    let dir = TempDir::new().unwrap();
    let frame = red_frame();
    {
        let cache: RecognitionCache<Recognition> =
            RecognitionCache::new(test_config(&dir)).unwrap();
        cache.set(&frame, &recognition("mug", 0.97), None).await;
        wait_for_disk_entries(&cache, 1).await;
        cache.shutdown().await.unwrap();
    }

    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(cache.preload(16, &token).await, 0);
    assert_eq!(cache.statistics().await.memory_entries, 0);
}

// ===== invalidation tests =====

#[tokio::test]
async fn test_remove_is_total_and_idempotent() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let frame = red_frame();

    cache.set(&frame, &recognition("mug", 0.9), None).await;
    wait_for_disk_entries(&cache, 1).await;

    cache.remove(&frame).await;
    assert!(cache.get(&frame).await.is_none());
    assert!(!cache.contains(&frame).await);
    let stats = cache.statistics().await;
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.disk_entries, 0);

    // removing again is a quiet no-op
    cache.remove(&frame).await;
}

#[tokio::test]
async fn test_removed_entry_no_longer_serves_similar_probes() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();

    cache.set(&red_frame(), &recognition("mug", 0.9), None).await;
    wait_for_disk_entries(&cache, 1).await;
    cache.remove(&red_frame()).await;

    // the similarity node went with the entry
    assert!(cache.get(&nearly_red_frame()).await.is_none());
}

#[tokio::test]
async fn test_clear_empties_everything() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let a = red_frame();
    let b = solid_frame([0, 0, 255, 255]);

    cache.set(&a, &recognition("mug", 0.9), None).await;
    cache.set(&b, &recognition("bowl", 0.8), None).await;
    wait_for_disk_entries(&cache, 2).await;

    cache.clear().await;

    let stats = cache.statistics().await;
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.disk_entries, 0);
    assert!(cache.get(&a).await.is_none());
    assert!(cache.get(&b).await.is_none());
}

// ===== expiry tests =====

#[tokio::test]
async fn test_ttl_expiry_removes_entry_everywhere() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir))
        .unwrap()
        .with_ttl_policy(Arc::new(FixedTtl));
    let frame = red_frame();

    cache
        .set(&frame, &recognition("mug", 0.9), Some(Duration::from_secs(1)))
        .await;
    assert!(cache.get(&frame).await.is_some());
    wait_for_disk_entries(&cache, 1).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(cache.get(&frame).await.is_none());
    assert!(!cache.contains(&frame).await);
    let stats = cache.statistics().await;
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.disk_entries, 0);
    assert!(stats.expirations >= 1);

    // the lazy removal also dropped the similarity node
    assert!(cache.get(&nearly_red_frame()).await.is_none());
}

#[tokio::test]
async fn test_maintenance_sweep_expires_entries() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        maintenance_interval_secs: 1,
        ..test_config(&dir)
    };
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(config)
        .unwrap()
        .with_ttl_policy(Arc::new(FixedTtl));
    let mut events = cache.subscribe();

    cache
        .set(
            &red_frame(),
            &recognition("mug", 0.9),
            Some(Duration::from_millis(100)),
        )
        .await;
    wait_for_disk_entries(&cache, 1).await;
    let handle = cache.start_maintenance();

    let mut swept = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(event)) => {
                if let CacheEventKind::Expired { keys } = &event.kind {
                    assert!(!keys.is_empty());
                    swept = true;
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(swept, "maintenance never reported an expiry sweep");

    let stats = cache.statistics().await;
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.disk_entries, 0);

    handle.shutdown().await;
}

// ===== capacity tests =====

#[tokio::test]
async fn test_memory_budget_is_never_exceeded() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        memory_budget_bytes: 2000,
        ..test_config(&dir)
    };
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(config).unwrap();

    for i in 0..20u8 {
        let frame = solid_frame([i, 64, 128, 255]);
        let label = format!("object-{i}-{}", "x".repeat(80));
        cache.set(&frame, &recognition(&label, 0.9), None).await;
        let stats = cache.statistics().await;
        assert!(
            stats.memory_bytes <= 2000,
            "memory occupancy {} exceeded the budget",
            stats.memory_bytes
        );
    }
    assert!(cache.statistics().await.evictions >= 1);
}

// ===== robustness tests =====

#[tokio::test]
async fn test_degraded_frame_never_caches_or_panics() {
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    // three bytes cannot be a 3x3 RGBA frame
    let broken = Frame::new(3, 3, PixelFormat::Rgba8, vec![1u8, 2, 3]);

    cache.set(&broken, &recognition("ghost", 0.9), None).await;
    assert!(cache.get(&broken).await.is_none());

    let stats = cache.statistics().await;
    assert_eq!(stats.stores, 0);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_event_stream_reports_stores_and_hits() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let cache: RecognitionCache<Recognition> = RecognitionCache::new(test_config(&dir)).unwrap();
    let mut events = cache.subscribe();
    assert_eq!(cache.subscriber_count(), 1);
    let frame = red_frame();

    cache.set(&frame, &recognition("mug", 0.9), None).await;
    assert!(cache.get(&frame).await.is_some());

    let mut saw_stored = false;
    let mut saw_hit = false;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(event)) => match &event.kind {
                CacheEventKind::Stored { tier, .. } => {
                    if *tier == TierKind::Memory {
                        saw_stored = true;
                    }
                }
                CacheEventKind::Hit { tier, kind, .. } => {
                    assert_eq!(*tier, TierKind::Memory);
                    assert_eq!(*kind, MatchKind::Exact);
                    saw_hit = true;
                }
                _ => {}
            },
            _ => break,
        }
        if saw_stored && saw_hit {
            break;
        }
    }
    assert!(saw_stored, "no memory store event observed");
    assert!(saw_hit, "no hit event observed");
}
