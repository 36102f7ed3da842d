//! Tiered recognition cache.
//!
//! This crate provides the cache orchestrator and its storage layers:
//!
//! - **Memory tier**: bounded in-process store with score-based eviction
//! - **Disk tier**: bounded persistent store with zstd compression and
//!   a crash-tolerant JSON index
//! - **Similarity index**: perceptual-hash graph that lets a lookup be
//!   served by a near-duplicate frame, with the confidence rescaled by
//!   the measured similarity
//! - **Maintenance**: cancellable background TTL sweeps and index rebuilds
//!
//! Keys are derived from frame content by `dejavu-hash`; observers
//! subscribe to the structured event stream from `dejavu-events`.
//!
//! # Example
//!
//! ```rust,no_run
//! use dejavu_core::{CacheConfig, ConfidenceScored, RecognitionCache};
//! use dejavu_hash::{Frame, PixelFormat};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Recognition {
//!     label: String,
//!     confidence: f32,
//! }
//!
//! impl ConfidenceScored for Recognition {
//!     fn confidence(&self) -> f32 {
//!         self.confidence
//!     }
//!     fn set_confidence(&mut self, confidence: f32) {
//!         self.confidence = confidence;
//!     }
//! }
//!
//! # async fn example() -> dejavu_core::Result<()> {
//! let cache: RecognitionCache<Recognition> = RecognitionCache::new(CacheConfig::default())?;
//! let frame = Frame::new(2, 2, PixelFormat::Rgba8, vec![0u8; 16]);
//!
//! cache
//!     .set(
//!         &frame,
//!         &Recognition {
//!             label: "mug".into(),
//!             confidence: 0.97,
//!         },
//!         None,
//!     )
//!     .await;
//!
//! if let Some(hit) = cache.get(&frame).await {
//!     tracing::info!(label = %hit.value.label, kind = ?hit.kind, "served");
//! }
//!
//! cache.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod access;
pub mod cache;
pub mod config;
mod entry;
mod error;
mod similarity;
mod stats;
mod tier;

pub use cache::{CacheHit, ConfidenceScored, MaintenanceHandle, RecognitionCache};
pub use config::{CacheConfig, ConfidenceWeightedTtl, FixedTtl, TtlPolicy};
pub use error::{Error, Result};

pub use dejavu_events::{
    CacheEvent, CacheEventKind, CacheStatistics, EventReceiver, MatchKind, TierKind,
};
pub use dejavu_hash::{ContentHash, Frame, FrameError, Orientation, PerceptualHash, PixelFormat};
pub use tokio_util::sync::CancellationToken;
