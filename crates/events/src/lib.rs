//! Structured event stream for the dejavu cache.
//!
//! This crate provides the typed event schema and a broadcast-capable bus so
//! that multiple consumers (loggers, dashboards, tests) can observe a single
//! cache instance concurrently. The cache publishes every observable
//! transition - hits, misses, stores, promotions, evictions, expiries, and
//! periodic statistics snapshots - as a [`CacheEvent`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use dejavu_events::{CacheEvent, CacheEventKind, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let sender = bus.sender().expect("bus is open");
//! let mut receiver = bus.subscribe();
//!
//! sender.emit(CacheEventKind::Cleared).ok();
//!
//! if let Some(event) = receiver.recv().await {
//!     println!("{}", event.kind.name());
//! }
//! # }
//! ```

pub mod bus;
pub mod event;

// Re-exports for convenience
pub use bus::{DEFAULT_BROADCAST_CAPACITY, EventBus, EventReceiver, EventSender, SendError};
pub use event::{CacheEvent, CacheEventKind, CacheStatistics, MatchKind, TierKind};
