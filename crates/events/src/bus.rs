//! Fan-out channel between one cache and many observers.
//!
//! Publishing never blocks and never waits for subscribers: events land
//! in a fixed-size broadcast ring, and a subscriber that stops polling
//! loses the oldest entries first. The bus is cheap to construct, needs
//! no running executor, and closes with an explicit [`EventBus::shutdown`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::event::{CacheEvent, CacheEventKind};

/// Default size of the broadcast ring.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1000;

/// Error returned when publishing into a bus that was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The bus no longer accepts events.
    #[error("event bus is closed")]
    Closed,
}

/// State shared between the bus and every sender it handed out.
#[derive(Debug)]
struct Shared {
    ring: broadcast::Sender<CacheEvent>,
    open: AtomicBool,
}

/// Multi-subscriber event channel.
///
/// Senders obtained through [`EventBus::sender`] stay valid while the
/// bus is open, even across clones and task boundaries. Once
/// [`EventBus::shutdown`] runs, every sender starts failing and no new
/// ones are handed out; subscribers still drain whatever the ring holds.
#[derive(Debug)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create a bus with [`DEFAULT_BROADCAST_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a bus whose ring buffers `capacity` events per subscriber.
    ///
    /// A subscriber more than `capacity` events behind skips ahead and
    /// drops the overwritten ones; see [`EventReceiver::recv`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        // the broadcast channel rejects a zero capacity
        let (ring, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                ring,
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Handle for publishing events, or `None` once the bus is shut down.
    #[must_use]
    pub fn sender(&self) -> Option<EventSender> {
        self.shared.open.load(Ordering::Acquire).then(|| EventSender {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Attach a subscriber. It observes every event published from this
    /// point on; nothing already in the ring is replayed.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            inner: self.shared.ring.subscribe(),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.ring.receiver_count()
    }

    /// Stop accepting events. Idempotent. Outstanding senders fail from
    /// here on; subscribers keep draining already-buffered events.
    pub fn shutdown(&self) {
        self.shared.open.store(false, Ordering::Release);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable publishing handle for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    /// Publish an event. Having no subscribers is not an error; the
    /// event is simply dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] once the bus has shut down.
    pub fn send(&self, event: CacheEvent) -> Result<(), SendError> {
        if !self.shared.open.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        let _ = self.shared.ring.send(event);
        Ok(())
    }

    /// Stamp a kind with a fresh id and timestamp and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] once the bus has shut down.
    pub fn emit(&self, kind: CacheEventKind) -> Result<(), SendError> {
        self.send(CacheEvent::new(kind))
    }

    /// Whether the bus has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.shared.open.load(Ordering::Acquire)
    }
}

/// Subscriber half of an [`EventBus`].
#[derive(Debug)]
pub struct EventReceiver {
    inner: broadcast::Receiver<CacheEvent>,
}

impl EventReceiver {
    /// Wait for the next event. Returns `None` once the bus and all of
    /// its senders are gone and the ring is drained.
    ///
    /// A lagging subscriber loses the oldest buffered events; the gap is
    /// logged and reception continues with what is still available.
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagging, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting. Returns `None` when
    /// the ring is empty or the bus is gone.
    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagging, oldest events dropped");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}
