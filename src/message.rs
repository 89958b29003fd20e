//! Message types and the inbound delivery queue.
//!
//! Outbound traffic is modeled by [`OutboundMessage`]: topic, payload,
//! delivery mode and an optional expiry deadline. Inbound traffic reaches the
//! application through a bounded [`DeliveryQueue`] rather than a callback,
//! so a slow consumer never stalls code holding transport locks. The queue's
//! overflow behavior is configurable: block the receive loop (backpressure
//! propagates to the transport) or drop the oldest queued event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::trace;

use crate::config::{DeliveryConfig, OverflowPolicy};
use crate::error::ChannelError;

/// Reliability class of an outbound message.
///
/// Maps onto the transport's native QoS levels where available (MQTT QoS 0
/// and 1); transports without acknowledgements treat both identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Fire and forget; the message may be lost on a bad link.
    BestEffort,

    /// At-least-once; the transport retransmits until acknowledged.
    #[default]
    Guaranteed,
}

/// A message to publish on the channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Reliability class.
    pub mode: DeliveryMode,

    /// Optional expiry deadline. A message whose deadline has passed is
    /// rejected at publish time instead of being handed to the wire.
    pub expires_at: Option<Instant>,
}

impl OutboundMessage {
    /// Creates a guaranteed-delivery message with no expiry.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            mode: DeliveryMode::Guaranteed,
            expires_at: None,
        }
    }

    /// Sets the delivery mode.
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets an expiry deadline `ttl` from now.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(Instant::now() + ttl);
        self
    }

    /// Whether the expiry deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Remaining time to live, if a deadline is set.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// A message received from the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,

    /// Opaque payload bytes.
    pub payload: Bytes,
}

/// An event delivered to the application consumer.
#[derive(Debug)]
pub enum DeliveryEvent {
    /// An inbound message.
    Message(InboundMessage),

    /// A transport error the consumer may want to observe (the supervisor
    /// handles recovery on its own; this is informational).
    Error {
        /// Where the error occurred, e.g. `"receive loop"`.
        context: String,
        /// The underlying error.
        error: ChannelError,
    },
}

struct QueueShared {
    events: Mutex<VecDeque<DeliveryEvent>>,
    capacity: usize,
    overflow: OverflowPolicy,
    /// Signaled when an event is pushed or the queue is closed.
    readable: Notify,
    /// Signaled when an event is popped, unblocking a waiting producer.
    writable: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, VecDeque<DeliveryEvent>> {
        // Poisoning cannot leave the deque in a bad state; recover.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounded queue carrying inbound events from the receive loop to the
/// application consumer.
///
/// Clones share the same queue. The receive loop pushes, the application
/// calls [`DeliveryQueue::recv`] to drain. Capacity and overflow policy come
/// from [`DeliveryConfig`].
#[derive(Clone)]
pub struct DeliveryQueue {
    shared: Arc<QueueShared>,
}

impl DeliveryQueue {
    /// Creates a queue with the configured capacity and overflow policy.
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                events: Mutex::new(VecDeque::with_capacity(config.queue_capacity)),
                capacity: config.queue_capacity,
                overflow: config.overflow,
                readable: Notify::new(),
                writable: Notify::new(),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueues an event.
    ///
    /// With [`OverflowPolicy::Block`] this waits until the consumer makes
    /// room; with [`OverflowPolicy::DropOldest`] it discards the oldest
    /// queued event instead and returns immediately.
    pub async fn push(&self, mut event: DeliveryEvent) {
        loop {
            let writable = self.shared.writable.notified();
            match self.try_push(event) {
                Ok(()) => return,
                Err(rejected) => event = rejected,
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return;
            }
            writable.await;
        }
    }

    /// Attempts to enqueue without waiting.
    ///
    /// Under [`OverflowPolicy::Block`] a full queue hands the event back in
    /// `Err`; under [`OverflowPolicy::DropOldest`] this never fails.
    pub fn try_push(&self, event: DeliveryEvent) -> Result<(), DeliveryEvent> {
        let mut events = self.shared.lock();
        if events.len() >= self.shared.capacity {
            match self.shared.overflow {
                OverflowPolicy::Block => return Err(event),
                OverflowPolicy::DropOldest => {
                    events.pop_front();
                    let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!(dropped_total = total, "delivery queue full, dropped oldest event");
                }
            }
        }
        events.push_back(event);
        drop(events);
        self.shared.readable.notify_one();
        Ok(())
    }

    /// Receives the next event, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained, signaling the
    /// consumer to stop.
    pub async fn recv(&self) -> Option<DeliveryEvent> {
        loop {
            let readable = self.shared.readable.notified();
            {
                let mut events = self.shared.lock();
                if let Some(event) = events.pop_front() {
                    drop(events);
                    self.shared.writable.notify_one();
                    return Some(event);
                }
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            readable.await;
        }
    }

    /// Closes the queue. Queued events remain receivable; subsequent `recv`
    /// calls return `None` once drained.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events discarded under [`OverflowPolicy::DropOldest`].
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
