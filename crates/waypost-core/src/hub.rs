//! Subscriber hub.
//!
//! Every subscriber owns a bounded mailbox. Broadcasting is a non-blocking
//! `try_send` into each mailbox: a full mailbox loses that one message, a
//! closed mailbox is unregistered. The registry lock is never held across
//! an await point.

use crate::message::Message;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Default number of pending messages per subscriber.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// A subscriber identifier, unique per hub.
pub type SubscriberId = u64;

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Mailboxes that accepted the message.
    pub delivered: usize,
    /// Mailboxes that were full; the message was dropped for them.
    pub dropped: usize,
    /// Subscribers removed because their mailbox was closed.
    pub evicted: usize,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HubStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Broadcasts issued since creation.
    pub broadcasts: u64,
    /// Deliveries dropped on full mailboxes since creation.
    pub dropped: u64,
    /// Subscribers evicted on closed mailboxes since creation.
    pub evicted: u64,
}

struct HubInner {
    subscribers: DashMap<SubscriberId, mpsc::Sender<Message>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
    broadcasts: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl HubInner {
    fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(
                subscriber = id,
                subscribers = self.subscribers.len(),
                "Unsubscribed"
            );
        }
        removed
    }
}

/// Registry of live subscriber mailboxes.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct SubscriberHub {
    inner: Arc<HubInner>,
}

impl SubscriberHub {
    /// Create a hub with the default mailbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    /// Create a hub whose mailboxes hold up to `capacity` pending messages.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                broadcasts: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
        }
    }

    /// Mailbox capacity for new subscribers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Register a new subscriber.
    ///
    /// After `close_all` the returned subscription is already closed and
    /// yields nothing.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.capacity);

        if self.inner.closed.load(Ordering::Acquire) {
            debug!(subscriber = id, "Subscribe after hub shutdown");
        } else {
            self.inner.subscribers.insert(id, sender);
            debug!(
                subscriber = id,
                subscribers = self.inner.subscribers.len(),
                "Subscribed"
            );
        }

        Subscription {
            id,
            receiver,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber.
    ///
    /// Idempotent: returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    /// Check if a subscriber is registered.
    #[must_use]
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.contains_key(&id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Deliver `message` to every registered mailbox without waiting.
    pub fn broadcast(&self, message: Message) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();

        for entry in self.inner.subscribers.iter() {
            match entry.value().try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(subscriber = *entry.key(), message = message.id, "Mailbox full, dropped");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => dead.push(*entry.key()),
            }
        }

        // Removal takes shard write locks, so it must wait until iteration ends.
        for id in dead {
            if self.inner.subscribers.remove(&id).is_some() {
                warn!(subscriber = id, "Evicted subscriber with closed mailbox");
                report.evicted += 1;
            }
        }

        self.inner.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.inner
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.inner
            .evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);

        trace!(
            message = message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "Broadcast"
        );
        report
    }

    /// Unregister every subscriber and refuse new ones.
    ///
    /// Pending messages stay readable; each subscription then sees its
    /// mailbox close.
    pub fn close_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let count = self.inner.subscribers.len();
        self.inner.subscribers.clear();
        debug!(subscribers = count, "Closed all subscribers");
    }

    /// Check if `close_all` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.inner.subscribers.len(),
            broadcasts: self.inner.broadcasts.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            evicted: self.inner.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one subscriber's mailbox.
///
/// Dropping the handle unregisters it from the hub.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Message>,
    hub: Weak<HubInner>,
}

impl Subscription {
    /// This subscriber's identifier.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the hub has dropped this mailbox and it is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Take a pending message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Unregister from the hub and drop the mailbox.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}
