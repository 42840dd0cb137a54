//! Notification bus
//!
//! Delivers [`HubEvent`]s to observers without ever blocking the producer.
//!
//! # Delivery policy
//!
//! Each subscription owns a bounded mailbox. [`EventBus::publish`] pushes the
//! event into every mailbox whose kind filter matches, taking only that
//! mailbox's lock, and returns immediately. When a mailbox is full the
//! **oldest** queued event is dropped, a warning is logged and the
//! subscription's [`Subscription::dropped`] counter is incremented. Within one
//! mailbox events keep the order in which they were published.
//!
//! [`EventBus::observe`] runs a handler in its own task per observer, which is
//! the usual way for a presentation layer to consume events.

use crate::config::BusConfig;
use crate::event::{EventKind, EventKinds, HubEvent};
use crate::ids::SubscriptionId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Bus statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events passed to `publish`
    pub published: u64,
    /// Mailbox deliveries
    pub delivered: u64,
    /// Events dropped across all mailboxes
    pub dropped: u64,
    /// Live subscriptions
    pub subscribers: usize,
}

#[derive(Debug)]
struct Mailbox {
    id: SubscriptionId,
    kinds: EventKinds,
    capacity: usize,
    queue: Mutex<VecDeque<HubEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Mailbox {
    /// Returns `true` when an older event had to be dropped
    fn push(&self, event: HubEvent) -> bool {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(event);
            evicted
        };
        self.notify.notify_one();

        if let Some(old) = evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                subscription = %self.id,
                kind = %old.kind(),
                capacity = self.capacity,
                "subscriber mailbox full, dropped oldest event"
            );
            true
        } else {
            false
        }
    }

    fn pop(&self) -> Option<HubEvent> {
        self.queue.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct BusInner {
    capacity: usize,
    next_id: AtomicU64,
    mailboxes: DashMap<SubscriptionId, Arc<Mailbox>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        for entry in &self.mailboxes {
            entry.value().close();
        }
    }
}

/// Publish/subscribe hub shared by the pipeline and the chat sessions
///
/// Cheap to clone; clones share subscriptions.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose mailboxes hold at most `mailbox_capacity` events
    #[must_use]
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: mailbox_capacity.max(1),
                next_id: AtomicU64::new(1),
                mailboxes: DashMap::new(),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Create from configuration
    #[must_use]
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.mailbox_capacity)
    }

    /// Subscribe to one event kind
    #[must_use]
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.subscribe_many([kind])
    }

    /// Subscribe to several event kinds through one mailbox
    #[must_use]
    pub fn subscribe_many(&self, kinds: impl IntoIterator<Item = EventKind>) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mailbox = Arc::new(Mailbox {
            id,
            kinds: kinds.into_iter().collect(),
            capacity: self.inner.capacity,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.inner.mailboxes.insert(id, mailbox.clone());
        tracing::debug!(subscription = %id, "subscriber registered");

        Subscription {
            mailbox,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to every event kind
    #[must_use]
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe_many(EventKind::ALL)
    }

    /// Remove a subscription; its receiver drains what is queued, then ends
    ///
    /// Returns `false` for an unknown or already removed handle.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.mailboxes.remove(&id) {
            Some((_, mailbox)) => {
                mailbox.close();
                tracing::debug!(subscription = %id, "subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every matching subscriber without waiting
    ///
    /// Returns the number of mailboxes the event was placed in.
    pub fn publish(&self, event: HubEvent) -> usize {
        let kind = event.kind();
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<Arc<Mailbox>> = self
            .inner
            .mailboxes
            .iter()
            .filter(|entry| entry.value().kinds.contains(kind))
            .map(|entry| entry.value().clone())
            .collect();

        for mailbox in &targets {
            if mailbox.push(event.clone()) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.inner
            .delivered
            .fetch_add(targets.len() as u64, Ordering::Relaxed);
        tracing::debug!(%kind, subscribers = targets.len(), "event published");
        targets.len()
    }

    /// Number of live subscriptions
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.mailboxes.len()
    }

    /// Counters since creation
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    /// Spawn a task feeding every matching event to `handler`
    ///
    /// The task ends when the subscription is removed or the bus is dropped.
    /// Must be called from within a tokio runtime.
    pub fn observe<F>(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
        mut handler: F,
    ) -> (SubscriptionId, JoinHandle<()>)
    where
        F: FnMut(HubEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe_many(kinds);
        let id = subscription.id();
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event);
            }
        });
        (id, handle)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}

/// Receiving end of a subscription
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    mailbox: Arc<Mailbox>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Handle to pass to [`EventBus::unsubscribe`]
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.mailbox.id
    }

    /// Next event in publish order
    ///
    /// Returns `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        loop {
            if let Some(event) = self.mailbox.pop() {
                return Some(event);
            }
            if self.mailbox.is_closed() {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Next event if one is queued
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.mailbox.pop()
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<HubEvent> {
        self.mailbox.queue.lock().drain(..).collect()
    }

    /// Queued events
    #[must_use]
    pub fn len(&self) -> usize {
        self.mailbox.queue.lock().len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped from this mailbox because it was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    /// Whether the subscription was removed or the bus dropped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.mailboxes.remove(&self.mailbox.id);
        }
    }
}
