//! Alert Bus
//!
//! Broadcasts alerts to zero-or-more live subscribers. Publishes are
//! serialized so every subscriber observes the same order; a slow or dead
//! subscriber is closed and removed without blocking the rest.

use crate::sentry::Alert;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-send budget before a subscriber is considered dead.
pub const SUBSCRIBER_SEND_TIMEOUT: Duration = Duration::from_secs(1);

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Alert>,
}

/// Broadcast registry for alert consumers.
pub struct AlertBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl AlertBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Register a subscriber; the returned receiver yields alerts in
    /// publish order until the subscriber is closed.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Alert>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = SubscriberId(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        self.subscribers.lock().await.push(Subscriber { id, sender });
        debug!("Alert subscriber {:?} registered", id);
        (id, receiver)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().await.retain(|s| s.id != id);
        debug!("Alert subscriber {:?} unregistered", id);
    }

    /// Deliver an alert to every live subscriber. Sends that fail or
    /// exceed the per-send timeout drop the subscriber; this method never
    /// errors. Holding the registry lock for the whole publish serializes
    /// deliveries, so all subscribers see the same alert order.
    pub async fn publish(&self, alert: Alert) {
        let mut subscribers = self.subscribers.lock().await;
        let mut dead: Vec<SubscriberId> = Vec::new();

        for subscriber in subscribers.iter() {
            let send = subscriber.sender.send(alert.clone());
            match tokio::time::timeout(SUBSCRIBER_SEND_TIMEOUT, send).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    debug!("Alert subscriber {:?} closed; removing", subscriber.id);
                    dead.push(subscriber.id);
                }
                Err(_) => {
                    warn!(
                        "Alert subscriber {:?} exceeded send timeout; removing",
                        subscriber.id
                    );
                    dead.push(subscriber.id);
                }
            }
        }

        subscribers.retain(|s| !dead.contains(&s.id));
    }

    /// Close every subscriber (dropping senders ends their streams).
    pub async fn close_all(&self) {
        self.subscribers.lock().await.clear();
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}
