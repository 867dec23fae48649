use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::engine::types::RunState;

/// Immutable run document handed to subscribers.
pub type Snapshot = Arc<RunState>;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes lazily: the
/// publisher prunes closed channels on its next publish.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Snapshot>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next snapshot. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Snapshot> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<Snapshot>,
}

/// Fans run-state snapshots out to any number of subscribers without ever
/// waiting on one of them.
///
/// Each subscriber owns a bounded queue. When a queue is full the snapshot is
/// dropped for that subscriber only; the latest snapshot always remains
/// available through [`StatePublisher::watch`] for consumers that poll.
pub struct StatePublisher {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    latest: watch::Sender<Option<Snapshot>>,
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl StatePublisher {
    pub fn new(capacity: usize) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            latest,
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers().push(Subscriber { id, sender });
        debug!(subscription = %id, "Subscriber added");
        Subscription { id, receiver }
    }

    /// Remove a subscriber. Snapshots already queued remain readable.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Deliver a snapshot to every subscriber. Never blocks.
    pub fn publish(&self, snapshot: Snapshot) {
        self.latest.send_replace(Some(snapshot.clone()));

        self.subscribers().retain(|sub| {
            match sub.sender.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscription = %sub.id,
                        revision = snapshot.revision,
                        "Subscriber lagging, snapshot dropped"
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscription = %sub.id, "Subscriber gone, removing");
                    false
                }
            }
        });
    }

    /// Watch the most recent snapshot.
    pub fn watch(&self) -> watch::Receiver<Option<Snapshot>> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.borrow().clone()
    }
}
