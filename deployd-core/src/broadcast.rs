//! Live fan-out of deployment log events.
//!
//! The [`Broadcaster`] owns one registry entry per deployment, each holding
//! the bounded queues of the currently attached [`Subscriber`]s.
//!
//! # Delivery rules
//!
//! - `publish` never waits. Each queue gets a `try_send`; a full queue
//!   drops the event for that subscriber only.
//! - Nothing is buffered for subscribers that attach later.
//! - The sentinel marks the entry terminal; anything published after it is
//!   discarded, so the sentinel is always the last event a subscriber sees.
//! - `retire` removes the entry and drops every sender, which ends the
//!   stream of any subscriber still attached.
//!
//! The registry lock is only held for the duration of a map lookup plus
//! one `try_send` per subscriber.

use crate::deployment::DeploymentId;
use crate::status::DeploymentStatusStore;
use deployd_sdk::objects::LogEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// Default capacity of each subscriber queue.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 100;

/// Errors returned by [`Broadcaster`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("deployment {0} not found")]
    NotFound(DeploymentId),
}

/// Fan-out registry shared by the pipeline (producer) and stream sessions
/// (consumers).
///
/// Cheap to clone; construct once and hand clones to every component.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
    registry: Mutex<HashMap<DeploymentId, RegistryEntry>>,
    store: DeploymentStatusStore,
    capacity: usize,
    next_key: AtomicU64,
}

#[derive(Default)]
struct RegistryEntry {
    /// Attached queues in attach order.
    ///
    /// Subscriber counts per deployment are small, so a `Vec` with linear
    /// removal beats hashing.
    subscribers: Vec<(u64, mpsc::Sender<LogEvent>)>,
    /// Set once the sentinel has been published.
    terminal: bool,
    /// Events dropped because a queue was full.
    dropped: u64,
}

impl Broadcaster {
    /// Create a broadcaster whose subscriber queues hold `capacity` events.
    ///
    /// `store` is consulted when a client subscribes to a deployment whose
    /// registry entry is already gone.
    pub fn new(store: DeploymentStatusStore, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                registry: Mutex::new(HashMap::new()),
                store,
                capacity: capacity.max(1),
                next_key: AtomicU64::new(1),
            }),
        }
    }

    /// Create the registry entry for a new deployment.
    pub fn open(&self, id: &DeploymentId) {
        self.inner.lock().entry(id.clone()).or_default();
        debug!(deployment_id = %id, "Registry entry opened");
    }

    /// Attach a new subscriber to `id`.
    ///
    /// A deployment whose record is already terminal yields a subscriber
    /// holding only the sentinel.
    pub fn subscribe(&self, id: &DeploymentId) -> Result<Subscriber, BroadcastError> {
        {
            let mut registry = self.inner.lock();
            if let Some(entry) = registry.get_mut(id) {
                // A terminal record means only the summary and sentinel are
                // still to come; late subscribers get the sentinel alone.
                if entry.terminal || self.inner.record_is_terminal(id) {
                    return Ok(Subscriber::completed(id.clone()));
                }

                let (tx, rx) = mpsc::channel(self.inner.capacity);
                let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
                entry.subscribers.push((key, tx));
                debug!(
                    deployment_id = %id,
                    subscribers = entry.subscribers.len(),
                    "Subscriber attached"
                );
                return Ok(Subscriber {
                    deployment_id: id.clone(),
                    key,
                    rx,
                    broadcaster: Arc::downgrade(&self.inner),
                    finished: false,
                    saw_sentinel: false,
                });
            }
        }

        if self.inner.record_is_terminal(id) {
            Ok(Subscriber::completed(id.clone()))
        } else {
            Err(BroadcastError::NotFound(id.clone()))
        }
    }

    /// Detach `subscriber` and release its queue.
    ///
    /// Safe to call any number of times, including after [`retire`].
    /// Returns whether the subscriber was still registered.
    ///
    /// [`retire`]: Broadcaster::retire
    pub fn unsubscribe(&self, subscriber: &mut Subscriber) -> bool {
        subscriber.finished = true;
        subscriber.rx.close();
        self.inner.remove(&subscriber.deployment_id, subscriber.key)
    }

    /// Deliver `event` to every subscriber currently attached to `id`.
    ///
    /// Returns the number of queues that accepted the event.
    pub fn publish(&self, id: &DeploymentId, event: LogEvent) -> usize {
        let mut registry = self.inner.lock();
        let Some(entry) = registry.get_mut(id) else {
            trace!(deployment_id = %id, "No registry entry, event discarded");
            return 0;
        };
        if entry.terminal {
            trace!(deployment_id = %id, "Deployment already complete, event discarded");
            return 0;
        }

        let is_sentinel = event.is_sentinel();
        let mut delivered = 0;
        let mut dropped = 0;
        entry
            .subscribers
            .retain(|(key, tx)| match tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    trace!(deployment_id = %id, subscriber = key, "Subscriber queue full, event dropped");
                    dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(deployment_id = %id, subscriber = key, "Subscriber gone, removing");
                    false
                }
            });

        entry.dropped += dropped;
        if is_sentinel {
            entry.terminal = true;
        }

        trace!(
            deployment_id = %id,
            level = %event.level,
            delivered,
            dropped,
            "Event published"
        );
        delivered
    }

    /// Remove the registry entry of `id`, ending every attached stream.
    pub fn retire(&self, id: &DeploymentId) {
        let entry = self.inner.lock().remove(id);
        match entry {
            Some(entry) => debug!(
                deployment_id = %id,
                remaining = entry.subscribers.len(),
                dropped = entry.dropped,
                "Registry entry retired"
            ),
            None => trace!(deployment_id = %id, "Retire on unknown entry"),
        }
    }

    /// Number of subscribers attached to `id`.
    pub fn subscriber_count(&self, id: &DeploymentId) -> usize {
        self.inner
            .lock()
            .get(id)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Number of events dropped on full queues for `id` so far.
    pub fn dropped_count(&self, id: &DeploymentId) -> u64 {
        self.inner.lock().get(id).map_or(0, |entry| entry.dropped)
    }

    /// Whether `id` still has a registry entry.
    pub fn is_open(&self, id: &DeploymentId) -> bool {
        self.inner.lock().contains_key(id)
    }
}

impl BroadcasterInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<DeploymentId, RegistryEntry>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_is_terminal(&self, id: &DeploymentId) -> bool {
        self.store
            .get(id.as_str())
            .is_ok_and(|record| record.is_terminal())
    }

    fn remove(&self, id: &DeploymentId, key: u64) -> bool {
        let mut registry = self.lock();
        let Some(entry) = registry.get_mut(id) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|(k, _)| *k != key);
        let removed = entry.subscribers.len() != before;
        if removed {
            debug!(
                deployment_id = %id,
                subscribers = entry.subscribers.len(),
                "Subscriber detached"
            );
        }
        removed
    }
}

/// One consumer's bounded view of a deployment's events.
///
/// Dropping a `Subscriber` detaches it from the registry.
pub struct Subscriber {
    deployment_id: DeploymentId,
    key: u64,
    rx: mpsc::Receiver<LogEvent>,
    broadcaster: Weak<BroadcasterInner>,
    finished: bool,
    saw_sentinel: bool,
}

impl Subscriber {
    /// A subscriber for an already finished deployment: one sentinel, then
    /// end of stream.
    fn completed(deployment_id: DeploymentId) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(LogEvent::sentinel());
        Self {
            deployment_id,
            key: 0,
            rx,
            broadcaster: Weak::new(),
            finished: false,
            saw_sentinel: false,
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the stream has ended: after the sentinel, after
    /// [`Broadcaster::retire`], or after [`Broadcaster::unsubscribe`]. If the
    /// sentinel was lost to a full queue, it is synthesized when the queue
    /// closes on a finished deployment.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        if self.finished {
            return None;
        }
        let next = self.rx.recv().await;
        self.accept(next)
    }

    /// Non-blocking variant of [`recv`](Subscriber::recv).
    ///
    /// Returns `None` when no event is queued right now or the stream ended.
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        if self.finished {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => self.accept(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => self.accept(None),
        }
    }

    fn accept(&mut self, next: Option<LogEvent>) -> Option<LogEvent> {
        match next {
            Some(event) => {
                if event.is_sentinel() {
                    self.saw_sentinel = true;
                    self.finished = true;
                }
                Some(event)
            }
            None => {
                self.finished = true;
                if !self.saw_sentinel && self.deployment_finished() {
                    self.saw_sentinel = true;
                    return Some(LogEvent::sentinel());
                }
                None
            }
        }
    }

    fn deployment_finished(&self) -> bool {
        self.broadcaster
            .upgrade()
            .is_some_and(|inner| inner.record_is_terminal(&self.deployment_id))
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(inner) = self.broadcaster.upgrade() {
            inner.remove(&self.deployment_id, self.key);
        }
    }
}
