//! Push fan-out of authoritative changes to registered observers.
//!
//! A [`ChangeNotifier`] owns a registry of non-owning registrations. Each
//! [`Subscription`] holds the receiving end of a bounded queue and removes its
//! registration when dropped. Publishing never blocks:
//!
//! - a full queue drops the value for that observer only and flags the
//!   subscription as lagged, so the observer knows to re-fetch;
//! - a closed queue (observer gone mid-broadcast) is pruned from the registry
//!   during the same broadcast.
//!
//! ```text
//!   publish(v) ──► registry lock ──┬── try_send ──► [queue] ──► Subscription A
//!                                  ├── try_send ──► [full ] ─x  (A' lagged)
//!                                  └── try_send ──► [closed]    (pruned)
//! ```

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// What a subscriber pulls off its subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// A published value.
    Value(T),
    /// At least one value was dropped because the queue was full. The
    /// subscriber should re-fetch the current state.
    Lagged,
}

/// Outcome of one [`ChangeNotifier::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Broadcast {
    /// Registrations that accepted the value.
    pub delivered: u64,
    /// Registrations whose queue was full.
    pub dropped: u64,
    /// Registrations removed because the subscriber had gone away.
    pub pruned: u64,
}

struct Registration<T> {
    tx: mpsc::Sender<T>,
    lagged: Arc<AtomicBool>,
}

struct Inner<T> {
    topic: Arc<str>,
    capacity: usize,
    next_id: AtomicU64,
    registry: Mutex<HashMap<u64, Registration<T>>>,
}

impl<T> Inner<T> {
    fn registry(&self) -> MutexGuard<'_, HashMap<u64, Registration<T>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out point for one topic (one button, or the profile table).
///
/// Cloning yields another handle to the same registry.
pub struct ChangeNotifier<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ChangeNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> ChangeNotifier<T> {
    /// Creates a notifier whose subscriptions buffer up to `capacity` values.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(topic: impl Into<Arc<str>>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topic: topic.into(),
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The topic this notifier publishes on.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let lagged = Arc::new(AtomicBool::new(false));

        self.inner.registry().insert(
            id,
            Registration {
                tx,
                lagged: Arc::clone(&lagged),
            },
        );
        debug!(topic = %self.inner.topic, id, "observer registered");

        Subscription {
            id,
            topic: Arc::clone(&self.inner.topic),
            rx,
            lagged,
            notifier: Arc::downgrade(&self.inner),
        }
    }

    /// Hands `value` to every registered observer without blocking.
    pub fn publish(&self, value: T) -> Broadcast {
        let mut report = Broadcast::default();
        let mut registry = self.inner.registry();

        registry.retain(|id, reg| match reg.tx.try_send(value.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                reg.lagged.store(true, Ordering::Release);
                report.dropped += 1;
                warn!(topic = %self.inner.topic, id, "observer queue full, value dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.pruned += 1;
                debug!(topic = %self.inner.topic, id, "observer gone, registration pruned");
                false
            }
        });

        report
    }

    /// Number of live registrations.
    pub fn observers(&self) -> usize {
        self.inner.registry().len()
    }
}

impl<T> Debug for ChangeNotifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("topic", &self.inner.topic)
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

/// An observer's registration. Dropping it deregisters.
pub struct Subscription<T> {
    id: u64,
    topic: Arc<str>,
    rx: mpsc::Receiver<T>,
    lagged: Arc<AtomicBool>,
    notifier: Weak<Inner<T>>,
}

impl<T> Subscription<T> {
    /// Topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next delivery.
    ///
    /// Returns [`Delivery::Lagged`] once after values were dropped, and
    /// `None` once the notifier itself is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        if self.lagged.swap(false, Ordering::AcqRel) {
            return Some(Delivery::Lagged);
        }
        self.rx.recv().await.map(Delivery::Value)
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Delivery<T>> {
        if self.lagged.swap(false, Ordering::AcqRel) {
            return Some(Delivery::Lagged);
        }
        self.rx.try_recv().ok().map(Delivery::Value)
    }

    /// Deregisters explicitly. Equivalent to dropping.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.notifier.upgrade() {
            inner.registry().remove(&self.id);
            debug!(topic = %self.topic, id = self.id, "observer deregistered");
        }
    }
}

impl<T> Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_observer_once() {
        let notifier = ChangeNotifier::new("switch", 8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        let report = notifier.publish(7u64);
        assert_eq!(report.delivered, 2);

        assert_eq!(a.try_recv(), Some(Delivery::Value(7)));
        assert_eq!(b.try_recv(), Some(Delivery::Value(7)));
        assert_eq!(a.try_recv(), None);
        assert_eq!(b.try_recv(), None);
    }

    #[test]
    fn test_order_preserved_per_observer() {
        let notifier = ChangeNotifier::new("switch", 16);
        let mut sub = notifier.subscribe();
        for v in 1..=10u64 {
            notifier.publish(v);
        }
        let got: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        let expected: Vec<_> = (1..=10u64).map(Delivery::Value).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_drop_deregisters() {
        let notifier = ChangeNotifier::<u64>::new("switch", 4);
        let sub = notifier.subscribe();
        let other = notifier.subscribe();
        assert_eq!(notifier.observers(), 2);
        drop(sub);
        assert_eq!(notifier.observers(), 1);
        other.unsubscribe();
        assert_eq!(notifier.observers(), 0);
    }

    #[test]
    fn test_full_queue_flags_lagged() {
        let notifier = ChangeNotifier::new("switch", 2);
        let mut slow = notifier.subscribe();
        let mut fast = notifier.subscribe();

        notifier.publish(1u64);
        notifier.publish(2u64);
        assert_eq!(fast.try_recv(), Some(Delivery::Value(1)));
        assert_eq!(fast.try_recv(), Some(Delivery::Value(2)));

        let report = notifier.publish(3u64);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);

        assert_eq!(slow.try_recv(), Some(Delivery::Lagged));
        assert_eq!(slow.try_recv(), Some(Delivery::Value(1)));
        assert_eq!(fast.try_recv(), Some(Delivery::Value(3)));
    }

    #[test]
    fn test_subscription_outliving_notifier() {
        let notifier = ChangeNotifier::<u64>::new("switch", 4);
        let sub = notifier.subscribe();
        drop(notifier);
        drop(sub);
    }

    #[tokio::test]
    async fn test_recv_ends_when_notifier_dropped() {
        let notifier = ChangeNotifier::new("switch", 4);
        let mut sub = notifier.subscribe();
        notifier.publish(5u64);
        drop(notifier);
        assert_eq!(sub.recv().await, Some(Delivery::Value(5)));
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_disconnect_during_broadcasts() {
        use std::thread;

        let notifier = ChangeNotifier::new("switch", 1024);
        let mut keeper = notifier.subscribe();

        let publisher = {
            let notifier = notifier.clone();
            thread::spawn(move || {
                let mut delivered = 0;
                for v in 0..500u64 {
                    delivered += notifier.publish(v).delivered;
                }
                delivered
            })
        };

        let churn = {
            let notifier = notifier.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let sub = notifier.subscribe();
                    drop(sub);
                }
            })
        };

        churn.join().unwrap();
        let delivered = publisher.join().unwrap();
        assert!(delivered >= 500);

        let got: Vec<_> = std::iter::from_fn(|| keeper.try_recv()).collect();
        assert_eq!(got.len(), 500);
        assert_eq!(notifier.observers(), 1);
    }
}
