//! The authoritative total of one button.
//!
//! Every mutation goes through a single per-counter commit lock. Inside the
//! critical section the counter advances by exactly one and hands the new
//! [`Reading`] to its [`ChangeNotifier`], so observers receive totals in
//! commit order and no two callers are ever handed the same total.
//!
//! The total is mirrored in an atomic so that telemetry can read it without
//! taking the lock.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_utils::CachePadded;
use tracing::debug;

use crate::counters::{Observable, Reading};
use crate::error::{Error, Result};
use crate::notifier::{Broadcast, ChangeNotifier, Subscription};

/// Push payload: the new authoritative reading of one button.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterChanged {
    pub button: Arc<str>,
    pub reading: Reading,
}

/// Authoritative, serialized counter for one button.
///
/// # Examples
///
/// ```rust
/// use interruttore::counters::global::GlobalCounter;
///
/// let counter = GlobalCounter::new("mainSwitch", 4, 8);
/// let (reading, _) = counter.increment().unwrap();
/// assert_eq!(reading.total, 5);
/// assert!(reading.is_on());
/// ```
pub struct GlobalCounter {
    name: Arc<str>,
    total: CachePadded<AtomicU64>,
    epoch: AtomicU64,
    commit: Mutex<()>,
    changes: ChangeNotifier<CounterChanged>,
}

impl GlobalCounter {
    /// Creates a counter at `initial` whose subscribers buffer `capacity`
    /// changes.
    pub fn new(name: impl Into<Arc<str>>, initial: u64, capacity: usize) -> Self {
        let name = name.into();
        Self {
            changes: ChangeNotifier::new(Arc::clone(&name), capacity),
            name,
            total: CachePadded::new(AtomicU64::new(initial)),
            epoch: AtomicU64::new(0),
            commit: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.commit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Button name of this counter.
    pub fn button(&self) -> &Arc<str> {
        &self.name
    }

    /// Consistent `(epoch, total)` pair.
    pub fn reading(&self) -> Reading {
        let _guard = self.lock();
        Reading::new(
            self.epoch.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }

    /// Current total without taking the commit lock.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Advances the total by one and publishes the new reading.
    ///
    /// Fails without touching the counter if the total would overflow.
    pub fn increment(&self) -> Result<(Reading, Broadcast)> {
        let _guard = self.lock();

        let current = self.total.load(Ordering::Acquire);
        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::StoreUnavailable(format!("counter `{}` saturated", self.name)))?;
        self.total.store(next, Ordering::Release);

        let reading = Reading::new(self.epoch.load(Ordering::Acquire), next);
        let broadcast = self.publish(reading);
        debug!(button = %self.name, total = next, delivered = broadcast.delivered, "increment committed");

        Ok((reading, broadcast))
    }

    /// Sets the total back to zero in a new epoch and publishes it.
    pub fn reset(&self) -> (Reading, Broadcast) {
        let _guard = self.lock();

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.total.store(0, Ordering::Release);

        let reading = Reading::new(epoch, 0);
        let broadcast = self.publish(reading);
        debug!(button = %self.name, epoch, "counter reset");

        (reading, broadcast)
    }

    fn publish(&self, reading: Reading) -> Broadcast {
        self.changes.publish(CounterChanged {
            button: Arc::clone(&self.name),
            reading,
        })
    }

    /// Registers an observer of this counter.
    pub fn subscribe(&self) -> Subscription<CounterChanged> {
        self.changes.subscribe()
    }

    /// Number of registered observers.
    pub fn observers(&self) -> usize {
        self.changes.observers()
    }
}

impl Observable for GlobalCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> u64 {
        self.total()
    }
}

impl Debug for GlobalCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{ total:{} epoch:{} observers:{} }}",
            self.name,
            self.total(),
            self.epoch.load(Ordering::Relaxed),
            self.observers()
        )
    }
}
