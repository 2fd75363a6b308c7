//! Atomic Counter Store: the authoritative totals of every provisioned button.
//!
//! Counters are created once by [`CounterStore::provision`] and are never
//! deleted. All mutation happens inside [`GlobalCounter`], which serializes
//! increments per button; buttons never contend with each other.
//!
//! A failed storage step (see [`FaultPlan`]) leaves the counter unchanged.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::counters::global::{CounterChanged, GlobalCounter};
use crate::counters::Reading;
use crate::error::{Error, Result};
use crate::faults::{FaultPlan, FaultPoint};
use crate::notifier::{Broadcast, Subscription};

/// Registry of global counters keyed by button name.
#[derive(Debug)]
pub struct CounterStore {
    counters: DashMap<Arc<str>, Arc<GlobalCounter>>,
    capacity: usize,
    faults: Arc<FaultPlan>,
}

impl CounterStore {
    /// Creates an empty store whose subscriptions buffer `capacity` changes.
    pub fn new(capacity: usize) -> Self {
        Self {
            counters: DashMap::new(),
            capacity,
            faults: Arc::new(FaultPlan::new()),
        }
    }

    /// Shares `faults` with this store.
    pub fn with_faults(self, faults: Arc<FaultPlan>) -> Self {
        Self { faults, ..self }
    }

    /// Creates the counter for `button` at `initial`, or returns the existing
    /// one untouched.
    pub fn provision(&self, button: &str, initial: u64) -> Arc<GlobalCounter> {
        let entry = self.counters.entry(Arc::from(button)).or_insert_with(|| {
            info!(button, initial, "counter provisioned");
            Arc::new(GlobalCounter::new(button, initial, self.capacity))
        });
        Arc::clone(entry.value())
    }

    /// Looks up a provisioned counter.
    pub fn counter(&self, button: &str) -> Result<Arc<GlobalCounter>> {
        self.counters
            .get(button)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| Error::UnknownCounter(button.to_string()))
    }

    /// Point read of the authoritative reading.
    pub fn reading(&self, button: &str) -> Result<Reading> {
        let counter = self.counter(button)?;
        if self.faults.trip(FaultPoint::Read) {
            return Err(Error::StoreUnavailable(format!("read of `{button}` failed")));
        }
        Ok(counter.reading())
    }

    /// Race-free increment; returns the new reading handed to this caller.
    pub fn increment(&self, button: &str) -> Result<(Reading, Broadcast)> {
        let counter = self.counter(button)?;
        if self.faults.trip(FaultPoint::Increment) {
            return Err(Error::StoreUnavailable(format!(
                "increment of `{button}` failed"
            )));
        }
        counter.increment()
    }

    /// Explicit reset to zero in a new epoch.
    pub fn reset(&self, button: &str) -> Result<(Reading, Broadcast)> {
        Ok(self.counter(button)?.reset())
    }

    /// Registers an observer of `button`.
    pub fn subscribe(&self, button: &str) -> Result<Subscription<CounterChanged>> {
        Ok(self.counter(button)?.subscribe())
    }

    /// All counters, sorted by button name.
    pub fn counters(&self) -> Vec<Arc<GlobalCounter>> {
        let mut all: Vec<_> = self
            .counters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.button().cmp(b.button()));
        all
    }
}
