//! Write-heavy telemetry of the backend.
//!
//! Every committed increment, delivery and derived failure is recorded in a
//! sharded [`Tally`], so recording costs one uncontended atomic add on the
//! hot path. Values are read only when exported.

use crate::counters::tally::Tally;
use crate::counters::Observable;
use crate::notifier::Broadcast;

/// Tallies maintained by [`LocalBackend`](crate::backend::LocalBackend).
#[derive(Debug)]
pub struct BackendStats {
    pub increments: Tally,
    pub failed_increments: Tally,
    pub derived_failures: Tally,
    pub delivered: Tally,
    pub dropped: Tally,
    pub pruned: Tally,
}

impl BackendStats {
    pub const fn new() -> Self {
        Self {
            increments: Tally::new().with_name("increments"),
            failed_increments: Tally::new().with_name("failed_increments"),
            derived_failures: Tally::new().with_name("derived_failures"),
            delivered: Tally::new().with_name("delivered"),
            dropped: Tally::new().with_name("dropped"),
            pruned: Tally::new().with_name("pruned"),
        }
    }

    /// Folds the outcome of one broadcast into the delivery tallies.
    pub fn record_broadcast(&self, broadcast: &Broadcast) {
        if broadcast.delivered > 0 {
            self.delivered.add(broadcast.delivered);
        }
        if broadcast.dropped > 0 {
            self.dropped.add(broadcast.dropped);
        }
        if broadcast.pruned > 0 {
            self.pruned.add(broadcast.pruned);
        }
    }

    /// All tallies, in a fixed order, for observers.
    pub fn observables(&self) -> [&dyn Observable; 6] {
        [
            &self.increments,
            &self.failed_increments,
            &self.derived_failures,
            &self.delivered,
            &self.dropped,
            &self.pruned,
        ]
    }
}

impl Default for BackendStats {
    fn default() -> Self {
        Self::new()
    }
}
