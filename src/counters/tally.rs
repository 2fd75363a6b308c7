//! Sharded telemetry counter.
//!
//! [`Tally`] counts events that many threads record and that are read only
//! now and then: committed increments, dropped deliveries, failed derived
//! updates. Each thread writes its own cache-padded slot, so recording never
//! bounces a cache line between cores.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::counters::{Observable, NUM_SLOTS, THREAD_SLOT_INDEX};

/// A monotone, sharded event counter.
///
/// # Examples
///
/// ```rust
/// use interruttore::counters::tally::Tally;
/// use interruttore::counters::Observable;
/// use std::sync::Arc;
/// use std::thread;
///
/// let tally = Arc::new(Tally::new().with_name("deliveries"));
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let t = Arc::clone(&tally);
///         thread::spawn(move || {
///             for _ in 0..250 {
///                 t.record();
///             }
///         })
///     })
///     .collect();
///
/// for h in handles {
///     h.join().unwrap();
/// }
///
/// assert_eq!(tally.value(), 1000);
/// ```
pub struct Tally {
    name: &'static str,
    slots: [CachePadded<AtomicU64>; NUM_SLOTS],
}

impl Tally {
    /// Creates an unnamed tally at zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        Tally {
            name: "",
            slots: [ZERO; NUM_SLOTS],
        }
    }

    /// Sets the export name, returning `self` for chaining.
    pub const fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    #[inline]
    fn slot(&self) -> &AtomicU64 {
        THREAD_SLOT_INDEX.with(|idx| &self.slots[*idx])
    }

    /// Records one event.
    #[inline]
    pub fn record(&self) {
        self.add(1);
    }

    /// Records `n` events.
    #[inline]
    pub fn add(&self, n: u64) {
        self.slot().fetch_add(n, Ordering::Relaxed);
    }

    /// Sum over all slots. Concurrent writers may or may not be included.
    #[inline]
    pub fn total(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .sum()
    }
}

impl Observable for Tally {
    #[inline]
    fn name(&self) -> &str {
        self.name
    }

    #[inline]
    fn value(&self) -> u64 {
        self.total()
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Tally {
    /// Output format: `name{ [slot]:value ... }`, non-zero slots only.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, slot) in self.slots.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}
