//! Counter primitives shared by the store and the telemetry tallies.
//!
//! Two kinds of counters live here:
//!
//! - [`GlobalCounter`](global::GlobalCounter): the authoritative, serialized
//!   total of one button. Every increment returns a distinct value.
//! - [`Tally`](tally::Tally): a sharded, write-heavy counter used for
//!   telemetry. Increments never contend but only the aggregate read is
//!   meaningful.
//!
//! # Sharding
//!
//! Tallies spread writes over `NUM_SLOTS` cache-padded slots. Each thread
//! is handed a slot index the first time it touches any tally:
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │             Tally                   │
//!                          ├─────────────────────────────────────┤
//!   Thread 0 ──writes──►   │ [Slot 0] ████████ (CachePadded)     │
//!   Thread 1 ──writes──►   │ [Slot 1] ████████ (CachePadded)     │
//!        ...               │    ...                              │
//!   Thread 15 ─writes──►   │ [Slot 15] ███████ (CachePadded)     │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                                   value() sums
//!                                   all slots on read
//! ```
//!
//! The global counter cannot use this layout: a sum over slots does not give
//! each caller its own post-increment value.

pub mod global;
pub mod tally;

use std::{
    cmp::Ordering as CmpOrdering,
    fmt::{Debug, Display},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Number of slots per tally.
pub(crate) const NUM_SLOTS: usize = 16;

static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot index of the current thread, assigned lazily and stable for the
    /// thread's lifetime.
    pub(crate) static THREAD_SLOT_INDEX: usize = next_slot_id();
}

/// Hands out slot ids round-robin in `[0, NUM_SLOTS)`.
fn next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_SLOTS
}

/// An authoritative value of a global counter.
///
/// Readings order by `(epoch, total)`: any reading taken after a reset is
/// newer than every reading taken before it, even though its total is
/// smaller.
///
/// # Examples
///
/// ```rust
/// use interruttore::counters::Reading;
///
/// let before = Reading::new(0, 41);
/// let after_reset = Reading::new(1, 0);
///
/// assert!(Reading::new(0, 42) > before);
/// assert!(after_reset > before);
/// assert!(Reading::new(0, 5).is_on());
/// assert!(!Reading::new(0, 4).is_on());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Bumped by every explicit reset.
    pub epoch: u64,
    /// Number of increments since the last reset.
    pub total: u64,
}

impl Reading {
    pub const fn new(epoch: u64, total: u64) -> Self {
        Self { epoch, total }
    }

    /// Toggle state derived from the total: on when odd.
    #[inline]
    pub const fn is_on(&self) -> bool {
        toggle_state(self.total)
    }
}

impl PartialOrd for Reading {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reading {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.epoch, self.total).cmp(&(other.epoch, other.total))
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.epoch == 0 {
            write!(f, "{}", self.total)
        } else {
            write!(f, "{}@{}", self.total, self.epoch)
        }
    }
}

/// The toggle is never stored; it is `total mod 2 == 1`.
#[inline]
pub const fn toggle_state(total: u64) -> bool {
    total % 2 == 1
}

/// Anything with a name and a current value that observers can export.
///
/// Implemented by [`GlobalCounter`](global::GlobalCounter) and
/// [`Tally`](tally::Tally).
pub trait Observable: Debug {
    /// Returns the name of this counter.
    fn name(&self) -> &str;

    /// Returns the current value.
    fn value(&self) -> u64;
}

impl Display for dyn Observable + '_ {
    /// Formats the counter as `name:value` if named, or just `value` otherwise.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.name().is_empty() {
            write!(f, "{}:{}", self.name(), self.value())
        } else {
            write!(f, "{}", self.value())
        }
    }
}
