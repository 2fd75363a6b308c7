//! Serializable point-in-time view of a backend.
//!
//! # Feature Flag
//!
//! This module requires the `serde` feature:
//!
//! ```toml
//! [dependencies]
//! interruttore = { version = "0.1", features = ["serde"] }
//! ```
//!
//! A [`BoardSnapshot`] carries every button's reading, the leaderboard and the
//! backend tallies. The parts are read one after the other, not atomically:
//! a click landing mid-capture may show up in the button total but not yet
//! in the leaderboard.

use serde::{Deserialize, Serialize};

use crate::aggregates::LeaderboardEntry;
use crate::backend::LocalBackend;
use crate::counters::global::GlobalCounter;
use crate::counters::Observable;
use crate::error::Result;

/// Name and value of one [`Observable`].
///
/// # Examples
///
/// ```rust
/// use interruttore::snapshot::CounterSnapshot;
///
/// let snapshot = CounterSnapshot::new("increments", 42);
/// assert_eq!(snapshot.name, "increments");
/// assert_eq!(snapshot.value, 42);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub name: String,
    pub value: u64,
}

impl CounterSnapshot {
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Creates a snapshot from an observable counter.
    pub fn from_observable(counter: &dyn Observable) -> Self {
        Self {
            name: if counter.name().is_empty() {
                "(unnamed)".to_string()
            } else {
                counter.name().to_string()
            },
            value: counter.value(),
        }
    }
}

/// State of one button.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ButtonSnapshot {
    pub button: String,
    pub epoch: u64,
    pub total: u64,
    pub is_on: bool,
    /// Registered push observers.
    pub observers: usize,
}

impl From<&GlobalCounter> for ButtonSnapshot {
    fn from(counter: &GlobalCounter) -> Self {
        let reading = counter.reading();
        Self {
            button: counter.button().to_string(),
            epoch: reading.epoch,
            total: reading.total,
            is_on: reading.is_on(),
            observers: counter.observers(),
        }
    }
}

/// Buttons, leaderboard and tallies of one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardSnapshot {
    /// Optional timestamp in milliseconds since Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    pub buttons: Vec<ButtonSnapshot>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub stats: Vec<CounterSnapshot>,
}

impl BoardSnapshot {
    /// Reads everything from `backend`, with the top `limit` profiles.
    ///
    /// Fails only if the leaderboard read fails.
    pub fn capture(backend: &LocalBackend, limit: usize) -> Result<Self> {
        let buttons = backend
            .counters()
            .counters()
            .iter()
            .map(|counter| ButtonSnapshot::from(counter.as_ref()))
            .collect();
        let leaderboard = backend.aggregates().top_profiles(limit)?;
        let stats = backend
            .stats()
            .observables()
            .into_iter()
            .map(CounterSnapshot::from_observable)
            .collect();

        Ok(Self {
            timestamp_ms: None,
            buttons,
            leaderboard,
            stats,
        })
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Finds a button by name.
    pub fn button(&self, name: &str) -> Option<&ButtonSnapshot> {
        self.buttons.iter().find(|b| b.button == name)
    }

    /// Finds a tally by name.
    pub fn stat(&self, name: &str) -> Option<u64> {
        self.stats.iter().find(|c| c.name == name).map(|c| c.value)
    }
}
