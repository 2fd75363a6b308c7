//! Client Reconciler: optimistic prediction and authoritative reconciliation
//! for one observer.
//!
//! The reconciler is a plain state machine with no I/O; the session driver in
//! [`client`](crate::client) feeds it fetch results, pushes and increment
//! responses. The control is enabled only in [`Phase::Idle`], so "disabled"
//! can never disagree with the phase.
//!
//! ```text
//!              fetched                   action
//!  Unmounted ───────────► Idle ─────────────────────► PendingLocal
//!      ▲                   ▲  ▲                          │      │
//!      │ lagged/closed     │  │ rpc ok / rpc err         │      │ newer push/fetch
//!      └───────────────────┘  └──────────────────────────┘      ▼
//!                             └──────── rpc ok / err ─────── Reconciled
//! ```
//!
//! Authoritative readings are kept as a high-water mark: the first reading to
//! arrive wins and any identical or older reading is a no-op, whether it came
//! as a push or as the response to this observer's own increment. The shown
//! total may still jump by more than one, or fall back to the last
//! authoritative value when an increment fails.

use std::sync::Arc;

use tracing::debug;

use crate::counters::global::CounterChanged;
use crate::counters::{toggle_state, Reading};
use crate::error::{ActionRejected, Error};

/// Where the observer is in its action cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No fresh authoritative value; the next action fetches first.
    Unmounted,
    /// Control enabled.
    Idle,
    /// Own increment in flight, prediction shown.
    PendingLocal {
        predicted: u64,
        /// Subscription was lost while in flight; fetch before the next action.
        refetch: bool,
    },
    /// A newer push or fetch already replaced the prediction; own increment
    /// still in flight.
    Reconciled { refetch: bool },
}

/// Effect of one authoritative input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The reading became the new authoritative value.
    Applied(Reading),
    /// The reading was identical to or older than the current one.
    Unchanged,
}

/// Per-observer reconciliation state.
///
/// # Examples
///
/// ```rust
/// use interruttore::counters::Reading;
/// use interruttore::reconciler::{Phase, Reconciler};
///
/// let mut r = Reconciler::new("mainSwitch");
/// r.on_fetched(Reading::new(0, 4));
/// assert!(!r.is_on());
///
/// assert_eq!(r.begin_action(), Ok(5));
/// assert!(r.is_on());
/// assert!(!r.is_enabled());
///
/// r.on_response(Ok(Reading::new(0, 5)));
/// assert_eq!(r.phase(), Phase::Idle);
/// assert_eq!(r.displayed_total(), Some(5));
/// ```
#[derive(Debug, Clone)]
pub struct Reconciler {
    button: Arc<str>,
    phase: Phase,
    last: Option<Reading>,
}

impl Reconciler {
    pub fn new(button: impl Into<Arc<str>>) -> Self {
        Self {
            button: button.into(),
            phase: Phase::Unmounted,
            last: None,
        }
    }

    pub fn button(&self) -> &str {
        &self.button
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last authoritative reading, if any was ever received.
    pub fn last(&self) -> Option<Reading> {
        self.last
    }

    /// Whether the control accepts an action right now.
    pub fn is_enabled(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Whether an authoritative read is needed before the next action.
    pub fn needs_fetch(&self) -> bool {
        self.phase == Phase::Unmounted
    }

    /// Whether an increment of this observer is in flight.
    pub fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            Phase::PendingLocal { .. } | Phase::Reconciled { .. }
        )
    }

    /// Total to show: the prediction while pending, else the last
    /// authoritative total.
    pub fn displayed_total(&self) -> Option<u64> {
        match self.phase {
            Phase::PendingLocal { predicted, .. } => Some(predicted),
            _ => self.last.map(|r| r.total),
        }
    }

    /// Toggle state derived from the shown total.
    pub fn is_on(&self) -> bool {
        self.displayed_total().is_some_and(toggle_state)
    }

    fn absorb(&mut self, reading: Reading) -> Outcome {
        match self.last {
            Some(last) if reading <= last => Outcome::Unchanged,
            _ => {
                self.last = Some(reading);
                Outcome::Applied(reading)
            }
        }
    }

    /// Result of an explicit authoritative read.
    pub fn on_fetched(&mut self, reading: Reading) -> Outcome {
        let outcome = self.absorb(reading);
        self.phase = match self.phase {
            Phase::Unmounted | Phase::Idle => Phase::Idle,
            Phase::PendingLocal { predicted, .. } => match outcome {
                Outcome::Applied(_) => Phase::Reconciled { refetch: false },
                Outcome::Unchanged => Phase::PendingLocal {
                    predicted,
                    refetch: false,
                },
            },
            Phase::Reconciled { .. } => Phase::Reconciled { refetch: false },
        };
        outcome
    }

    /// Starts a user action and returns the predicted total.
    pub fn begin_action(&mut self) -> Result<u64, ActionRejected> {
        match (self.phase, self.last) {
            (Phase::Idle, Some(last)) => {
                let predicted = last.total.saturating_add(1);
                self.phase = Phase::PendingLocal {
                    predicted,
                    refetch: false,
                };
                debug!(button = %self.button, predicted, "action started");
                Ok(predicted)
            }
            (Phase::Unmounted, _) | (Phase::Idle, None) => Err(ActionRejected::NotMounted),
            _ => Err(ActionRejected::ActionInFlight),
        }
    }

    /// A pushed change of some counter.
    ///
    /// Pushes for another button, or arriving before the first authoritative
    /// read, are rejected with [`Error::StaleObserver`].
    pub fn on_push(&mut self, change: &CounterChanged) -> Result<Outcome, Error> {
        if *change.button != *self.button || self.last.is_none() {
            return Err(Error::StaleObserver(change.button.to_string()));
        }

        let outcome = self.absorb(change.reading);
        if let (Outcome::Applied(_), Phase::PendingLocal { refetch, .. }) = (outcome, self.phase) {
            self.phase = Phase::Reconciled { refetch };
        }
        Ok(outcome)
    }

    /// Response to this observer's own increment.
    ///
    /// On error the prediction is dropped and the last authoritative total is
    /// shown again; the error is returned for surfacing.
    pub fn on_response(&mut self, response: Result<Reading, Error>) -> Result<Outcome, Error> {
        let refetch = match self.phase {
            Phase::PendingLocal { refetch, .. } | Phase::Reconciled { refetch } => refetch,
            Phase::Unmounted => true,
            Phase::Idle => false,
        };
        self.phase = if refetch {
            Phase::Unmounted
        } else {
            Phase::Idle
        };

        match response {
            Ok(reading) => Ok(self.absorb(reading)),
            Err(err) => {
                debug!(button = %self.button, %err, "action failed, prediction reverted");
                Err(err)
            }
        }
    }

    /// The push stream was interrupted; values may have been missed.
    pub fn invalidate(&mut self) {
        self.phase = match self.phase {
            Phase::Unmounted | Phase::Idle => Phase::Unmounted,
            Phase::PendingLocal { predicted, .. } => Phase::PendingLocal {
                predicted,
                refetch: true,
            },
            Phase::Reconciled { .. } => Phase::Reconciled { refetch: true },
        };
    }
}
