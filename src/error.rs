//! Unified error type for the store, the aggregates and the client session.
//!
//! Every fallible operation in this crate returns [`Result`]. Nothing here is
//! fatal to the process: increment and read failures are surfaced to the
//! acting user, derived-aggregate failures are logged and counted, and pushes
//! for counters an observer never initialized are dropped.
//!
//! Refused user actions are not errors of the store and have their own type,
//! [`ActionRejected`].

use thiserror::Error;

/// Which derived aggregate failed to update after a committed increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DerivedStep {
    /// The (user, button) click record.
    UserRecord,
    /// The per-user profile total.
    Profile,
}

impl std::fmt::Display for DerivedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DerivedStep::UserRecord => write!(f, "user click record"),
            DerivedStep::Profile => write!(f, "profile aggregate"),
        }
    }
}

/// Error type for store, aggregate and session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The storage layer failed on a read or an increment.
    ///
    /// On the increment path the authoritative counter is unchanged.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A derived aggregate could not be updated after the global increment
    /// committed. The global total is kept.
    #[error("derived update failed ({step}) for user {user}: {reason}")]
    DerivedUpdateFailed {
        step: DerivedStep,
        user: String,
        reason: String,
    },

    /// A push arrived for a counter this observer never initialized.
    #[error("stale observer: notification for `{0}` ignored")]
    StaleObserver(String),

    /// No counter with this button name was provisioned.
    #[error("unknown counter `{0}`")]
    UnknownCounter(String),

    /// The session task is gone.
    #[error("session disconnected")]
    Disconnected,

    /// A configuration value could not be parsed.
    #[error("invalid configuration {key}: {reason}")]
    Config { key: String, reason: String },

    /// The client refused a user action.
    #[error(transparent)]
    Rejected(#[from] ActionRejected),
}

/// Result type for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a user action was refused by the client reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ActionRejected {
    /// No authoritative total is known yet.
    #[error("no authoritative total yet")]
    NotMounted,

    /// The previous action of this observer has not resolved.
    #[error("previous action still in flight")]
    ActionInFlight,

    /// The session has no signed-in user to attribute the click to.
    #[error("sign in to click")]
    Anonymous,
}
