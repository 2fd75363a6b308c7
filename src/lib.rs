//! # Interruttore - A Shared Switch for Many Concurrent Clients
//!
//! One on/off switch that every connected client sees and flips. Each flip is
//! an increment of a global counter; the switch is on when the total is odd.
//! Clicks are also tallied per user and summed into profile totals that feed
//! a leaderboard.
//!
//! ## The Problem
//!
//! Many clients click at once. A read-modify-write on the client loses
//! clicks, and waiting for the server before updating the widget feels slow.
//! Pushes of new totals and responses to a client's own click can arrive in
//! any order, and a slow subscriber must not hold up everyone else.
//!
//! ## The Solution
//!
//! 1. **Serialized commit**: every button has one [`GlobalCounter`](counters::global::GlobalCounter)
//!    whose increments go through a per-counter commit lock. Each caller is
//!    handed a distinct total, and the new reading is fanned out to all
//!    observers inside the same critical section, in commit order.
//!
//! 2. **Bounded fan-out**: each observer owns a bounded queue in the
//!    [`ChangeNotifier`](notifier::ChangeNotifier). A full queue drops the value
//!    and flags the subscriber as lagged, so it re-reads instead of blocking
//!    the publisher.
//!
//! 3. **Optimistic clients**: the [`Reconciler`](reconciler::Reconciler)
//!    shows `last + 1` at once, then accepts the first authoritative reading to
//!    arrive, push or response. Older and identical readings are ignored, so
//!    the reconciled total never moves backwards.
//!
//! 4. **Best-effort aggregates**: per-user records and profile totals are
//!    bumped after the global commit, row by row with atomic adds. A failure
//!    there is logged and counted; the global total is never rolled back.
//!
//! ```text
//!   click ──► Reconciler (shows last+1) ──► Backend::atomic_increment
//!                                              │
//!                        ┌─────────────────────┼───────────────────────┐
//!                        ▼                     ▼                       ▼
//!                 commit + fan-out      user record +1          profile +1
//!                        │                                             │
//!          push to every observer                       ProfileChanged push
//!                        │                                             │
//!                        ▼                                             ▼
//!             Reconciler of each client                    leaderboard panels
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`store`] | Atomic Counter Store: provisioned buttons, reads, increments, resets |
//! | [`aggregates`] | Aggregate Updater: user click records, profiles, leaderboard read |
//! | [`notifier`] | Change Notifier: bounded per-observer push queues |
//! | [`reconciler`] | Client Reconciler state machine |
//! | [`client`] | Async session driving one reconciler |
//! | [`leaderboard`] | Leaderboard panel refreshed on profile changes |
//! | [`profile`] | Display-name editor |
//! | [`backend`] | The [`Backend`](backend::Backend) trait and the in-process [`LocalBackend`](backend::LocalBackend) |
//! | [`adapters`] | Backend wrappers such as [`Delayed`](adapters::Delayed) |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use interruttore::backend::LocalBackend;
//! use interruttore::client::SwitchClient;
//! use interruttore::config::Config;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let config = Config::default();
//! let backend = Arc::new(LocalBackend::new(&config));
//!
//! let alice = SwitchClient::connect(backend.clone(), Some("alice".into()), &config)
//!     .await
//!     .unwrap();
//! let bob = SwitchClient::connect(backend.clone(), Some("bob".into()), &config)
//!     .await
//!     .unwrap();
//!
//! // Alice sees her prediction at once.
//! assert_eq!(alice.click().await.unwrap(), 1);
//!
//! // Bob sees it through the push.
//! let view = bob.wait_until(|v| v.total == Some(1)).await.unwrap();
//! assert!(view.is_on);
//! # });
//! ```
//!
//! ## Thread Safety
//!
//! [`CounterStore`](store::CounterStore), [`AggregateStore`](aggregates::AggregateStore)
//! and [`LocalBackend`](backend::LocalBackend) are `Send + Sync` and meant to
//! be shared behind an `Arc`. Client sessions and leaderboard panels each run
//! as one tokio task and are driven through cloneable handles.
//!
//! ## Observers
//!
//! Backend tallies implement [`Observable`](counters::Observable) and can be
//! exported together with the counters and the leaderboard:
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | `serde` | [`snapshot`] | Serializable [`BoardSnapshot`](snapshot::BoardSnapshot) |
//! | `json` | [`observers::json`] | Serialize tallies and boards to JSON |
//! | `full` | All observers | Enables all observer modules |
//!
//! ```toml
//! [dependencies]
//! interruttore = { version = "0.1", features = ["json"] }
//! ```
//!
//! ```rust,ignore
//! use interruttore::observers::json::JsonObserver;
//!
//! let json = JsonObserver::new()
//!     .pretty(true)
//!     .render_board(&backend, 10)?;
//! ```

pub mod adapters;
pub mod aggregates;
pub mod backend;
pub mod client;
pub mod config;
pub mod counters;
pub mod error;
pub mod faults;
pub mod leaderboard;
pub mod notifier;
pub mod observers;
pub mod profile;
pub mod reconciler;
pub mod stats;
pub mod store;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use backend::{Backend, LocalBackend};
pub use error::{Error, Result};
