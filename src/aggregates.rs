//! Aggregate Updater: per-user click records and profile totals.
//!
//! After a committed global increment attributed to a user, two derived rows
//! are bumped by one:
//!
//! 1. the `(user, button)` click record, created lazily on first click;
//! 2. the user's profile total, which the leaderboard ranks on.
//!
//! Each row is advanced with an atomic `fetch_add`, so concurrent clicks of
//! the same user are never lost and different users never contend. The two
//! rows and the global counter are *not* updated in one transaction:
//!
//! ```text
//!   global total ──commit──► 11            (visible to every reader now)
//!   user record  ──────────────commit──► 4  (window: record still 3)
//!   profile      ───────────────────────commit──► 9 (window: profile still 8)
//! ```
//!
//! A leaderboard read inside the window sees a profile total that lags the
//! global count. If a derived step fails, the failure is reported to the
//! caller for logging and the global total is kept as is. Nothing repairs
//! the divergence afterwards.

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{DerivedStep, Error, Result};
use crate::faults::{FaultPlan, FaultPoint};
use crate::notifier::{Broadcast, ChangeNotifier, Subscription};
use crate::stats::BackendStats;

/// Opaque user identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct UserId(Arc<str>);

impl UserId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Push payload: a profile row changed and the leaderboard may have moved.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProfileChanged {
    pub user: UserId,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub display_name: String,
    pub total_clicks: u64,
}

/// Derived totals after a fully applied click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickTotals {
    pub user_clicks: u64,
    pub profile_clicks: u64,
}

struct Profile {
    display_name: String,
    total_clicks: AtomicU64,
}

impl Profile {
    fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            total_clicks: AtomicU64::new(0),
        }
    }
}

/// Per-user click records and profile aggregates.
pub struct AggregateStore {
    records: DashMap<(UserId, Arc<str>), AtomicU64>,
    profiles: DashMap<UserId, Profile>,
    changes: ChangeNotifier<ProfileChanged>,
    default_name: String,
    faults: Arc<FaultPlan>,
    stats: Arc<BackendStats>,
}

impl AggregateStore {
    /// Creates an empty store. Lazily created profiles are named
    /// `default_name`.
    pub fn new(capacity: usize, default_name: impl Into<String>) -> Self {
        Self {
            records: DashMap::new(),
            profiles: DashMap::new(),
            changes: ChangeNotifier::new("profiles", capacity),
            default_name: default_name.into(),
            faults: Arc::new(FaultPlan::new()),
            stats: Arc::new(BackendStats::new()),
        }
    }

    /// Shares `faults` with this store.
    pub fn with_faults(self, faults: Arc<FaultPlan>) -> Self {
        Self { faults, ..self }
    }

    /// Records broadcast outcomes into `stats`.
    pub fn with_stats(self, stats: Arc<BackendStats>) -> Self {
        Self { stats, ..self }
    }

    fn derived_error(step: DerivedStep, user: &UserId) -> Error {
        Error::DerivedUpdateFailed {
            step,
            user: user.to_string(),
            reason: "storage write failed".to_string(),
        }
    }

    fn publish(&self, user: &UserId) -> Broadcast {
        let broadcast = self.changes.publish(ProfileChanged { user: user.clone() });
        self.stats.record_broadcast(&broadcast);
        broadcast
    }

    /// Atomically bumps the `(user, button)` record and returns the new count.
    pub fn increment_user_record(&self, user: &UserId, button: &Arc<str>) -> Result<u64> {
        if self.faults.trip(FaultPoint::UserRecord) {
            return Err(Self::derived_error(DerivedStep::UserRecord, user));
        }

        let key = (user.clone(), Arc::clone(button));
        if let Some(row) = self.records.get(&key) {
            return Ok(row.fetch_add(1, Ordering::AcqRel) + 1);
        }
        let row = self.records.entry(key).or_insert_with(|| AtomicU64::new(0));
        Ok(row.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Atomically bumps the user's profile total and returns it.
    pub fn increment_profile(&self, user: &UserId) -> Result<u64> {
        if self.faults.trip(FaultPoint::Profile) {
            return Err(Self::derived_error(DerivedStep::Profile, user));
        }

        let total = match self.profiles.get(user) {
            Some(profile) => profile.total_clicks.fetch_add(1, Ordering::AcqRel) + 1,
            None => {
                let profile = self
                    .profiles
                    .entry(user.clone())
                    .or_insert_with(|| Profile::new(&self.default_name));
                profile.total_clicks.fetch_add(1, Ordering::AcqRel) + 1
            }
        };
        self.publish(user);
        Ok(total)
    }

    /// Applies both derived updates for one committed click.
    ///
    /// If the click record fails the profile step is skipped, so a profile
    /// is never ahead of the records it sums.
    pub fn record_click(&self, user: &UserId, button: &Arc<str>) -> Result<ClickTotals> {
        let user_clicks = self.increment_user_record(user, button)?;
        let profile_clicks = self.increment_profile(user)?;
        debug!(%user, %button, user_clicks, profile_clicks, "derived aggregates updated");
        Ok(ClickTotals {
            user_clicks,
            profile_clicks,
        })
    }

    /// Absolute write of a click record.
    pub fn upsert_user_click_record(&self, user: &UserId, button: &str, count: u64) -> Result<()> {
        if self.faults.trip(FaultPoint::UserRecord) {
            return Err(Self::derived_error(DerivedStep::UserRecord, user));
        }
        self.records
            .entry((user.clone(), Arc::from(button)))
            .or_insert_with(|| AtomicU64::new(0))
            .store(count, Ordering::Release);
        Ok(())
    }

    /// Absolute write of a profile total.
    pub fn update_profile_aggregate(&self, user: &UserId, total_clicks: u64) -> Result<()> {
        if self.faults.trip(FaultPoint::Profile) {
            return Err(Self::derived_error(DerivedStep::Profile, user));
        }
        self.profiles
            .entry(user.clone())
            .or_insert_with(|| Profile::new(&self.default_name))
            .total_clicks
            .store(total_clicks, Ordering::Release);
        self.publish(user);
        Ok(())
    }

    /// Sets the display name, creating the profile if needed.
    pub fn rename(&self, user: &UserId, display_name: &str) -> Result<()> {
        if self.faults.trip(FaultPoint::Profile) {
            return Err(Self::derived_error(DerivedStep::Profile, user));
        }
        self.profiles
            .entry(user.clone())
            .or_insert_with(|| Profile::new(&self.default_name))
            .display_name = display_name.to_string();
        self.publish(user);
        Ok(())
    }

    /// Current click record of `(user, button)`; zero before the first click.
    pub fn user_clicks(&self, user: &UserId, button: &str) -> u64 {
        self.records
            .get(&(user.clone(), Arc::from(button)))
            .map(|row| row.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Current profile row of `user`.
    pub fn profile(&self, user: &UserId) -> Option<LeaderboardEntry> {
        self.profiles.get(user).map(|p| LeaderboardEntry {
            user: user.clone(),
            display_name: p.display_name.clone(),
            total_clicks: p.total_clicks.load(Ordering::Acquire),
        })
    }

    /// Top `limit` profiles, descending by total, ties ordered by user id.
    pub fn top_profiles(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        if self.faults.trip(FaultPoint::Read) {
            return Err(Error::StoreUnavailable("leaderboard read failed".to_string()));
        }
        let mut entries: Vec<_> = self
            .profiles
            .iter()
            .map(|p| LeaderboardEntry {
                user: p.key().clone(),
                display_name: p.display_name.clone(),
                total_clicks: p.total_clicks.load(Ordering::Acquire),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.total_clicks
                .cmp(&a.total_clicks)
                .then_with(|| a.user.cmp(&b.user))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// Registers a leaderboard observer.
    pub fn subscribe(&self) -> Subscription<ProfileChanged> {
        self.changes.subscribe()
    }
}

impl fmt::Debug for AggregateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateStore")
            .field("records", &self.records.len())
            .field("profiles", &self.profiles.len())
            .field("observers", &self.changes.observers())
            .finish()
    }
}
