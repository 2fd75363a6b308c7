//! The data-store interface the client side talks to, and an in-process
//! implementation of it.
//!
//! [`Backend`] is the narrow surface of the realtime data store: point reads,
//! the atomic increment, push subscriptions, derived-aggregate writes and the
//! leaderboard read. Client sessions only ever see this trait.
//!
//! [`LocalBackend`] implements it on top of the [`CounterStore`] and the
//! [`AggregateStore`]. One click flows through it like this:
//!
//! ```text
//!   atomic_increment(button, user)
//!       │
//!       ├─► CounterStore::increment ──► commit + fan-out to every observer
//!       │        (error: counter unchanged, StoreUnavailable returned)
//!       │
//!       └─► AggregateStore::record_click ──► user record +1, profile +1
//!                (error: logged and tallied, global total kept)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::aggregates::{AggregateStore, LeaderboardEntry, ProfileChanged, UserId};
use crate::config::Config;
use crate::counters::global::CounterChanged;
use crate::counters::Reading;
use crate::error::Result;
use crate::faults::FaultPlan;
use crate::notifier::Subscription;
use crate::stats::BackendStats;
use crate::store::CounterStore;

/// Interface of the realtime data store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Point read of the authoritative reading of `button`.
    async fn authoritative_total(&self, button: &str) -> Result<Reading>;

    /// Race-free increment attributed to `user`; returns the reading handed to
    /// this caller.
    async fn atomic_increment(&self, button: &str, user: &UserId) -> Result<Reading>;

    /// Registers for pushes of every change of `button`.
    fn subscribe(&self, button: &str) -> Result<Subscription<CounterChanged>>;

    /// Deregisters. Dropping the subscription does the same.
    fn unsubscribe(&self, subscription: Subscription<CounterChanged>) {
        subscription.unsubscribe();
    }

    /// Registers for pushes of every profile change.
    fn subscribe_profiles(&self) -> Subscription<ProfileChanged>;

    async fn upsert_user_click_record(&self, user: &UserId, button: &str, count: u64)
        -> Result<()>;

    async fn update_profile_aggregate(&self, user: &UserId, total_clicks: u64) -> Result<()>;

    /// Top `limit` profiles, descending by total clicks.
    async fn list_top_profiles(&self, limit: usize) -> Result<Vec<LeaderboardEntry>>;

    /// Profile row of `user`, `None` before their first click or rename.
    async fn fetch_profile(&self, user: &UserId) -> Result<Option<LeaderboardEntry>>;

    async fn rename_profile(&self, user: &UserId, display_name: &str) -> Result<()>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    async fn authoritative_total(&self, button: &str) -> Result<Reading> {
        (**self).authoritative_total(button).await
    }

    async fn atomic_increment(&self, button: &str, user: &UserId) -> Result<Reading> {
        (**self).atomic_increment(button, user).await
    }

    fn subscribe(&self, button: &str) -> Result<Subscription<CounterChanged>> {
        (**self).subscribe(button)
    }

    fn subscribe_profiles(&self) -> Subscription<ProfileChanged> {
        (**self).subscribe_profiles()
    }

    async fn upsert_user_click_record(
        &self,
        user: &UserId,
        button: &str,
        count: u64,
    ) -> Result<()> {
        (**self).upsert_user_click_record(user, button, count).await
    }

    async fn update_profile_aggregate(&self, user: &UserId, total_clicks: u64) -> Result<()> {
        (**self).update_profile_aggregate(user, total_clicks).await
    }

    async fn list_top_profiles(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        (**self).list_top_profiles(limit).await
    }

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<LeaderboardEntry>> {
        (**self).fetch_profile(user).await
    }

    async fn rename_profile(&self, user: &UserId, display_name: &str) -> Result<()> {
        (**self).rename_profile(user, display_name).await
    }
}

/// In-process data store.
///
/// # Examples
///
/// ```rust
/// use interruttore::backend::{Backend, LocalBackend};
/// use interruttore::config::Config;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let backend = LocalBackend::with_initial(&Config::default(), 4);
///
/// let reading = backend.atomic_increment("mainSwitch", &"u1".into()).await.unwrap();
/// assert_eq!(reading.total, 5);
/// assert!(reading.is_on());
/// # });
/// ```
#[derive(Debug)]
pub struct LocalBackend {
    counters: CounterStore,
    aggregates: AggregateStore,
    faults: Arc<FaultPlan>,
    stats: Arc<BackendStats>,
}

impl LocalBackend {
    /// Creates a backend with `config.button` provisioned at zero.
    pub fn new(config: &Config) -> Self {
        Self::with_initial(config, 0)
    }

    /// Creates a backend with `config.button` provisioned at `initial`.
    pub fn with_initial(config: &Config, initial: u64) -> Self {
        let faults = Arc::new(FaultPlan::new());
        let stats = Arc::new(BackendStats::new());

        let backend = Self {
            counters: CounterStore::new(config.channel_capacity)
                .with_faults(Arc::clone(&faults)),
            aggregates: AggregateStore::new(
                config.channel_capacity,
                config.default_display_name.clone(),
            )
            .with_faults(Arc::clone(&faults))
            .with_stats(Arc::clone(&stats)),
            faults,
            stats,
        };
        backend.provision(&config.button, initial);
        backend
    }

    /// Creates `button` at `initial` if it does not exist yet.
    pub fn provision(&self, button: &str, initial: u64) {
        self.counters.provision(button, initial);
    }

    /// Failure switchboard shared by both stores.
    pub fn faults(&self) -> &Arc<FaultPlan> {
        &self.faults
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn aggregates(&self) -> &AggregateStore {
        &self.aggregates
    }

    /// Explicit reset of `button` to zero in a new epoch.
    pub fn reset(&self, button: &str) -> Result<Reading> {
        let (reading, broadcast) = self.counters.reset(button)?;
        self.stats.record_broadcast(&broadcast);
        info!(button, epoch = reading.epoch, "counter reset");
        Ok(reading)
    }

    /// Global increment, fan-out, then the derived updates.
    ///
    /// Between the commit and the derived updates a leaderboard reader can
    /// observe a profile total behind the global count.
    pub fn click(&self, button: &str, user: &UserId) -> Result<Reading> {
        let (reading, broadcast) = self.counters.increment(button).inspect_err(|err| {
            self.stats.failed_increments.record();
            warn!(button, %user, %err, "increment failed");
        })?;
        self.stats.increments.record();
        self.stats.record_broadcast(&broadcast);

        if let Err(err) = self.aggregates.record_click(user, &Arc::from(button)) {
            self.stats.derived_failures.record();
            warn!(button, %user, total = reading.total, %err, "derived update failed, global total kept");
        }

        Ok(reading)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn authoritative_total(&self, button: &str) -> Result<Reading> {
        self.counters.reading(button)
    }

    async fn atomic_increment(&self, button: &str, user: &UserId) -> Result<Reading> {
        self.click(button, user)
    }

    fn subscribe(&self, button: &str) -> Result<Subscription<CounterChanged>> {
        self.counters.subscribe(button)
    }

    fn subscribe_profiles(&self) -> Subscription<ProfileChanged> {
        self.aggregates.subscribe()
    }

    async fn upsert_user_click_record(
        &self,
        user: &UserId,
        button: &str,
        count: u64,
    ) -> Result<()> {
        self.aggregates.upsert_user_click_record(user, button, count)
    }

    async fn update_profile_aggregate(&self, user: &UserId, total_clicks: u64) -> Result<()> {
        self.aggregates.update_profile_aggregate(user, total_clicks)
    }

    async fn list_top_profiles(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.aggregates.top_profiles(limit)
    }

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<LeaderboardEntry>> {
        Ok(self.aggregates.profile(user))
    }

    async fn rename_profile(&self, user: &UserId, display_name: &str) -> Result<()> {
        self.aggregates.rename(user, display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::Observable;
    use crate::error::Error;
    use crate::faults::FaultPoint;
    use crate::notifier::Delivery;
    use std::collections::HashSet;

    fn backend_at(total: u64) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::with_initial(&Config::default(), total))
    }

    #[tokio::test]
    async fn test_click_updates_everything() {
        let backend = LocalBackend::new(&Config::default());
        let user = UserId::from("u1");

        let reading = backend.atomic_increment("mainSwitch", &user).await.unwrap();
        assert_eq!(reading, Reading::new(0, 1));
        assert_eq!(backend.aggregates().user_clicks(&user, "mainSwitch"), 1);

        let top = backend.list_top_profiles(10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].total_clicks, 1);
        assert_eq!(top[0].display_name, "Anonymous");
        assert_eq!(backend.stats().increments.value(), 1);
    }

    #[tokio::test]
    async fn test_read_twice_same_value() {
        let backend = backend_at(33);
        let a = backend.authoritative_total("mainSwitch").await.unwrap();
        let b = backend.authoritative_total("mainSwitch").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.total, 33);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_multiset() {
        let backend = backend_at(1000);
        let n = 200u64;

        let tasks: Vec<_> = (0..n)
            .map(|i| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move {
                    let user = UserId::from(format!("u{}", i % 7));
                    backend.atomic_increment("mainSwitch", &user).await.unwrap().total
                })
            })
            .collect();

        let mut returned = HashSet::new();
        for task in tasks {
            assert!(returned.insert(task.await.unwrap()));
        }

        assert_eq!(returned, (1001..=1000 + n).collect::<HashSet<_>>());
        let final_total = backend.authoritative_total("mainSwitch").await.unwrap();
        assert_eq!(final_total.total, 1000 + n);

        let profile_sum: u64 = backend
            .list_top_profiles(100)
            .await
            .unwrap()
            .iter()
            .map(|e| e.total_clicks)
            .sum();
        assert_eq!(profile_sum, n);
    }

    #[tokio::test]
    async fn test_failed_increment_reports_and_keeps_state() {
        let backend = backend_at(7);
        let user = UserId::from("u1");
        backend.faults().fail_next(FaultPoint::Increment, 1);

        let err = backend.atomic_increment("mainSwitch", &user).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(backend.authoritative_total("mainSwitch").await.unwrap().total, 7);
        assert_eq!(backend.aggregates().user_clicks(&user, "mainSwitch"), 0);
        assert_eq!(backend.stats().failed_increments.value(), 1);
    }

    #[tokio::test]
    async fn test_derived_failure_not_rolled_back() {
        let backend = backend_at(10);
        let user = UserId::from("u1");
        let mut sub = backend.subscribe("mainSwitch").unwrap();
        backend.faults().fail_next(FaultPoint::UserRecord, 1);

        let reading = backend.atomic_increment("mainSwitch", &user).await.unwrap();
        assert_eq!(reading.total, 11);
        assert_eq!(backend.authoritative_total("mainSwitch").await.unwrap().total, 11);
        assert_eq!(backend.aggregates().user_clicks(&user, "mainSwitch"), 0);
        assert_eq!(backend.stats().derived_failures.value(), 1);

        match sub.try_recv() {
            Some(Delivery::Value(change)) => assert_eq!(change.reading.total, 11),
            other => panic!("expected push of 11, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_pushes_new_epoch() {
        let backend = backend_at(3);
        let mut sub = backend.subscribe("mainSwitch").unwrap();
        let reading = backend.reset("mainSwitch").unwrap();
        assert_eq!(reading, Reading::new(1, 0));
        assert_eq!(
            sub.try_recv().map(|d| match d {
                Delivery::Value(c) => c.reading,
                Delivery::Lagged => Reading::default(),
            }),
            Some(Reading::new(1, 0))
        );
    }

    #[tokio::test]
    async fn test_arc_backend_delegates() {
        let backend = backend_at(0);
        let shared: Arc<dyn Backend> = backend.clone();
        shared
            .rename_profile(&UserId::from("u1"), "Isaac")
            .await
            .unwrap();
        let top = shared.list_top_profiles(1).await.unwrap();
        assert_eq!(top[0].display_name, "Isaac");

        let sub = shared.subscribe("mainSwitch").unwrap();
        assert_eq!(backend.counters().counter("mainSwitch").unwrap().observers(), 1);
        shared.unsubscribe(sub);
        assert_eq!(backend.counters().counter("mainSwitch").unwrap().observers(), 0);
    }
}
