//! Latency wrapper modelling a remote data store.
//!
//! [`Delayed`] sleeps before handing a request to the inner backend and again
//! before handing the response back. Pushes are not delayed: they leave the
//! store at commit time, so with a response latency larger than zero every
//! observer, the caller included, sees the push before the caller sees its
//! own increment response.

use std::fmt::{self, Debug};
use std::future::Future;
use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::aggregates::{LeaderboardEntry, ProfileChanged, UserId};
use crate::backend::Backend;
use crate::counters::global::CounterChanged;
use crate::counters::Reading;
use crate::error::Result;
use crate::notifier::Subscription;

/// A backend whose calls take time.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use interruttore::adapters::Delayed;
/// use interruttore::backend::{Backend, LocalBackend};
/// use interruttore::config::Config;
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let backend = Delayed::new(LocalBackend::new(&Config::default()), Duration::from_millis(1));
/// assert_eq!(backend.request_latency(), Duration::from_millis(1));
///
/// let reading = backend.authoritative_total("mainSwitch").await.unwrap();
/// assert_eq!(reading.total, 0);
/// # });
/// ```
pub struct Delayed<B> {
    inner: B,
    request: Duration,
    response: Duration,
}

impl<B> Delayed<B> {
    /// Wraps `inner` with the same latency on both legs.
    pub fn new(inner: B, latency: Duration) -> Self {
        Self {
            inner,
            request: latency,
            response: latency,
        }
    }

    pub fn with_request_latency(mut self, latency: Duration) -> Self {
        self.request = latency;
        self
    }

    pub fn with_response_latency(mut self, latency: Duration) -> Self {
        self.response = latency;
        self
    }

    pub fn request_latency(&self) -> Duration {
        self.request
    }

    pub fn response_latency(&self) -> Duration {
        self.response
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    async fn round_trip<T>(&self, call: impl Future<Output = T>) -> T {
        if !self.request.is_zero() {
            sleep(self.request).await;
        }
        let out = call.await;
        if !self.response.is_zero() {
            sleep(self.response).await;
        }
        out
    }
}

impl<B> Deref for Delayed<B> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<B: Debug> Debug for Delayed<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delayed")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl<B: Backend> Backend for Delayed<B> {
    async fn authoritative_total(&self, button: &str) -> Result<Reading> {
        self.round_trip(self.inner.authoritative_total(button)).await
    }

    async fn atomic_increment(&self, button: &str, user: &UserId) -> Result<Reading> {
        self.round_trip(self.inner.atomic_increment(button, user)).await
    }

    fn subscribe(&self, button: &str) -> Result<Subscription<CounterChanged>> {
        self.inner.subscribe(button)
    }

    fn subscribe_profiles(&self) -> Subscription<ProfileChanged> {
        self.inner.subscribe_profiles()
    }

    async fn upsert_user_click_record(
        &self,
        user: &UserId,
        button: &str,
        count: u64,
    ) -> Result<()> {
        self.round_trip(self.inner.upsert_user_click_record(user, button, count))
            .await
    }

    async fn update_profile_aggregate(&self, user: &UserId, total_clicks: u64) -> Result<()> {
        self.round_trip(self.inner.update_profile_aggregate(user, total_clicks))
            .await
    }

    async fn list_top_profiles(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.round_trip(self.inner.list_top_profiles(limit)).await
    }

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<LeaderboardEntry>> {
        self.round_trip(self.inner.fetch_profile(user)).await
    }

    async fn rename_profile(&self, user: &UserId, display_name: &str) -> Result<()> {
        self.round_trip(self.inner.rename_profile(user, display_name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::config::Config;
    use crate::notifier::Delivery;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_increment_takes_both_legs() {
        let backend = Delayed::new(LocalBackend::new(&Config::default()), Duration::from_millis(30))
            .with_response_latency(Duration::from_millis(70));

        let start = Instant::now();
        let reading = backend
            .atomic_increment("mainSwitch", &"u1".into())
            .await
            .unwrap();
        assert_eq!(reading.total, 1);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_overtakes_response() {
        let backend = std::sync::Arc::new(
            Delayed::new(LocalBackend::new(&Config::default()), Duration::ZERO)
                .with_response_latency(Duration::from_millis(50)),
        );
        let mut sub = backend.subscribe("mainSwitch").unwrap();

        let caller = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.atomic_increment("mainSwitch", &"u1".into()).await })
        };

        let pushed = sub.recv().await;
        assert!(!caller.is_finished());
        assert!(matches!(pushed, Some(Delivery::Value(c)) if c.reading.total == 1));
        assert_eq!(caller.await.unwrap().unwrap().total, 1);
    }

    #[test]
    fn test_deref_reaches_inner() {
        let backend = Delayed::new(LocalBackend::new(&Config::default()), Duration::ZERO);
        backend.provision("other", 5);
        assert_eq!(backend.counters().reading("other").unwrap().total, 5);
        assert_eq!(backend.response_latency(), Duration::ZERO);
    }
}
