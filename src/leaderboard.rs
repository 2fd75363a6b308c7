//! Leaderboard panel: top profiles, refetched whenever a profile changes.
//!
//! The panel task re-reads `list_top_profiles` on start, after every
//! [`ProfileChanged`] push and after a lagged subscription. Pushes that queue
//! up while a read is running are drained first and answered with a single
//! read, so a burst of clicks costs one round trip.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::aggregates::{LeaderboardEntry, ProfileChanged};
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::notifier::{Delivery, Subscription};

/// What the leaderboard panel renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LeaderboardView {
    pub entries: Vec<LeaderboardEntry>,
    pub collapsed: bool,
    /// Number of completed reads.
    pub refreshes: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub last_error: Option<Error>,
}

enum PanelCommand {
    ToggleCollapsed(oneshot::Sender<bool>),
    Refresh(oneshot::Sender<Result<Vec<LeaderboardEntry>>>),
}

/// State owned by the panel task.
pub struct LeaderboardPanel<B: ?Sized> {
    backend: Arc<B>,
    limit: usize,
    subscription: Option<Subscription<ProfileChanged>>,
    view: watch::Sender<LeaderboardView>,
}

impl<B: Backend + ?Sized + 'static> LeaderboardPanel<B> {
    /// Subscribes, reads the first page and spawns the panel task.
    pub async fn open(backend: Arc<B>, limit: usize) -> LeaderboardHandle {
        let subscription = backend.subscribe_profiles();
        let (view, view_rx) = watch::channel(LeaderboardView::default());
        let (commands, commands_rx) = mpsc::channel(8);

        let mut panel = Self {
            backend,
            limit,
            subscription: Some(subscription),
            view,
        };
        // A failed first read is kept in the view; the next push retries.
        let _ = panel.refresh().await;
        tokio::spawn(panel.run(commands_rx));

        LeaderboardHandle {
            commands,
            view: view_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<PanelCommand>) {
        debug!(limit = self.limit, "leaderboard panel started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(PanelCommand::ToggleCollapsed(reply)) => {
                        let mut collapsed = false;
                        self.view.send_modify(|view| {
                            view.collapsed = !view.collapsed;
                            collapsed = view.collapsed;
                        });
                        let _ = reply.send(collapsed);
                    }
                    Some(PanelCommand::Refresh(reply)) => {
                        let result = self.refresh().await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },
                delivery = next_change(&mut self.subscription) => match delivery {
                    Some(first) => {
                        let coalesced = 1 + self.drain();
                        if matches!(first, Delivery::Lagged) {
                            warn!("profile pushes dropped, re-reading leaderboard");
                        }
                        debug!(coalesced, "profiles changed");
                        let _ = self.refresh().await;
                    }
                    None => {
                        info!("profile notifier closed");
                        self.subscription = None;
                    }
                },
            }
        }
        debug!("leaderboard panel closed");
    }

    fn drain(&mut self) -> usize {
        let Some(subscription) = self.subscription.as_mut() else {
            return 0;
        };
        std::iter::from_fn(|| subscription.try_recv()).count()
    }

    async fn refresh(&mut self) -> Result<Vec<LeaderboardEntry>> {
        let result = self.backend.list_top_profiles(self.limit).await;
        self.view.send_modify(|view| match &result {
            Ok(entries) => {
                view.entries = entries.clone();
                view.refreshes += 1;
                view.last_error = None;
            }
            Err(err) => view.last_error = Some(err.clone()),
        });
        if let Err(err) = &result {
            warn!(%err, "leaderboard read failed");
        }
        result
    }
}

async fn next_change(
    subscription: &mut Option<Subscription<ProfileChanged>>,
) -> Option<Delivery<ProfileChanged>> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => pending().await,
    }
}

/// Cloneable handle to a running leaderboard panel.
#[derive(Debug, Clone)]
pub struct LeaderboardHandle {
    commands: mpsc::Sender<PanelCommand>,
    view: watch::Receiver<LeaderboardView>,
}

impl LeaderboardHandle {
    /// Flips the collapsed flag and returns the new value.
    pub async fn toggle_collapsed(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PanelCommand::ToggleCollapsed(tx))
            .await
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)
    }

    /// Re-reads the leaderboard now.
    pub async fn refresh(&self) -> Result<Vec<LeaderboardEntry>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PanelCommand::Refresh(tx))
            .await
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    pub fn view(&self) -> LeaderboardView {
        self.view.borrow().clone()
    }

    /// Waits until the view satisfies `predicate`.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&LeaderboardView) -> bool,
    ) -> Result<LeaderboardView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(predicate).await.map_err(|_| Error::Disconnected)?;
        Ok(view.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::UserId;
    use crate::backend::LocalBackend;
    use crate::config::Config;
    use crate::faults::FaultPoint;

    fn backend() -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(&Config::default()))
    }

    #[tokio::test]
    async fn test_open_reads_first_page() {
        let backend = backend();
        backend.click("mainSwitch", &"u1".into()).unwrap();
        let panel = LeaderboardPanel::open(backend, 10).await;
        let view = panel.view();
        assert_eq!(view.entries.len(), 1);
        assert_eq!(view.refreshes, 1);
        assert!(!view.collapsed);
    }

    #[tokio::test]
    async fn test_refreshes_on_profile_change() {
        let backend = backend();
        let panel = LeaderboardPanel::open(backend.clone(), 2).await;
        assert!(panel.view().entries.is_empty());

        for (user, clicks) in [("a", 1), ("b", 3), ("c", 2)] {
            for _ in 0..clicks {
                backend.click("mainSwitch", &UserId::from(user)).unwrap();
            }
        }

        let view = panel
            .wait_until(|v| v.entries.len() == 2 && v.entries[0].total_clicks == 3 && v.entries[1].total_clicks == 2)
            .await
            .unwrap();
        assert_eq!(view.entries[0].user, UserId::from("b"));
        assert_eq!(view.entries[1].user, UserId::from("c"));
    }

    #[tokio::test]
    async fn test_rename_shows_up() {
        let backend = backend();
        backend.click("mainSwitch", &"u1".into()).unwrap();
        let panel = LeaderboardPanel::open(backend.clone(), 10).await;

        backend.rename_profile(&"u1".into(), "Ada").await.unwrap();
        let view = panel
            .wait_until(|v| v.entries.first().is_some_and(|e| e.display_name == "Ada"))
            .await
            .unwrap();
        assert_eq!(view.entries[0].total_clicks, 1);
    }

    #[tokio::test]
    async fn test_toggle_collapsed() {
        let panel = LeaderboardPanel::open(backend(), 10).await;
        assert_eq!(panel.toggle_collapsed().await, Ok(true));
        assert!(panel.view().collapsed);
        assert_eq!(panel.toggle_collapsed().await, Ok(false));
    }

    #[tokio::test]
    async fn test_failed_read_kept_in_view() {
        let backend = backend();
        backend.faults().fail_next(FaultPoint::Read, 1);
        let panel = LeaderboardPanel::open(backend.clone(), 10).await;
        assert!(matches!(
            panel.view().last_error,
            Some(Error::StoreUnavailable(_))
        ));

        backend.click("mainSwitch", &"u1".into()).unwrap();
        let view = panel.wait_until(|v| v.last_error.is_none()).await.unwrap();
        assert_eq!(view.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscription_refetches() {
        let config = Config::default().with_channel_capacity(1);
        let backend = Arc::new(LocalBackend::new(&config));
        let panel = LeaderboardPanel::open(backend.clone(), 10).await;

        // Current-thread runtime: the panel cannot drain until we yield.
        for i in 0..20 {
            backend
                .click("mainSwitch", &UserId::from(format!("u{i}")))
                .unwrap();
        }

        let view = panel.wait_until(|v| v.entries.len() == 10).await.unwrap();
        assert!(view.entries.iter().all(|e| e.total_clicks == 1));
        assert!(backend.stats().dropped.total() > 0);
    }
}
