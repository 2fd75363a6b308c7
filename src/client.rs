//! Async session driver: one observer of one button.
//!
//! [`SwitchClient::connect`] fetches the authoritative reading, subscribes to
//! pushes and spawns the session task. The task is a single `tokio::select!`
//! loop over three sources:
//!
//! - commands from any [`ClientHandle`] clone,
//! - pushes from the subscription,
//! - completion of the one increment this observer may have in flight.
//!
//! The increment runs as its own task, so pushes keep being applied while it
//! is outstanding. Every iteration republishes a [`SwitchView`] on a `watch`
//! channel when something visible changed.
//!
//! The session ends when the last handle is dropped. An increment still in
//! flight at that point is not cancelled.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregates::UserId;
use crate::backend::Backend;
use crate::config::Config;
use crate::counters::global::CounterChanged;
use crate::counters::Reading;
use crate::error::{ActionRejected, Error, Result};
use crate::notifier::{Delivery, Subscription};
use crate::reconciler::{Phase, Reconciler};

const COMMAND_QUEUE: usize = 16;

/// What the switch widget renders.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SwitchView {
    /// Numeric label: the prediction while pending, else the last authoritative
    /// total.
    pub total: Option<u64>,
    /// Last authoritative reading.
    pub reading: Option<Reading>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub phase: Phase,
    pub is_on: bool,
    /// Whether the control accepts a click.
    pub enabled: bool,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub last_error: Option<Error>,
}

enum Command {
    Click(oneshot::Sender<Result<u64>>),
    Refresh(oneshot::Sender<Result<Reading>>),
    Disconnect(oneshot::Sender<()>),
    Reconnect(oneshot::Sender<Result<Reading>>),
}

/// State owned by the session task.
pub struct SwitchClient<B: ?Sized> {
    backend: Arc<B>,
    user: Option<UserId>,
    reconciler: Reconciler,
    subscription: Option<Subscription<CounterChanged>>,
    in_flight: Option<JoinHandle<Result<Reading>>>,
    last_error: Option<Error>,
    view: watch::Sender<SwitchView>,
}

impl<B: Backend + ?Sized + 'static> SwitchClient<B> {
    /// Mounts an observer of `config.button` and spawns its session task.
    ///
    /// An anonymous session (`user == None`) observes the counter but its
    /// clicks are refused.
    ///
    /// A failed initial read still starts the session, unmounted and with the
    /// error in its view; the first click reads again before predicting.
    /// Only a failed subscription fails the connect.
    pub async fn connect(
        backend: Arc<B>,
        user: Option<UserId>,
        config: &Config,
    ) -> Result<ClientHandle> {
        // Subscribe before reading so no commit falls between the two.
        let subscription = backend.subscribe(&config.button)?;
        let mut reconciler = Reconciler::new(config.button.as_str());
        let last_error = match backend.authoritative_total(&config.button).await {
            Ok(reading) => {
                reconciler.on_fetched(reading);
                None
            }
            Err(err) => {
                warn!(button = %config.button, %err, "initial read failed, mounting unmounted");
                Some(err)
            }
        };

        let (view, view_rx) = watch::channel(SwitchView::render(
            &reconciler,
            user.is_some(),
            true,
            last_error.clone(),
        ));
        let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE);

        let client = Self {
            backend,
            user,
            reconciler,
            subscription: Some(subscription),
            in_flight: None,
            last_error,
            view,
        };
        tokio::spawn(client.run(commands_rx));

        Ok(ClientHandle {
            commands,
            view: view_rx,
        })
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(button = self.reconciler.button(), user = ?self.user, "session started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                delivery = next_delivery(&mut self.subscription) => {
                    self.on_delivery(delivery).await;
                }
                response = settle(&mut self.in_flight) => self.on_response(response),
            }
            self.publish();
        }

        info!(button = self.reconciler.button(), "session closed");
    }

    /// Replies go out after the view is published, so a caller that awaited
    /// a command reads a view that already reflects it.
    async fn handle(&mut self, command: Command) {
        match command {
            Command::Click(reply) => {
                let result = self.click().await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Refresh(reply) => {
                let result = self.fetch().await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                self.disconnect();
                self.publish();
                let _ = reply.send(());
            }
            Command::Reconnect(reply) => {
                let result = self.reconnect().await;
                self.publish();
                let _ = reply.send(result);
            }
        }
    }

    async fn click(&mut self) -> Result<u64> {
        let Some(user) = self.user.clone() else {
            return Err(ActionRejected::Anonymous.into());
        };
        if self.subscription.is_none() {
            return Err(ActionRejected::NotMounted.into());
        }
        if self.reconciler.needs_fetch() {
            self.fetch().await?;
        }

        let predicted = self.reconciler.begin_action()?;
        self.last_error = None;

        let backend = Arc::clone(&self.backend);
        let button: Arc<str> = Arc::from(self.reconciler.button());
        self.in_flight = Some(tokio::spawn(async move {
            backend.atomic_increment(&button, &user).await
        }));
        Ok(predicted)
    }

    async fn fetch(&mut self) -> Result<Reading> {
        match self
            .backend
            .authoritative_total(self.reconciler.button())
            .await
        {
            Ok(reading) => {
                self.reconciler.on_fetched(reading);
                Ok(reading)
            }
            Err(err) => {
                warn!(button = self.reconciler.button(), %err, "authoritative read failed");
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn disconnect(&mut self) {
        if self.subscription.take().is_some() {
            debug!(button = self.reconciler.button(), "subscription dropped");
        }
        self.reconciler.invalidate();
    }

    async fn reconnect(&mut self) -> Result<Reading> {
        if self.subscription.is_none() {
            self.subscription = Some(self.backend.subscribe(self.reconciler.button())?);
            debug!(button = self.reconciler.button(), "resubscribed");
        }
        self.fetch().await
    }

    async fn on_delivery(&mut self, delivery: Option<Delivery<CounterChanged>>) {
        match delivery {
            Some(Delivery::Value(change)) => {
                if let Err(err) = self.reconciler.on_push(&change) {
                    debug!(%err, "push ignored");
                }
            }
            Some(Delivery::Lagged) => {
                warn!(button = self.reconciler.button(), "pushes dropped, re-fetching");
                self.reconciler.invalidate();
                // On failure the next click fetches again.
                let _ = self.fetch().await;
            }
            None => {
                info!(button = self.reconciler.button(), "notifier closed");
                self.subscription = None;
                self.reconciler.invalidate();
            }
        }
    }

    fn on_response(&mut self, response: Result<Reading>) {
        match self.reconciler.on_response(response) {
            Ok(outcome) => debug!(?outcome, "own increment resolved"),
            Err(err) => {
                warn!(button = self.reconciler.button(), %err, "increment failed");
                self.last_error = Some(err);
            }
        }
    }

    fn publish(&self) {
        let next = SwitchView::render(
            &self.reconciler,
            self.user.is_some(),
            self.subscription.is_some(),
            self.last_error.clone(),
        );
        self.view.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }
}

impl SwitchView {
    fn render(
        reconciler: &Reconciler,
        signed_in: bool,
        connected: bool,
        last_error: Option<Error>,
    ) -> Self {
        Self {
            total: reconciler.displayed_total(),
            reading: reconciler.last(),
            phase: reconciler.phase(),
            is_on: reconciler.is_on(),
            enabled: signed_in && connected && !reconciler.in_flight(),
            last_error,
        }
    }
}

async fn next_delivery(
    subscription: &mut Option<Subscription<CounterChanged>>,
) -> Option<Delivery<CounterChanged>> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => pending().await,
    }
}

async fn settle(in_flight: &mut Option<JoinHandle<Result<Reading>>>) -> Result<Reading> {
    let Some(handle) = in_flight.as_mut() else {
        return pending().await;
    };
    let joined = handle.await;
    *in_flight = None;
    joined.unwrap_or_else(|err| Err(Error::StoreUnavailable(format!("increment task: {err}"))))
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SwitchView>,
}

impl ClientHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)
    }

    /// User action. Returns the predicted total, or why it was refused.
    ///
    /// The authoritative outcome arrives later through the view.
    pub async fn click(&self) -> Result<u64> {
        self.request(Command::Click).await?
    }

    /// Explicit authoritative re-read.
    pub async fn refresh(&self) -> Result<Reading> {
        self.request(Command::Refresh).await?
    }

    /// Drops the push subscription. Clicks are refused until
    /// [`reconnect`](Self::reconnect).
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// Re-subscribes and re-reads the authoritative total.
    pub async fn reconnect(&self) -> Result<Reading> {
        self.request(Command::Reconnect).await?
    }

    /// Current view.
    pub fn view(&self) -> SwitchView {
        self.view.borrow().clone()
    }

    /// Receiver of every view change.
    pub fn watch(&self) -> watch::Receiver<SwitchView> {
        self.view.clone()
    }

    /// Waits until the view satisfies `predicate`.
    pub async fn wait_until(&self, predicate: impl FnMut(&SwitchView) -> bool) -> Result<SwitchView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(predicate).await.map_err(|_| Error::Disconnected)?;
        Ok(view.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Delayed;
    use crate::backend::LocalBackend;
    use crate::faults::FaultPoint;
    use std::time::Duration;

    fn local(total: u64) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::with_initial(&Config::default(), total))
    }

    #[tokio::test]
    async fn test_connect_mounts_with_authoritative_total() {
        let backend = local(7);
        let client = SwitchClient::connect(backend, Some("u1".into()), &Config::default())
            .await
            .unwrap();
        let view = client.view();
        assert_eq!(view.total, Some(7));
        assert!(view.is_on);
        assert!(view.enabled);
        assert_eq!(view.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_connect_unknown_button_fails() {
        let backend = local(0);
        let config = Config::default().with_button("missing");
        let err = SwitchClient::connect(backend, None, &config).await.unwrap_err();
        assert_eq!(err, Error::UnknownCounter("missing".to_string()));
    }

    #[tokio::test]
    async fn test_click_reconciles() {
        let backend = local(4);
        let client = SwitchClient::connect(backend.clone(), Some("u1".into()), &Config::default())
            .await
            .unwrap();

        assert_eq!(client.click().await, Ok(5));
        let view = client
            .wait_until(|v| v.phase == Phase::Idle && v.total == Some(5))
            .await
            .unwrap();
        assert!(view.is_on);
        assert_eq!(view.reading, Some(Reading::new(0, 5)));
        assert_eq!(backend.aggregates().user_clicks(&"u1".into(), "mainSwitch"), 1);
    }

    #[tokio::test]
    async fn test_failed_initial_read_mounts_unmounted() {
        let backend = local(2);
        backend.faults().fail_next(FaultPoint::Read, 1);
        let client = SwitchClient::connect(backend.clone(), Some("u1".into()), &Config::default())
            .await
            .unwrap();

        let view = client.view();
        assert_eq!(view.phase, Phase::Unmounted);
        assert_eq!(view.total, None);
        assert!(matches!(view.last_error, Some(Error::StoreUnavailable(_))));
        assert_eq!(backend.counters().counter("mainSwitch").unwrap().observers(), 1);

        // The first click reads 2, then predicts 3.
        assert_eq!(client.click().await, Ok(3));
        let view = client
            .wait_until(|v| v.phase == Phase::Idle && v.total == Some(3))
            .await
            .unwrap();
        assert!(view.last_error.is_none());
    }

    #[tokio::test]
    async fn test_anonymous_click_refused() {
        let backend = local(0);
        let client = SwitchClient::connect(backend, None, &Config::default())
            .await
            .unwrap();
        assert!(!client.view().enabled);
        assert_eq!(
            client.click().await,
            Err(Error::Rejected(ActionRejected::Anonymous))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_click_refused() {
        let backend = Arc::new(Delayed::new(local(0), Duration::from_millis(50)));
        let client = SwitchClient::connect(backend, Some("u1".into()), &Config::default())
            .await
            .unwrap();

        assert_eq!(client.click().await, Ok(1));
        assert_eq!(
            client.click().await,
            Err(Error::Rejected(ActionRejected::ActionInFlight))
        );
        let view = client.wait_until(|v| v.enabled).await.unwrap();
        assert_eq!(view.total, Some(1));
    }

    #[tokio::test]
    async fn test_failed_increment_reverts() {
        let backend = local(6);
        backend.faults().fail_next(FaultPoint::Increment, 1);
        let client = SwitchClient::connect(backend.clone(), Some("u1".into()), &Config::default())
            .await
            .unwrap();

        assert_eq!(client.click().await, Ok(7));
        let view = client
            .wait_until(|v| v.last_error.is_some())
            .await
            .unwrap();
        assert!(matches!(view.last_error, Some(Error::StoreUnavailable(_))));
        assert_eq!(view.total, Some(6));
        assert!(!view.is_on);
        assert!(view.enabled);
        assert_eq!(backend.counters().reading("mainSwitch").unwrap().total, 6);
    }

    #[tokio::test]
    async fn test_push_from_other_observer() {
        let backend = local(0);
        let watcher = SwitchClient::connect(backend.clone(), None, &Config::default())
            .await
            .unwrap();

        backend.click("mainSwitch", &"u2".into()).unwrap();
        backend.click("mainSwitch", &"u2".into()).unwrap();
        let view = watcher.wait_until(|v| v.total == Some(2)).await.unwrap();
        assert!(!view.is_on);
    }

    #[tokio::test]
    async fn test_disconnect_refuses_then_reconnect_fetches() {
        let backend = local(1);
        let client = SwitchClient::connect(backend.clone(), Some("u1".into()), &Config::default())
            .await
            .unwrap();

        client.disconnect().await.unwrap();
        assert_eq!(backend.counters().counter("mainSwitch").unwrap().observers(), 0);
        assert_eq!(
            client.click().await,
            Err(Error::Rejected(ActionRejected::NotMounted))
        );

        backend.click("mainSwitch", &"u2".into()).unwrap();
        assert_eq!(client.reconnect().await.unwrap().total, 2);
        assert_eq!(client.click().await, Ok(3));
    }

    #[tokio::test]
    async fn test_dropping_handle_ends_session() {
        let backend = local(0);
        let client = SwitchClient::connect(backend.clone(), None, &Config::default())
            .await
            .unwrap();
        let mut view = client.watch();
        drop(client);

        // The session drops its sender on exit.
        assert!(view.changed().await.is_err());
        assert_eq!(backend.counters().counter("mainSwitch").unwrap().observers(), 0);
    }
}
