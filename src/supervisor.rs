//! Connection supervision and automatic recovery.
//!
//! The [`ConnectionSupervisor`] owns one managed channel end to end: it
//! drives the connect/run/reconnect cycle on a background task, keeps the
//! observable [`ConnectionState`] truthful, replays the subscription
//! registry after every reconnect, and fails application publishes fast
//! while no session is live.
//!
//! # Lifecycle
//!
//! [`ConnectionSupervisor::start`] spawns the supervision task and returns
//! immediately; connection establishment proceeds in the background. The
//! task loops: open a session, handshake (bounded by the configured connect
//! timeout), replay subscriptions, mark the channel connected, then drive
//! the session's receive loop until it ends. Failures are classified via
//! [`ChannelError::disposition`]: fatal errors terminate the channel,
//! everything else schedules a reconnect through the backoff policy.
//!
//! Shutdown wins every race: a cancellation observed between handshake and
//! session installation closes the fresh session instead of using it, and
//! the backoff sleep is interruptible so shutdown never waits out a delay.
//!
//! # Examples
//!
//! ```ignore
//! let config = ChannelConfig::default();
//! let transport = MqttTransport::new(&config, SocketConfig::default());
//! let supervisor = ConnectionSupervisor::new(config, transport);
//!
//! supervisor.subscribe("telemetry/#", DeliveryMode::Guaranteed).await?;
//! supervisor.start().await?;
//!
//! let events = supervisor.events();
//! while let Some(event) = events.recv().await {
//!     // ...
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Disposition};
use crate::gate::SuspendGate;
use crate::message::{DeliveryEvent, DeliveryMode, DeliveryQueue, OutboundMessage};
use crate::registry::SubscriptionRegistry;
use crate::session::{Transport, TransportSession};
use crate::state::ConnectionState;

/// The current session slot, guarded together with the state so publishes
/// observe a consistent pair.
struct Slot<S> {
    state: ConnectionState,
    session: Option<Arc<S>>,
}

struct SupervisorInner<T: Transport> {
    config: ChannelConfig,
    transport: T,
    slot: RwLock<Slot<T::Session>>,
    state_tx: watch::Sender<ConnectionState>,
    gate: SuspendGate,
    registry: SubscriptionRegistry,
    queue: DeliveryQueue,
    backoff: Mutex<Backoff>,
    cancel: CancellationToken,
    started: AtomicBool,
}

/// Supervises one managed channel: connect, recover, replay, deliver.
///
/// All methods take `&self`; the supervisor is shared behind an `Arc` when
/// multiple components need a handle.
pub struct ConnectionSupervisor<T: Transport> {
    inner: Arc<SupervisorInner<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> ConnectionSupervisor<T> {
    /// Creates a supervisor for the given transport.
    ///
    /// No connection is attempted until [`ConnectionSupervisor::start`].
    pub fn new(config: ChannelConfig, transport: T) -> Self {
        let initial = ConnectionState::Disconnected("not started".to_string());
        let (state_tx, _) = watch::channel(initial.clone());
        let queue = DeliveryQueue::new(&config.delivery);
        let backoff = Backoff::from_config(&config.backoff);

        Self {
            inner: Arc::new(SupervisorInner {
                config,
                transport,
                slot: RwLock::new(Slot {
                    state: initial,
                    session: None,
                }),
                state_tx,
                gate: SuspendGate::new(),
                registry: SubscriptionRegistry::new(),
                queue,
                backoff: Mutex::new(backoff),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Starts the supervision task.
    ///
    /// Returns immediately; observe progress via
    /// [`ConnectionSupervisor::watch_state`]. Calling `start` again on a
    /// running supervisor is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ChannelClosed`] after shutdown; a supervisor
    /// is not restartable.
    pub async fn start(&self) -> Result<(), ChannelError> {
        if self.inner.slot.read().await.state.is_terminal() {
            return Err(ChannelError::ChannelClosed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!(
                channel = %self.inner.config.channel_id,
                "start called on a running supervisor, ignoring"
            );
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_loop().await });
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Subscribes to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The reason the channel terminated, once it has.
    ///
    /// `None` while the channel is still live or only shutting down.
    pub fn terminal_error(&self) -> Option<String> {
        match self.state() {
            ConnectionState::ShutDown(reason) => Some(reason),
            _ => None,
        }
    }

    /// Handle for consuming inbound delivery events.
    pub fn events(&self) -> DeliveryQueue {
        self.inner.queue.clone()
    }

    /// Publishes a message on the channel.
    ///
    /// Expiry and payload size are checked before anything touches the
    /// wire. While the channel is not in the connected state the call fails
    /// fast with [`ChannelError::NotConnected`] so the caller decides
    /// whether to buffer or drop; no internal queueing of outbound traffic
    /// happens here.
    pub async fn publish(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        if message.is_expired() {
            return Err(ChannelError::Expired);
        }
        let size = message.payload.len();
        let max = self.inner.config.max_payload_bytes;
        if size > max {
            return Err(ChannelError::OversizedPayload { size, max });
        }

        let session = {
            let slot = self.inner.slot.read().await;
            if slot.state.is_terminal() {
                return Err(ChannelError::ChannelClosed);
            }
            if !slot.state.is_connected() {
                return Err(ChannelError::NotConnected);
            }
            slot.session.clone().ok_or(ChannelError::NotConnected)?
        };
        session.publish(message).await
    }

    /// Records intent to subscribe to `topic` and, when a session is live,
    /// applies it immediately.
    ///
    /// `Ok` means the intent is durably recorded. The live-session
    /// subscribe is best effort: a failure there is logged, not returned,
    /// and is healed by the replay on the next successful connect.
    pub async fn subscribe(&self, topic: &str, mode: DeliveryMode) -> Result<(), ChannelError> {
        let session = {
            let slot = self.inner.slot.read().await;
            if slot.state.is_terminal() {
                return Err(ChannelError::ChannelClosed);
            }
            slot.session.clone()
        };

        self.inner.registry.add(topic, mode).await;
        if let Some(session) = session {
            if let Err(error) = session.subscribe(topic, mode).await {
                warn!(
                    channel = %self.inner.config.channel_id,
                    topic,
                    %error,
                    "live subscribe failed, intent recorded for replay"
                );
            }
        }
        Ok(())
    }

    /// Removes the subscription intent for `topic` and, when a session is
    /// live, unsubscribes immediately.
    ///
    /// Like [`ConnectionSupervisor::subscribe`], the live call is best
    /// effort; the registry no longer holds the topic either way, so the
    /// remote entry lapses on the next reconnect at the latest.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ChannelError> {
        let session = {
            let slot = self.inner.slot.read().await;
            if slot.state.is_terminal() {
                return Err(ChannelError::ChannelClosed);
            }
            slot.session.clone()
        };

        self.inner.registry.remove(topic).await;
        if let Some(session) = session {
            if let Err(error) = session.unsubscribe(topic).await {
                warn!(
                    channel = %self.inner.config.channel_id,
                    topic,
                    %error,
                    "live unsubscribe failed, remote entry lapses on reconnect"
                );
            }
        }
        Ok(())
    }

    /// Snapshot of the registered subscription intent.
    pub async fn subscriptions(&self) -> Vec<(String, DeliveryMode)> {
        self.inner.registry.snapshot().await
    }

    /// Pauses inbound delivery without tearing down the session.
    ///
    /// Messages arriving while suspended are dropped, not queued; resuming
    /// delivers only traffic that arrives afterwards. Idempotent.
    pub async fn suspend(&self) {
        self.inner.gate.close();
        let mut slot = self.inner.slot.write().await;
        if slot.state.is_connected() {
            slot.state = ConnectionState::Suspended;
            self.inner.state_tx.send_replace(ConnectionState::Suspended);
            info!(channel = %self.inner.config.channel_id, "channel suspended");
        }
    }

    /// Resumes inbound delivery after [`ConnectionSupervisor::suspend`].
    /// Idempotent.
    pub async fn resume(&self) {
        self.inner.gate.open();
        let mut slot = self.inner.slot.write().await;
        if matches!(slot.state, ConnectionState::Suspended) {
            slot.state = ConnectionState::Connected;
            self.inner.state_tx.send_replace(ConnectionState::Connected);
            info!(channel = %self.inner.config.channel_id, "channel resumed");
        }
    }

    /// Shuts the channel down and waits for the supervision task to exit.
    ///
    /// Interrupts any in-flight backoff sleep or connect attempt, closes
    /// the live session, and moves the channel to its terminal state. All
    /// subsequent operations fail with [`ChannelError::ChannelClosed`].
    /// Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut slot = self.inner.slot.write().await;
            if !matches!(slot.state, ConnectionState::ShutDown(_)) {
                slot.state = ConnectionState::ShuttingDown;
                self.inner.state_tx.send_replace(ConnectionState::ShuttingDown);
            }
        }
        self.inner.cancel.cancel();
        // Close the queue before joining the task: cancellation cannot
        // reach a receive loop parked inside a blocking queue push, only
        // the queue itself can wake it.
        self.inner.queue.close();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                error!(%error, "supervision task terminated abnormally");
            }
        }

        let session = self.inner.slot.write().await.session.take();
        if let Some(session) = session {
            session.close().await;
        }

        let mut slot = self.inner.slot.write().await;
        if !matches!(slot.state, ConnectionState::ShutDown(_)) {
            let state = ConnectionState::ShutDown("shutdown requested".to_string());
            slot.state = state.clone();
            self.inner.state_tx.send_replace(state);
        }
        info!(channel = %self.inner.config.channel_id, "channel shut down");
    }
}

impl<T: Transport> SupervisorInner<T> {
    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.set_state(ConnectionState::Connecting).await;
            debug!(channel = %self.config.channel_id, "attempting to connect");

            let session = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.attempt_connect() => match result {
                    Ok(session) => Arc::new(session),
                    Err(error) => {
                        if error.disposition() == Disposition::Fatal {
                            error!(
                                channel = %self.config.channel_id,
                                %error,
                                "fatal connection error, shutting channel down"
                            );
                            self.terminate(error.to_string()).await;
                            return;
                        }
                        warn!(channel = %self.config.channel_id, %error, "connect attempt failed");
                        self.set_state(ConnectionState::Disconnected(error.to_string()))
                            .await;
                        if !self.sleep_backoff().await {
                            return;
                        }
                        continue;
                    }
                },
            };

            // Replay before exposing the session; a channel is only
            // Connected once its full subscription intent is live again.
            let report = self.registry.replay(session.as_ref()).await;
            if !report.is_complete() {
                warn!(
                    channel = %self.config.channel_id,
                    failed = report.failures.len(),
                    attempted = report.attempted,
                    "subscription replay incomplete, discarding session"
                );
                session.close().await;
                if !self.sleep_backoff().await {
                    return;
                }
                continue;
            }

            // Install the session. Shutdown wins the race: a cancellation
            // observed here means the fresh session is closed, not used.
            {
                let mut slot = self.slot.write().await;
                if self.cancel.is_cancelled() {
                    drop(slot);
                    session.close().await;
                    return;
                }
                let state = if self.gate.is_open() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Suspended
                };
                slot.session = Some(Arc::clone(&session));
                slot.state = state.clone();
                self.state_tx.send_replace(state);
            }
            self.backoff.lock().await.reset();
            info!(channel = %self.config.channel_id, "channel connected");

            let result = session
                .run(self.gate.clone(), self.queue.clone(), self.cancel.child_token())
                .await;

            self.slot.write().await.session = None;
            session.close().await;

            if self.cancel.is_cancelled() {
                return;
            }
            match result {
                Ok(()) => {
                    info!(channel = %self.config.channel_id, "session closed by remote");
                    self.set_state(ConnectionState::Disconnected(
                        "closed by remote".to_string(),
                    ))
                    .await;
                }
                Err(error) => {
                    let reason = error.to_string();
                    let fatal = error.disposition() == Disposition::Fatal;
                    if fatal {
                        error!(
                            channel = %self.config.channel_id,
                            error = %reason,
                            "fatal session error, shutting channel down"
                        );
                    } else {
                        warn!(
                            channel = %self.config.channel_id,
                            error = %reason,
                            "session ended with error"
                        );
                    }
                    self.notify_error("receive loop", error);
                    if fatal {
                        self.terminate(reason).await;
                        return;
                    }
                    self.set_state(ConnectionState::Disconnected(reason)).await;
                }
            }
            if !self.sleep_backoff().await {
                return;
            }
        }
    }

    /// Opens and handshakes a fresh session, bounding the handshake by the
    /// configured connect timeout.
    async fn attempt_connect(&self) -> Result<T::Session, ChannelError> {
        let session = self.transport.open().await?;
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, session.connect()).await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(error)) => {
                session.close().await;
                Err(error)
            }
            Err(_) => {
                session.close().await;
                Err(ChannelError::Connection(format!(
                    "handshake timed out after {}s",
                    self.config.connect_timeout_secs
                )))
            }
        }
    }

    /// Sleeps out the next backoff delay.
    ///
    /// Returns `false` when the loop must exit: shutdown interrupted the
    /// sleep, or a configured attempt limit was exhausted (which terminates
    /// the channel).
    async fn sleep_backoff(&self) -> bool {
        let delay = match self.backoff.lock().await.next_sleep() {
            Ok(delay) => delay,
            Err(error) => {
                error!(
                    channel = %self.config.channel_id,
                    %error,
                    "reconnect attempts exhausted, shutting channel down"
                );
                self.terminate(error.to_string()).await;
                return false;
            }
        };
        debug!(channel = %self.config.channel_id, ?delay, "waiting before next connect attempt");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Surfaces a transport error to the consumer as a delivery event.
    ///
    /// Non-blocking: a consumer too slow to drain its own queue loses the
    /// notification (logged) rather than stalling supervision. The state
    /// channel carries the same information either way.
    fn notify_error(&self, context: &str, error: ChannelError) {
        let event = DeliveryEvent::Error {
            context: context.to_string(),
            error,
        };
        if self.queue.try_push(event).is_err() {
            warn!(
                channel = %self.config.channel_id,
                context,
                "delivery queue full, dropping error event"
            );
        }
    }

    /// Moves the channel to its terminal state with the given reason.
    async fn terminate(&self, reason: String) {
        {
            let mut slot = self.slot.write().await;
            slot.session = None;
            let state = ConnectionState::ShutDown(reason);
            slot.state = state.clone();
            self.state_tx.send_replace(state);
        }
        self.cancel.cancel();
        self.queue.close();
    }

    /// Publishes a non-terminal state transition; terminal states are only
    /// left via `terminate` or `shutdown`.
    async fn set_state(&self, next: ConnectionState) {
        let mut slot = self.slot.write().await;
        if slot.state.is_terminal() {
            return;
        }
        slot.state = next.clone();
        self.state_tx.send_replace(next);
    }
}
