//! Transport abstraction seams.
//!
//! The supervisor is generic over a [`Transport`], which opens
//! [`TransportSession`]s. A session is one attachment attempt's worth of
//! transport state: the supervisor opens a fresh session per connect
//! attempt, drives its receive loop, and discards it on failure. Two
//! realizations ship with the crate, a persistent-socket MQTT session
//! ([`socket`](crate::socket)) and an HTTP long-poll session
//! ([`longpoll`](crate::longpoll)); tests substitute mocks at this seam.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::gate::SuspendGate;
use crate::message::{DeliveryMode, DeliveryQueue, OutboundMessage};

/// One live attachment to the remote endpoint.
///
/// Sessions are single-use: once [`TransportSession::run`] returns, the
/// session is spent and the supervisor opens a new one.
#[async_trait]
pub trait TransportSession: Send + Sync + 'static {
    /// Performs the transport handshake.
    ///
    /// On success the session is attached and [`TransportSession::run`] may
    /// be driven. Errors are classified by the caller via
    /// [`ChannelError::disposition`](crate::error::ChannelError::disposition).
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Publishes one message.
    ///
    /// Implementations check expiry and payload size before any wire write.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), ChannelError>;

    /// Subscribes to a topic on the live session.
    async fn subscribe(&self, topic: &str, mode: DeliveryMode) -> Result<(), ChannelError>;

    /// Removes a topic subscription from the live session.
    async fn unsubscribe(&self, topic: &str) -> Result<(), ChannelError>;

    /// Drives the receive loop until the session ends.
    ///
    /// Inbound messages are pushed into `queue` while `gate` is open and
    /// dropped while it is closed. Returns `Ok(())` on a clean remote close,
    /// an error on transport failure, and promptly (without error) when
    /// `cancel` fires.
    async fn run(
        &self,
        gate: SuspendGate,
        queue: DeliveryQueue,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError>;

    /// Releases transport resources. Best effort; errors are logged, not
    /// surfaced.
    async fn close(&self);
}

/// Factory for [`TransportSession`]s.
///
/// Owns the configuration needed to construct sessions; the supervisor
/// calls [`Transport::open`] once per connect attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The session type this transport produces.
    type Session: TransportSession;

    /// Constructs a new, not-yet-connected session.
    async fn open(&self) -> Result<Self::Session, ChannelError>;
}
