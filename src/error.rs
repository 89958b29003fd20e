//! Error taxonomy for managed channel operations.
//!
//! Every fallible operation in this crate returns [`ChannelError`]. The
//! variants fall into the categories the supervisor acts on:
//!
//! - **Fatal** (credentials rejected, protocol mismatch, TLS
//!   misconfiguration): never retried; the channel transitions to
//!   `ShutDown` and the error is surfaced to the owning application.
//! - **Recoverable-connection** (broker unavailable, timeout, reset): always
//!   retried via the backoff scheduler; logged but not surfaced unless an
//!   explicit attempt limit was configured.
//! - **Recoverable-operation** (`NotConnected`): a single publish failed
//!   because the channel is mid-reconnect; surfaced immediately so the
//!   caller decides whether to buffer or drop.
//! - **Oversized-payload / Expired**: rejected synchronously at publish
//!   time, never sent, never retried.
//! - **Remote-channel-missing** (long-poll): the remote reports the channel
//!   resource no longer exists; triggers a full channel re-creation through
//!   the reconnect path, not a plain retry.
//!
//! Unknown or unclassified transport errors default to the
//! recoverable-connection category and are logged at error level, so silent
//! infinite-retry loops remain observable.

use thiserror::Error;

/// How the supervisor must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Unrecoverable; shut the channel down and surface the error.
    Fatal,

    /// Transient; schedule a reconnect attempt via the backoff policy.
    Retry,

    /// A per-operation condition; return it to the caller, the connection
    /// itself is unaffected.
    Surface,
}

/// The unified error type for managed channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Unrecoverable transport failure: rejected credentials, protocol
    /// version mismatch, TLS/certificate misconfiguration.
    #[error("fatal transport error: {0}")]
    Fatal(String),

    /// Transient transport failure: broker unavailable, timeout, reset.
    /// Retried automatically by the supervisor.
    #[error("connection error: {0}")]
    Connection(String),

    /// The channel is disconnected, suspended or mid-reconnect. The publish
    /// was not attempted; callers may retry once the channel recovers.
    #[error("channel is not connected, try again")]
    NotConnected,

    /// Payload exceeds the configured maximum. Rejected before any wire
    /// write; never sent, never retried.
    #[error("payload of {size} bytes exceeds maximum of {max} bytes")]
    OversizedPayload {
        /// Actual payload size in bytes.
        size: usize,
        /// Configured maximum in bytes.
        max: usize,
    },

    /// The message's expiry deadline passed before it could be handed to
    /// the wire, or the remote reported it expired. Never retried.
    #[error("message expired before delivery")]
    Expired,

    /// The remote reports the channel resource no longer exists (long-poll
    /// variant). The supervisor re-creates the channel from scratch.
    #[error("remote channel resource is missing")]
    RemoteChannelMissing,

    /// The channel was shut down; all operations fail fast so callers can
    /// detect use-after-shutdown.
    #[error("channel is shut down")]
    ChannelClosed,

    /// Subscription replay after a reconnect completed only partially.
    #[error("subscription replay incomplete: {failed} of {attempted} topics failed")]
    ReplayIncomplete {
        /// Topics the replay attempted.
        attempted: usize,
        /// Topics whose subscribe failed.
        failed: usize,
    },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration violated a declared constraint.
    #[error("configuration validation failed: {0}")]
    ConfigValidation(#[from] validator::ValidationErrors),

    /// Local I/O failure (e.g. certificate files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level MQTT failure.
    ///
    /// Boxed to avoid enum size blowup; classification into fatal vs.
    /// retryable happens in [`ChannelError::disposition`].
    #[error("MQTT connection error: {0}")]
    Mqtt(Box<rumqttc::ConnectionError>),

    /// The MQTT client could not queue an operation, typically because the
    /// session is being torn down mid-reconnect. Surfaced as "try again".
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    /// HTTP transport failure (long-poll variant).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChannelError {
    /// Maps the error onto the supervisor's reaction.
    ///
    /// Everything unclassified lands on [`Disposition::Retry`]; the retry
    /// loop logs those at error level so they stay observable.
    pub fn disposition(&self) -> Disposition {
        use Disposition::*;

        match self {
            ChannelError::Fatal(_) => Fatal,
            ChannelError::InvalidConfig(_) | ChannelError::ConfigValidation(_) => Fatal,
            ChannelError::ChannelClosed => Fatal,

            ChannelError::Connection(_) => Retry,
            ChannelError::RemoteChannelMissing => Retry,
            ChannelError::Io(e) => classify_io_error(e),
            ChannelError::Mqtt(e) => classify_mqtt_error(e),
            ChannelError::Http(e) => classify_http_error(e),

            ChannelError::NotConnected => Surface,
            ChannelError::MqttClient(_) => Surface,
            ChannelError::OversizedPayload { .. } => Surface,
            ChannelError::Expired => Surface,
            ChannelError::ReplayIncomplete { .. } => Surface,
        }
    }

    /// Convenience check for the fatal category.
    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Fatal
    }
}

impl From<rumqttc::ConnectionError> for ChannelError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        ChannelError::Mqtt(Box::new(err))
    }
}

fn classify_io_error(err: &std::io::Error) -> Disposition {
    match err.kind() {
        // Local misconfiguration or programming errors, not transient
        // conditions.
        std::io::ErrorKind::AddrInUse
        | std::io::ErrorKind::PermissionDenied
        | std::io::ErrorKind::InvalidInput
        | std::io::ErrorKind::InvalidData => Disposition::Fatal,

        _ => Disposition::Retry,
    }
}

fn classify_mqtt_error(err: &rumqttc::ConnectionError) -> Disposition {
    use rumqttc::{ConnectReturnCode, ConnectionError};
    use Disposition::*;

    match err {
        // TLS errors usually mean invalid certificates or an incompatible
        // crypto setup.
        ConnectionError::Tls(_) => Fatal,

        // Internal MQTT state corruption or protocol violation.
        ConnectionError::MqttState(_) => Fatal,

        // Broker responded with something other than CONNACK.
        ConnectionError::NotConnAck(_) => Fatal,

        // All pending requests completed; the event loop cannot be reused.
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => classify_io_error(e),

        // Network stalled or broker did not respond in time.
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Retry,

        ConnectionError::ConnectionRefused(code) => match code {
            // Permanent incompatibility or invalid credentials.
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,

            // Broker is up but currently overloaded or unavailable.
            ConnectReturnCode::ServiceUnavailable => Retry,

            _ => Retry,
        },

        #[allow(unreachable_patterns)]
        _ => Retry,
    }
}

fn classify_http_error(err: &reqwest::Error) -> Disposition {
    // Builder errors indicate a malformed URL or client setup, which no
    // amount of retrying will fix.
    if err.is_builder() {
        Disposition::Fatal
    } else {
        Disposition::Retry
    }
}
