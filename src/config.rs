//! Configuration structures for managed channels.
//!
//! All configuration types support serde deserialization, making them
//! loadable from TOML files or constructible programmatically, and carry
//! `validator` constraints so that invalid settings fail at load time, not
//! at connect time.
//!
//! # Examples
//!
//! ```ignore
//! // Load from TOML
//! let text = std::fs::read_to_string("channel.toml")?;
//! let config = channel_manager::ChannelConfig::from_toml(&text)?;
//!
//! // Or construct programmatically
//! let config = channel_manager::ChannelConfig {
//!     channel_id: "vehicle-42".into(),
//!     max_payload_bytes: 4096,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```
//!
//! Example `channel.toml`:
//! ```toml
//! channel_id = "vehicle-42"
//! max_payload_bytes = 65536
//! connect_timeout_secs = 30
//! keep_alive_secs = 60
//! clean_session = false
//!
//! [backoff]
//! initial_ms = 1000
//! max_ms = 60000
//! multiplier = 2.0
//!
//! [delivery]
//! queue_capacity = 128
//! overflow = "block"
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::ChannelError;

/// Top-level configuration for one managed channel.
///
/// Transport-specific settings live in [`SocketConfig`] and
/// [`LongPollConfig`]; this struct covers the knobs every realization
/// shares.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChannelConfig {
    /// Opaque identifier of the logical endpoint (queue/topic namespace).
    ///
    /// Immutable for the lifetime of a supervisor instance.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Channel id must be between 1 and 255 characters"
    ))]
    pub channel_id: String,

    /// Maximum outbound payload size in bytes.
    ///
    /// Publishes exceeding this are rejected synchronously before any wire
    /// write; no partial send can occur.
    #[validate(range(
        min = 64,
        max = 268_435_456,
        message = "Max payload must be between 64 bytes and 256 MiB"
    ))]
    pub max_payload_bytes: usize,

    /// How long to wait for the transport handshake before treating the
    /// attempt as a connection error (and scheduling a retry).
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connect timeout must be between 1 and 300 seconds"
    ))]
    pub connect_timeout_secs: u64,

    /// Keep-alive interval in seconds (socket transport).
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive_secs: u64,

    /// Whether the remote discards prior subscriptions on reconnect.
    ///
    /// With `true` the remote starts from a blank slate and the full
    /// subscription registry is replayed; with `false` the replay is still
    /// performed (it is idempotent) but the remote may already hold the
    /// entries.
    pub clean_session: bool,

    /// Retry scheduling policy shared by connect retries, directory
    /// registration and remote channel creation.
    #[validate(nested)]
    pub backoff: BackoffConfig,

    /// Inbound delivery queue sizing and overflow behavior.
    #[validate(nested)]
    pub delivery: DeliveryConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_id: Uuid::new_v4().to_string(),
            max_payload_bytes: 65_536,
            connect_timeout_secs: 30,
            keep_alive_secs: 60,
            clean_session: false,
            backoff: BackoffConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] when the text is not valid
    /// TOML, or a validation error when a constraint is violated.
    pub fn from_toml(text: &str) -> Result<Self, ChannelError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ChannelError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Retry delay schedule parameters.
///
/// See [`Backoff`](crate::backoff::Backoff) for the algorithm. The default
/// policy has no attempt limit: connection retries continue indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay before the first retry, in milliseconds.
    #[validate(range(min = 1, message = "Initial backoff must be at least 1 ms"))]
    pub initial_ms: u64,

    /// Ceiling on the delay, in milliseconds.
    #[validate(range(min = 1, message = "Max backoff must be at least 1 ms"))]
    pub max_ms: u64,

    /// Exponential growth factor (must exceed 1.0 to actually grow).
    #[validate(range(min = 1.0, message = "Backoff multiplier must be at least 1.0"))]
    pub multiplier: f64,

    /// Jitter fraction in `0.0..=1.0`; 0.0 disables jitter.
    #[validate(range(min = 0.0, max = 1.0, message = "Jitter must be between 0.0 and 1.0"))]
    pub jitter: f64,

    /// Optional hard attempt limit. `None` retries forever (the default,
    /// favoring availability over fail-fast).
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1000,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }
}

/// Behavior of the inbound delivery queue when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The receive loop blocks until the consumer drains the queue
    /// (backpressure propagates to the transport).
    Block,

    /// The oldest queued event is discarded to make room; drops are counted
    /// and logged.
    DropOldest,
}

/// Inbound delivery queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Fixed capacity of the delivery queue.
    #[validate(range(
        min = 1,
        max = 65_536,
        message = "Queue capacity must be between 1 and 65536"
    ))]
    pub queue_capacity: usize,

    /// What to do when the queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Settings specific to the persistent-socket (MQTT) realization.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SocketConfig {
    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port.
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Client identifier presented to the broker. Empty means a UUID is
    /// generated per session attempt.
    #[validate(length(max = 64, message = "Client id must not exceed 64 characters"))]
    pub client_id: String,

    /// Capacity of the client's internal request channel.
    #[validate(range(
        min = 1,
        max = 65_536,
        message = "Request channel capacity must be between 1 and 65536"
    ))]
    pub request_channel_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            request_channel_capacity: 100,
        }
    }
}

impl SocketConfig {
    /// The effective client id: the configured one, or a fresh UUID when
    /// none was configured.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.client_id.clone()
        }
    }
}

/// Settings specific to the HTTP long-poll realization.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LongPollConfig {
    /// Base URL of the remote broker that hosts channel resources.
    #[validate(url(message = "Broker URL must be a valid URL"))]
    pub broker_url: String,

    /// Receiver identifier sent with channel creation and every poll so the
    /// remote can correlate the consumer. Empty means a UUID is generated
    /// once per transport.
    #[validate(length(max = 64, message = "Receiver id must not exceed 64 characters"))]
    pub receiver_id: String,

    /// How long a single long-poll request may be held open by the remote.
    #[validate(range(
        min = 1,
        max = 600,
        message = "Poll timeout must be between 1 and 600 seconds"
    ))]
    pub poll_timeout_secs: u64,

    /// Delay between poll iterations after a non-fatal poll failure, in
    /// milliseconds.
    #[validate(range(min = 1, message = "Poll retry interval must be at least 1 ms"))]
    pub poll_retry_interval_ms: u64,

    /// Attempt limit for remote channel creation before the connect attempt
    /// is reported as failed (the supervisor then applies its own backoff).
    #[validate(range(min = 1, max = 100, message = "Create retries must be between 1 and 100"))]
    pub create_attempts: u32,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            broker_url: "http://localhost:8080/".to_string(),
            receiver_id: String::new(),
            poll_timeout_secs: 30,
            poll_retry_interval_ms: 5000,
            create_attempts: 10,
        }
    }
}

impl LongPollConfig {
    /// The effective receiver id: the configured one, or a fresh UUID when
    /// none was configured.
    pub fn effective_receiver_id(&self) -> String {
        if self.receiver_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.receiver_id.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ChannelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_payload_bytes, 65_536);
        assert!(!config.clean_session);
        assert!(config.backoff.max_attempts.is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = ChannelConfig::from_toml(
            r#"
            channel_id = "vehicle-42"
            max_payload_bytes = 1024

            [backoff]
            initial_ms = 50
            max_ms = 500

            [delivery]
            queue_capacity = 16
            overflow = "drop_oldest"
            "#,
        )
        .unwrap();
        assert_eq!(config.channel_id, "vehicle-42");
        assert_eq!(config.max_payload_bytes, 1024);
        assert_eq!(config.backoff.initial_ms, 50);
        assert_eq!(config.delivery.overflow, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let result = ChannelConfig::from_toml("max_payload_bytes = 1");
        assert!(result.is_err());

        let result = ChannelConfig::from_toml("this is not toml at all [");
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
    }

    #[test]
    fn test_backoff_config_constraints() {
        let mut config = BackoffConfig::default();
        config.multiplier = 0.5;
        assert!(config.validate().is_err());

        config.multiplier = 2.0;
        config.jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_config_effective_client_id() {
        let config = SocketConfig::default();
        let a = config.effective_client_id();
        let b = config.effective_client_id();
        assert_ne!(a, b, "empty client_id generates fresh ids");

        let config = SocketConfig {
            client_id: "fixed".into(),
            ..Default::default()
        };
        assert_eq!(config.effective_client_id(), "fixed");
    }

    #[test]
    fn test_long_poll_config_validation() {
        let config = LongPollConfig {
            broker_url: "not a url".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(LongPollConfig::default().validate().is_ok());
    }
}
