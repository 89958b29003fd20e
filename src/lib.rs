//! Managed transport channels with automatic reconnection.
//!
//! This crate supervises the logical channels a message-based middleware
//! talks over. A *channel* is a long-lived attachment to a remote endpoint
//! that survives the failures of any single connection: the supervisor
//! reconnects with exponential backoff, replays subscriptions after every
//! reconnect, and keeps an honest, observable connection state the whole
//! time. Application code publishes against the channel and consumes a
//! bounded delivery queue; it never sees individual sockets or requests.
//!
//! # Architecture
//!
//! - [`ConnectionSupervisor`]: owns one channel's connect/run/reconnect
//!   cycle on a background task.
//! - [`TransportSession`] / [`Transport`]: the seam between supervision
//!   and wire protocol. Two realizations ship here: MQTT over a persistent
//!   socket ([`MqttTransport`]) and HTTP long-polling
//!   ([`LongPollTransport`]).
//! - [`SubscriptionRegistry`]: durable subscription intent, replayed on
//!   every fresh session.
//! - [`Backoff`]: the retry delay schedule, unbounded by default.
//! - [`DeliveryQueue`]: bounded inbound queue with a configurable overflow
//!   policy, instead of callbacks.
//! - [`ChannelRegistry`]: explicit ownership of several channels at once.
//!
//! # Example
//!
//! ```ignore
//! use channel_manager::{
//!     ChannelConfig, ConnectionSupervisor, DeliveryEvent, DeliveryMode,
//!     MqttTransport, OutboundMessage, SocketConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> channel_manager::Result<()> {
//!     let config = ChannelConfig {
//!         channel_id: "vehicle-42".into(),
//!         ..Default::default()
//!     };
//!     let transport = MqttTransport::new(config.clone(), SocketConfig::default())?;
//!     let supervisor = ConnectionSupervisor::new(config, transport);
//!
//!     supervisor.subscribe("telemetry/#", DeliveryMode::Guaranteed).await?;
//!     supervisor.start().await?;
//!
//!     let events = supervisor.events();
//!     while let Some(event) = events.recv().await {
//!         if let DeliveryEvent::Message(message) = event {
//!             println!("{}: {} bytes", message.topic, message.payload.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod directory;
pub mod error;
pub mod factory;
pub mod gate;
pub mod lifecycle;
pub mod longpoll;
pub mod message;
pub mod registry;
pub mod session;
pub mod socket;
pub mod state;
pub mod supervisor;

pub use backoff::{Backoff, BackoffError};
pub use config::{
    BackoffConfig, ChannelConfig, DeliveryConfig, LongPollConfig, OverflowPolicy, SocketConfig,
};
pub use directory::{ChannelUrlDirectory, NoopDirectory};
pub use error::{ChannelError, Disposition};
pub use factory::ChannelRegistry;
pub use gate::SuspendGate;
pub use lifecycle::ChannelLifecycleClient;
pub use longpoll::{LongPollSession, LongPollTransport};
pub use message::{
    DeliveryEvent, DeliveryMode, DeliveryQueue, InboundMessage, OutboundMessage,
};
pub use registry::{ReplayReport, SubscriptionRegistry};
pub use session::{Transport, TransportSession};
pub use socket::{MqttSession, MqttTransport};
pub use state::ConnectionState;
pub use supervisor::ConnectionSupervisor;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChannelError>;
