//! Connection state tracking for managed channels.
//!
//! This module provides the state machine every managed channel moves through,
//! from the first connect attempt to terminal shutdown. The current state is
//! observable by application code through watch channels, allowing for
//! reactive connection monitoring.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──start()──> Connecting ──(handshake ok)──> Connected
//!       ▲                       ▲  │                          │  ▲
//!       │              (backoff)│  │                  suspend()  │resume()
//!       │                       │  ▼                          ▼  │
//!       └──(clean remote close)─┴─(transport error)       Suspended
//!
//! any state ──shutdown()──> ShuttingDown ──> ShutDown (terminal)
//! ```
//!
//! Transitions are driven exclusively by the connection supervisor; other
//! components only observe.

use std::fmt;

/// Represents the current state of a managed channel.
///
/// Exactly one instance exists per channel, mutated only by the
/// [`ConnectionSupervisor`](crate::supervisor::ConnectionSupervisor) under its
/// own lock. Application code should subscribe to state changes via the
/// supervisor's watch channel to implement adaptive behavior (e.g. buffering
/// publishes while a reconnect is in flight).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No connection and no connect attempt in progress.
    ///
    /// The initial state before `start()`, and the transient state between a
    /// clean remote close and the next reconnect attempt.
    Disconnected(String),

    /// Actively attempting to establish a connection to the remote endpoint.
    ///
    /// No publishes will succeed in this state; they fail fast with a
    /// retryable error so the caller decides whether to buffer or drop.
    Connecting,

    /// Successfully connected; inbound delivery and publishing are live.
    ///
    /// This is the only state suitable for normal operation.
    Connected,

    /// Connected at the transport level, but inbound delivery is gated off.
    ///
    /// Entered via `suspend()`. The underlying session and all subscription
    /// state survive; `resume()` returns to [`ConnectionState::Connected`].
    Suspended,

    /// Shutdown has been requested and teardown is in progress.
    ShuttingDown,

    /// Terminal state. All subsequent operations fail fast with a
    /// channel-closed error rather than silently no-op.
    ///
    /// The `String` field carries the reason: either "shutdown requested" or
    /// the message of the fatal error that forced termination.
    ShutDown(String),
}

impl ConnectionState {
    /// Returns a short static identifier for the current state.
    ///
    /// Useful for logging and metrics where details aren't needed.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Suspended => "Suspended",
            ConnectionState::ShuttingDown => "ShuttingDown",
            ConnectionState::ShutDown(_) => "ShutDown",
        }
    }

    /// Returns contextual details about the current state.
    ///
    /// Empty for states that carry no payload; the disconnect or shutdown
    /// reason otherwise.
    pub fn details(&self) -> &str {
        match self {
            ConnectionState::Disconnected(reason) => reason,
            ConnectionState::ShutDown(reason) => reason,
            _ => "",
        }
    }

    /// True only in [`ConnectionState::Connected`], i.e. publishes and
    /// inbound delivery will succeed.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True once shutdown has been requested or completed.
    ///
    /// Operations observing a terminal state must fail fast with
    /// [`ChannelError::ChannelClosed`](crate::error::ChannelError::ChannelClosed).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::ShuttingDown | ConnectionState::ShutDown(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(ConnectionState::Connecting.as_str(), "Connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "Connected");
        assert_eq!(ConnectionState::Suspended.as_str(), "Suspended");
        assert_eq!(
            ConnectionState::Disconnected("test".into()).as_str(),
            "Disconnected"
        );
        assert_eq!(ConnectionState::ShutDown("done".into()).as_str(), "ShutDown");
    }

    #[test]
    fn test_state_details() {
        assert_eq!(ConnectionState::Connecting.details(), "");
        assert_eq!(
            ConnectionState::Disconnected("network error".into()).details(),
            "network error"
        );
        assert_eq!(
            ConnectionState::ShutDown("shutdown requested".into()).details(),
            "shutdown requested"
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Disconnected("broker closed".into()).to_string(),
            "Disconnected (broker closed)"
        );
    }

    #[test]
    fn test_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Suspended.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::ShutDown("x".into()).is_connected());
    }

    #[test]
    fn test_is_terminal() {
        assert!(ConnectionState::ShuttingDown.is_terminal());
        assert!(ConnectionState::ShutDown("x".into()).is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Disconnected("x".into()).is_terminal());
    }
}
