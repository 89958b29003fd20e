//! Ownership of multiple managed channels.
//!
//! Nothing in this crate is a process-wide singleton: every supervisor is
//! an explicit value. [`ChannelRegistry`] is the piece a composition root
//! holds when it manages several channels at once, mostly so that shutdown
//! can be done in one sweep.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::session::Transport;
use crate::supervisor::ConnectionSupervisor;

/// Holds the supervisors a composition root owns, keyed by channel id.
pub struct ChannelRegistry<T: Transport> {
    channels: RwLock<HashMap<String, Arc<ConnectionSupervisor<T>>>>,
}

impl<T: Transport> ChannelRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a supervisor under `channel_id`, returning the previous holder
    /// of that id if one existed (the caller decides its fate).
    pub async fn insert(
        &self,
        channel_id: &str,
        supervisor: Arc<ConnectionSupervisor<T>>,
    ) -> Option<Arc<ConnectionSupervisor<T>>> {
        self.channels
            .write()
            .await
            .insert(channel_id.to_string(), supervisor)
    }

    /// Looks up the supervisor for `channel_id`.
    pub async fn get(&self, channel_id: &str) -> Option<Arc<ConnectionSupervisor<T>>> {
        self.channels.read().await.get(channel_id).cloned()
    }

    /// Removes and returns the supervisor for `channel_id`. The channel is
    /// not shut down; that remains the caller's call.
    pub async fn remove(&self, channel_id: &str) -> Option<Arc<ConnectionSupervisor<T>>> {
        self.channels.write().await.remove(channel_id)
    }

    /// Number of registered channels.
    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Whether no channels are registered.
    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Shuts down and removes every registered channel.
    pub async fn shutdown_all(&self) {
        let drained: Vec<_> = self.channels.write().await.drain().collect();
        for (channel_id, supervisor) in drained {
            info!(channel = %channel_id, "shutting down registered channel");
            supervisor.shutdown().await;
        }
    }
}

impl<T: Transport> Default for ChannelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
