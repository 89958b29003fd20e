//! Durable record of the channel's subscription intent.
//!
//! The registry is the source of truth for which topics the channel wants,
//! independent of connection state. Subscribing while disconnected only
//! records intent; the supervisor replays the full registry against every
//! fresh session before declaring it connected, so subscriptions survive
//! reconnects even when the remote discarded its session state.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::message::DeliveryMode;
use crate::session::TransportSession;

/// Outcome of replaying the registry against a fresh session.
#[derive(Debug)]
pub struct ReplayReport {
    /// Topics the replay attempted.
    pub attempted: usize,

    /// Topics whose subscribe failed, with the error.
    pub failures: Vec<(String, ChannelError)>,
}

impl ReplayReport {
    /// True when every registered topic was re-subscribed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Tracks desired subscriptions across connection cycles.
///
/// All mutations are idempotent: adding a topic twice or removing an absent
/// one is a no-op, so retried application calls cannot corrupt the record.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<String, DeliveryMode>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records intent to subscribe to `topic`.
    ///
    /// Returns `true` when the topic was newly added, `false` when it was
    /// already present (the delivery mode is updated either way).
    pub async fn add(&self, topic: &str, mode: DeliveryMode) -> bool {
        self.topics
            .write()
            .await
            .insert(topic.to_string(), mode)
            .is_none()
    }

    /// Removes the intent to subscribe to `topic`.
    ///
    /// Returns `true` when the topic was present.
    pub async fn remove(&self, topic: &str) -> bool {
        self.topics.write().await.remove(topic).is_some()
    }

    /// Whether `topic` is currently registered.
    pub async fn contains(&self, topic: &str) -> bool {
        self.topics.read().await.contains_key(topic)
    }

    /// Number of registered topics.
    pub async fn len(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Whether the registry holds no topics.
    pub async fn is_empty(&self) -> bool {
        self.topics.read().await.is_empty()
    }

    /// Snapshot of the registered topics and their delivery modes.
    pub async fn snapshot(&self) -> Vec<(String, DeliveryMode)> {
        self.topics
            .read()
            .await
            .iter()
            .map(|(topic, mode)| (topic.clone(), *mode))
            .collect()
    }

    /// Re-subscribes every registered topic on a fresh session.
    ///
    /// Continues past individual failures so one bad topic does not block
    /// the rest; the caller inspects the report and decides whether the
    /// session is usable. Replaying is idempotent, so running it against a
    /// remote that kept its session state is harmless.
    pub async fn replay<S>(&self, session: &S) -> ReplayReport
    where
        S: TransportSession + ?Sized,
    {
        let snapshot = self.snapshot().await;
        let attempted = snapshot.len();
        let mut failures = Vec::new();

        for (topic, mode) in snapshot {
            match session.subscribe(&topic, mode).await {
                Ok(()) => debug!(topic, "replayed subscription"),
                Err(error) => {
                    warn!(topic, %error, "failed to replay subscription");
                    failures.push((topic, error));
                }
            }
        }

        ReplayReport { attempted, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    use crate::gate::SuspendGate;
    use crate::message::{DeliveryQueue, OutboundMessage};

    /// Session stub recording subscribe calls, optionally failing some
    /// topics.
    #[derive(Default)]
    struct RecordingSession {
        subscribed: Mutex<Vec<String>>,
        fail_topics: Vec<String>,
    }

    #[async_trait]
    impl TransportSession for RecordingSession {
        async fn connect(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn publish(&self, _message: &OutboundMessage) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn subscribe(&self, topic: &str, _mode: DeliveryMode) -> Result<(), ChannelError> {
            if self.fail_topics.iter().any(|t| t == topic) {
                return Err(ChannelError::Connection("subscribe refused".into()));
            }
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn run(
            &self,
            _gate: SuspendGate,
            _queue: DeliveryQueue,
            cancel: CancellationToken,
        ) -> Result<(), ChannelError> {
            cancel.cancelled().await;
            Ok(())
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.add("topic/a", DeliveryMode::Guaranteed).await);
        assert!(!registry.add("topic/a", DeliveryMode::Guaranteed).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_absent_topic_is_noop() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.remove("topic/a").await);

        registry.add("topic/a", DeliveryMode::BestEffort).await;
        assert!(registry.remove("topic/a").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_replay_covers_exactly_registered_topics() {
        let registry = SubscriptionRegistry::new();
        registry.add("topic/a", DeliveryMode::Guaranteed).await;
        registry.add("topic/b", DeliveryMode::BestEffort).await;
        registry.add("topic/c", DeliveryMode::Guaranteed).await;
        registry.remove("topic/c").await;

        let session = RecordingSession::default();
        let report = registry.replay(&session).await;
        assert!(report.is_complete());
        assert_eq!(report.attempted, 2);

        let mut subscribed = session.subscribed.lock().unwrap().clone();
        subscribed.sort();
        assert_eq!(subscribed, vec!["topic/a", "topic/b"]);
    }

    #[tokio::test]
    async fn test_replay_continues_past_failures() {
        let registry = SubscriptionRegistry::new();
        registry.add("topic/a", DeliveryMode::Guaranteed).await;
        registry.add("topic/bad", DeliveryMode::Guaranteed).await;
        registry.add("topic/c", DeliveryMode::Guaranteed).await;

        let session = RecordingSession {
            fail_topics: vec!["topic/bad".to_string()],
            ..Default::default()
        };
        let report = registry.replay(&session).await;

        assert!(!report.is_complete());
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "topic/bad");
        // The two good topics still went through.
        assert_eq!(session.subscribed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mode_update_on_re_add() {
        let registry = SubscriptionRegistry::new();
        registry.add("topic/a", DeliveryMode::BestEffort).await;
        registry.add("topic/a", DeliveryMode::Guaranteed).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot, vec![("topic/a".to_string(), DeliveryMode::Guaranteed)]);
    }
}
