//! Remote channel resource lifecycle for the long-poll transport.
//!
//! A long-poll channel exists as a resource on the remote broker: it must
//! be created before polling can start, and should be deleted on shutdown
//! so the broker stops buffering. [`ChannelLifecycleClient`] wraps those
//! two HTTP calls. Creation is retried with backoff up to the configured
//! attempt limit, because a broker that is starting up alongside us is the
//! common case, not the exception.

use std::time::Duration;

use reqwest::{header, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::Backoff;
use crate::config::LongPollConfig;
use crate::error::ChannelError;

/// Header carrying the receiver id so the broker can correlate the
/// consumer across channel creation and polling.
pub(crate) const TRACKING_HEADER: &str = "x-atmosphere-tracking-id";

/// Creates and deletes channel resources on the remote broker.
#[derive(Clone)]
pub struct ChannelLifecycleClient {
    http: reqwest::Client,
    config: LongPollConfig,
    receiver_id: String,
}

impl ChannelLifecycleClient {
    /// Creates a lifecycle client sharing the transport's HTTP client.
    pub fn new(http: reqwest::Client, config: LongPollConfig, receiver_id: String) -> Self {
        Self {
            http,
            config,
            receiver_id,
        }
    }

    /// Builds the collection URL channel creation posts to.
    pub(crate) fn create_url(&self, channel_id: &str) -> Result<Url, ChannelError> {
        let base = Url::parse(&self.config.broker_url)
            .map_err(|e| ChannelError::InvalidConfig(format!("broker URL: {e}")))?;
        let mut url = base
            .join("channels/")
            .map_err(|e| ChannelError::InvalidConfig(format!("broker URL: {e}")))?;
        url.query_pairs_mut().append_pair("ccid", channel_id);
        Ok(url)
    }

    /// Creates the channel resource, retrying with backoff up to the
    /// configured attempt limit.
    ///
    /// Returns the channel's polling URL as reported by the broker's
    /// `Location` header.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connection`] once the attempt limit is
    /// exhausted; the supervisor applies its own (unbounded) backoff on
    /// top, so a slow-starting broker eventually gets through.
    pub async fn create_channel(&self, channel_id: &str) -> Result<Url, ChannelError> {
        let url = self.create_url(channel_id)?;
        // Constant retry interval; the supervisor layers exponential
        // backoff over the whole connect attempt.
        let retry = Duration::from_millis(self.config.poll_retry_interval_ms);
        let mut backoff = Backoff::new(retry, retry, 1.0);
        backoff.set_max_attempts(self.config.create_attempts);

        loop {
            match self.try_create(&url).await {
                Ok(channel_url) => {
                    info!(channel = channel_id, %channel_url, "created remote channel");
                    return Ok(channel_url);
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(channel = channel_id, %error, "channel creation attempt failed");
                    match backoff.next_sleep() {
                        Ok(delay) => tokio::time::sleep(delay).await,
                        Err(_) => {
                            return Err(ChannelError::Connection(format!(
                                "could not create channel after {} attempts: {error}",
                                self.config.create_attempts
                            )))
                        }
                    }
                }
            }
        }
    }

    async fn try_create(&self, url: &Url) -> Result<Url, ChannelError> {
        let response = self
            .http
            .post(url.clone())
            .header(TRACKING_HEADER, &self.receiver_id)
            .send()
            .await?;

        let status = response.status();
        if !(status == StatusCode::OK || status == StatusCode::CREATED) {
            return Err(ChannelError::Connection(format!(
                "channel creation rejected with status {status}"
            )));
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ChannelError::Connection("channel creation response lacks Location header".into())
            })?;
        Url::parse(location).map_err(|e| {
            ChannelError::Connection(format!("broker returned invalid channel URL: {e}"))
        })
    }

    /// Deletes the channel resource. Idempotent: an already-absent channel
    /// is success.
    pub async fn delete_channel(&self, channel_url: &Url) -> Result<(), ChannelError> {
        let response = self.http.delete(channel_url.clone()).send().await?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!(%channel_url, "deleted remote channel");
                Ok(())
            }
            status => Err(ChannelError::Connection(format!(
                "channel deletion rejected with status {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(broker_url: &str) -> ChannelLifecycleClient {
        ChannelLifecycleClient::new(
            reqwest::Client::new(),
            LongPollConfig {
                broker_url: broker_url.to_string(),
                ..Default::default()
            },
            "receiver-1".to_string(),
        )
    }

    #[test]
    fn test_create_url_includes_channel_id() {
        let url = client("http://broker.example:8080/bounceproxy/")
            .create_url("vehicle-42")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://broker.example:8080/bounceproxy/channels/?ccid=vehicle-42"
        );
    }

    #[test]
    fn test_create_url_rejects_garbage_base() {
        let result = client("not a url").create_url("x");
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
    }
}
