//! Channel URL directory seam.
//!
//! The long-poll realization announces each created channel URL to a
//! directory so remote peers can address this receiver. The directory is a
//! trait because deployments differ: some use a global discovery service,
//! some exchange URLs out of band. [`NoopDirectory`] serves the latter.

use async_trait::async_trait;
use url::Url;

use crate::error::ChannelError;

/// Registry mapping channel ids to the URLs they are reachable under.
#[async_trait]
pub trait ChannelUrlDirectory: Send + Sync + 'static {
    /// Announces that `channel_id` is now reachable at `url`.
    async fn register_channel_url(&self, channel_id: &str, url: &Url)
        -> Result<(), ChannelError>;

    /// Withdraws the announcement for `channel_id`.
    async fn unregister_channel_url(&self, channel_id: &str) -> Result<(), ChannelError>;
}

/// Directory that records nothing, for deployments where channel URLs are
/// exchanged out of band.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDirectory;

#[async_trait]
impl ChannelUrlDirectory for NoopDirectory {
    async fn register_channel_url(
        &self,
        _channel_id: &str,
        _url: &Url,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn unregister_channel_url(&self, _channel_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}
