//! HTTP long-poll transport realization.
//!
//! Instead of a persistent socket, this transport holds a GET request open
//! against the channel's polling URL; the broker answers when a message
//! arrives or its own timeout elapses, and the loop immediately re-polls.
//! Connecting means creating the channel resource on the broker (see
//! [`ChannelLifecycleClient`]) and announcing its URL to the
//! [`ChannelUrlDirectory`].
//!
//! Suspension aborts the in-flight poll request: whatever that request
//! would have returned stays buffered on the broker or is lost, depending
//! on the broker's redelivery behavior. Delivery during suspension is
//! at-most-once by design of the gate check.
//!
//! A broker response indicating the channel resource vanished (it expired,
//! or the broker restarted) surfaces as
//! [`ChannelError::RemoteChannelMissing`], which sends the supervisor back
//! through `connect` and thus re-creates the channel from scratch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;
use validator::Validate;

use crate::config::{ChannelConfig, LongPollConfig};
use crate::directory::ChannelUrlDirectory;
use crate::error::ChannelError;
use crate::gate::SuspendGate;
use crate::lifecycle::{ChannelLifecycleClient, TRACKING_HEADER};
use crate::message::{DeliveryEvent, DeliveryMode, DeliveryQueue, InboundMessage, OutboundMessage};
use crate::session::{Transport, TransportSession};

/// Extra slack on top of the broker-side poll timeout before the client
/// gives up on a poll request.
const POLL_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Header carrying a publish's remaining time to live in milliseconds.
const TTL_HEADER: &str = "x-message-ttl-ms";

/// Long-poll transport factory.
pub struct LongPollTransport {
    channel: ChannelConfig,
    config: LongPollConfig,
    http: reqwest::Client,
    directory: Arc<dyn ChannelUrlDirectory>,
    receiver_id: String,
}

impl LongPollTransport {
    /// Creates a transport from validated configuration.
    pub fn new(
        channel: ChannelConfig,
        config: LongPollConfig,
        directory: Arc<dyn ChannelUrlDirectory>,
    ) -> Result<Self, ChannelError> {
        channel.validate()?;
        config.validate()?;
        let receiver_id = config.effective_receiver_id();
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            channel,
            config,
            http,
            directory,
            receiver_id,
        })
    }
}

#[async_trait]
impl Transport for LongPollTransport {
    type Session = LongPollSession;

    async fn open(&self) -> Result<Self::Session, ChannelError> {
        Ok(LongPollSession {
            channel_id: self.channel.channel_id.clone(),
            receiver_id: self.receiver_id.clone(),
            max_payload_bytes: self.channel.max_payload_bytes,
            config: self.config.clone(),
            http: self.http.clone(),
            lifecycle: ChannelLifecycleClient::new(
                self.http.clone(),
                self.config.clone(),
                self.receiver_id.clone(),
            ),
            directory: Arc::clone(&self.directory),
            channel_url: RwLock::new(None),
            send_lock: Mutex::new(()),
        })
    }
}

/// One long-poll attachment: a created channel resource plus its poll loop.
pub struct LongPollSession {
    channel_id: String,
    receiver_id: String,
    max_payload_bytes: usize,
    config: LongPollConfig,
    http: reqwest::Client,
    lifecycle: ChannelLifecycleClient,
    directory: Arc<dyn ChannelUrlDirectory>,
    /// Polling URL returned by channel creation; cleared when the broker
    /// reports the resource gone.
    channel_url: RwLock<Option<Url>>,
    /// Serializes outbound posts so messages leave in publish order.
    send_lock: Mutex<()>,
}

/// Builds the URL messages for `topic` are posted to.
fn message_url(broker_url: &str, topic: &str) -> Result<Url, ChannelError> {
    let base = Url::parse(broker_url)
        .map_err(|e| ChannelError::InvalidConfig(format!("broker URL: {e}")))?;
    base.join(&format!("channels/{topic}/message"))
        .map_err(|e| ChannelError::InvalidConfig(format!("message URL: {e}")))
}

/// What one poll cycle produced.
enum Poll {
    Payload(Bytes),
    Empty,
}

#[async_trait]
impl TransportSession for LongPollSession {
    async fn connect(&self) -> Result<(), ChannelError> {
        let url = self.lifecycle.create_channel(&self.channel_id).await?;
        self.directory
            .register_channel_url(&self.channel_id, &url)
            .await?;
        *self.channel_url.write().await = Some(url);
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        if message.is_expired() {
            return Err(ChannelError::Expired);
        }
        let size = message.payload.len();
        if size > self.max_payload_bytes {
            return Err(ChannelError::OversizedPayload {
                size,
                max: self.max_payload_bytes,
            });
        }

        let url = message_url(&self.config.broker_url, &message.topic)?;
        let mut request = self
            .http
            .post(url)
            .header(TRACKING_HEADER, &self.receiver_id)
            .body(message.payload.clone());
        if let Some(ttl) = message.remaining_ttl() {
            request = request.header(TTL_HEADER, ttl.as_millis().to_string());
        }

        let _ordered = self.send_lock.lock().await;
        let response = request.send().await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                trace!(topic = %message.topic, size, "posted message");
                Ok(())
            }
            StatusCode::GONE => Err(ChannelError::Expired),
            StatusCode::NOT_FOUND => Err(ChannelError::RemoteChannelMissing),
            status => Err(ChannelError::Connection(format!(
                "message post rejected with status {status}"
            ))),
        }
    }

    async fn subscribe(&self, topic: &str, _mode: DeliveryMode) -> Result<(), ChannelError> {
        // The channel resource itself is the only stream a long-poll
        // consumer has; topic filtering happens broker-side.
        debug!(topic, "subscription recorded, long-poll delivers the whole channel stream");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ChannelError> {
        debug!(topic, "unsubscription recorded");
        Ok(())
    }

    async fn run(
        &self,
        gate: SuspendGate,
        queue: DeliveryQueue,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            // Gate check at the top of every iteration: while suspended no
            // poll request is even started.
            if !gate.is_open() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = gate.wait_open() => {}
                }
                continue;
            }

            let url = match self.channel_url.read().await.clone() {
                Some(url) => url,
                None => return Err(ChannelError::NotConnected),
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                // Suspension aborts the in-flight poll; whatever it would
                // have delivered is not queued for later.
                _ = gate.wait_closed() => {
                    trace!(channel = %self.channel_id, "poll aborted by suspension");
                    continue;
                }
                result = self.poll_once(&url) => match result {
                    Ok(Poll::Payload(payload)) => {
                        queue
                            .push(DeliveryEvent::Message(InboundMessage {
                                topic: self.channel_id.clone(),
                                payload,
                            }))
                            .await;
                    }
                    Ok(Poll::Empty) => {}
                    Err(error @ ChannelError::RemoteChannelMissing) => {
                        self.channel_url.write().await.take();
                        return Err(error);
                    }
                    Err(ChannelError::Connection(reason)) => {
                        // The broker answered but is unhappy; wait out the
                        // retry interval and poll again.
                        warn!(channel = %self.channel_id, reason, "poll rejected, retrying");
                        let delay = Duration::from_millis(self.config.poll_retry_interval_ms);
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    Err(error) => return Err(error),
                },
            }
        }
    }

    async fn close(&self) {
        let url = self.channel_url.write().await.take();
        if let Some(url) = url {
            if let Err(error) = self.lifecycle.delete_channel(&url).await {
                debug!(channel = %self.channel_id, %error, "channel deletion failed");
            }
            if let Err(error) = self.directory.unregister_channel_url(&self.channel_id).await {
                debug!(channel = %self.channel_id, %error, "directory unregistration failed");
            }
        }
    }
}

impl LongPollSession {
    /// Issues one poll request and interprets the broker's answer.
    async fn poll_once(&self, url: &Url) -> Result<Poll, ChannelError> {
        let timeout =
            Duration::from_secs(self.config.poll_timeout_secs + POLL_TIMEOUT_MARGIN_SECS);
        let result = self
            .http
            .get(url.clone())
            .header(TRACKING_HEADER, &self.receiver_id)
            .timeout(timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            // An expired poll is the normal idle cycle, not a failure.
            Err(error) if error.is_timeout() => return Ok(Poll::Empty),
            Err(error) => return Err(error.into()),
        };

        match response.status() {
            StatusCode::OK => {
                let payload = response.bytes().await?;
                if payload.is_empty() {
                    Ok(Poll::Empty)
                } else {
                    Ok(Poll::Payload(payload))
                }
            }
            StatusCode::NO_CONTENT => Ok(Poll::Empty),
            StatusCode::NOT_FOUND => Err(ChannelError::RemoteChannelMissing),
            StatusCode::BAD_REQUEST => {
                // The broker reports an unknown channel as a structured
                // error body rather than a 404.
                let body = response.text().await.unwrap_or_default();
                if body.contains("CHANNELNOTFOUND") {
                    Err(ChannelError::RemoteChannelMissing)
                } else {
                    Err(ChannelError::Connection(format!("poll rejected: {body}")))
                }
            }
            status => Err(ChannelError::Connection(format!(
                "poll failed with status {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::NoopDirectory;

    fn transport() -> LongPollTransport {
        LongPollTransport::new(
            ChannelConfig {
                channel_id: "vehicle-42".into(),
                max_payload_bytes: 256,
                ..Default::default()
            },
            LongPollConfig {
                broker_url: "http://broker.example:8080/bounceproxy/".into(),
                ..Default::default()
            },
            Arc::new(NoopDirectory),
        )
        .unwrap()
    }

    #[test]
    fn test_message_url_layout() {
        let url = message_url("http://broker.example:8080/bounceproxy/", "vehicle-42").unwrap();
        assert_eq!(
            url.as_str(),
            "http://broker.example:8080/bounceproxy/channels/vehicle-42/message"
        );
    }

    #[tokio::test]
    async fn test_publish_rejects_oversized_before_any_request() {
        let session = transport().open().await.unwrap();
        let message = OutboundMessage::new("vehicle-42", vec![0u8; 512]);
        assert!(matches!(
            session.publish(&message).await,
            Err(ChannelError::OversizedPayload { size: 512, max: 256 })
        ));
    }

    #[tokio::test]
    async fn test_publish_rejects_expired_before_any_request() {
        let session = transport().open().await.unwrap();
        let message = OutboundMessage {
            expires_at: Some(std::time::Instant::now() - Duration::from_millis(1)),
            ..OutboundMessage::new("vehicle-42", "late")
        };
        assert!(matches!(
            session.publish(&message).await,
            Err(ChannelError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_is_local_noop() {
        let session = transport().open().await.unwrap();
        assert!(session.subscribe("t", DeliveryMode::Guaranteed).await.is_ok());
        assert!(session.unsubscribe("t").await.is_ok());
    }

    #[tokio::test]
    async fn test_run_without_channel_url_reports_not_connected() {
        let session = transport().open().await.unwrap();
        let result = session
            .run(
                SuspendGate::new(),
                DeliveryQueue::new(&Default::default()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    // Raw-TCP fixtures answering every request with one canned response.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn fixture() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        (listener, base)
    }

    fn serve(listener: TcpListener, response: String) {
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let mut seen = Vec::new();
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                seen.extend_from_slice(&buf[..n]);
                                if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
    }

    fn transport_for(base: &str) -> LongPollTransport {
        LongPollTransport::new(
            ChannelConfig {
                channel_id: "vehicle-42".into(),
                max_payload_bytes: 256,
                ..Default::default()
            },
            LongPollConfig {
                broker_url: base.to_string(),
                poll_timeout_secs: 1,
                ..Default::default()
            },
            Arc::new(NoopDirectory),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_parses_channel_url_from_location() {
        let (listener, base) = fixture().await;
        let channel_url = format!("{base}channels/vehicle-42/");
        serve(
            listener,
            format!(
                "HTTP/1.1 201 Created\r\nLocation: {channel_url}\r\n\
                 Content-Length: 0\r\nConnection: close\r\n\r\n"
            ),
        );

        let session = transport_for(&base).open().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(
            session.channel_url.read().await.as_ref().unwrap().as_str(),
            channel_url
        );
    }

    #[tokio::test]
    async fn test_poll_delivers_payload() {
        let (listener, base) = fixture().await;
        serve(
            listener,
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello".into(),
        );

        let session = transport_for(&base).open().await.unwrap();
        let url = Url::parse(&format!("{base}channels/vehicle-42/")).unwrap();
        match session.poll_once(&url).await.unwrap() {
            Poll::Payload(payload) => assert_eq!(payload, "hello"),
            Poll::Empty => panic!("expected a payload"),
        }
    }

    #[tokio::test]
    async fn test_poll_missing_channel_is_reported() {
        let (listener, base) = fixture().await;
        serve(
            listener,
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into(),
        );

        let session = transport_for(&base).open().await.unwrap();
        let url = Url::parse(&format!("{base}channels/vehicle-42/")).unwrap();
        assert!(matches!(
            session.poll_once(&url).await,
            Err(ChannelError::RemoteChannelMissing)
        ));
    }

    #[tokio::test]
    async fn test_poll_channel_missing_error_body() {
        let (listener, base) = fixture().await;
        let body = r#"{"error":"CHANNELNOTFOUND"}"#;
        serve(
            listener,
            format!(
                "HTTP/1.1 400 Bad Request\r\nContent-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            ),
        );

        let session = transport_for(&base).open().await.unwrap();
        let url = Url::parse(&format!("{base}channels/vehicle-42/")).unwrap();
        assert!(matches!(
            session.poll_once(&url).await,
            Err(ChannelError::RemoteChannelMissing)
        ));
    }

    #[tokio::test]
    async fn test_suspension_aborts_inflight_poll() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (listener, base) = fixture().await;
        // Hold every poll open without answering, counting the requests.
        let polls = Arc::new(AtomicUsize::new(0));
        {
            let polls = Arc::clone(&polls);
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    polls.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
                    });
                }
            });
        }

        let session = Arc::new(transport_for(&base).open().await.unwrap());
        *session.channel_url.write().await =
            Some(Url::parse(&format!("{base}channels/vehicle-42/")).unwrap());

        let gate = SuspendGate::new();
        let queue = DeliveryQueue::new(&Default::default());
        let cancel = CancellationToken::new();
        let runner = {
            let session = Arc::clone(&session);
            let (gate, queue, cancel) = (gate.clone(), queue.clone(), cancel.clone());
            tokio::spawn(async move { session.run(gate, queue, cancel).await })
        };

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while polls.load(Ordering::SeqCst) < 1 {
            assert!(std::time::Instant::now() < deadline, "poll never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Suspend with the poll held open: the request is abandoned.
        gate.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        // Resuming issues a fresh request; the loop could only get here
        // by abandoning the first one.
        gate.open();
        while polls.load(Ordering::SeqCst) < 2 {
            assert!(std::time::Instant::now() < deadline, "no re-poll after resume");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Nothing the aborted poll might have carried was queued.
        assert!(queue.is_empty());

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_remote_expiry_maps_to_expired() {
        let (listener, base) = fixture().await;
        serve(
            listener,
            "HTTP/1.1 410 Gone\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into(),
        );

        let session = transport_for(&base).open().await.unwrap();
        let message = OutboundMessage::new("peer-7", "payload");
        assert!(matches!(
            session.publish(&message).await,
            Err(ChannelError::Expired)
        ));
    }
}
