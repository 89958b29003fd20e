//! Persistent-socket transport realization over MQTT.
//!
//! [`MqttTransport`] produces one [`MqttSession`] per connect attempt. The
//! session wraps a `rumqttc` client/event-loop pair: the handshake polls
//! the event loop until the broker acknowledges the connection, and the
//! receive loop then keeps polling to drive keep-alives, acknowledgements
//! and inbound publishes. Connection-level failures are returned to the
//! supervisor for classification and retry; this module never retries on
//! its own.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{ChannelConfig, SocketConfig};
use crate::error::ChannelError;
use crate::gate::SuspendGate;
use crate::message::{DeliveryEvent, DeliveryMode, DeliveryQueue, InboundMessage, OutboundMessage};
use crate::session::{Transport, TransportSession};
use validator::Validate;

/// MQTT transport factory.
pub struct MqttTransport {
    channel: ChannelConfig,
    socket: SocketConfig,
}

impl MqttTransport {
    /// Creates a transport from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error when either config violates its declared
    /// constraints.
    pub fn new(channel: ChannelConfig, socket: SocketConfig) -> Result<Self, ChannelError> {
        channel.validate()?;
        socket.validate()?;
        Ok(Self { channel, socket })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Session = MqttSession;

    async fn open(&self) -> Result<Self::Session, ChannelError> {
        let client_id = self.socket.effective_client_id();
        let mut options = MqttOptions::new(&client_id, &self.socket.host, self.socket.port);
        options.set_keep_alive(Duration::from_secs(self.channel.keep_alive_secs));
        options.set_clean_session(self.channel.clean_session);
        options.set_max_packet_size(self.channel.max_payload_bytes, self.channel.max_payload_bytes);

        debug!(
            client_id,
            host = %self.socket.host,
            port = self.socket.port,
            "opening MQTT session"
        );
        let (client, event_loop) =
            AsyncClient::new(options, self.socket.request_channel_capacity);
        Ok(MqttSession {
            client,
            event_loop: Mutex::new(event_loop),
            max_payload_bytes: self.channel.max_payload_bytes,
        })
    }
}

/// One MQTT client/event-loop pair, valid for a single attachment.
pub struct MqttSession {
    client: AsyncClient,
    /// The event loop must be polled from exactly one place at a time;
    /// `connect` and `run` take turns through this lock.
    event_loop: Mutex<EventLoop>,
    max_payload_bytes: usize,
}

fn qos_for(mode: DeliveryMode) -> QoS {
    match mode {
        DeliveryMode::BestEffort => QoS::AtMostOnce,
        DeliveryMode::Guaranteed => QoS::AtLeastOnce,
    }
}

#[async_trait]
impl TransportSession for MqttSession {
    async fn connect(&self) -> Result<(), ChannelError> {
        let mut event_loop = self.event_loop.lock().await;
        loop {
            match event_loop.poll().await {
                // rumqttc surfaces a refused CONNACK as a connection error,
                // so reaching the ack means the broker accepted us.
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(error) => return Err(error.into()),
            }
        }
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

        self.client
            .publish(
                &message.topic,
                qos_for(message.mode),
                false,
                message.payload.to_vec(),
            )
            .await?;
        trace!(topic = %message.topic, size, "published message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, mode: DeliveryMode) -> Result<(), ChannelError> {
        self.client.subscribe(topic, qos_for(mode)).await?;
        debug!(topic, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ChannelError> {
        self.client.unsubscribe(topic).await?;
        debug!(topic, "unsubscribed");
        Ok(())
    }

    async fn run(
        &self,
        gate: SuspendGate,
        queue: DeliveryQueue,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError> {
        let mut event_loop = self.event_loop.lock().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if gate.is_open() {
                            queue
                                .push(DeliveryEvent::Message(InboundMessage {
                                    topic: publish.topic,
                                    payload: publish.payload,
                                }))
                                .await;
                        } else {
                            trace!(topic = %publish.topic, "dropping message while suspended");
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => return Ok(()),
                    Ok(_) => {}
                    Err(error) => return Err(error.into()),
                },
            }
        }
    }

    async fn close(&self) {
        if let Err(error) = self.client.disconnect().await {
            debug!(%error, "disconnect on close failed");
        }
    }
}
