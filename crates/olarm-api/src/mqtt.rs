//! MQTT push channel over secure WebSocket.
//!
//! Opens one broker connection per account and forwards everything the
//! broker sends through a bounded [`tokio::sync::mpsc`] queue. The pump
//! task awaits queue capacity before polling the broker again, so a slow
//! consumer applies backpressure instead of growing an unbounded buffer.
//!
//! Reconnection is deliberately *not* handled here: when the connection
//! drops the pump emits [`MqttEvent::Closed`] and exits. The caller owns
//! retry policy.
//!
//! # Example
//!
//! ```rust,ignore
//! use olarm_api::mqtt::{MqttConfig, MqttConnection, MqttEvent, state_topic};
//!
//! let (conn, mut events) = MqttConnection::connect(&MqttConfig::new("user-1"), &token).await?;
//! conn.subscribe(&state_topic("gen1-001")).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let MqttEvent::Message { topic, payload, .. } = event {
//!         println!("{topic}: {} bytes", payload.len());
//!     }
//! }
//! ```

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode, Transport};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

// ── Broker defaults ──────────────────────────────────────────────────

pub const DEFAULT_BROKER_HOST: &str = "mqtt-ws.olarm.com";
pub const DEFAULT_BROKER_PORT: u16 = 443;
pub const DEFAULT_BROKER_PATH: &str = "/mqtt";
pub const DEFAULT_USERNAME: &str = "native_app";
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "native-app-oauth";

/// Outstanding client requests (subscribe/publish) buffered by rumqttc.
const REQUEST_CAPACITY: usize = 32;

const STATE_TOPIC_PREFIX: &str = "so/app/v1/";

// ── Topics ───────────────────────────────────────────────────────────

/// Topic a communicator publishes its state on.
pub fn state_topic(device_id: &str) -> String {
    format!("{STATE_TOPIC_PREFIX}{device_id}")
}

/// Topic commands for a communicator are published to.
pub fn control_topic(device_id: &str) -> String {
    format!("si/app/v2/{device_id}/control")
}

/// Extract the device id from a state topic.
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(STATE_TOPIC_PREFIX)
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

// ── MqttConfig ───────────────────────────────────────────────────────

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket path on the broker host.
    pub path: String,
    /// `wss://` when true, plain `ws://` otherwise (local test brokers).
    pub tls: bool,
    pub username: String,
    /// Full client id. Must be unique per live connection on the account.
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// Capacity of the inbound event queue.
    pub inbound_capacity: usize,
}

impl MqttConfig {
    /// Defaults for the production broker with a fresh random client id.
    pub fn new(user_id: &str) -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.into(),
            port: DEFAULT_BROKER_PORT,
            path: DEFAULT_BROKER_PATH.into(),
            tls: true,
            username: DEFAULT_USERNAME.into(),
            client_id: client_id(DEFAULT_CLIENT_ID_PREFIX, user_id),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            inbound_capacity: 256,
        }
    }

    fn broker_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Build a client id of the form `<prefix>-<user>-<suffix>`.
///
/// The broker kicks an older connection that reuses a live client id, so
/// every connection attempt gets its own random suffix.
pub fn client_id(prefix: &str, user_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{user_id}-{}", &suffix[..8])
}

// ── MqttEvent ────────────────────────────────────────────────────────

/// Everything the pump task forwards to the consumer.
#[derive(Debug, Clone)]
pub enum MqttEvent {
    /// CONNACK received; the session is usable.
    Connected,
    /// SUBACK received for one subscribe request.
    Subscribed { granted: bool },
    /// An application message, stamped when the pump pulled it off the wire.
    Message {
        topic: String,
        payload: Bytes,
        received_at: DateTime<Utc>,
    },
    /// The connection is gone. Always the last event.
    Closed { reason: String },
}

// ── MqttConnection ───────────────────────────────────────────────────

/// Handle to one live broker connection.
///
/// Dropping the handle stops the pump task.
pub struct MqttConnection {
    client: AsyncClient,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl MqttConnection {
    /// Connect to the broker, authenticating with the access token as the
    /// MQTT password. Resolves once CONNACK arrives.
    pub async fn connect(
        config: &MqttConfig,
        access_token: &SecretString,
    ) -> Result<(Self, mpsc::Receiver<MqttEvent>), Error> {
        let mut options = MqttOptions::new(config.client_id.clone(), config.broker_url(), config.port);
        options.set_transport(if config.tls {
            Transport::wss_with_default_config()
        } else {
            Transport::Ws
        });
        options.set_credentials(config.username.clone(), access_token.expose_secret().to_owned());
        options.set_keep_alive(config.keep_alive.max(Duration::from_secs(5)));
        options.set_clean_session(true);

        tracing::info!(host = %config.host, client_id = %config.client_id, "connecting to MQTT broker");

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (event_tx, mut event_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump(eventloop, event_tx, cancel.clone()));

        let connection = Self {
            client,
            cancel,
            pump: Some(pump),
        };

        match tokio::time::timeout(config.connect_timeout, event_rx.recv()).await {
            Ok(Some(MqttEvent::Connected)) => {
                tracing::info!("MQTT connected");
                Ok((connection, event_rx))
            }
            Ok(Some(MqttEvent::Closed { reason })) => Err(Error::MqttConnect(reason)),
            Ok(Some(other)) => Err(Error::MqttConnect(format!(
                "unexpected event before CONNACK: {other:?}"
            ))),
            Ok(None) => Err(Error::MqttConnect("event loop ended before CONNACK".into())),
            Err(_) => Err(Error::Timeout {
                timeout_secs: config.connect_timeout.as_secs(),
            }),
        }
    }

    /// Queue a subscribe request. The matching [`MqttEvent::Subscribed`]
    /// arrives on the event queue.
    pub async fn subscribe(&self, topic: &str) -> Result<(), Error> {
        tracing::debug!(topic, "subscribing");
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        tracing::debug!(topic, "unsubscribing");
        self.client.unsubscribe(topic).await?;
        Ok(())
    }

    /// Publish at QoS 0 (at-most-once).
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
        tracing::debug!(topic, bytes = payload.len(), "publishing");
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Send DISCONNECT and stop the pump task.
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "disconnect request not queued");
        }
        // Give the pump a moment to flush DISCONNECT before stopping it.
        if let Some(handle) = self.pump.take() {
            let flushed = tokio::time::timeout(Duration::from_millis(500), handle).await;
            if flushed.is_err() {
                tracing::debug!("pump did not exit after DISCONNECT, cancelling");
            }
        }
        self.cancel.cancel();
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Pump task ────────────────────────────────────────────────────────

/// Poll the rumqttc event loop and forward interesting packets.
async fn pump(
    mut eventloop: EventLoop,
    event_tx: mpsc::Sender<MqttEvent>,
    cancel: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        let (event, last) = match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => (MqttEvent::Connected, false),
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                (MqttEvent::Subscribed { granted }, false)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => (
                MqttEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                    received_at: Utc::now(),
                },
                false,
            ),
            Ok(Event::Incoming(Packet::Disconnect)) => (
                MqttEvent::Closed {
                    reason: "broker sent DISCONNECT".into(),
                },
                true,
            ),
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => (
                MqttEvent::Closed {
                    reason: "client disconnected".into(),
                },
                true,
            ),
            Ok(_) => continue,
            Err(e) => (
                MqttEvent::Closed {
                    reason: e.to_string(),
                },
                true,
            ),
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = event_tx.send(event) => {
                if sent.is_err() {
                    // Receiver gone, nobody is listening any more.
                    break;
                }
            }
        }

        if last {
            break;
        }
    }

    tracing::debug!("MQTT pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_round_trip_device_id() {
        let topic = state_topic("gen1-001");
        assert_eq!(topic, "so/app/v1/gen1-001");
        assert_eq!(device_id_from_topic(&topic), Some("gen1-001"));
        assert_eq!(control_topic("gen1-001"), "si/app/v2/gen1-001/control");
    }

    #[test]
    fn foreign_topics_have_no_device() {
        assert_eq!(device_id_from_topic("so/app/v1/"), None);
        assert_eq!(device_id_from_topic("so/app/v1/a/b"), None);
        assert_eq!(device_id_from_topic("si/app/v2/a/control"), None);
    }

    #[test]
    fn client_ids_are_unique_per_attempt() {
        let a = client_id("native-app-oauth", "user-1");
        let b = client_id("native-app-oauth", "user-1");
        assert!(a.starts_with("native-app-oauth-user-1-"));
        assert_ne!(a, b);
    }

    #[test]
    fn broker_url_honours_tls_flag() {
        let mut config = MqttConfig::new("user-1");
        assert_eq!(config.broker_url(), "wss://mqtt-ws.olarm.com:443/mqtt");
        config.tls = false;
        config.host = "localhost".into();
        config.port = 9001;
        assert_eq!(config.broker_url(), "ws://localhost:9001/mqtt");
    }
}
