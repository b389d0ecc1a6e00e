// ── Message channel seam ──
//
// One multiplexed publish/subscribe connection per account. The engine
// talks to it only through `MessageChannel`; `MqttChannel` is the
// production implementation on top of olarm-api's MQTT transport.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, StreamExt};
use secrecy::SecretString;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use olarm_api::mqtt::{self, MqttConfig, MqttConnection, MqttEvent};

use crate::config::MqttSettings;
use crate::credential::Credential;
use crate::error::CoreError;
use crate::model::DeviceId;

// ── ChannelEvent ─────────────────────────────────────────────────────

/// One raw payload for one device, as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundPayload {
    pub device_id: DeviceId,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// One subscription request was acknowledged.
    SubscriptionAck { granted: bool },
    Payload(InboundPayload),
    /// The connection is gone. No further events follow.
    Closed { reason: String },
}

/// Inbound side of a connected channel. Backed by a bounded queue.
pub type InboundStream = BoxStream<'static, ChannelEvent>;

// ── MessageChannel ───────────────────────────────────────────────────

/// Transport used by the reconnect supervisor.
///
/// At most one connection is open at a time. Delivery is at-most-once and
/// per-device topic order is preserved.
pub trait MessageChannel: Send + Sync {
    /// Open the connection. The returned stream ends after `Closed`.
    fn connect<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<InboundStream, CoreError>>;

    fn subscribe<'a>(&'a self, device_id: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>>;

    fn unsubscribe<'a>(&'a self, device_id: &'a DeviceId)
    -> BoxFuture<'a, Result<(), CoreError>>;

    /// Publish a command payload to the device's control topic.
    fn publish<'a>(
        &'a self,
        device_id: &'a DeviceId,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Present a rotated credential to the live connection.
    ///
    /// Returns `Ok(false)` when the protocol has no in-place
    /// re-authentication; the caller then reconnects.
    fn reauthenticate<'a>(
        &'a self,
        _credential: &'a Credential,
    ) -> BoxFuture<'a, Result<bool, CoreError>> {
        Box::pin(async { Ok(false) })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()>;

    /// Whether `subscribe` is answered by a [`ChannelEvent::SubscriptionAck`].
    fn acknowledges_subscriptions(&self) -> bool {
        true
    }
}

// ── MqttChannel ──────────────────────────────────────────────────────

/// [`MessageChannel`] over MQTT-on-WebSocket.
pub struct MqttChannel {
    settings: MqttSettings,
    user_id: String,
    connection: Mutex<Option<MqttConnection>>,
}

impl MqttChannel {
    pub fn new(settings: MqttSettings, user_id: impl Into<String>) -> Self {
        Self {
            settings,
            user_id: user_id.into(),
            connection: Mutex::new(None),
        }
    }

    fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.settings.host.clone(),
            port: self.settings.port,
            path: self.settings.path.clone(),
            tls: self.settings.tls,
            username: self.settings.username.clone(),
            client_id: mqtt::client_id(&self.settings.client_id_prefix, &self.user_id),
            keep_alive: self.settings.keep_alive,
            connect_timeout: self.settings.connect_timeout,
            inbound_capacity: self.settings.inbound_capacity,
        }
    }
}

impl MessageChannel for MqttChannel {
    fn connect<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<InboundStream, CoreError>> {
        Box::pin(async move {
            let mut guard = self.connection.lock().await;
            if let Some(mut previous) = guard.take() {
                previous.disconnect().await;
            }

            let config = self.mqtt_config();
            let token: &SecretString = credential.access_token();
            let (connection, events) = MqttConnection::connect(&config, token)
                .await
                .map_err(|e| CoreError::channel(e.to_string()))?;
            *guard = Some(connection);

            let stream = ReceiverStream::new(events)
                .filter_map(|event| async move { translate(event) })
                .boxed();
            Ok(stream)
        })
    }

    fn subscribe<'a>(&'a self, device_id: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>> {
        let topic = mqtt::state_topic(device_id.as_str());
        Box::pin(async move {
            let guard = self.connection.lock().await;
            let connection = guard.as_ref().ok_or_else(not_connected)?;
            connection.subscribe(&topic).await?;
            Ok(())
        })
    }

    fn unsubscribe<'a>(
        &'a self,
        device_id: &'a DeviceId,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        let topic = mqtt::state_topic(device_id.as_str());
        Box::pin(async move {
            let guard = self.connection.lock().await;
            let connection = guard.as_ref().ok_or_else(not_connected)?;
            connection.unsubscribe(&topic).await?;
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        device_id: &'a DeviceId,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        let topic = mqtt::control_topic(device_id.as_str());
        Box::pin(async move {
            let guard = self.connection.lock().await;
            let connection = guard.as_ref().ok_or_else(not_connected)?;
            connection.publish(&topic, payload).await?;
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut connection) = self.connection.lock().await.take() {
                connection.disconnect().await;
            }
        })
    }
}

fn not_connected() -> CoreError {
    CoreError::channel("not connected")
}

/// Map a transport event onto the engine's view. Messages on topics that
/// are not device state topics are dropped.
fn translate(event: MqttEvent) -> Option<ChannelEvent> {
    match event {
        MqttEvent::Connected => None,
        MqttEvent::Subscribed { granted } => Some(ChannelEvent::SubscriptionAck { granted }),
        MqttEvent::Message {
            topic,
            payload,
            received_at,
        } => {
            let Some(device_id) = mqtt::device_id_from_topic(&topic) else {
                debug!(%topic, "ignoring message on foreign topic");
                return None;
            };
            Some(ChannelEvent::Payload(InboundPayload {
                device_id: DeviceId::from(device_id),
                payload,
                received_at,
            }))
        }
        MqttEvent::Closed { reason } => Some(ChannelEvent::Closed { reason }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn translate_maps_state_topics_to_devices() {
        let event = translate(MqttEvent::Message {
            topic: "so/app/v1/gen1-001".into(),
            payload: Bytes::from_static(b"{}"),
            received_at: Utc::now(),
        });
        match event.unwrap() {
            ChannelEvent::Payload(p) => assert_eq!(p.device_id.as_str(), "gen1-001"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn translate_drops_connack_and_foreign_topics() {
        assert!(translate(MqttEvent::Connected).is_none());
        assert!(
            translate(MqttEvent::Message {
                topic: "si/app/v2/gen1-001/control".into(),
                payload: Bytes::new(),
                received_at: Utc::now(),
            })
            .is_none()
        );
    }

    #[tokio::test]
    async fn operations_before_connect_are_channel_errors() {
        let channel = MqttChannel::new(MqttSettings::default(), "user-1");
        let err = channel.subscribe(&DeviceId::from("gen1-001")).await.unwrap_err();
        assert!(matches!(err, CoreError::ChannelError { .. }));
        assert!(channel.acknowledges_subscriptions());
    }

    #[test]
    fn mqtt_config_gets_fresh_client_id() {
        let channel = MqttChannel::new(MqttSettings::default(), "user-1");
        let a = channel.mqtt_config();
        let b = channel.mqtt_config();
        assert!(a.client_id.starts_with("native-app-oauth-user-1-"));
        assert_ne!(a.client_id, b.client_id);
    }
}
