// ── Runtime session configuration ──
//
// Describes *how* to run a synchronization session: endpoints, broker
// settings and timing knobs. Never touches disk; the CLI (via
// olarm-config) builds a `SessionConfig` and hands it in.

use std::time::Duration;

use url::Url;

use crate::error::CoreError;
use crate::model::DeviceId;

/// Hard per-account device cap enforced by the cloud.
pub const MAX_DEVICES_PER_ACCOUNT: usize = 5;

pub const DEFAULT_API_BASE: &str = "https://api-legacy.olarm.com";
pub const DEFAULT_TOKEN_URL: &str = "https://auth.olarm.com/oauth/token";
pub const DEFAULT_CLIENT_ID: &str = "olarm-sync";

/// Reconnect and refresh-retry backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// First delay after a failure.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// A Live period at least this long resets the failure counter.
    pub reset_after: Duration,
    /// Fraction in `[0, 1]` subtracted at random from each delay.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            reset_after: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

/// Broker settings for the MQTT transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
    pub username: String,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// Capacity of the bounded inbound queue between transport and engine.
    pub inbound_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: olarm_api::mqtt::DEFAULT_BROKER_HOST.into(),
            port: olarm_api::mqtt::DEFAULT_BROKER_PORT,
            path: olarm_api::mqtt::DEFAULT_BROKER_PATH.into(),
            tls: true,
            username: olarm_api::mqtt::DEFAULT_USERNAME.into(),
            client_id_prefix: olarm_api::mqtt::DEFAULT_CLIENT_ID_PREFIX.into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            inbound_capacity: 256,
        }
    }
}

/// Everything a [`Session`](crate::Session) needs to run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the device REST API.
    pub api_base: Url,
    /// OAuth2 token endpoint.
    pub token_url: Url,
    pub client_id: String,
    /// Account user id, part of the MQTT client id.
    pub user_id: String,
    pub mqtt: MqttSettings,
    /// Refresh the access token once it has less than this left.
    pub refresh_margin: Duration,
    pub backoff: BackoffConfig,
    /// How long to wait for every SUBACK before giving up on a connection.
    pub subscribe_timeout: Duration,
    pub max_devices: usize,
    /// Only track these devices. `None` tracks every listed device.
    pub device_filter: Option<Vec<DeviceId>>,
    pub http_timeout: Duration,
}

impl SessionConfig {
    /// Production endpoints and default timing for `user_id`.
    pub fn new(user_id: impl Into<String>) -> Result<Self, CoreError> {
        Ok(Self {
            api_base: parse_url(DEFAULT_API_BASE)?,
            token_url: parse_url(DEFAULT_TOKEN_URL)?,
            client_id: DEFAULT_CLIENT_ID.into(),
            user_id: user_id.into(),
            mqtt: MqttSettings::default(),
            refresh_margin: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            subscribe_timeout: Duration::from_secs(10),
            max_devices: MAX_DEVICES_PER_ACCOUNT,
            device_filter: None,
            http_timeout: Duration::from_secs(30),
        })
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_devices == 0 || self.max_devices > MAX_DEVICES_PER_ACCOUNT {
            return Err(config_error(format!(
                "max_devices must be between 1 and {MAX_DEVICES_PER_ACCOUNT}, got {}",
                self.max_devices
            )));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(config_error(format!(
                "backoff jitter must be within [0, 1], got {}",
                self.backoff.jitter
            )));
        }
        if self.backoff.initial.is_zero() || self.backoff.initial > self.backoff.max {
            return Err(config_error(
                "backoff initial delay must be non-zero and not exceed the maximum",
            ));
        }
        if self.mqtt.inbound_capacity == 0 {
            return Err(config_error("mqtt inbound_capacity must be at least 1"));
        }
        if self.mqtt.client_id_prefix.trim().is_empty() {
            return Err(config_error("mqtt client_id_prefix must not be empty"));
        }
        if self.user_id.trim().is_empty() {
            return Err(config_error("user_id is required"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> CoreError {
    CoreError::Config {
        message: message.into(),
    }
}

fn parse_url(raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| config_error(format!("invalid URL {raw}: {e}")))
}
