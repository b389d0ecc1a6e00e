use thiserror::Error;

/// Top-level error type for the `olarm-api` crate.
///
/// Covers every failure mode across the three cloud surfaces:
/// the OAuth2 token endpoint, the device REST API and the MQTT push channel.
/// `olarm-core` maps these into its session-level taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The token endpoint or REST API rejected the presented credential.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The refresh token was revoked or is otherwise no longer valid.
    /// Only a fresh interactive authorization can recover from this.
    #[error("Refresh token rejected ({error}): {description}")]
    InvalidGrant { error: String, description: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request or handshake timed out.
    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success response from the REST API or token endpoint.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── MQTT ────────────────────────────────────────────────────────
    /// The broker refused or failed the connection handshake.
    #[error("MQTT connection failed: {0}")]
    MqttConnect(String),

    /// The connection dropped after it was established.
    #[error("MQTT connection closed: {0}")]
    MqttClosed(String),

    /// A subscribe/unsubscribe/publish request could not be queued.
    #[error("MQTT request failed: {0}")]
    MqttRequest(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the refresh token itself is dead and retrying
    /// cannot help.
    pub fn is_auth_revoked(&self) -> bool {
        matches!(self, Self::InvalidGrant { .. } | Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::MqttConnect(_) | Self::MqttClosed(_) | Self::MqttRequest(_) => true,
            _ => false,
        }
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::MqttRequest(err.to_string())
    }
}
