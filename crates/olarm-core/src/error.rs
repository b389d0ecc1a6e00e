// ── Core error types ──
//
// Session-level errors from olarm-core. Consumers never see HTTP status
// codes or MQTT client errors directly; the `From<olarm_api::Error>` impl
// folds transport failures into the taxonomy below.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Credential errors ────────────────────────────────────────────
    /// No usable credential, or the refresh token was revoked. Terminal
    /// for the session: only a fresh authorization recovers.
    #[error("Not authenticated: {reason}")]
    Unauthenticated { reason: String },

    /// The token refresh failed for a transient reason and will be retried.
    #[error("Token refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("Access token expired at {expired_at}")]
    CredentialExpired { expired_at: DateTime<Utc> },

    // ── Channel errors ───────────────────────────────────────────────
    #[error("Message channel error: {reason}")]
    ChannelError { reason: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device limit exceeded: an account supports at most {limit} devices")]
    DeviceLimitExceeded { limit: usize },

    #[error("Malformed payload for device {device_id}: {reason}")]
    MalformedPayload { device_id: String, reason: String },

    #[error("Payload for undeclared device {device_id}")]
    UnknownDevice { device_id: String },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation} (requires {required})")]
    Unsupported { operation: String, required: String },

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Device directory error: {message}")]
    Directory { message: String },

    #[error("Credential store error: {message}")]
    CredentialStore { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Session is closed")]
    SessionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors that require user action. Everything else is either
    /// recovered internally or local to one request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated { .. } | Self::DeviceLimitExceeded { .. }
        )
    }

    /// Errors the refresh loop and supervisor retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RefreshFailed { .. }
                | Self::ChannelError { .. }
                | Self::CredentialExpired { .. }
                | Self::Directory { .. }
        )
    }

    pub(crate) fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    pub(crate) fn channel(reason: impl Into<String>) -> Self {
        Self::ChannelError {
            reason: reason.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<olarm_api::Error> for CoreError {
    fn from(err: olarm_api::Error) -> Self {
        match err {
            olarm_api::Error::InvalidGrant { error, description } => CoreError::Unauthenticated {
                reason: format!("refresh token rejected ({error}): {description}"),
            },
            olarm_api::Error::Authentication { message } => {
                CoreError::Unauthenticated { reason: message }
            }
            olarm_api::Error::Transport(ref e) => CoreError::RefreshFailed {
                reason: e.to_string(),
            },
            olarm_api::Error::Timeout { timeout_secs } => CoreError::RefreshFailed {
                reason: format!("timed out after {timeout_secs}s"),
            },
            olarm_api::Error::Api { status, message } => CoreError::RefreshFailed {
                reason: format!("HTTP {status}: {message}"),
            },
            olarm_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            olarm_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            olarm_api::Error::MqttConnect(reason)
            | olarm_api::Error::MqttClosed(reason)
            | olarm_api::Error::MqttRequest(reason) => CoreError::ChannelError { reason },
            olarm_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
