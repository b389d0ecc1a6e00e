//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use olarm_config::ConfigError;
use olarm_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the Olarm cloud: {reason}")]
    #[diagnostic(
        code(olarm::connection_failed),
        help("Check your network connection and try again. Use -vv for details.")
    )]
    ConnectionFailed { reason: String },

    #[error("The push channel did not become live within {seconds}s")]
    #[diagnostic(
        code(olarm::timeout),
        help("Increase the wait with --wait, or check `olarm status`.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {reason}")]
    #[diagnostic(
        code(olarm::auth_failed),
        help("The refresh token was rejected or has been revoked.\nRun: olarm login")
    )]
    AuthFailed { reason: String },

    #[error("No credentials stored for profile '{profile}'")]
    #[diagnostic(
        code(olarm::no_credentials),
        help("Run: olarm login --profile {profile}\nOr set OLARM_REFRESH_TOKEN.")
    )]
    NoCredentials { profile: String },

    #[error("Credential store error: {message}")]
    #[diagnostic(
        code(olarm::credential_store),
        help("Set `credential_store = \"file\"` in the profile if no OS keyring is available.")
    )]
    CredentialStore { message: String },

    // ── Devices & commands ───────────────────────────────────────────
    #[error("Device '{device}' not found")]
    #[diagnostic(code(olarm::not_found), help("Run: olarm devices list"))]
    NotFound { device: String },

    #[error("The account lists more than {limit} devices")]
    #[diagnostic(
        code(olarm::device_limit),
        help("Restrict the profile with `devices = [\"...\"]` to at most {limit} ids.")
    )]
    DeviceLimit { limit: usize },

    #[error("Operation '{operation}' is not supported by this device")]
    #[diagnostic(code(olarm::unsupported), help("This command requires {required}."))]
    Unsupported { operation: String, required: String },

    #[error("Invalid command: {message}")]
    #[diagnostic(
        code(olarm::invalid_command),
        help("Indices are 1-based. Run: olarm devices get <device>")
    )]
    InvalidCommand { message: String },

    // ── Validation & configuration ───────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(olarm::validation))]
    Validation { field: String, reason: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(olarm::profile_not_found),
        help("Available profiles: {available}\nCreate one with: olarm config init")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration could not be loaded: {message}")]
    #[diagnostic(code(olarm::config), help("Check the file shown by `olarm config path`."))]
    ConfigLoad { message: String },

    #[error("Operation '{action}' requires confirmation")]
    #[diagnostic(
        code(olarm::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML output failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{message}")]
    #[diagnostic(code(olarm::internal))]
    Other { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::ConfigLoad { .. }
            | Self::DeviceLimit { .. }
            | Self::InvalidCommand { .. }
            | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError ────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unauthenticated { reason } => Self::AuthFailed { reason },
            CoreError::CredentialExpired { expired_at } => Self::AuthFailed {
                reason: format!("access token expired at {expired_at}"),
            },
            CoreError::RefreshFailed { reason } | CoreError::ChannelError { reason } => {
                Self::ConnectionFailed { reason }
            }
            CoreError::Directory { message } => Self::ConnectionFailed { reason: message },
            CoreError::DeviceLimitExceeded { limit } => Self::DeviceLimit { limit },
            CoreError::DeviceNotFound { device_id } | CoreError::UnknownDevice { device_id } => {
                Self::NotFound { device: device_id }
            }
            CoreError::Unsupported {
                operation,
                required,
            } => Self::Unsupported {
                operation,
                required,
            },
            CoreError::InvalidCommand { message } => Self::InvalidCommand { message },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::CredentialStore { message } => Self::CredentialStore { message },
            other @ (CoreError::MalformedPayload { .. }
            | CoreError::SessionClosed
            | CoreError::Internal(_)) => Self::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<olarm_api::Error> for CliError {
    fn from(err: olarm_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

// ── ConfigError → CliError ──────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            ConfigError::Keyring(e) => Self::CredentialStore {
                message: e.to_string(),
            },
            ConfigError::Io(e) => Self::Io(e),
            ConfigError::Core(e) => e.into(),
            other @ (ConfigError::Figment(_)
            | ConfigError::Serialization(_)
            | ConfigError::Json(_)) => Self::ConfigLoad {
                message: other.to_string(),
            },
        }
    }
}
