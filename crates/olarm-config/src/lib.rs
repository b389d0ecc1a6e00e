//! Configuration for the olarm CLI.
//!
//! TOML profiles (figment + `OLARM_` env overrides), credential
//! resolution and persistent `CredentialStore` implementations, plus the
//! translation of a profile into `olarm_core::SessionConfig`.

pub mod credentials;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use olarm_api::{TlsMode, TransportConfig};
use olarm_core::{
    Credential, CredentialStore, DeviceId, MAX_DEVICES_PER_ACCOUNT, MemoryCredentialStore,
    SessionConfig,
};

pub use credentials::{FileCredentialStore, KeyringCredentialStore};

/// Environment variable holding a refresh token that overrides any stored credential.
pub const REFRESH_TOKEN_ENV: &str = "OLARM_REFRESH_TOKEN";

const ENV_PREFIX: &str = "OLARM_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("credential encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] olarm_core::CoreError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Resolve `name`, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::UnknownProfile { name }),
        }
    }
}

/// Where a profile persists its credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    Keyring,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds before expiry at which the access token is refreshed.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin: u64,

    #[serde(default)]
    pub credential_store: CredentialBackend,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            refresh_margin: default_refresh_margin(),
            credential_store: CredentialBackend::default(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_refresh_margin() -> u64 {
    60
}

/// A named account profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Olarm account user id.
    pub user_id: String,

    pub api_base: Option<String>,
    pub token_url: Option<String>,
    pub client_id: Option<String>,

    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub broker_path: Option<String>,
    pub client_id_prefix: Option<String>,

    /// Track only these device ids.
    pub devices: Option<Vec<String>>,

    pub timeout: Option<u64>,
    pub refresh_margin: Option<u64>,
    pub subscribe_timeout: Option<u64>,
    pub backoff_initial: Option<u64>,
    pub backoff_max: Option<u64>,

    pub credential_store: Option<CredentialBackend>,

    /// Path to a custom CA certificate for the REST endpoints.
    pub ca_cert: Option<PathBuf>,
}

impl Profile {
    pub fn backend(&self, defaults: &Defaults) -> CredentialBackend {
        self.credential_store.unwrap_or(defaults.credential_store)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "olarm", "olarm")
}

fn home_fallback(sub: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(sub).join("olarm")
}

pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Platform data directory, home of the file credential store.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── Load / save ─────────────────────────────────────────────────────

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then the TOML file at `path` (if any), then `OLARM_*` env vars.
/// Nested keys use a double underscore: `OLARM_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(config)
}

pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    })
}

pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    save_config_to(config, &config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| invalid(field, format!("'{raw}' is not a valid URL: {e}")))
}

/// Validate `profile` and build the engine's `SessionConfig`.
pub fn profile_to_session_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    if profile.user_id.trim().is_empty() {
        return Err(invalid("user_id", "must not be empty"));
    }

    let mut config = SessionConfig::new(profile.user_id.trim())?;

    if let Some(ref raw) = profile.api_base {
        config.api_base = parse_url("api_base", raw)?;
    }
    if let Some(ref raw) = profile.token_url {
        config.token_url = parse_url("token_url", raw)?;
    }
    if let Some(ref id) = profile.client_id {
        config.client_id.clone_from(id);
    }

    if let Some(ref host) = profile.broker_host {
        config.mqtt.host.clone_from(host);
    }
    if let Some(port) = profile.broker_port {
        config.mqtt.port = port;
    }
    if let Some(ref path) = profile.broker_path {
        config.mqtt.path.clone_from(path);
    }
    if let Some(ref prefix) = profile.client_id_prefix {
        config.mqtt.client_id_prefix.clone_from(prefix);
    }

    if let Some(ref devices) = profile.devices {
        if devices.len() > MAX_DEVICES_PER_ACCOUNT {
            return Err(invalid(
                "devices",
                format!("at most {MAX_DEVICES_PER_ACCOUNT} devices per account"),
            ));
        }
        config.device_filter = Some(devices.iter().map(|d| DeviceId::from(d.as_str())).collect());
    }

    config.http_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.refresh_margin =
        Duration::from_secs(profile.refresh_margin.unwrap_or(defaults.refresh_margin));
    if let Some(secs) = profile.subscribe_timeout {
        config.subscribe_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.backoff_initial {
        config.backoff.initial = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.backoff_max {
        config.backoff.max = Duration::from_secs(secs);
    }

    config.validate()?;
    Ok(config)
}

pub fn transport_config(profile: &Profile, defaults: &Defaults) -> TransportConfig {
    TransportConfig {
        tls: profile
            .ca_cert
            .clone()
            .map_or(TlsMode::System, TlsMode::CustomCa),
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// The persistent store a profile is configured to use.
pub fn persistent_store(
    profile_name: &str,
    profile: &Profile,
    defaults: &Defaults,
) -> Result<Arc<dyn CredentialStore>, ConfigError> {
    Ok(match profile.backend(defaults) {
        CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new(profile_name)?),
        CredentialBackend::File => Arc::new(FileCredentialStore::for_profile(profile_name)),
    })
}

pub fn refresh_token_from_env() -> Option<SecretString> {
    std::env::var(REFRESH_TOKEN_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

/// Pick the credential source for a session.
///
/// A refresh token from the environment wins and lives only in memory, so
/// it never overwrites the persisted credential. Otherwise the persistent
/// store is used if it holds a credential.
pub fn resolve_credentials(
    profile_name: &str,
    env_token: Option<SecretString>,
    persistent: Arc<dyn CredentialStore>,
) -> Result<Arc<dyn CredentialStore>, ConfigError> {
    if let Some(token) = env_token {
        tracing::debug!(profile = profile_name, "using refresh token from environment");
        return Ok(Arc::new(MemoryCredentialStore::new(Some(
            Credential::from_refresh_token(token),
        ))));
    }
    if persistent.load()?.is_some() {
        return Ok(persistent);
    }
    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}
