//! CLI configuration: thin wrapper around `olarm_config` plus the
//! production wiring that turns a profile into a running `Session`.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use olarm_api::{DeviceClient, TokenClient};
use olarm_core::{ApiTokenRefresher, MqttChannel, OlarmDirectory, Session, SessionConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use olarm_config::{Config, CredentialBackend, Defaults, Profile, config_path, save_config};

/// Load the config file, reporting parse errors instead of hiding them.
pub fn load() -> Result<Config, CliError> {
    Ok(olarm_config::load_config()?)
}

pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

pub fn available_profiles(config: &Config) -> String {
    let mut names: Vec<_> = config.profiles.keys().cloned().collect();
    names.sort();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

/// The active profile, or `ProfileNotFound` listing what exists.
pub fn active_profile<'a>(
    global: &GlobalOpts,
    config: &'a Config,
) -> Result<(String, &'a Profile), CliError> {
    let name = active_profile_name(global, config);
    match config.profiles.get(&name) {
        Some(profile) => Ok((name, profile)),
        None => Err(CliError::ProfileNotFound {
            available: available_profiles(config),
            name,
        }),
    }
}

/// `SessionConfig` for the active profile with CLI flag overrides applied.
pub fn session_config(
    global: &GlobalOpts,
    config: &Config,
    profile: &Profile,
) -> Result<SessionConfig, CliError> {
    let mut session = olarm_config::profile_to_session_config(profile, &config.defaults)?;
    if let Some(secs) = global.timeout {
        session.http_timeout = Duration::from_secs(secs);
    }
    Ok(session)
}

// ── Session wiring ──────────────────────────────────────────────────

/// Resolve credentials, build the production collaborators and start a session.
pub async fn open_session(global: &GlobalOpts) -> Result<Session, CliError> {
    let config = load()?;
    let (name, profile) = active_profile(global, &config)?;
    let session_config = session_config(global, &config, profile)?;

    let persistent = olarm_config::persistent_store(&name, profile, &config.defaults)?;
    let credentials = olarm_config::resolve_credentials(
        &name,
        olarm_config::refresh_token_from_env(),
        persistent,
    )?;

    let mut transport = olarm_config::transport_config(profile, &config.defaults);
    transport.timeout = session_config.http_timeout;
    let http = transport.build_client()?;

    let refresher = Arc::new(ApiTokenRefresher::new(TokenClient::with_client(
        http.clone(),
        session_config.token_url.clone(),
        session_config.client_id.clone(),
    )));
    let directory = Arc::new(OlarmDirectory::new(DeviceClient::with_client(
        http,
        session_config.api_base.clone(),
    )));
    let channel = Arc::new(MqttChannel::new(
        session_config.mqtt.clone(),
        session_config.user_id.clone(),
    ));

    tracing::debug!(profile = %name, user_id = %session_config.user_id, "starting session");
    let spinner = spinner(global, "Connecting to Olarm cloud...");
    // Start retries transient failures until the deadline.
    let deadline = session_config.http_timeout.saturating_mul(2);
    let result = tokio::time::timeout(
        deadline,
        Session::start(session_config, directory, channel, refresher, credentials),
    )
    .await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    match result {
        Ok(session) => Ok(session?),
        Err(_) => Err(CliError::Timeout {
            seconds: deadline.as_secs(),
        }),
    }
}

fn spinner(global: &GlobalOpts, message: &'static str) -> Option<ProgressBar> {
    if global.quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Some(bar)
}
