//! `olarm login` / `olarm logout`.
//!
//! Login takes a refresh token obtained from the interactive authorization
//! flow, proves it with one grant and persists the resulting credential.

use std::io::BufRead;

use chrono::{TimeDelta, Utc};
use secrecy::SecretString;

use olarm_api::TokenClient;
use olarm_core::{ApiTokenRefresher, Credential, TokenRefresher};

use crate::cli::{GlobalOpts, LoginArgs};
use crate::config::{self, CredentialBackend};
use crate::error::CliError;
use crate::output;

fn read_refresh_token(from_stdin: bool) -> Result<SecretString, CliError> {
    let raw = if from_stdin {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        line
    } else {
        rpassword::prompt_password("Refresh token: ")?
    };

    let token = raw.trim();
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "refresh token".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(SecretString::from(token.to_owned()))
}

fn backend_label(backend: CredentialBackend) -> &'static str {
    match backend {
        CredentialBackend::Keyring => "system keyring",
        CredentialBackend::File => "credential file",
    }
}

pub async fn login(args: LoginArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load()?;
    let name = config::active_profile_name(global, &cfg);

    if let Some(user_id) = args.user_id {
        cfg.profiles
            .entry(name.clone())
            .or_default()
            .user_id = user_id;
        config::save_config(&cfg)?;
    }

    let (name, profile) = config::active_profile(global, &cfg)?;
    let session_config = config::session_config(global, &cfg, profile)?;
    let refresh_token = read_refresh_token(args.stdin)?;

    let mut transport = olarm_config::transport_config(profile, &cfg.defaults);
    transport.timeout = session_config.http_timeout;
    let refresher = ApiTokenRefresher::new(TokenClient::new(
        session_config.token_url.clone(),
        session_config.client_id.clone(),
        &transport,
    )?);

    let granted = refresher.refresh(&refresh_token).await?;
    let expires_at = Utc::now() + TimeDelta::from_std(granted.expires_in).unwrap_or(TimeDelta::MAX);
    let credential = Credential::new(
        granted.access_token,
        granted.refresh_token.unwrap_or(refresh_token),
        expires_at,
    );

    let store = olarm_config::persistent_store(&name, profile, &cfg.defaults)?;
    store.save(&credential)?;
    tracing::info!(profile = %name, "credential stored");

    output::print_output(
        &format!(
            "✓ Logged in as {} (profile '{name}', {})",
            session_config.user_id,
            backend_label(profile.backend(&cfg.defaults))
        ),
        global.quiet,
    );
    Ok(())
}

pub fn logout(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load()?;
    let (name, profile) = config::active_profile(global, &cfg)?;
    olarm_config::persistent_store(&name, profile, &cfg.defaults)?.clear()?;
    tracing::info!(profile = %name, "credential cleared");
    output::print_output(&format!("✓ Logged out of profile '{name}'"), global.quiet);
    Ok(())
}
