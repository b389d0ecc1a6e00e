//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use olarm_core::{ConnectionState, CoreError, Device, Session};

use crate::error::CliError;

/// Wait until the channel is live. Fails fast if the credential is revoked.
pub async fn wait_live(session: &Session, seconds: u64) -> Result<(), CliError> {
    let mut rx = session.connection_state();
    let reached = async move {
        rx.wait_for(|s| matches!(s, ConnectionState::Live | ConnectionState::Unauthenticated))
            .await
            .map(|state| *state)
    };

    match tokio::time::timeout(Duration::from_secs(seconds), reached).await {
        Ok(Ok(ConnectionState::Live)) => Ok(()),
        Ok(Ok(_)) => Err(CliError::AuthFailed {
            reason: "the refresh token was revoked".into(),
        }),
        Ok(Err(_)) => Err(CoreError::SessionClosed.into()),
        Err(_) => Err(CliError::Timeout { seconds }),
    }
}

/// Look up a device in the published snapshot.
pub fn find_device(session: &Session, id: &str) -> Result<Arc<Device>, CliError> {
    session
        .device(id)
        .ok_or_else(|| CliError::NotFound { device: id.into() })
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}
