// ── Token lifecycle ──
//
// The TokenManager owns the one current credential. It refreshes
// proactively once the remaining lifetime drops below a margin, coalesces
// concurrent refreshes into one network call, persists every rotation and
// announces it on a watch channel so the supervisor can re-authenticate
// the live channel.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::TimeDelta;
use futures_util::future::BoxFuture;
use secrecy::SecretString;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use olarm_api::TokenClient;

use crate::backoff::Backoff;
use crate::config::BackoffConfig;
use crate::credential::{Clock, Credential, CredentialStore};
use crate::error::CoreError;

// ── TokenRefresher ───────────────────────────────────────────────────

/// Result of one refresh-token grant.
#[derive(Clone, Debug)]
pub struct RefreshedToken {
    pub access_token: SecretString,
    /// `None` when the server did not rotate the refresh token.
    pub refresh_token: Option<SecretString>,
    pub expires_in: Duration,
}

/// Exchanges a refresh token for a new access token.
///
/// Implementations report a revoked grant as
/// [`CoreError::Unauthenticated`]; anything else counts as transient.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<RefreshedToken, CoreError>>;
}

/// [`TokenRefresher`] backed by the OAuth2 token endpoint.
pub struct ApiTokenRefresher {
    client: TokenClient,
}

impl ApiTokenRefresher {
    pub fn new(client: TokenClient) -> Self {
        Self { client }
    }
}

impl TokenRefresher for ApiTokenRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<RefreshedToken, CoreError>> {
        Box::pin(async move {
            let resp = self.client.refresh(refresh_token).await?;
            Ok(RefreshedToken {
                access_token: resp.access_token,
                refresh_token: resp.refresh_token,
                expires_in: Duration::from_secs(resp.expires_in),
            })
        })
    }
}

// ── CredentialStatus ─────────────────────────────────────────────────

/// What the manager currently holds, as seen by watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Missing,
    Valid { version: u64 },
    /// The refresh token was rejected. Terminal for the session.
    Revoked,
}

// ── TokenManager ─────────────────────────────────────────────────────

pub struct TokenManager {
    current: ArcSwapOption<Credential>,
    status: watch::Sender<CredentialStatus>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    /// Build a manager seeded from `store`.
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        let initial = store.load()?;
        let status = match &initial {
            Some(c) => CredentialStatus::Valid {
                version: c.version(),
            },
            None => CredentialStatus::Missing,
        };
        let (status, _) = watch::channel(status);

        Ok(Self {
            current: ArcSwapOption::new(initial.map(Arc::new)),
            status,
            refresher,
            store,
            clock,
            refresh_lock: Mutex::new(()),
        })
    }

    /// The current credential, if it is still valid.
    pub fn current_credential(&self) -> Result<Arc<Credential>, CoreError> {
        if self.is_revoked() {
            return Err(CoreError::unauthenticated("refresh token was revoked"));
        }
        let credential = self
            .current
            .load_full()
            .ok_or_else(|| CoreError::unauthenticated("no credential available"))?;
        if credential.is_expired(self.clock.now()) {
            return Err(CoreError::CredentialExpired {
                expired_at: credential.expires_at(),
            });
        }
        Ok(credential)
    }

    /// Return a credential with more than `margin` left, refreshing first
    /// if needed. Makes a single refresh attempt.
    pub async fn ensure_fresh(&self, margin: Duration) -> Result<Arc<Credential>, CoreError> {
        if let Some(fresh) = self.fresh_enough(margin)? {
            return Ok(fresh);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited on the lock.
        if let Some(fresh) = self.fresh_enough(margin)? {
            return Ok(fresh);
        }

        let stale = self
            .current
            .load_full()
            .ok_or_else(|| CoreError::unauthenticated("no credential available"))?;

        debug!(version = stale.version(), "refreshing access token");

        match self.refresher.refresh(stale.refresh_token()).await {
            Ok(token) => Ok(self.install(&stale, token)),
            Err(CoreError::Unauthenticated { reason }) => {
                error!(%reason, "refresh token rejected, session needs re-authorization");
                self.revoke();
                Err(CoreError::Unauthenticated { reason })
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                Err(match e {
                    e @ CoreError::RefreshFailed { .. } => e,
                    other => CoreError::RefreshFailed {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Watch credential rotations and revocation.
    pub fn subscribe(&self) -> watch::Receiver<CredentialStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> CredentialStatus {
        *self.status.borrow()
    }

    pub fn is_revoked(&self) -> bool {
        self.status() == CredentialStatus::Revoked
    }

    /// Drop the current credential and mark the session unauthenticated.
    pub fn revoke(&self) {
        self.current.store(None);
        self.status.send_replace(CredentialStatus::Revoked);
    }

    /// Forget the credential everywhere, including the store.
    pub fn logout(&self) -> Result<(), CoreError> {
        self.current.store(None);
        self.status.send_replace(CredentialStatus::Missing);
        self.store.clear()
    }

    /// Background task: refresh `margin` before every expiry until
    /// cancelled or revoked. The margin is capped at half the granted
    /// lifetime. Transient failures, and grants that are already inside
    /// the margin, retry with backoff.
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        margin: Duration,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) {
        let mut backoff = Backoff::new(backoff);

        loop {
            let Some(credential) = self.current.load_full() else {
                debug!("no credential to keep fresh, refresh loop exiting");
                break;
            };

            let wait = credential
                .remaining(self.clock.now())
                .saturating_sub(credential.refresh_margin(margin));
            debug!(
                version = credential.version(),
                wait_secs = wait.as_secs(),
                "next token refresh scheduled"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            let retry = match self.ensure_fresh(margin).await {
                Ok(fresh) if fresh.expires_within(self.clock.now(), fresh.refresh_margin(margin)) => {
                    warn!(
                        version = fresh.version(),
                        lifetime_secs = fresh.lifetime().map(|l| l.as_secs()),
                        "granted token is already due for refresh"
                    );
                    true
                }
                Ok(_) => {
                    backoff.reset();
                    false
                }
                Err(e) if e.is_terminal() => break,
                Err(e) => {
                    debug!(error = %e, "token refresh failed");
                    true
                }
            };

            if retry {
                let delay = backoff.next_delay();
                debug!(
                    attempt = backoff.attempt(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying token refresh"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn fresh_enough(&self, margin: Duration) -> Result<Option<Arc<Credential>>, CoreError> {
        if self.is_revoked() {
            return Err(CoreError::unauthenticated("refresh token was revoked"));
        }
        Ok(self
            .current
            .load_full()
            .filter(|c| !c.expires_within(self.clock.now(), c.refresh_margin(margin))))
    }

    fn install(&self, previous: &Credential, token: RefreshedToken) -> Arc<Credential> {
        let lifetime = TimeDelta::from_std(token.expires_in).unwrap_or(TimeDelta::MAX);
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(lifetime)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        let refresh_token = token
            .refresh_token
            .unwrap_or_else(|| previous.refresh_token().clone());
        let version = previous.version().saturating_add(1);

        let credential = Credential::new(token.access_token, refresh_token, expires_at)
            .with_lifetime(token.expires_in)
            .with_version(version);

        if let Err(e) = self.store.save(&credential) {
            warn!(error = %e, "failed to persist rotated credential");
        }

        let credential = Arc::new(credential);
        self.current.store(Some(Arc::clone(&credential)));
        self.status
            .send_replace(CredentialStatus::Valid { version });
        info!(version, %expires_at, "access token refreshed");
        credential
    }
}
