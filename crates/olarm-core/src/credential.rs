// ── Credentials ──
//
// The OAuth2 token pair plus its absolute expiry, the persistence seam
// (`CredentialStore`) and the wall clock used for expiry decisions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;

use crate::error::CoreError;

// ── Credential ───────────────────────────────────────────────────────

/// One access/refresh token pair with its expiry instant.
///
/// `version` increases by one on every successful refresh within a
/// session, so consumers can tell which credential they hold.
/// `lifetime` is the `expires_in` the server granted, known only for
/// credentials minted by a refresh.
#[derive(Clone)]
pub struct Credential {
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: DateTime<Utc>,
    lifetime: Option<Duration>,
    version: u64,
}

impl Credential {
    pub fn new(
        access_token: SecretString,
        refresh_token: SecretString,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            lifetime: None,
            version: 0,
        }
    }

    /// A credential holding only a refresh token. It is already expired,
    /// so the first `ensure_fresh` exchanges it.
    pub fn from_refresh_token(refresh_token: SecretString) -> Self {
        Self::new(
            SecretString::from(String::new()),
            refresh_token,
            DateTime::<Utc>::UNIX_EPOCH,
        )
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    /// `margin` capped at half the granted lifetime, so a short-lived
    /// token is still used for a while before the next refresh.
    pub fn refresh_margin(&self, margin: Duration) -> Duration {
        self.lifetime.map_or(margin, |lifetime| margin.min(lifetime / 2))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// True when the remaining lifetime is at or below `margin`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        self.expires_at - now <= margin
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("expires_at", &self.expires_at)
            .field("lifetime", &self.lifetime)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

// ── CredentialStore ──────────────────────────────────────────────────

/// Persistence for the account credential.
///
/// Implementations must be cheap enough to call from async code: the
/// token manager saves after every refresh.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, CoreError>;
    fn save(&self, credential: &Credential) -> Result<(), CoreError>;
    fn clear(&self) -> Result<(), CoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: ArcSwapOption<Credential>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<Credential>) -> Self {
        Self {
            slot: ArcSwapOption::new(initial.map(Arc::new)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CoreError> {
        Ok(self.slot.load_full().map(|c| (*c).clone()))
    }

    fn save(&self, credential: &Credential) -> Result<(), CoreError> {
        self.slot.store(Some(Arc::new(credential.clone())));
        Ok(())
    }

    fn clear(&self) -> Result<(), CoreError> {
        self.slot.store(None);
        Ok(())
    }
}

// ── Clock ────────────────────────────────────────────────────────────

/// Wall clock for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
