// ── Persistent credential stores ──
//
// Both stores keep the same JSON document: the token pair plus its
// absolute expiry. The in-session version counter is not persisted.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use olarm_core::{CoreError, Credential, CredentialStore};

use crate::ConfigError;

const KEYRING_SERVICE: &str = "olarm";

#[derive(Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl StoredCredential {
    fn from_credential(credential: &Credential) -> Self {
        Self {
            access_token: credential.access_token().expose_secret().to_owned(),
            refresh_token: credential.refresh_token().expose_secret().to_owned(),
            expires_at: credential.expires_at(),
        }
    }

    fn into_credential(self) -> Credential {
        Credential::new(
            SecretString::from(self.access_token),
            SecretString::from(self.refresh_token),
            self.expires_at,
        )
    }
}

fn store_error(err: impl std::fmt::Display) -> CoreError {
    CoreError::CredentialStore {
        message: err.to_string(),
    }
}

fn encode(credential: &Credential) -> Result<String, CoreError> {
    serde_json::to_string(&StoredCredential::from_credential(credential)).map_err(store_error)
}

fn decode(raw: &str) -> Result<Credential, CoreError> {
    serde_json::from_str::<StoredCredential>(raw)
        .map(StoredCredential::into_credential)
        .map_err(store_error)
}

// ── Keyring ─────────────────────────────────────────────────────────

/// OS keyring entry `olarm` / `<profile>/credential`.
pub struct KeyringCredentialStore {
    entry: keyring::Entry,
}

impl KeyringCredentialStore {
    pub fn new(profile: &str) -> Result<Self, ConfigError> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile}/credential"))?;
        Ok(Self { entry })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CoreError> {
        match self.entry.get_password() {
            Ok(raw) => decode(&raw).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), CoreError> {
        self.entry
            .set_password(&encode(credential)?)
            .map_err(store_error)
    }

    fn clear(&self) -> Result<(), CoreError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(store_error(e)),
        }
    }
}

// ── JSON file ───────────────────────────────────────────────────────

/// JSON file, replaced atomically on every save.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/credentials/<profile>.json`.
    pub fn for_profile(profile: &str) -> Self {
        Self::new(
            crate::data_dir()
                .join("credentials")
                .join(format!("{profile}.json")),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, body: &str) -> std::io::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        // NamedTempFile is created owner-only (0600 on unix).
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), CoreError> {
        self.write(&encode(credential)?).map_err(store_error)?;
        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), CoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential::new(
            SecretString::from("at-1".to_owned()),
            SecretString::from("rt-1".to_owned()),
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds").join("default.json");

        let store = FileCredentialStore::new(&path);
        assert!(store.load().unwrap().is_none());
        store.save(&credential()).unwrap();

        let reopened = FileCredentialStore::new(&path).load().unwrap().unwrap();
        assert_eq!(reopened.access_token().expose_secret(), "at-1");
        assert_eq!(reopened.refresh_token().expose_secret(), "rt-1");
        assert_eq!(reopened.expires_at(), credential().expires_at());
    }

    #[test]
    fn file_store_save_replaces_previous_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("default.json"));
        store.save(&credential()).unwrap();

        let rotated = Credential::new(
            SecretString::from("at-2".to_owned()),
            SecretString::from("rt-2".to_owned()),
            credential().expires_at(),
        );
        store.save(&rotated).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.refresh_token().expose_secret(), "rt-2");
        // Only the credential file remains; the temp file was renamed over it.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("default.json"));
        store.clear().unwrap();
        store.save(&credential()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileCredentialStore::new(path).load().unwrap_err();
        assert!(matches!(err, CoreError::CredentialStore { .. }));
    }

    #[test]
    fn stored_document_never_includes_version() {
        let raw = encode(&credential()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["refresh_token"], "rt-1");
        assert!(value.get("version").is_none());
    }
}
