// Device REST client
//
// Lists the account's communicators together with their declared
// profile (area/zone labels) and the last known state. Every call takes
// the access token explicitly; token lifecycle belongs to the caller.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Wire models ──────────────────────────────────────────────────────

/// One communicator as returned by the device API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,

    #[serde(default)]
    pub device_name: Option<String>,

    /// Hardware tag, e.g. `"GEN1-Paradox"`, `"PRO"`, `"MAX"`.
    #[serde(default)]
    pub device_type: Option<String>,

    /// Raw state blob, same shape as the `deviceState` key of push payloads.
    #[serde(default)]
    pub device_state: Option<serde_json::Value>,

    #[serde(default)]
    pub device_profile: Option<DeviceProfile>,

    /// Last known LINK readings keyed by link id. Non-empty means the
    /// LINK capability.
    #[serde(default)]
    pub device_links: Option<serde_json::Map<String, serde_json::Value>>,

    /// Declared LINK modules keyed by link id: name, `io` and `relays`.
    #[serde(default)]
    pub device_profile_links: Option<serde_json::Map<String, serde_json::Value>>,

    /// Last known MAX readings.
    #[serde(default, rename = "deviceIO")]
    pub device_io: Option<serde_json::Value>,

    /// Present on communicators with MAX I/O hardware.
    #[serde(default, rename = "deviceProfileIO")]
    pub device_profile_io: Option<serde_json::Value>,
}

/// Installer-declared layout of the panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    #[serde(default)]
    pub areas_labels: Vec<String>,

    #[serde(default)]
    pub zones_labels: Vec<String>,

    #[serde(default)]
    pub zones_types: Vec<serde_json::Value>,

    /// Optional per-zone area membership (1-based area numbers).
    #[serde(default)]
    pub zones_areas: Vec<Vec<u32>>,

    #[serde(default)]
    pub pgm_labels: Vec<String>,

    #[serde(default)]
    pub ukeys_labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Enveloped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Enveloped { data } | Self::Bare(data) => data,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Raw HTTP client for the device API.
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DeviceClient {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, base_url))
    }

    /// Create a device client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List every device visible to the authenticated user.
    pub async fn list_devices(&self, access_token: &SecretString) -> Result<Vec<DeviceRecord>, Error> {
        let url = self.api_url("devices")?;
        let listing: Listing<DeviceRecord> = self.get_json(url, access_token).await?;
        let devices = listing.into_vec();
        debug!(count = devices.len(), "listed devices");
        Ok(devices)
    }

    /// Fetch a single device by id.
    pub async fn get_device(
        &self,
        access_token: &SecretString,
        device_id: &str,
    ) -> Result<DeviceRecord, Error> {
        let url = self.api_url(&format!("devices/{device_id}"))?;
        self.get_json(url, access_token).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/v4/{path}"))?)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        access_token: &SecretString,
    ) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                message: format!("device API returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn listing_accepts_envelope_and_bare_array() {
        let enveloped: Listing<DeviceRecord> =
            serde_json::from_str(r#"{"data":[{"deviceId":"a"}]}"#).unwrap();
        assert_eq!(enveloped.into_vec()[0].device_id, "a");

        let bare: Listing<DeviceRecord> = serde_json::from_str(r#"[{"deviceId":"b"}]"#).unwrap();
        assert_eq!(bare.into_vec()[0].device_id, "b");
    }

    #[test]
    fn device_record_parses_profile() {
        let json = serde_json::json!({
            "deviceId": "gen1-001",
            "deviceName": "Home",
            "deviceType": "GEN1-Paradox",
            "deviceState": { "timestamp": 1_700_000_000_000_i64, "zones": ["c", "a"], "areas": ["disarm"] },
            "deviceProfile": { "areasLabels": ["House"], "zonesLabels": ["Front door", "Lounge PIR"] },
            "deviceProfileIO": { "io": [] }
        });

        let record: DeviceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.device_name.as_deref(), Some("Home"));
        let profile = record.device_profile.unwrap();
        assert_eq!(profile.zones_labels.len(), 2);
        assert!(profile.zones_areas.is_empty());
        assert!(record.device_profile_io.is_some());
        assert!(record.device_links.is_none());
    }

    #[test]
    fn device_record_parses_link_profile_and_readings() {
        let json = serde_json::json!({
            "deviceId": "pro-001",
            "deviceLinks": { "lk-1": { "inputs": ["high"], "relays": ["latched"] } },
            "deviceProfileLinks": { "lk-1": { "name": "Gate LINK", "io": [], "relays": [] } },
            "deviceIO": { "inputs": ["low"] }
        });

        let record: DeviceRecord = serde_json::from_value(json).unwrap();
        let links = record.device_profile_links.unwrap();
        assert_eq!(links["lk-1"]["name"], "Gate LINK");
        assert_eq!(record.device_links.unwrap()["lk-1"]["relays"][0], "latched");
        assert_eq!(record.device_io.unwrap()["inputs"][0], "low");
    }
}
