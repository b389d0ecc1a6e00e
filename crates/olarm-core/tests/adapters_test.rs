// Integration tests for the REST-backed collaborators using wiremock.
#![allow(clippy::unwrap_used)]

use chrono::{Duration as TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use olarm_api::{DeviceClient, TokenClient};
use olarm_core::{
    AccountDirectory, ApiTokenRefresher, Capability, CoreError, Credential, DeviceModel,
    OlarmDirectory, TokenRefresher,
};

fn credential(access: &str) -> Credential {
    Credential::new(
        SecretString::from(access.to_owned()),
        SecretString::from("rt-1".to_owned()),
        Utc::now() + TimeDelta::hours(1),
    )
}

#[tokio::test]
async fn test_refresher_maps_token_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "expires_in": 900,
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap().join("/oauth/token").unwrap();
    let refresher = ApiTokenRefresher::new(TokenClient::with_client(
        reqwest::Client::new(),
        url,
        "olarm-test",
    ));

    let token = refresher
        .refresh(&SecretString::from("rt-1".to_owned()))
        .await
        .unwrap();
    assert_eq!(token.access_token.expose_secret(), "at-2");
    assert!(token.refresh_token.is_none());
    assert_eq!(token.expires_in.as_secs(), 900);
}

#[tokio::test]
async fn test_refresher_reports_revoked_grant_as_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap().join("/oauth/token").unwrap();
    let refresher = ApiTokenRefresher::new(TokenClient::with_client(
        reqwest::Client::new(),
        url,
        "olarm-test",
    ));

    let err = refresher
        .refresh(&SecretString::from("rt-1".to_owned()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthenticated { .. }));
}

#[tokio::test]
async fn test_directory_builds_descriptors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/devices"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "deviceId": "gen1-001",
                "deviceName": "Home",
                "deviceType": "GEN1-Paradox",
                "deviceState": { "timestamp": 1_700_000_000_000_i64, "areas": ["disarm"], "zones": ["c", "a"] },
                "deviceProfile": { "areasLabels": ["House"], "zonesLabels": ["Front door", "Lounge"] },
                "deviceLinks": { "lk-1": { "name": "Gate" } }
            }]
        })))
        .mount(&server)
        .await;

    let directory = OlarmDirectory::new(DeviceClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
    ));

    let devices = directory.list_devices(&credential("at-1")).await.unwrap();
    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.id.as_str(), "gen1-001");
    assert_eq!(device.model, DeviceModel::Gen1Paradox);
    assert_eq!(device.areas, vec!["House".to_owned()]);
    assert_eq!(device.zones[1].label, "Lounge");
    assert!(device.capabilities.contains(&Capability::Link));
    assert!(device.initial_state.is_some());
}

#[tokio::test]
async fn test_directory_keeps_auth_failures_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/devices"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let directory = OlarmDirectory::new(DeviceClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
    ));

    let err = directory.list_devices(&credential("at-1")).await.unwrap_err();
    assert!(err.is_terminal());
}

#[tokio::test]
async fn test_directory_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/devices"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let directory = OlarmDirectory::new(DeviceClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
    ));

    let err = directory.list_devices(&credential("at-1")).await.unwrap_err();
    assert!(matches!(err, CoreError::Directory { .. }));
    assert!(err.is_transient());
}
