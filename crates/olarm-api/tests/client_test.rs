// Integration tests for `TokenClient` and `DeviceClient` using wiremock.
#![allow(clippy::unwrap_used)]

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use olarm_api::{DeviceClient, Error, TokenClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, TokenClient, DeviceClient) {
    let server = MockServer::start().await;
    let base = Url::parse(&server.uri()).unwrap();
    let token_url = base.join("/oauth/token").unwrap();
    let tokens = TokenClient::with_client(reqwest::Client::new(), token_url, "olarm-test");
    let devices = DeviceClient::with_client(reqwest::Client::new(), base);
    (server, tokens, devices)
}

fn token(value: &str) -> SecretString {
    SecretString::from(value.to_owned())
}

// ── Token endpoint ──────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_returns_rotated_tokens() {
    let (server, tokens, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .and(body_string_contains("client_id=olarm-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = tokens.refresh(&token("rt-1")).await.unwrap();

    assert_eq!(resp.access_token.expose_secret(), "at-2");
    assert_eq!(resp.refresh_token.unwrap().expose_secret(), "rt-2");
    assert_eq!(resp.expires_in, 3600);
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_field_empty() {
    let (server, tokens, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "expires_in": 600
        })))
        .mount(&server)
        .await;

    let resp = tokens.refresh(&token("rt-1")).await.unwrap();
    assert!(resp.refresh_token.is_none());
}

#[tokio::test]
async fn test_refresh_invalid_grant_is_revoked() {
    let (server, tokens, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token expired"
        })))
        .mount(&server)
        .await;

    let err = tokens.refresh(&token("rt-dead")).await.unwrap_err();
    assert!(err.is_auth_revoked());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_refresh_server_error_is_transient() {
    let (server, tokens, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = tokens.refresh(&token("rt-1")).await.unwrap_err();
    assert!(matches!(err, Error::Api { status: 503, .. }));
    assert!(err.is_transient());
}

// ── Device API ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices_sends_bearer_token() {
    let (server, _, devices) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/devices"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "deviceId": "gen1-001",
                    "deviceName": "Home",
                    "deviceType": "GEN1-Paradox",
                    "deviceProfile": {
                        "areasLabels": ["House"],
                        "zonesLabels": ["Front door", "Lounge PIR"]
                    }
                },
                {
                    "deviceId": "pro-002",
                    "deviceName": "Office",
                    "deviceLinks": { "link-1": { "name": "Gate" } }
                }
            ]
        })))
        .mount(&server)
        .await;

    let list = devices.list_devices(&token("at-1")).await.unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].device_id, "gen1-001");
    assert_eq!(
        list[0].device_profile.as_ref().unwrap().areas_labels,
        vec!["House".to_owned()]
    );
    assert!(list[1].device_links.as_ref().unwrap().contains_key("link-1"));
}

#[tokio::test]
async fn test_get_device() {
    let (server, _, devices) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/devices/gen1-001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "deviceId": "gen1-001",
            "deviceState": { "timestamp": 1_700_000_000_000_i64, "zones": ["c"] }
        })))
        .mount(&server)
        .await;

    let device = devices.get_device(&token("at-1"), "gen1-001").await.unwrap();
    assert_eq!(device.device_id, "gen1-001");
    assert!(device.device_state.is_some());
}

// ── Error handling ──────────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_maps_to_authentication() {
    let (server, _, devices) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/devices"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = devices.list_devices(&token("at-stale")).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
}

#[tokio::test]
async fn test_bad_json_keeps_body() {
    let (server, _, devices) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v4/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = devices.list_devices(&token("at-1")).await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected Deserialization, got {other:?}"),
    }
}
