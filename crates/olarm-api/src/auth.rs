// OAuth2 token endpoint client
//
// Only the refresh-token grant lives here. The interactive authorization
// (PKCE) flow runs outside this workspace; it hands us a refresh token.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// A successful response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: SecretString,

    /// Servers may rotate the refresh token on every grant. When absent,
    /// the previously held refresh token stays valid.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,

    /// Lifetime of `access_token` in seconds, relative to the response.
    pub expires_in: u64,

    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(default)]
    pub scope: Option<String>,
}

/// RFC 6749 §5.2 error body.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the OAuth2 token endpoint (public client, no secret).
pub struct TokenClient {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
}

impl TokenClient {
    pub fn new(
        token_url: Url,
        client_id: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, token_url, client_id))
    }

    /// Create a token client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, token_url: Url, client_id: impl Into<String>) -> Self {
        Self {
            http,
            token_url,
            client_id: client_id.into(),
        }
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// A rejected grant (`invalid_grant`, `invalid_client`,
    /// `unauthorized_client`) maps to [`Error::InvalidGrant`]; server-side
    /// failures map to [`Error::Api`] and are transient.
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse, Error> {
        debug!(url = %self.token_url, "refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.client_id.as_str()),
        ];

        let resp = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            });
        }

        Err(classify_failure(status.as_u16(), &body))
    }
}

fn classify_failure(status: u16, body: &str) -> Error {
    if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(body) {
        let description = oauth.error_description.unwrap_or_default();
        match oauth.error.as_str() {
            "invalid_grant" | "invalid_client" | "unauthorized_client" => {
                return Error::InvalidGrant {
                    error: oauth.error,
                    description,
                };
            }
            _ if status == 401 => {
                return Error::Authentication {
                    message: format!("{}: {description}", oauth.error),
                };
            }
            _ => {
                return Error::Api {
                    status,
                    message: format!("{}: {description}", oauth.error),
                };
            }
        }
    }

    if status == 401 {
        Error::Authentication {
            message: format!("token endpoint returned 401: {body}"),
        }
    } else {
        Error::Api {
            status,
            message: body.to_owned(),
        }
    }
}
