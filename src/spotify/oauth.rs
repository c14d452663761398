// Spotify user authorization (authorization-code flow) for in-browser playback

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

use super::read_json;
use crate::config::SpotifyConfig;
use crate::db::SpotifyProfile;
use crate::error::ClientError;

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const ME_URL: &str = "https://api.spotify.com/v1/me";

/// Scopes needed by the Web Playback SDK
pub const SCOPES: &str =
    "streaming user-read-email user-read-private user-read-playback-state user-modify-playback-state";

/// Token grant as returned by Spotify
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

#[async_trait]
pub trait SpotifyAuthApi: Send + Sync {
    /// URL the browser is sent to for consent
    fn authorize_url(&self, state: &str, show_dialog: bool) -> Result<String, ClientError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ClientError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClientError>;

    async fn profile(&self, access_token: &str) -> Result<SpotifyProfile, ClientError>;
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: Option<String>,
    display_name: Option<String>,
    email: Option<String>,
    product: Option<String>,
    country: Option<String>,
}

pub struct SpotifyOAuthClient {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: String,
    client: Client,
}

impl SpotifyOAuthClient {
    pub fn new(config: &SpotifyConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            client,
        })
    }

    fn credentials(&self) -> Result<(&str, &str), ClientError> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Ok((id.as_str(), secret.as_str())),
            _ => Err(ClientError::NotConfigured("Spotify client credentials")),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ClientError> {
        let (id, secret) = self.credentials()?;
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(id, Some(secret))
            .form(form)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl SpotifyAuthApi for SpotifyOAuthClient {
    fn authorize_url(&self, state: &str, show_dialog: bool) -> Result<String, ClientError> {
        let (id, _) = self.credentials()?;
        let show_dialog = if show_dialog { "true" } else { "false" };
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", id),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("state", state),
                ("scope", SCOPES),
                ("show_dialog", show_dialog),
            ],
        )
        .map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ClientError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClientError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn profile(&self, access_token: &str) -> Result<SpotifyProfile, ClientError> {
        let response = self
            .client
            .get(ME_URL)
            .bearer_auth(access_token)
            .send()
            .await?;
        let me: MeResponse = read_json(response).await?;
        Ok(SpotifyProfile {
            id: me.id,
            display_name: me.display_name,
            email: me.email,
            product: me.product,
            country: me.country,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> SpotifyOAuthClient {
        SpotifyOAuthClient::new(&SpotifyConfig {
            client_id: Some("client-123".into()),
            client_secret: Some("shh".into()),
            redirect_uri: "http://127.0.0.1:8080/api/spotify/callback".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_authorize_url() {
        let url = configured().authorize_url("state-xyz", true).unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with(AUTHORIZE_URL));
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["state"], "state-xyz");
        assert_eq!(params["scope"], SCOPES);
        assert_eq!(params["show_dialog"], "true");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8080/api/spotify/callback");
    }

    #[test]
    fn test_authorize_url_requires_credentials() {
        let client = SpotifyOAuthClient::new(&SpotifyConfig::default()).unwrap();
        assert!(matches!(
            client.authorize_url("s", false),
            Err(ClientError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_token_grant_without_refresh_token() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token": "a", "expires_in": 3600}"#).unwrap();
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.scope, None);
    }
}
