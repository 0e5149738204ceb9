//! OAuth access tokens for Google APIs

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, typically `GOOGLE_OAUTH_ACCESS_TOKEN` during local runs.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok().map(Self)
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Default service account token from the GCE/GKE metadata server.
pub struct MetadataServerToken {
    client: reqwest::Client,
    base_url: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl MetadataServerToken {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for MetadataServerToken {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, valid_until)) = cached.as_ref() {
            if Instant::now() < *valid_until {
                return Ok(token.clone());
            }
        }

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), TOKEN_PATH);
        debug!(url = %url, "Fetching access token from metadata server");
        let response: TokenResponse = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| IngestError::decode(&url, e))?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some((response.access_token.clone(), Instant::now() + lifetime));
        Ok(response.access_token)
    }
}

/// Static token from the environment if set, otherwise the metadata server.
pub fn token_provider(client: reqwest::Client, metadata_url: &str) -> Box<dyn AccessTokenProvider> {
    match StaticToken::from_env() {
        Some(token) => Box::new(token),
        None => Box::new(MetadataServerToken::new(client, metadata_url)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = MetadataServerToken::new(reqwest::Client::new(), server.uri());
        assert_eq!(provider.access_token().await.unwrap(), "ya29.token");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.token");
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticToken::new("abc");
        assert_eq!(provider.access_token().await.unwrap(), "abc");
    }
}
