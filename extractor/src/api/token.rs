use super::{HttpRequest, Transport};
use crate::model::AuthToken;
use crate::secrets::{ClientCredentials, SecretStore};
use async_trait::async_trait;
use extractor_core::{Error, Result};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Supplies a fresh bearer token on every call. Nothing is cached.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AuthToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges the stored refresh token for an access token via the OAuth
/// refresh-token grant. One POST per call, no retries.
pub struct OAuthTokenProvider {
    transport: Arc<dyn Transport>,
    secrets: Arc<dyn SecretStore>,
    token_url: String,
    timeout: Duration,
}

impl OAuthTokenProvider {
    pub fn new(
        transport: Arc<dyn Transport>,
        secrets: Arc<dyn SecretStore>,
        token_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            secrets,
            token_url: token_url.into(),
            timeout,
        }
    }

    #[instrument(skip_all, fields(token_url = %self.token_url))]
    pub async fn request_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<AuthToken> {
        let request = HttpRequest::post(&self.token_url)
            .basic_auth(client_id, client_secret)
            .form(vec![
                ("grant_type".to_string(), "refresh_token".to_string()),
                ("refresh_token".to_string(), refresh_token.to_string()),
            ])
            .timeout(self.timeout);

        let response = self.transport.send(&request).await?;

        if !response.is_success() {
            return Err(Error::Auth(format!(
                "token endpoint returned {}: {}",
                response.status.as_u16(),
                response.text()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .map_err(|e| Error::Auth(format!("token endpoint returned invalid JSON: {}", e)))?;

        let parsed = TokenResponse::deserialize(&payload)
            .map_err(|e| Error::Auth(format!("unexpected token response shape: {}", e)))?;

        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                let keys: Vec<&str> = payload
                    .as_object()
                    .map(|o| o.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                Error::Auth(format!("no access_token returned, keys={:?}", keys))
            })?;

        counter!("extractor_tokens_issued").increment(1);
        debug!(expires_in = ?parsed.expires_in, "Obtained access token");

        Ok(AuthToken::new(token))
    }
}

#[async_trait]
impl TokenSource for OAuthTokenProvider {
    async fn fetch_token(&self) -> Result<AuthToken> {
        let client = ClientCredentials::load(self.secrets.as_ref())?;
        self.request_token(&client.client_id, &client.client_secret, &client.refresh_token)
            .await
    }
}
