//! Authorization-code exchange and token refresh

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FanpostError, Result};
use crate::registry::Registry;
use crate::types::Platform;

/// Credentials returned by a token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry; `None` means the token does not expire
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
}

/// A source of access credentials.
///
/// Authorization codes are single-use on the provider side, so callers must
/// not retry a failed `exchange_code_for_token` with the same code.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn exchange_code_for_token(
        &self,
        platform: Platform,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet>;

    /// The returned `refresh_token` is `None` when the provider did not rotate
    /// it; callers keep the previous one in that case.
    async fn refresh_access_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenSet>;
}

/// Wire format of an RFC 6749 token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self, now: i64) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at: self.expires_in.map(|secs| now + secs),
            scope: self.scope,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

/// Token client talking to the endpoints in the platform registry
pub struct HttpTokenClient {
    http: reqwest::Client,
    registry: Arc<Registry>,
}

impl HttpTokenClient {
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FanpostError::InvalidInput(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { http, registry })
    }

    async fn request_token(
        &self,
        platform: Platform,
        grant: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<TokenSet> {
        let spec = platform.spec();
        let credentials = self.registry.credentials(platform)?;
        params.push(("grant_type", grant.to_string()));
        params.push((spec.client_id_param, credentials.client_id.clone()));
        params.push((
            "client_secret",
            credentials.client_secret.expose_secret().to_string(),
        ));

        debug!(%platform, grant, "requesting token");
        let response = self
            .http
            .post(spec.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                warn!(%platform, error = %e, "token endpoint unreachable");
                FanpostError::TokenExchange(format!("{} token endpoint unreachable", platform))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            FanpostError::TokenExchange(format!(
                "failed to read {} token response: {}",
                platform, e
            ))
        })?;

        if !status.is_success() {
            warn!(%platform, grant, %status, body = %body, "token endpoint rejected request");
            let code = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("http_{}", status.as_u16()));
            return Err(FanpostError::TokenExchange(format!(
                "{} rejected the {} grant: {}",
                platform, grant, code
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(%platform, error = %e, "malformed token response");
            FanpostError::TokenExchange(format!("malformed {} token response", platform))
        })?;

        Ok(parsed.into_token_set(chrono::Utc::now().timestamp()))
    }
}

#[async_trait]
impl TokenProvider for HttpTokenClient {
    async fn exchange_code_for_token(
        &self,
        platform: Platform,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        let mut params = vec![
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier.to_string()));
        }
        self.request_token(platform, "authorization_code", params).await
    }

    async fn refresh_access_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenSet> {
        self.request_token(
            platform,
            "refresh_token",
            vec![("refresh_token", refresh_token.to_string())],
        )
        .await
    }
}
