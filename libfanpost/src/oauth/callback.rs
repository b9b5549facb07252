//! Connect flow: authorize URL out, callback in, account stored
//!
//! The `state` parameter that travels through the provider is a composite of
//! the state token, the platform and the path to return the user to:
//!
//! ```text
//! {state_token}.{platform}.{base64url(return_path)}
//! ```
//!
//! State tokens are base64url and platform names are lowercase words, so
//! neither contains a `.` and the three parts are recovered by position.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{info, warn};

use super::state::StateManager;
use super::token::{TokenProvider, TokenSet};
use crate::accounts::AccountService;
use crate::config::OAuthConfig;
use crate::error::{FanpostError, Result, StateError};
use crate::registry::Registry;
use crate::types::{ConnectedAccount, Platform};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeState {
    pub state_token: String,
    pub platform: Platform,
    pub return_path: String,
}

impl CompositeState {
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}",
            self.state_token,
            self.platform,
            URL_SAFE_NO_PAD.encode(self.return_path.as_bytes())
        )
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, StateError> {
        let mut parts = raw.splitn(3, '.');
        let (token, platform, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(p), Some(r)) if !t.is_empty() && !p.is_empty() => (t, p, r),
            _ => return Err(StateError::Malformed("expected three parts".to_string())),
        };

        let platform: Platform = platform
            .parse()
            .map_err(|_| StateError::Malformed("unknown platform".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(path)
            .map_err(|_| StateError::Malformed("return path is not base64url".to_string()))?;
        let return_path = String::from_utf8(bytes)
            .map_err(|_| StateError::Malformed("return path is not UTF-8".to_string()))?;

        Ok(Self {
            state_token: token.to_string(),
            platform,
            return_path,
        })
    }
}

/// Keep `path` only if it is relative to this application
pub fn sanitize_return_path<'a>(path: Option<&'a str>, default: &'a str) -> &'a str {
    match path {
        Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') => p,
        _ => default,
    }
}

/// Provider authorize URL for one connect attempt
pub fn authorization_url(
    platform: Platform,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    code_challenge: Option<&str>,
) -> String {
    let spec = platform.spec();
    let mut params: Vec<(&str, String)> = vec![
        ("response_type", "code".to_string()),
        (spec.client_id_param, client_id.to_string()),
        ("redirect_uri", redirect_uri.to_string()),
        ("scope", scopes.join(spec.scope_separator)),
        ("state", state.to_string()),
    ];
    if let Some(challenge) = code_challenge {
        params.push(("code_challenge", challenge.to_string()));
        params.push(("code_challenge_method", "S256".to_string()));
    }
    for (key, value) in spec.extra_authorize_params {
        params.push((*key, value.to_string()));
    }

    let query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    format!("{}?{}", spec.authorize_url, query.join("&"))
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    /// Composite state embedded in `url`
    pub state: String,
    pub expires_at: i64,
}

/// Query parameters delivered to the callback
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Failure reasons surfaced to the user in the callback redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackErrorCode {
    AccessDenied,
    ProviderError,
    MissingParameters,
    InvalidState,
    TokenExchangeFailed,
    ProfileFetchFailed,
    PersistenceFailed,
}

impl CallbackErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackErrorCode::AccessDenied => "access_denied",
            CallbackErrorCode::ProviderError => "provider_error",
            CallbackErrorCode::MissingParameters => "missing_parameters",
            CallbackErrorCode::InvalidState => "invalid_state",
            CallbackErrorCode::TokenExchangeFailed => "token_exchange_failed",
            CallbackErrorCode::ProfileFetchFailed => "profile_fetch_failed",
            CallbackErrorCode::PersistenceFailed => "persistence_failed",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            CallbackErrorCode::AccessDenied => "Authorization was cancelled",
            CallbackErrorCode::ProviderError => "The provider reported an error",
            CallbackErrorCode::MissingParameters => "The callback was missing required parameters",
            CallbackErrorCode::InvalidState => "This connection link is invalid or has expired",
            CallbackErrorCode::TokenExchangeFailed => "Could not obtain access from the provider",
            CallbackErrorCode::ProfileFetchFailed => "Could not load the account profile",
            CallbackErrorCode::PersistenceFailed => "Could not save the connected account",
        }
    }
}

/// Where to send the user after the callback
#[derive(Debug, Clone)]
pub struct CallbackRedirect {
    pub location: String,
    pub account: Option<ConnectedAccount>,
    pub error: Option<CallbackErrorCode>,
}

impl CallbackRedirect {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn connected(return_path: &str, account: ConnectedAccount) -> Self {
        let message = format!("Connected {} account", account.platform);
        Self {
            location: with_query(
                return_path,
                &[("connected", account.platform.as_str()), ("message", message.as_str())],
            ),
            account: Some(account),
            error: None,
        }
    }

    fn failed(return_path: &str, code: CallbackErrorCode) -> Self {
        Self {
            location: with_query(
                return_path,
                &[("error", code.as_str()), ("message", code.message())],
            ),
            account: None,
            error: Some(code),
        }
    }
}

fn with_query(path: &str, params: &[(&str, &str)]) -> String {
    let query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, query.join("&"))
}

/// Scopes the provider reports as granted, falling back to those requested
fn granted_scopes(tokens: &TokenSet, requested: &[String]) -> Vec<String> {
    match tokens.scope.as_deref() {
        Some(scope) if !scope.trim().is_empty() => scope
            .split(|c: char| c == ' ' || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => requested.to_vec(),
    }
}

pub struct ConnectFlow {
    states: StateManager,
    tokens: Arc<dyn TokenProvider>,
    accounts: AccountService,
    registry: Arc<Registry>,
    oauth: OAuthConfig,
}

impl ConnectFlow {
    pub fn new(
        states: StateManager,
        tokens: Arc<dyn TokenProvider>,
        accounts: AccountService,
        registry: Arc<Registry>,
        oauth: OAuthConfig,
    ) -> Self {
        Self {
            states,
            tokens,
            accounts,
            registry,
            oauth,
        }
    }

    /// Issue a state (and PKCE pair where supported) and build the authorize URL
    ///
    /// # Errors
    ///
    /// `Config` if the platform has no client credentials; nothing is stored
    /// in that case.
    pub async fn start(
        &self,
        user_id: &str,
        platform: Platform,
        return_path: Option<&str>,
    ) -> Result<AuthorizationRequest> {
        let credentials = self.registry.credentials(platform)?;
        let spec = platform.spec();

        let issued = self
            .states
            .generate_state(
                user_id,
                platform,
                &self.oauth.callback_url,
                &credentials.scopes,
                spec.supports_pkce,
            )
            .await?;

        let composite = CompositeState {
            state_token: issued.state_token,
            platform,
            return_path: sanitize_return_path(return_path, &self.oauth.default_return_path)
                .to_string(),
        }
        .encode();

        let url = authorization_url(
            platform,
            &credentials.client_id,
            &self.oauth.callback_url,
            &credentials.scopes,
            &composite,
            issued.code_challenge.as_deref(),
        );

        Ok(AuthorizationRequest {
            url,
            state: composite,
            expires_at: issued.expires_at,
        })
    }

    /// Complete a connect attempt. Never fails: every error becomes a redirect
    /// carrying a short code and message, with details logged.
    pub async fn handle_callback(&self, params: CallbackParams) -> CallbackRedirect {
        let default_path = self.oauth.default_return_path.as_str();
        let composite = params.state.as_deref().map(CompositeState::parse);
        let return_path = match &composite {
            Some(Ok(state)) => sanitize_return_path(Some(&state.return_path), default_path),
            _ => default_path,
        }
        .to_string();
        let return_path = return_path.as_str();

        if let Some(error) = params.error.as_deref() {
            warn!(
                error,
                description = params.error_description.as_deref().unwrap_or(""),
                "provider returned an error to the callback"
            );
            let code = if error == "access_denied" {
                CallbackErrorCode::AccessDenied
            } else {
                CallbackErrorCode::ProviderError
            };
            return CallbackRedirect::failed(return_path, code);
        }

        let (code, composite) = match (params.code.as_deref(), composite) {
            (Some(code), Some(state)) if !code.is_empty() => (code, state),
            _ => return CallbackRedirect::failed(return_path, CallbackErrorCode::MissingParameters),
        };
        let composite = match composite {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "rejected callback state");
                return CallbackRedirect::failed(return_path, CallbackErrorCode::InvalidState);
            }
        };
        let platform = composite.platform;

        let stored = match self
            .states
            .validate_state(&composite.state_token, platform)
            .await
        {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!(%platform, "callback state invalid, expired or replayed");
                return CallbackRedirect::failed(return_path, CallbackErrorCode::InvalidState);
            }
            Err(e) => {
                warn!(%platform, error = %e, "state lookup failed");
                return CallbackRedirect::failed(return_path, CallbackErrorCode::PersistenceFailed);
            }
        };

        // Codes are single-use; a failed exchange is never retried
        let tokens = match self
            .tokens
            .exchange_code_for_token(
                platform,
                code,
                &stored.redirect_uri,
                stored.code_verifier.as_deref(),
            )
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(%platform, error = %e, "code exchange failed");
                return CallbackRedirect::failed(
                    return_path,
                    CallbackErrorCode::TokenExchangeFailed,
                );
            }
        };

        let scopes = granted_scopes(&tokens, &stored.scopes);
        match self
            .accounts
            .connect(&stored.user_id, platform, tokens, scopes)
            .await
        {
            Ok(account) => {
                info!(%platform, user_id = %stored.user_id, "connect flow completed");
                CallbackRedirect::connected(return_path, account)
            }
            Err(e @ (FanpostError::ProfileFetch(_) | FanpostError::Platform(_))) => {
                warn!(%platform, error = %e, "profile fetch failed");
                CallbackRedirect::failed(return_path, CallbackErrorCode::ProfileFetchFailed)
            }
            Err(e) => {
                warn!(%platform, error = %e, "storing connected account failed");
                CallbackRedirect::failed(return_path, CallbackErrorCode::PersistenceFailed)
            }
        }
    }
}
