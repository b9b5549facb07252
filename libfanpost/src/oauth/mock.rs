//! In-memory token provider for tests
//!
//! Models the provider-side rules that matter to the connect flow:
//! authorization codes work once, refresh tokens can be revoked, and
//! rotating providers invalidate a refresh token as soon as it is used.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::token::{TokenProvider, TokenSet};
use crate::error::{FanpostError, Result};
use crate::types::Platform;

#[derive(Default)]
struct MockTokenState {
    codes: HashMap<(Platform, String), TokenSet>,
    used_codes: HashSet<(Platform, String)>,
    refresh_tokens: HashSet<String>,
    received_verifiers: Vec<Option<String>>,
    exchange_calls: usize,
    refresh_calls: usize,
    issued: usize,
}

#[derive(Clone, Default)]
pub struct MockTokenProvider {
    state: Arc<Mutex<MockTokenState>>,
    /// Issue a new refresh token on every refresh and invalidate the old one
    rotate_refresh_tokens: bool,
    /// Expiry handed out with refreshed tokens
    expires_in: Option<i64>,
    delay: Duration,
}

impl MockTokenProvider {
    pub fn new() -> Self {
        Self {
            expires_in: Some(3600),
            ..Default::default()
        }
    }

    pub fn rotating() -> Self {
        Self {
            rotate_refresh_tokens: true,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make `code` redeemable once on `platform`
    pub fn issue_code(&self, platform: Platform, code: &str, tokens: TokenSet) {
        let mut state = self.state.lock().unwrap();
        if let Some(refresh) = &tokens.refresh_token {
            state.refresh_tokens.insert(refresh.clone());
        }
        state.codes.insert((platform, code.to_string()), tokens);
    }

    pub fn allow_refresh(&self, refresh_token: &str) {
        self.state
            .lock()
            .unwrap()
            .refresh_tokens
            .insert(refresh_token.to_string());
    }

    pub fn revoke(&self, refresh_token: &str) {
        self.state.lock().unwrap().refresh_tokens.remove(refresh_token);
    }

    pub fn exchange_calls(&self) -> usize {
        self.state.lock().unwrap().exchange_calls
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }

    /// PKCE verifiers received with each exchange, in call order
    pub fn received_verifiers(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().received_verifiers.clone()
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn exchange_code_for_token(
        &self,
        platform: Platform,
        code: &str,
        _redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.exchange_calls += 1;
        state.received_verifiers.push(code_verifier.map(str::to_string));

        let key = (platform, code.to_string());
        if state.used_codes.contains(&key) {
            return Err(FanpostError::TokenExchange(format!(
                "{} rejected the authorization_code grant: invalid_grant",
                platform
            )));
        }
        let tokens = state.codes.remove(&key).ok_or_else(|| {
            FanpostError::TokenExchange(format!(
                "{} rejected the authorization_code grant: invalid_grant",
                platform
            ))
        })?;
        state.used_codes.insert(key);
        Ok(tokens)
    }

    async fn refresh_access_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenSet> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;

        if !state.refresh_tokens.contains(refresh_token) {
            return Err(FanpostError::TokenExchange(format!(
                "{} rejected the refresh_token grant: invalid_grant",
                platform
            )));
        }

        state.issued += 1;
        let n = state.issued;
        let new_refresh = if self.rotate_refresh_tokens {
            let rotated = format!("refresh-{}", n);
            state.refresh_tokens.remove(refresh_token);
            state.refresh_tokens.insert(rotated.clone());
            Some(rotated)
        } else {
            None
        };

        Ok(TokenSet {
            access_token: format!("access-{}", n),
            refresh_token: new_refresh,
            expires_at: self
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
            scope: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(access: &str, refresh: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: None,
            scope: None,
        }
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let provider = MockTokenProvider::new();
        provider.issue_code(Platform::Instagram, "abc", tokens("a1", None));

        let first = provider
            .exchange_code_for_token(Platform::Instagram, "abc", "https://app/cb", None)
            .await;
        assert_eq!(first.unwrap().access_token, "a1");

        let second = provider
            .exchange_code_for_token(Platform::Instagram, "abc", "https://app/cb", None)
            .await;
        assert!(matches!(second, Err(FanpostError::TokenExchange(_))));
        assert_eq!(provider.exchange_calls(), 2);
    }

    #[tokio::test]
    async fn test_code_is_bound_to_platform() {
        let provider = MockTokenProvider::new();
        provider.issue_code(Platform::Instagram, "abc", tokens("a1", None));
        assert!(provider
            .exchange_code_for_token(Platform::Facebook, "abc", "https://app/cb", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rotation_invalidates_previous_refresh_token() {
        let provider = MockTokenProvider::rotating();
        provider.allow_refresh("r0");

        let refreshed = provider
            .refresh_access_token(Platform::Twitter, "r0")
            .await
            .unwrap();
        let rotated = refreshed.refresh_token.unwrap();
        assert_ne!(rotated, "r0");
        assert!(refreshed.expires_at.is_some());

        assert!(provider.refresh_access_token(Platform::Twitter, "r0").await.is_err());
        assert!(provider
            .refresh_access_token(Platform::Twitter, &rotated)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_non_rotating_refresh_omits_refresh_token() {
        let provider = MockTokenProvider::new();
        provider.allow_refresh("r0");
        let refreshed = provider
            .refresh_access_token(Platform::Twitter, "r0")
            .await
            .unwrap();
        assert!(refreshed.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_fails() {
        let provider = MockTokenProvider::new();
        provider.allow_refresh("r0");
        provider.revoke("r0");
        assert!(provider.refresh_access_token(Platform::Twitter, "r0").await.is_err());
        assert_eq!(provider.refresh_calls(), 1);
    }
}
