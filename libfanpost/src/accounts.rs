//! Connected account lifecycle
//!
//! Accounts are created by the connect flow and afterwards only change
//! through the operations here: token refresh, profile sync and disconnect.
//! Failed refreshes and syncs never delete an account; they flip it to
//! `error` and count the failure so the user can be asked to reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{FanpostError, Result};
use crate::oauth::{TokenProvider, TokenSet};
use crate::platforms::PlatformClients;
use crate::types::{ConnectedAccount, Platform, PlatformProfile};

/// Idempotent account write keyed by (user, platform, platform user)
#[derive(Debug, Clone)]
pub struct AccountUpsert {
    pub user_id: String,
    pub platform: Platform,
    pub tokens: TokenSet,
    pub scopes: Vec<String>,
    pub profile: PlatformProfile,
}

type RefreshLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Clone)]
pub struct AccountService {
    db: Database,
    tokens: Arc<dyn TokenProvider>,
    clients: PlatformClients,
    reconnect_threshold: u32,
    refresh_locks: RefreshLocks,
}

impl AccountService {
    pub fn new(
        db: Database,
        tokens: Arc<dyn TokenProvider>,
        clients: PlatformClients,
        reconnect_threshold: u32,
    ) -> Self {
        Self {
            db,
            tokens,
            clients,
            reconnect_threshold,
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn requires_reconnect(&self, account: &ConnectedAccount) -> bool {
        account.requires_reconnect(self.reconnect_threshold)
    }

    pub async fn upsert(&self, upsert: &AccountUpsert) -> Result<ConnectedAccount> {
        let now = chrono::Utc::now().timestamp();
        let account = self.db.upsert_account(upsert, now).await?;
        info!(
            platform = %account.platform,
            account_id = %account.id,
            platform_user_id = %account.platform_user_id,
            "account connected"
        );
        Ok(account)
    }

    /// Fetch the profile behind freshly exchanged tokens and store the account
    pub async fn connect(
        &self,
        user_id: &str,
        platform: Platform,
        tokens: TokenSet,
        scopes: Vec<String>,
    ) -> Result<ConnectedAccount> {
        let client = self.clients.get(platform)?;
        let profile = client.get_profile(&tokens.access_token).await?;
        self.upsert(&AccountUpsert {
            user_id: user_id.to_string(),
            platform,
            tokens,
            scopes,
            profile,
        })
        .await
    }

    pub async fn get(&self, account_id: &str) -> Result<Option<ConnectedAccount>> {
        self.db.get_account(account_id).await
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<ConnectedAccount>> {
        self.db.list_accounts(user_id).await
    }

    /// The account publishing on behalf of `user_id` on `platform`
    pub async fn find_for_dispatch(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<ConnectedAccount>> {
        self.db.find_account(user_id, platform).await
    }

    /// Exchange the stored refresh token for new credentials.
    ///
    /// On failure the account is marked `error` and its tokens are left as
    /// they were.
    ///
    /// # Errors
    ///
    /// `TokenExchange` when no refresh token is stored (nothing is changed in
    /// that case) or when the provider rejects the refresh.
    pub async fn refresh_token(&self, account_id: &str) -> Result<ConnectedAccount> {
        self.refresh_serialized(account_id, None).await
    }

    /// Refresh ahead of use when the access token is expired or expires within
    /// `skew_secs`. Accounts without a refresh token are returned unchanged.
    pub async fn ensure_fresh_token(
        &self,
        account: &ConnectedAccount,
        skew_secs: i64,
    ) -> Result<ConnectedAccount> {
        let now = chrono::Utc::now().timestamp();
        if !account.token_expired(now, skew_secs) || account.refresh_token.is_none() {
            return Ok(account.clone());
        }
        self.refresh_serialized(&account.id, Some(skew_secs)).await
    }

    async fn refresh_serialized(
        &self,
        account_id: &str,
        only_if_expired: Option<i64>,
    ) -> Result<ConnectedAccount> {
        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent refresh may have rotated the token
        let account = self.stored_account(account_id).await?;

        let now = chrono::Utc::now().timestamp();
        if let Some(skew) = only_if_expired {
            if !account.token_expired(now, skew) {
                debug!(account_id, "token already refreshed by another task");
                return Ok(account);
            }
        }

        let refresh_token = account.refresh_token.clone().ok_or_else(|| {
            FanpostError::TokenExchange(format!(
                "no refresh token stored for {} account",
                account.platform
            ))
        })?;

        // The lock only covers this process; writes are conditioned on the
        // presented refresh token still being the stored one.
        match self
            .tokens
            .refresh_access_token(account.platform, &refresh_token)
            .await
        {
            Ok(tokens) => {
                let now = chrono::Utc::now().timestamp();
                match self
                    .db
                    .update_account_tokens(account_id, &refresh_token, &tokens, now)
                    .await?
                {
                    Some(updated) => {
                        info!(
                            platform = %updated.platform,
                            account_id,
                            "access token refreshed"
                        );
                        Ok(updated)
                    }
                    None => {
                        debug!(account_id, "refresh token rotated elsewhere, keeping stored");
                        self.stored_account(account_id).await
                    }
                }
            }
            Err(e) => {
                let now = chrono::Utc::now().timestamp();
                match self
                    .db
                    .record_refresh_failure(account_id, &refresh_token, &e.to_string(), now)
                    .await?
                {
                    Some(_) => {
                        warn!(
                            platform = %account.platform,
                            account_id,
                            error = %e,
                            "token refresh failed"
                        );
                        Err(e)
                    }
                    None => {
                        debug!(account_id, "refresh rejected after rotation elsewhere");
                        self.stored_account(account_id).await
                    }
                }
            }
        }
    }

    async fn stored_account(&self, account_id: &str) -> Result<ConnectedAccount> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or_else(|| FanpostError::Auth(format!("account {} not found", account_id)))
    }

    fn refresh_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Re-fetch the profile snapshot, regardless of token state
    pub async fn sync_profile(&self, account_id: &str) -> Result<ConnectedAccount> {
        let account = self.stored_account(account_id).await?;

        let fetched = match self.clients.get(account.platform) {
            Ok(client) => client.get_profile(&account.access_token).await,
            Err(e) => Err(e),
        };

        match fetched {
            Ok(profile) => {
                let updated = self
                    .db
                    .update_account_profile(account_id, &profile, chrono::Utc::now().timestamp())
                    .await?
                    .ok_or_else(|| {
                        FanpostError::Auth(format!("account {} not found", account_id))
                    })?;
                debug!(platform = %updated.platform, account_id, "profile synced");
                Ok(updated)
            }
            Err(e) => {
                warn!(platform = %account.platform, account_id, error = %e, "profile sync failed");
                self.db
                    .record_account_error(
                        account_id,
                        &e.to_string(),
                        chrono::Utc::now().timestamp(),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Delete the account row. Returns false if it did not exist.
    pub async fn disconnect(&self, account_id: &str) -> Result<bool> {
        let deleted = self.db.delete_account(account_id).await?;
        self.refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(account_id);
        if deleted {
            info!(account_id, "account disconnected");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::mock::MockTokenProvider;
    use crate::platforms::mock::MockPlatformClient;
    use crate::types::AccountStatus;
    use tempfile::TempDir;

    async fn setup(provider: MockTokenProvider) -> (AccountService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("accounts.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        let clients = PlatformClients::new()
            .with(Arc::new(MockPlatformClient::success(Platform::LinkedIn)));
        (
            AccountService::new(db, Arc::new(provider), clients, 3),
            temp_dir,
        )
    }

    fn tokens(access: &str, refresh: Option<&str>, expires_at: Option<i64>) -> TokenSet {
        TokenSet {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at,
            scope: None,
        }
    }

    #[tokio::test]
    async fn test_connect_fetches_profile_and_inserts() {
        let (service, _dir) = setup(MockTokenProvider::new()).await;
        let account = service
            .connect("user1", Platform::LinkedIn, tokens("a0", Some("r0"), None), vec![])
            .await
            .unwrap();

        assert_eq!(account.platform_user_id, "linkedin-user");
        assert_eq!(account.username.as_deref(), Some("linkedin_handle"));
        assert_eq!(account.status, AccountStatus::Connected);
        assert_eq!(service.list_accounts("user1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_changes_nothing() {
        let (service, _dir) = setup(MockTokenProvider::new()).await;
        let account = service
            .connect("user1", Platform::LinkedIn, tokens("a0", None, None), vec![])
            .await
            .unwrap();

        let result = service.refresh_token(&account.id).await;
        assert!(matches!(result, Err(FanpostError::TokenExchange(_))));

        let stored = service.get(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Connected);
        assert_eq!(stored.error_count, 0);
    }

    #[tokio::test]
    async fn test_refresh_failures_count_toward_reconnect() {
        let provider = MockTokenProvider::new();
        let (service, _dir) = setup(provider.clone()).await;
        let account = service
            .connect("user1", Platform::LinkedIn, tokens("a0", Some("dead"), None), vec![])
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(service.refresh_token(&account.id).await.is_err());
        }
        let stored = service.get(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.error_count, 3);
        assert!(service.requires_reconnect(&stored));

        provider.allow_refresh("dead");
        let refreshed = service.refresh_token(&account.id).await.unwrap();
        assert_eq!(refreshed.error_count, 0);
        assert!(!service.requires_reconnect(&refreshed));
    }

    #[tokio::test]
    async fn test_ensure_fresh_token_skips_valid_tokens() {
        let provider = MockTokenProvider::new();
        let (service, _dir) = setup(provider.clone()).await;
        let far_future = chrono::Utc::now().timestamp() + 86_400;
        let account = service
            .connect(
                "user1",
                Platform::LinkedIn,
                tokens("a0", Some("r0"), Some(far_future)),
                vec![],
            )
            .await
            .unwrap();

        let fresh = service.ensure_fresh_token(&account, 60).await.unwrap();
        assert_eq!(fresh.access_token, "a0");
        assert_eq!(provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_fresh_token_refreshes_expired_tokens() {
        let provider = MockTokenProvider::new();
        provider.allow_refresh("r0");
        let (service, _dir) = setup(provider.clone()).await;
        let account = service
            .connect("user1", Platform::LinkedIn, tokens("a0", Some("r0"), Some(1)), vec![])
            .await
            .unwrap();

        let fresh = service.ensure_fresh_token(&account, 60).await.unwrap();
        assert_eq!(fresh.access_token, "access-1");
        assert_eq!(fresh.refresh_token.as_deref(), Some("r0"));
        assert_eq!(provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_sync_profile_without_client_records_error() {
        let (service, _dir) = setup(MockTokenProvider::new()).await;
        let account = service
            .upsert(&AccountUpsert {
                user_id: "user1".to_string(),
                platform: Platform::TikTok,
                tokens: tokens("a0", None, None),
                scopes: vec![],
                profile: PlatformProfile {
                    platform_user_id: "tt1".to_string(),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        assert!(service.sync_profile(&account.id).await.is_err());
        let stored = service.get(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Error);
        assert_eq!(stored.error_count, 1);
        assert_eq!(stored.access_token, "a0");
    }

    #[tokio::test]
    async fn test_disconnect_deletes_row() {
        let (service, _dir) = setup(MockTokenProvider::new()).await;
        let account = service
            .connect("user1", Platform::LinkedIn, tokens("a0", None, None), vec![])
            .await
            .unwrap();

        assert!(service.disconnect(&account.id).await.unwrap());
        assert!(service.get(&account.id).await.unwrap().is_none());
        assert!(!service.disconnect(&account.id).await.unwrap());
    }
}
