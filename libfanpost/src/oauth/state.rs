//! Single-use OAuth state tokens with optional PKCE

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::{code_challenge, random_token};
use crate::db::{decode_json, decode_text, encode_json, Database};
use crate::error::{DbError, Result};
use crate::types::{OAuthState, OAuthStatus, Platform};

const STATE_COLUMNS: &str = "state_token, user_id, platform, code_verifier, code_challenge, \
     redirect_uri, scopes, status, created_at, expires_at, completed_at";

/// Values handed back to the caller when a flow starts.
///
/// The verifier stays server-side; only the token and challenge travel in
/// the authorize URL.
#[derive(Debug, Clone)]
pub struct IssuedState {
    pub state_token: String,
    pub code_verifier: Option<String>,
    pub code_challenge: Option<String>,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct StateManager {
    db: Database,
    ttl_secs: i64,
}

impl StateManager {
    pub fn new(db: Database, ttl_secs: i64) -> Self {
        Self { db, ttl_secs }
    }

    pub async fn generate_state(
        &self,
        user_id: &str,
        platform: Platform,
        redirect_uri: &str,
        scopes: &[String],
        use_pkce: bool,
    ) -> Result<IssuedState> {
        let now = chrono::Utc::now().timestamp();
        self.generate_state_at(user_id, platform, redirect_uri, scopes, use_pkce, now)
            .await
    }

    pub async fn generate_state_at(
        &self,
        user_id: &str,
        platform: Platform,
        redirect_uri: &str,
        scopes: &[String],
        use_pkce: bool,
        now: i64,
    ) -> Result<IssuedState> {
        let state_token = random_token();
        let (code_verifier, challenge) = if use_pkce {
            let verifier = random_token();
            let challenge = code_challenge(&verifier);
            (Some(verifier), Some(challenge))
        } else {
            (None, None)
        };
        let expires_at = now + self.ttl_secs;

        sqlx::query(
            r#"
            INSERT INTO oauth_states (state_token, user_id, platform, code_verifier,
                                      code_challenge, redirect_uri, scopes, status,
                                      created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&state_token)
        .bind(user_id)
        .bind(platform.as_str())
        .bind(&code_verifier)
        .bind(&challenge)
        .bind(redirect_uri)
        .bind(encode_json(scopes)?)
        .bind(now)
        .bind(expires_at)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        debug!(%platform, user_id, pkce = use_pkce, "issued OAuth state");

        Ok(IssuedState {
            state_token,
            code_verifier,
            code_challenge: challenge,
            expires_at,
        })
    }

    pub async fn validate_state(
        &self,
        state_token: &str,
        platform: Platform,
    ) -> Result<Option<OAuthState>> {
        let now = chrono::Utc::now().timestamp();
        self.validate_state_at(state_token, platform, now).await
    }

    /// Consume a state token.
    ///
    /// The check and the pending→completed flip are one conditional UPDATE,
    /// so concurrent callbacks carrying the same token see exactly one
    /// success. Unknown, expired, replayed and wrong-platform tokens all
    /// return `None`.
    pub async fn validate_state_at(
        &self,
        state_token: &str,
        platform: Platform,
        now: i64,
    ) -> Result<Option<OAuthState>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE oauth_states
            SET status = 'completed', completed_at = ?
            WHERE state_token = ? AND platform = ? AND status = 'pending' AND expires_at >= ?
            RETURNING {}
            "#,
            STATE_COLUMNS
        ))
        .bind(now)
        .bind(state_token)
        .bind(platform.as_str())
        .bind(now)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_state).transpose()
    }

    /// Delete states past their expiry, consumed or not
    pub async fn purge_expired(&self, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at < ?")
            .bind(now)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected())
    }
}

fn row_to_state(row: &SqliteRow) -> Result<OAuthState> {
    Ok(OAuthState {
        state_token: row.try_get("state_token").map_err(DbError::SqlxError)?,
        user_id: row.try_get("user_id").map_err(DbError::SqlxError)?,
        platform: decode_text::<Platform>(row, "platform")?,
        code_verifier: row.try_get("code_verifier").map_err(DbError::SqlxError)?,
        code_challenge: row.try_get("code_challenge").map_err(DbError::SqlxError)?,
        redirect_uri: row.try_get("redirect_uri").map_err(DbError::SqlxError)?,
        scopes: decode_json(row, "scopes")?,
        status: decode_text::<OAuthStatus>(row, "status")?,
        created_at: row.try_get("created_at").map_err(DbError::SqlxError)?,
        expires_at: row.try_get("expires_at").map_err(DbError::SqlxError)?,
        completed_at: row.try_get("completed_at").map_err(DbError::SqlxError)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (StateManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("state.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (StateManager::new(db, 600), temp_dir)
    }

    #[tokio::test]
    async fn test_pkce_pair_is_bound_to_state() {
        let (states, _dir) = setup().await;
        let issued = states
            .generate_state_at("user1", Platform::Twitter, "https://app/cb", &[], true, 1_000)
            .await
            .unwrap();

        let verifier = issued.code_verifier.clone().unwrap();
        assert_eq!(issued.code_challenge.as_deref(), Some(code_challenge(&verifier).as_str()));
        assert_eq!(issued.expires_at, 1_600);

        let stored = states
            .validate_state_at(&issued.state_token, Platform::Twitter, 1_001)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.code_verifier, Some(verifier));
        assert_eq!(stored.status, OAuthStatus::Completed);
        assert_eq!(stored.completed_at, Some(1_001));
    }

    #[tokio::test]
    async fn test_without_pkce_no_verifier_is_stored() {
        let (states, _dir) = setup().await;
        let issued = states
            .generate_state_at("user1", Platform::Instagram, "https://app/cb", &[], false, 1_000)
            .await
            .unwrap();
        assert!(issued.code_verifier.is_none());
        assert!(issued.code_challenge.is_none());
    }

    #[tokio::test]
    async fn test_state_validates_exactly_once() {
        let (states, _dir) = setup().await;
        let issued = states
            .generate_state_at("user1", Platform::Twitter, "https://app/cb", &[], true, 1_000)
            .await
            .unwrap();

        assert!(states
            .validate_state_at(&issued.state_token, Platform::Twitter, 1_010)
            .await
            .unwrap()
            .is_some());
        assert!(states
            .validate_state_at(&issued.state_token, Platform::Twitter, 1_011)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_state_is_rejected_even_if_unused() {
        let (states, _dir) = setup().await;
        let issued = states
            .generate_state_at("user1", Platform::Twitter, "https://app/cb", &[], true, 1_000)
            .await
            .unwrap();

        assert!(states
            .validate_state_at(&issued.state_token, Platform::Twitter, 1_601)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_state_is_bound_to_platform() {
        let (states, _dir) = setup().await;
        let issued = states
            .generate_state_at("user1", Platform::Twitter, "https://app/cb", &[], true, 1_000)
            .await
            .unwrap();

        assert!(states
            .validate_state_at(&issued.state_token, Platform::LinkedIn, 1_001)
            .await
            .unwrap()
            .is_none());
        // A mismatch does not consume the token
        assert!(states
            .validate_state_at(&issued.state_token, Platform::Twitter, 1_002)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (states, _dir) = setup().await;
        states
            .generate_state_at("user1", Platform::Twitter, "https://app/cb", &[], true, 1_000)
            .await
            .unwrap();
        states
            .generate_state_at("user1", Platform::Twitter, "https://app/cb", &[], true, 2_000)
            .await
            .unwrap();

        assert_eq!(states.purge_expired(2_000).await.unwrap(), 1);
    }
}
