//! Database operations for Fanpost

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::accounts::AccountUpsert;
use crate::error::{DbError, Result};
use crate::oauth::TokenSet;
use crate::types::{
    AccountStatus, ConnectedAccount, Platform, PlatformProfile, PostStatus, QueueEntry,
    QueueStatus, ScheduledPost,
};

const POST_COLUMNS: &str = "id, user_id, content, platforms, media_urls, hashtags, metadata, \
     status, scheduled_for, published_at, platform_post_id, platform_post_url, version, \
     created_at, updated_at";

const QUEUE_COLUMNS: &str = "id, post_id, user_id, platform, scheduled_for, status, attempts, \
     error_message, platform_post_id, platform_post_url, version, claimed_by, \
     lease_expires_at, created_at, updated_at, completed_at";

const ACCOUNT_COLUMNS: &str = "id, user_id, platform, platform_user_id, access_token, \
     refresh_token, token_expires_at, scopes, status, error_count, last_error, username, \
     display_name, avatar_url, follower_count, following_count, capabilities, created_at, \
     updated_at, last_synced_at";

/// Final state written onto a post after its entries settle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOutcome {
    pub status: PostStatus,
    pub published_at: Option<i64>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // Forward slashes work for SQLite URLs on both Windows and Unix
        let db_url = format!("sqlite://{}", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, content, platforms, media_urls, hashtags, metadata,
                               status, scheduled_for, published_at, platform_post_id,
                               platform_post_url, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.content)
        .bind(encode_json(&post.platforms)?)
        .bind(encode_json(&post.media_urls)?)
        .bind(encode_json(&post.hashtags)?)
        .bind(encode_json(&post.metadata)?)
        .bind(post.status.as_str())
        .bind(post.scheduled_for)
        .bind(post.published_at)
        .bind(&post.platform_post_id)
        .bind(&post.platform_post_url)
        .bind(post.version)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_post).transpose()
    }

    pub async fn list_posts(
        &self,
        user_id: &str,
        status: Option<PostStatus>,
    ) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE user_id = ? AND (? IS NULL OR status = ?) \
             ORDER BY COALESCE(scheduled_for, created_at) ASC",
            POST_COLUMNS
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// Write the aggregated outcome if the post is still at `expected_version`
    pub async fn update_post_outcome(
        &self,
        post_id: &str,
        expected_version: i64,
        outcome: &PostOutcome,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, published_at = ?, platform_post_id = ?, platform_post_url = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(outcome.published_at)
        .bind(&outcome.platform_post_id)
        .bind(&outcome.platform_post_url)
        .bind(now)
        .bind(post_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Queue entries
    // ------------------------------------------------------------------

    /// Replace every entry of a post with one fresh pending entry per platform
    /// and mark the post scheduled, in one transaction
    pub async fn replace_queue_entries(
        &self,
        post_id: &str,
        user_id: &str,
        platforms: &[Platform],
        scheduled_for: i64,
        now: i64,
    ) -> Result<Vec<QueueEntry>> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query("DELETE FROM queue_entries WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        let mut entries = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO queue_entries (id, post_id, user_id, platform, scheduled_for, status,
                                           attempts, version, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 'pending', 0, 0, ?, ?)
                RETURNING {}
                "#,
                QUEUE_COLUMNS
            ))
            .bind(Uuid::new_v4().to_string())
            .bind(post_id)
            .bind(user_id)
            .bind(platform.as_str())
            .bind(scheduled_for)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
            entries.push(row_to_queue_entry(&row)?);
        }

        sqlx::query(
            r#"
            UPDATE posts
            SET status = 'scheduled', scheduled_for = ?, platforms = ?, published_at = NULL,
                platform_post_id = NULL, platform_post_url = NULL,
                version = version + 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(scheduled_for)
        .bind(encode_json(&platforms)?)
        .bind(now)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(entries)
    }

    /// Delete pending entries and return the post to draft; returns the number
    /// of entries removed
    pub async fn unschedule_post(&self, post_id: &str, now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let deleted =
            sqlx::query("DELETE FROM queue_entries WHERE post_id = ? AND status = 'pending'")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?
                .rows_affected();

        sqlx::query(
            r#"
            UPDATE posts
            SET status = 'draft', scheduled_for = NULL, version = version + 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(deleted)
    }

    pub async fn list_queue_entries(&self, post_id: &str) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queue_entries WHERE post_id = ? \
             ORDER BY scheduled_for ASC, platform ASC",
            QUEUE_COLUMNS
        ))
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_queue_entry).collect()
    }

    pub async fn delete_queue_entry(&self, post_id: &str, platform: Platform) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE post_id = ? AND platform = ?")
            .bind(post_id)
            .bind(platform.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim up to `limit` due entries for `worker`.
    ///
    /// Each claim is a compare-and-set on the entry version, so two workers
    /// racing for the same entry cannot both win it. Entries whose lease has
    /// lapsed become claimable again.
    pub async fn claim_due_entries(
        &self,
        now: i64,
        worker: &str,
        lease_secs: i64,
        limit: i64,
    ) -> Result<Vec<QueueEntry>> {
        let candidates: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT id, version FROM queue_entries
            WHERE status = 'pending' AND scheduled_for <= ?
              AND (lease_expires_at IS NULL OR lease_expires_at < ?)
            ORDER BY scheduled_for ASC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for (id, version) in candidates {
            let row = sqlx::query(&format!(
                r#"
                UPDATE queue_entries
                SET version = version + 1, claimed_by = ?, lease_expires_at = ?, updated_at = ?
                WHERE id = ? AND version = ? AND status = 'pending'
                RETURNING {}
                "#,
                QUEUE_COLUMNS
            ))
            .bind(worker)
            .bind(now + lease_secs)
            .bind(now)
            .bind(&id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

            if let Some(row) = row {
                claimed.push(row_to_queue_entry(&row)?);
            }
        }

        Ok(claimed)
    }

    /// Re-read an entry, returning it only if it is still pending under this claim
    pub async fn get_claimed_entry(
        &self,
        entry_id: &str,
        version: i64,
    ) -> Result<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM queue_entries WHERE id = ? AND version = ? AND status = 'pending'",
            QUEUE_COLUMNS
        ))
        .bind(entry_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_queue_entry).transpose()
    }

    pub async fn complete_entry(
        &self,
        entry_id: &str,
        version: i64,
        platform_post_id: Option<&str>,
        platform_post_url: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'completed', attempts = attempts + 1, error_message = NULL,
                platform_post_id = ?, platform_post_url = ?, claimed_by = NULL,
                lease_expires_at = NULL, updated_at = ?, completed_at = ?
            WHERE id = ? AND version = ? AND status = 'pending'
            "#,
        )
        .bind(platform_post_id)
        .bind(platform_post_url)
        .bind(now)
        .bind(now)
        .bind(entry_id)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark an entry failed. `count_attempt` is false for rejections that
    /// never reached the platform.
    pub async fn fail_entry(
        &self,
        entry_id: &str,
        version: i64,
        error: &str,
        count_attempt: bool,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'failed', attempts = attempts + ?, error_message = ?,
                claimed_by = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE id = ? AND version = ? AND status = 'pending'
            "#,
        )
        .bind(if count_attempt { 1_i64 } else { 0_i64 })
        .bind(error)
        .bind(now)
        .bind(entry_id)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Connected accounts
    // ------------------------------------------------------------------

    /// Insert or refresh the account identified by (user, platform, platform user)
    pub async fn upsert_account(
        &self,
        upsert: &AccountUpsert,
        now: i64,
    ) -> Result<ConnectedAccount> {
        let profile = &upsert.profile;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO connected_accounts (
                id, user_id, platform, platform_user_id, access_token, refresh_token,
                token_expires_at, scopes, status, error_count, last_error, username,
                display_name, avatar_url, follower_count, following_count, capabilities,
                created_at, updated_at, last_synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'connected', 0, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, platform, platform_user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, connected_accounts.refresh_token),
                token_expires_at = excluded.token_expires_at,
                scopes = excluded.scopes,
                status = 'connected',
                error_count = 0,
                last_error = NULL,
                username = excluded.username,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                follower_count = excluded.follower_count,
                following_count = excluded.following_count,
                capabilities = excluded.capabilities,
                updated_at = excluded.updated_at,
                last_synced_at = excluded.last_synced_at
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&upsert.user_id)
        .bind(upsert.platform.as_str())
        .bind(&profile.platform_user_id)
        .bind(&upsert.tokens.access_token)
        .bind(&upsert.tokens.refresh_token)
        .bind(upsert.tokens.expires_at)
        .bind(encode_json(&upsert.scopes)?)
        .bind(&profile.username)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(profile.follower_count)
        .bind(profile.following_count)
        .bind(encode_json(&profile.capabilities)?)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row_to_account(&row)
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM connected_accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// The account a user publishes through on `platform`: a connected one if
    /// any, otherwise the most recently updated
    pub async fn find_account(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM connected_accounts
            WHERE user_id = ? AND platform = ?
            ORDER BY (status = 'connected') DESC, updated_at DESC
            LIMIT 1
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<ConnectedAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM connected_accounts WHERE user_id = ? ORDER BY platform, created_at",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_account).collect()
    }

    /// Store refreshed tokens; a missing refresh token keeps the stored one
    /// Store refreshed tokens, but only while the account still holds the
    /// refresh token that was presented. Returns `None` when another writer
    /// rotated it first (or the account is gone).
    pub async fn update_account_tokens(
        &self,
        account_id: &str,
        presented_refresh_token: &str,
        tokens: &TokenSet,
        now: i64,
    ) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE connected_accounts
            SET access_token = ?, refresh_token = COALESCE(?, refresh_token),
                token_expires_at = ?, status = 'connected', error_count = 0,
                last_error = NULL, updated_at = ?
            WHERE id = ? AND refresh_token IS ?
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&tokens.access_token)
        .bind(tokens.refresh_token.as_deref())
        .bind(tokens.expires_at)
        .bind(now)
        .bind(account_id)
        .bind(presented_refresh_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    pub async fn update_account_profile(
        &self,
        account_id: &str,
        profile: &PlatformProfile,
        now: i64,
    ) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE connected_accounts
            SET username = ?, display_name = ?, avatar_url = ?, follower_count = ?,
                following_count = ?, capabilities = ?, status = 'connected', error_count = 0,
                last_error = NULL, updated_at = ?, last_synced_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&profile.username)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(profile.follower_count)
        .bind(profile.following_count)
        .bind(encode_json(&profile.capabilities)?)
        .bind(now)
        .bind(now)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Flip an account to `error`, keeping its tokens
    pub async fn record_account_error(
        &self,
        account_id: &str,
        error: &str,
        now: i64,
    ) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE connected_accounts
            SET status = 'error', last_error = ?, error_count = error_count + 1, updated_at = ?
            WHERE id = ?
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(error)
        .bind(now)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Record a rejected refresh, unless the refresh token was rotated by
    /// another writer in the meantime. Returns `None` in that case.
    pub async fn record_refresh_failure(
        &self,
        account_id: &str,
        presented_refresh_token: &str,
        error: &str,
        now: i64,
    ) -> Result<Option<ConnectedAccount>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE connected_accounts
            SET status = 'error', last_error = ?, error_count = error_count + 1, updated_at = ?
            WHERE id = ? AND refresh_token IS ?
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(error)
        .bind(now)
        .bind(account_id)
        .bind(presented_refresh_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    pub async fn delete_account(&self, account_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM connected_accounts WHERE id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| DbError::decode("json", e).into())
}

pub(crate) fn decode_json<T: DeserializeOwned>(row: &SqliteRow, column: &'static str) -> Result<T> {
    let raw: String = row.try_get(column).map_err(DbError::SqlxError)?;
    serde_json::from_str(&raw).map_err(|e| DbError::decode(column, e).into())
}

pub(crate) fn decode_text<T>(row: &SqliteRow, column: &'static str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(DbError::SqlxError)?;
    raw.parse().map_err(|e| DbError::decode(column, e).into())
}

fn get<'r, T>(row: &'r SqliteRow, column: &'static str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| DbError::SqlxError(e).into())
}

fn row_to_post(row: &SqliteRow) -> Result<ScheduledPost> {
    Ok(ScheduledPost {
        id: get(row, "id")?,
        user_id: get(row, "user_id")?,
        content: get(row, "content")?,
        platforms: decode_json(row, "platforms")?,
        media_urls: decode_json(row, "media_urls")?,
        hashtags: decode_json(row, "hashtags")?,
        metadata: decode_json(row, "metadata")?,
        status: decode_text::<PostStatus>(row, "status")?,
        scheduled_for: get(row, "scheduled_for")?,
        published_at: get(row, "published_at")?,
        platform_post_id: get(row, "platform_post_id")?,
        platform_post_url: get(row, "platform_post_url")?,
        version: get(row, "version")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn row_to_queue_entry(row: &SqliteRow) -> Result<QueueEntry> {
    Ok(QueueEntry {
        id: get(row, "id")?,
        post_id: get(row, "post_id")?,
        user_id: get(row, "user_id")?,
        platform: decode_text::<Platform>(row, "platform")?,
        scheduled_for: get(row, "scheduled_for")?,
        status: decode_text::<QueueStatus>(row, "status")?,
        attempts: get::<i64>(row, "attempts")? as u32,
        error_message: get(row, "error_message")?,
        platform_post_id: get(row, "platform_post_id")?,
        platform_post_url: get(row, "platform_post_url")?,
        version: get(row, "version")?,
        claimed_by: get(row, "claimed_by")?,
        lease_expires_at: get(row, "lease_expires_at")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        completed_at: get(row, "completed_at")?,
    })
}

fn row_to_account(row: &SqliteRow) -> Result<ConnectedAccount> {
    Ok(ConnectedAccount {
        id: get(row, "id")?,
        user_id: get(row, "user_id")?,
        platform: decode_text::<Platform>(row, "platform")?,
        platform_user_id: get(row, "platform_user_id")?,
        access_token: get(row, "access_token")?,
        refresh_token: get(row, "refresh_token")?,
        token_expires_at: get(row, "token_expires_at")?,
        scopes: decode_json(row, "scopes")?,
        status: decode_text::<AccountStatus>(row, "status")?,
        error_count: get::<i64>(row, "error_count")? as u32,
        last_error: get(row, "last_error")?,
        username: get(row, "username")?,
        display_name: get(row, "display_name")?,
        avatar_url: get(row, "avatar_url")?,
        follower_count: get(row, "follower_count")?,
        following_count: get(row, "following_count")?,
        capabilities: decode_json(row, "capabilities")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        last_synced_at: get(row, "last_synced_at")?,
    })
}
