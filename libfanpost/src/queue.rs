//! Scheduling queue
//!
//! One logical post fans out into one queue entry per platform. Entries
//! settle independently (`pending → completed` or `pending → failed`) and the
//! post status is derived from them: any completed entry makes the post
//! published, otherwise pending entries keep it scheduled, and a post whose
//! entries all failed is failed.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Database, PostOutcome};
use crate::error::{FanpostError, Result, ValidationError};
use crate::types::{Platform, PostStatus, QueueEntry, QueueStatus, ScheduledPost};

/// Post version conflicts tolerated before giving up on an aggregation
const AGGREGATE_RETRIES: usize = 3;

/// Entries of one post with their aggregate counts
#[derive(Debug, Clone, Serialize)]
pub struct QueueSummary {
    pub post_id: String,
    pub entries: Vec<QueueEntry>,
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    /// Earliest pending entry
    pub next_scheduled: Option<QueueEntry>,
}

impl QueueSummary {
    fn from_entries(post_id: &str, entries: Vec<QueueEntry>) -> Self {
        let count = |status: QueueStatus| entries.iter().filter(|e| e.status == status).count();
        let pending = count(QueueStatus::Pending);
        let completed = count(QueueStatus::Completed);
        let failed = count(QueueStatus::Failed);
        let next_scheduled = entries
            .iter()
            .filter(|e| e.status == QueueStatus::Pending)
            .min_by_key(|e| e.scheduled_for)
            .cloned();

        Self {
            post_id: post_id.to_string(),
            total: entries.len(),
            pending,
            completed,
            failed,
            next_scheduled,
            entries,
        }
    }
}

/// Derive a post's outcome from its entries; `None` when it has no entries
pub fn aggregate_post(post: &ScheduledPost, entries: &[QueueEntry]) -> Option<PostOutcome> {
    if entries.is_empty() {
        return None;
    }

    let first_success = entries
        .iter()
        .filter(|e| e.status == QueueStatus::Completed)
        .min_by_key(|e| e.completed_at.unwrap_or(i64::MAX));

    if let Some(first) = first_success {
        return Some(PostOutcome {
            status: PostStatus::Published,
            published_at: post.published_at.or(first.completed_at),
            platform_post_id: first.platform_post_id.clone(),
            platform_post_url: first.platform_post_url.clone(),
        });
    }

    let status = if entries.iter().any(|e| e.status == QueueStatus::Pending) {
        PostStatus::Scheduled
    } else {
        PostStatus::Failed
    };
    Some(PostOutcome {
        status,
        published_at: None,
        platform_post_id: None,
        platform_post_url: None,
    })
}

#[derive(Clone)]
pub struct SchedulingQueue {
    db: Database,
}

impl SchedulingQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Store a new draft post
    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        if post.content.trim().is_empty() && post.media_urls.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        self.db.create_post(post).await?;
        debug!(post_id = %post.id, "created draft post");
        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        self.db.get_post(post_id).await
    }

    pub async fn list_posts(
        &self,
        user_id: &str,
        status: Option<PostStatus>,
    ) -> Result<Vec<ScheduledPost>> {
        self.db.list_posts(user_id, status).await
    }

    /// Load a post of `user_id`; other users' posts read as missing
    async fn owned_post(&self, post_id: &str, user_id: &str) -> Result<ScheduledPost> {
        match self.db.get_post(post_id).await? {
            Some(post) if post.user_id == user_id => Ok(post),
            _ => Err(FanpostError::InvalidInput(format!(
                "post {} not found",
                post_id
            ))),
        }
    }

    /// Replace every entry of the post with one pending entry per platform.
    ///
    /// Rescheduling with a different platform set drops the entries of
    /// platforms no longer requested, including settled ones.
    pub async fn schedule_post(
        &self,
        post_id: &str,
        user_id: &str,
        platforms: &[Platform],
        scheduled_for: i64,
    ) -> Result<Vec<QueueEntry>> {
        let mut distinct: Vec<Platform> = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if !distinct.contains(platform) {
                distinct.push(*platform);
            }
        }
        if distinct.is_empty() {
            return Err(ValidationError::NoPlatforms.into());
        }

        self.owned_post(post_id, user_id).await?;

        let now = chrono::Utc::now().timestamp();
        let entries = self
            .db
            .replace_queue_entries(post_id, user_id, &distinct, scheduled_for, now)
            .await?;

        info!(
            post_id,
            platforms = ?distinct,
            scheduled_for,
            "post scheduled"
        );
        Ok(entries)
    }

    /// Drop pending entries and return the post to draft
    pub async fn unschedule_post(&self, post_id: &str, user_id: &str) -> Result<u64> {
        self.owned_post(post_id, user_id).await?;
        let removed = self
            .db
            .unschedule_post(post_id, chrono::Utc::now().timestamp())
            .await?;
        info!(post_id, removed, "post unscheduled");
        Ok(removed)
    }

    pub async fn queue_status(&self, post_id: &str, user_id: &str) -> Result<QueueSummary> {
        self.owned_post(post_id, user_id).await?;
        let entries = self.db.list_queue_entries(post_id).await?;
        Ok(QueueSummary::from_entries(post_id, entries))
    }

    /// Delete the entry of one platform, then re-derive the post status
    pub async fn delete_entry(
        &self,
        post_id: &str,
        user_id: &str,
        platform: Platform,
    ) -> Result<bool> {
        self.owned_post(post_id, user_id).await?;
        let deleted = self.db.delete_queue_entry(post_id, platform).await?;
        if deleted {
            debug!(post_id, %platform, "queue entry deleted");
            self.aggregate(post_id).await?;
        }
        Ok(deleted)
    }

    /// Write the aggregated outcome onto the post, retrying on version
    /// conflicts. Returns the resulting status, or `None` if the post has no
    /// entries left or is gone. Draft posts are left as they are: settled
    /// entries surviving an unschedule do not republish them.
    pub async fn aggregate(&self, post_id: &str) -> Result<Option<PostStatus>> {
        for _ in 0..AGGREGATE_RETRIES {
            let post = match self.db.get_post(post_id).await? {
                Some(post) => post,
                None => return Ok(None),
            };
            if post.status == PostStatus::Draft {
                return Ok(Some(PostStatus::Draft));
            }
            let entries = self.db.list_queue_entries(post_id).await?;
            let outcome = match aggregate_post(&post, &entries) {
                Some(outcome) => outcome,
                None => return Ok(None),
            };

            let unchanged = post.status == outcome.status
                && post.published_at == outcome.published_at
                && post.platform_post_id == outcome.platform_post_id
                && post.platform_post_url == outcome.platform_post_url;
            if unchanged {
                return Ok(Some(outcome.status));
            }

            let now = chrono::Utc::now().timestamp();
            if self
                .db
                .update_post_outcome(post_id, post.version, &outcome, now)
                .await?
            {
                debug!(post_id, status = %outcome.status, "post status aggregated");
                return Ok(Some(outcome.status));
            }
            debug!(post_id, "post version moved during aggregation, retrying");
        }

        warn!(post_id, "gave up aggregating post after repeated version conflicts");
        Err(FanpostError::Dispatch(format!(
            "post {} changed concurrently during aggregation",
            post_id
        )))
    }
}
