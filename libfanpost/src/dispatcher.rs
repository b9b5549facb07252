//! Publish dispatcher
//!
//! Each tick claims the due queue entries, groups them by post and runs the
//! groups concurrently. Entries of one post are published in parallel and the
//! task owning the post aggregates their outcomes onto it once they settle.
//!
//! A claim bumps the entry version and sets a lease, so dispatchers running
//! side by side never publish the same entry twice. The claim is re-checked
//! right before the external call, which also catches entries removed by an
//! unschedule while the tick was running.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::AccountService;
use crate::config::SchedulingConfig;
use crate::error::Result;
use crate::platforms::{PlatformClients, PublishRequest};
use crate::queue::SchedulingQueue;
use crate::registry::validate_for_platform;
use crate::types::{AccountStatus, QueueEntry, ScheduledPost};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Posts dispatched at the same time
    pub max_concurrency: usize,
    /// Entries claimed per tick
    pub batch_size: i64,
    pub lease_secs: i64,
    pub refresh_skew_secs: i64,
}

impl From<&SchedulingConfig> for DispatchSettings {
    fn from(config: &SchedulingConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            batch_size: config.batch_size,
            lease_secs: config.lease_secs,
            refresh_skew_secs: config.refresh_skew_secs,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&SchedulingConfig::default())
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub claimed: usize,
    pub published: usize,
    /// Failed after reaching the publish step or account resolution
    pub failed: usize,
    /// Rejected by content validation, without an external call
    pub rejected: usize,
    /// Claim lost before settling (unscheduled, reclaimed, or a storage error)
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Published,
    Failed,
    Rejected,
    Skipped,
}

pub struct Dispatcher {
    queue: SchedulingQueue,
    accounts: AccountService,
    clients: PlatformClients,
    worker_id: String,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        queue: SchedulingQueue,
        accounts: AccountService,
        clients: PlatformClients,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            accounts,
            clients,
            worker_id: format!("dispatcher-{}", Uuid::new_v4()),
            settings,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(chrono::Utc::now().timestamp()).await
    }

    /// Claim and process every entry due at `now`
    pub async fn tick_at(&self, now: i64) -> Result<TickReport> {
        let claimed = self
            .queue
            .db()
            .claim_due_entries(
                now,
                &self.worker_id,
                self.settings.lease_secs,
                self.settings.batch_size,
            )
            .await?;

        let mut report = TickReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }
        info!(worker = %self.worker_id, count = claimed.len(), "claimed due entries");

        let mut by_post: BTreeMap<String, Vec<QueueEntry>> = BTreeMap::new();
        for entry in claimed {
            by_post.entry(entry.post_id.clone()).or_default().push(entry);
        }

        let outcomes: Vec<Vec<EntryOutcome>> = stream::iter(by_post)
            .map(|(post_id, entries)| async move { self.dispatch_post(&post_id, entries).await })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                EntryOutcome::Published => report.published += 1,
                EntryOutcome::Failed => report.failed += 1,
                EntryOutcome::Rejected => report.rejected += 1,
                EntryOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            published = report.published,
            failed = report.failed,
            rejected = report.rejected,
            skipped = report.skipped,
            "dispatch tick finished"
        );
        Ok(report)
    }

    async fn dispatch_post(&self, post_id: &str, entries: Vec<QueueEntry>) -> Vec<EntryOutcome> {
        let post = match self.queue.get_post(post_id).await {
            Ok(Some(post)) => post,
            Ok(None) => {
                debug!(post_id, "post vanished before dispatch");
                return vec![EntryOutcome::Skipped; entries.len()];
            }
            Err(e) => {
                warn!(post_id, error = %e, "failed to load post for dispatch");
                return vec![EntryOutcome::Skipped; entries.len()];
            }
        };

        let outcomes =
            join_all(entries.iter().map(|entry| self.dispatch_entry(&post, entry))).await;

        if outcomes.iter().any(|o| *o != EntryOutcome::Skipped) {
            if let Err(e) = self.queue.aggregate(post_id).await {
                warn!(post_id, error = %e, "failed to aggregate post status");
            }
        }
        outcomes
    }

    async fn dispatch_entry(&self, post: &ScheduledPost, entry: &QueueEntry) -> EntryOutcome {
        let platform = entry.platform;

        let account = match self.accounts.find_for_dispatch(&entry.user_id, platform).await {
            Ok(Some(account)) => account,
            Ok(None) => return self.fail(entry, "account not found", true).await,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "account lookup failed");
                return EntryOutcome::Skipped;
            }
        };
        if account.status != AccountStatus::Connected {
            let reason = format!(
                "{} account is not connected: {}",
                platform,
                account.last_error.as_deref().unwrap_or(account.status.as_str())
            );
            return self.fail(entry, &reason, true).await;
        }

        if let Err(violation) = validate_for_platform(post, platform) {
            debug!(entry_id = %entry.id, %platform, %violation, "content rejected");
            return self.fail(entry, &violation.to_string(), false).await;
        }

        let client = match self.clients.get(platform) {
            Ok(client) => client,
            Err(e) => return self.fail(entry, &e.to_string(), false).await,
        };

        let account = match self
            .accounts
            .ensure_fresh_token(&account, self.settings.refresh_skew_secs)
            .await
        {
            Ok(account) => account,
            Err(e) => {
                return self
                    .fail(entry, &format!("token refresh failed: {}", e), true)
                    .await
            }
        };

        match self
            .queue
            .db()
            .get_claimed_entry(&entry.id, entry.version)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(entry_id = %entry.id, "claim no longer held, skipping");
                return EntryOutcome::Skipped;
            }
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "claim re-check failed");
                return EntryOutcome::Skipped;
            }
        }

        let text = post.render_text();
        let request = PublishRequest {
            content: &text,
            media_urls: &post.media_urls,
            metadata: post.metadata_for(platform),
        };
        let outcome = client.publish_post(&account.access_token, &request).await;
        let now = chrono::Utc::now().timestamp();

        if !outcome.success {
            let error = outcome
                .error
                .unwrap_or_else(|| "publish failed without an error message".to_string());
            warn!(entry_id = %entry.id, %platform, error = %error, "publish failed");
            return self.fail(entry, &error, true).await;
        }

        match self
            .queue
            .db()
            .complete_entry(
                &entry.id,
                entry.version,
                outcome.platform_post_id.as_deref(),
                outcome.platform_post_url.as_deref(),
                now,
            )
            .await
        {
            Ok(true) => {
                info!(
                    post_id = %entry.post_id,
                    %platform,
                    platform_post_id = outcome.platform_post_id.as_deref().unwrap_or(""),
                    "published"
                );
                EntryOutcome::Published
            }
            Ok(false) => {
                warn!(
                    entry_id = %entry.id,
                    %platform,
                    "entry changed while publishing; result not recorded"
                );
                EntryOutcome::Skipped
            }
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "failed to record publish");
                EntryOutcome::Skipped
            }
        }
    }

    async fn fail(&self, entry: &QueueEntry, error: &str, count_attempt: bool) -> EntryOutcome {
        let now = chrono::Utc::now().timestamp();
        match self
            .queue
            .db()
            .fail_entry(&entry.id, entry.version, error, count_attempt, now)
            .await
        {
            Ok(true) => {
                debug!(entry_id = %entry.id, platform = %entry.platform, error, "entry failed");
                if count_attempt {
                    EntryOutcome::Failed
                } else {
                    EntryOutcome::Rejected
                }
            }
            Ok(false) => EntryOutcome::Skipped,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "failed to record entry failure");
                EntryOutcome::Skipped
            }
        }
    }
}
