//! Mock platform client for testing
//!
//! Simulates successes, failures and latency so the dispatcher and the
//! account lifecycle can be exercised without network access. Every call is
//! recorded for later verification.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{PlatformClient, PublishOutcome, PublishRequest};
use crate::error::{FanpostError, Result};
use crate::types::{Platform, PlatformProfile};

/// Configuration for mock client behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: Platform,

    /// Whether publishing should succeed
    pub publish_succeeds: bool,

    /// Error reported on publish failure
    pub publish_error: Option<String>,

    /// Profile returned by `get_profile`; `None` makes it fail
    pub profile: Option<PlatformProfile>,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    pub profile_call_count: Arc<Mutex<usize>>,

    pub publish_call_count: Arc<Mutex<usize>>,

    /// Content that has been published (for verification)
    pub published_content: Arc<Mutex<Vec<String>>>,

    /// Access tokens seen by publish calls
    pub seen_tokens: Arc<Mutex<Vec<String>>>,
}

impl MockConfig {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            publish_succeeds: true,
            publish_error: None,
            profile: Some(PlatformProfile {
                platform_user_id: format!("{}-user", platform),
                username: Some(format!("{}_handle", platform)),
                ..Default::default()
            }),
            delay: Duration::from_millis(0),
            profile_call_count: Arc::new(Mutex::new(0)),
            publish_call_count: Arc::new(Mutex::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
            seen_tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock platform client
pub struct MockPlatformClient {
    config: MockConfig,
    counter: Mutex<usize>,
}

impl MockPlatformClient {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            counter: Mutex::new(0),
        }
    }

    /// A client that always succeeds
    pub fn success(platform: Platform) -> Self {
        Self::new(MockConfig::new(platform))
    }

    /// A client whose publish calls fail with `error`
    pub fn publish_failure(platform: Platform, error: &str) -> Self {
        Self::new(MockConfig {
            publish_succeeds: false,
            publish_error: Some(error.to_string()),
            ..MockConfig::new(platform)
        })
    }

    /// A client whose profile calls fail
    pub fn profile_failure(platform: Platform) -> Self {
        Self::new(MockConfig {
            profile: None,
            ..MockConfig::new(platform)
        })
    }

    pub fn with_profile(platform: Platform, profile: PlatformProfile) -> Self {
        Self::new(MockConfig {
            profile: Some(profile),
            ..MockConfig::new(platform)
        })
    }

    pub fn with_delay(platform: Platform, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(platform)
        })
    }

    pub fn profile_call_count(&self) -> usize {
        *self.config.profile_call_count.lock().unwrap()
    }

    pub fn publish_call_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap()
    }

    pub fn published_content(&self) -> Vec<String> {
        self.config.published_content.lock().unwrap().clone()
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.config.seen_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformClient for MockPlatformClient {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    async fn get_profile(&self, _access_token: &str) -> Result<PlatformProfile> {
        *self.config.profile_call_count.lock().unwrap() += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        self.config.profile.clone().ok_or_else(|| {
            FanpostError::ProfileFetch(format!("{}: profile unavailable", self.config.platform))
        })
    }

    async fn publish_post(
        &self,
        access_token: &str,
        request: &PublishRequest<'_>,
    ) -> PublishOutcome {
        *self.config.publish_call_count.lock().unwrap() += 1;
        self.config
            .seen_tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if !self.config.publish_succeeds {
            return PublishOutcome::failed(
                self.config
                    .publish_error
                    .clone()
                    .unwrap_or_else(|| "Mock publish failure".to_string()),
            );
        }

        self.config
            .published_content
            .lock()
            .unwrap()
            .push(request.content.to_string());

        let n = {
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            *counter
        };
        let id = format!("{}-post-{}", self.config.platform, n);
        let url = format!("https://{}.example/p/{}", self.config.platform, id);
        PublishOutcome::published(id, Some(url))
    }
}
