//! Platform client capability
//!
//! The publish and profile APIs of each network live behind
//! [`PlatformClient`]. The dispatcher and the account lifecycle never talk to
//! a network directly; they look the client up in [`PlatformClients`], a
//! table keyed by the closed [`Platform`] enum.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libfanpost::platforms::{mock::MockPlatformClient, PlatformClients};
//! use libfanpost::types::Platform;
//!
//! let clients = PlatformClients::new()
//!     .with(Arc::new(MockPlatformClient::success(Platform::Twitter)));
//! assert!(clients.get(Platform::Twitter).is_ok());
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{Platform, PlatformMetadata, PlatformProfile};

pub mod http;
pub mod mock;

/// What a platform is asked to publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest<'a> {
    pub content: &'a str,
    pub media_urls: &'a [String],
    pub metadata: Option<&'a PlatformMetadata>,
}

/// Result of one publish call.
///
/// Failures are values, not errors: nothing may propagate out of a
/// `publish_post` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn published(platform_post_id: String, platform_post_url: Option<String>) -> Self {
        Self {
            success: true,
            platform_post_id: Some(platform_post_id),
            platform_post_url,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            platform_post_id: None,
            platform_post_url: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch the profile behind `access_token`
    ///
    /// # Errors
    ///
    /// Returns `FanpostError::ProfileFetch` when the platform cannot be reached
    /// or rejects the token.
    async fn get_profile(&self, access_token: &str) -> Result<PlatformProfile>;

    async fn publish_post(
        &self,
        access_token: &str,
        request: &PublishRequest<'_>,
    ) -> PublishOutcome;
}

/// Lookup table from platform to its client
#[derive(Clone, Default)]
pub struct PlatformClients {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under the platform it reports
    pub fn with(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.clients.insert(client.platform(), client);
        self
    }

    /// Build HTTP bridge clients for every platform with both endpoints configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut clients = Self::new();
        for (platform, cfg) in &config.platforms {
            if let (Some(profile_url), Some(publish_url)) = (&cfg.profile_url, &cfg.publish_url) {
                let client = http::HttpPlatformClient::new(*platform, profile_url, publish_url)?;
                clients = clients.with(Arc::new(client));
            }
        }
        Ok(clients)
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformClient>> {
        self.clients.get(&platform).cloned().ok_or_else(|| {
            PlatformError::NotConfigured(format!("no client registered for {}", platform)).into()
        })
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.clients.keys().copied().collect();
        platforms.sort();
        platforms
    }
}
