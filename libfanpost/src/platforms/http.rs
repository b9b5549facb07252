//! Platform client backed by a publishing bridge over HTTP
//!
//! Each platform is reached through two configured endpoints: a profile
//! endpoint answering `GET` with the account profile, and a publish endpoint
//! accepting a JSON `POST`. Both receive the account's access token as a
//! bearer credential.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PlatformClient, PublishOutcome, PublishRequest};
use crate::error::{FanpostError, PlatformError, Result};
use crate::types::{Platform, PlatformProfile};

/// Map an HTTP failure status onto the platform error taxonomy
fn map_status_error(status: StatusCode, detail: &str) -> PlatformError {
    let message = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, detail)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimit(message),
        s if s.is_server_error() => PlatformError::Server(message),
        _ => PlatformError::Rejected(message),
    }
}

fn map_transport_error(error: reqwest::Error) -> PlatformError {
    if error.is_timeout() {
        PlatformError::Network(format!("request timed out: {}", error))
    } else {
        PlatformError::Network(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    follower_count: Option<i64>,
    #[serde(default)]
    following_count: Option<i64>,
    #[serde(default)]
    capabilities: BTreeMap<String, bool>,
}

impl From<ProfileResponse> for PlatformProfile {
    fn from(r: ProfileResponse) -> Self {
        PlatformProfile {
            platform_user_id: r.id,
            username: r.username,
            display_name: r.display_name,
            avatar_url: r.avatar_url,
            follower_count: r.follower_count,
            following_count: r.following_count,
            capabilities: r.capabilities,
        }
    }
}

#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    platform: Platform,
    #[serde(flatten)]
    request: &'a PublishRequest<'a>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "message")]
    error: String,
}

pub struct HttpPlatformClient {
    platform: Platform,
    http: reqwest::Client,
    profile_url: String,
    publish_url: String,
}

impl HttpPlatformClient {
    pub fn new(platform: Platform, profile_url: &str, publish_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                PlatformError::NotConfigured(format!("HTTP client setup failed: {}", e))
            })?;
        Ok(Self {
            platform,
            http,
            profile_url: profile_url.to_string(),
            publish_url: publish_url.to_string(),
        })
    }

    async fn send_publish(
        &self,
        access_token: &str,
        request: &PublishRequest<'_>,
    ) -> std::result::Result<PublishResponse, PlatformError> {
        let body = PublishBody {
            platform: self.platform,
            request,
        };
        let response = self
            .http
            .post(&self.publish_url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            warn!(platform = %self.platform, %status, body = %text, "publish rejected");
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error)
                .unwrap_or_default();
            return Err(map_status_error(status, &detail));
        }

        serde_json::from_str(&text)
            .map_err(|e| PlatformError::Rejected(format!("malformed publish response: {}", e)))
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn get_profile(&self, access_token: &str) -> Result<PlatformProfile> {
        let response = self
            .http
            .get(&self.profile_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                FanpostError::ProfileFetch(format!("{}: {}", self.platform, map_transport_error(e)))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(platform = %self.platform, %status, body = %body, "profile request rejected");
            return Err(FanpostError::ProfileFetch(format!(
                "{}: {}",
                self.platform,
                map_status_error(status, "")
            )));
        }

        let profile: ProfileResponse = response.json().await.map_err(|e| {
            FanpostError::ProfileFetch(format!("{}: malformed profile: {}", self.platform, e))
        })?;
        debug!(platform = %self.platform, user = %profile.id, "fetched profile");
        Ok(profile.into())
    }

    async fn publish_post(
        &self,
        access_token: &str,
        request: &PublishRequest<'_>,
    ) -> PublishOutcome {
        match self.send_publish(access_token, request).await {
            Ok(published) => PublishOutcome::published(published.id, published.url),
            Err(e) => PublishOutcome::failed(e.to_string()),
        }
    }
}
