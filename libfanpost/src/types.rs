//! Core types for Fanpost

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::FanpostError;

/// Supported platforms.
///
/// The set is closed: every variant has a registry entry and a client slot,
/// so adding one is caught by exhaustive matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Instagram,
    Facebook,
    LinkedIn,
    TikTok,
    YouTube,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Twitter,
        Platform::Instagram,
        Platform::Facebook,
        Platform::LinkedIn,
        Platform::TikTok,
        Platform::YouTube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::LinkedIn => "linkedin",
            Platform::TikTok => "tiktok",
            Platform::YouTube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = FanpostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "instagram" => Ok(Platform::Instagram),
            "facebook" => Ok(Platform::Facebook),
            "linkedin" => Ok(Platform::LinkedIn),
            "tiktok" => Ok(Platform::TikTok),
            "youtube" => Ok(Platform::YouTube),
            other => Err(FanpostError::InvalidInput(format!(
                "Unknown platform '{}'",
                other
            ))),
        }
    }
}

/// Generates `as_str`/`FromStr`/`Display` for the lowercase status columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = FanpostError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(FanpostError::InvalidInput(format!(
                        "Unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthStatus {
    Pending,
    Completed,
}

text_enum!(OAuthStatus { Pending => "pending", Completed => "completed" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Connected,
    Error,
    Disconnected,
}

text_enum!(AccountStatus {
    Connected => "connected",
    Error => "error",
    Disconnected => "disconnected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

text_enum!(PostStatus {
    Draft => "draft",
    Scheduled => "scheduled",
    Published => "published",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Completed,
    Failed,
}

text_enum!(QueueStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

/// A single-use OAuth state row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub state_token: String,
    pub user_id: String,
    pub platform: Platform,
    pub code_verifier: Option<String>,
    pub code_challenge: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub status: OAuthStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub completed_at: Option<i64>,
}

/// Profile snapshot as reported by a platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub platform_user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    /// Permission/capability flags reported by the platform (e.g. "can_publish")
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` means the token does not expire
    pub token_expires_at: Option<i64>,
    pub scopes: Vec<String>,
    pub status: AccountStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub capabilities: BTreeMap<String, bool>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_synced_at: Option<i64>,
}

impl ConnectedAccount {
    /// Whether the access token is expired, or will be within `skew_secs`
    pub fn token_expired(&self, now: i64, skew_secs: i64) -> bool {
        self.token_expires_at
            .map(|expires_at| expires_at <= now + skew_secs)
            .unwrap_or(false)
    }

    /// Whether the account has failed often enough that the user must reconnect
    pub fn requires_reconnect(&self, threshold: u32) -> bool {
        self.status != AccountStatus::Connected && self.error_count >= threshold
    }
}

/// Per-platform publish options, decoded at the storage boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum PlatformMetadata {
    Twitter {
        #[serde(default)]
        reply_to: Option<String>,
    },
    Instagram {
        #[serde(default)]
        media_type: InstagramMediaType,
        #[serde(default)]
        location_id: Option<String>,
    },
    Facebook {
        #[serde(default)]
        page_id: Option<String>,
        #[serde(default)]
        link: Option<String>,
    },
    LinkedIn {
        #[serde(default)]
        visibility: LinkedInVisibility,
    },
    TikTok {
        #[serde(default)]
        privacy_level: TikTokPrivacy,
        #[serde(default)]
        disable_comments: bool,
    },
    YouTube {
        title: String,
        #[serde(default)]
        privacy_status: YouTubePrivacy,
    },
}

impl PlatformMetadata {
    pub fn platform(&self) -> Platform {
        match self {
            PlatformMetadata::Twitter { .. } => Platform::Twitter,
            PlatformMetadata::Instagram { .. } => Platform::Instagram,
            PlatformMetadata::Facebook { .. } => Platform::Facebook,
            PlatformMetadata::LinkedIn { .. } => Platform::LinkedIn,
            PlatformMetadata::TikTok { .. } => Platform::TikTok,
            PlatformMetadata::YouTube { .. } => Platform::YouTube,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstagramMediaType {
    #[default]
    Image,
    Reel,
    Carousel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkedInVisibility {
    #[default]
    Public,
    Connections,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TikTokPrivacy {
    #[default]
    PublicToEveryone,
    MutualFollowFriends,
    SelfOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YouTubePrivacy {
    #[default]
    Public,
    Unlisted,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub platforms: Vec<Platform>,
    pub media_urls: Vec<String>,
    pub hashtags: Vec<String>,
    pub metadata: Vec<PlatformMetadata>,
    pub status: PostStatus,
    pub scheduled_for: Option<i64>,
    pub published_at: Option<i64>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledPost {
    /// Create a new draft post
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            platforms: Vec::new(),
            media_urls: Vec::new(),
            hashtags: Vec::new(),
            metadata: Vec::new(),
            status: PostStatus::Draft,
            scheduled_for: None,
            published_at: None,
            platform_post_id: None,
            platform_post_url: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn metadata_for(&self, platform: Platform) -> Option<&PlatformMetadata> {
        self.metadata.iter().find(|m| m.platform() == platform)
    }

    /// Text as it will be sent: content followed by the hashtags
    pub fn render_text(&self) -> String {
        if self.hashtags.is_empty() {
            return self.content.clone();
        }
        let tags: Vec<String> = self
            .hashtags
            .iter()
            .map(|t| t.trim().trim_start_matches('#'))
            .filter(|t| !t.is_empty())
            .map(|t| format!("#{}", t))
            .collect();
        if tags.is_empty() {
            return self.content.clone();
        }
        format!("{}\n\n{}", self.content.trim_end(), tags.join(" "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub platform: Platform,
    pub scheduled_for: i64,
    pub status: QueueStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    /// Bumped on every claim; writes from a stale claim are ignored
    pub version: i64,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}
