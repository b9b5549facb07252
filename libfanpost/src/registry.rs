//! Platform registry
//!
//! Static per-platform OAuth endpoints and content limits, joined with the
//! client credentials from configuration.

use secrecy::SecretString;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{ConfigError, Result, ValidationError};
use crate::types::{Platform, PlatformMetadata, ScheduledPost};

/// Content limits enforced before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLimits {
    /// Maximum characters of rendered text (content plus hashtags)
    pub max_text_length: usize,
    pub max_media: usize,
    pub requires_media: bool,
}

/// Static description of one platform
#[derive(Debug, Clone, Copy)]
pub struct PlatformSpec {
    pub platform: Platform,
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub default_scopes: &'static [&'static str],
    /// Joins scopes in the authorize URL
    pub scope_separator: &'static str,
    /// Name of the client id parameter (TikTok calls it `client_key`)
    pub client_id_param: &'static str,
    pub supports_pkce: bool,
    /// Extra authorize parameters, e.g. to request offline access
    pub extra_authorize_params: &'static [(&'static str, &'static str)],
    pub limits: ContentLimits,
}

const TWITTER: PlatformSpec = PlatformSpec {
    platform: Platform::Twitter,
    authorize_url: "https://twitter.com/i/oauth2/authorize",
    token_url: "https://api.twitter.com/2/oauth2/token",
    default_scopes: &["tweet.read", "tweet.write", "users.read", "offline.access"],
    scope_separator: " ",
    client_id_param: "client_id",
    supports_pkce: true,
    extra_authorize_params: &[],
    limits: ContentLimits {
        max_text_length: 280,
        max_media: 4,
        requires_media: false,
    },
};

const INSTAGRAM: PlatformSpec = PlatformSpec {
    platform: Platform::Instagram,
    authorize_url: "https://api.instagram.com/oauth/authorize",
    token_url: "https://api.instagram.com/oauth/access_token",
    default_scopes: &["instagram_basic", "instagram_content_publish"],
    scope_separator: ",",
    client_id_param: "client_id",
    supports_pkce: false,
    extra_authorize_params: &[],
    limits: ContentLimits {
        max_text_length: 2200,
        max_media: 10,
        requires_media: true,
    },
};

const FACEBOOK: PlatformSpec = PlatformSpec {
    platform: Platform::Facebook,
    authorize_url: "https://www.facebook.com/v19.0/dialog/oauth",
    token_url: "https://graph.facebook.com/v19.0/oauth/access_token",
    default_scopes: &["pages_manage_posts", "pages_read_engagement"],
    scope_separator: ",",
    client_id_param: "client_id",
    supports_pkce: false,
    extra_authorize_params: &[],
    limits: ContentLimits {
        max_text_length: 63206,
        max_media: 10,
        requires_media: false,
    },
};

const LINKEDIN: PlatformSpec = PlatformSpec {
    platform: Platform::LinkedIn,
    authorize_url: "https://www.linkedin.com/oauth/v2/authorization",
    token_url: "https://www.linkedin.com/oauth/v2/accessToken",
    default_scopes: &["openid", "profile", "w_member_social"],
    scope_separator: " ",
    client_id_param: "client_id",
    supports_pkce: false,
    extra_authorize_params: &[],
    limits: ContentLimits {
        max_text_length: 3000,
        max_media: 9,
        requires_media: false,
    },
};

const TIKTOK: PlatformSpec = PlatformSpec {
    platform: Platform::TikTok,
    authorize_url: "https://www.tiktok.com/v2/auth/authorize/",
    token_url: "https://open.tiktokapis.com/v2/oauth/token/",
    default_scopes: &["user.info.basic", "video.publish"],
    scope_separator: ",",
    client_id_param: "client_key",
    supports_pkce: true,
    extra_authorize_params: &[],
    limits: ContentLimits {
        max_text_length: 2200,
        max_media: 1,
        requires_media: true,
    },
};

const YOUTUBE: PlatformSpec = PlatformSpec {
    platform: Platform::YouTube,
    authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    default_scopes: &[
        "https://www.googleapis.com/auth/youtube.upload",
        "https://www.googleapis.com/auth/youtube.readonly",
    ],
    scope_separator: " ",
    client_id_param: "client_id",
    supports_pkce: true,
    extra_authorize_params: &[("access_type", "offline"), ("prompt", "consent")],
    limits: ContentLimits {
        max_text_length: 5000,
        max_media: 1,
        requires_media: true,
    },
};

impl Platform {
    /// Registry entry for this platform
    pub fn spec(&self) -> &'static PlatformSpec {
        match self {
            Platform::Twitter => &TWITTER,
            Platform::Instagram => &INSTAGRAM,
            Platform::Facebook => &FACEBOOK,
            Platform::LinkedIn => &LINKEDIN,
            Platform::TikTok => &TIKTOK,
            Platform::YouTube => &YOUTUBE,
        }
    }

    pub fn limits(&self) -> ContentLimits {
        self.spec().limits
    }
}

/// OAuth client credentials for one platform
#[derive(Debug)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub scopes: Vec<String>,
}

/// Registry entries joined with configured credentials
#[derive(Debug, Default)]
pub struct Registry {
    credentials: BTreeMap<Platform, ClientCredentials>,
}

impl Registry {
    pub fn from_config(config: &Config) -> Self {
        let credentials = config
            .platforms
            .iter()
            .map(|(platform, cfg)| {
                let scopes = cfg.scopes.clone().unwrap_or_else(|| {
                    platform
                        .spec()
                        .default_scopes
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                });
                (
                    *platform,
                    ClientCredentials {
                        client_id: cfg.client_id.clone(),
                        client_secret: SecretString::from(cfg.client_secret.clone()),
                        scopes,
                    },
                )
            })
            .collect();
        Self { credentials }
    }

    pub fn credentials(&self, platform: Platform) -> Result<&ClientCredentials> {
        self.credentials
            .get(&platform)
            .ok_or_else(|| ConfigError::MissingCredentials(platform).into())
    }

    /// Platforms with credentials configured
    pub fn configured(&self) -> Vec<Platform> {
        self.credentials.keys().copied().collect()
    }
}

/// Check a post against one platform's limits and metadata requirements
pub fn validate_for_platform(
    post: &ScheduledPost,
    platform: Platform,
) -> std::result::Result<(), ValidationError> {
    let text = post.render_text();
    if text.trim().is_empty() && post.media_urls.is_empty() {
        return Err(ValidationError::EmptyContent);
    }

    let limits = platform.limits();
    let length = text.chars().count();
    if length > limits.max_text_length {
        return Err(ValidationError::TextTooLong {
            platform,
            length,
            max: limits.max_text_length,
        });
    }

    let media = post.media_urls.len();
    if media > limits.max_media {
        return Err(ValidationError::TooManyMedia {
            platform,
            count: media,
            max: limits.max_media,
        });
    }
    if limits.requires_media && media == 0 {
        return Err(ValidationError::MediaRequired { platform });
    }

    match post.metadata_for(platform) {
        Some(PlatformMetadata::YouTube { title, .. }) if title.trim().is_empty() => {
            Err(ValidationError::MissingMetadata {
                platform,
                field: "title",
            })
        }
        None if platform == Platform::YouTube => Err(ValidationError::MissingMetadata {
            platform,
            field: "title",
        }),
        _ => Ok(()),
    }
}
