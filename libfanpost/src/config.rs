//! Configuration management for Fanpost

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// OAuth client credentials and bridge endpoints, keyed by platform
    #[serde(default)]
    pub platforms: BTreeMap<Platform, PlatformConfig>,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Lifetime of an issued state token
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: i64,
    /// Redirect URI registered with every provider
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
    /// Where the user lands after the callback when the state carries no usable path
    #[serde(default = "default_return_path")]
    pub default_return_path: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl(),
            callback_url: default_callback_url(),
            default_return_path: default_return_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Overrides the registry's default scopes
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    /// Profile endpoint of the publishing bridge
    #[serde(default)]
    pub profile_url: Option<String>,
    /// Publish endpoint of the publishing bridge
    #[serde(default)]
    pub publish_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Seconds between dispatcher ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Posts dispatched concurrently per tick
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Entries claimed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// How long a claim is honored before another dispatcher may take the entry
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
    /// Refresh access tokens this many seconds before they expire
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_secs: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_concurrency: default_max_concurrency(),
            batch_size: default_batch_size(),
            lease_secs: default_lease_secs(),
            refresh_skew_secs: default_refresh_skew(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Consecutive refresh/sync failures before the user must reconnect
    #[serde(default = "default_reconnect_threshold")]
    pub reconnect_threshold: u32,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            reconnect_threshold: default_reconnect_threshold(),
        }
    }
}

fn default_state_ttl() -> i64 {
    600
}

fn default_callback_url() -> String {
    "http://localhost:8080/oauth/callback".to_string()
}

fn default_return_path() -> String {
    "/settings/accounts".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    4
}

fn default_batch_size() -> i64 {
    50
}

fn default_lease_secs() -> i64 {
    300
}

fn default_refresh_skew() -> i64 {
    60
}

fn default_reconnect_threshold() -> u32 {
    5
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/fanpost/fanpost.db".to_string(),
            },
            oauth: OAuthConfig::default(),
            platforms: BTreeMap::new(),
            scheduling: SchedulingConfig::default(),
            accounts: AccountsConfig::default(),
        }
    }

    pub fn platform(&self, platform: Platform) -> Result<&PlatformConfig> {
        self.platforms
            .get(&platform)
            .ok_or_else(|| ConfigError::MissingCredentials(platform).into())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FANPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("fanpost").join("config.toml"))
}
