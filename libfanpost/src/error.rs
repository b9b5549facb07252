//! Error types for Fanpost

use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, FanpostError>;

#[derive(Error, Debug)]
pub enum FanpostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Authentication required: {0}")]
    Auth(String),

    #[error("OAuth state error: {0}")]
    State(#[from] StateError),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Profile fetch failed: {0}")]
    ProfileFetch(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FanpostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FanpostError::InvalidInput(_) | FanpostError::Validation(_) => 3,
            FanpostError::Auth(_)
            | FanpostError::State(_)
            | FanpostError::TokenExchange(_)
            | FanpostError::Platform(PlatformError::Authentication(_)) => 2,
            FanpostError::Config(_)
            | FanpostError::Database(_)
            | FanpostError::ProfileFetch(_)
            | FanpostError::Dispatch(_)
            | FanpostError::Platform(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("No OAuth client credentials configured for {0}")]
    MissingCredentials(Platform),
}

/// Storage failures. Every write path surfaces these as persistence errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt column {column}: {reason}")]
    Decode { column: &'static str, reason: String },
}

impl DbError {
    pub(crate) fn decode(column: &'static str, reason: impl std::fmt::Display) -> Self {
        DbError::Decode {
            column,
            reason: reason.to_string(),
        }
    }
}

/// Composite state parameters that cannot be decoded.
///
/// Unknown, expired, replayed and wrong-platform tokens are not errors; the
/// state store reports them as a missing match.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("malformed state parameter: {0}")]
    Malformed(String),
}

/// Content or platform constraint violations detected before dispatch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("content is empty")]
    EmptyContent,

    #[error("{platform} allows at most {max} characters, got {length}")]
    TextTooLong {
        platform: Platform,
        length: usize,
        max: usize,
    },

    #[error("{platform} allows at most {max} media items, got {count}")]
    TooManyMedia {
        platform: Platform,
        count: usize,
        max: usize,
    },

    #[error("{platform} requires at least one media item")]
    MediaRequired { platform: Platform },

    #[error("{platform} requires metadata field '{field}'")]
    MissingMetadata {
        platform: Platform,
        field: &'static str,
    },

    #[error("no platforms selected")]
    NoPlatforms,
}

/// Errors raised while talking to a platform API
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl From<sqlx::Error> for FanpostError {
    fn from(e: sqlx::Error) -> Self {
        FanpostError::Database(DbError::SqlxError(e))
    }
}
