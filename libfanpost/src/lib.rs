//! Fanpost - connect social accounts and fan scheduled posts out to them
//!
//! This library provides the OAuth connection protocol (state, PKCE, token
//! lifecycle), the connected account store, and the scheduling queue with
//! its publish dispatcher.

pub mod accounts;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod queue;
pub mod registry;
pub mod scheduling;
pub mod types;

// Re-export commonly used types
pub use accounts::{AccountService, AccountUpsert};
pub use config::Config;
pub use db::Database;
pub use dispatcher::{DispatchSettings, Dispatcher, TickReport};
pub use error::{FanpostError, Result};
pub use queue::{QueueSummary, SchedulingQueue};
pub use registry::Registry;
pub use types::{
    ConnectedAccount, Platform, PlatformMetadata, PostStatus, QueueEntry, QueueStatus,
    ScheduledPost,
};
