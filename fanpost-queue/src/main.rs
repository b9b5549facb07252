//! fanpost-queue - Create, schedule and inspect fan-out posts
//!
//! Unix-style front end to the scheduling queue.

use clap::{Parser, Subcommand};
use libfanpost::logging::LoggingConfig;
use libfanpost::queue::QueueSummary;
use libfanpost::scheduling::parse_schedule;
use libfanpost::{
    Config, Database, FanpostError, Platform, PlatformMetadata, PostStatus, Result,
    ScheduledPost, SchedulingQueue,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "fanpost-queue")]
#[command(version)]
#[command(about = "Create, schedule and inspect fan-out posts")]
#[command(long_about = "\
fanpost-queue - Create, schedule and inspect fan-out posts

DESCRIPTION:
    fanpost-queue manages the Fanpost scheduling queue. A post is created as a
    draft, then scheduled for one or more platforms. Each platform gets its own
    queue entry which the fanpost-send daemon publishes independently.

COMMANDS:
    create      Create a draft post
    schedule    Schedule a post for one or more platforms
    unschedule  Remove pending entries and return the post to draft
    status      Show the queue entries of a post
    remove      Delete the entry of one platform
    list        List posts

USAGE EXAMPLES:
    # Create a draft
    fanpost-queue create \"Launch day!\" --hashtag launch

    # Schedule it for two platforms in two hours
    fanpost-queue schedule <POST_ID> twitter,linkedin 2h

    # Natural language and RFC 3339 work too
    fanpost-queue schedule <POST_ID> facebook \"tomorrow 3pm\"
    fanpost-queue schedule <POST_ID> facebook 2025-11-20T15:00:00Z

    # Inspect delivery per platform
    fanpost-queue status <POST_ID> --format json

CONFIGURATION:
    Configuration file: ~/.config/fanpost/config.toml
    Override with FANPOST_CONFIG.

EXIT CODES:
    0 - Success
    1 - Operation failed
    3 - Invalid input (unknown post, bad platform or time)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// User the posts belong to
    #[arg(short, long, global = true, env = "FANPOST_USER", default_value = "local")]
    user: String,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a draft post and print its ID
    Create {
        /// Post content
        content: String,

        /// Media URL (repeatable)
        #[arg(long = "media", value_name = "URL")]
        media_urls: Vec<String>,

        /// Hashtag appended to the content (repeatable)
        #[arg(long = "hashtag", value_name = "TAG")]
        hashtags: Vec<String>,

        /// Per-platform options as JSON, e.g. '{"platform":"youtube","title":"Demo"}' (repeatable)
        #[arg(long = "metadata", value_name = "JSON")]
        metadata: Vec<String>,
    },

    /// Schedule a post
    Schedule {
        /// Post ID
        post_id: String,

        /// Comma-separated platforms (e.g. twitter,linkedin)
        platforms: String,

        /// When to publish (e.g. "now", "2h", "tomorrow 3pm", RFC 3339)
        when: String,
    },

    /// Unschedule a post
    Unschedule {
        /// Post ID
        post_id: String,
    },

    /// Show per-platform delivery of a post
    Status {
        /// Post ID
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete the queue entry of one platform
    Remove {
        /// Post ID
        post_id: String,

        /// Platform whose entry is removed
        platform: String,
    },

    /// List posts
    List {
        /// Only posts with this status (draft, scheduled, published, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env("error", cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let queue = SchedulingQueue::new(db);

    match cli.command {
        Commands::Create {
            content,
            media_urls,
            hashtags,
            metadata,
        } => cmd_create(&queue, &cli.user, content, media_urls, hashtags, &metadata).await,
        Commands::Schedule {
            post_id,
            platforms,
            when,
        } => cmd_schedule(&queue, &cli.user, &post_id, &platforms, &when).await,
        Commands::Unschedule { post_id } => {
            let removed = queue.unschedule_post(&post_id, &cli.user).await?;
            println!(
                "Unscheduled {} ({} pending entr{} removed)",
                post_id,
                removed,
                if removed == 1 { "y" } else { "ies" }
            );
            Ok(())
        }
        Commands::Status { post_id, format } => {
            validate_format(&format)?;
            let summary = queue.queue_status(&post_id, &cli.user).await?;
            if format == "json" {
                print_json(&summary)?;
            } else {
                output_status_text(&summary);
            }
            Ok(())
        }
        Commands::Remove { post_id, platform } => {
            let platform: Platform = platform.parse()?;
            if !queue.delete_entry(&post_id, &cli.user, platform).await? {
                return Err(FanpostError::InvalidInput(format!(
                    "post {} has no {} entry",
                    post_id, platform
                )));
            }
            println!("Removed {} entry of {}", platform, post_id);
            Ok(())
        }
        Commands::List { status, format } => {
            validate_format(&format)?;
            let status = status.map(|s| s.parse::<PostStatus>()).transpose()?;
            let posts = queue.list_posts(&cli.user, status).await?;
            if format == "json" {
                print_json(&posts)?;
            } else {
                output_list_text(&posts);
            }
            Ok(())
        }
    }
}

async fn cmd_create(
    queue: &SchedulingQueue,
    user: &str,
    content: String,
    media_urls: Vec<String>,
    hashtags: Vec<String>,
    metadata: &[String],
) -> Result<()> {
    let mut post = ScheduledPost::new(user, content);
    post.media_urls = media_urls;
    post.hashtags = hashtags;
    post.metadata = metadata
        .iter()
        .map(|raw| {
            serde_json::from_str::<PlatformMetadata>(raw)
                .map_err(|e| {
                    FanpostError::InvalidInput(format!("Invalid metadata '{}': {}", raw, e))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    queue.create_post(&post).await?;
    println!("{}", post.id);
    Ok(())
}

async fn cmd_schedule(
    queue: &SchedulingQueue,
    user: &str,
    post_id: &str,
    platforms: &str,
    when: &str,
) -> Result<()> {
    let platforms = platforms
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.parse::<Platform>())
        .collect::<Result<Vec<_>>>()?;
    let scheduled_for = parse_schedule(when, chrono::Utc::now())?;
    debug!(post_id, scheduled_for, "scheduling");

    let entries = queue
        .schedule_post(post_id, user, &platforms, scheduled_for)
        .await?;
    for entry in &entries {
        println!(
            "{} | {} | {}",
            entry.id,
            entry.platform,
            format_timestamp(entry.scheduled_for)
        );
    }
    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(FanpostError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| FanpostError::InvalidInput(format!("Failed to encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn output_status_text(summary: &QueueSummary) {
    println!(
        "{} | total {} | pending {} | completed {} | failed {}",
        summary.post_id, summary.total, summary.pending, summary.completed, summary.failed
    );
    for entry in &summary.entries {
        let detail = entry
            .platform_post_url
            .as_deref()
            .or(entry.error_message.as_deref())
            .unwrap_or("");
        println!(
            "  {} | {} | {} | attempts {} | {}",
            entry.platform,
            entry.status,
            format_timestamp(entry.scheduled_for),
            entry.attempts,
            detail
        );
    }
    if let Some(next) = &summary.next_scheduled {
        let now = chrono::Utc::now().timestamp();
        println!(
            "next: {} {}",
            next.platform,
            format_time_until(now, next.scheduled_for)
        );
    }
}

fn output_list_text(posts: &[ScheduledPost]) {
    let now = chrono::Utc::now().timestamp();
    for post in posts {
        let when = post
            .scheduled_for
            .map(|ts| format_time_until(now, ts))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} | {} | {} | {}",
            post.id,
            post.status,
            truncate_content(&post.content, 50),
            when
        );
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Truncate content to max characters with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let head: String = content.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_for: i64) -> String {
    let diff = scheduled_for - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
