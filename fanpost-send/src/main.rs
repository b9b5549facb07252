//! fanpost-send - Background daemon for scheduled posting
//!
//! Claims due queue entries and publishes them to the connected accounts.

use clap::Parser;
use libfanpost::logging::LoggingConfig;
use libfanpost::oauth::{HttpTokenClient, StateManager};
use libfanpost::platforms::PlatformClients;
use libfanpost::{
    AccountService, Config, Database, DispatchSettings, Dispatcher, Registry, Result,
    SchedulingQueue, TickReport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fanpost-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled posting")]
#[command(long_about = "\
fanpost-send - Background daemon for scheduled posting

DESCRIPTION:
    fanpost-send is a long-running daemon that publishes scheduled posts
    to every connected account they were scheduled for.

    Each poll claims the queue entries that are due, refreshes access
    tokens that are about to expire, publishes, and records the result per
    platform. A post is published as soon as one platform accepts it.

    Several daemons may share one database: a claimed entry is leased to
    one worker and never published twice.

USAGE:
    # Run in foreground (logs to stderr)
    fanpost-send

    # Run with custom poll interval
    fanpost-send --poll-interval 30

    # Enable verbose logging
    fanpost-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current tick)

CONFIGURATION:
    Configuration file: ~/.config/fanpost/config.toml
    Override with FANPOST_CONFIG.

    [scheduling]
    poll_interval = 60      # seconds between polls
    max_concurrency = 4     # posts published at the same time
    batch_size = 50         # entries claimed per poll
    lease_secs = 300        # claim lease
    refresh_skew_secs = 60  # refresh tokens this early

    [platforms.twitter]
    client_id = \"...\"
    client_secret = \"...\"
    profile_url = \"https://bridge.example/twitter/me\"
    publish_url = \"https://bridge.example/twitter/posts\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    3 - Invalid configuration
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due entries (default: 60)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Process due entries once, print the report and exit")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.once { "warn" } else { "info" };
    LoggingConfig::from_env(default_level, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Everything one tick needs
struct Daemon {
    dispatcher: Dispatcher,
    states: StateManager,
}

impl Daemon {
    fn build(config: &Config, db: Database) -> Result<Self> {
        let registry = Arc::new(Registry::from_config(config));
        let tokens = Arc::new(HttpTokenClient::new(registry)?);
        let clients = PlatformClients::from_config(config)?;
        if clients.platforms().is_empty() {
            warn!("No platform has publish endpoints configured; due entries will fail");
        }

        let accounts = AccountService::new(
            db.clone(),
            tokens,
            clients.clone(),
            config.accounts.reconnect_threshold,
        );
        let dispatcher = Dispatcher::new(
            SchedulingQueue::new(db.clone()),
            accounts,
            clients,
            DispatchSettings::from(&config.scheduling),
        );
        let states = StateManager::new(db, config.oauth.state_ttl_secs);

        Ok(Self { dispatcher, states })
    }

    async fn tick(&self) -> Result<TickReport> {
        let now = chrono::Utc::now().timestamp();
        let purged = self.states.purge_expired(now).await?;
        if purged > 0 {
            info!(purged, "Purged expired OAuth states");
        }

        let report = self.dispatcher.tick_at(now).await?;
        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                published = report.published,
                failed = report.failed,
                rejected = report.rejected,
                skipped = report.skipped,
                "Dispatch tick finished"
            );
        }
        Ok(report)
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let daemon = Daemon::build(&config, db)?;

    info!(worker_id = daemon.dispatcher.worker_id(), "fanpost-send daemon starting");

    if cli.once {
        let report = daemon.tick().await?;
        let json = serde_json::to_string(&report).map_err(|e| {
            libfanpost::FanpostError::Dispatch(format!("Failed to encode report: {}", e))
        })?;
        println!("{}", json);
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduling.poll_interval).max(1);
    info!("Poll interval: {}s", poll_interval);

    run_daemon_loop(&daemon, poll_interval, shutdown).await;

    info!("fanpost-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libfanpost::FanpostError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

/// Main daemon loop
async fn run_daemon_loop(daemon: &Daemon, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        // A failed tick leaves its claims to expire; the next poll carries on
        if let Err(e) = daemon.tick().await {
            error!("Error dispatching due entries: {}", e);
        }

        // Sleep until next poll (check shutdown every second)
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}
