//! fanpost-connect - Connect, refresh and disconnect social accounts

use clap::{Parser, Subcommand};
use libfanpost::logging::LoggingConfig;
use libfanpost::oauth::{
    CallbackErrorCode, CallbackParams, CallbackRedirect, ConnectFlow, HttpTokenClient,
    StateManager, TokenProvider,
};
use libfanpost::platforms::PlatformClients;
use libfanpost::{
    AccountService, Config, ConnectedAccount, Database, FanpostError, Platform, Registry, Result,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fanpost-connect")]
#[command(version)]
#[command(about = "Connect, refresh and disconnect social accounts")]
#[command(long_about = "\
fanpost-connect - Connect, refresh and disconnect social accounts

DESCRIPTION:
    fanpost-connect drives the OAuth connection of social accounts.

    'start' issues a single-use state (with a PKCE challenge where the
    platform supports it) and prints the authorization URL. After the user
    approves, feed the callback parameters to 'callback': the code is
    exchanged for tokens, the profile is fetched and the account is stored.
    'callback' prints the location the user should be redirected to.

USAGE EXAMPLES:
    # Begin connecting a Twitter account
    fanpost-connect start twitter --return-path /dashboard

    # Complete the flow with the provider's callback parameters
    fanpost-connect callback --code <CODE> --state <STATE>

    # Manage connected accounts
    fanpost-connect list --format json
    fanpost-connect refresh <ACCOUNT_ID>
    fanpost-connect sync <ACCOUNT_ID>
    fanpost-connect disconnect <ACCOUNT_ID>

CONFIGURATION:
    Configuration file: ~/.config/fanpost/config.toml
    Override with FANPOST_CONFIG.

    [oauth]
    callback_url = \"https://app.example/oauth/callback\"
    default_return_path = \"/settings/accounts\"

    [platforms.twitter]
    client_id = \"...\"
    client_secret = \"...\"

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Authorization failed (invalid state, denied, token exchange)
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// User the accounts belong to
    #[arg(short, long, global = true, env = "FANPOST_USER", default_value = "local")]
    user: String,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the authorization URL for a platform
    Start {
        /// Platform to connect
        platform: String,

        /// Path to return to after the callback
        #[arg(long)]
        return_path: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Complete a connection with the provider's callback parameters
    Callback {
        #[arg(long)]
        code: Option<String>,

        #[arg(long)]
        state: Option<String>,

        /// Error reported by the provider instead of a code
        #[arg(long)]
        error: Option<String>,

        #[arg(long)]
        error_description: Option<String>,
    },

    /// Refresh the access token of an account
    Refresh {
        account_id: String,
    },

    /// Re-fetch the profile snapshot of an account
    Sync {
        account_id: String,
    },

    /// Remove a connected account
    Disconnect {
        account_id: String,
    },

    /// List connected accounts
    List {
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

struct Services {
    flow: ConnectFlow,
    accounts: AccountService,
}

impl Services {
    async fn build(config: &Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let registry = Arc::new(Registry::from_config(config));
        let tokens: Arc<dyn TokenProvider> = Arc::new(HttpTokenClient::new(registry.clone())?);
        let clients = PlatformClients::from_config(config)?;

        let accounts = AccountService::new(
            db.clone(),
            tokens.clone(),
            clients,
            config.accounts.reconnect_threshold,
        );
        let flow = ConnectFlow::new(
            StateManager::new(db, config.oauth.state_ttl_secs),
            tokens,
            accounts.clone(),
            registry,
            config.oauth.clone(),
        );

        Ok(Self { flow, accounts })
    }

    /// Look up an account of `user`; other users' accounts read as missing
    async fn owned_account(&self, user: &str, account_id: &str) -> Result<ConnectedAccount> {
        match self.accounts.get(account_id).await? {
            Some(account) if account.user_id == user => Ok(account),
            _ => Err(FanpostError::InvalidInput(format!(
                "account {} not found",
                account_id
            ))),
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let services = Services::build(&config).await?;

    match cli.command {
        Commands::Start {
            platform,
            return_path,
            format,
        } => {
            validate_format(&format)?;
            let platform: Platform = platform.parse()?;
            let request = services
                .flow
                .start(&cli.user, platform, return_path.as_deref())
                .await?;
            info!(%platform, expires_at = request.expires_at, "authorization started");
            if format == "json" {
                print_json(&serde_json::json!({
                    "platform": platform,
                    "url": request.url,
                    "state": request.state,
                    "expires_at": request.expires_at,
                }))?;
            } else {
                println!("{}", request.url);
            }
            Ok(())
        }
        Commands::Callback {
            code,
            state,
            error,
            error_description,
        } => {
            let redirect = services
                .flow
                .handle_callback(CallbackParams {
                    code,
                    state,
                    error,
                    error_description,
                })
                .await;
            report_callback(&redirect)
        }
        Commands::Refresh { account_id } => {
            services.owned_account(&cli.user, &account_id).await?;
            let account = services.accounts.refresh_token(&account_id).await?;
            println!(
                "Refreshed {} account {} (expires {})",
                account.platform,
                account.id,
                account
                    .token_expires_at
                    .map(format_timestamp)
                    .unwrap_or_else(|| "never".to_string())
            );
            Ok(())
        }
        Commands::Sync { account_id } => {
            services.owned_account(&cli.user, &account_id).await?;
            let account = services.accounts.sync_profile(&account_id).await?;
            println!(
                "Synced {} account {} ({})",
                account.platform,
                account.id,
                account.username.as_deref().unwrap_or(&account.platform_user_id)
            );
            Ok(())
        }
        Commands::Disconnect { account_id } => {
            let account = services.owned_account(&cli.user, &account_id).await?;
            services.accounts.disconnect(&account_id).await?;
            println!("Disconnected {} account {}", account.platform, account.id);
            Ok(())
        }
        Commands::List { format } => {
            validate_format(&format)?;
            let accounts = services.accounts.list_accounts(&cli.user).await?;
            if format == "json" {
                let views: Vec<serde_json::Value> = accounts
                    .iter()
                    .map(|account| account_view(&services.accounts, account))
                    .collect();
                print_json(&serde_json::Value::Array(views))?;
            } else {
                for account in &accounts {
                    let reconnect = if services.accounts.requires_reconnect(account) {
                        " | reconnect required"
                    } else {
                        ""
                    };
                    println!(
                        "{} | {} | {} | {}{}",
                        account.id,
                        account.platform,
                        account.username.as_deref().unwrap_or(&account.platform_user_id),
                        account.status,
                        reconnect
                    );
                }
            }
            Ok(())
        }
    }
}

/// Print where the user goes next; failures also exit non-zero
fn report_callback(redirect: &CallbackRedirect) -> Result<()> {
    println!("{}", redirect.location);
    match redirect.error {
        None => {
            if let Some(account) = &redirect.account {
                info!(account_id = %account.id, platform = %account.platform, "account connected");
            }
            Ok(())
        }
        Some(code) => {
            let detail = format!("callback failed: {}", code.as_str());
            Err(match code {
                CallbackErrorCode::MissingParameters => FanpostError::InvalidInput(detail),
                CallbackErrorCode::AccessDenied
                | CallbackErrorCode::ProviderError
                | CallbackErrorCode::InvalidState
                | CallbackErrorCode::TokenExchangeFailed => FanpostError::Auth(detail),
                CallbackErrorCode::ProfileFetchFailed => FanpostError::ProfileFetch(detail),
                CallbackErrorCode::PersistenceFailed => FanpostError::Dispatch(detail),
            })
        }
    }
}

/// Account fields safe to print; tokens never leave the store
fn account_view(accounts: &AccountService, account: &ConnectedAccount) -> serde_json::Value {
    serde_json::json!({
        "id": account.id,
        "platform": account.platform,
        "platform_user_id": account.platform_user_id,
        "username": account.username,
        "display_name": account.display_name,
        "status": account.status,
        "error_count": account.error_count,
        "last_error": account.last_error,
        "requires_reconnect": accounts.requires_reconnect(account),
        "scopes": account.scopes,
        "token_expires_at": account.token_expires_at,
        "follower_count": account.follower_count,
        "following_count": account.following_count,
        "last_synced_at": account.last_synced_at,
    })
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

fn print_json(value: &serde_json::Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| FanpostError::InvalidInput(format!("Failed to encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
