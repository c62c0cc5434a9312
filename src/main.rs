//! mint-custody - transaction submission and key custody service
//!
//! Administrative entry point: wallet lifecycle, nonce administration,
//! circuit breaker control, transaction monitoring, and alert checks.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use mint_custody::app::AppContext;
use mint_custody::cli::commands;
use mint_custody::config::Config;

/// Transaction submission and key custody service
#[derive(Parser)]
#[command(name = "mint-custody")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Actor recorded in audit entries for administrative operations
    #[arg(long, env = "MINTCUSTODY_ACTOR", default_value = "admin-cli")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet custody commands
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },

    /// Nonce administration
    Nonce {
        #[command(subcommand)]
        action: NonceAction,
    },

    /// Circuit breaker control
    Breaker {
        #[command(subcommand)]
        action: BreakerAction,
    },

    /// Transaction monitoring
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },

    /// Alerting checks
    Alert {
        #[command(subcommand)]
        action: AlertAction,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[derive(Subcommand)]
enum WalletAction {
    /// Create a new wallet with a freshly generated keypair
    Create {
        /// Unique wallet identifier
        wallet_id: String,

        /// Optional metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Show public wallet fields
    Show { wallet_id: String },

    /// List wallets in custody
    List {
        /// Filter by status: active, rotated, revoked
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "100")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Rotate to a fresh keypair, tombstoning the old record
    Rotate { wallet_id: String },

    /// Revoke a wallet; all subsequent key access fails
    Revoke {
        wallet_id: String,

        /// Reason recorded in the audit log
        #[arg(long, default_value = "administrative revocation")]
        reason: String,
    },

    /// Show the wallet's audit trail
    Audit {
        wallet_id: String,

        #[arg(long, default_value = "50")]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum NonceAction {
    /// Cached vs chain nonce state for an account
    Status { address: String },

    /// Force resynchronization with the chain
    Reset { address: String },

    /// Drop all cached nonce state for an account
    Clear { address: String },
}

#[derive(Subcommand)]
enum BreakerAction {
    /// Current breaker state and counters
    Status,

    /// Force the breaker closed
    Reset,
}

#[derive(Subcommand)]
enum MonitorAction {
    /// Run one monitoring cycle
    Run,

    /// Run cycles on the configured interval until interrupted
    Watch,

    /// Transaction counts and gas state
    Summary,

    /// Explicitly resubmit a stuck or failed transaction
    RetryTx { tx_id: String },
}

#[derive(Subcommand)]
enum AlertAction {
    /// Send a test alert through all configured channels
    Test,

    /// Recently delivered alerts
    Recent {
        #[arg(long)]
        severity: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Delivery statistics
    Stats {
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mint_custody=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration; refuses to start on invalid or missing custody key
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // `config show` needs no service connections
    if matches!(&cli.command, Commands::Config) {
        return commands::show_config(&config);
    }

    let ctx = match AppContext::init(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to initialize services: {}", e);
            std::process::exit(1);
        }
    };

    let actor = cli.actor.as_str();

    let result = match cli.command {
        Commands::Wallet { action } => match action {
            WalletAction::Create {
                wallet_id,
                metadata,
            } => commands::wallet_create(&ctx, &wallet_id, metadata, actor).await,
            WalletAction::Show { wallet_id } => commands::wallet_show(&ctx, &wallet_id).await,
            WalletAction::List {
                status,
                limit,
                offset,
            } => commands::wallet_list(&ctx, status, limit, offset).await,
            WalletAction::Rotate { wallet_id } => {
                commands::wallet_rotate(&ctx, &wallet_id, actor).await
            }
            WalletAction::Revoke { wallet_id, reason } => {
                commands::wallet_revoke(&ctx, &wallet_id, &reason, actor).await
            }
            WalletAction::Audit { wallet_id, limit } => {
                commands::wallet_audit(&ctx, &wallet_id, limit).await
            }
        },
        Commands::Nonce { action } => match action {
            NonceAction::Status { address } => commands::nonce_status(&ctx, &address).await,
            NonceAction::Reset { address } => commands::nonce_reset(&ctx, &address).await,
            NonceAction::Clear { address } => commands::nonce_clear(&ctx, &address).await,
        },
        Commands::Breaker { action } => match action {
            BreakerAction::Status => commands::breaker_status(&ctx).await,
            BreakerAction::Reset => commands::breaker_reset(&ctx, actor).await,
        },
        Commands::Monitor { action } => match action {
            MonitorAction::Run => commands::monitor_run(&ctx).await,
            MonitorAction::Watch => commands::monitor_watch(&ctx).await,
            MonitorAction::Summary => commands::monitor_summary(&ctx).await,
            MonitorAction::RetryTx { tx_id } => commands::retry_tx(&ctx, &tx_id).await,
        },
        Commands::Alert { action } => match action {
            AlertAction::Test => commands::alert_test(&ctx).await,
            AlertAction::Recent {
                severity,
                category,
                limit,
            } => commands::alert_recent(&ctx, severity, category, limit).await,
            AlertAction::Stats { hours } => commands::alert_stats(&ctx, hours).await,
        },
        Commands::Config => unreachable!("handled before service init"),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
