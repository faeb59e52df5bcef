//! folio - multi-chain and exchange portfolio tracker
//!
//! Secrets are encrypted under a master password once one is set. Each run is
//! its own session, so commands that need secrets prompt for it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use folio_tracker::cli::{commands, App};
use folio_tracker::config::Config;
use folio_tracker::Error;

/// Portfolio tracker for on-chain wallets and exchange accounts
#[derive(Parser)]
#[command(name = "folio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "folio.toml", env = "FOLIO_CONFIG")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Master password management
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },

    /// Tracked wallets
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },

    /// Exchange API accounts
    Cex {
        #[command(subcommand)]
        action: CexAction,
    },

    /// Data sources and API keys
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Refresh every balance now
    Update,

    /// Daily portfolio totals
    History {
        /// Number of days to show
        #[arg(short, long, default_value = "30")]
        limit: usize,
    },

    /// Cross-device sync area
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Concentration and custody warnings
    Risk,

    /// AI review of the current portfolio
    Analyze,

    /// Show current configuration (secrets masked)
    Config,
}

#[derive(Subcommand)]
enum PasswordAction {
    /// Set the master password and encrypt stored secrets
    Setup,
    /// Change the master password
    Change,
    /// Show whether a password is set
    Status,
}

#[derive(Subcommand)]
enum WalletAction {
    /// Add a wallet
    Add {
        /// Address (omit for a cold entry whose remark holds the amount)
        #[arg(default_value = "")]
        address: String,

        /// Chain: evm, sol, btc
        #[arg(long)]
        chain: String,

        /// Display label; for cold entries e.g. "2.5 BTC ledger"
        #[arg(long, default_value = "")]
        remark: String,

        /// Wallet type: hot, cold, cex (defaults by chain)
        #[arg(long = "type", value_name = "TYPE")]
        wallet_type: Option<String>,
    },

    /// Add from an "address, chain, remark, type" line
    AddLine { line: String },

    /// List wallets and balances
    List,

    /// Remove a wallet by its number in `wallet list`
    Remove {
        index: usize,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CexAction {
    /// Add an account (keys are prompted for)
    Add {
        /// binance, okx, bybit, bitget, backpack
        exchange: String,

        #[arg(long, default_value = "")]
        remark: String,

        /// Save even if the connection test fails
        #[arg(long)]
        force: bool,
    },

    /// List accounts
    List,

    /// Remove an account by id (prefix)
    Remove {
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Test a stored account's keys
    Test { id: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show settings (keys masked)
    Show,

    /// Set one value, e.g. `settings set evmSource debank`
    Set {
        key: String,
        /// Omit for API keys to enter them hidden
        value: Option<String>,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Mirror local data into the sync area
    Push,
    /// Adopt the sync area if it is newer
    Pull,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Commands::Config = cli.command {
        return commands::show_config(&config);
    }

    let app = match App::open(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to open data store: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Password { action } => match action {
            PasswordAction::Setup => commands::password_setup(&app).await,
            PasswordAction::Change => commands::password_change(&app).await,
            PasswordAction::Status => commands::password_status(&app).await,
        },
        Commands::Wallet { action } => match action {
            WalletAction::Add {
                address,
                chain,
                remark,
                wallet_type,
            } => {
                commands::wallet_add(&app, &address, &chain, &remark, wallet_type.as_deref()).await
            }
            WalletAction::AddLine { line } => commands::wallet_add_line(&app, &line).await,
            WalletAction::List => commands::wallet_list(&app).await,
            WalletAction::Remove { index, force } => {
                commands::wallet_remove(&app, index, force).await
            }
        },
        Commands::Cex { action } => match action {
            CexAction::Add {
                exchange,
                remark,
                force,
            } => commands::cex_add(&app, &exchange, &remark, force).await,
            CexAction::List => commands::cex_list(&app).await,
            CexAction::Remove { id, force } => commands::cex_remove(&app, &id, force).await,
            CexAction::Test { id } => commands::cex_test(&app, &id).await,
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => commands::settings_show(&app).await,
            SettingsAction::Set { key, value } => commands::settings_set(&app, &key, value).await,
        },
        Commands::Update => commands::update(&app).await,
        Commands::History { limit } => commands::history(&app, limit).await,
        Commands::Sync { action } => match action {
            SyncAction::Push => commands::sync_push(&app).await,
            SyncAction::Pull => commands::sync_pull(&app).await,
        },
        Commands::Risk => commands::risk(&app).await,
        Commands::Analyze => commands::analyze(&app).await,
        Commands::Config => commands::show_config(&app.config),
    };

    if let Err(e) = result {
        match e.downcast_ref::<Error>() {
            Some(err) if err.is_blocking() => {
                error!("{}", err);
                std::process::exit(2);
            }
            _ => {
                error!("Command failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("folio_tracker=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
