//! Ledger administration CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use credit_ledger::{Config, CreditLedger, Storage, TransactionType, UserId};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// SrcMarket credit ledger administration
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file (environment overrides are used when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the config
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Insert reward defaults that are missing from the settings table
    SeedConfig,
    /// Insert or replace a tunable
    SetConfig {
        /// Setting key
        key: String,
        /// Integer value
        value: i64,
        /// Operator-facing description
        #[arg(long, default_value = "")]
        description: String,
        /// Store the setting as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Show one tunable, or all of them
    GetConfig {
        /// Setting key
        key: Option<String>,
    },
    /// Show a user's account
    Balance {
        /// User ID
        user: UserId,
    },
    /// Show a user's transaction history, newest first
    History {
        /// User ID
        user: UserId,
        /// 1-based page
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Page size (0 = default)
        #[arg(long, default_value_t = 0)]
        limit: u32,
        /// Only this transaction type
        #[arg(long = "type")]
        transaction_type: Option<TransactionType>,
    },
    /// Apply a signed administrative correction
    Adjust {
        /// User ID
        user: UserId,
        /// Signed amount
        #[arg(allow_negative_numbers = true)]
        delta: i64,
        /// Reason recorded on the entry
        #[arg(long)]
        reason: String,
        /// Acting administrator
        #[arg(long)]
        actor: UserId,
    },
    /// Audit a user's transaction chain
    Verify {
        /// User ID
        user: UserId,
    },
    /// Show account and entry totals
    Stats,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let storage = Arc::new(
        Storage::open(&config)
            .with_context(|| format!("opening store at {}", config.data_dir.display()))?,
    );
    let ledger = CreditLedger::new(storage.clone(), &config)?;

    match cli.command {
        Commands::SeedConfig => {
            let inserted = ledger.seed_defaults(&config.rewards).await?;
            print_json(&serde_json::json!({ "inserted": inserted }))?;
        }
        Commands::SetConfig {
            key,
            value,
            description,
            inactive,
        } => {
            let entry = ledger.set_config(&key, value, &description, !inactive).await?;
            print_json(&entry)?;
        }
        Commands::GetConfig { key: Some(key) } => {
            let value = ledger.get_config(&key).await?;
            print_json(&serde_json::json!({ "key": key, "value": value }))?;
        }
        Commands::GetConfig { key: None } => {
            print_json(&storage.list_settings()?)?;
        }
        Commands::Balance { user } => match ledger.get_account(user).await? {
            Some(account) => print_json(&account)?,
            None => anyhow::bail!("no account for user {}", user),
        },
        Commands::History {
            user,
            page,
            limit,
            transaction_type,
        } => {
            let history = ledger.get_history(user, page, limit, transaction_type).await?;
            print_json(&history)?;
        }
        Commands::Adjust {
            user,
            delta,
            reason,
            actor,
        } => {
            let tx = ledger.admin_adjust(user, delta, reason, actor).await?;
            print_json(&tx)?;
        }
        Commands::Verify { user } => {
            let report = ledger.verify_chain(user).await?;
            print_json(&report)?;
        }
        Commands::Stats => {
            print_json(&storage.get_stats()?)?;
        }
    }

    Ok(())
}
