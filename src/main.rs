use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use trading_journal_engine::commands;
use trading_journal_engine::models::UpdateBalanceInput;
use trading_journal_engine::{open_store, AppConfig};

/// Trading journal maintenance tool
#[derive(Parser, Debug)]
#[command(name = "trading-journal")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to TRADING_JOURNAL_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Account whose journal is read or changed
    #[arg(long, global = true, default_value = "local")]
    owner: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print dashboard statistics and the Zella score
    Stats {
        /// today, week, month, 3months, 6months or year
        #[arg(long)]
        range: Option<String>,
    },
    /// Print the daily equity curve
    Equity {
        #[arg(long)]
        range: Option<String>,
    },
    /// Rebuild the balance from every trade
    Recalculate,
    /// Change the starting balance
    SetBalance { amount: f64 },
    /// Write trades as CSV
    ExportCsv {
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a JSON backup of balance and trades
    ExportJson {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Restore trades from a JSON backup
    ImportJson { file: PathBuf },
}

fn emit(out: Option<&PathBuf>, content: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", content);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::from_env(),
    }
    .context("Failed to load configuration")?;
    config.init_logging();

    let store = open_store(&config).context("Failed to open journal store")?;
    let store = store.as_ref();
    let owner = cli.owner.as_str();

    match &cli.command {
        Command::Stats { range } => {
            let dashboard = commands::get_dashboard_stats(store, owner, range.as_deref()).await?;
            emit(None, &serde_json::to_string_pretty(&dashboard)?)?;
        }
        Command::Equity { range } => {
            let curve = commands::get_equity_curve(store, owner, range.as_deref()).await?;
            emit(None, &serde_json::to_string_pretty(&curve)?)?;
        }
        Command::Recalculate => {
            let balance = commands::recalculate_balance(store, owner).await?;
            emit(None, &serde_json::to_string_pretty(&balance)?)?;
        }
        Command::SetBalance { amount } => {
            let balance = commands::set_starting_balance(
                store,
                owner,
                UpdateBalanceInput {
                    starting_balance: *amount,
                },
            )
            .await?;
            emit(None, &serde_json::to_string_pretty(&balance)?)?;
        }
        Command::ExportCsv { out } => {
            let csv = commands::export_trades_csv(store, owner).await?;
            emit(out.as_ref(), &csv)?;
        }
        Command::ExportJson { out } => {
            let json = commands::export_backup(store, owner).await?;
            emit(out.as_ref(), &json)?;
        }
        Command::ImportJson { file } => {
            let json = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = commands::import_backup(store, owner, &json).await?;
            log::info!("Imported {} trades", summary.trades_imported);
            emit(None, &serde_json::to_string_pretty(&summary)?)?;
        }
    }

    Ok(())
}
