mod history;
mod logging;
mod settings;
mod simulate;

use anyhow::{Context, Result};
use bhh_storage::DATABASE_FILE_NAME;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use history::{handle_history_command, HistoryCommand};
use settings::{handle_settings_command, SettingsCommand};
use simulate::{handle_simulate_command, SimulateArgs};

const DATA_DIR_NAME: &str = "better-console-history";

#[derive(Parser)]
#[command(name = "bhh")]
#[command(about = "Query console history: manage entries and settings, replay host scenarios", long_about = None)]
struct Cli {
    /// Directory holding history.sqlite3
    #[arg(long, env = "BHH_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse and edit captured operations
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Show or change extension settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Replay a host page scenario against an in-memory console
    Simulate(SimulateArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = logging::init_logging();

    let data_dir = resolve_data_dir(cli.data_dir)?;
    let database = data_dir.join(DATABASE_FILE_NAME);

    match cli.command {
        Commands::History { action } => handle_history_command(action, &database),
        Commands::Settings { action } => handle_settings_command(action, &database),
        Commands::Simulate(args) => handle_simulate_command(&args, &database, log),
    }
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match explicit {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("no platform data directory; pass --data-dir")?
            .join(DATA_DIR_NAME),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    Ok(dir)
}
