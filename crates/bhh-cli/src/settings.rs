use anyhow::{bail, Context, Result};
use bhh_core::{LogLevel, PartialSettings, Settings};
use bhh_storage::SettingsStore;
use clap::{Args, Subcommand};
use std::path::Path;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum SettingsCommand {
    Show(SettingsShowArgs),
    Set(SettingsSetArgs),
    Reset,
}

#[derive(Args, Debug)]
pub struct SettingsShowArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SettingsSetArgs {
    #[arg(long)]
    pub enabled: Option<bool>,
    #[arg(long, alias = "showHostOriginalUI")]
    pub show_host_original_ui: Option<bool>,
    #[arg(long, alias = "logLevel")]
    pub log_level: Option<LogLevel>,
}

impl SettingsSetArgs {
    fn to_patch(&self) -> PartialSettings {
        PartialSettings {
            enabled: self.enabled,
            show_host_original_ui: self.show_host_original_ui,
            log_level: self.log_level,
        }
    }
}

pub fn handle_settings_command(command: SettingsCommand, database: &Path) -> Result<()> {
    let store = SettingsStore::open(database)
        .with_context(|| format!("failed to open {}", database.display()))?;

    match command {
        SettingsCommand::Show(args) => print_settings(&store.load()?, args.json),
        SettingsCommand::Set(args) => {
            let patch = args.to_patch();
            if patch == PartialSettings::default() {
                bail!("Nothing to set; pass --enabled, --show-host-original-ui or --log-level.");
            }
            let change = store.update(&patch)?;
            if change.old == change.new {
                println!("Settings unchanged.");
            } else {
                println!("Settings updated.");
            }
            print_settings(&change.new, false)
        }
        SettingsCommand::Reset => {
            let change = store.reset()?;
            println!("Settings reset to defaults.");
            print_settings(&change.new, false)
        }
    }
}

fn print_settings(settings: &Settings, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(settings)?);
        return Ok(());
    }
    println!("enabled: {}", settings.enabled);
    println!("showHostOriginalUI: {}", settings.show_host_original_ui);
    println!("logLevel: {}", settings.log_level);
    Ok(())
}
