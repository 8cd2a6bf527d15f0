use anyhow::{bail, Context, Result};
use bhh_core::{HistoryEntry, HistoryFilter, OperationKind};
use bhh_history::HistoryService;
use bhh_storage::HistoryStore;
use clap::{Args, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum HistoryCommand {
    List(HistoryListArgs),
    Search(HistorySearchArgs),
    Show(HistoryShowArgs),
    Rename(HistoryRenameArgs),
    #[command(alias = "rm")]
    Remove(HistoryTargetArgs),
    Clear,
    Import(HistoryImportArgs),
    Export(HistoryExportArgs),
}

#[derive(Args, Debug)]
pub struct HistoryListArgs {
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HistorySearchArgs {
    /// Case-insensitive match on name or operation text
    pub text: Option<String>,
    #[arg(long)]
    pub kind: Option<OperationKind>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HistoryShowArgs {
    pub id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HistoryRenameArgs {
    pub id: String,
    pub name: String,
}

#[derive(Args, Debug)]
pub struct HistoryTargetArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct HistoryImportArgs {
    /// JSON array of records in any stored shape
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct HistoryExportArgs {
    /// Write to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub fn handle_history_command(command: HistoryCommand, database: &Path) -> Result<()> {
    let store = HistoryStore::open(database)
        .with_context(|| format!("failed to open {}", database.display()))?;
    let service = HistoryService::new(store);

    match command {
        HistoryCommand::List(args) => {
            let mut entries = service.list()?;
            if let Some(limit) = args.limit {
                entries.truncate(limit);
            }
            print_entries(&entries, args.json)
        }
        HistoryCommand::Search(args) => {
            let filter = HistoryFilter {
                text: args.text,
                kind: args.kind,
            };
            print_entries(&service.search(&filter)?, args.json)
        }
        HistoryCommand::Show(args) => {
            let Some(entry) = service.get(&args.id)? else {
                bail!("History entry [{}] not found.", args.id);
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
                return Ok(());
            }
            println!("{} ({})", entry.display_name, entry.operation_kind);
            println!("id: {}", entry.id);
            println!("created: {}", entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!();
            println!("{}", entry.operation_text);
            if !entry.variables_text.is_empty() {
                println!();
                println!("variables:");
                println!("{}", entry.variables_text);
            }
            Ok(())
        }
        HistoryCommand::Rename(args) => {
            if !service.rename(&args.id, &args.name)? {
                bail!("History entry [{}] not found.", args.id);
            }
            println!("Renamed [{}] to '{}'.", args.id, args.name.trim());
            Ok(())
        }
        HistoryCommand::Remove(args) => {
            if !service.remove(&args.id)? {
                bail!("History entry [{}] not found.", args.id);
            }
            println!("Removed [{}].", args.id);
            Ok(())
        }
        HistoryCommand::Clear => {
            let cleared = service.clear()?;
            println!("Cleared {cleared} entries.");
            Ok(())
        }
        HistoryCommand::Import(args) => {
            let json = fs::read_to_string(&args.path)
                .with_context(|| format!("failed to read {}", args.path.display()))?;
            let report = service.import(&json)?;
            println!(
                "Imported {} entries ({} already present, {} duplicates, {} skipped).",
                report.imported, report.already_present, report.duplicates, report.skipped
            );
            Ok(())
        }
        HistoryCommand::Export(args) => {
            let payload = export_json(&service)?;
            match args.output {
                Some(path) => {
                    fs::write(&path, payload)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported history to {}.", path.display());
                }
                None => println!("{payload}"),
            }
            Ok(())
        }
    }
}

pub fn export_json(service: &HistoryService) -> Result<String> {
    let entries = service.list()?;
    Ok(serde_json::to_string_pretty(&entries)?)
}

fn print_entries(entries: &[HistoryEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No history entries.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<12}  {}  [{}]",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.operation_kind.as_str(),
            entry.display_name,
            entry.id
        );
    }
    Ok(())
}
