use crate::logging::LogHandle;
use anyhow::{Context, Result};
use bhh_core::{HistoryEntry, PartialSettings};
use bhh_history::HistoryService;
use bhh_lifecycle::{
    CaptureHandler, ConsoleNodes, EditorCaptureExtractor, ElementSpec, HostPage, LifecycleConfig,
    LifecycleRuntime, LifecycleSnapshot, LogLevelSink, MemoryHost, SettingsProvider,
    DEFAULT_ANCHOR_TIMEOUT,
};
use bhh_storage::{HistoryStore, SettingsStore};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;
use tracing::{debug, warn};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Scenario file: `{"steps": [{"step": "show_console"}, ...]}`
    pub scenario: PathBuf,
    /// Record into the data dir database instead of a throwaway one
    #[arg(long)]
    pub persist: bool,
    #[arg(long, default_value_t = DEFAULT_ANCHOR_TIMEOUT.as_millis() as u64)]
    pub anchor_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Scenario {
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    ShowConsole,
    HideConsole,
    /// Unrelated mutation under the observer root.
    Touch,
    TypeQuery {
        operation: String,
        #[serde(default)]
        variables: String,
    },
    Execute,
    Settings(PartialSettings),
    WaitMs {
        ms: u64,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub steps: usize,
    pub lifecycle: LifecycleSnapshot,
    pub entries: Vec<HistoryEntry>,
}

pub fn handle_simulate_command(args: &SimulateArgs, database: &Path, log: LogHandle) -> Result<()> {
    let raw = fs::read_to_string(&args.scenario)
        .with_context(|| format!("failed to read {}", args.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.scenario.display()))?;

    let (history, settings) = if args.persist {
        (
            HistoryStore::open(database)
                .with_context(|| format!("failed to open {}", database.display()))?,
            SettingsStore::open(database)
                .with_context(|| format!("failed to open {}", database.display()))?,
        )
    } else {
        (HistoryStore::open_in_memory()?, SettingsStore::open_in_memory()?)
    };
    let config = LifecycleConfig {
        anchor_timeout: Duration::from_millis(args.anchor_timeout_ms),
        ..LifecycleConfig::default()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to build runtime")?;
    let report = LocalSet::new().block_on(
        &runtime,
        run_scenario(scenario, history, settings, config, Rc::new(log)),
    )?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Must run inside a `LocalSet`.
pub async fn run_scenario(
    scenario: Scenario,
    history: HistoryStore,
    settings: SettingsStore,
    config: LifecycleConfig,
    log: Rc<dyn LogLevelSink>,
) -> Result<SimulationReport> {
    let memory = Rc::new(MemoryHost::new());
    let host: Rc<dyn HostPage> = memory.clone();
    let history = Rc::new(HistoryService::new(history));
    let settings = SettingsProvider::new(settings)?;
    let capture = Rc::new(CaptureHandler::new(
        EditorCaptureExtractor::new(&host, &config.selectors),
        history.clone(),
    ));
    let lifecycle = LifecycleRuntime::start(host, config, capture, log, &settings)?;

    let mut console: Option<ConsoleNodes> = None;
    let steps = scenario.steps.len();
    for (index, step) in scenario.steps.into_iter().enumerate() {
        debug!("simulation_step: #{index} {step:?}");
        match step {
            ScenarioStep::ShowConsole => {
                if console.is_some() {
                    warn!("simulation_step_ignored: #{index} console already shown");
                } else {
                    console = Some(memory.mount_console()?);
                }
            }
            ScenarioStep::HideConsole => match console.take() {
                Some(nodes) => {
                    memory.remove(nodes.region);
                }
                None => warn!("simulation_step_ignored: #{index} console not shown"),
            },
            ScenarioStep::Touch => {
                let parent = console
                    .as_ref()
                    .map(|nodes| nodes.explorer)
                    .unwrap_or_else(|| memory.body());
                memory.append(parent, ElementSpec::new("div").class("doc-entry"))?;
            }
            ScenarioStep::TypeQuery {
                operation,
                variables,
            } => {
                let nodes = console
                    .as_ref()
                    .with_context(|| format!("step #{index}: type_query needs a shown console"))?;
                memory.set_editor_text(nodes, &operation, &variables)?;
            }
            ScenarioStep::Execute => match console.as_ref() {
                Some(nodes) => {
                    memory.click(nodes.execute);
                }
                None => warn!("simulation_step_ignored: #{index} console not shown"),
            },
            ScenarioStep::Settings(patch) => {
                settings.update(&patch)?;
            }
            ScenarioStep::WaitMs { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        // Let spawned lifecycle tasks observe this step before the next one.
        tokio::task::yield_now().await;
    }

    let report = SimulationReport {
        steps,
        lifecycle: lifecycle.controller().snapshot(),
        entries: history.list()?,
    };
    lifecycle.shutdown();
    Ok(report)
}
