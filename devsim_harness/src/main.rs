//! CLI entry point for the simulation harness: config-driven runs of the
//! built-in queueing scenarios, replication sweeps, CSV and JSONL output.

mod scenario;
mod trace;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use config as config_rs;
use devsim_rs::{Simulator, SimulatorConfig, SimulatorError, SimulatorEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scenario::{QueueModel, SCENARIOS, ScenarioConfig};
use trace::{TraceError, TraceRecord, TraceWriter};

/// Simulation Harness CLI
#[derive(Parser, Debug)]
#[command(name = "devsim-harness", about = "Runs queueing scenarios on the devsim kernel.")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for CSV/JSONL files
    #[arg(short, long, default_value = "./sim_output")]
    output: PathBuf,

    /// Built-in scenario to start from
    #[arg(long)]
    scenario: Option<String>,

    /// Parameter override (e.g. --param scenario.arrival_rate=0.95)
    #[arg(long, value_parser = parse_key_val, number_of_values = 1)]
    param: Vec<(String, String)>,

    /// Also write the trace as JSON lines
    #[arg(long)]
    jsonl: bool,

    /// Skip the per-event trace
    #[arg(long)]
    no_trace: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available built-in scenarios
    ListScenarios,
    /// Run a single replication (default)
    Run,
    /// Run several replications with consecutive seeds
    Sweep {
        #[arg(long, default_value_t = 5)]
        replications: u64,
    },
}

#[derive(Debug, Error)]
enum HarnessError {
    #[error("settings: {0}")]
    Settings(#[from] config_rs::ConfigError),
    #[error("simulator config: {0}")]
    SimulatorConfig(#[from] devsim_rs::ConfigError),
    #[error("simulator: {0}")]
    Simulator(#[from] SimulatorError),
    #[error("trace: {0}")]
    Trace(#[from] TraceError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
}

/// Everything the harness reads from files, environment and `--param`.
#[derive(Debug, Default, Deserialize)]
struct HarnessConfig {
    #[serde(default)]
    simulator: SimulatorConfig,
    #[serde(default)]
    scenario: ScenarioConfig,
}

#[derive(Serialize)]
struct PresetSource<'a> {
    scenario: &'a ScenarioConfig,
}

/// One row of `summary.csv`.
#[derive(Debug, Serialize)]
struct ReplicationSummary {
    replication: String,
    scenario: String,
    seed: u64,
    events: usize,
    arrivals: u64,
    served: u64,
    mean_wait: f64,
    max_wait: f64,
    max_queue: usize,
    utilisation: f64,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("Invalid KEY=VAL: no `=` found in '{}'.", s)),
    }
}

/// Layers preset, file, `DEVSIM__*` environment variables and `--param`
/// overrides, lowest precedence first.
fn load_settings(cli: &Cli) -> Result<HarnessConfig, HarnessError> {
    let mut builder = config_rs::Config::builder();
    if let Some(name) = &cli.scenario {
        let preset = ScenarioConfig::preset(name).ok_or_else(|| HarnessError::UnknownScenario(name.clone()))?;
        builder = builder.add_source(config_rs::Config::try_from(&PresetSource { scenario: &preset })?);
    }
    if let Some(path) = &cli.config {
        builder = builder.add_source(config_rs::File::from(path.as_path()));
    }
    builder = builder.add_source(config_rs::Environment::with_prefix("DEVSIM").separator("__"));
    for (key, value) in &cli.param {
        tracing::info!("Override param: {}={}", key, value);
        builder = builder.set_override(key.as_str(), value.as_str())?;
    }
    let settings: HarnessConfig = builder.build()?.try_deserialize()?;
    settings.simulator.validate()?;
    settings.scenario.validate().map_err(HarnessError::InvalidScenario)?;
    Ok(settings)
}

/// Runs one replication of `model` and summarises it.
fn run_replication(
    sim: &mut Simulator<f64>,
    model: &mut QueueModel,
    settings: &HarnessConfig,
    seed: u64,
    trace: Option<&TraceWriter>,
) -> Result<ReplicationSummary, HarnessError> {
    let replication = settings.simulator.replication::<f64>()?;
    model.set_seed(seed);
    sim.initialize(model, replication)?;

    let listener = trace.map(|writer| {
        let tx = writer.sender();
        let label = replication.id().to_string();
        sim.add_listener(move |event: &SimulatorEvent<f64>| {
            let detail = match event {
                SimulatorEvent::EventFailed { id, target, error, .. } => format!("{id} {target}: {error}"),
                SimulatorEvent::Drift { lag_secs, .. } => format!("lag {lag_secs:.3}s"),
                _ => String::new(),
            };
            let _ = tx.send(TraceRecord {
                replication: label.clone(),
                time: event.time(),
                kind: event.kind().to_string(),
                detail,
            });
        })
    });
    let executed = sim.run_to_end();
    if let Some(id) = listener {
        sim.remove_listener(id);
    }
    let executed = executed?;

    let stats = model.stats();
    let summary = ReplicationSummary {
        replication: replication.id().to_string(),
        scenario: settings.scenario.name.clone(),
        seed,
        events: executed,
        arrivals: stats.arrivals,
        served: stats.served,
        mean_wait: stats.mean_wait(),
        max_wait: stats.max_wait,
        max_queue: stats.max_queue,
        utilisation: stats.utilisation(replication.start(), sim.current_time()),
    };
    tracing::info!(
        "Replication {} (seed {}): {} events, {} served, mean wait {:.4}, utilisation {:.3}",
        summary.replication,
        seed,
        executed,
        summary.served,
        summary.mean_wait,
        summary.utilisation
    );
    Ok(summary)
}

fn run_sweep(cli: &Cli, settings: &HarnessConfig, replications: u64) -> Result<(), HarnessError> {
    std::fs::create_dir_all(&cli.output)?;
    let trace = if cli.no_trace {
        None
    } else {
        Some(TraceWriter::create(&cli.output, "trace", cli.jsonl)?)
    };

    let mut summaries = Vec::new();
    {
        let mut sim: Simulator<f64> = settings.simulator.simulator()?;
        let mut model = QueueModel::new(settings.scenario.clone(), trace.as_ref().map(TraceWriter::sender));
        for n in 0..replications {
            let seed = settings.scenario.seed + n;
            summaries.push(run_replication(&mut sim, &mut model, settings, seed, trace.as_ref())?);
        }
        // Simulator and model hold trace senders until dropped here.
    }
    if let Some(trace) = trace {
        let written = trace.finish()?;
        tracing::info!("Wrote {} trace records to {}", written, cli.output.display());
    }
    write_summary(&cli.output.join("summary.csv"), &summaries)?;
    Ok(())
}

fn write_summary(path: &Path, summaries: &[ReplicationSummary]) -> Result<(), HarnessError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for summary in summaries {
        wtr.serialize(summary)?;
    }
    wtr.flush()?;
    tracing::info!("Summary written to {}", path.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    if let Some(Commands::ListScenarios) = cli.command {
        for (name, description) in SCENARIOS {
            println!("{name:<10} {description}");
        }
        return;
    }

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("Running scenario: {}", settings.scenario.name);

    let replications = match cli.command {
        Some(Commands::Sweep { replications }) => replications,
        _ => 1,
    };
    if let Err(e) = run_sweep(&cli, &settings, replications) {
        tracing::error!("Simulation failed: {}", e);
        std::process::exit(1);
    }
}
