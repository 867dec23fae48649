mod config;

pub use config::{BenchConfig, CONFIG_FILE};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::engine::types::{CaseId, Outcome, RunState, RunStatus};
use crate::engine::{CaseRegistry, RunStateEngine, StatePublisher};
use crate::plan::TestPlan;
use crate::storage::json_store::JsonStateStore;
use crate::storage::{StateStore, spawn_persister};

const DEFAULT_STORE_DIR: &str = "data/runs";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

#[derive(Parser)]
#[command(name = "benchstate", version, about = "Run-state engine for hardware test benches")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to benchstate.yaml (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Queue depth of each run-state subscriber (at least 1)
    #[arg(
        long,
        global = true,
        env = "BENCHSTATE_SUBSCRIBER_CAPACITY",
        value_parser = parse_capacity
    )]
    subscriber_capacity: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a test plan's cases and dependencies without running it
    Validate {
        /// Path to the plan YAML file (default: `plan` from benchstate.yaml)
        plan: Option<PathBuf>,
    },

    /// Drive a run using the outcomes scripted in a plan file
    DryRun {
        /// Path to the plan YAML file (default: `plan` from benchstate.yaml)
        plan: Option<PathBuf>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,

        /// State store directory
        #[arg(long, env = "STORE_DIR")]
        store_dir: Option<PathBuf>,
    },

    /// List stored runs
    List {
        /// Filter by status (running, passed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// State store directory
        #[arg(long, env = "STORE_DIR")]
        store_dir: Option<PathBuf>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Print a stored run document
    Inspect {
        /// Run ID
        run_id: String,

        /// State store directory
        #[arg(long, env = "STORE_DIR")]
        store_dir: Option<PathBuf>,
    },

    /// Start the dashboard API server
    Serve {
        /// Host to bind to
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// State store directory
        #[arg(long, env = "STORE_DIR")]
        store_dir: Option<PathBuf>,

        /// Reopen the most recent unfinished run from the store
        #[arg(long)]
        resume: bool,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let config = BenchConfig::load(cli.config.as_deref())?;
    let capacity = cli.subscriber_capacity.or(config.subscriber_capacity);

    match cli.command {
        Commands::Validate { plan } => cmd_validate(config.plan_path(plan)?),
        Commands::DryRun {
            plan,
            verbose,
            store_dir,
        } => {
            let plan = config.plan_path(plan)?;
            cmd_dry_run(plan, verbose, store_dir_from(store_dir, &config), capacity).await
        }
        Commands::List {
            status,
            store_dir,
            format,
        } => cmd_list(status, store_dir_from(store_dir, &config), format).await,
        Commands::Inspect { run_id, store_dir } => {
            cmd_inspect(run_id, store_dir_from(store_dir, &config)).await
        }
        Commands::Serve {
            host,
            port,
            store_dir,
            resume,
        } => {
            let host = host
                .or_else(|| config.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string());
            let port = port.or(config.port).unwrap_or(DEFAULT_PORT);
            cmd_serve(&host, port, store_dir_from(store_dir, &config), resume, capacity).await
        }
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("subscriber capacity must be at least 1".to_string()),
        Ok(capacity) => Ok(capacity),
        Err(e) => Err(format!("invalid subscriber capacity '{}': {}", raw, e)),
    }
}

fn store_dir_from(flag: Option<PathBuf>, config: &BenchConfig) -> PathBuf {
    flag.or_else(|| config.store_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR))
}

fn build_engine(capacity: Option<usize>) -> Arc<RunStateEngine> {
    match capacity {
        Some(capacity) => Arc::new(RunStateEngine::with_publisher(Arc::new(
            StatePublisher::new(capacity),
        ))),
        None => Arc::new(RunStateEngine::new()),
    }
}

fn outcome_icon(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "✓",
        Outcome::Failed => "✗",
        Outcome::Skipped => "⊘",
        Outcome::Blocked => "⊗",
        Outcome::NotRun => "○",
    }
}

fn cmd_validate(plan_path: PathBuf) -> Result<()> {
    let plan = TestPlan::load(&plan_path)?;

    println!("Plan: {}", plan.name);
    println!("Cases: {}", plan.cases.len());

    let mut registry = CaseRegistry::new();
    let mut errors = Vec::new();

    for case in &plan.cases {
        let parsed = CaseId::new(case.id.as_str()).and_then(|id| {
            let deps = case
                .depends_on
                .iter()
                .map(|d| CaseId::new(d.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            registry.register(id, deps)
        });
        if let Err(e) = parsed {
            errors.push(e.to_string());
        }
    }

    errors.extend(registry.validate());

    if errors.is_empty() {
        println!("Validation: OK");

        println!("\nExecution order:");
        for case in registry.iter() {
            let deps = if case.dependencies.is_empty() {
                String::from("(no dependencies)")
            } else {
                let names: Vec<&str> = case.dependencies.iter().map(|d| d.as_str()).collect();
                format!("depends on: {}", names.join(", "))
            };
            println!("  {} {}", case.id, deps);
        }
    } else {
        println!("Validation: FAILED");
        for err in &errors {
            println!("  - {}", err);
        }
        anyhow::bail!("{} validation error(s) found", errors.len());
    }

    Ok(())
}

async fn cmd_dry_run(
    plan_path: PathBuf,
    verbose: bool,
    store_dir: PathBuf,
    capacity: Option<usize>,
) -> Result<()> {
    let plan = TestPlan::load(&plan_path)?;
    println!("Plan: {} ({} cases)", plan.name, plan.cases.len());

    let engine = build_engine(capacity);
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(store_dir));
    let persister = spawn_persister(store.clone(), engine.publisher());

    let result = plan.dry_run(engine.clone()).await;
    persister.shutdown(engine.publisher()).await?;
    let run = result?;

    print_run(&run, verbose);
    Ok(())
}

fn print_run(run: &RunState, verbose: bool) {
    println!("\nRun ID: {}", run.id);
    println!("Status: {}", run.status);

    for module in &run.modules {
        let title = if module.name.is_empty() {
            "(root)"
        } else {
            module.name.as_str()
        };
        println!("\n{}:", title);
        for case in &module.cases {
            println!("  {} {} [{}]", outcome_icon(case.outcome), case.id.name(), case.outcome);
            if let Some(ref message) = case.message {
                println!("    {}", message);
            }
            if verbose {
                if let (Some(s), Some(f)) = (&case.started, &case.finished) {
                    println!("    Duration: {}ms", (*f - *s).num_milliseconds());
                }
                for step in &case.steps {
                    println!("    - {}", step.message);
                }
                if let Some(ref instrument) = case.instrument {
                    println!("    Instrument: {}", instrument.name);
                }
            }
        }
    }

    let counts = run.counts();
    println!(
        "\n{} passed, {} failed, {} skipped, {} blocked",
        counts.passed, counts.failed, counts.skipped, counts.blocked
    );
}

async fn cmd_list(status_filter: Option<String>, store_dir: PathBuf, format: String) -> Result<()> {
    let store = JsonStateStore::new(store_dir);

    let status = status_filter
        .as_deref()
        .map(|s| s.parse::<RunStatus>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()?;

    let runs = store.list_runs(status).await?;

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<10} {:<24}",
        "RUN ID", "PLAN", "STATUS", "STARTED"
    );
    println!("{}", "-".repeat(92));

    for run in &runs {
        println!(
            "{:<38} {:<20} {:<10} {:<24}",
            run.id,
            run.plan,
            run.status,
            run.started.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\nTotal: {} run(s)", runs.len());
    Ok(())
}

async fn cmd_inspect(run_id: String, store_dir: PathBuf) -> Result<()> {
    let store = JsonStateStore::new(store_dir);

    let run = store
        .load(&run_id)
        .await
        .with_context(|| format!("Run '{}' not found", run_id))?;

    println!("{}", serde_json::to_string_pretty(&run)?);

    Ok(())
}

async fn cmd_serve(
    host: &str,
    port: u16,
    store_dir: PathBuf,
    resume: bool,
    capacity: Option<usize>,
) -> Result<()> {
    let engine = build_engine(capacity);
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(store_dir));
    let _persister = spawn_persister(store.clone(), engine.publisher());

    if resume {
        match store.latest_unfinished().await? {
            Some(run) => {
                let run_id = run.id.clone();
                engine
                    .resume_run(run)
                    .await
                    .with_context(|| format!("Failed to resume run '{}'", run_id))?;
            }
            None => info!("No unfinished run to resume"),
        }
    }

    let state = Arc::new(crate::api::AppState { engine, store });
    crate::api::serve(host, port, state).await
}
