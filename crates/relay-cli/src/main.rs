// Copyright (c) 2025 Relay Team
// SPDX-License-Identifier: Apache-2.0

//! Relay CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use relay_broker::{BrokerRef, LocalBroker, MessagingRef, RecordingMessaging};
use relay_credentials::{CredentialProvisioner, HttpWorkspaceApi};
use relay_engine::{
    load_config, AgentInvoker, DataDirs, EngineEvent, EventBus, RunnerDeps, WorkerRegistry,
    WorkflowRunner,
};
use relay_state::{InMemoryStateStore, RunStatus, StateStoreRef};
use relay_trajectory::TrajectoryRecorder;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default control-plane endpoint for workspace provisioning.
const DEFAULT_API_URL: &str = "https://api.relaycast.dev";

#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about = "Relay multi-agent workflow orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a relay configuration file
    Validate {
        /// Path to config file
        #[arg(value_name = "FILE")]
        file: String,

        /// Input JSON string or file with template variables
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Run a workflow from a configuration file
    Run {
        /// Path to config file
        #[arg(value_name = "FILE")]
        file: String,

        /// Workflow to run (defaults to the first one)
        #[arg(short, long)]
        workflow: Option<String>,

        /// Input JSON string or file with template variables
        #[arg(short, long)]
        input: Option<String>,

        /// Project data directory
        #[arg(long, default_value = ".relay")]
        data_dir: PathBuf,

        /// Control-plane URL for workspace provisioning
        #[arg(long, default_value = DEFAULT_API_URL)]
        api_url: String,

        /// Skip workspace provisioning and run against a local workspace
        #[arg(long)]
        offline: bool,

        /// Disable trajectory recording
        #[arg(long)]
        no_trajectory: bool,
    },

    /// Print the communication topology for a configuration
    Topology {
        /// Path to config file
        #[arg(value_name = "FILE")]
        file: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("relay={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file, input } => validate(&file, input.as_deref()),
        Commands::Run {
            file,
            workflow,
            input,
            data_dir,
            api_url,
            offline,
            no_trajectory,
        } => {
            run(
                &file,
                workflow.as_deref(),
                input.as_deref(),
                data_dir,
                &api_url,
                offline,
                no_trajectory,
            )
            .await
        }
        Commands::Topology { file } => topology(&file),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn validate(file: &str, input: Option<&str>) -> Result<()> {
    println!("{} {}", "Validating config:".cyan().bold(), file);

    let vars = parse_input(input)?;
    let config = load_config(Path::new(file), &vars)
        .with_context(|| format!("Failed to load config: {}", file))?;

    println!("{}", "✓ Config is valid".green().bold());
    println!("  Name: {}", config.name);
    println!("  Agents: {}", config.agents.len());
    println!("  Workflows: {}", config.workflows.len());
    for workflow in &config.workflows {
        println!("    {} ({} steps)", workflow.name, workflow.steps.len());
    }

    Ok(())
}

fn topology(file: &str) -> Result<()> {
    let config = load_config(Path::new(file), &Value::Null)
        .with_context(|| format!("Failed to load config: {}", file))?;
    let pattern = relay_engine::select_pattern(&config);
    let topology = relay_engine::build_topology(&config, pattern);

    println!("{} {}", "Pattern:".cyan().bold(), pattern);
    println!("{} {}", "Topology:".cyan().bold(), topology.describe());
    for (agent, targets) in &topology.edges {
        if targets.is_empty() {
            println!("  {} →", agent);
        } else {
            println!("  {} → {}", agent, targets.join(", "));
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run(
    file: &str,
    workflow: Option<&str>,
    input: Option<&str>,
    data_dir: PathBuf,
    api_url: &str,
    offline: bool,
    no_trajectory: bool,
) -> Result<()> {
    let vars = parse_input(input)?;
    let config = load_config(Path::new(file), &vars)
        .with_context(|| format!("Failed to load config: {}", file))?;

    let workflow_name = match workflow {
        Some(name) => name.to_string(),
        None => config
            .workflows
            .first()
            .map(|w| w.name.clone())
            .context("Config defines no workflows")?,
    };

    let dirs = DataDirs::new(&data_dir);

    // Workspace credentials come first; a run never starts without them.
    let workspace_id = if offline {
        "local".to_string()
    } else {
        let api = Arc::new(HttpWorkspaceApi::new(api_url));
        let mut provisioner = CredentialProvisioner::new(api, dirs.credentials_file());
        if let Ok(home) = std::env::var("HOME") {
            provisioner = provisioner
                .with_global_cache(Path::new(&home).join(".relay").join("relaycast.json"));
        }
        let credentials = provisioner
            .ensure()
            .await
            .context("Workspace provisioning failed")?;
        info!(workspace = %credentials.workspace_id, "Workspace ready");
        credentials.workspace_id
    };

    let trajectories_enabled = !no_trajectory
        && config
            .trajectories
            .as_ref()
            .map(|t| t.is_enabled())
            .unwrap_or(true);
    let trajectory = if trajectories_enabled {
        Arc::new(TrajectoryRecorder::new(dirs.trajectories_dir()))
    } else {
        Arc::new(TrajectoryRecorder::disabled())
    };

    let broker: BrokerRef = Arc::new(LocalBroker::new());
    let messaging: MessagingRef = Arc::new(RecordingMessaging::new());
    let store: StateStoreRef = Arc::new(InMemoryStateStore::new());
    let registry = Arc::new(WorkerRegistry::new(dirs.workers_file()));
    let invoker = AgentInvoker::new(broker.clone(), messaging.clone(), registry, dirs.clone());

    let events = EventBus::new();
    events.subscribe(print_event);

    let runner = Arc::new(WorkflowRunner::new(
        config,
        RunnerDeps {
            store,
            invoker,
            messaging,
            trajectory,
            dirs,
            workspace_id,
            events,
        },
    ));

    // Ctrl-C aborts the run; children get SIGTERM, then SIGKILL.
    let abort_handle = runner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Aborting run…".yellow());
            abort_handle.abort();
        }
    });

    println!(
        "{} {} ({})",
        "Running workflow:".cyan().bold(),
        workflow_name,
        runner.topology().describe()
    );

    let run = runner
        .execute_workflow(&workflow_name)
        .await
        .with_context(|| "Workflow execution failed")?;

    // Tear down any agents still attached to the broker.
    if let Err(e) = broker.shutdown().await {
        tracing::debug!(error = %e, "Broker shutdown failed");
    }

    match run.status {
        RunStatus::Completed => println!("{}", "✓ Run completed".green().bold()),
        RunStatus::Failed => println!(
            "{} {}",
            "✗ Run failed:".red().bold(),
            run.error.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::Cancelled => println!("{}", "Run cancelled".yellow().bold()),
        other => println!("Run ended in status {}", other.as_str()),
    }

    if run.status == RunStatus::Failed {
        std::process::exit(2);
    }
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::StepStarted { step, .. } => {
            println!("  {} {}", "●".cyan(), step);
        }
        EngineEvent::StepCompleted { step, .. } => {
            println!("  {} {}", "✓".green(), step);
        }
        EngineEvent::StepFailed { step, error, .. } => {
            println!("  {} {} ({})", "✗".red(), step, error.dimmed());
        }
        EngineEvent::StepRetrying { step, attempt, .. } => {
            println!("  {} {} (attempt {})", "↻".yellow(), step, attempt);
        }
        EngineEvent::StepSkipped { step, reason, .. } => {
            println!("  {} {} ({})", "-".dimmed(), step, reason.dimmed());
        }
        _ => {}
    }
}

fn parse_input(input: Option<&str>) -> Result<Value> {
    let Some(input_str) = input else {
        return Ok(Value::Object(serde_json::Map::new()));
    };

    // Check if input is a file path
    if Path::new(input_str).exists() {
        let content = std::fs::read_to_string(input_str)
            .with_context(|| format!("Failed to read input file: {}", input_str))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse input JSON from file: {}", input_str))
    } else {
        serde_json::from_str(input_str).with_context(|| "Failed to parse input JSON string")
    }
}
