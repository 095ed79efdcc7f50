//! Command-line interface
//!
//! Thin wiring layer: parses arguments, builds settings from the
//! environment, connects the Redis backend, and hands control to the
//! selected service loop.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::{KvBackend, RedisBackend};
use crate::config::Settings;
use crate::event::{types, EventEnvelope};
use crate::orchestrator::Orchestrator;
use crate::runtime::{DlqReader, StreamProcessor};
use crate::schema::SchemaRegistry;
use crate::worker::{
    worker_group, AnalysisProcessor, ReportProcessor, RequirementsProcessor, WorkProcessor, Worker,
};

#[derive(Parser)]
#[command(
    name = "overture",
    version,
    about = "Event-driven workflow orchestrator for agent backlogs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator service
    Orchestrator,

    /// Run one worker agent
    Worker {
        /// Agent name (requirements_manager, dev_worker, test_worker, time_waste_worker)
        #[arg(long)]
        agent: String,
    },

    /// Publish an initial project request onto the work stream
    Seed {
        /// Project id; generated when omitted
        #[arg(long)]
        project_id: Option<String>,

        /// The request text the orchestrator will plan from
        #[arg(long)]
        request_text: String,

        /// Optional JSON file with work-context rows for the workers
        #[arg(long)]
        rows_file: Option<std::path::PathBuf>,
    },

    /// Inspect the dead-letter stream
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
}

#[derive(Subcommand)]
pub enum DlqCommands {
    /// Print recent dead-lettered documents as JSON lines
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Failure counts grouped by reason
    Stats,
}

/// Execute the parsed command.
pub async fn execute(command: Commands) -> Result<()> {
    let settings = Settings::from_env();
    let backend: Arc<dyn KvBackend> = Arc::new(
        RedisBackend::connect(&settings)
            .await
            .context("unable to connect to the backend")?,
    );

    match command {
        Commands::Orchestrator => run_orchestrator(backend, settings).await,
        Commands::Worker { agent } => run_worker(backend, settings, &agent).await,
        Commands::Seed {
            project_id,
            request_text,
            rows_file,
        } => seed(backend, &settings, project_id, &request_text, rows_file).await,
        Commands::Dlq { command } => dlq(backend, &settings, command).await,
    }
}

async fn run_orchestrator(backend: Arc<dyn KvBackend>, settings: Settings) -> Result<()> {
    let settings = Settings {
        consumer_group: "orchestrator".to_string(),
        ..settings
    };
    let registry = Arc::new(SchemaRegistry::load(&settings.schema_dir)?);
    let orchestrator = Orchestrator::new(backend.clone(), settings.clone());
    let processor = StreamProcessor::new(backend, registry, settings, orchestrator).await?;
    processor.run_forever().await
}

async fn run_worker(backend: Arc<dyn KvBackend>, settings: Settings, agent: &str) -> Result<()> {
    let processor: Box<dyn WorkProcessor> = match agent {
        "requirements_manager" => Box::new(RequirementsProcessor::new(agent)),
        "dev_worker" => Box::new(AnalysisProcessor::new(agent, false, &settings.ledger_dir)),
        "time_waste_worker" => Box::new(AnalysisProcessor::new(agent, true, &settings.ledger_dir)),
        "test_worker" => Box::new(ReportProcessor::new(agent)),
        other => bail!(
            "unknown agent {other:?}; expected one of requirements_manager, \
             dev_worker, test_worker, time_waste_worker"
        ),
    };

    let settings = Settings {
        consumer_group: worker_group(agent),
        ..settings
    };
    let registry = Arc::new(SchemaRegistry::load(&settings.schema_dir)?);
    let worker = Worker::new(
        backend.clone(),
        registry.clone(),
        settings.clone(),
        agent,
        processor,
    );
    let processor = StreamProcessor::new(backend, registry, settings, worker).await?;
    processor.run_forever().await
}

async fn seed(
    backend: Arc<dyn KvBackend>,
    settings: &Settings,
    project_id: Option<String>,
    request_text: &str,
    rows_file: Option<std::path::PathBuf>,
) -> Result<()> {
    let project_id = project_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut payload = json!({
        "project_id": project_id,
        "request_text": request_text,
    });
    if let Some(path) = rows_file {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("unable to read rows file {}", path.display()))?;
        let rows: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("rows file {} is not valid JSON", path.display()))?;
        payload["constraints"] = json!({ "rows": rows });
    }

    let envelope = EventEnvelope::builder(types::PROJECT_INITIAL_REQUEST_RECEIVED, "seed")
        .payload(payload)
        .build();
    let encoded = envelope.to_json()?;
    let entry_id = backend
        .stream_append(&settings.stream_name, &[("event", &encoded)])
        .await?;

    println!("published {} as {entry_id}", envelope.event_id);
    println!("project_id: {project_id}");
    Ok(())
}

async fn dlq(
    backend: Arc<dyn KvBackend>,
    settings: &Settings,
    command: DlqCommands,
) -> Result<()> {
    let reader = DlqReader::new(backend, settings.dlq_stream.clone());
    match command {
        DlqCommands::List { limit } => {
            let documents = reader.list(limit).await?;
            if documents.is_empty() {
                println!("dead-letter stream is empty");
                return Ok(());
            }
            for document in documents {
                println!("{}", serde_json::to_string(&document)?);
            }
        }
        DlqCommands::Stats => {
            let total = reader.len().await?;
            println!("total: {total}");
            for (reason, count) in reader.stats(10_000).await? {
                println!("{count:>6}  {reason}");
            }
        }
    }
    Ok(())
}
