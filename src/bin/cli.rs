//! `taskgraphctl`: a small admin CLI for the workflow execution engine —
//! validate a script file, submit a workflow definition, or run one to
//! completion against in-memory storage. Mirrors the teacher's
//! `circuit-breaker-admin` (`src/bin/admin.rs`) clap layout, without its
//! NATS-specific subcommands and interactive confirmation prompts (this
//! tool operates on a throwaway in-memory store, not a shared backend).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use taskgraph::agent_interface::{AgentInterface, DefaultAgentInterface};
use taskgraph::engine::api_client::ApiClient;
use taskgraph::engine::checkpoint::InMemoryCheckpointSink;
use taskgraph::engine::dispatcher::DispatchContext;
use taskgraph::engine::notifications::LogNotificationTransport;
use taskgraph::engine::sandbox::ScriptSandbox;
use taskgraph::engine::storage::{InMemoryStorage, WorkflowStorage};
use taskgraph::engine::Runner;
use taskgraph::knowledge::classifier::DomainClassifier;
use taskgraph::knowledge::embeddings::HashEmbedder;
use taskgraph::knowledge::index::KnowledgeIndex;
use taskgraph::llm::UnconfiguredLlmClient;
use taskgraph::models::Workflow;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "taskgraphctl")]
#[command(about = "Admin CLI for the workflow execution engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Interpreter used for python_script steps.
    #[arg(long, env = "SANDBOX_INTERPRETER", default_value = "python3")]
    sandbox_interpreter: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the code validator (C1) against a script file.
    Validate {
        /// Path to the python_script body to check.
        script_path: PathBuf,
    },

    /// Validate and persist a workflow definition (JSON) into a fresh
    /// in-memory store. Prints the assigned `(id, version)`.
    Submit {
        /// Path to a JSON-encoded `Workflow` definition.
        definition_path: PathBuf,
    },

    /// Submit a workflow definition and run it to completion against a
    /// fresh in-memory store. Prints the terminal `Execution` record.
    Run {
        /// Path to a JSON-encoded `Workflow` definition.
        definition_path: PathBuf,

        /// Path to a JSON object used as the execution's `input_data`.
        #[arg(long)]
        input_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { script_path } => validate(&script_path)?,
        Commands::Submit { definition_path } => submit(&definition_path, &cli.sandbox_interpreter).await?,
        Commands::Run {
            definition_path,
            input_path,
        } => run(&definition_path, input_path.as_deref(), &cli.sandbox_interpreter).await?,
    }

    Ok(())
}

fn validate(script_path: &std::path::Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(script_path)?;
    match taskgraph::engine::validate_script(&source) {
        Ok(report) => {
            info!(ok = report.ok, warnings = report.warnings.len(), "validation complete");
            for warning in &report.warnings {
                println!("warning: {}", warning.message);
            }
            println!("ok: {}", report.ok);
        }
        Err(e) => {
            error!(error = %e, "script rejected");
            println!("rejected: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn build_agent_interface(
    interpreter: &str,
) -> (Arc<DefaultAgentInterface>, Arc<dyn WorkflowStorage>, Arc<Runner>) {
    let storage: Arc<dyn WorkflowStorage> = Arc::new(InMemoryStorage::default());
    let knowledge = Arc::new(KnowledgeIndex::new(
        storage.clone(),
        Arc::new(HashEmbedder),
        Arc::new(DomainClassifier::with_default_domains()),
    ));
    let agent_interface = Arc::new(DefaultAgentInterface::new(storage.clone(), knowledge));
    let dispatch_ctx = Arc::new(DispatchContext {
        api_client: Arc::new(ApiClient::new()),
        sandbox: Arc::new(ScriptSandbox::new(interpreter.to_string(), Duration::from_secs(300))),
        notifications: Arc::new(LogNotificationTransport),
        llm: Arc::new(UnconfiguredLlmClient),
    });
    let runner = Arc::new(Runner::new(storage.clone(), Arc::new(InMemoryCheckpointSink::new()), dispatch_ctx));
    (agent_interface, storage, runner)
}

async fn submit(definition_path: &std::path::Path, interpreter: &str) -> anyhow::Result<()> {
    let definition: Workflow = serde_json::from_str(&std::fs::read_to_string(definition_path)?)?;
    let (agent_interface, storage, _runner) = build_agent_interface(interpreter);
    let id = agent_interface.persist_workflow(definition).await?;
    let saved = storage.get_workflow(&id).await?.expect("just persisted");
    println!("submitted workflow `{}` version {}", saved.id, saved.version);
    Ok(())
}

async fn run(
    definition_path: &std::path::Path,
    input_path: Option<&std::path::Path>,
    interpreter: &str,
) -> anyhow::Result<()> {
    let definition: Workflow = serde_json::from_str(&std::fs::read_to_string(definition_path)?)?;
    let input_data = match input_path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::Map::new(),
    };

    let (agent_interface, _storage, runner) = build_agent_interface(interpreter);
    let workflow_id = agent_interface.persist_workflow(definition).await?;
    let execution = runner.start_execution(&workflow_id, input_data).await?;

    println!("{}", serde_json::to_string_pretty(&execution)?);
    if execution.status != taskgraph::models::ExecutionStatus::Success {
        std::process::exit(1);
    }
    Ok(())
}
