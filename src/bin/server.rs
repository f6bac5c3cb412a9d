//! Main server binary: starts the REST surface over the workflow
//! execution engine. Run with `cargo run --bin server`.

use std::sync::Arc;

use taskgraph::agent_interface::DefaultAgentInterface;
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
use taskgraph::llm::providers::{AnthropicClient, OpenAiClient};
use taskgraph::llm::{LlmClient, UnconfiguredLlmClient};
use taskgraph::server::{AppState, RestServer, RestServerConfig};
use taskgraph::Config;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    info!("starting workflow execution engine server");
    info!(bind_addr = %config.bind_addr(), "configuration loaded");

    let storage: Arc<dyn WorkflowStorage> = Arc::new(InMemoryStorage::default());
    let classifier = Arc::new(DomainClassifier::with_default_domains());
    let knowledge = Arc::new(KnowledgeIndex::new(storage.clone(), Arc::new(HashEmbedder), classifier));

    let llm: Arc<dyn LlmClient> = if let Some(key) = &config.anthropic_api_key {
        info!("anthropic API key configured, using it for llm_call steps");
        Arc::new(AnthropicClient::new(key.clone()))
    } else if let Some(key) = &config.openai_api_key {
        info!("openai API key configured, using it for llm_call steps");
        Arc::new(OpenAiClient::new(key.clone()))
    } else {
        info!("no LLM provider configured; llm_call steps will fail until one is set");
        Arc::new(UnconfiguredLlmClient)
    };

    let dispatch_ctx = Arc::new(DispatchContext {
        api_client: Arc::new(ApiClient::new()),
        sandbox: Arc::new(ScriptSandbox::new(config.sandbox_interpreter.clone(), config.sandbox_timeout)),
        notifications: Arc::new(LogNotificationTransport),
        llm,
    });

    let runner = Arc::new(Runner::new(storage.clone(), Arc::new(InMemoryCheckpointSink::new()), dispatch_ctx));
    let agent_interface = Arc::new(DefaultAgentInterface::new(storage.clone(), knowledge.clone()));

    let state = AppState {
        runner,
        storage,
        knowledge,
        agent_interface,
    };

    let server = RestServer::new(
        RestServerConfig {
            bind_addr: config.bind_addr(),
            cors_enabled: true,
        },
        state,
    );

    server.build_and_run().await?;
    Ok(())
}
