//! `axum`-based REST server exposing the runner, knowledge index, and
//! agent interface (§6). Grounded in the teacher's `GraphQLServer` /
//! `GraphQLServerConfig` / builder pattern (`src/server/graphql.rs`),
//! generalized from a GraphQL schema to a set of plain JSON routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::agent_interface::{AgentInterface, RetrievalPurpose};
use crate::engine::runner::Runner;
use crate::engine::storage::WorkflowStorage;
use crate::knowledge::index::KnowledgeIndex;
use crate::models::{ExecutionStatus, Workflow};
use crate::EngineError;

/// Everything a route handler needs, shared behind `Arc` across
/// connections (§5: the runner, storage, and knowledge index are the
/// process-wide shared resources; `AppState` just groups the handles to
/// them).
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<Runner>,
    pub storage: Arc<dyn WorkflowStorage>,
    pub knowledge: Arc<KnowledgeIndex>,
    pub agent_interface: Arc<dyn AgentInterface>,
}

#[derive(Clone)]
pub struct RestServerConfig {
    pub bind_addr: String,
    pub cors_enabled: bool,
}

impl Default for RestServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            cors_enabled: true,
        }
    }
}

/// Builder-style server wrapper, mirroring the teacher's
/// `GraphQLServerBuilder::new().with_port(..).build_and_run()` shape.
pub struct RestServer {
    config: RestServerConfig,
    state: AppState,
}

impl RestServer {
    pub fn new(config: RestServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        let mut app = Router::new()
            .route("/health", get(health_check))
            .route("/workflows", get(list_workflows).post(create_workflow))
            .route("/workflows/:id", get(get_workflow))
            .route("/workflows/:id/execute", post(execute_workflow))
            .route("/executions", get(list_executions))
            .route("/executions/:id", get(get_execution))
            .route("/executions/:id/steps", get(list_step_executions))
            .route("/executions/:id/approve", post(approve_execution))
            .route("/executions/:id/reject", post(reject_execution))
            .route("/executions/:id/cancel", post(cancel_execution))
            .route("/executions/:id/retry", post(retry_execution))
            .route("/knowledge/search", get(search_knowledge))
            .route("/agent/validate-code", post(validate_code))
            .route("/agent/context", get(retrieve_context))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            app = app.layer(CorsLayer::permissive());
        }
        app
    }

    pub async fn build_and_run(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr.clone();
        let router = self.router();
        info!(%addr, "rest server listening");
        axum::Server::bind(&addr.parse()?)
            .serve(router.into_make_service())
            .await?;
        Ok(())
    }
}

/// Turns the crate's error taxonomy into an HTTP response (§7's "never
/// throws across its boundary" applies to the runner; the server's job is
/// to render whatever comes back instead of panicking on it).
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) | EngineError::Evaluation(_) => StatusCode::BAD_REQUEST,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn list_workflows(State(state): State<AppState>) -> ApiResult<Vec<Workflow>> {
    Ok(Json(state.storage.list_workflows().await?))
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Workflow> {
    let workflow = state
        .storage
        .get_workflow(&id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("workflow `{id}`")))?;
    Ok(Json(workflow))
}

async fn create_workflow(State(state): State<AppState>, Json(definition): Json<Workflow>) -> ApiResult<serde_json::Value> {
    let id = state.agent_interface.persist_workflow(definition).await?;
    Ok(Json(serde_json::json!({"workflow_id": id})))
}

#[derive(Debug, Deserialize, Default)]
struct ExecuteBody {
    #[serde(default)]
    input_data: serde_json::Map<String, serde_json::Value>,
}

async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ExecuteBody>>,
) -> ApiResult<crate::models::Execution> {
    let input_data = body.map(|Json(b)| b.input_data).unwrap_or_default();
    let execution = state.runner.start_execution(&id, input_data).await?;
    Ok(Json(execution))
}

#[derive(Debug, Deserialize, Default)]
struct ListExecutionsQuery {
    workflow_id: Option<String>,
    status: Option<ExecutionStatus>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(q): Query<ListExecutionsQuery>,
) -> ApiResult<Vec<crate::models::Execution>> {
    Ok(Json(
        state
            .storage
            .list_executions(q.workflow_id.as_deref(), q.status)
            .await?,
    ))
}

async fn get_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<crate::models::Execution> {
    let execution = state
        .storage
        .get_execution(&id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("execution {id}")))?;
    Ok(Json(execution))
}

async fn list_step_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<crate::models::StepExecution>> {
    Ok(Json(state.runner.step_executions(id).await?))
}

async fn approve_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<crate::models::Execution> {
    Ok(Json(state.runner.approve(id).await?))
}

async fn reject_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<crate::models::Execution> {
    Ok(Json(state.runner.reject(id).await?))
}

async fn cancel_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<serde_json::Value> {
    state.runner.cancel_execution(id).await?;
    Ok(Json(serde_json::json!({"cancelled": true})))
}

async fn retry_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<crate::models::Execution> {
    Ok(Json(state.runner.retry_execution(id).await?))
}

#[derive(Debug, Deserialize)]
struct KnowledgeSearchQuery {
    q: String,
    domain: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_semantic_weight")]
    semantic_weight: f32,
}

fn default_limit() -> usize {
    10
}

fn default_semantic_weight() -> f32 {
    0.7
}

async fn search_knowledge(
    State(state): State<AppState>,
    Query(q): Query<KnowledgeSearchQuery>,
) -> ApiResult<Vec<serde_json::Value>> {
    let hits = state
        .knowledge
        .search_metadata(&q.q, q.domain.as_deref(), q.limit, q.semantic_weight)
        .await?;
    let rendered = hits
        .into_iter()
        .map(|hit| {
            serde_json::json!({
                "document_id": hit.document_id,
                "title": hit.title,
                "domain": hit.domain,
                "score": hit.score,
                "body": hit.body,
            })
        })
        .collect();
    Ok(Json(rendered))
}

#[derive(Debug, Deserialize)]
struct ValidateCodeBody {
    script_body: String,
}

async fn validate_code(
    State(state): State<AppState>,
    Json(body): Json<ValidateCodeBody>,
) -> Json<crate::agent_interface::CodeValidation> {
    Json(state.agent_interface.validate_code(&body.script_body))
}

#[derive(Debug, Deserialize)]
struct RetrieveContextQuery {
    query: String,
    #[serde(default)]
    purpose: RetrievalPurposeParam,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum RetrievalPurposeParam {
    #[default]
    Create,
    Fix,
}

impl From<RetrievalPurposeParam> for RetrievalPurpose {
    fn from(value: RetrievalPurposeParam) -> Self {
        match value {
            RetrievalPurposeParam::Create => RetrievalPurpose::Create,
            RetrievalPurposeParam::Fix => RetrievalPurpose::Fix,
        }
    }
}

async fn retrieve_context(
    State(state): State<AppState>,
    Query(q): Query<RetrieveContextQuery>,
) -> ApiResult<serde_json::Value> {
    let context = state.agent_interface.retrieve_context(&q.query, q.purpose.into()).await?;
    Ok(Json(serde_json::json!({"context": context})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_interface::DefaultAgentInterface;
    use crate::engine::api_client::ApiClient;
    use crate::engine::checkpoint::InMemoryCheckpointSink;
    use crate::engine::dispatcher::DispatchContext;
    use crate::engine::notifications::LogNotificationTransport;
    use crate::engine::sandbox::ScriptSandbox;
    use crate::engine::storage::InMemoryStorage;
    use crate::knowledge::classifier::DomainClassifier;
    use crate::knowledge::embeddings::HashEmbedder;
    use crate::llm::UnconfiguredLlmClient;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let storage: Arc<dyn WorkflowStorage> = Arc::new(InMemoryStorage::default());
        let knowledge = Arc::new(KnowledgeIndex::new(
            storage.clone(),
            Arc::new(HashEmbedder),
            Arc::new(DomainClassifier::with_default_domains()),
        ));
        let dispatch_ctx = Arc::new(DispatchContext {
            api_client: Arc::new(ApiClient::new()),
            sandbox: Arc::new(ScriptSandbox::new("python3", Duration::from_secs(5))),
            notifications: Arc::new(LogNotificationTransport),
            llm: Arc::new(UnconfiguredLlmClient),
        });
        let runner = Arc::new(Runner::new(storage.clone(), Arc::new(InMemoryCheckpointSink::new()), dispatch_ctx));
        let agent_interface = Arc::new(DefaultAgentInterface::new(storage.clone(), knowledge.clone()));
        AppState {
            runner,
            storage,
            knowledge,
            agent_interface,
        }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let server = RestServer::new(RestServerConfig::default(), test_state());
        let response = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_workflow_returns_404() {
        let server = RestServer::new(RestServerConfig::default(), test_state());
        let response = server
            .router()
            .oneshot(Request::builder().uri("/workflows/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_workflows_starts_empty() {
        let server = RestServer::new(RestServerConfig::default(), test_state());
        let response = server
            .router()
            .oneshot(Request::builder().uri("/workflows").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
