//! Workflow execution engine: a state-graph interpreter with conditional
//! routing, at-most-once step execution with checkpointing, isolated
//! subprocess execution, a generic REST client, and a domain-partitioned
//! knowledge retrieval service that feeds context into workflow authoring.
//!
//! ## Layout
//!
//! - [`models`] — plain data: `Workflow`, `Step`, `Execution`,
//!   `ExecutionState`, knowledge base types.
//! - [`engine`] — the engine proper: the variable formatter, code validator,
//!   API client, script sandbox, step dispatcher, state graph, runner,
//!   storage, checkpoint sink, and notification transport.
//! - [`knowledge`] — the domain-partitioned vector index and classifier
//!   that back workflow authoring.
//! - [`llm`] — the minimal LLM client used by `llm_call` steps.
//! - [`server`] — the REST surface over the runner.
//! - [`agent_interface`] — the contract authoring agents consume from the
//!   code validator, knowledge index, and domain classifier.

pub mod agent_interface;
pub mod config;
pub mod engine;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod server;

pub use config::Config;
pub use models::{Execution, ExecutionState, Step, StepExecution, Workflow};

use thiserror::Error;

/// Crate-wide error taxonomy (§7): each variant maps to the failure classes
/// the execution runner needs to distinguish when deciding whether a step
/// is retryable and what terminal error to surface.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Script or workflow definition rejected before execution (C1).
    #[error("validation error: {0}")]
    Validation(String),

    /// A `python_script` step failed inside the sandbox.
    #[error("script failure: {0}")]
    ScriptFailure(String),

    /// Transport-level failure reaching a remote endpoint (connection
    /// refused, DNS, TLS) — distinct from a well-formed non-2xx response.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// A non-retryable HTTP response (4xx outside the retry set).
    #[error("http error {status}: {body}")]
    HttpError { status: u16, body: String },

    /// A `condition` step's expression failed to parse or evaluate.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// A step or subprocess exceeded its allotted time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The execution was cancelled by an external caller.
    #[error("cancelled")]
    Cancelled,

    /// An invariant was violated. Should never happen; if it does, the
    /// execution terminates as failed and the occurrence is logged.
    #[error("internal error: {0}")]
    Internal(String),

    /// The requested workflow, execution, or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage-backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            EngineError::HttpError {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            EngineError::NetworkFailure(err.to_string())
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, EngineError>;
