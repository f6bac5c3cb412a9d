//! The execution engine: the layer between the domain models and the
//! outside world (subprocesses, HTTP endpoints, LLM providers, storage).
//!
//! ## Submodules
//!
//! - [`format`] — C2, template substitution over heterogeneous values.
//! - [`validator`] — C1, static checks on generated script code.
//! - [`condition`] — the restricted expression evaluator for `condition`
//!   steps and per-step gates.
//! - [`sandbox`] — C4, isolated subprocess execution.
//! - [`api_client`] — C3, generic REST invoker with auth/retry/cache.
//! - [`dispatcher`] — C5, executes one step per step-type.
//! - [`graph`] — C6, the state-machine interpreter.
//! - [`runner`] — C7, execution lifecycle.
//! - [`storage`] — persistence abstraction for workflows and executions.
//! - [`checkpoint`] — durable snapshotting of in-flight execution state.
//! - [`notifications`] — transport abstraction for `notification` steps.

pub mod api_client;
pub mod checkpoint;
pub mod condition;
pub mod dispatcher;
pub mod format;
pub mod graph;
pub mod notifications;
pub mod runner;
pub mod sandbox;
pub mod storage;
pub mod validator;

pub use api_client::ApiClient;
pub use checkpoint::{CheckpointSink, InMemoryCheckpointSink};
pub use condition::evaluate_condition;
pub use dispatcher::{dispatch_step, StepOutcome};
pub use format::format_template;
pub use graph::{CancellationToken, NodeResult, StateGraph, StepObserver};
pub use notifications::{LogNotificationTransport, NotificationTransport};
pub use runner::Runner;
pub use sandbox::{SandboxResult, ScriptSandbox};
pub use storage::{InMemoryStorage, WorkflowStorage};
pub use validator::{validate_script, ValidationWarning};
