//! Execution Runner (C7, §4.7): orchestrates a full run — loads the
//! workflow, creates the `Execution`/`StepExecution` rows, drives the state
//! graph, and persists the terminal result. Also owns retry-of-execution
//! and the approve/reject lifecycle for `waiting_approval` runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::engine::checkpoint::CheckpointSink;
use crate::engine::dispatcher::DispatchContext;
use crate::engine::graph::{CancellationToken, NodeResult, StateGraph, StepObserver};
use crate::engine::storage::WorkflowStorage;
use crate::models::{Execution, ExecutionState, ExecutionStatus, StepExecution, StepStatus, Workflow};
use crate::{EngineError, Result};

/// Persists the matching [`StepExecution`] row on every node completion
/// (§4.7 step 4): upserts the pending placeholder the runner created when
/// the execution started.
struct RunnerObserver {
    storage: Arc<dyn WorkflowStorage>,
    execution_id: Uuid,
}

#[async_trait]
impl StepObserver for RunnerObserver {
    async fn on_step_complete(&self, result: &NodeResult) {
        let existing = match self.storage.list_step_executions(&self.execution_id).await {
            Ok(rows) => rows.into_iter().find(|se| se.step_id == result.step_id),
            Err(e) => {
                warn!(error = %e, "failed to load step execution rows for update");
                None
            }
        };
        let mut step_execution = existing.unwrap_or_else(|| StepExecution {
            id: Uuid::new_v4(),
            execution_id: self.execution_id,
            step_id: result.step_id,
            status: StepStatus::Pending,
            attempt: 0,
            input: serde_json::Value::Null,
            output: None,
            error: None,
            logs: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        });
        step_execution.status = result.status;
        step_execution.attempt += 1;
        step_execution.output = Some(result.output.clone());
        step_execution.error = result.error.clone();
        step_execution.logs = result.logs.clone();
        step_execution.completed_at = Some(Utc::now());
        if let Err(e) = self.storage.put_step_execution(step_execution).await {
            warn!(error = %e, "failed to persist step execution");
        }
    }
}

/// The orchestrator of a full workflow run (§4.7).
pub struct Runner {
    storage: Arc<dyn WorkflowStorage>,
    checkpoint_sink: Arc<dyn CheckpointSink>,
    dispatch_ctx: Arc<DispatchContext>,
    /// Live cancellation tokens for in-flight executions, removed once a
    /// run reaches a terminal or waiting state.
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl Runner {
    pub fn new(
        storage: Arc<dyn WorkflowStorage>,
        checkpoint_sink: Arc<dyn CheckpointSink>,
        dispatch_ctx: Arc<DispatchContext>,
    ) -> Self {
        Self {
            storage,
            checkpoint_sink,
            dispatch_ctx,
            cancellations: DashMap::new(),
        }
    }

    /// §4.7 steps 1-6: load the workflow, create the execution and its
    /// per-step rows, run the graph from step 0, persist the result.
    #[instrument(skip(self, input_data))]
    pub async fn start_execution(
        &self,
        workflow_id: &str,
        input_data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Execution> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow `{workflow_id}`")))?;
        self.run_from_scratch(workflow, input_data).await
    }

    async fn run_from_scratch(
        &self,
        workflow: Workflow,
        input_data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Execution> {
        let mut variables = workflow.initial_variables.clone();
        for (key, value) in input_data.clone() {
            variables.insert(key, value);
        }

        let mut execution = Execution::new(workflow.id.clone(), workflow.version, input_data);
        execution.status = ExecutionStatus::Running;
        let execution = self.storage.put_execution(execution).await?;

        for step in workflow.ordered_steps() {
            let pending = StepExecution {
                id: Uuid::new_v4(),
                execution_id: execution.id,
                step_id: step.id,
                status: StepStatus::Pending,
                attempt: 0,
                input: serde_json::Value::Null,
                output: None,
                error: None,
                logs: Vec::new(),
                started_at: Utc::now(),
                completed_at: None,
            };
            self.storage.put_step_execution(pending).await?;
        }

        let state = ExecutionState::new(execution.id, workflow.id.clone(), workflow.version, variables);
        self.drive(workflow, execution, state).await
    }

    /// Runs the graph from whatever `state.current_step_index` it's given
    /// and folds the terminal `ExecutionState` back into the `Execution`
    /// row (§4.7 step 5-6). Shared by fresh starts and approval resumes.
    async fn drive(&self, workflow: Workflow, mut execution: Execution, state: ExecutionState) -> Result<Execution> {
        let cancellation = CancellationToken::new();
        self.cancellations.insert(execution.id, cancellation.clone());

        let graph = StateGraph::new(&workflow);
        let observer = RunnerObserver {
            storage: self.storage.clone(),
            execution_id: execution.id,
        };
        let final_state = graph
            .run(state, &self.dispatch_ctx, self.checkpoint_sink.as_ref(), &observer, &cancellation)
            .await?;

        let was_cancelled = cancellation.is_cancelled();
        self.cancellations.remove(&execution.id);

        let any_failed = final_state.step_statuses.values().any(|s| *s == StepStatus::Failed);
        execution.status = if final_state.waiting_approval {
            ExecutionStatus::WaitingApproval
        } else if any_failed {
            ExecutionStatus::Failed
        } else if was_cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Success
        };
        execution.current_step_id = final_state.approval_step_id;
        execution.final_variables = Some(final_state.variables.clone());
        execution.error = final_state.errors.last().map(|e| e.message.clone());
        execution.completed_at = Some(Utc::now());

        self.storage.put_execution(execution.clone()).await?;
        Ok(execution)
    }

    /// Sets the cooperative cancellation flag for a running execution
    /// (§4.6.7). A no-op if the execution already reached a terminal state.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<()> {
        if let Some(token) = self.cancellations.get(&execution_id) {
            token.cancel();
            return Ok(());
        }
        self.storage
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;
        Ok(())
    }

    /// Resumes a `waiting_approval` execution from the approval step with
    /// `waiting_approval=false` and that step marked `success` (§4.7).
    pub async fn approve(&self, execution_id: Uuid) -> Result<Execution> {
        let (workflow, execution, mut state) = self.resume_state(execution_id).await?;
        let approval_step_id = state
            .approval_step_id
            .ok_or_else(|| EngineError::Validation("execution is not waiting for approval".into()))?;
        state.waiting_approval = false;
        state.approval_step_id = None;
        state.set_step_status(approval_step_id, StepStatus::Success);
        self.drive(workflow, execution, state).await
    }

    /// Terminates a `waiting_approval` execution as `cancelled` (§4.7).
    pub async fn reject(&self, execution_id: Uuid) -> Result<Execution> {
        let (_workflow, mut execution, state) = self.resume_state(execution_id).await?;
        execution.status = ExecutionStatus::Cancelled;
        execution.final_variables = Some(state.variables.clone());
        execution.completed_at = Some(Utc::now());
        self.storage.put_execution(execution.clone()).await?;
        Ok(execution)
    }

    /// Reconstructs the `(workflow, execution, state)` triple a
    /// `waiting_approval` execution needs to resume, from its latest
    /// checkpoint (§4.6.6).
    async fn resume_state(&self, execution_id: Uuid) -> Result<(Workflow, Execution, ExecutionState)> {
        let execution = self
            .storage
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;
        if execution.status != ExecutionStatus::WaitingApproval {
            return Err(EngineError::Validation(
                "execution is not waiting for approval".into(),
            ));
        }
        let workflow = self
            .storage
            .get_workflow_version(&execution.workflow_id, execution.workflow_version)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "workflow `{}` v{}",
                    execution.workflow_id, execution.workflow_version
                ))
            })?;
        let checkpoint = self
            .checkpoint_sink
            .latest(execution_id)
            .await?
            .ok_or_else(|| EngineError::Internal("no checkpoint recorded for a waiting execution".into()))?;

        let mut state = ExecutionState::new(
            execution.id,
            workflow.id.clone(),
            workflow.version,
            checkpoint.variables.clone(),
        );
        state.step_statuses = checkpoint.step_statuses.clone();
        state.waiting_approval = true;
        state.approval_step_id = workflow
            .ordered_steps()
            .iter()
            .find(|s| checkpoint.step_statuses.get(&s.id) == Some(&StepStatus::WaitingApproval))
            .map(|s| s.id);
        state.current_step_index = workflow
            .ordered_steps()
            .iter()
            .take_while(|s| {
                checkpoint
                    .step_statuses
                    .get(&s.id)
                    .map_or(false, |status| *status != StepStatus::Pending)
            })
            .count();

        Ok((workflow, execution, state))
    }

    /// Cross-execution retry (§4.7): a fresh execution row seeded with the
    /// prior run's `final_variables`, re-run from step 0 against the same
    /// workflow version. Per-step retry is the graph's concern (§4.6.3-5).
    pub async fn retry_execution(&self, execution_id: Uuid) -> Result<Execution> {
        let prior = self
            .storage
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {execution_id}")))?;
        let workflow = self
            .storage
            .get_workflow_version(&prior.workflow_id, prior.workflow_version)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "workflow `{}` v{}",
                    prior.workflow_id, prior.workflow_version
                ))
            })?;
        let input_data = prior.final_variables.unwrap_or_default();
        self.run_from_scratch(workflow, input_data).await
    }

    /// Step-execution trace for an execution (§6: execution detail view).
    pub async fn step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>> {
        self.storage.list_step_executions(&execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::api_client::ApiClient;
    use crate::engine::checkpoint::InMemoryCheckpointSink;
    use crate::engine::notifications::LogNotificationTransport;
    use crate::engine::sandbox::ScriptSandbox;
    use crate::engine::storage::InMemoryStorage;
    use crate::llm::UnconfiguredLlmClient;
    use crate::models::step::{ApprovalConfig, Step, StepType};
    use crate::models::workflow::WorkflowMetadata;
    use crate::models::WorkflowStatus;
    use std::time::Duration;

    fn runner() -> (Runner, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::default());
        let checkpoint_sink = Arc::new(InMemoryCheckpointSink::new());
        let dispatch_ctx = Arc::new(DispatchContext {
            api_client: Arc::new(ApiClient::new()),
            sandbox: Arc::new(ScriptSandbox::new("python3", Duration::from_secs(5))),
            notifications: Arc::new(LogNotificationTransport),
            llm: Arc::new(UnconfiguredLlmClient),
        });
        let runner = Runner::new(storage.clone(), checkpoint_sink, dispatch_ctx);
        (runner, storage)
    }

    fn transform_step(order: i64, target: &str, expression: &str) -> Step {
        Step {
            id: Uuid::new_v4(),
            workflow_id: "wf".into(),
            order,
            name: format!("step-{order}"),
            step_type: StepType::DataTransform,
            config: serde_json::json!({"rules": [{"target": target, "expression": expression}]}),
            code: None,
            input_mapping: Default::default(),
            output_mapping: Default::default(),
            retry_config: None,
            condition: None,
        }
    }

    fn approval_step(order: i64) -> Step {
        Step {
            id: Uuid::new_v4(),
            workflow_id: "wf".into(),
            order,
            name: "approve".into(),
            step_type: StepType::Approval,
            config: serde_json::to_value(ApprovalConfig {
                message: Some("approve?".into()),
                approvers: None,
            })
            .unwrap(),
            code: None,
            input_mapping: Default::default(),
            output_mapping: Default::default(),
            retry_config: None,
            condition: None,
        }
    }

    fn workflow(steps: Vec<Step>) -> Workflow {
        let now = chrono::Utc::now();
        Workflow {
            id: "wf".into(),
            version: 1,
            name: "test".into(),
            status: WorkflowStatus::Active,
            steps,
            initial_variables: serde_json::Map::new(),
            metadata: WorkflowMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn start_execution_runs_to_success_and_persists_step_rows() {
        let (runner, storage) = runner();
        storage
            .put_workflow(workflow(vec![transform_step(1, "a", "1")]))
            .await
            .unwrap();
        let execution = runner.start_execution("wf", serde_json::Map::new()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        let steps = runner.step_executions(execution.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let (runner, _storage) = runner();
        let err = runner.start_execution("nope", serde_json::Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn approval_step_suspends_and_approve_resumes_to_success() {
        let (runner, storage) = runner();
        storage
            .put_workflow(workflow(vec![approval_step(1), transform_step(2, "a", "1")]))
            .await
            .unwrap();
        let execution = runner.start_execution("wf", serde_json::Map::new()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::WaitingApproval);

        let resumed = runner.approve(execution.id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn reject_terminates_as_cancelled() {
        let (runner, storage) = runner();
        storage.put_workflow(workflow(vec![approval_step(1)])).await.unwrap();
        let execution = runner.start_execution("wf", serde_json::Map::new()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::WaitingApproval);

        let rejected = runner.reject(execution.id).await.unwrap();
        assert_eq!(rejected.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn retry_execution_reruns_from_prior_final_variables() {
        let (runner, storage) = runner();
        storage
            .put_workflow(workflow(vec![transform_step(1, "a", "1")]))
            .await
            .unwrap();
        let first = runner.start_execution("wf", serde_json::Map::new()).await.unwrap();
        let retried = runner.retry_execution(first.id).await.unwrap();
        assert_ne!(first.id, retried.id);
        assert_eq!(retried.status, ExecutionStatus::Success);
    }
}
