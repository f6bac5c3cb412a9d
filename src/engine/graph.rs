//! State Graph Engine (C6, §4.6): an in-memory state-machine interpreter
//! over an [`ExecutionState`]. One node per step plus an implicit `END`;
//! the router decides `continue` / `stop` / `wait_approval` after each node
//! body runs (§4.6.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::engine::checkpoint::CheckpointSink;
use crate::engine::condition::evaluate_condition;
use crate::engine::dispatcher::{dispatch_step, project_inputs, DispatchContext, StepOutcome};
use crate::models::execution::StepStatus;
use crate::models::state::{ExecutionState, RouterDecision};
use crate::models::step::Step;
use crate::models::workflow::Workflow;
use crate::models::StepType;

/// Cooperative cancellation (§4.6.7): checked between steps, never
/// mid-step. Setting it is equivalent to `should_stop=true` on the next
/// boundary.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What fires after a node body completes (§4.6.3 step 7) — the runner's
/// persistence hook.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub step_id: Uuid,
    pub status: StepStatus,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub duration: Duration,
}

#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_step_complete(&self, result: &NodeResult);
}

/// An observer that does nothing, for callers that don't need per-step
/// persistence (standalone graph tests, `taskgraphctl run`).
#[derive(Default)]
pub struct NullObserver;

#[async_trait]
impl StepObserver for NullObserver {
    async fn on_step_complete(&self, _result: &NodeResult) {}
}

/// The interpreter over one workflow's ordered steps (§4.6.1). The `END`
/// node is implicit — it is simply "no more steps, or the router said so".
pub struct StateGraph<'a> {
    steps: Vec<&'a Step>,
}

impl<'a> StateGraph<'a> {
    pub fn new(workflow: &'a Workflow) -> Self {
        Self {
            steps: workflow.ordered_steps(),
        }
    }

    /// Walks the graph from `state.current_step_index` to completion,
    /// `stop`, or `wait_approval` (§4.6.3-4.6.4). Steps run strictly
    /// sequentially (§4.6.5): the next node is never entered before the
    /// previous one reached a terminal status.
    #[instrument(skip_all, fields(execution_id = %state.execution_id))]
    pub async fn run(
        &self,
        mut state: ExecutionState,
        dispatch_ctx: &DispatchContext,
        checkpoint_sink: &dyn CheckpointSink,
        observer: &dyn StepObserver,
        cancellation: &CancellationToken,
    ) -> crate::Result<ExecutionState> {
        let mut last_completed: Option<Uuid> = None;

        while state.current_step_index < self.steps.len() {
            if cancellation.is_cancelled() {
                state.should_stop = true;
            }
            if state.route() != RouterDecision::Continue {
                break;
            }

            let step = self.steps[state.current_step_index];
            let started = Instant::now();
            state.set_step_status(step.id, StepStatus::Running);
            state.current_step_index += 1;

            if let Some(gate) = step.condition.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
                match evaluate_condition(gate, &state.variables) {
                    Ok(true) => {}
                    Ok(false) => {
                        state.set_step_status(step.id, StepStatus::Skipped);
                        state.set_step_output(step.id, serde_json::Value::Null);
                        self.record(
                            &mut state,
                            checkpoint_sink,
                            observer,
                            &mut last_completed,
                            NodeResult {
                                step_id: step.id,
                                status: StepStatus::Skipped,
                                output: serde_json::Value::Null,
                                error: None,
                                logs: Vec::new(),
                                duration: started.elapsed(),
                            },
                        )
                        .await;
                        continue;
                    }
                    Err(e) => {
                        state.record_error(step.id, e.to_string());
                        state.set_step_status(step.id, StepStatus::Failed);
                        state.should_stop = true;
                        self.record(
                            &mut state,
                            checkpoint_sink,
                            observer,
                            &mut last_completed,
                            NodeResult {
                                step_id: step.id,
                                status: StepStatus::Failed,
                                output: serde_json::Value::Null,
                                error: Some(e.to_string()),
                                logs: Vec::new(),
                                duration: started.elapsed(),
                            },
                        )
                        .await;
                        break;
                    }
                }
            }

            let view = project_inputs(&state.variables, &step.input_mapping);
            let outcome = dispatch_with_retry(step, &view, dispatch_ctx).await;

            if step.step_type == StepType::Approval && outcome.success && is_waiting_approval(&outcome) {
                state.waiting_approval = true;
                state.approval_step_id = Some(step.id);
                state.set_step_status(step.id, StepStatus::WaitingApproval);
                state.set_step_output(step.id, outcome.output.clone());
                self.record(
                    &mut state,
                    checkpoint_sink,
                    observer,
                    &mut last_completed,
                    NodeResult {
                        step_id: step.id,
                        status: StepStatus::WaitingApproval,
                        output: outcome.output,
                        error: None,
                        logs: outcome.logs,
                        duration: started.elapsed(),
                    },
                )
                .await;
                break;
            }

            if outcome.success {
                state.set_step_output(step.id, outcome.output.clone());
                state.apply_output_mapping(&step.output_mapping, &outcome.output);
                state.set_step_status(step.id, StepStatus::Success);
                self.record(
                    &mut state,
                    checkpoint_sink,
                    observer,
                    &mut last_completed,
                    NodeResult {
                        step_id: step.id,
                        status: StepStatus::Success,
                        output: outcome.output,
                        error: None,
                        logs: outcome.logs,
                        duration: started.elapsed(),
                    },
                )
                .await;
            } else {
                let message = outcome.error.clone().unwrap_or_else(|| "step failed".to_string());
                state.record_error(step.id, message.clone());
                state.set_step_status(step.id, StepStatus::Failed);
                state.should_stop = true;
                self.record(
                    &mut state,
                    checkpoint_sink,
                    observer,
                    &mut last_completed,
                    NodeResult {
                        step_id: step.id,
                        status: StepStatus::Failed,
                        output: outcome.output,
                        error: Some(message),
                        logs: outcome.logs,
                        duration: started.elapsed(),
                    },
                )
                .await;
                break;
            }
        }

        Ok(state)
    }

    async fn record(
        &self,
        state: &mut ExecutionState,
        checkpoint_sink: &dyn CheckpointSink,
        observer: &dyn StepObserver,
        last_completed: &mut Option<Uuid>,
        result: NodeResult,
    ) {
        if matches!(
            result.status,
            StepStatus::Success | StepStatus::Skipped | StepStatus::WaitingApproval
        ) {
            *last_completed = Some(result.step_id);
        }
        let checkpoint = state.checkpoint(*last_completed);
        if let Err(e) = checkpoint_sink.write(checkpoint).await {
            warn!(step_id = %result.step_id, error = %e, "failed to write checkpoint");
        }
        info!(step_id = %result.step_id, status = ?result.status, "step complete");
        observer.on_step_complete(&result).await;
    }
}

fn is_waiting_approval(outcome: &StepOutcome) -> bool {
    outcome
        .output
        .get("waiting_approval")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Wraps dispatch in the step's bounded retry loop (§4.6.3 step 5): retries
/// are counted per step and never rewind graph state.
async fn dispatch_with_retry(
    step: &Step,
    view: &serde_json::Map<String, serde_json::Value>,
    ctx: &DispatchContext,
) -> StepOutcome {
    let retry = step.retry_config.clone().unwrap_or_default();
    let mut attempt = 0;
    loop {
        let outcome = dispatch_step(step, view, ctx).await;
        if outcome.success || attempt >= retry.max_retries {
            return outcome;
        }
        attempt += 1;
        warn!(step_id = %step.id, attempt, "step failed, retrying");
        if retry.retry_delay_seconds > 0 {
            tokio::time::sleep(Duration::from_secs(retry.retry_delay_seconds)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::api_client::ApiClient;
    use crate::engine::checkpoint::InMemoryCheckpointSink;
    use crate::engine::notifications::LogNotificationTransport;
    use crate::engine::sandbox::ScriptSandbox;
    use crate::llm::UnconfiguredLlmClient;
    use crate::models::step::StepType as ST;
    use crate::models::workflow::WorkflowMetadata;
    use crate::models::WorkflowStatus;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    fn transform_step(order: i64, target: &str, expression: &str, condition: Option<&str>) -> Step {
        Step {
            id: Uuid::new_v4(),
            workflow_id: "wf".into(),
            order,
            name: format!("step-{order}"),
            step_type: ST::DataTransform,
            config: serde_json::json!({
                "rules": [{"target": target, "expression": expression}]
            }),
            code: None,
            input_mapping: HashMap::new(),
            output_mapping: [(target.to_string(), format!("output.{target}"))]
                .into_iter()
                .collect(),
            retry_config: None,
            condition: condition.map(str::to_string),
        }
    }

    fn workflow(steps: Vec<Step>) -> Workflow {
        let now = Utc::now();
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

    fn dispatch_ctx() -> DispatchContext {
        DispatchContext {
            api_client: Arc::new(ApiClient::new()),
            sandbox: Arc::new(ScriptSandbox::new("python3", StdDuration::from_secs(5))),
            notifications: Arc::new(LogNotificationTransport),
            llm: Arc::new(UnconfiguredLlmClient),
        }
    }

    #[tokio::test]
    async fn runs_every_step_to_success_when_all_pass() {
        let wf = workflow(vec![
            transform_step(1, "a", "1", None),
            transform_step(2, "b", "2", None),
        ]);
        let graph = StateGraph::new(&wf);
        let state = ExecutionState::new(Uuid::new_v4(), wf.id.clone(), wf.version, serde_json::Map::new());
        let ctx = dispatch_ctx();
        let sink = InMemoryCheckpointSink::new();
        let observer = NullObserver;
        let cancellation = CancellationToken::new();
        let final_state = graph
            .run(state, &ctx, &sink, &observer, &cancellation)
            .await
            .unwrap();
        assert_eq!(final_state.current_step_index, 2);
        assert!(final_state
            .step_statuses
            .values()
            .all(|s| *s == StepStatus::Success));
        assert!(!sink.history(final_state.execution_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn false_condition_skips_step_without_stopping() {
        let skipped_step = transform_step(1, "a", "1", Some("1 == 2"));
        let skipped_id = skipped_step.id;
        let wf = workflow(vec![skipped_step, transform_step(2, "b", "2", None)]);
        let graph = StateGraph::new(&wf);
        let state = ExecutionState::new(Uuid::new_v4(), wf.id.clone(), wf.version, serde_json::Map::new());
        let ctx = dispatch_ctx();
        let sink = InMemoryCheckpointSink::new();
        let observer = NullObserver;
        let cancellation = CancellationToken::new();
        let final_state = graph
            .run(state, &ctx, &sink, &observer, &cancellation)
            .await
            .unwrap();
        let statuses: Vec<_> = final_state.step_statuses.values().copied().collect();
        assert!(statuses.contains(&StepStatus::Skipped));
        assert!(statuses.contains(&StepStatus::Success));
        assert!(final_state.step_outputs.contains_key(&skipped_id));
    }

    #[tokio::test]
    async fn malformed_data_transform_fails_and_stops() {
        // `rules` requires an array of {target, expression}; an empty object
        // fails to deserialize into `DataTransformConfig`.
        let mut bad = transform_step(1, "a", "1", None);
        bad.config = serde_json::json!({});
        let wf = workflow(vec![bad, transform_step(2, "b", "2", None)]);
        let graph = StateGraph::new(&wf);
        let state = ExecutionState::new(Uuid::new_v4(), wf.id.clone(), wf.version, serde_json::Map::new());
        let ctx = dispatch_ctx();
        let sink = InMemoryCheckpointSink::new();
        let observer = NullObserver;
        let cancellation = CancellationToken::new();
        let final_state = graph
            .run(state, &ctx, &sink, &observer, &cancellation)
            .await
            .unwrap();
        assert!(final_state.should_stop);
        assert_eq!(final_state.current_step_index, 1);
        assert!(!final_state.errors.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_step() {
        let wf = workflow(vec![
            transform_step(1, "a", "1", None),
            transform_step(2, "b", "2", None),
        ]);
        let graph = StateGraph::new(&wf);
        let state = ExecutionState::new(Uuid::new_v4(), wf.id.clone(), wf.version, serde_json::Map::new());
        let ctx = dispatch_ctx();
        let sink = InMemoryCheckpointSink::new();
        let observer = NullObserver;
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let final_state = graph
            .run(state, &ctx, &sink, &observer, &cancellation)
            .await
            .unwrap();
        assert!(final_state.step_statuses.is_empty());
        assert_eq!(final_state.current_step_index, 0);
    }
}
