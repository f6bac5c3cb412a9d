//! Execution and step-execution records — the durable trace of a workflow
//! run, separate from the live [`crate::models::state::ExecutionState`] the
//! engine mutates step by step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution status (§3): `pending, running, success, failed,
/// waiting_approval, cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    WaitingApproval,
    Cancelled,
}

/// Step status (§3 `ExecutionState` invariants): monotone
/// `pending -> running -> {success, failed, skipped, waiting_approval}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    WaitingApproval,
}

/// A run of a workflow version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: ExecutionStatus,
    pub current_step_id: Option<Uuid>,
    pub input_variables: serde_json::Map<String, serde_json::Value>,
    pub final_variables: Option<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(
        workflow_id: String,
        workflow_version: u32,
        input_variables: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            workflow_version,
            status: ExecutionStatus::Pending,
            current_step_id: None,
            input_variables,
            final_variables: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Per-step record attached to an [`Execution`] (§3, §4.6.6's `logs` field).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub status: StepStatus,
    pub attempt: u32,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn start(execution_id: Uuid, step_id: Uuid, attempt: u32, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            status: StepStatus::Running,
            attempt,
            input,
            output: None,
            error: None,
            logs: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_execution_starts_pending_with_no_current_step() {
        let exec = Execution::new("wf-1".into(), 1, serde_json::Map::new());
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(exec.current_step_id.is_none());
        assert!(exec.completed_at.is_none());
        assert!(exec.final_variables.is_none());
    }

    #[test]
    fn step_execution_starts_running() {
        let se = StepExecution::start(Uuid::new_v4(), Uuid::new_v4(), 1, serde_json::json!({}));
        assert_eq!(se.status, StepStatus::Running);
        assert!(se.completed_at.is_none());
        assert!(se.logs.is_empty());
    }
}
