//! The live, in-flight state of one execution as the graph engine walks it
//! (§4.6.2).
//!
//! [`ExecutionState`] is distinct from [`crate::models::execution::Execution`]:
//! the latter is the storage-facing record, this is the mutable working set
//! the engine threads through step after step during a single run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::execution::StepStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub step_id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// `router(state)` (§4.6.4): `should_stop` wins over everything else,
/// `waiting_approval` wins over a plain continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterDecision {
    Continue,
    Stop,
    WaitApproval,
}

/// An immutable snapshot of [`ExecutionState`], written after every node
/// body (§4.6.6). Enables resume after `waiting_approval` and
/// reconstruction of partial progress on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub execution_id: Uuid,
    pub last_completed_step_id: Option<Uuid>,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub step_statuses: HashMap<Uuid, StepStatus>,
    pub recorded_at: DateTime<Utc>,
}

/// The mutable state threaded through one execution's step loop (§4.6.2).
///
/// Invariants (§8): `step_statuses[id]` only moves forward along
/// `pending -> running -> {success, failed, skipped, waiting_approval}` and
/// never downgrades; `step_outputs` has an entry for `id` iff
/// `step_statuses[id] ∈ {success, skipped}`; once `should_stop` is true no
/// further step transitions to `running`.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub current_step_index: usize,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub step_outputs: HashMap<Uuid, serde_json::Value>,
    pub step_statuses: HashMap<Uuid, StepStatus>,
    pub errors: Vec<ErrorEntry>,
    pub should_stop: bool,
    pub waiting_approval: bool,
    pub approval_step_id: Option<Uuid>,
    pub logs: Vec<String>,
}

impl ExecutionState {
    pub fn new(
        execution_id: Uuid,
        workflow_id: String,
        workflow_version: u32,
        variables: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            workflow_version,
            current_step_index: 0,
            variables,
            step_outputs: HashMap::new(),
            step_statuses: HashMap::new(),
            errors: Vec::new(),
            should_stop: false,
            waiting_approval: false,
            approval_step_id: None,
            logs: Vec::new(),
        }
    }

    /// `router(state)` (§4.6.4).
    pub fn route(&self) -> RouterDecision {
        if self.should_stop {
            RouterDecision::Stop
        } else if self.waiting_approval {
            RouterDecision::WaitApproval
        } else {
            RouterDecision::Continue
        }
    }

    /// Merge a step's output mapping into `variables` (§4.5): each
    /// `workflow_var -> "output.path"` entry pulls the referenced value out
    /// of the step result and stores it under `workflow_var`. Missing paths
    /// are logged as a warning and leave the variable unchanged (§8).
    pub fn apply_output_mapping(
        &mut self,
        output_mapping: &HashMap<String, String>,
        result: &serde_json::Value,
    ) {
        for (workflow_var, path) in output_mapping {
            match resolve_path(result, path) {
                Some(value) => {
                    self.variables.insert(workflow_var.clone(), value.clone());
                }
                None => {
                    self.logs.push(format!(
                        "output_mapping: path `{path}` not found while assigning `{workflow_var}`"
                    ));
                }
            }
        }
    }

    pub fn set_step_status(&mut self, step_id: Uuid, status: StepStatus) {
        self.step_statuses.insert(step_id, status);
    }

    pub fn set_step_output(&mut self, step_id: Uuid, output: serde_json::Value) {
        self.step_outputs.insert(step_id, output);
    }

    pub fn record_error(&mut self, step_id: Uuid, message: String) {
        self.errors.push(ErrorEntry {
            step_id,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn checkpoint(&self, last_completed_step_id: Option<Uuid>) -> Checkpoint {
        Checkpoint {
            execution_id: self.execution_id,
            last_completed_step_id,
            variables: self.variables.clone(),
            step_statuses: self.step_statuses.clone(),
            recorded_at: Utc::now(),
        }
    }
}

/// Resolves a dotted path like `"output.items.0.id"` against a JSON value.
/// Numeric segments index arrays; other segments index objects. A leading
/// `output.` (or bare `output`) prefix is stripped since mappings are
/// written relative to the step result's `output` field.
fn resolve_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let path = path.strip_prefix("output.").unwrap_or(path);
    let path = path.strip_prefix("output").unwrap_or(path);
    let mut current = root.get("output").unwrap_or(root);
    if path.is_empty() {
        return Some(current);
    }
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_stop_wins_over_waiting_approval() {
        let mut state = ExecutionState::new(Uuid::new_v4(), "wf".into(), 1, serde_json::Map::new());
        state.should_stop = true;
        state.waiting_approval = true;
        assert_eq!(state.route(), RouterDecision::Stop);
    }

    #[test]
    fn router_continue_by_default() {
        let state = ExecutionState::new(Uuid::new_v4(), "wf".into(), 1, serde_json::Map::new());
        assert_eq!(state.route(), RouterDecision::Continue);
    }

    #[test]
    fn resolve_path_walks_under_output_root() {
        let v = serde_json::json!({"output": {"user": {"id": 7}}});
        assert_eq!(
            resolve_path(&v, "output.user.id"),
            Some(&serde_json::json!(7))
        );
        assert_eq!(resolve_path(&v, "user.id"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn resolve_path_indexes_arrays() {
        let v = serde_json::json!({"output": {"items": ["a", "b", "c"]}});
        assert_eq!(resolve_path(&v, "items.1"), Some(&serde_json::json!("b")));
    }

    #[test]
    fn apply_output_mapping_logs_warning_on_missing_path() {
        let mut state = ExecutionState::new(Uuid::new_v4(), "wf".into(), 1, serde_json::Map::new());
        let mut mapping = HashMap::new();
        mapping.insert("x".to_string(), "output.missing".to_string());
        state.apply_output_mapping(&mapping, &serde_json::json!({"output": {}}));
        assert!(state.variables.get("x").is_none());
        assert_eq!(state.logs.len(), 1);
    }

    #[test]
    fn apply_output_mapping_writes_into_variables() {
        let mut state = ExecutionState::new(Uuid::new_v4(), "wf".into(), 1, serde_json::Map::new());
        let mut mapping = HashMap::new();
        mapping.insert("user_id".to_string(), "output.id".to_string());
        let result = serde_json::json!({"output": {"id": 42}});
        state.apply_output_mapping(&mapping, &result);
        assert_eq!(state.variables.get("user_id"), Some(&serde_json::json!(42)));
    }
}
