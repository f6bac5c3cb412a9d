//! Workflow definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::step::Step;
use crate::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Archived,
}

/// Free-form authoring metadata, kept separate from the fields the engine
/// actually reads so new annotations don't require a schema change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub folder: Option<String>,
}

/// A versioned workflow definition (§3). `id` identifies the logical
/// workflow across versions; `(id, version)` identifies one immutable
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub version: u32,
    pub name: String,
    pub status: WorkflowStatus,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub initial_variables: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Steps sorted into dispatch order. Does not mutate `self.steps`.
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort();
        steps
    }

    /// Structural checks that don't require executing anything: unique step
    /// ids, at least one step, output mappings only reference names used
    /// later as input mappings are resolved at runtime (not statically
    /// checkable without types), condition steps carry a non-empty
    /// expression.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(EngineError::Validation(
                "workflow must contain at least one step".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id) {
                return Err(EngineError::Validation(format!(
                    "duplicate step id {} in workflow {}",
                    step.id, self.id
                )));
            }
            if step.step_type == crate::models::StepType::Condition {
                let cond = step
                    .condition
                    .as_deref()
                    .or_else(|| step.config.get("condition").and_then(|v| v.as_str()));
                if cond.map(str::trim).unwrap_or("").is_empty() {
                    return Err(EngineError::Validation(format!(
                        "condition step {} has no condition expression",
                        step.id
                    )));
                }
            }
            if step.step_type == crate::models::StepType::PythonScript && step.code.is_none() {
                return Err(EngineError::Validation(format!(
                    "python_script step {} has no code",
                    step.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::step::StepType;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn step(order: i64, step_type: StepType) -> Step {
        Step {
            id: Uuid::new_v4(),
            workflow_id: "wf".into(),
            order,
            name: "s".into(),
            step_type,
            config: serde_json::json!({}),
            code: if step_type == StepType::PythonScript {
                Some("result = 1".into())
            } else {
                None
            },
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            retry_config: None,
            condition: if step_type == StepType::Condition {
                Some("true".into())
            } else {
                None
            },
        }
    }

    fn workflow(steps: Vec<Step>) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: "wf-1".into(),
            version: 1,
            name: "test".into(),
            status: WorkflowStatus::Draft,
            steps,
            initial_variables: serde_json::Map::new(),
            metadata: WorkflowMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn rejects_empty_step_list() {
        assert!(workflow(vec![]).validate().is_err());
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let s = step(1, StepType::DataTransform);
        let dup = s.clone();
        assert!(workflow(vec![s, dup]).validate().is_err());
    }

    #[test]
    fn rejects_condition_step_without_expression() {
        let mut s = step(1, StepType::Condition);
        s.condition = None;
        assert!(workflow(vec![s]).validate().is_err());
    }

    #[test]
    fn accepts_well_formed_workflow() {
        let wf = workflow(vec![step(1, StepType::DataTransform), step(2, StepType::Condition)]);
        assert!(wf.validate().is_ok());
        assert_eq!(wf.ordered_steps().len(), 2);
    }
}
