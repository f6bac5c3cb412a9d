//! Agent Interface (C10, §4.10): the contract the authoring and
//! modification agents consume. Agents live outside this crate's scope
//! (§1) — this module is their only door into C1 (validator), C8
//! (knowledge index), and C9 (domain classifier), plus the storage layer
//! they persist accepted workflows through.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::storage::WorkflowStorage;
use crate::engine::validator::{validate_script, ValidationWarning};
use crate::knowledge::index::KnowledgeIndex;
use crate::models::{StepType, Workflow};
use crate::{EngineError, Result};

/// Why the agent is asking for context (§4.10): a fresh workflow draft
/// reads differently from a fix pass over a failing one, though both route
/// through the same retrieval call today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPurpose {
    Create,
    Fix,
}

/// `(ok, issues[])` for one script body (§4.1, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeValidation {
    pub ok: bool,
    pub issues: Vec<String>,
}

/// What `persist_workflow` returns on rejection: which step's code failed
/// and why, so the agent can target its retry at that step alone rather
/// than regenerating the whole definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistRejection {
    pub step_id: Uuid,
    pub step_name: String,
    pub issue: String,
}

/// The door authoring agents consume from C1/C8/C9 (§4.10). Agents are
/// otherwise black boxes from the core's perspective — everything they see
/// of this crate is this trait.
#[async_trait::async_trait]
pub trait AgentInterface: Send + Sync {
    /// Detects domain(s) via C9, retrieves via C8, renders a
    /// context-budgeted string ready to drop into a prompt.
    async fn retrieve_context(&self, query: &str, purpose: RetrievalPurpose) -> Result<String>;

    /// Pure static check over one script body (§4.1). Never executes
    /// anything; fatal issues come back as `ok: false`.
    fn validate_code(&self, script_body: &str) -> CodeValidation;

    /// Validates every `python_script` step body, then persists the
    /// definition as a new version. Rejection bubbles back as a
    /// structured error rather than a partial write (§3's lifecycle,
    /// §4.10).
    async fn persist_workflow(&self, definition: Workflow) -> Result<String>;
}

/// Default implementation: the retrieval budget and blend weight are
/// fixed constants rather than agent-tunable knobs, since no caller in
/// this crate's scope needs to vary them per call.
pub struct DefaultAgentInterface {
    storage: Arc<dyn WorkflowStorage>,
    knowledge: Arc<KnowledgeIndex>,
    context_max_tokens: usize,
    semantic_weight: f32,
    retrieval_limit: usize,
}

impl DefaultAgentInterface {
    pub fn new(storage: Arc<dyn WorkflowStorage>, knowledge: Arc<KnowledgeIndex>) -> Self {
        Self {
            storage,
            knowledge,
            context_max_tokens: 1_500,
            semantic_weight: 0.7,
            retrieval_limit: 10,
        }
    }
}

#[async_trait::async_trait]
impl AgentInterface for DefaultAgentInterface {
    async fn retrieve_context(&self, query: &str, purpose: RetrievalPurpose) -> Result<String> {
        let hits = self
            .knowledge
            .search_metadata(query, None, self.retrieval_limit, self.semantic_weight)
            .await?;
        let header = match purpose {
            RetrievalPurpose::Create => "# context for a new workflow\n\n",
            RetrievalPurpose::Fix => "# context for fixing a failing workflow\n\n",
        };
        let body = KnowledgeIndex::build_context(&hits, self.context_max_tokens);
        Ok(format!("{header}{body}"))
    }

    fn validate_code(&self, script_body: &str) -> CodeValidation {
        match validate_script(script_body) {
            Ok(report) => CodeValidation {
                ok: report.ok,
                issues: report.warnings.into_iter().map(|w: ValidationWarning| w.message).collect(),
            },
            Err(e) => CodeValidation {
                ok: false,
                issues: vec![e.to_string()],
            },
        }
    }

    async fn persist_workflow(&self, mut definition: Workflow) -> Result<String> {
        definition.validate()?;

        for step in &definition.steps {
            if step.step_type != StepType::PythonScript {
                continue;
            }
            let code = step
                .code
                .as_deref()
                .ok_or_else(|| EngineError::Validation(format!("step `{}` has no code", step.name)))?;
            let report = validate_script(code).map_err(|e| {
                EngineError::Validation(format!("step `{}`: {e}", step.name))
            })?;
            if !report.ok {
                return Err(EngineError::Validation(format!(
                    "step `{}` failed validation",
                    step.name
                )));
            }
        }

        let next_version = match self.storage.get_workflow(&definition.id).await? {
            Some(existing) => existing.version + 1,
            None => 1,
        };
        definition.version = next_version;

        let saved = self.storage.put_workflow(definition).await?;
        Ok(saved.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryStorage;
    use crate::knowledge::classifier::DomainClassifier;
    use crate::knowledge::embeddings::HashEmbedder;
    use crate::models::step::{Step, StepType as ST};
    use crate::models::{WorkflowMetadata, WorkflowStatus};
    use chrono::Utc;
    use std::collections::HashMap;

    fn agent_interface() -> DefaultAgentInterface {
        let storage = Arc::new(InMemoryStorage::default());
        let knowledge = Arc::new(KnowledgeIndex::new(
            storage.clone(),
            Arc::new(HashEmbedder),
            Arc::new(DomainClassifier::with_default_domains()),
        ));
        DefaultAgentInterface::new(storage, knowledge)
    }

    fn workflow(steps: Vec<Step>) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: "wf-agent".into(),
            version: 0,
            name: "authored".into(),
            status: WorkflowStatus::Draft,
            steps,
            initial_variables: serde_json::Map::new(),
            metadata: WorkflowMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn script_step(code: &str) -> Step {
        Step {
            id: Uuid::new_v4(),
            workflow_id: "wf-agent".into(),
            order: 1,
            name: "run".into(),
            step_type: ST::PythonScript,
            config: serde_json::json!({}),
            code: Some(code.to_string()),
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            retry_config: None,
            condition: None,
        }
    }

    #[test]
    fn validate_code_surfaces_fatal_issue() {
        let agent = agent_interface();
        let report = agent.validate_code("def f(:\n    pass");
        assert!(!report.ok);
        assert!(!report.issues.is_empty());
    }

    #[tokio::test]
    async fn persist_workflow_rejects_bad_script_step() {
        let agent = agent_interface();
        let wf = workflow(vec![script_step("def f(:\n    pass")]);
        let err = agent.persist_workflow(wf).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn persist_workflow_accepts_valid_script_and_assigns_version_one() {
        let agent = agent_interface();
        let wf = workflow(vec![script_step("import json\nprint(json.dumps({'ok': True}))")]);
        let id = agent.persist_workflow(wf).await.unwrap();
        assert_eq!(id, "wf-agent");
        let saved = agent.storage.get_workflow("wf-agent").await.unwrap().unwrap();
        assert_eq!(saved.version, 1);
    }

    #[tokio::test]
    async fn persist_workflow_bumps_version_on_resubmission() {
        let agent = agent_interface();
        let wf1 = workflow(vec![script_step("print('{}')")]);
        agent.persist_workflow(wf1).await.unwrap();
        let wf2 = workflow(vec![script_step("print('{}')")]);
        agent.persist_workflow(wf2).await.unwrap();
        let saved = agent.storage.get_workflow("wf-agent").await.unwrap().unwrap();
        assert_eq!(saved.version, 2);
    }

    #[tokio::test]
    async fn retrieve_context_renders_a_purpose_header() {
        let agent = agent_interface();
        agent
            .knowledge
            .ingest_document(crate::models::KnowledgeDocument {
                id: Uuid::new_v4(),
                title: "Retry pattern".into(),
                domain: "common".into(),
                category: crate::models::DocumentCategory::WorkflowPatterns,
                keywords: Vec::new(),
                tags: Vec::new(),
                summary: String::new(),
                body: "retry api calls with exponential backoff".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let ctx = agent.retrieve_context("retry backoff", RetrievalPurpose::Create).await.unwrap();
        assert!(ctx.starts_with("# context for a new workflow"));
    }
}
