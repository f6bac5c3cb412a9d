//! Storage abstraction for the workflow engine (§4.7, §B). Persists
//! workflow definitions (versioned), executions, step-execution records,
//! and knowledge documents behind one async trait so the runner and the
//! knowledge index don't depend on a concrete backend.
//!
//! ## Storage Architecture
//!
//! Repository pattern: [`WorkflowStorage`] is the interface, [`InMemoryStorage`]
//! is the default backend for development and tests. A durable backend
//! (Postgres, etc.) would implement the same trait.
//!
//! ## Thread Safety
//!
//! [`InMemoryStorage`] uses `RwLock<HashMap<...>>` per collection: many
//! concurrent readers, one writer at a time, guards released on drop.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::models::{Execution, ExecutionStatus, KnowledgeDocument, StepExecution, Workflow};
use crate::{EngineError, Result};

/// Storage trait for workflow, execution, and knowledge persistence.
#[async_trait::async_trait]
pub trait WorkflowStorage: Send + Sync {
    /// Create a new version of a workflow. `(id, version)` must be unique;
    /// the caller is responsible for picking the next version number.
    async fn put_workflow(&self, workflow: Workflow) -> Result<Workflow>;

    /// The latest (highest-version) workflow with this id.
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    /// One specific version of a workflow.
    async fn get_workflow_version(&self, id: &str, version: u32) -> Result<Option<Workflow>>;

    /// Latest version of every known workflow.
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    async fn put_execution(&self, execution: Execution) -> Result<Execution>;

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>>;

    /// Executions, optionally filtered by workflow id and/or status.
    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<Execution>>;

    async fn put_step_execution(&self, step_execution: StepExecution) -> Result<StepExecution>;

    /// Step executions for one execution, in the order they were recorded.
    async fn list_step_executions(&self, execution_id: &Uuid) -> Result<Vec<StepExecution>>;

    async fn put_knowledge_document(&self, document: KnowledgeDocument) -> Result<KnowledgeDocument>;

    async fn get_knowledge_document(&self, id: &Uuid) -> Result<Option<KnowledgeDocument>>;

    /// All documents in a domain, for the knowledge index to rebuild its
    /// partition from (§4.8).
    async fn list_knowledge_documents(&self, domain: Option<&str>) -> Result<Vec<KnowledgeDocument>>;

    async fn delete_knowledge_document(&self, id: &Uuid) -> Result<()>;
}

/// In-memory storage implementation for development, demos, and tests.
/// Not persistent, not distributed, bound by process memory.
#[derive(Default)]
pub struct InMemoryStorage {
    /// Key: (workflow id, version).
    workflows: RwLock<HashMap<(String, u32), Workflow>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    /// Key: execution id, insertion order preserved within the Vec.
    step_executions: RwLock<HashMap<Uuid, Vec<StepExecution>>>,
    knowledge_documents: RwLock<HashMap<Uuid, KnowledgeDocument>>,
}

fn read_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| EngineError::Internal("storage lock poisoned".into()))
}

fn write_lock<T>(lock: &RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| EngineError::Internal("storage lock poisoned".into()))
}

#[async_trait::async_trait]
impl WorkflowStorage for InMemoryStorage {
    async fn put_workflow(&self, workflow: Workflow) -> Result<Workflow> {
        let mut workflows = write_lock(&self.workflows)?;
        workflows.insert((workflow.id.clone(), workflow.version), workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let workflows = read_lock(&self.workflows)?;
        Ok(workflows
            .values()
            .filter(|w| w.id == id)
            .max_by_key(|w| w.version)
            .cloned())
    }

    async fn get_workflow_version(&self, id: &str, version: u32) -> Result<Option<Workflow>> {
        let workflows = read_lock(&self.workflows)?;
        Ok(workflows.get(&(id.to_string(), version)).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let workflows = read_lock(&self.workflows)?;
        let mut latest: HashMap<&str, &Workflow> = HashMap::new();
        for w in workflows.values() {
            latest
                .entry(w.id.as_str())
                .and_modify(|existing| {
                    if w.version > existing.version {
                        *existing = w;
                    }
                })
                .or_insert(w);
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn put_execution(&self, execution: Execution) -> Result<Execution> {
        let mut executions = write_lock(&self.executions)?;
        executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>> {
        let executions = read_lock(&self.executions)?;
        Ok(executions.get(id).cloned())
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<Execution>> {
        let executions = read_lock(&self.executions)?;
        Ok(executions
            .values()
            .filter(|e| workflow_id.map_or(true, |wid| e.workflow_id == wid))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect())
    }

    async fn put_step_execution(&self, step_execution: StepExecution) -> Result<StepExecution> {
        let mut step_executions = write_lock(&self.step_executions)?;
        let entry = step_executions.entry(step_execution.execution_id).or_default();
        if let Some(existing) = entry.iter_mut().find(|se| se.id == step_execution.id) {
            *existing = step_execution.clone();
        } else {
            entry.push(step_execution.clone());
        }
        Ok(step_execution)
    }

    async fn list_step_executions(&self, execution_id: &Uuid) -> Result<Vec<StepExecution>> {
        let step_executions = read_lock(&self.step_executions)?;
        Ok(step_executions.get(execution_id).cloned().unwrap_or_default())
    }

    async fn put_knowledge_document(&self, document: KnowledgeDocument) -> Result<KnowledgeDocument> {
        let mut documents = write_lock(&self.knowledge_documents)?;
        documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_knowledge_document(&self, id: &Uuid) -> Result<Option<KnowledgeDocument>> {
        let documents = read_lock(&self.knowledge_documents)?;
        Ok(documents.get(id).cloned())
    }

    async fn list_knowledge_documents(&self, domain: Option<&str>) -> Result<Vec<KnowledgeDocument>> {
        let documents = read_lock(&self.knowledge_documents)?;
        Ok(documents
            .values()
            .filter(|d| domain.map_or(true, |dom| d.domain == dom))
            .cloned()
            .collect())
    }

    async fn delete_knowledge_document(&self, id: &Uuid) -> Result<()> {
        let mut documents = write_lock(&self.knowledge_documents)?;
        documents.remove(id);
        Ok(())
    }
}
