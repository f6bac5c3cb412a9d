//! Knowledge base document types (§3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `category` ∈ {workflow_patterns, error_solutions, code_templates,
/// integration_examples, best_practices} (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    WorkflowPatterns,
    ErrorSolutions,
    CodeTemplates,
    IntegrationExamples,
    BestPractices,
}

/// A document ingested into the knowledge base. `domain` is the
/// classifier-facing label (§4.9); `category` is the retrieval-facing kind.
/// `body` is the canonical text, kept in the relational store and never
/// embedded — only the metadata blob (title + keywords + tags + summary)
/// is (§3's `VectorEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: Uuid,
    pub title: String,
    pub domain: String,
    pub category: DocumentCategory,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub summary: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    /// The text actually embedded/indexed: title + keywords + tags +
    /// summary. The body is deliberately excluded (§3).
    pub fn metadata_blob(&self) -> String {
        format!(
            "{} {} {} {}",
            self.title,
            self.keywords.join(" "),
            self.tags.join(" "),
            self.summary
        )
    }
}

/// A named collection of documents — the unit an execution's retrieval
/// queries are scoped to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub name: String,
    pub documents: Vec<KnowledgeDocument>,
}

/// One entry in the domain-partitioned vector index: mirrors a
/// [`KnowledgeDocument`] by id (§3). Deleting the document invalidates this
/// mirror.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub document_id: Uuid,
    pub domain: String,
    pub category: DocumentCategory,
    pub embedding: Vec<f32>,
    pub title: String,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub summary: String,
}
