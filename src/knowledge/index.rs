//! Knowledge Index (C8, §4.8): the retrieval service authoring agents
//! consume. `KnowledgeDocument` records live in the relational store (full
//! body); `VectorEntry` mirrors live in a vector store partitioned by
//! domain collection (`common` plus one per known domain). Only the
//! metadata blob is ever embedded — bodies are rehydrated from storage at
//! query time, never from the vector store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::engine::storage::WorkflowStorage;
use crate::knowledge::classifier::DomainClassifier;
use crate::knowledge::embeddings::{cosine_similarity, Embedder};
use crate::models::{DocumentCategory, KnowledgeDocument, VectorEntry};
use crate::Result;

const COMMON_COLLECTION: &str = "common";
const DEFAULT_SUMMARY_TOKENS: usize = 40;
const DEFAULT_KEYWORD_COUNT: usize = 8;

/// One scored, rehydrated retrieval result (§4.8).
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub document_id: Uuid,
    pub title: String,
    pub domain: String,
    pub category: DocumentCategory,
    pub score: f32,
    pub body: String,
}

/// A recorded query for later analysis (§4.8's "records each query").
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub query: String,
    pub domains: Vec<String>,
    pub hit_count: usize,
    pub latency: ChronoDuration,
    pub recorded_at: DateTime<Utc>,
}

/// Domain-partitioned vector index plus the relational rehydration path
/// (§4.8).
pub struct KnowledgeIndex {
    storage: Arc<dyn WorkflowStorage>,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<DomainClassifier>,
    collections: DashMap<String, Vec<VectorEntry>>,
    query_log: Mutex<Vec<QueryLogEntry>>,
}

impl KnowledgeIndex {
    pub fn new(storage: Arc<dyn WorkflowStorage>, embedder: Arc<dyn Embedder>, classifier: Arc<DomainClassifier>) -> Self {
        Self {
            storage,
            embedder,
            classifier,
            collections: DashMap::new(),
            query_log: Mutex::new(Vec::new()),
        }
    }

    /// Ingest contract, create path (§4.8): fills in `summary`/`keywords`
    /// if absent, detects the target domain collection(s) via C9 when the
    /// document doesn't already carry one, stores the document, embeds its
    /// metadata blob, and inserts the mirror into the detected domain(s)
    /// plus `common`.
    pub async fn ingest_document(&self, mut document: KnowledgeDocument) -> Result<KnowledgeDocument> {
        if document.summary.trim().is_empty() {
            document.summary = summarize(&document.body, DEFAULT_SUMMARY_TOKENS);
        }
        if document.keywords.is_empty() {
            document.keywords = extract_keywords(&document.body, DEFAULT_KEYWORD_COUNT);
        }

        let target_domains = if !document.domain.trim().is_empty() {
            vec![document.domain.clone()]
        } else {
            let detected = self.classifier.classify(&format!("{} {}", document.title, document.summary));
            if detected.len() == 1 {
                detected
            } else {
                // No match, or more than one candidate domain: ambiguous,
                // lands in `common` only (§4.8).
                Vec::new()
            }
        };
        if document.domain.trim().is_empty() {
            document.domain = target_domains.first().cloned().unwrap_or_else(|| COMMON_COLLECTION.to_string());
        }

        let document = self.storage.put_knowledge_document(document).await?;
        self.insert_vector_entry(&document, &target_domains);
        Ok(document)
    }

    /// Ingest contract, update path: drop every prior mirror by id, then
    /// re-ingest as if new.
    pub async fn update_document(&self, document: KnowledgeDocument) -> Result<KnowledgeDocument> {
        self.remove_vector_entries(&document.id);
        self.ingest_document(document).await
    }

    /// Ingest contract, delete path: remove from every collection and the
    /// relational store.
    pub async fn delete_document(&self, id: &Uuid) -> Result<()> {
        self.remove_vector_entries(id);
        self.storage.delete_knowledge_document(id).await
    }

    fn insert_vector_entry(&self, document: &KnowledgeDocument, target_domains: &[String]) {
        let entry = VectorEntry {
            document_id: document.id,
            domain: document.domain.clone(),
            category: document.category,
            embedding: self.embedder.embed(&document.metadata_blob()),
            title: document.title.clone(),
            keywords: document.keywords.clone(),
            tags: document.tags.clone(),
            summary: document.summary.clone(),
        };

        let mut collections: HashSet<String> = target_domains.iter().cloned().collect();
        collections.insert(COMMON_COLLECTION.to_string());
        for collection in collections {
            self.collections.entry(collection).or_default().push(entry.clone());
        }
    }

    fn remove_vector_entries(&self, id: &Uuid) {
        for mut collection in self.collections.iter_mut() {
            collection.value_mut().retain(|entry| entry.document_id != *id);
        }
    }

    /// Query contract (§4.8): blends semantic cosine similarity over the
    /// embedded metadata with a lexical keyword-overlap score, rehydrates
    /// each hit's full body from storage, and records the query.
    pub async fn search_metadata(
        &self,
        query: &str,
        domain: Option<&str>,
        limit: usize,
        semantic_weight: f32,
    ) -> Result<Vec<ScoredHit>> {
        let started = Instant::now();

        let (collections_to_search, domains_for_log) = self.route(query, domain);

        let query_embedding = self.embedder.embed(query);
        let query_terms: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();

        let mut seen = HashSet::new();
        let mut scored: Vec<(f32, VectorEntry)> = Vec::new();
        for collection in &collections_to_search {
            if let Some(entries) = self.collections.get(collection) {
                for entry in entries.iter() {
                    if !seen.insert(entry.document_id) {
                        continue;
                    }
                    let semantic = cosine_similarity(&query_embedding, &entry.embedding);
                    let lexical = lexical_overlap(&query_terms, entry);
                    let score = semantic_weight * semantic + (1.0 - semantic_weight) * lexical;
                    scored.push((score, entry.clone()));
                }
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let mut hits = Vec::with_capacity(scored.len());
        for (score, entry) in scored {
            let body = self
                .storage
                .get_knowledge_document(&entry.document_id)
                .await?
                .map(|d| d.body)
                .unwrap_or_default();
            hits.push(ScoredHit {
                document_id: entry.document_id,
                title: entry.title,
                domain: entry.domain,
                category: entry.category,
                score,
                body,
            });
        }

        if let Ok(mut log) = self.query_log.lock() {
            log.push(QueryLogEntry {
                query: query.to_string(),
                domains: domains_for_log,
                hit_count: hits.len(),
                latency: ChronoDuration::from_std(started.elapsed()).unwrap_or_else(|_| ChronoDuration::zero()),
                recorded_at: Utc::now(),
            });
        }

        Ok(hits)
    }

    /// Routing rules (§4.8): explicit domain searches `{domain} ∪ common`;
    /// otherwise C9 detects domains from the query and each one is
    /// searched `∪ common`; with no detected domain, every collection is
    /// searched.
    fn route(&self, query: &str, domain: Option<&str>) -> (Vec<String>, Vec<String>) {
        if let Some(domain) = domain {
            return (vec![domain.to_string(), COMMON_COLLECTION.to_string()], vec![domain.to_string()]);
        }
        let detected = self.classifier.classify(query);
        if detected.is_empty() {
            let all: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
            (all, Vec::new())
        } else {
            let mut collections = detected.clone();
            collections.push(COMMON_COLLECTION.to_string());
            (collections, detected)
        }
    }

    /// Context budgeting for agent consumption (§4.8): concatenates
    /// rehydrated bodies in score order, each prefixed with title and
    /// domain, truncating once the token budget is spent.
    pub fn build_context(hits: &[ScoredHit], max_tokens: usize) -> String {
        let mut out = String::new();
        let mut used = 0usize;
        for hit in hits {
            let entry_text = format!("[{} / {}]\n{}\n\n", hit.title, hit.domain, hit.body);
            let tokens = entry_text.split_whitespace().count();
            if used > 0 && used + tokens > max_tokens {
                break;
            }
            out.push_str(&entry_text);
            used += tokens;
            if used >= max_tokens {
                break;
            }
        }
        out
    }

    pub fn query_log(&self) -> Vec<QueryLogEntry> {
        self.query_log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

fn summarize(body: &str, max_tokens: usize) -> String {
    body.split_whitespace().take(max_tokens).collect::<Vec<_>>().join(" ")
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "been", "will", "your", "into",
    "are", "was", "were", "its", "you", "can", "use", "when", "then", "also",
];

fn extract_keywords(body: &str, count: usize) -> Vec<String> {
    let mut frequencies: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for token in body.split(|c: char| !c.is_alphanumeric()) {
        let token = token.to_lowercase();
        if token.len() <= 3 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        *frequencies.entry(token).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(count).map(|(word, _)| word).collect()
}

fn lexical_overlap(query_terms: &[String], entry: &VectorEntry) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let mut corpus: Vec<String> = Vec::new();
    corpus.extend(entry.title.to_lowercase().split_whitespace().map(str::to_string));
    corpus.extend(entry.keywords.iter().map(|k| k.to_lowercase()));
    corpus.extend(entry.tags.iter().map(|t| t.to_lowercase()));
    corpus.extend(entry.summary.to_lowercase().split_whitespace().map(str::to_string));
    let matches = query_terms.iter().filter(|t| corpus.contains(t)).count();
    matches as f32 / query_terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryStorage;
    use crate::knowledge::embeddings::HashEmbedder;

    fn index() -> KnowledgeIndex {
        KnowledgeIndex::new(
            Arc::new(InMemoryStorage::default()),
            Arc::new(HashEmbedder),
            Arc::new(DomainClassifier::with_default_domains()),
        )
    }

    fn document(title: &str, domain: &str, body: &str) -> KnowledgeDocument {
        KnowledgeDocument {
            id: Uuid::new_v4(),
            title: title.to_string(),
            domain: domain.to_string(),
            category: DocumentCategory::ErrorSolutions,
            keywords: Vec::new(),
            tags: vec!["retry".to_string()],
            summary: String::new(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ingest_fills_in_summary_and_keywords() {
        let index = index();
        let doc = index
            .ingest_document(document(
                "Retry with backoff",
                "common",
                "retry retry retry failed requests with exponential backoff and jitter",
            ))
            .await
            .unwrap();
        assert!(!doc.summary.is_empty());
        assert!(!doc.keywords.is_empty());
    }

    #[tokio::test]
    async fn explicit_domain_document_is_searchable_by_that_domain() {
        let index = index();
        index
            .ingest_document(document("Kakao map setup", "kakao", "configure the kakao map sdk key"))
            .await
            .unwrap();
        let hits = index.search_metadata("kakao map", Some("kakao"), 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].domain, "kakao");
    }

    #[tokio::test]
    async fn delete_removes_from_every_collection() {
        let index = index();
        let doc = index
            .ingest_document(document("Weather alert", "weather", "severe weather alert thresholds"))
            .await
            .unwrap();
        index.delete_document(&doc.id).await.unwrap();
        let hits = index.search_metadata("weather alert", None, 10, 0.5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn build_context_truncates_at_token_budget() {
        let index = index();
        index
            .ingest_document(document("Doc one", "common", "alpha beta gamma delta epsilon"))
            .await
            .unwrap();
        let hits = index.search_metadata("alpha beta", None, 10, 0.5).await.unwrap();
        let context = KnowledgeIndex::build_context(&hits, 3);
        assert!(context.split_whitespace().count() <= 6);
    }

    #[tokio::test]
    async fn search_records_a_query_log_entry() {
        let index = index();
        index
            .ingest_document(document("Doc one", "common", "alpha beta gamma"))
            .await
            .unwrap();
        index.search_metadata("alpha", None, 10, 0.5).await.unwrap();
        assert_eq!(index.query_log().len(), 1);
    }
}
