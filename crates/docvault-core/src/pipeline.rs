//! Query pipeline: the retrieval-and-policy-enforcement state machine.
//!
//! [`QueryPipeline::execute_query`] runs the fixed sequence of stages —
//! authorization, data precondition, question embedding, candidate
//! retrieval, policy enforcement, truncation, answer assembly, citation
//! assembly, audit — with no branching back. Collaborators (store,
//! embedding provider, answer synthesizer, audit sink, role resolver) are
//! injected at construction; nothing here touches I/O directly.
//!
//! # Filtering modes
//!
//! Classification filtering can be pushed into the store
//! ([`PolicyFilteringMode::InRetrieval`]) or applied post-hoc over
//! unfiltered candidates ([`PolicyFilteringMode::PostRetrieval`]). Results
//! are policy-correct under either mode; the mode used is recorded in the
//! response's transparency report. In either mode the pipeline re-derives
//! the allowed label set and checks every candidate against it — store
//! pre-filtering is an optimization, never the sole enforcement point.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{actions, AuditSink};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{Chunk, ClassificationLabel, DocumentMetadata, RetrievalResult, WorkspaceRole};
use crate::policy::{allowed_labels_for_role, sorted_label_names};
use crate::store::ChunkStore;

/// Upper bound on a caller-requested `top_k`.
pub const MAX_TOP_K: usize = 10;

/// Default `top_k` when the caller does not specify one.
pub const DEFAULT_TOP_K: usize = 3;

/// Fixed sentinel answer when no chunk passes the policy filter.
pub const NO_RESULTS_ANSWER: &str = "No results.";

/// Citations carry at most this many chars of chunk content.
pub const EXCERPT_MAX_CHARS: usize = 200;

/// Minimum candidate count fetched from the store, independent of the
/// caller's `top_k`, so the policy filter has headroom to drop candidates
/// without starving the final result.
pub const DEFAULT_CANDIDATE_FLOOR: usize = 10;

/// Identity of the authenticated caller.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
}

/// Resolves a caller's role within a workspace.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// Resolve the caller's role, failing with `Forbidden` when the caller
    /// has no membership or does not hold `required`.
    ///
    /// Returns the stored role string verbatim. A role outside the fixed
    /// vocabulary is not an error here — the policy resolver maps it to
    /// the most restrictive label set.
    async fn resolve_role(
        &self,
        workspace_id: &str,
        user_id: &str,
        required: Option<WorkspaceRole>,
    ) -> Result<String>;
}

/// Optional language-model answer synthesis.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    /// Generate an answer from the question and the ordered passing
    /// chunks. May fail with `DependencyUnavailable`.
    async fn generate(&self, question: &str, chunks: &[Chunk]) -> Result<String>;
}

/// Where classification filtering is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyFilteringMode {
    /// The allowed-label set is pushed into the store's search.
    InRetrieval,
    /// Candidates come back unfiltered and are filtered here.
    PostRetrieval,
}

impl PolicyFilteringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyFilteringMode::InRetrieval => "in_retrieval",
            PolicyFilteringMode::PostRetrieval => "post_retrieval",
        }
    }
}

impl std::str::FromStr for PolicyFilteringMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_retrieval" => Ok(PolicyFilteringMode::InRetrieval),
            "post_retrieval" => Ok(PolicyFilteringMode::PostRetrieval),
            other => Err(Error::validation(format!(
                "Unknown policy filtering mode: '{}'. Use in_retrieval or post_retrieval.",
                other
            ))),
        }
    }
}

/// One citation per policy-passing chunk. Carries a bounded excerpt,
/// never the full content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub source_title: String,
    pub source_url: Option<String>,
    pub score: f32,
    pub excerpt: String,
}

/// Policy-transparency report attached to every query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyReport {
    pub policy_enforced: bool,
    pub policy_filtering_mode: PolicyFilteringMode,
    pub access_role: String,
    /// Sorted alphabetically.
    pub allowed_classification_labels: Vec<String>,
    /// Candidate count before policy filtering.
    pub candidate_results: usize,
    /// Result count after filtering and truncation. Always
    /// `<= candidate_results`.
    pub returned_results: usize,
}

/// Final result of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub policy: PolicyReport,
}

/// The retrieval orchestrator. One instance is shared across requests;
/// all state is in the injected collaborators.
pub struct QueryPipeline {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    roles: Arc<dyn RoleResolver>,
    audit: Arc<dyn AuditSink>,
    synthesizer: Option<Arc<dyn AnswerSynthesizer>>,
    filtering_mode: PolicyFilteringMode,
    candidate_floor: usize,
}

impl QueryPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        roles: Arc<dyn RoleResolver>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            embedder,
            roles,
            audit,
            synthesizer: None,
            filtering_mode: PolicyFilteringMode::PostRetrieval,
            candidate_floor: DEFAULT_CANDIDATE_FLOOR,
        }
    }

    /// Enable answer synthesis. Once enabled, synthesis failures surface
    /// as errors — there is no silent fallback to the raw-chunk answer.
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn AnswerSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_filtering_mode(mut self, mode: PolicyFilteringMode) -> Self {
        self.filtering_mode = mode;
        self
    }

    pub fn with_candidate_floor(mut self, floor: usize) -> Self {
        self.candidate_floor = floor.max(1);
        self
    }

    /// Execute a query against a workspace on behalf of `caller`.
    pub async fn execute_query(
        &self,
        workspace_id: &str,
        question: &str,
        top_k: usize,
        caller: &Caller,
    ) -> Result<QueryResult> {
        if question.trim().is_empty() {
            return Err(Error::validation("question must not be empty."));
        }
        if top_k < 1 || top_k > MAX_TOP_K {
            return Err(Error::validation(format!(
                "top_k must be between 1 and {}.",
                MAX_TOP_K
            )));
        }

        // Authorization before any data access; failures here are fatal
        // and leave no audit trace of workspace contents.
        let role = self
            .roles
            .resolve_role(workspace_id, &caller.user_id, None)
            .await?;

        if !self.store.has_data(workspace_id).await? {
            self.audit_query_failure(workspace_id, caller, &role, "no_data_ingested")
                .await;
            return Err(Error::NoDataIngested);
        }

        let query_vector = match self.embedder.embed(question).await {
            Ok(vector) => vector,
            Err(err) => {
                self.audit_query_failure(workspace_id, caller, &role, "embedding_failed")
                    .await;
                return Err(err);
            }
        };

        let allowed = allowed_labels_for_role(&role);
        let fetch_k = top_k.max(self.candidate_floor);
        let candidates = match self.filtering_mode {
            PolicyFilteringMode::InRetrieval => {
                self.store
                    .search(workspace_id, &query_vector, fetch_k, Some(&allowed))
                    .await?
            }
            PolicyFilteringMode::PostRetrieval => {
                self.store
                    .search(workspace_id, &query_vector, fetch_k, None)
                    .await?
            }
        };
        let candidate_results = candidates.len();

        // Policy enforcement. In post-retrieval mode this is the filter;
        // in in-retrieval mode it verifies the store's filtering against a
        // freshly derived label set.
        let mut seen = HashSet::new();
        let document_ids: Vec<String> = candidates
            .iter()
            .map(|r| r.chunk.document_id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let label_map = self
            .store
            .classification_map(workspace_id, &document_ids)
            .await?;

        let mut filtered_by_policy = 0usize;
        let mut filtered_missing_metadata = 0usize;
        let mut passing: Vec<RetrievalResult> = Vec::new();
        for result in candidates {
            match label_map.get(&result.chunk.document_id) {
                Some(label) if allowed.contains(label) => passing.push(result),
                Some(_) => filtered_by_policy += 1,
                None => filtered_missing_metadata += 1,
            }
        }

        passing.truncate(top_k);
        let returned_results = passing.len();

        let llm_used = self.synthesizer.is_some() && !passing.is_empty();
        let answer = if passing.is_empty() {
            NO_RESULTS_ANSWER.to_string()
        } else if let Some(synthesizer) = &self.synthesizer {
            let chunks: Vec<Chunk> = passing.iter().map(|r| r.chunk.clone()).collect();
            match synthesizer.generate(question, &chunks).await {
                Ok(text) => text,
                Err(err) => {
                    self.audit_query_failure(workspace_id, caller, &role, "answer_synthesis_failed")
                        .await;
                    return Err(match err {
                        Error::DependencyUnavailable(_) => err,
                        other => Error::DependencyUnavailable(other.to_string()),
                    });
                }
            }
        } else {
            passing[0].chunk.content.clone()
        };

        let citations: Vec<Citation> = passing
            .iter()
            .map(|result| Citation {
                chunk_id: result.chunk.id.clone(),
                source_title: result.chunk.source_title.clone(),
                source_url: result.chunk.source_url.clone(),
                score: result.score,
                excerpt: result.chunk.content.chars().take(EXCERPT_MAX_CHARS).collect(),
            })
            .collect();

        let allowed_names = sorted_label_names(&allowed);
        self.audit
            .record(
                workspace_id,
                Some(&caller.user_id),
                actions::QUERY,
                json!({
                    "question": question,
                    "top_k": top_k,
                    "results": returned_results,
                    "candidate_results": candidate_results,
                    "filtered_by_policy": filtered_by_policy,
                    "filtered_missing_metadata": filtered_missing_metadata,
                    "access_role": role.as_str(),
                    "allowed_classification_labels": allowed_names.clone(),
                    "policy_filtering_mode": self.filtering_mode.as_str(),
                    "llm_used": llm_used,
                    "outcome": "success",
                }),
            )
            .await;

        Ok(QueryResult {
            answer,
            citations,
            policy: PolicyReport {
                policy_enforced: true,
                policy_filtering_mode: self.filtering_mode,
                access_role: role.clone(),
                allowed_classification_labels: allowed_names,
                candidate_results,
                returned_results,
            },
        })
    }

    /// Update a document's classification label. Admin-only; a document id
    /// from another workspace resolves to not-found, never leaking
    /// existence.
    pub async fn update_classification(
        &self,
        workspace_id: &str,
        document_id: &str,
        new_label: ClassificationLabel,
        caller: &Caller,
    ) -> Result<DocumentMetadata> {
        self.roles
            .resolve_role(workspace_id, &caller.user_id, Some(WorkspaceRole::Admin))
            .await?;

        match self
            .store
            .update_classification(workspace_id, document_id, new_label)
            .await?
        {
            Some(metadata) => {
                self.audit
                    .record(
                        workspace_id,
                        Some(&caller.user_id),
                        actions::DOCUMENT_CLASSIFICATION_UPDATE,
                        json!({
                            "document_id": document_id,
                            "classification_label": new_label.as_str(),
                            "outcome": "success",
                        }),
                    )
                    .await;
                Ok(metadata)
            }
            None => {
                self.audit
                    .record(
                        workspace_id,
                        Some(&caller.user_id),
                        actions::DOCUMENT_CLASSIFICATION_UPDATE,
                        json!({
                            "document_id": document_id,
                            "reason": "document_not_found",
                            "outcome": "failure",
                        }),
                    )
                    .await;
                Err(Error::not_found("Document not found."))
            }
        }
    }

    async fn audit_query_failure(
        &self,
        workspace_id: &str,
        caller: &Caller,
        role: &str,
        reason: &str,
    ) {
        self.audit
            .record(
                workspace_id,
                Some(&caller.user_id),
                actions::QUERY,
                json!({
                    "access_role": role,
                    "reason": reason,
                    "outcome": "failure",
                }),
            )
            .await;
    }
}
