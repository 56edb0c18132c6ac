//! Storage abstraction for workspace-scoped chunks and vectors.
//!
//! The [`ChunkStore`] trait defines every storage operation the query
//! pipeline and ingestion path need, enabling pluggable backends (SQLite,
//! in-memory). Backend selection is a deployment-time configuration
//! switch, never a runtime branch inside the core logic.
//!
//! Every operation takes a mandatory workspace id; reads and writes must
//! never observe another workspace's rows. [`ChunkStore::replace_workspace`]
//! must be atomic with respect to concurrent reads of the same workspace —
//! a reader observes either the old corpus or the new one, never a mix.

pub mod memory;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, ClassificationLabel, Document, DocumentMetadata, RetrievalResult};

/// Abstract storage backend for documents, chunks, and their vectors.
///
/// Implementations must be `Send + Sync` to work with async runtimes.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Append documents with their chunks and vectors.
    ///
    /// Fails with `Validation` when the vector count does not equal the
    /// chunk count.
    async fn add_many(
        &self,
        documents: &[Document],
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Atomically replace a workspace's entire corpus.
    async fn replace_workspace(
        &self,
        workspace_id: &str,
        documents: &[Document],
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Top-`top_k` chunks by cosine similarity, scoped to the workspace.
    ///
    /// When `allowed_labels` is given, classification filtering is pushed
    /// into retrieval: only chunks whose parent document carries an
    /// allowed label are candidates. With `None`, candidates are returned
    /// unfiltered for post-hoc policy enforcement.
    async fn search(
        &self,
        workspace_id: &str,
        query_vector: &[f32],
        top_k: usize,
        allowed_labels: Option<&BTreeSet<ClassificationLabel>>,
    ) -> Result<Vec<RetrievalResult>>;

    /// Whether the workspace has any indexed chunks.
    async fn has_data(&self, workspace_id: &str) -> Result<bool>;

    /// Document metadata projections for the workspace, in ingestion order.
    async fn list_documents(
        &self,
        workspace_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentMetadata>>;

    /// Up to `limit` chunks from the workspace, in ingestion order.
    async fn list_chunks(&self, workspace_id: &str, limit: usize) -> Result<Vec<Chunk>>;

    /// Map document ids to classification labels, workspace-scoped.
    ///
    /// Ids absent from the workspace are simply missing from the map.
    async fn classification_map(
        &self,
        workspace_id: &str,
        document_ids: &[String],
    ) -> Result<HashMap<String, ClassificationLabel>>;

    /// Update a document's classification label, workspace-scoped.
    ///
    /// Returns `None` when the document does not exist in that workspace;
    /// a document living in a different workspace is indistinguishable
    /// from one that does not exist at all.
    async fn update_classification(
        &self,
        workspace_id: &str,
        document_id: &str,
        label: ClassificationLabel,
    ) -> Result<Option<DocumentMetadata>>;

    /// Delete everything the workspace owns.
    async fn clear_workspace(&self, workspace_id: &str) -> Result<()>;
}
