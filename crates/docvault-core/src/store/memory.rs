//! In-memory [`ChunkStore`] implementation for tests and demos.
//!
//! All state lives behind a single `RwLock`, which makes
//! [`ChunkStore::replace_workspace`] trivially atomic: writers hold the
//! lock for the whole clear-and-insert, so readers observe either the old
//! corpus or the new one. Vector search is brute-force cosine similarity
//! over the workspace's chunks.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Chunk, ClassificationLabel, Document, DocumentMetadata, RetrievalResult};
use crate::rank::rank_chunks;

use super::ChunkStore;

#[derive(Default)]
struct State {
    /// Documents in insertion order.
    documents: Vec<Document>,
    chunks: Vec<Chunk>,
    /// Vectors aligned 1:1 with `chunks` by chunk id.
    vectors: HashMap<String, Vec<f32>>,
}

/// In-memory store; suitable for tests and single-process demos.
#[derive(Default)]
pub struct InMemoryChunkStore {
    state: RwLock<State>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn metadata_of(doc: &Document) -> DocumentMetadata {
    DocumentMetadata {
        id: doc.id.clone(),
        workspace_id: doc.workspace_id.clone().unwrap_or_default(),
        title: doc.title.clone(),
        source_url: doc.source_url.clone(),
        license: doc.license.clone(),
        accessed_at: doc.accessed_at,
        classification_label: doc.classification,
    }
}

fn insert_batch(
    state: &mut State,
    documents: &[Document],
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(Error::validation(
            "Chunks and embeddings must be the same length.",
        ));
    }
    state.documents.extend_from_slice(documents);
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        state.vectors.insert(chunk.id.clone(), vector.clone());
    }
    state.chunks.extend_from_slice(chunks);
    Ok(())
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn add_many(
        &self,
        documents: &[Document],
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        insert_batch(&mut state, documents, chunks, vectors)
    }

    async fn replace_workspace(
        &self,
        workspace_id: &str,
        documents: &[Document],
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        remove_workspace(&mut state, workspace_id);
        insert_batch(&mut state, documents, chunks, vectors)
    }

    async fn search(
        &self,
        workspace_id: &str,
        query_vector: &[f32],
        top_k: usize,
        allowed_labels: Option<&BTreeSet<ClassificationLabel>>,
    ) -> Result<Vec<RetrievalResult>> {
        let state = self.state.read().unwrap();

        let label_by_doc: HashMap<&str, ClassificationLabel> = state
            .documents
            .iter()
            .filter(|d| d.workspace_id.as_deref() == Some(workspace_id))
            .map(|d| (d.id.as_str(), d.classification))
            .collect();

        let mut candidates = Vec::new();
        let mut candidate_vectors = Vec::new();
        for chunk in &state.chunks {
            if chunk.workspace_id != workspace_id {
                continue;
            }
            if let Some(allowed) = allowed_labels {
                match label_by_doc.get(chunk.document_id.as_str()) {
                    Some(label) if allowed.contains(label) => {}
                    _ => continue,
                }
            }
            let Some(vector) = state.vectors.get(&chunk.id) else {
                continue;
            };
            candidates.push(chunk.clone());
            candidate_vectors.push(vector.clone());
        }

        Ok(rank_chunks(&candidates, &candidate_vectors, query_vector, top_k))
    }

    async fn has_data(&self, workspace_id: &str) -> Result<bool> {
        let state = self.state.read().unwrap();
        Ok(state.chunks.iter().any(|c| c.workspace_id == workspace_id))
    }

    async fn list_documents(
        &self,
        workspace_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentMetadata>> {
        let state = self.state.read().unwrap();
        Ok(state
            .documents
            .iter()
            .filter(|d| d.workspace_id.as_deref() == Some(workspace_id))
            .skip(offset)
            .take(limit)
            .map(metadata_of)
            .collect())
    }

    async fn list_chunks(&self, workspace_id: &str, limit: usize) -> Result<Vec<Chunk>> {
        let state = self.state.read().unwrap();
        Ok(state
            .chunks
            .iter()
            .filter(|c| c.workspace_id == workspace_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn classification_map(
        &self,
        workspace_id: &str,
        document_ids: &[String],
    ) -> Result<HashMap<String, ClassificationLabel>> {
        let state = self.state.read().unwrap();
        Ok(state
            .documents
            .iter()
            .filter(|d| d.workspace_id.as_deref() == Some(workspace_id))
            .filter(|d| document_ids.contains(&d.id))
            .map(|d| (d.id.clone(), d.classification))
            .collect())
    }

    async fn update_classification(
        &self,
        workspace_id: &str,
        document_id: &str,
        label: ClassificationLabel,
    ) -> Result<Option<DocumentMetadata>> {
        let mut state = self.state.write().unwrap();
        let doc = state
            .documents
            .iter_mut()
            .find(|d| d.id == document_id && d.workspace_id.as_deref() == Some(workspace_id));
        Ok(doc.map(|d| {
            d.classification = label;
            metadata_of(d)
        }))
    }

    async fn clear_workspace(&self, workspace_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        remove_workspace(&mut state, workspace_id);
        Ok(())
    }
}

fn remove_workspace(state: &mut State, workspace_id: &str) {
    state
        .documents
        .retain(|d| d.workspace_id.as_deref() != Some(workspace_id));
    let removed: Vec<String> = state
        .chunks
        .iter()
        .filter(|c| c.workspace_id == workspace_id)
        .map(|c| c.id.clone())
        .collect();
    for chunk_id in &removed {
        state.vectors.remove(chunk_id);
    }
    state.chunks.retain(|c| c.workspace_id != workspace_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_document;

    async fn seed(store: &InMemoryChunkStore, workspace_id: &str, title: &str, text: &str) {
        let doc = Document::new(workspace_id, title, text);
        let chunks = chunk_document(&doc, 600, 120).unwrap();
        let vectors: Vec<Vec<f32>> = chunks.iter().map(|_| vec![1.0, 0.0]).collect();
        store.add_many(&[doc], &chunks, &vectors).await.unwrap();
    }

    #[tokio::test]
    async fn test_workspace_isolation() {
        let store = InMemoryChunkStore::new();
        seed(&store, "ws-a", "Doc A", "alpha body text").await;

        assert!(store.has_data("ws-a").await.unwrap());
        assert!(!store.has_data("ws-b").await.unwrap());
        assert!(store
            .search("ws-b", &[1.0, 0.0], 3, None)
            .await
            .unwrap()
            .is_empty());
        assert!(store.list_documents("ws-b", 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_count_mismatch_rejected() {
        let store = InMemoryChunkStore::new();
        let doc = Document::new("ws-a", "Doc", "body text");
        let chunks = chunk_document(&doc, 600, 120).unwrap();
        let err = store.add_many(&[doc], &chunks, &[]).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn test_replace_workspace_swaps_corpus() {
        let store = InMemoryChunkStore::new();
        seed(&store, "ws-a", "Old", "old corpus body").await;

        let doc = Document::new("ws-a", "New", "new corpus body");
        let chunks = chunk_document(&doc, 600, 120).unwrap();
        let vectors: Vec<Vec<f32>> = chunks.iter().map(|_| vec![0.0, 1.0]).collect();
        store
            .replace_workspace("ws-a", &[doc], &chunks, &vectors)
            .await
            .unwrap();

        let docs = store.list_documents("ws-a", 10, 0).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "New");
        let results = store.search("ws-a", &[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_title, "New");
    }

    #[tokio::test]
    async fn test_search_with_label_prefilter() {
        let store = InMemoryChunkStore::new();
        let mut public_doc = Document::new("ws-a", "Public", "public body");
        public_doc.classification = ClassificationLabel::Public;
        let mut restricted_doc = Document::new("ws-a", "Restricted", "restricted body");
        restricted_doc.classification = ClassificationLabel::Restricted;

        for doc in [public_doc, restricted_doc] {
            let chunks = chunk_document(&doc, 600, 120).unwrap();
            let vectors: Vec<Vec<f32>> = chunks.iter().map(|_| vec![1.0, 0.0]).collect();
            store.add_many(&[doc], &chunks, &vectors).await.unwrap();
        }

        let allowed: BTreeSet<ClassificationLabel> =
            [ClassificationLabel::Public].into_iter().collect();
        let results = store
            .search("ws-a", &[1.0, 0.0], 10, Some(&allowed))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_title, "Public");
    }

    #[tokio::test]
    async fn test_update_classification_scoped() {
        let store = InMemoryChunkStore::new();
        seed(&store, "ws-a", "Doc A", "alpha body").await;
        let doc_id = store.list_documents("ws-a", 1, 0).await.unwrap()[0].id.clone();

        // Wrong workspace: indistinguishable from absence.
        let miss = store
            .update_classification("ws-b", &doc_id, ClassificationLabel::Public)
            .await
            .unwrap();
        assert!(miss.is_none());

        let hit = store
            .update_classification("ws-a", &doc_id, ClassificationLabel::Restricted)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.classification_label, ClassificationLabel::Restricted);
    }

    #[tokio::test]
    async fn test_classification_map_ignores_foreign_ids() {
        let store = InMemoryChunkStore::new();
        seed(&store, "ws-a", "Doc A", "alpha body").await;
        let doc_id = store.list_documents("ws-a", 1, 0).await.unwrap()[0].id.clone();

        let map = store
            .classification_map("ws-a", &[doc_id.clone(), "unknown-doc".to_string()])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&doc_id));
    }
}
