//! Core data models used throughout docvault.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and query pipeline, plus the classification
//! labels and workspace roles the access policy is built on.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Document sensitivity label, ordered from least to most sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationLabel {
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl ClassificationLabel {
    /// All labels, least sensitive first.
    pub const ALL: [ClassificationLabel; 4] = [
        ClassificationLabel::Public,
        ClassificationLabel::Internal,
        ClassificationLabel::Confidential,
        ClassificationLabel::Restricted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationLabel::Public => "public",
            ClassificationLabel::Internal => "internal",
            ClassificationLabel::Confidential => "confidential",
            ClassificationLabel::Restricted => "restricted",
        }
    }
}

impl Default for ClassificationLabel {
    fn default() -> Self {
        ClassificationLabel::Internal
    }
}

impl std::str::FromStr for ClassificationLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(ClassificationLabel::Public),
            "internal" => Ok(ClassificationLabel::Internal),
            "confidential" => Ok(ClassificationLabel::Confidential),
            "restricted" => Ok(ClassificationLabel::Restricted),
            other => Err(Error::validation(format!(
                "Invalid classification label: '{}'.",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ClassificationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a user within a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    Admin,
    Member,
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Admin => "admin",
            WorkspaceRole::Member => "member",
        }
    }
}

impl std::str::FromStr for WorkspaceRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(WorkspaceRole::Admin),
            "member" => Ok(WorkspaceRole::Member),
            other => Err(Error::validation(format!(
                "Invalid workspace role: '{}'.",
                other
            ))),
        }
    }
}

impl std::fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workspace-scoped text unit produced by ingestion.
///
/// The classification label is the only field mutable after creation.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// `None` only for documents not yet assigned to a workspace; the
    /// chunker rejects those.
    pub workspace_id: Option<String>,
    pub title: String,
    pub source_url: Option<String>,
    pub license: Option<String>,
    pub accessed_at: Option<NaiveDate>,
    /// Full document text, prior to whitespace normalization.
    pub text: String,
    pub classification: ClassificationLabel,
}

impl Document {
    pub fn new(
        workspace_id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: Some(workspace_id.into()),
            title: title.into(),
            source_url: None,
            license: None,
            accessed_at: None,
            text: text.into(),
            classification: ClassificationLabel::default(),
        }
    }
}

/// Lightweight document projection without the body text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub license: Option<String>,
    pub accessed_at: Option<NaiveDate>,
    pub classification_label: ClassificationLabel,
}

/// A contiguous substring of a document's normalized text.
///
/// `source_title` and `source_url` are snapshots taken at chunk-creation
/// time; a later rename of the document does not update existing chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Denormalized copy of the parent document's workspace id, so
    /// query-time filtering never needs a join.
    pub workspace_id: String,
    pub content: String,
    /// Char offsets into the normalized document text.
    pub start_char: i64,
    pub end_char: i64,
    /// Zero-based, strictly increasing within a document.
    pub chunk_index: i64,
    pub source_title: String,
    pub source_url: Option<String>,
}

/// Ephemeral pairing of a chunk and its similarity score. Never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}
