//! Demo-corpus ingestion.
//!
//! Loads a directory of structured `*.txt` files, each with a `key: value`
//! header block separated from the body by a blank line:
//!
//! ```text
//! title: Alpine Ecosystems
//! source: https://example.org/alpine
//! license: CC BY-SA 4.0
//! accessed: 2026-05-14
//!
//! Body text follows here...
//! ```
//!
//! Files are chunked, embedded in batch, and then the workspace's corpus
//! is atomically replaced — an ingest is a full swap, not an append.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use walkdir::WalkDir;

use docvault_core::chunk::chunk_documents;
use docvault_core::embedding::EmbeddingProvider;
use docvault_core::models::Document;
use docvault_core::store::ChunkStore;
use docvault_core::{Error, Result};

use crate::config::Config;

/// Header keys recognized in document files.
const HEADER_KEYS: [(&str, &str); 4] = [
    ("title", "title"),
    ("source", "source_url"),
    ("license", "license"),
    ("accessed", "accessed_at"),
];

/// Counts reported back to the ingest caller.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
}

/// Load every `*.txt` file under `directory` (non-recursive), sorted by
/// file name for deterministic ordering.
pub fn load_documents_from_dir(directory: &Path, workspace_id: &str) -> Result<Vec<Document>> {
    if !directory.is_dir() {
        return Err(Error::validation(format!(
            "Corpus directory does not exist: {}",
            directory.display()
        )));
    }

    let include = build_globset(&["*.txt"])?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(directory).max_depth(1) {
        let entry = entry.map_err(|e| Error::validation(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if include.is_match(&name) {
            paths.push(entry.path().to_path_buf());
        }
    }
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        documents.push(parse_document_file(&path, workspace_id)?);
    }
    Ok(documents)
}

/// Parse a single structured text file into a [`Document`].
pub fn parse_document_file(path: &Path, workspace_id: &str) -> Result<Document> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::validation(format!("Failed to read {}: {}", path.display(), e)))?;

    let (header, body) = split_header_body(&raw);
    let metadata = parse_header(header);

    let title = metadata
        .get("title")
        .cloned()
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
        })
        .unwrap_or_default();

    let text = body.trim();
    if text.is_empty() {
        return Err(Error::validation(format!(
            "Empty document body: {}",
            path.display()
        )));
    }

    let mut document = Document::new(workspace_id, title, text);
    document.source_url = metadata.get("source_url").cloned();
    document.license = metadata.get("license").cloned();
    document.accessed_at = metadata
        .get("accessed_at")
        .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok());
    Ok(document)
}

/// Chunk, embed, and atomically install the demo corpus for a workspace.
pub async fn run_ingest(
    store: &dyn ChunkStore,
    embedder: &dyn EmbeddingProvider,
    config: &Config,
    workspace_id: &str,
) -> Result<IngestSummary> {
    let documents = load_documents_from_dir(&config.ingest.corpus_dir, workspace_id)?;
    if documents.is_empty() {
        return Err(Error::validation(format!(
            "No *.txt documents found in {}",
            config.ingest.corpus_dir.display()
        )));
    }

    let chunks = chunk_documents(&documents, config.chunking.chunk_size, config.chunking.overlap)?;
    let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embedder.embed_batch(&contents).await?;

    store
        .replace_workspace(workspace_id, &documents, &chunks, &vectors)
        .await?;

    Ok(IngestSummary {
        documents: documents.len(),
        chunks: chunks.len(),
    })
}

fn split_header_body(raw: &str) -> (&str, &str) {
    match raw.split_once("\n\n") {
        Some((header, body)) => (header, body),
        None => ("", raw),
    }
}

fn parse_header(header: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if let Some((_, mapped)) = HEADER_KEYS.iter().find(|(k, _)| *k == key) {
            metadata.insert(mapped.to_string(), value.to_string());
        }
    }
    metadata
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::validation(e.to_string()))?);
    }
    builder
        .build()
        .map_err(|e| Error::validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_file_with_full_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpine.txt");
        fs::write(
            &path,
            "title: Alpine Ecosystems\nsource: https://example.org/alpine\nlicense: CC BY-SA 4.0\naccessed: 2026-05-14\n\nAlpine regions host hardy plant life.",
        )
        .unwrap();

        let doc = parse_document_file(&path, "ws-1").unwrap();
        assert_eq!(doc.title, "Alpine Ecosystems");
        assert_eq!(doc.source_url.as_deref(), Some("https://example.org/alpine"));
        assert_eq!(doc.license.as_deref(), Some("CC BY-SA 4.0"));
        assert_eq!(
            doc.accessed_at,
            NaiveDate::from_ymd_opt(2026, 5, 14)
        );
        assert_eq!(doc.text, "Alpine regions host hardy plant life.");
        assert_eq!(doc.workspace_id.as_deref(), Some("ws-1"));
    }

    #[test]
    fn test_title_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glaciers.txt");
        fs::write(&path, "no header here at all").unwrap();

        let doc = parse_document_file(&path, "ws-1").unwrap();
        assert_eq!(doc.title, "glaciers");
        assert_eq!(doc.text, "no header here at all");
    }

    #[test]
    fn test_bad_date_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, "title: Doc\naccessed: last tuesday\n\nBody.").unwrap();

        let doc = parse_document_file(&path, "ws-1").unwrap();
        assert!(doc.accessed_at.is_none());
    }

    #[test]
    fn test_empty_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, "title: Empty\n\n   \n").unwrap();

        let err = parse_document_file(&path, "ws-1").unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_directory_load_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "title: B\n\nbody b").unwrap();
        fs::write(dir.path().join("a.txt"), "title: A\n\nbody a").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let docs = load_documents_from_dir(dir.path(), "ws-1").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].title, "A");
        assert_eq!(docs[1].title, "B");
    }

    #[test]
    fn test_missing_directory_rejected() {
        let err =
            load_documents_from_dir(Path::new("/nonexistent/corpus"), "ws-1").unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
