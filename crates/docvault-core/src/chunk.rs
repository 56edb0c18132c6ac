//! Fixed-window text chunker with word-boundary snapping.
//!
//! Splits a document's normalized text into overlapping content windows.
//! Window ends are snapped back to the nearest space when one falls far
//! enough into the window, so chunks rarely cut words in half.
//!
//! # Algorithm
//!
//! 1. Normalize the document text: collapse all whitespace runs to single
//!    spaces and trim.
//! 2. Walk a window of `chunk_size` chars from offset 0. If the window end
//!    falls strictly inside the text, search backward for the nearest
//!    space; snap the end there when the space sits more than
//!    [`MIN_SNAP_OFFSET`] chars past the window start.
//! 3. Emit a chunk for the span when its trimmed content is non-empty,
//!    assigning the next sequential index.
//! 4. Advance to `end - overlap`; if that makes no progress, jump to `end`
//!    instead so the walk always terminates, even with `overlap >=
//!    chunk_size`.
//!
//! Offsets are char offsets into the normalized text, so multi-byte UTF-8
//! input needs no special casing.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

/// Default window width in chars.
pub const DEFAULT_CHUNK_SIZE: usize = 600;

/// Default overlap between consecutive windows in chars.
pub const DEFAULT_OVERLAP: usize = 120;

/// A window end is only snapped to a space that lies more than this many
/// chars past the window start; closer spaces would produce degenerate
/// slivers, so the hard cut is kept instead.
const MIN_SNAP_OFFSET: usize = 50;

/// Collapse all whitespace runs to single spaces and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a document's normalized text into boundary-snapped chunks.
///
/// Returns chunks with contiguous indices starting at 0. A document
/// shorter than `chunk_size` yields exactly one chunk spanning the whole
/// normalized text.
///
/// # Errors
///
/// `Validation` when `chunk_size` is zero, the document has no workspace
/// id, or its text is empty after normalization.
pub fn chunk_document(document: &Document, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let workspace_id = document
        .workspace_id
        .as_deref()
        .filter(|w| !w.is_empty())
        .ok_or_else(|| Error::validation("Document is missing a workspace id."))?;
    if chunk_size == 0 {
        return Err(Error::validation("chunk_size must be > 0."));
    }

    let normalized: Vec<char> = normalize_text(&document.text).chars().collect();
    let length = normalized.len();
    if length == 0 {
        return Err(Error::validation("Document text is empty."));
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0i64;

    while start < length {
        let mut end = (start + chunk_size).min(length);
        if end < length {
            if let Some(rel) = normalized[start..end].iter().rposition(|c| *c == ' ') {
                let split_at = start + rel;
                if split_at > start + MIN_SNAP_OFFSET {
                    end = split_at;
                }
            }
        }

        let content: String = normalized[start..end].iter().collect();
        let content = content.trim();
        if !content.is_empty() {
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document.id.clone(),
                workspace_id: workspace_id.to_string(),
                content: content.to_string(),
                start_char: start as i64,
                end_char: end as i64,
                chunk_index: index,
                source_title: document.title.clone(),
                source_url: document.source_url.clone(),
            });
            index += 1;
        }

        // Non-regression guard: force forward progress when the overlap
        // would swallow the whole window.
        let next_start = end.saturating_sub(overlap);
        start = if next_start <= start { end } else { next_start };
    }

    Ok(chunks)
}

/// Chunk a batch of documents, concatenating results in input order.
pub fn chunk_documents(
    documents: &[Document],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let mut all = Vec::new();
    for doc in documents {
        all.extend(chunk_document(doc, chunk_size, overlap)?);
    }
    Ok(all)
}
