//! Exact cosine-similarity ranking over a bounded candidate set.
//!
//! No index structures and no approximation: candidates are scored one by
//! one and stably sorted, which keeps results deterministic across
//! repeated runs on identical input.

use std::cmp::Ordering;

use crate::models::{Chunk, RetrievalResult};

/// Substituted for a zero denominator so a degenerate zero vector scores
/// 0.0 instead of producing NaN or infinity.
const NORM_EPSILON: f32 = 1e-12;

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns 0.0 for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let mut denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        denom = NORM_EPSILON;
    }
    dot / denom
}

/// Score every candidate against the query vector and return the top `k`
/// in strictly descending score order.
///
/// Ties keep the original candidate order (stable sort). `top_k` is
/// clamped to `1..=candidates`; requesting zero from a non-empty set still
/// returns one result — a zero or negative caller request is rejected
/// upstream, before ranking. Empty candidate or vector sets produce an
/// empty result, not an error.
pub fn rank_chunks(
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    query_vector: &[f32],
    top_k: usize,
) -> Vec<RetrievalResult> {
    if chunks.is_empty() || vectors.is_empty() {
        return Vec::new();
    }

    let mut results: Vec<RetrievalResult> = chunks
        .iter()
        .zip(vectors.iter())
        .map(|(chunk, vector)| RetrievalResult {
            chunk: chunk.clone(),
            score: cosine_similarity(vector, query_vector),
        })
        .collect();

    // Vec::sort_by is stable, so equal scores preserve candidate order.
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let top_k = top_k.clamp(1, results.len());
    results.truncate(top_k);
    results
}
