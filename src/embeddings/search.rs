use super::{cosine_similarity, IndexEntry, RankedResult};
use crate::error::{InferError, Result};

/// Score every entry against the query embedding and keep the best `top_k`.
///
/// The scan is O(entries × dimension). Ties keep insertion order. Any entry
/// whose dimension differs from the query aborts the ranking instead of
/// producing a meaningless score.
pub fn rank(query_embedding: &[f32], entries: &[IndexEntry], top_k: usize) -> Result<Vec<RankedResult>> {
    let mut scored: Vec<(f32, &IndexEntry)> = Vec::with_capacity(entries.len());

    for entry in entries {
        if entry.embedding.len() != query_embedding.len() {
            return Err(InferError::DimensionMismatch {
                expected: query_embedding.len(),
                found: entry.embedding.len(),
            });
        }
        scored.push((cosine_similarity(query_embedding, &entry.embedding), entry));
    }

    // sort_by is stable
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    Ok(scored
        .into_iter()
        .take(top_k)
        .map(|(score, entry)| RankedResult {
            entry: entry.clone(),
            score,
        })
        .collect())
}

/// Render ranked fragments as the body of a retrieval context block
pub fn format_context(results: &[RankedResult]) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "[{} · {}]\n{}",
                r.entry.source,
                r.entry.category,
                r.entry.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
