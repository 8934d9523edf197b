pub mod provider;
pub mod search;
pub mod store;

pub use provider::{Embedder, EmbeddingProvider};
pub use store::{CorpusIndex, CorpusStats, Subscription};

/// Default fragment length, in characters
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default number of fragments returned by a similarity search
pub const DEFAULT_TOP_K: usize = 3;

/// A fragment of an indexed document with its embedding
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub source: String,
    pub category: String,
    pub embedding: Vec<f32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// An index entry scored against a query
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Cosine similarity between two vectors of equal length.
///
/// A zero-magnitude operand yields 0.0 rather than NaN. Callers are expected
/// to check dimensions first; mismatched lengths also yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    // Rounding can push |a·b| a hair past ‖a‖‖b‖
    (dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0)
}

/// Split text into consecutive, non-overlapping fragments of at most
/// `max_chunk_size` characters. Concatenating the result yields `text`.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<String> {
    let max_chunk_size = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == max_chunk_size {
            chunks.push(text[start..idx].to_string());
            start = idx;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(text[start..].to_string());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── chunk_text ─────────────────────────────────────────────────────────

    #[test]
    fn test_chunk_text_empty_input() {
        assert!(chunk_text("", 500).is_empty());
    }

    #[test]
    fn test_chunk_text_1200_chars_gives_500_500_200() {
        let text = "a".repeat(1200);
        let chunks = chunk_text(&text, 500);
        let lens: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lens, vec![500, 500, 200]);
    }

    #[test]
    fn test_chunk_text_reconstructs_original() {
        let text = "The quick brown fox\n\njumps over the lazy dog. ".repeat(37);
        for size in [1, 7, 50, 500, 5000] {
            let chunks = chunk_text(&text, size);
            assert_eq!(chunks.concat(), text);
            assert!(chunks.iter().all(|c| c.chars().count() <= size));
        }
    }

    #[test]
    fn test_chunk_text_counts_chars_not_bytes() {
        let text = "héllo wörld ünïcode ✓✓✓";
        let chunks = chunk_text(text, 4);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(chunks[0], "héll");
    }

    #[test]
    fn test_chunk_text_exact_multiple_has_no_empty_tail() {
        let chunks = chunk_text(&"x".repeat(1000), 500);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_chunk_text_zero_size_is_clamped() {
        let chunks = chunk_text("abc", 0);
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    // ── cosine_similarity ──────────────────────────────────────────────────

    #[test]
    fn test_cosine_identical_is_one() {
        let v = vec![0.3, -1.2, 4.0, 0.01];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_is_symmetric_and_bounded() {
        let a = vec![1.0, 2.0, -3.0];
        let b = vec![-0.5, 4.0, 1.5];
        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);
        assert!((ab - ba).abs() < 1e-6);
        assert!((-1.0..=1.0).contains(&ab));
    }

    #[test]
    fn test_cosine_opposite_is_minus_one() {
        let sim = cosine_similarity(&[2.0, 0.0], &[-2.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero_not_nan() {
        let sim = cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
        assert_eq!(sim, 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }
}
