//! Maximal marginal relevance selection.
//!
//! Given candidates already scored against the query, repeatedly pick the
//! one maximizing
//!
//! ```text
//! λ · sim(q, d) − (1 − λ) · max_{s ∈ selected} sim(d, s)
//! ```
//!
//! so that near-duplicates of an already selected chunk lose to slightly
//! less relevant but different ones.

use crate::embedding::cosine_similarity;
use crate::store::VectorMatch;

/// Indices into `candidates`, in selection order. At most `k`, no repeats.
pub fn select(candidates: &[VectorMatch], k: usize, lambda: f32) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let relevance = candidates[idx].score;
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx].vector, &candidates[s].vector))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Classification};

    fn candidate(id: &str, vector: Vec<f32>, query: &[f32]) -> VectorMatch {
        VectorMatch {
            score: cosine_similarity(query, &vector),
            chunk: Chunk {
                id: id.to_string(),
                text: String::new(),
                source: format!("{}.rs", id),
                classification: Classification::PlainText,
                chunk_index: 0,
                start_offset: 0,
                hash: String::new(),
            },
            vector,
        }
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let q = [1.0, 0.0];
        let c = vec![
            candidate("far", vec![0.0, 1.0], &q),
            candidate("near", vec![1.0, 0.1], &q),
        ];
        assert_eq!(select(&c, 1, 0.5)[0], 1);
    }

    #[test]
    fn test_prefers_diverse_over_duplicate() {
        let q = [1.0, 0.0, 0.0];
        let c = vec![
            candidate("top", vec![1.0, 0.05, 0.0], &q),
            candidate("dup", vec![1.0, 0.06, 0.0], &q),
            candidate("other", vec![0.7, 0.0, 0.7], &q),
        ];
        // "dup" is more relevant than "other" but nearly identical to "top".
        assert!(c[1].score > c[2].score);
        assert_eq!(select(&c, 2, 0.5), vec![0, 2]);
        assert_eq!(select(&c, 2, 0.3), vec![0, 2]);
    }

    #[test]
    fn test_lambda_one_is_plain_relevance() {
        let q = [1.0, 0.0, 0.0];
        let c = vec![
            candidate("top", vec![1.0, 0.05, 0.0], &q),
            candidate("dup", vec![1.0, 0.06, 0.0], &q),
            candidate("other", vec![0.7, 0.0, 0.7], &q),
        ];
        assert_eq!(select(&c, 2, 1.0), vec![0, 1]);
    }

    #[test]
    fn test_no_duplicates_and_bounded() {
        let q = [1.0, 1.0];
        let c: Vec<VectorMatch> = (0..5)
            .map(|i| candidate(&i.to_string(), vec![1.0, i as f32], &q))
            .collect();
        let picked = select(&c, 10, 0.5);
        assert_eq!(picked.len(), 5);
        let mut sorted = picked.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 5);

        assert!(select(&c, 0, 0.5).is_empty());
        assert!(select(&[], 3, 0.5).is_empty());
    }
}
