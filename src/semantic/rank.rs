//! Cosine similarity ranking over a corpus index.
//!
//! Linear scan per query vector. Results are ordered by descending score,
//! with exact ties broken by document order and then passage order.

use std::path::PathBuf;

use serde::Serialize;

use crate::semantic::index::{l2_norm, CorpusIndex, IndexEntry};
use crate::semantic::segment::TimeInterval;

/// One ranked passage for one query term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub term: String,
    /// 1-based position within the term's results
    pub rank: usize,
    pub score: f32,
    pub document: PathBuf,
    pub document_name: String,
    pub passage: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeInterval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Rank every passage of `index` against `query`.
///
/// # Arguments
/// * `query` - The query embedding vector
/// * `max_results` - Maximum number of results to return
/// * `min_score` - Drop results scoring below this, if set
/// * `term` - Query term recorded on each result
pub fn rank(
    query: &[f32],
    index: &CorpusIndex,
    max_results: usize,
    min_score: Option<f32>,
    term: &str,
) -> Vec<SearchResult> {
    let query_norm = l2_norm(query);

    let mut scored: Vec<(usize, f32)> = index
        .entries()
        .iter()
        .enumerate()
        .map(|(position, entry)| (position, score_entry(query, query_norm, entry)))
        .filter(|(_, score)| min_score.map_or(true, |min| *score >= min))
        .collect();

    // entries are stored in document/passage order, so position breaks ties
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(max_results);

    scored
        .into_iter()
        .enumerate()
        .filter_map(|(i, (position, score))| {
            let entry = &index.entries()[position];
            let document = index.documents().get(entry.document)?;
            let passage = document.passages.get(entry.passage)?;
            Some(SearchResult {
                term: term.to_string(),
                rank: i + 1,
                score,
                document: document.id.clone(),
                document_name: document.name.clone(),
                passage: passage.index,
                text: passage.text.clone(),
                time: passage.time,
                speaker: passage.speaker.clone(),
            })
        })
        .collect()
}

fn score_entry(query: &[f32], query_norm: f32, entry: &IndexEntry) -> f32 {
    if entry.embedding.len() != query.len() {
        return 0.0;
    }
    cosine_similarity(query, query_norm, &entry.embedding, entry.norm)
}

/// Cosine similarity with both norms precomputed. Zero-norm vectors and
/// non-finite results score 0.
pub fn cosine_similarity(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm < f32::EPSILON || b_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let score = dot_product / (a_norm * b_norm);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::cache::EmbeddingCache;
    use crate::semantic::cancel::CancelToken;
    use crate::semantic::embedder::Embedder;
    use crate::semantic::segment::Segmenter;
    use crate::tests::support::HashingLoader;
    use std::sync::Arc;

    fn similarity(a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, l2_norm(a), b, l2_norm(b))
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
    }

    fn index_over(files: &[(&str, &str)], cache: Arc<EmbeddingCache>) -> (tempfile::TempDir, CorpusIndex) {
        let tmp = tempfile::tempdir().unwrap();
        for (name, text) in files {
            std::fs::write(tmp.path().join(name), text).unwrap();
        }
        let embedder = Embedder::new(Arc::new(HashingLoader::default()), cache, 16);
        let index = CorpusIndex::build(
            &[tmp.path().to_path_buf()],
            "m",
            &embedder,
            &Segmenter::default(),
            &CancelToken::new(),
        )
        .unwrap();
        (tmp, index)
    }

    #[test]
    fn test_exact_ties_follow_document_then_passage_order() {
        let cache = Arc::new(EmbeddingCache::in_memory());
        // every passage gets the same vector, so every score ties
        for text in ["One.", "Two.", "Three."] {
            cache.insert("m", text, vec![1.0, 1.0]);
        }
        let (_tmp, index) = index_over(&[("b.txt", "Three."), ("a.txt", "One. Two.")], cache);

        let results = rank(&[1.0, 1.0], &index, 10, None, "q");
        let order: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();

        assert_eq!(order, vec!["One.", "Two.", "Three."]);
        assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rank(&[1.0, 1.0], &index, 10, None, "q"), results);
    }

    #[test]
    fn test_orders_by_score_and_truncates() {
        let cache = Arc::new(EmbeddingCache::in_memory());
        cache.insert("m", "Far.", vec![0.0, 1.0]);
        cache.insert("m", "Near.", vec![1.0, 0.1]);
        cache.insert("m", "Middle.", vec![1.0, 1.0]);
        let (_tmp, index) = index_over(&[("a.txt", "Far. Near. Middle.")], cache);

        let results = rank(&[1.0, 0.0], &index, 2, None, "q");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "Near.");
        assert_eq!(results[1].text, "Middle.");
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].term, "q");
    }

    #[test]
    fn test_min_score_filters() {
        let cache = Arc::new(EmbeddingCache::in_memory());
        cache.insert("m", "Far.", vec![0.0, 1.0]);
        cache.insert("m", "Near.", vec![1.0, 0.0]);
        let (_tmp, index) = index_over(&[("a.txt", "Far. Near.")], cache);

        let results = rank(&[1.0, 0.0], &index, 10, Some(0.5), "q");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Near.");
    }

    #[test]
    fn test_empty_index_and_zero_results() {
        let (_tmp, index) = index_over(&[], Arc::new(EmbeddingCache::in_memory()));
        assert!(rank(&[1.0], &index, 10, None, "q").is_empty());

        let (_tmp, index) = index_over(&[("a.txt", "Text.")], Arc::new(EmbeddingCache::in_memory()));
        assert!(rank(&[1.0], &index, 0, None, "q").is_empty());
    }
}
