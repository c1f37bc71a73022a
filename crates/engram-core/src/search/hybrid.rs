//! Hybrid Search
//!
//! One query, two branches run in parallel: cosine over the stored insight
//! embeddings and FTS5 lexical ranking over insight content. Each branch
//! over-fetches (K' = max(3K, 50)) and the branches merge under weighted RRF.

use std::sync::Arc;

use crate::clients::{Embedder, EmbeddingError};
use crate::config::RetrievalConfig;
use crate::memory::Insight;
use crate::search::fusion::weighted_rrf;
use crate::storage::{Store, StorageError};
use crate::vectors::{EMBEDDING_DIMENSIONS, cosine_similarity};

/// Upper bound accepted for `top_k`.
pub const MAX_TOP_K: usize = 100;

/// Search error type
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("search task failed: {0}")]
    Internal(String),
}

/// Branch weights, validated to sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct SearchWeights {
    pub semantic: f64,
    pub keyword: f64,
}

impl SearchWeights {
    pub fn new(semantic: f64, keyword: f64) -> Result<Self, SearchError> {
        if !(0.0..=1.0).contains(&semantic) || !(0.0..=1.0).contains(&keyword) {
            return Err(SearchError::Invalid(format!(
                "weights must each be within [0, 1], got semantic={semantic} keyword={keyword}"
            )));
        }
        if (semantic + keyword - 1.0).abs() > 1e-6 {
            return Err(SearchError::Invalid(format!(
                "weights must sum to 1, got {}",
                semantic + keyword
            )));
        }
        Ok(Self { semantic, keyword })
    }

    pub fn from_config(cfg: &RetrievalConfig) -> Result<Self, SearchError> {
        Self::new(cfg.weights.semantic, cfg.weights.keyword)
    }
}

/// An insight scored by hybrid search.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredInsight {
    #[serde(flatten)]
    pub insight: Insight,
    /// Fused score (weighted RRF for single-query search, summed RRF after
    /// multi-query fusion).
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
    /// Which branch(es) surfaced this insight: "semantic", "keyword", "both".
    pub source: &'static str,
}

/// Hybrid searcher over the insight tier.
pub struct HybridSearcher {
    store: Store,
    embedder: Arc<dyn Embedder>,
    rrf_k: f64,
}

impl HybridSearcher {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>, cfg: &RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            rrf_k: cfg.rrf_k,
        }
    }

    /// Run one hybrid query. The vector is computed from `query_text` when
    /// not supplied by the caller.
    pub async fn search(
        &self,
        query_text: &str,
        query_vector: Option<Vec<f32>>,
        top_k: usize,
        weights: SearchWeights,
    ) -> Result<Vec<ScoredInsight>, SearchError> {
        if query_text.trim().is_empty() {
            return Err(SearchError::Invalid("query_text must be non-empty".to_string()));
        }
        if !(1..=MAX_TOP_K).contains(&top_k) {
            return Err(SearchError::Invalid(format!(
                "top_k must be within [1, {MAX_TOP_K}], got {top_k}"
            )));
        }

        let vector = match query_vector {
            Some(v) => {
                if v.len() != EMBEDDING_DIMENSIONS {
                    return Err(SearchError::Invalid(format!(
                        "query_embedding must have {} dimensions, got {}",
                        EMBEDDING_DIMENSIONS,
                        v.len()
                    )));
                }
                v
            }
            None => self.embedder.embed(query_text).await?,
        };

        let fetch = branch_fetch_size(top_k);

        let semantic_store = self.store.clone();
        let semantic_vector = vector.clone();
        let semantic_task = tokio::task::spawn_blocking(move || {
            semantic_candidates(&semantic_store, &semantic_vector, fetch)
        });

        let keyword_store = self.store.clone();
        let keyword_query = query_text.to_string();
        let keyword_task =
            tokio::task::spawn_blocking(move || keyword_store.keyword_search(&keyword_query, fetch));

        let (semantic, keyword) = tokio::try_join!(semantic_task, keyword_task)
            .map_err(|e| SearchError::Internal(e.to_string()))?;
        let semantic = semantic?;
        let keyword = keyword?;

        let fused = weighted_rrf(&semantic, &keyword, weights.semantic, weights.keyword, self.rrf_k);

        let mut results = Vec::with_capacity(top_k.min(fused.len()));
        for doc in fused.into_iter().take(top_k) {
            let insight = self.store.insight(doc.id)?;
            results.push(ScoredInsight {
                insight,
                score: doc.score,
                semantic_score: doc.semantic_score,
                keyword_score: doc.keyword_score,
                source: match (doc.semantic_score.is_some(), doc.keyword_score.is_some()) {
                    (true, true) => "both",
                    (true, false) => "semantic",
                    _ => "keyword",
                },
            });
        }
        Ok(results)
    }
}

/// K' = max(3K, 50): each branch over-fetches so fusion has depth to work with.
fn branch_fetch_size(top_k: usize) -> usize {
    (top_k * 3).max(50)
}

/// Brute-force cosine scan over every stored insight embedding, best first.
fn semantic_candidates(
    store: &Store,
    vector: &[f32],
    limit: usize,
) -> Result<Vec<(i64, f64)>, StorageError> {
    let embeddings = store.insight_embeddings()?;
    let mut scored: Vec<(i64, f64)> = embeddings
        .into_iter()
        .map(|(id, emb)| (id, cosine_similarity(vector, &emb) as f64))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(limit);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngramConfig;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Searches in these tests always supply a precomputed vector, so any
    /// embedding call is a bug.
    struct NoEmbedder;

    #[async_trait]
    impl Embedder for NoEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            panic!("unexpected embed call for {text:?}");
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            panic!("unexpected batch embed call");
        }
    }

    fn axis_vector(axis: usize, value: f32) -> Vec<f32> {
        let mut v = vec![0.0_f32; EMBEDDING_DIMENSIONS];
        v[axis] = value;
        v
    }

    /// Three insights on distinct axes plus one off in keyword-land only.
    async fn seeded_searcher() -> (HybridSearcher, Vec<i64>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("hybrid.db"))).unwrap();

        let mut ids = Vec::new();
        for (axis, content) in [
            (0, "alpha covers the first topic"),
            (1, "beta covers the second topic"),
            (2, "gamma covers the third topic"),
        ] {
            let insight = store
                .insert_insight(content, &axis_vector(axis, 1.0), &[1], None)
                .unwrap();
            ids.push(insight.id);
        }

        let searcher = HybridSearcher::new(
            store,
            std::sync::Arc::new(NoEmbedder),
            &EngramConfig::default().retrieval,
        );
        (searcher, ids, dir)
    }

    /// Query vector leaning mostly on axis 1, slightly on axis 0.
    fn query_vector() -> Vec<f32> {
        let mut v = vec![0.0_f32; EMBEDDING_DIMENSIONS];
        v[0] = 0.4;
        v[1] = 0.9;
        v
    }

    #[tokio::test]
    async fn test_pure_semantic_weights_equal_cosine_order() {
        let (searcher, ids, _dir) = seeded_searcher().await;
        let results = searcher
            .search("unmatched words only", Some(query_vector()), 10, SearchWeights::new(1.0, 0.0).unwrap())
            .await
            .unwrap();

        // Cosine order: axis-1 insight, then axis-0; axis-2 is orthogonal with
        // score 0 but still ranked by the semantic branch.
        assert_eq!(results[0].insight.id, ids[1]);
        assert_eq!(results[1].insight.id, ids[0]);
        assert!(results.iter().all(|r| r.keyword_score.is_none()));
        assert!(results.iter().all(|r| r.source == "semantic"));
    }

    #[tokio::test]
    async fn test_pure_keyword_weights_equal_lexical_order() {
        let (searcher, ids, _dir) = seeded_searcher().await;
        let results = searcher
            .search("beta topic", Some(axis_vector(0, 1.0)), 10, SearchWeights::new(0.0, 1.0).unwrap())
            .await
            .unwrap();

        // "beta" appears only in the second insight, which must lead even
        // though the supplied vector favors the first: the semantic branch
        // contributes nothing at weight 0.
        assert_eq!(results[0].insight.id, ids[1]);
        assert!(results[0].keyword_score.is_some());
    }

    #[tokio::test]
    async fn test_top_k_one_returns_exactly_one() {
        let (searcher, _ids, _dir) = seeded_searcher().await;
        let results = searcher
            .search("topic", Some(query_vector()), 1, SearchWeights::new(0.7, 0.3).unwrap())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_unique_and_scores_monotone() {
        let (searcher, _ids, _dir) = seeded_searcher().await;
        let results = searcher
            .search("covers the topic", Some(query_vector()), 10, SearchWeights::new(0.7, 0.3).unwrap())
            .await
            .unwrap();

        let mut seen = std::collections::HashSet::new();
        for result in &results {
            assert!(seen.insert(result.insight.id), "duplicate id in results");
        }
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let (searcher, _ids, _dir) = seeded_searcher().await;
        let weights = SearchWeights::new(0.7, 0.3).unwrap();

        assert!(matches!(
            searcher.search("", Some(query_vector()), 5, weights).await,
            Err(SearchError::Invalid(_))
        ));
        assert!(matches!(
            searcher.search("q", Some(query_vector()), 0, weights).await,
            Err(SearchError::Invalid(_))
        ));
        assert!(matches!(
            searcher.search("q", Some(query_vector()), 101, weights).await,
            Err(SearchError::Invalid(_))
        ));
        assert!(matches!(
            searcher.search("q", Some(vec![1.0, 2.0]), 5, weights).await,
            Err(SearchError::Invalid(_))
        ));
    }

    #[test]
    fn test_branch_fetch_size_floor() {
        assert_eq!(branch_fetch_size(1), 50);
        assert_eq!(branch_fetch_size(5), 50);
        assert_eq!(branch_fetch_size(17), 51);
        assert_eq!(branch_fetch_size(100), 300);
    }

    #[test]
    fn test_weights_validation() {
        assert!(SearchWeights::new(0.7, 0.3).is_ok());
        assert!(SearchWeights::new(1.0, 0.0).is_ok());
        assert!(SearchWeights::new(0.0, 0.0).is_err());
        assert!(SearchWeights::new(0.9, 0.3).is_err());
        assert!(SearchWeights::new(-0.1, 1.1).is_err());
    }
}
