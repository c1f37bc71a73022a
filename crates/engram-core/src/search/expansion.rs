//! Multi-query retrieval
//!
//! The host supplies N query variants (it generates them inside its own
//! reasoning; this component never invents variants). All N texts are
//! embedded in one batch call, the N hybrid searches run in parallel, and the
//! union is deduplicated by insight id and fused with plain RRF.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use lru::LruCache;

use crate::clients::Embedder;
use crate::config::RetrievalConfig;
use crate::search::fusion::multi_query_rrf;
use crate::search::hybrid::{HybridSearcher, MAX_TOP_K, ScoredInsight, SearchError, SearchWeights};

/// Most variants accepted per call (the original query plus up to four
/// rewrites).
pub const MAX_VARIANTS: usize = 5;

/// Result of a multi-query search.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedSearchResults {
    pub results: Vec<ScoredInsight>,
    pub counts: SearchCounts,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCounts {
    pub variants: usize,
    /// Distinct insights across all branch results before the final cut.
    pub candidates: usize,
    pub final_results: usize,
}

/// Fan-out retriever over [`HybridSearcher`].
pub struct MultiQueryRetriever {
    hybrid: Arc<HybridSearcher>,
    embedder: Arc<dyn Embedder>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    rrf_k: f64,
    default_top_k: usize,
}

impl MultiQueryRetriever {
    pub fn new(
        hybrid: Arc<HybridSearcher>,
        embedder: Arc<dyn Embedder>,
        cfg: &RetrievalConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(cfg.query_cache_size.max(1))
            .expect("cache capacity is at least one");
        Self {
            hybrid,
            embedder,
            query_cache: Mutex::new(LruCache::new(capacity)),
            rrf_k: cfg.rrf_k,
            default_top_k: cfg.default_top_k,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Run the N-variant fan-out and fuse.
    pub async fn search(
        &self,
        variants: &[String],
        top_k: usize,
        weights: SearchWeights,
    ) -> Result<FusedSearchResults, SearchError> {
        if variants.is_empty() || variants.len() > MAX_VARIANTS {
            return Err(SearchError::Invalid(format!(
                "expected 1..={MAX_VARIANTS} query variants, got {}",
                variants.len()
            )));
        }
        if variants.iter().any(|v| v.trim().is_empty()) {
            return Err(SearchError::Invalid("query variants must be non-empty".to_string()));
        }
        if !(1..=MAX_TOP_K).contains(&top_k) {
            return Err(SearchError::Invalid(format!(
                "top_k must be within [1, {MAX_TOP_K}], got {top_k}"
            )));
        }

        let vectors = self.embed_variants(variants).await?;

        // One hybrid search per variant, concurrently.
        let searches = variants
            .iter()
            .zip(vectors.into_iter())
            .map(|(text, vector)| self.hybrid.search(text, Some(vector), top_k, weights));
        let branch_lists: Vec<Vec<ScoredInsight>> = join_all(searches)
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        // Dedup the union by id, keeping the highest-scoring occurrence.
        let mut best_by_id: std::collections::HashMap<i64, ScoredInsight> =
            std::collections::HashMap::new();
        for hit in branch_lists.iter().flat_map(|list| list.iter()) {
            let replace = match best_by_id.get(&hit.insight.id) {
                Some(existing) => hit.score > existing.score,
                None => true,
            };
            if replace {
                best_by_id.insert(hit.insight.id, hit.clone());
            }
        }
        let candidates = best_by_id.len();

        // Fuse across variants by rank.
        let id_lists: Vec<Vec<i64>> = branch_lists
            .iter()
            .map(|list| list.iter().map(|hit| hit.insight.id).collect())
            .collect();
        let fused = multi_query_rrf(&id_lists, self.rrf_k);

        let mut results = Vec::with_capacity(top_k.min(fused.len()));
        for (id, fused_score) in fused.into_iter().take(top_k) {
            let mut hit = best_by_id
                .remove(&id)
                .expect("fused ids come from the branch lists");
            hit.score = fused_score;
            results.push(hit);
        }

        let counts = SearchCounts {
            variants: variants.len(),
            candidates,
            final_results: results.len(),
        };
        Ok(FusedSearchResults { results, counts })
    }

    /// Resolve variant embeddings through the LRU cache; everything missing
    /// goes out in a single batch call.
    async fn embed_variants(&self, variants: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut resolved: Vec<Option<Vec<f32>>> = Vec::with_capacity(variants.len());
        let mut missing: Vec<String> = Vec::new();
        {
            let mut cache = self.query_cache.lock().expect("query cache lock poisoned");
            for text in variants {
                match cache.get(text) {
                    Some(vector) => resolved.push(Some(vector.clone())),
                    None => {
                        resolved.push(None);
                        if !missing.contains(text) {
                            missing.push(text.clone());
                        }
                    }
                }
            }
        }

        if !missing.is_empty() {
            let fresh = self.embedder.embed_batch(&missing).await?;
            let mut cache = self.query_cache.lock().expect("query cache lock poisoned");
            for (text, vector) in missing.iter().zip(fresh.iter()) {
                cache.put(text.clone(), vector.clone());
            }
            for (slot, text) in resolved.iter_mut().zip(variants.iter()) {
                if slot.is_none() {
                    let idx = missing
                        .iter()
                        .position(|m| m == text)
                        .expect("missing texts cover unresolved slots");
                    *slot = Some(fresh[idx].clone());
                }
            }
        }

        Ok(resolved
            .into_iter()
            .map(|v| v.expect("every variant resolved"))
            .collect())
    }
}
