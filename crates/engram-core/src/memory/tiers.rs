//! Memory tier lifecycle
//!
//! The compression, working-memory, and episode operations that need the
//! embedder beside the store. Episode embeddings always come from the *query*
//! text, never the reflection, so later retrieval matches on what was asked.

use std::sync::Arc;

use serde_json::Value;

use crate::clients::{Embedder, EmbeddingError};
use crate::config::EngramConfig;
use crate::memory::{Episode, Insight, ScoredEpisode, WorkingUpsert};
use crate::storage::{EpisodeFilter, StorageError, Store};
use crate::vectors::cosine_similarity;

/// Tier operation error
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Outcome of a compression call.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub insight: Insight,
    /// Set when a caller-supplied fidelity score sits below the floor.
    pub fidelity_warning: bool,
}

/// Lifecycle operations over the memory tiers.
pub struct MemoryTiers {
    store: Store,
    embedder: Arc<dyn Embedder>,
    working_capacity: usize,
    critical_threshold: f64,
    fidelity_floor: f64,
    episode_min_similarity: f64,
}

impl MemoryTiers {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>, cfg: &EngramConfig) -> Self {
        Self {
            store,
            embedder,
            working_capacity: cfg.memory.working.capacity,
            critical_threshold: cfg.memory.working.critical_threshold,
            fidelity_floor: cfg.compression.fidelity_floor,
            episode_min_similarity: cfg.episodes.min_similarity,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Compress raw turns into an insight: embed the content, persist the row
    /// with its provenance, flag sub-floor fidelity.
    pub async fn compress(
        &self,
        content: &str,
        source_ids: &[i64],
        metadata: Option<Value>,
    ) -> Result<CompressionOutcome, TierError> {
        if content.trim().is_empty() {
            return Err(TierError::Invalid("content must be non-empty".to_string()));
        }
        if source_ids.is_empty() {
            return Err(TierError::Invalid("source_ids must be non-empty".to_string()));
        }

        let embedding = self.embedder.embed(content).await?;
        let insight = self
            .store
            .insert_insight(content, &embedding, source_ids, metadata.as_ref())?;

        let fidelity_warning = insight
            .fidelity_score()
            .is_some_and(|score| score < self.fidelity_floor);
        if fidelity_warning {
            tracing::warn!(
                insight_id = insight.id,
                fidelity = insight.fidelity_score(),
                floor = self.fidelity_floor,
                "Insight stored with sub-floor fidelity"
            );
        }

        Ok(CompressionOutcome {
            insight,
            fidelity_warning,
        })
    }

    /// Insert into working memory under the configured capacity rule.
    pub fn upsert_working(&self, content: &str, importance: f64) -> Result<WorkingUpsert, TierError> {
        if content.trim().is_empty() {
            return Err(TierError::Invalid("content must be non-empty".to_string()));
        }
        Ok(self.store.upsert_working(
            content,
            importance,
            self.working_capacity,
            self.critical_threshold,
        )?)
    }

    /// Store an episode; the embedding is computed from the query text.
    pub async fn store_episode(
        &self,
        query: &str,
        reward: f64,
        reflection: &str,
    ) -> Result<Episode, TierError> {
        if query.trim().is_empty() || reflection.trim().is_empty() {
            return Err(TierError::Invalid(
                "query and reflection must be non-empty".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&reward) {
            return Err(TierError::Invalid(format!(
                "reward must be within [-1, 1], got {reward}"
            )));
        }

        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.insert_episode(query, reward, reflection, &embedding)?)
    }

    /// Retrieve episodes by query similarity, gated at `min_similarity`
    /// (config default when not supplied).
    pub async fn recall_episodes(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: Option<f64>,
        filter: &EpisodeFilter,
    ) -> Result<Vec<ScoredEpisode>, TierError> {
        if query.trim().is_empty() {
            return Err(TierError::Invalid("query must be non-empty".to_string()));
        }
        let gate = min_similarity.unwrap_or(self.episode_min_similarity);

        let query_vector = self.embedder.embed(query).await?;
        let mut scored: Vec<ScoredEpisode> = self
            .store
            .episodes_with_embeddings(filter)?
            .into_iter()
            .map(|(episode, embedding)| ScoredEpisode {
                similarity: cosine_similarity(&query_vector, &embedding),
                episode,
            })
            .filter(|s| s.similarity as f64 >= gate)
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.episode.id.cmp(&b.episode.id))
        });
        scored.truncate(top_k.max(1));
        Ok(scored)
    }
}
