//! Embeddings client
//!
//! Text to fixed 1536-dimension vectors via an OpenAI-style `/embeddings`
//! endpoint. Deterministic model id, dimension enforced at this boundary.
//! There is no fallback: embeddings sit on the write critical path, so a
//! terminal failure here surfaces as-is.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::retry::{CallOutcome, RetryPolicy, TerminalFailure, call_with_retry};
use super::{ApiError, Embedder};
use crate::config::EmbeddingsConfig;
use crate::storage::Store;
use crate::vectors::EMBEDDING_DIMENSIONS;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Name used in cost and retry rows.
pub const EMBEDDINGS_API: &str = "embeddings";

/// Embedding client error
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Retries exhausted or a non-retryable API failure
    #[error("embeddings API failed after {attempts} attempt(s): {source}")]
    Terminal {
        attempts: u32,
        #[source]
        source: ApiError,
    },
    /// The API returned vectors of the wrong dimension
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// HTTP client could not be constructed
    #[error("embedding client init failed: {0}")]
    Init(String),
}

impl From<TerminalFailure> for EmbeddingError {
    fn from(f: TerminalFailure) -> Self {
        EmbeddingError::Terminal {
            attempts: f.attempts,
            source: f.source,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// OpenAI-style embeddings API client.
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    cost_per_1k: f64,
    store: Store,
    policy: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(
        cfg: &EmbeddingsConfig,
        policy: RetryPolicy,
        api_key: String,
        store: Store,
    ) -> Result<Self, EmbeddingError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::Init(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model_id.clone(),
            cost_per_1k: cfg.cost_per_1k_eur,
            store,
            policy,
        })
    }

}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = call_with_retry(&self.store, EMBEDDINGS_API, &self.policy, |_| async move {
            let url = format!("{}/embeddings", self.base_url);
            let body = EmbeddingsRequest {
                model: &self.model,
                input: texts,
            };
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status().as_u16();
            let text = response.text().await?;
            if !(200..300).contains(&status) {
                return Err(ApiError::from_status(status, &text));
            }

            let parsed: EmbeddingsResponse =
                serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))?;
            if parsed.data.len() != texts.len() {
                return Err(ApiError::Schema(format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                )));
            }

            let tokens = parsed.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
            let cost = tokens as f64 / 1000.0 * self.cost_per_1k;
            let mut data = parsed.data;
            data.sort_by_key(|d| d.index);
            let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
            Ok(CallOutcome::new(vectors, tokens, cost))
        })
        .await?;

        for vector in &outcome.value {
            if vector.len() != EMBEDDING_DIMENSIONS {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: EMBEDDING_DIMENSIONS,
                    got: vector.len(),
                });
            }
        }
        Ok(outcome.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape_parses() {
        let raw = r#"{
            "data": [
                {"embedding": [0.1, 0.2], "index": 1},
                {"embedding": [0.3, 0.4], "index": 0}
            ],
            "usage": {"total_tokens": 12}
        }"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn test_terminal_conversion_keeps_attempts() {
        let failure = TerminalFailure {
            api_name: EMBEDDINGS_API.to_string(),
            attempts: 4,
            source: ApiError::Timeout,
        };
        match EmbeddingError::from(failure) {
            EmbeddingError::Terminal { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
