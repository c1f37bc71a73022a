//! External API clients
//!
//! The embeddings and judge APIs sit behind the [`Embedder`] and [`Judge`]
//! traits so the rest of the engine (and the e2e harness) never cares which
//! provider is on the other side. Every outbound call goes through the retry
//! wrapper in [`retry`], which owns backoff, retry-row logging, and cost-row
//! logging.

pub mod embedding;
pub mod judge;
pub mod retry;

use async_trait::async_trait;

pub use embedding::{EmbeddingClient, EmbeddingError};
pub use judge::{JudgeClient, JudgeError};
pub use retry::{CallOutcome, RetryPolicy, TerminalFailure, call_with_retry};

/// Classified failure of a single external API attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("server unavailable (status {0})")]
    ServerUnavailable(u16),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("response parse failure: {0}")]
    Parse(String),
    #[error("response schema invalid: {0}")]
    Schema(String),
    #[error("network error: {0}")]
    Network(String),
}

impl ApiError {
    /// Whether the retry schedule applies. Auth failures, non-429 4xx, and
    /// exhausted-schema responses are terminal immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout
                | ApiError::RateLimited
                | ApiError::ServerUnavailable(_)
                | ApiError::Network(_)
                | ApiError::Parse(_)
        )
    }

    /// Short kind tag persisted in retry rows.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Timeout => "timeout",
            ApiError::RateLimited => "rate_limited",
            ApiError::ServerUnavailable(_) => "server_unavailable",
            ApiError::Auth(_) => "auth",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Parse(_) => "parse",
            ApiError::Schema(_) => "schema",
            ApiError::Network(_) => "network",
        }
    }

    /// Classify a non-2xx HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status {
            401 | 403 => ApiError::Auth(snippet),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerUnavailable(status),
            _ => ApiError::BadRequest(format!("status {status}: {snippet}")),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// Outcome of a judged answer.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Scalar in [-1, 1].
    pub reward: f64,
    pub reasoning: String,
    pub tokens: u64,
    pub cost: f64,
}

/// Which of the two labeling prompts scores a document. Two independent
/// phrasings of the same rubric give the rater pair for agreement analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgePrompt {
    Primary,
    Secondary,
}

/// Text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// One API round-trip for the whole batch, order-preserving.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Deterministic scoring of answers and documents.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Score an answer against its query and retrieved context.
    async fn evaluate(
        &self,
        query: &str,
        context_docs: &[String],
        answer: &str,
    ) -> Result<Evaluation, JudgeError>;

    /// Produce a verbal lesson for a low-reward outcome.
    async fn reflect(
        &self,
        query: &str,
        answer: &str,
        reward: f64,
        reasoning: &str,
    ) -> Result<String, JudgeError>;

    /// Relevance of a single document to a query, in [0, 1].
    async fn score_document(
        &self,
        query: &str,
        document: &str,
        prompt: JudgePrompt,
    ) -> Result<f64, JudgeError>;

    /// Minimal round-trip used by fallback recovery.
    async fn health_ping(&self) -> Result<(), JudgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::Timeout.is_retryable());
        assert!(ApiError::RateLimited.is_retryable());
        assert!(ApiError::ServerUnavailable(503).is_retryable());
        assert!(ApiError::Parse("x".to_string()).is_retryable());
        assert!(!ApiError::Auth("denied".to_string()).is_retryable());
        assert!(!ApiError::BadRequest("nope".to_string()).is_retryable());
        assert!(!ApiError::Schema("bad shape".to_string()).is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(ApiError::from_status(401, ""), ApiError::Auth(_)));
        assert!(matches!(ApiError::from_status(429, ""), ApiError::RateLimited));
        assert!(matches!(ApiError::from_status(503, ""), ApiError::ServerUnavailable(503)));
        assert!(matches!(ApiError::from_status(404, ""), ApiError::BadRequest(_)));
    }
}
