//! Tool error envelope
//!
//! Every failed tool or resource call surfaces as
//! `{error: <kind>, details: <message>, tool: <name>}` inside the JSON-RPC
//! error response. Core errors map onto the visible kinds here, at the
//! protocol boundary, so handlers just use `?`.

use engram_core::{
    EvaluationError, GoldenError, GraphError, IrrError, JudgeError, SearchError, StorageError,
    TierError,
};
use serde_json::{Value, json};

/// Visible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotConnected,
    Storage,
    PoolExhausted,
    Embedding,
    JudgeUnavailable,
    Schema,
    NotFound,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotConnected => "NotConnected",
            ErrorKind::Storage => "StorageError",
            ErrorKind::PoolExhausted => "PoolExhausted",
            ErrorKind::Embedding => "EmbeddingError",
            ErrorKind::JudgeUnavailable => "JudgeUnavailable",
            ErrorKind::Schema => "SchemaError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "InternalError",
        }
    }
}

/// A failed tool call, pre-envelope.
#[derive(Debug, thiserror::Error)]
#[error("{}: {details}", kind.as_str())]
pub struct ToolError {
    pub kind: ErrorKind,
    pub details: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: details.into(),
        }
    }

    pub fn validation(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, details)
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, details)
    }

    /// The wire envelope for this failure.
    pub fn envelope(&self, tool: &str) -> Value {
        json!({
            "error": self.kind.as_str(),
            "details": self.details,
            "tool": tool,
        })
    }
}

impl From<StorageError> for ToolError {
    fn from(e: StorageError) -> Self {
        let kind = match &e {
            StorageError::NotConnected => ErrorKind::NotConnected,
            StorageError::PoolExhausted => ErrorKind::PoolExhausted,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Invalid(_) => ErrorKind::Validation,
            _ => ErrorKind::Storage,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<TierError> for ToolError {
    fn from(e: TierError) -> Self {
        match e {
            TierError::Invalid(msg) => Self::validation(msg),
            TierError::Storage(inner) => inner.into(),
            TierError::Embedding(inner) => inner.into(),
        }
    }
}

impl From<engram_core::EmbeddingError> for ToolError {
    fn from(e: engram_core::EmbeddingError) -> Self {
        Self::new(ErrorKind::Embedding, e.to_string())
    }
}

impl From<JudgeError> for ToolError {
    fn from(e: JudgeError) -> Self {
        let kind = match &e {
            JudgeError::Schema(_) => ErrorKind::Schema,
            _ => ErrorKind::JudgeUnavailable,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<SearchError> for ToolError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Invalid(msg) => Self::validation(msg),
            SearchError::Storage(inner) => inner.into(),
            SearchError::Embedding(inner) => inner.into(),
            SearchError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<GraphError> for ToolError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Invalid(msg) => Self::validation(msg),
            GraphError::NotFound(name) => Self::new(ErrorKind::NotFound, format!("node '{name}'")),
            GraphError::Storage(inner) => inner.into(),
        }
    }
}

impl From<EvaluationError> for ToolError {
    fn from(e: EvaluationError) -> Self {
        match e {
            EvaluationError::Invalid(msg) => Self::validation(msg),
            EvaluationError::Judge(inner) => inner.into(),
            EvaluationError::Storage(inner) => inner.into(),
            EvaluationError::Tier(inner) => inner.into(),
        }
    }
}

impl From<IrrError> for ToolError {
    fn from(e: IrrError) -> Self {
        match e {
            IrrError::Invalid(msg) => Self::validation(msg),
            IrrError::Storage(inner) => inner.into(),
        }
    }
}

impl From<GoldenError> for ToolError {
    fn from(e: GoldenError) -> Self {
        match e {
            GoldenError::Invalid(msg) => Self::validation(msg),
            GoldenError::Storage(inner) => inner.into(),
            GoldenError::Search(inner) => inner.into(),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        Self::validation(format!("arguments failed schema validation: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let err = ToolError::validation("weights must sum to 1");
        let envelope = err.envelope("hybrid_search");
        assert_eq!(envelope["error"], "ValidationError");
        assert_eq!(envelope["details"], "weights must sum to 1");
        assert_eq!(envelope["tool"], "hybrid_search");
    }

    #[test]
    fn test_storage_error_mapping() {
        assert_eq!(
            ToolError::from(StorageError::PoolExhausted).kind,
            ErrorKind::PoolExhausted
        );
        assert_eq!(
            ToolError::from(StorageError::NotFound("x".to_string())).kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            ToolError::from(StorageError::Invalid("x".to_string())).kind,
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_judge_error_mapping() {
        assert_eq!(
            ToolError::from(JudgeError::Schema("bad".to_string())).kind,
            ErrorKind::Schema
        );
    }
}
