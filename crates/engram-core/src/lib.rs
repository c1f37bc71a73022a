//! # Engram Core
//!
//! Cognitive memory engine for long-running LLM conversations. Ingests raw
//! dialogue, compresses it into embedded semantic insights, retrieves context
//! by hybrid (vector + lexical + graph) search, scores generated answers with
//! an external deterministic judge, and learns from low-reward outcomes by
//! storing verbalized reflections that resurface on similar future queries.
//!
//! - **Tiered memory**: immutable raw turns (L0), compressed embedded
//!   insights (L2), a bounded working set under LRU+importance eviction,
//!   reflective episodes, and a stale archive.
//! - **Hybrid retrieval**: cosine + FTS5 branches fused by weighted RRF;
//!   multi-query fan-out fused by plain RRF.
//! - **Property graph**: labeled nodes, weighted typed edges, bounded BFS,
//!   bidirectional shortest path under a wall-clock budget.
//! - **Verbal reinforcement**: temperature-0 judging, threshold-gated
//!   reflections, episode recall by query similarity.
//! - **Operational envelope**: retry with jittered backoff, cost accounting,
//!   judge fallback with health-ping recovery, budget projection and alerts,
//!   inter-rater reliability validation of the labeled ground truth.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{EngramConfig, Store, MemoryTiers};
//!
//! let config = EngramConfig::load(None)?;
//! let store = Store::open(config.database.path.clone())?;
//! let turn = store.insert_raw_turn("session-1", "user", "hello", None)?;
//! ```

pub mod budget;
pub mod clients;
pub mod config;
pub mod evaluation;
pub mod graph;
pub mod memory;
pub mod search;
pub mod storage;
pub mod validation;
pub mod vectors;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Configuration
pub use config::{ConfigError, EngramConfig, Secrets};

// Storage layer
pub use storage::{
    BudgetAlertRow, CostRow, EpisodeFilter, EvaluationRow, FallbackRow, GoldenRun, InsightQuery,
    NewGroundTruth, RawTurnQuery, RetryRow, StaleQuery, StorageError, Store,
};

// Memory model
pub use memory::{
    ArchiveReason, CompressionOutcome, Episode, GroundTruthQuery, Insight, MemoryTiers, RawTurn,
    ScoredEpisode, StaleItem, TierError, ValidationRecord, ValidationStatus, WorkingItem,
    WorkingUpsert,
};

// External API clients
pub use clients::{
    ApiError, CallOutcome, Embedder, EmbeddingClient, EmbeddingError, Evaluation, Judge,
    JudgeClient, JudgeError, JudgePrompt, RetryPolicy, TerminalFailure, call_with_retry,
};

// Search
pub use search::{
    FusedSearchResults, HybridSearcher, MAX_TOP_K, MAX_VARIANTS, MultiQueryRetriever,
    ScoredInsight, SearchCounts, SearchError, SearchWeights,
};

// Graph
pub use graph::{
    DEFAULT_NODE_LABEL, GraphEdge, GraphError, GraphNode, GraphService, Neighbor, PathHop,
    PathResult,
};

// Evaluation loop
pub use evaluation::{
    EvaluationError, EvaluationReport, Evaluator, FallbackController, FallbackState,
    JUDGE_SERVICE, LocalEvaluator, should_reflect,
};

// Validation
pub use validation::{
    BIAS_ALPHA, DRIFT_THRESHOLD, GoldenError, GoldenRunner, IrrError, IrrValidator,
    MACRO_KAPPA_GATE, WilcoxonOutcome, agreement_band, classify_query_type,
};

// Budget
pub use budget::{BudgetMonitor, BudgetStatus};

// Vectors
pub use vectors::{EMBEDDING_DIMENSIONS, blob_to_vector, cosine_similarity, vector_to_blob};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
