//! Configuration
//!
//! Base TOML file plus an `ENGRAM_*` environment overlay. Everything is read
//! in one explicit bootstrap step; no module reads the environment at load
//! time. Secrets (API keys, database path override) come only from the
//! process environment, never from the config file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Top-level configuration for the engine and server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngramConfig {
    pub database: DatabaseConfig,
    pub memory: MemoryConfig,
    pub retrieval: RetrievalConfig,
    pub expansion: ExpansionConfig,
    pub embeddings: EmbeddingsConfig,
    pub evaluation: EvaluationConfig,
    pub episodes: EpisodeConfig,
    pub compression: CompressionConfig,
    pub retry: RetryConfig,
    pub fallback: FallbackConfig,
    pub budget: BudgetConfig,
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file path. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    pub working: WorkingConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working: WorkingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkingConfig {
    /// Maximum number of working-memory items kept at once.
    pub capacity: usize,
    /// Items above this importance are archived rather than discarded on eviction.
    pub critical_threshold: f64,
}

impl Default for WorkingConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            critical_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    pub rrf_k: f64,
    pub default_top_k: usize,
    pub weights: SearchWeightsConfig,
    /// Capacity of the query-embedding LRU cache.
    pub query_cache_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            default_top_k: 5,
            weights: SearchWeightsConfig::default(),
            query_cache_size: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchWeightsConfig {
    pub semantic: f64,
    pub keyword: f64,
}

impl Default for SearchWeightsConfig {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpansionConfig {
    /// How many variants the host is expected to supply beside the original.
    pub num_variants: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self { num_variants: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingsConfig {
    pub model_id: String,
    pub base_url: String,
    /// Estimated EUR per 1k tokens, used for cost accounting.
    pub cost_per_1k_eur: f64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model_id: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            cost_per_1k_eur: 0.00002,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationConfig {
    pub model_id: String,
    pub base_url: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Rewards strictly below this trigger reflection.
    pub reward_threshold: f64,
    /// How many unparseable responses are re-requested before terminal failure.
    pub parse_retries: u32,
    pub cost_per_1k_eur: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            model_id: "claude-haiku-4-5".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            temperature: 0.0,
            max_tokens: 500,
            reward_threshold: 0.3,
            parse_retries: 2,
            cost_per_1k_eur: 0.001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EpisodeConfig {
    /// Episodes below this cosine similarity to the query are not returned.
    pub min_similarity: f64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    /// Caller-supplied fidelity scores below this floor set a warning flag.
    pub fidelity_floor: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            fidelity_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delays_seconds: Vec<f64>,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            delays_seconds: vec![1.0, 2.0, 4.0, 8.0],
            jitter_pct: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    pub healthcheck_interval_seconds: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            healthcheck_interval_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetConfig {
    pub monthly_limit_eur: f64,
    pub alert_threshold_pct: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit_eur: 100.0,
            alert_threshold_pct: 80.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    pub max_neighbors_depth: u32,
    pub max_path_depth: u32,
    pub path_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_neighbors_depth: 5,
            max_path_depth: 10,
            path_timeout_ms: 1000,
        }
    }
}

impl EngramConfig {
    /// Load configuration: defaults, then the optional TOML file, then the
    /// `ENGRAM_*` environment overlay, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overlay();
        config.validate()?;
        Ok(config)
    }

    /// Overlay recognized `ENGRAM_<SECTION>_<KEY>` environment variables.
    /// Unparseable values are ignored with a warning rather than failing boot.
    pub fn apply_env_overlay(&mut self) {
        fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
            if let Ok(raw) = std::env::var(key) {
                match raw.parse() {
                    Ok(v) => *slot = v,
                    Err(_) => tracing::warn!("Ignoring unparseable env override {}={}", key, raw),
                }
            }
        }

        if let Ok(p) = std::env::var("ENGRAM_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(p));
        }
        env_parse("ENGRAM_MEMORY_WORKING_CAPACITY", &mut self.memory.working.capacity);
        env_parse(
            "ENGRAM_MEMORY_WORKING_CRITICAL_THRESHOLD",
            &mut self.memory.working.critical_threshold,
        );
        env_parse("ENGRAM_RETRIEVAL_RRF_K", &mut self.retrieval.rrf_k);
        env_parse("ENGRAM_RETRIEVAL_DEFAULT_TOP_K", &mut self.retrieval.default_top_k);
        env_parse("ENGRAM_RETRIEVAL_WEIGHTS_SEMANTIC", &mut self.retrieval.weights.semantic);
        env_parse("ENGRAM_RETRIEVAL_WEIGHTS_KEYWORD", &mut self.retrieval.weights.keyword);
        env_parse("ENGRAM_EXPANSION_NUM_VARIANTS", &mut self.expansion.num_variants);
        env_parse("ENGRAM_EMBEDDINGS_MODEL_ID", &mut self.embeddings.model_id);
        env_parse("ENGRAM_EMBEDDINGS_BASE_URL", &mut self.embeddings.base_url);
        env_parse("ENGRAM_EVALUATION_MODEL_ID", &mut self.evaluation.model_id);
        env_parse("ENGRAM_EVALUATION_BASE_URL", &mut self.evaluation.base_url);
        env_parse("ENGRAM_EVALUATION_TEMPERATURE", &mut self.evaluation.temperature);
        env_parse("ENGRAM_EVALUATION_MAX_TOKENS", &mut self.evaluation.max_tokens);
        env_parse(
            "ENGRAM_EVALUATION_REWARD_THRESHOLD",
            &mut self.evaluation.reward_threshold,
        );
        env_parse("ENGRAM_RETRY_ATTEMPTS", &mut self.retry.attempts);
        env_parse("ENGRAM_RETRY_JITTER_PCT", &mut self.retry.jitter_pct);
        env_parse(
            "ENGRAM_FALLBACK_HEALTHCHECK_INTERVAL_SECONDS",
            &mut self.fallback.healthcheck_interval_seconds,
        );
        env_parse("ENGRAM_BUDGET_MONTHLY_LIMIT_EUR", &mut self.budget.monthly_limit_eur);
        env_parse(
            "ENGRAM_BUDGET_ALERT_THRESHOLD_PCT",
            &mut self.budget.alert_threshold_pct,
        );
        env_parse("ENGRAM_GRAPH_MAX_NEIGHBORS_DEPTH", &mut self.graph.max_neighbors_depth);
        env_parse("ENGRAM_GRAPH_MAX_PATH_DEPTH", &mut self.graph.max_path_depth);
        env_parse("ENGRAM_GRAPH_PATH_TIMEOUT_MS", &mut self.graph.path_timeout_ms);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.working.capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "memory.working.capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        let w = &self.retrieval.weights;
        if (w.semantic + w.keyword - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid {
                key: "retrieval.weights",
                reason: format!("semantic + keyword must sum to 1, got {}", w.semantic + w.keyword),
            });
        }
        if !(2..=5).contains(&self.expansion.num_variants) {
            return Err(ConfigError::Invalid {
                key: "expansion.num_variants",
                reason: "allowed range is 2..=5".to_string(),
            });
        }
        if !(-1.0..=1.0).contains(&self.evaluation.reward_threshold) {
            return Err(ConfigError::Invalid {
                key: "evaluation.reward_threshold",
                reason: "must be within [-1, 1]".to_string(),
            });
        }
        if self.retry.attempts == 0 || self.retry.delays_seconds.is_empty() {
            return Err(ConfigError::Invalid {
                key: "retry",
                reason: "attempts and delays_seconds must be non-empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Secrets supplied via the process environment at bootstrap.
///
/// Loaded once, before any client or pool is constructed.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub embeddings_api_key: Option<String>,
    pub judge_api_key: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            embeddings_api_key: non_empty("EMBEDDINGS_API_KEY"),
            judge_api_key: non_empty("JUDGE_API_KEY"),
            db_path: non_empty("ENGRAM_DB_PATH").map(PathBuf::from),
        }
    }
}
