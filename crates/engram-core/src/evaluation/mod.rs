//! Evaluation Loop
//!
//! Score an answer, persist the evaluation, and learn from low rewards by
//! storing a verbalized reflection as an episode. When the external judge is
//! in fallback the local heuristic evaluator answers instead, flagged as
//! degraded.

mod fallback;
mod local;

use std::sync::Arc;

use crate::clients::{Judge, JudgeError};
use crate::config::EngramConfig;
use crate::memory::{MemoryTiers, TierError};
use crate::storage::{StorageError, Store};

pub use fallback::{FallbackController, FallbackState, JUDGE_SERVICE};
pub use local::LocalEvaluator;

/// Evaluation error type
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error(transparent)]
    Judge(#[from] JudgeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Tier(#[from] TierError),
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub reward: f64,
    pub reasoning: String,
    pub reflection_triggered: bool,
    /// Set when the local evaluator answered instead of the external judge.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<i64>,
}

/// The reflection trigger, kept as a pure function so the threshold can be
/// tuned and tested in isolation. Strictly below: a reward equal to the
/// threshold does not trigger.
pub fn should_reflect(reward: f64, threshold: f64) -> bool {
    reward < threshold
}

/// Drives the evaluate → persist → reflect → episode pipeline.
pub struct Evaluator {
    judge: Arc<dyn Judge>,
    local: LocalEvaluator,
    fallback: Arc<FallbackController>,
    tiers: Arc<MemoryTiers>,
    store: Store,
    reward_threshold: f64,
}

impl Evaluator {
    pub fn new(
        judge: Arc<dyn Judge>,
        fallback: Arc<FallbackController>,
        tiers: Arc<MemoryTiers>,
        store: Store,
        cfg: &EngramConfig,
    ) -> Self {
        Self {
            judge,
            local: LocalEvaluator,
            fallback,
            tiers,
            store,
            reward_threshold: cfg.evaluation.reward_threshold,
        }
    }

    /// Score `(query, context, answer)`, log the evaluation row, and store a
    /// reflective episode when the reward falls below the threshold.
    pub async fn evaluate_answer(
        &self,
        query: &str,
        context_docs: &[String],
        answer: &str,
    ) -> Result<EvaluationReport, EvaluationError> {
        if query.trim().is_empty() || answer.trim().is_empty() {
            return Err(EvaluationError::Invalid(
                "query and answer must be non-empty".to_string(),
            ));
        }

        let (evaluation, degraded) = if self.fallback.is_active(JUDGE_SERVICE) {
            (self.local.evaluate(query, context_docs, answer), true)
        } else {
            match self.judge.evaluate(query, context_docs, answer).await {
                Ok(evaluation) => (evaluation, false),
                Err(JudgeError::Unavailable { attempts, source }) => {
                    // Caught exactly once: activate the controller, then serve
                    // the degraded result. The cost/retry accounting already
                    // happened inside the judge client.
                    self.fallback.activate(
                        JUDGE_SERVICE,
                        &format!("judge unavailable after {attempts} attempt(s): {source}"),
                    );
                    (self.local.evaluate(query, context_docs, answer), true)
                }
                Err(other) => return Err(other.into()),
            }
        };

        self.store.log_evaluation(
            query,
            answer,
            evaluation.reward,
            &evaluation.reasoning,
            evaluation.tokens,
            evaluation.cost,
        )?;

        let mut report = EvaluationReport {
            reward: evaluation.reward,
            reasoning: evaluation.reasoning.clone(),
            reflection_triggered: false,
            degraded,
            warning: degraded.then(|| {
                "external judge unavailable; reward produced by the local heuristic evaluator"
                    .to_string()
            }),
            episode_id: None,
        };

        if should_reflect(evaluation.reward, self.reward_threshold) {
            let reflection = if degraded {
                self.local
                    .reflect(query, answer, evaluation.reward, &evaluation.reasoning)
            } else {
                match self
                    .judge
                    .reflect(query, answer, evaluation.reward, &evaluation.reasoning)
                    .await
                {
                    Ok(text) => text,
                    Err(JudgeError::Unavailable { attempts, source }) => {
                        self.fallback.activate(
                            JUDGE_SERVICE,
                            &format!("judge unavailable after {attempts} attempt(s): {source}"),
                        );
                        self.local
                            .reflect(query, answer, evaluation.reward, &evaluation.reasoning)
                    }
                    Err(other) => return Err(other.into()),
                }
            };

            let episode = self
                .tiers
                .store_episode(query, evaluation.reward, &reflection)
                .await?;
            report.reflection_triggered = true;
            report.episode_id = Some(episode.id);
        }

        Ok(report)
    }
}
