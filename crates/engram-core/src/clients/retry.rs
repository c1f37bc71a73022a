//! Retry and cost accounting
//!
//! Wraps any external call with the retry schedule (four attempts at ~1s, 2s,
//! 4s, 8s with ±20% multiplicative jitter). Each failed attempt writes a
//! retry row; each success writes exactly one cost row. Log writes are
//! best-effort: they never turn a successful call into a failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::ApiError;
use crate::config::RetryConfig;
use crate::storage::Store;

/// Retry schedule with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delays: Vec<Duration>,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            delays: cfg
                .delays_seconds
                .iter()
                .map(|&s| Duration::from_secs_f64(s.max(0.0)))
                .collect(),
            jitter_pct: cfg.jitter_pct / 100.0,
        }
    }

    /// Zero-delay schedule for tests and scripted clients.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            delays: vec![Duration::ZERO],
            jitter_pct: 0.0,
        }
    }

    /// Backoff before the next attempt, given how many attempts failed so far.
    fn delay_after(&self, failed_attempts: u32) -> Duration {
        let idx = (failed_attempts.saturating_sub(1)) as usize;
        let base = self
            .delays
            .get(idx.min(self.delays.len().saturating_sub(1)))
            .copied()
            .unwrap_or(Duration::ZERO);
        if self.jitter_pct <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter_pct..=self.jitter_pct);
        base.mul_f64(factor.max(0.0))
    }
}

/// Terminal failure after retry exhaustion or a non-retryable error.
#[derive(Debug, thiserror::Error)]
#[error("{api_name} failed after {attempts} attempt(s): {source}")]
pub struct TerminalFailure {
    pub api_name: String,
    pub attempts: u32,
    #[source]
    pub source: ApiError,
}

/// Value plus the token/cost accounting of the attempt that produced it.
#[derive(Debug, Clone)]
pub struct CallOutcome<T> {
    pub value: T,
    pub tokens: u64,
    pub cost: f64,
}

impl<T> CallOutcome<T> {
    pub fn new(value: T, tokens: u64, cost: f64) -> Self {
        Self { value, tokens, cost }
    }

    /// A result with no billable usage (health pings and the like).
    pub fn unmetered(value: T) -> Self {
        Self {
            value,
            tokens: 0,
            cost: 0.0,
        }
    }
}

/// Run `op` under the retry schedule, logging each failed attempt and the
/// final success to the operational tables.
///
/// `op` receives the 1-based attempt number.
pub async fn call_with_retry<T, F, Fut>(
    store: &Store,
    api_name: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<CallOutcome<T>, TerminalFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<CallOutcome<T>, ApiError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(outcome) => {
                if outcome.tokens > 0 || outcome.cost > 0.0 {
                    if let Err(e) = store.log_cost(api_name, outcome.tokens, outcome.cost) {
                        tracing::warn!(api = api_name, "Cost log write failed: {}", e);
                    }
                }
                return Ok(outcome);
            }
            Err(error) => {
                if let Err(e) = store.log_retry(api_name, error.kind(), attempt, false) {
                    tracing::warn!(api = api_name, "Retry log write failed: {}", e);
                }
                let retryable = error.is_retryable();
                if !retryable || attempt >= policy.attempts {
                    if retryable {
                        tracing::warn!(
                            api = api_name,
                            attempts = attempt,
                            "Retries exhausted: {}",
                            error
                        );
                    } else {
                        tracing::warn!(api = api_name, "Non-retryable failure: {}", error);
                    }
                    return Err(TerminalFailure {
                        api_name: api_name.to_string(),
                        attempts: attempt,
                        source: error,
                    });
                }
                let delay = policy.delay_after(attempt);
                tracing::debug!(
                    api = api_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after {}",
                    error
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
