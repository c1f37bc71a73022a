//! Fallback controller
//!
//! Process-wide service availability map. Activation is driven by a terminal
//! failure from the retry wrapper on the judge path; recovery is driven only
//! by the periodic health ping. Ping failures never re-trigger activation, so
//! the loop cannot feed itself. Embedding has no fallback by design of the
//! write path, so the only registered service is the judge.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clients::Judge;
use crate::storage::Store;

/// Service name for the judge path.
pub const JUDGE_SERVICE: &str = "haiku_evaluation";

/// Per-service fallback state.
#[derive(Debug, Clone)]
pub struct FallbackState {
    pub active: bool,
    pub activated_at: DateTime<Utc>,
}

/// Guarded service → state map with persisted transitions.
pub struct FallbackController {
    store: Store,
    states: RwLock<HashMap<String, FallbackState>>,
}

impl FallbackController {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Lock-cheap read used on every evaluation call.
    pub fn is_active(&self, service: &str) -> bool {
        self.states
            .read()
            .expect("fallback map lock poisoned")
            .get(service)
            .map(|s| s.active)
            .unwrap_or(false)
    }

    pub fn state(&self, service: &str) -> Option<FallbackState> {
        self.states
            .read()
            .expect("fallback map lock poisoned")
            .get(service)
            .cloned()
    }

    /// Transition a service into fallback. Idempotent: re-activation while
    /// already active writes no second row.
    pub fn activate(&self, service: &str, reason: &str) {
        {
            let mut states = self.states.write().expect("fallback map lock poisoned");
            match states.get(service) {
                Some(state) if state.active => return,
                _ => {
                    states.insert(
                        service.to_string(),
                        FallbackState {
                            active: true,
                            activated_at: Utc::now(),
                        },
                    );
                }
            }
        }
        tracing::warn!(service, reason, "Fallback activated");
        if let Err(e) = self.store.log_fallback(service, "active", Some(reason), None) {
            tracing::warn!(service, "Fallback status write failed: {}", e);
        }
    }

    /// Transition a service back to normal after a successful health ping.
    pub fn recover(&self, service: &str) {
        {
            let mut states = self.states.write().expect("fallback map lock poisoned");
            match states.get_mut(service) {
                Some(state) if state.active => state.active = false,
                _ => return,
            }
        }
        tracing::info!(service, "Fallback recovered");
        if let Err(e) = self.store.log_fallback(service, "recovered", None, None) {
            tracing::warn!(service, "Fallback status write failed: {}", e);
        }
    }

    /// One health-check tick: ping only while the flag is active, recover on
    /// success, and treat ping failure as silence.
    pub async fn health_tick(&self, judge: &dyn Judge) {
        if !self.is_active(JUDGE_SERVICE) {
            return;
        }
        match judge.health_ping().await {
            Ok(()) => self.recover(JUDGE_SERVICE),
            Err(e) => {
                tracing::debug!(service = JUDGE_SERVICE, "Health ping still failing: {}", e);
            }
        }
    }

    /// Periodic health loop, spawned once at bootstrap.
    pub async fn run_health_loop(self: Arc<Self>, judge: Arc<dyn Judge>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so activation gets a full
        // interval before the first recovery probe.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.health_tick(judge.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn controller() -> (FallbackController, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("test.db"))).unwrap();
        (FallbackController::new(store.clone()), dir)
    }

    #[test]
    fn test_activation_writes_one_row() {
        let (ctrl, _dir) = controller();
        assert!(!ctrl.is_active(JUDGE_SERVICE));

        ctrl.activate(JUDGE_SERVICE, "judge failed after 4 attempts");
        ctrl.activate(JUDGE_SERVICE, "still failing");
        assert!(ctrl.is_active(JUDGE_SERVICE));

        let rows = ctrl.store.fallback_rows(Some(JUDGE_SERVICE)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "active");
        assert_eq!(rows[0].reason.as_deref(), Some("judge failed after 4 attempts"));
    }

    #[test]
    fn test_recovery_transition() {
        let (ctrl, _dir) = controller();
        ctrl.activate(JUDGE_SERVICE, "down");
        ctrl.recover(JUDGE_SERVICE);
        assert!(!ctrl.is_active(JUDGE_SERVICE));

        let rows = ctrl.store.fallback_rows(Some(JUDGE_SERVICE)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, "recovered");

        // Recovering an inactive service is a no-op.
        ctrl.recover(JUDGE_SERVICE);
        assert_eq!(ctrl.store.fallback_rows(Some(JUDGE_SERVICE)).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_service_inactive() {
        let (ctrl, _dir) = controller();
        assert!(!ctrl.is_active("something_else"));
        assert!(ctrl.state("something_else").is_none());
    }
}
