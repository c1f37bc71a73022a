//! Budget Monitor
//!
//! Monthly cost aggregation, linear projection, and threshold alerts with
//! per-day deduplication. Early-month projections swing hard (one expensive
//! day on the 2nd doubles the projection); callers should treat days 1-5 as
//! indicative only.

use chrono::{DateTime, Datelike, Utc};
use serde_json::json;

use crate::config::BudgetConfig;
use crate::storage::{StorageError, Store};

/// Budget standing for the current month.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BudgetStatus {
    Under {
        projected: f64,
        limit: f64,
    },
    /// Projection at or above the alert fraction of the limit.
    Alert {
        projected: f64,
        limit: f64,
    },
    /// Projection at or above the limit itself.
    Exceeded {
        projected: f64,
        limit: f64,
    },
}

impl BudgetStatus {
    fn alert_type(&self) -> Option<&'static str> {
        match self {
            BudgetStatus::Under { .. } => None,
            BudgetStatus::Alert { .. } => Some("alert"),
            BudgetStatus::Exceeded { .. } => Some("exceeded"),
        }
    }
}

/// Monthly cost tracking against the configured limit.
pub struct BudgetMonitor {
    store: Store,
    monthly_limit: f64,
    alert_threshold_pct: f64,
}

impl BudgetMonitor {
    pub fn new(store: Store, cfg: &BudgetConfig) -> Self {
        Self {
            store,
            monthly_limit: cfg.monthly_limit_eur,
            alert_threshold_pct: cfg.alert_threshold_pct,
        }
    }

    /// Total spend in `now`'s calendar month.
    pub fn monthly_total(&self, now: DateTime<Utc>) -> Result<f64, StorageError> {
        self.store.monthly_cost_total(now.year(), now.month())
    }

    /// Per-API spend in `now`'s calendar month.
    pub fn monthly_by_api(&self, now: DateTime<Utc>) -> Result<Vec<(String, f64)>, StorageError> {
        self.store.monthly_cost_by_api(now.year(), now.month())
    }

    /// Linear projection: current + average daily spend so far times the days
    /// remaining in the month.
    pub fn project(&self, now: DateTime<Utc>) -> Result<f64, StorageError> {
        let total = self.monthly_total(now)?;
        let days_elapsed = now.day() as f64;
        let days_in_month = days_in_month(now.year(), now.month()) as f64;
        let avg_daily = total / days_elapsed;
        Ok(total + avg_daily * (days_in_month - days_elapsed))
    }

    /// Compare the projection against the configured limit.
    pub fn check(&self, now: DateTime<Utc>) -> Result<BudgetStatus, StorageError> {
        let projected = self.project(now)?;
        let limit = self.monthly_limit;
        let alert_floor = limit * self.alert_threshold_pct / 100.0;
        Ok(if projected >= limit {
            BudgetStatus::Exceeded { projected, limit }
        } else if projected >= alert_floor {
            BudgetStatus::Alert { projected, limit }
        } else {
            BudgetStatus::Under { projected, limit }
        })
    }

    /// Emit an alert for the current status unless one with the same
    /// (date, alert_type) already exists. Returns the alert type written.
    pub fn send_alerts(&self, now: DateTime<Utc>) -> Result<Option<&'static str>, StorageError> {
        let status = self.check(now)?;
        let Some(alert_type) = status.alert_type() else {
            return Ok(None);
        };

        let (projected, limit) = match &status {
            BudgetStatus::Alert { projected, limit }
            | BudgetStatus::Exceeded { projected, limit } => (*projected, *limit),
            BudgetStatus::Under { .. } => unreachable!("under status has no alert type"),
        };
        let payload = json!({
            "projected": projected,
            "limit": limit,
            "monthlyTotal": self.monthly_total(now)?,
        });

        let date = now.date_naive().to_string();
        let written = self.store.insert_budget_alert(&date, alert_type, &payload)?;
        if written {
            tracing::warn!(alert_type, projected, limit, "Budget alert emitted");
            Ok(Some(alert_type))
        } else {
            Ok(None)
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap { 29 } else { 28 }
        }
    }
}
