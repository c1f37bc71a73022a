//! Operational row operations
//!
//! Cost, retry, evaluation, fallback, and budget-alert rows, plus the labeled
//! ground-truth set and validation/golden-run records. Log rows are
//! independent; there are no cross-row invariants.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;

use super::{Result, StorageError, Store, parse_json_column, parse_json_required};
use crate::memory::{GroundTruthQuery, ValidationRecord, ValidationStatus};

/// One successful external call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRow {
    pub id: i64,
    pub date: String,
    pub api_name: String,
    pub calls: i64,
    pub tokens: i64,
    pub estimated_cost: f64,
}

/// One failed external attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub api_name: String,
    pub error_kind: String,
    pub retry_count: i64,
    pub success: bool,
}

/// One scored answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub query: String,
    pub answer: String,
    pub reward: f64,
    pub rationale: String,
    pub tokens: i64,
    pub cost: f64,
}

/// One fallback transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub service_name: String,
    pub status: String,
    pub reason: Option<String>,
    pub metadata: Option<Value>,
}

/// One emitted budget alert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlertRow {
    pub id: i64,
    pub date: String,
    pub alert_type: String,
    pub payload: Option<Value>,
}

/// One golden retrieval regression run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoldenRun {
    pub id: i64,
    pub date: String,
    pub precision_at_5: f64,
    pub baseline_precision: Option<f64>,
    pub drift_detected: bool,
    pub by_query_type: Value,
}

/// Fields of a new ground-truth row.
#[derive(Debug, Clone)]
pub struct NewGroundTruth {
    pub query: String,
    pub query_type: String,
    pub expected_doc_ids: Vec<i64>,
    pub judge1_scores: Vec<f64>,
    pub judge2_scores: Vec<f64>,
    pub kappa: Option<f64>,
    pub prompt_version: String,
}

impl Store {
    // ========================================================================
    // COST / RETRY / EVALUATION / FALLBACK
    // ========================================================================

    pub fn log_cost(&self, api_name: &str, tokens: u64, estimated_cost: f64) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO api_cost_log (date, api_name, calls, tokens, estimated_cost)
             VALUES (?1, ?2, 1, ?3, ?4)",
            params![today(), api_name, tokens as i64, estimated_cost],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn log_retry(
        &self,
        api_name: &str,
        error_kind: &str,
        retry_count: u32,
        success: bool,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO api_retry_log (created_at, api_name, error_kind, retry_count, success)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![Utc::now(), api_name, error_kind, retry_count as i64, success],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn retry_rows(&self, api_name: Option<&str>) -> Result<Vec<RetryRow>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, created_at, api_name, error_kind, retry_count, success
             FROM api_retry_log",
        );
        if api_name.is_some() {
            sql.push_str(" WHERE api_name = ?1");
        }
        sql.push_str(" ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(RetryRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
                api_name: row.get(2)?,
                error_kind: row.get(3)?,
                retry_count: row.get(4)?,
                success: row.get(5)?,
            })
        };
        let rows = match api_name {
            Some(name) => stmt.query_map([name], map)?,
            None => stmt.query_map([], map)?,
        };
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn cost_rows(&self, api_name: Option<&str>) -> Result<Vec<CostRow>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, date, api_name, calls, tokens, estimated_cost FROM api_cost_log",
        );
        if api_name.is_some() {
            sql.push_str(" WHERE api_name = ?1");
        }
        sql.push_str(" ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(CostRow {
                id: row.get(0)?,
                date: row.get(1)?,
                api_name: row.get(2)?,
                calls: row.get(3)?,
                tokens: row.get(4)?,
                estimated_cost: row.get(5)?,
            })
        };
        let rows = match api_name {
            Some(name) => stmt.query_map([name], map)?,
            None => stmt.query_map([], map)?,
        };
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Total estimated cost for a calendar month.
    pub fn monthly_cost_total(&self, year: i32, month: u32) -> Result<f64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(estimated_cost), 0.0) FROM api_cost_log WHERE date LIKE ?1",
            [month_prefix(year, month)],
            |row| row.get(0),
        )?)
    }

    /// Per-API cost totals for a calendar month.
    pub fn monthly_cost_by_api(&self, year: i32, month: u32) -> Result<Vec<(String, f64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT api_name, SUM(estimated_cost) FROM api_cost_log WHERE date LIKE ?1
             GROUP BY api_name ORDER BY api_name ASC",
        )?;
        let rows = stmt.query_map([month_prefix(year, month)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn log_evaluation(
        &self,
        query: &str,
        answer: &str,
        reward: f64,
        rationale: &str,
        tokens: u64,
        cost: f64,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO evaluation_log (created_at, query, answer, reward, rationale, tokens, cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![Utc::now(), query, answer, reward, rationale, tokens as i64, cost],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn evaluation_rows(&self, limit: usize) -> Result<Vec<EvaluationRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, query, answer, reward, rationale, tokens, cost
             FROM evaluation_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(EvaluationRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
                query: row.get(2)?,
                answer: row.get(3)?,
                reward: row.get(4)?,
                rationale: row.get(5)?,
                tokens: row.get(6)?,
                cost: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn log_fallback(
        &self,
        service_name: &str,
        status: &str,
        reason: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO fallback_status_log (created_at, service_name, status, reason, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Utc::now(),
                service_name,
                status,
                reason,
                metadata.map(|m| m.to_string())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn fallback_rows(&self, service_name: Option<&str>) -> Result<Vec<FallbackRow>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, created_at, service_name, status, reason, metadata
             FROM fallback_status_log",
        );
        if service_name.is_some() {
            sql.push_str(" WHERE service_name = ?1");
        }
        sql.push_str(" ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, DateTime<Utc>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        };
        let rows = match service_name {
            Some(name) => stmt.query_map([name], map)?,
            None => stmt.query_map([], map)?,
        };
        let mut out = Vec::new();
        for row in rows {
            let (id, created_at, service_name, status, reason, metadata) = row?;
            out.push(FallbackRow {
                id,
                created_at,
                service_name,
                status,
                reason,
                metadata: parse_json_column(metadata, "fallback_status_log.metadata")?,
            });
        }
        Ok(out)
    }

    // ========================================================================
    // BUDGET ALERTS
    // ========================================================================

    /// Insert an alert unless one with the same (date, alert_type) exists.
    /// Returns whether a row was written.
    pub fn insert_budget_alert(&self, date: &str, alert_type: &str, payload: &Value) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO budget_alerts (date, alert_type, payload) VALUES (?1, ?2, ?3)",
            params![date, alert_type, payload.to_string()],
        )?;
        Ok(changed == 1)
    }

    pub fn budget_alert_rows(&self) -> Result<Vec<BudgetAlertRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, date, alert_type, payload FROM budget_alerts ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, date, alert_type, payload) = row?;
            out.push(BudgetAlertRow {
                id,
                date,
                alert_type,
                payload: parse_json_column(payload, "budget_alerts.payload")?,
            });
        }
        Ok(out)
    }

    // ========================================================================
    // GROUND TRUTH / VALIDATION / GOLDEN RUNS
    // ========================================================================

    pub fn insert_ground_truth(&self, new: &NewGroundTruth) -> Result<GroundTruthQuery> {
        if new.judge1_scores.len() != new.judge2_scores.len() {
            return Err(StorageError::Invalid(
                "judge score arrays must be the same length".to_string(),
            ));
        }
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ground_truth_queries
             (query, query_type, expected_doc_ids, judge1_scores, judge2_scores, kappa,
              human_override, override_reason, prompt_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7, ?8)",
            params![
                new.query,
                new.query_type,
                serde_json::to_string(&new.expected_doc_ids).expect("id list serializes"),
                serde_json::to_string(&new.judge1_scores).expect("score list serializes"),
                serde_json::to_string(&new.judge2_scores).expect("score list serializes"),
                new.kappa.filter(|k| k.is_finite()),
                new.prompt_version,
                now
            ],
        )?;
        Ok(GroundTruthQuery {
            id: conn.last_insert_rowid(),
            query: new.query.clone(),
            query_type: new.query_type.clone(),
            expected_doc_ids: new.expected_doc_ids.clone(),
            judge1_scores: new.judge1_scores.clone(),
            judge2_scores: new.judge2_scores.clone(),
            kappa: new.kappa.filter(|k| k.is_finite()),
            human_override: false,
            override_reason: None,
            prompt_version: new.prompt_version.clone(),
            created_at: now,
        })
    }

    pub fn ground_truth_queries(&self) -> Result<Vec<GroundTruthQuery>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, query, query_type, expected_doc_ids, judge1_scores, judge2_scores,
                    kappa, human_override, override_reason, prompt_version, created_at
             FROM ground_truth_queries ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, DateTime<Utc>>(10)?,
            ))
        })?;

        let mut queries = Vec::new();
        for row in rows {
            let (
                id,
                query,
                query_type,
                expected_raw,
                j1_raw,
                j2_raw,
                kappa,
                human_override,
                override_reason,
                prompt_version,
                created_at,
            ) = row?;
            queries.push(GroundTruthQuery {
                id,
                query,
                query_type,
                expected_doc_ids: parse_json_required(expected_raw, "ground_truth.expected_doc_ids")?,
                judge1_scores: parse_json_required(j1_raw, "ground_truth.judge1_scores")?,
                judge2_scores: parse_json_required(j2_raw, "ground_truth.judge2_scores")?,
                kappa,
                human_override,
                override_reason,
                prompt_version,
                created_at,
            });
        }
        Ok(queries)
    }

    pub fn insert_validation(
        &self,
        macro_kappa: f64,
        micro_kappa: f64,
        status: ValidationStatus,
        contingency: Option<&Value>,
        notes: Option<&str>,
    ) -> Result<ValidationRecord> {
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO validation_results
             (created_at, macro_kappa, micro_kappa, status, contingency, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                now,
                // NaN kappas persist as NULL and read back as NaN.
                Some(macro_kappa).filter(|k| k.is_finite()),
                Some(micro_kappa).filter(|k| k.is_finite()),
                status.as_str(),
                contingency.map(|c| c.to_string()),
                notes
            ],
        )?;
        Ok(ValidationRecord {
            id: conn.last_insert_rowid(),
            created_at: now,
            macro_kappa,
            micro_kappa,
            status,
            contingency: contingency.cloned(),
            notes: notes.map(String::from),
        })
    }

    pub fn latest_validation(&self) -> Result<Option<ValidationRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, created_at, macro_kappa, micro_kappa, status, contingency, notes
                 FROM validation_results ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, DateTime<Utc>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, created_at, macro_kappa, micro_kappa, status_raw, contingency, notes)) => {
                let macro_kappa = macro_kappa.unwrap_or(f64::NAN);
                let micro_kappa = micro_kappa.unwrap_or(f64::NAN);
                let status = match status_raw.as_str() {
                    "passed" => ValidationStatus::Passed,
                    "contingency_triggered" => ValidationStatus::ContingencyTriggered,
                    other => {
                        return Err(StorageError::Corrupt(format!(
                            "validation_results.status: {other}"
                        )));
                    }
                };
                Ok(Some(ValidationRecord {
                    id,
                    created_at,
                    macro_kappa,
                    micro_kappa,
                    status,
                    contingency: parse_json_column(contingency, "validation_results.contingency")?,
                    notes,
                }))
            }
        }
    }

    pub fn insert_golden_run(
        &self,
        precision_at_5: f64,
        baseline_precision: Option<f64>,
        drift_detected: bool,
        by_query_type: &Value,
    ) -> Result<GoldenRun> {
        let date = today();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO golden_runs (date, precision_at_5, baseline_precision, drift_detected, by_query_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                date,
                precision_at_5,
                baseline_precision,
                drift_detected,
                by_query_type.to_string()
            ],
        )?;
        Ok(GoldenRun {
            id: conn.last_insert_rowid(),
            date,
            precision_at_5,
            baseline_precision,
            drift_detected,
            by_query_type: by_query_type.clone(),
        })
    }

    pub fn latest_golden_run(&self) -> Result<Option<GoldenRun>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, date, precision_at_5, baseline_precision, drift_detected, by_query_type
                 FROM golden_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, date, precision_at_5, baseline_precision, drift_detected, by_raw)) => {
                Ok(Some(GoldenRun {
                    id,
                    date,
                    precision_at_5,
                    baseline_precision,
                    drift_detected,
                    by_query_type: parse_json_required(by_raw, "golden_runs.by_query_type")?,
                }))
            }
        }
    }
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

fn month_prefix(year: i32, month: u32) -> String {
    format!("{year:04}-{month:02}-%")
}
