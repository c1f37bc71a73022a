//! Database Migrations
//!
//! Ordered, idempotent schema migrations. Each applied version is recorded in
//! `schema_version` so re-runs are no-ops.

/// Migration definitions, applied in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Memory tiers: raw turns, insights, working, episodes, stale",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Property graph: nodes and weighted typed edges",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Operational tables: cost, retry, evaluation, fallback, budget alerts",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "Judge agreement: ground truth, validation results, golden runs",
        up: MIGRATION_V4_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Memory tiers
const MIGRATION_V1_UP: &str = r#"
-- L0: raw dialogue turns, immutable after insert
CREATE TABLE IF NOT EXISTS l0_raw (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    speaker TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_l0_session_time ON l0_raw(session_id, created_at);

-- L2: compressed semantic insights with embeddings
CREATE TABLE IF NOT EXISTS l2_insights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    created_at TEXT NOT NULL,
    source_ids TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_l2_created ON l2_insights(created_at);

-- FTS5 virtual table for the lexical branch of hybrid search
CREATE VIRTUAL TABLE IF NOT EXISTS l2_fts USING fts5(
    content,
    content='l2_insights',
    content_rowid='id',
    tokenize='porter ascii'
);

CREATE TRIGGER IF NOT EXISTS l2_ai AFTER INSERT ON l2_insights BEGIN
    INSERT INTO l2_fts(rowid, content) VALUES (NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS l2_ad AFTER DELETE ON l2_insights BEGIN
    INSERT INTO l2_fts(l2_fts, rowid, content) VALUES ('delete', OLD.id, OLD.content);
END;

-- Working memory: small bounded set under LRU+importance eviction
CREATE TABLE IF NOT EXISTS working_memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    importance REAL NOT NULL,
    last_accessed TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_working_last_accessed ON working_memory(last_accessed);

-- Episodes: low-reward interactions plus a verbalized lesson
CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    reward REAL NOT NULL,
    reflection TEXT NOT NULL,
    created_at TEXT NOT NULL,
    query_embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_episodes_created ON episodes(created_at);

-- Stale memory: archive of evicted critical working items, append-only
CREATE TABLE IF NOT EXISTS stale_memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    original_importance REAL NOT NULL,
    reason TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stale_archived ON stale_memory(archived_at);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Property graph
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    name TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    insight_id INTEGER REFERENCES l2_insights(id),
    created_at TEXT NOT NULL,
    UNIQUE(label, name)
);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_name ON graph_nodes(name);

CREATE TABLE IF NOT EXISTS graph_edges (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    UNIQUE(source_id, target_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_id);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (2, datetime('now'));
"#;

/// V3: Operational tables
const MIGRATION_V3_UP: &str = r#"
-- One row per successful external call
CREATE TABLE IF NOT EXISTS api_cost_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    api_name TEXT NOT NULL,
    calls INTEGER NOT NULL DEFAULT 1,
    tokens INTEGER NOT NULL DEFAULT 0,
    estimated_cost REAL NOT NULL DEFAULT 0.0
);

CREATE INDEX IF NOT EXISTS idx_cost_date ON api_cost_log(date);
CREATE INDEX IF NOT EXISTS idx_cost_api ON api_cost_log(api_name);

-- One row per failed attempt
CREATE TABLE IF NOT EXISTS api_retry_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    api_name TEXT NOT NULL,
    error_kind TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    success INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_retry_api ON api_retry_log(api_name);

-- One row per scored answer
CREATE TABLE IF NOT EXISTS evaluation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    query TEXT NOT NULL,
    answer TEXT NOT NULL,
    reward REAL NOT NULL,
    rationale TEXT NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0.0
);

-- Fallback activation / recovery transitions
CREATE TABLE IF NOT EXISTS fallback_status_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    service_name TEXT NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_fallback_service ON fallback_status_log(service_name);

-- Budget alerts, deduplicated per (date, alert_type)
CREATE TABLE IF NOT EXISTS budget_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    payload TEXT,
    UNIQUE(date, alert_type)
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (3, datetime('now'));
"#;

/// V4: Judge agreement and retrieval regression
const MIGRATION_V4_UP: &str = r#"
CREATE TABLE IF NOT EXISTS ground_truth_queries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    query_type TEXT NOT NULL DEFAULT 'factual',
    expected_doc_ids TEXT NOT NULL DEFAULT '[]',
    judge1_scores TEXT NOT NULL DEFAULT '[]',
    judge2_scores TEXT NOT NULL DEFAULT '[]',
    kappa REAL,
    human_override INTEGER NOT NULL DEFAULT 0,
    override_reason TEXT,
    prompt_version TEXT NOT NULL DEFAULT 'v1',
    created_at TEXT NOT NULL
);

-- kappa columns are nullable: an undefined (NaN) kappa is stored as NULL
CREATE TABLE IF NOT EXISTS validation_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    macro_kappa REAL,
    micro_kappa REAL,
    status TEXT NOT NULL,
    contingency TEXT,
    notes TEXT
);

CREATE TABLE IF NOT EXISTS golden_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    precision_at_5 REAL NOT NULL,
    baseline_precision REAL,
    drift_detected INTEGER NOT NULL DEFAULT 0,
    by_query_type TEXT NOT NULL DEFAULT '{}'
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (4, datetime('now'));
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations in version order.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
