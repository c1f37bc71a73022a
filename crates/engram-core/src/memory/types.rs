//! Memory tier data model
//!
//! One row type per tier, mirroring the persisted schema. Rows are owned by
//! the storage layer; cross-references (`source_ids`, graph links) are
//! relation-plus-lookup, never ownership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An unprocessed dialogue turn as received. Immutable after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTurn {
    pub id: i64,
    pub session_id: String,
    pub speaker: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A compressed semantic unit derived from one or more raw turns.
///
/// The embedding itself is stored as a BLOB column and fetched separately;
/// this row type carries everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// IDs of the raw turns this insight was compressed from. Non-empty.
    pub source_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Insight {
    /// Caller-supplied fidelity score, when present in metadata.
    pub fn fidelity_score(&self) -> Option<f64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("fidelity_score"))
            .and_then(|v| v.as_f64())
    }
}

/// A currently-relevant item in the bounded working set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingItem {
    pub id: i64,
    pub content: String,
    pub importance: f64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a working-memory upsert: the inserted item plus whatever the
/// capacity rule displaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingUpsert {
    pub added: WorkingItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted_id: Option<i64>,
    /// Stale-memory row id, present only when the victim was critical.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_id: Option<i64>,
}

/// A prior low-reward interaction plus its verbalized lesson.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: i64,
    pub query: String,
    pub reward: f64,
    pub reflection: String,
    pub created_at: DateTime<Utc>,
}

/// An episode scored against a retrieval query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEpisode {
    #[serde(flatten)]
    pub episode: Episode,
    pub similarity: f32,
}

/// Why a working item landed in the stale archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveReason {
    LruEviction,
    ManualArchive,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::LruEviction => "LRU_EVICTION",
            ArchiveReason::ManualArchive => "MANUAL_ARCHIVE",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "LRU_EVICTION" => Some(ArchiveReason::LruEviction),
            "MANUAL_ARCHIVE" => Some(ArchiveReason::ManualArchive),
            _ => None,
        }
    }
}

/// An archived working item. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleItem {
    pub id: i64,
    pub content: String,
    pub archived_at: DateTime<Utc>,
    pub original_importance: f64,
    pub reason: ArchiveReason,
}

/// A labeled query with two parallel judge score arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruthQuery {
    pub id: i64,
    pub query: String,
    pub query_type: String,
    pub expected_doc_ids: Vec<i64>,
    pub judge1_scores: Vec<f64>,
    pub judge2_scores: Vec<f64>,
    /// Per-query Cohen's kappa; NaN-valued kappas are stored as NULL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kappa: Option<f64>,
    pub human_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    pub prompt_version: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome status of an inter-rater reliability validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    ContingencyTriggered,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "passed",
            ValidationStatus::ContingencyTriggered => "contingency_triggered",
        }
    }
}

/// A persisted validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub macro_kappa: f64,
    pub micro_kappa: f64,
    pub status: ValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contingency: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_reason_round_trip() {
        for reason in [ArchiveReason::LruEviction, ArchiveReason::ManualArchive] {
            assert_eq!(ArchiveReason::parse_name(reason.as_str()), Some(reason));
        }
        assert_eq!(ArchiveReason::parse_name("bogus"), None);
    }

    #[test]
    fn test_fidelity_score_from_metadata() {
        let insight = Insight {
            id: 1,
            content: "x".to_string(),
            created_at: Utc::now(),
            source_ids: vec![1],
            metadata: Some(serde_json::json!({"fidelity_score": 0.42})),
        };
        assert_eq!(insight.fidelity_score(), Some(0.42));

        let bare = Insight {
            metadata: None,
            ..insight
        };
        assert_eq!(bare.fidelity_score(), None);
    }

    #[test]
    fn test_working_upsert_serialization_omits_empty() {
        let upsert = WorkingUpsert {
            added: WorkingItem {
                id: 3,
                content: "c".to_string(),
                importance: 0.5,
                last_accessed: Utc::now(),
                created_at: Utc::now(),
            },
            evicted_id: None,
            archived_id: None,
        };
        let json = serde_json::to_value(&upsert).unwrap();
        assert!(json.get("evictedId").is_none());
        assert!(json.get("archivedId").is_none());
    }
}
