//! memory:// resources
//!
//! Read-only views over the memory tiers, addressed by URI with query-string
//! filters.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};

use engram_core::{ArchiveReason, EpisodeFilter, InsightQuery, RawTurnQuery, StaleQuery};

use crate::error::ToolError;
use crate::state::Services;

/// Read a memory:// URI into a JSON document.
pub async fn read(services: &Arc<Services>, uri: &str) -> Result<String, ToolError> {
    let path = uri.strip_prefix("memory://").ok_or_else(|| {
        ToolError::validation(format!("unsupported resource scheme: {uri}"))
    })?;
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };

    let value = match path {
        "l2-insights" => read_insights(services, query).await?,
        "working-memory" => read_working(services)?,
        "episode-memory" => read_episodes(services, query).await?,
        "l0-raw" => read_raw(services, query)?,
        "stale-memory" => read_stale(services, query)?,
        other => {
            return Err(ToolError::new(
                crate::error::ErrorKind::NotFound,
                format!("unknown memory resource: {other}"),
            ));
        }
    };

    serde_json::to_string_pretty(&value).map_err(|e| ToolError::internal(e.to_string()))
}

fn param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then_some(v)
    })
}

fn param_parsed<T: std::str::FromStr>(query: Option<&str>, key: &str) -> Option<T> {
    param(query, key).and_then(|v| v.parse().ok())
}

/// Accept RFC3339 or a bare date.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDate>()
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

async fn read_insights(services: &Arc<Services>, query: Option<&str>) -> Result<Value, ToolError> {
    let top_k: usize = param_parsed(query, "top_k").unwrap_or(10);
    let fidelity_min: Option<f64> = param_parsed(query, "fidelity_min");

    if let Some(text) = param(query, "query") {
        let decoded = url_decode(text);
        let mut hits = services
            .hybrid
            .search(&decoded, None, top_k.clamp(1, 100), services.default_weights)
            .await?;
        if let Some(min) = fidelity_min {
            hits.retain(|h| h.insight.fidelity_score().unwrap_or(0.0) >= min);
        }
        let total = hits.len();
        return Ok(json!({
            "total": total,
            "items": hits,
        }));
    }

    let insights = services.store.query_insights(&InsightQuery {
        fidelity_min,
        created_after: param(query, "created_after").and_then(parse_timestamp),
        created_before: param(query, "created_before").and_then(parse_timestamp),
        limit: top_k,
    })?;
    Ok(json!({
        "total": insights.len(),
        "items": insights,
    }))
}

fn read_working(services: &Arc<Services>) -> Result<Value, ToolError> {
    let items = services.store.list_working()?;
    Ok(json!({
        "total": items.len(),
        "capacity": services.config.memory.working.capacity,
        "items": items,
    }))
}

async fn read_episodes(services: &Arc<Services>, query: Option<&str>) -> Result<Value, ToolError> {
    let filter = EpisodeFilter {
        reward_min: param_parsed(query, "reward_min"),
        days_back: param_parsed(query, "days_back"),
        limit: 0,
    };
    let top_k: usize = param_parsed(query, "top_k").unwrap_or(10);

    if let Some(text) = param(query, "query") {
        let decoded = url_decode(text);
        let min_similarity: Option<f64> = param_parsed(query, "min_similarity");
        let episodes = services
            .tiers
            .recall_episodes(&decoded, top_k, min_similarity, &filter)
            .await?;
        return Ok(json!({
            "total": episodes.len(),
            "items": episodes,
        }));
    }

    let episodes: Vec<_> = services
        .store
        .episodes_with_embeddings(&filter)?
        .into_iter()
        .map(|(episode, _)| episode)
        .take(top_k)
        .collect();
    Ok(json!({
        "total": episodes.len(),
        "items": episodes,
    }))
}

fn read_raw(services: &Arc<Services>, query: Option<&str>) -> Result<Value, ToolError> {
    let (after, before) = match param(query, "date_range") {
        Some(range) => match range.split_once("..") {
            Some((start, end)) => (parse_timestamp(start), parse_timestamp(end)),
            None => (parse_timestamp(range), None),
        },
        None => (None, None),
    };

    let turns = services.store.raw_turns(&RawTurnQuery {
        session_id: param(query, "session_id").map(|s| url_decode(s)),
        speaker: param(query, "speaker").map(|s| url_decode(s)),
        after,
        before,
        limit: param_parsed(query, "limit").unwrap_or(50),
        ascending: param(query, "order").map(|o| o == "asc").unwrap_or(false),
    })?;
    Ok(json!({
        "total": turns.len(),
        "items": turns,
    }))
}

fn read_stale(services: &Arc<Services>, query: Option<&str>) -> Result<Value, ToolError> {
    let reason = match param(query, "reason") {
        Some(raw) => Some(ArchiveReason::parse_name(raw).ok_or_else(|| {
            ToolError::validation(format!("unknown archive reason: {raw}"))
        })?),
        None => None,
    };
    let items = services.store.query_stale(&StaleQuery {
        reason,
        days_back: param_parsed(query, "days_back"),
        importance_min: param_parsed(query, "importance_min"),
        limit: param_parsed(query, "limit").unwrap_or(50),
    })?;
    Ok(json!({
        "total": items.len(),
        "items": items,
    }))
}

/// Minimal percent-decoding for query parameter values.
fn url_decode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&raw[i + 1..i + 3], 16) {
                    out.push(byte as char);
                    i += 3;
                } else {
                    out.push('%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests_support::test_services;

    #[test]
    fn test_param_parsing() {
        let query = Some("top_k=3&fidelity_min=0.5&flag=");
        assert_eq!(param(query, "top_k"), Some("3"));
        assert_eq!(param_parsed::<usize>(query, "top_k"), Some(3));
        assert_eq!(param_parsed::<f64>(query, "fidelity_min"), Some(0.5));
        assert_eq!(param(query, "flag"), None);
        assert_eq!(param(query, "missing"), None);
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("what+is+autonomy"), "what is autonomy");
        assert_eq!(url_decode("a%20b"), "a b");
        assert_eq!(url_decode("plain"), "plain");
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2026-08-01").is_some());
        assert!(parse_timestamp("2026-08-01T12:30:00Z").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }

    #[tokio::test]
    async fn test_l0_round_trip_via_resource() {
        let (services, _dir) = test_services();
        services
            .store
            .insert_raw_turn("s9", "user", "hello resource", None)
            .unwrap();

        let body = read(&services, "memory://l0-raw?session_id=s9").await.unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["items"][0]["content"], "hello resource");
    }

    #[tokio::test]
    async fn test_working_memory_resource() {
        let (services, _dir) = test_services();
        services.tiers.upsert_working("active item", 0.7).unwrap();

        let body = read(&services, "memory://working-memory").await.unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["capacity"], 10);
    }

    #[tokio::test]
    async fn test_unknown_resource_not_found() {
        let (services, _dir) = test_services();
        assert!(read(&services, "memory://bogus").await.is_err());
    }

    #[tokio::test]
    async fn test_stale_reason_filter_validates() {
        let (services, _dir) = test_services();
        assert!(read(&services, "memory://stale-memory?reason=NOT_A_REASON").await.is_err());
        assert!(read(&services, "memory://stale-memory?reason=LRU_EVICTION").await.is_ok());
    }
}
