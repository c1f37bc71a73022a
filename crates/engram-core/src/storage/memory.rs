//! Memory-tier row operations
//!
//! Typed CRUD for the five tiers. The working-memory upsert is a single
//! transaction covering insert, eviction, and archive, so no failure leaves
//! partial state.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use super::{Result, StorageError, Store, parse_json_column, parse_json_required};
use crate::memory::{ArchiveReason, Episode, Insight, RawTurn, StaleItem, WorkingItem, WorkingUpsert};
use crate::vectors::{EMBEDDING_DIMENSIONS, blob_to_vector, vector_to_blob};

/// Filters for querying raw dialogue turns.
#[derive(Debug, Clone, Default)]
pub struct RawTurnQuery {
    pub session_id: Option<String>,
    pub speaker: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub ascending: bool,
}

/// Filters for querying insights without a search query.
#[derive(Debug, Clone, Default)]
pub struct InsightQuery {
    pub fidelity_min: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Filters for querying episodes.
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub reward_min: Option<f64>,
    pub days_back: Option<i64>,
    pub limit: usize,
}

/// Filters for querying the stale archive.
#[derive(Debug, Clone, Default)]
pub struct StaleQuery {
    pub reason: Option<ArchiveReason>,
    pub days_back: Option<i64>,
    pub importance_min: Option<f64>,
    pub limit: usize,
}

impl Store {
    // ========================================================================
    // L0 RAW TURNS
    // ========================================================================

    /// Insert a raw dialogue turn. Rows are immutable after this point.
    pub fn insert_raw_turn(
        &self,
        session_id: &str,
        speaker: &str,
        content: &str,
        metadata: Option<&Value>,
    ) -> Result<RawTurn> {
        if session_id.is_empty() || speaker.is_empty() || content.is_empty() {
            return Err(StorageError::Invalid(
                "session_id, speaker, and content must be non-empty".to_string(),
            ));
        }
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO l0_raw (session_id, speaker, content, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                speaker,
                content,
                now,
                metadata.map(|m| m.to_string())
            ],
        )?;
        Ok(RawTurn {
            id: conn.last_insert_rowid(),
            session_id: session_id.to_string(),
            speaker: speaker.to_string(),
            content: content.to_string(),
            created_at: now,
            metadata: metadata.cloned(),
        })
    }

    /// Query raw turns by session with time-range bounds and simple paging.
    pub fn raw_turns(&self, query: &RawTurnQuery) -> Result<Vec<RawTurn>> {
        let mut sql = String::from(
            "SELECT id, session_id, speaker, content, created_at, metadata FROM l0_raw WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(session) = &query.session_id {
            sql.push_str(" AND session_id = ?");
            args.push(Box::new(session.clone()));
        }
        if let Some(speaker) = &query.speaker {
            sql.push_str(" AND speaker = ?");
            args.push(Box::new(speaker.clone()));
        }
        if let Some(after) = query.after {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(after));
        }
        if let Some(before) = query.before {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(before));
        }
        sql.push_str(if query.ascending {
            " ORDER BY id ASC"
        } else {
            " ORDER BY id DESC"
        });
        sql.push_str(" LIMIT ?");
        args.push(Box::new(effective_limit(query.limit) as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, DateTime<Utc>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (id, session_id, speaker, content, created_at, metadata) = row?;
            turns.push(RawTurn {
                id,
                session_id,
                speaker,
                content,
                created_at,
                metadata: parse_json_column(metadata, "l0_raw.metadata")?,
            });
        }
        Ok(turns)
    }

    // ========================================================================
    // L2 INSIGHTS
    // ========================================================================

    /// Insert a compressed insight with its embedding. `source_ids` must be
    /// non-empty and the embedding must match the declared dimension.
    pub fn insert_insight(
        &self,
        content: &str,
        embedding: &[f32],
        source_ids: &[i64],
        metadata: Option<&Value>,
    ) -> Result<Insight> {
        if source_ids.is_empty() {
            return Err(StorageError::Invalid("source_ids must be non-empty".to_string()));
        }
        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(StorageError::Invalid(format!(
                "embedding must have {} dimensions, got {}",
                EMBEDDING_DIMENSIONS,
                embedding.len()
            )));
        }
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO l2_insights (content, embedding, created_at, source_ids, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                content,
                vector_to_blob(embedding),
                now,
                serde_json::to_string(source_ids).expect("source id list serializes"),
                metadata.map(|m| m.to_string())
            ],
        )?;
        Ok(Insight {
            id: conn.last_insert_rowid(),
            content: content.to_string(),
            created_at: now,
            source_ids: source_ids.to_vec(),
            metadata: metadata.cloned(),
        })
    }

    /// Fetch a single insight by id.
    pub fn insight(&self, id: i64) -> Result<Insight> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, content, created_at, source_ids, metadata FROM l2_insights WHERE id = ?1",
            [id],
            map_insight_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("insight {id}")))?
    }

    /// Fetch several insights, preserving the order of `ids`.
    pub fn insights_by_ids(&self, ids: &[i64]) -> Result<Vec<Insight>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(self.insight(id)?);
        }
        Ok(out)
    }

    /// Filtered listing, newest first.
    pub fn query_insights(&self, query: &InsightQuery) -> Result<Vec<Insight>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, created_at, source_ids, metadata FROM l2_insights
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([effective_limit(query.limit) as i64 * 4], map_insight_row)?;

        let mut insights = Vec::new();
        for row in rows {
            let insight = row??;
            if let Some(min) = query.fidelity_min {
                if insight.fidelity_score().unwrap_or(0.0) < min {
                    continue;
                }
            }
            if let Some(after) = query.created_after {
                if insight.created_at < after {
                    continue;
                }
            }
            if let Some(before) = query.created_before {
                if insight.created_at > before {
                    continue;
                }
            }
            insights.push(insight);
            if insights.len() >= effective_limit(query.limit) {
                break;
            }
        }
        Ok(insights)
    }

    /// All insight embeddings for the semantic branch of hybrid search.
    pub fn insight_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, embedding FROM l2_insights")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            let vector = blob_to_vector(&blob)
                .ok_or_else(|| StorageError::Corrupt(format!("l2_insights.embedding for id {id}")))?;
            embeddings.push((id, vector));
        }
        Ok(embeddings)
    }

    /// Lexical search over insight content via FTS5, best matches first.
    /// Returns `(id, relevance)` where higher relevance is better.
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<(i64, f64)>> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT rowid, bm25(l2_fts) FROM l2_fts WHERE l2_fts MATCH ?1
             ORDER BY bm25(l2_fts) ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sanitized, limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, bm25) = row?;
            // bm25() is smaller-is-better (negative for matches); map to a
            // monotone relevance in (0, 1) so branch scores are comparable.
            let relevance = (-bm25).max(0.0);
            results.push((id, relevance / (1.0 + relevance)));
        }
        Ok(results)
    }

    // ========================================================================
    // WORKING MEMORY
    // ========================================================================

    /// Insert a working item, evicting per the LRU+importance rule when over
    /// capacity. Insert, eviction, and archive commit or roll back together.
    pub fn upsert_working(
        &self,
        content: &str,
        importance: f64,
        capacity: usize,
        critical_threshold: f64,
    ) -> Result<WorkingUpsert> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(StorageError::Invalid(format!(
                "importance must be within [0, 1], got {importance}"
            )));
        }
        let now = Utc::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO working_memory (content, importance, last_accessed, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![content, importance, now, now],
        )?;
        let added_id = tx.last_insert_rowid();

        let count: i64 = tx.query_row("SELECT COUNT(*) FROM working_memory", [], |r| r.get(0))?;

        let mut evicted_id = None;
        let mut archived_id = None;
        if count as usize > capacity {
            // Prefer the least-recently-used non-critical item; when every
            // existing item is critical, fall back to the LRU overall. The
            // just-inserted row is never a candidate. Ties break on lower id.
            let victim = tx
                .query_row(
                    "SELECT id, content, importance FROM working_memory
                     WHERE id != ?1 AND importance <= ?2
                     ORDER BY last_accessed ASC, id ASC LIMIT 1",
                    params![added_id, critical_threshold],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                        ))
                    },
                )
                .optional()?;
            let (victim_id, victim_content, victim_importance) = match victim {
                Some(v) => v,
                None => tx.query_row(
                    "SELECT id, content, importance FROM working_memory
                     WHERE id != ?1
                     ORDER BY last_accessed ASC, id ASC LIMIT 1",
                    params![added_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, f64>(2)?,
                        ))
                    },
                )?,
            };

            if victim_importance > critical_threshold {
                tx.execute(
                    "INSERT INTO stale_memory (content, archived_at, original_importance, reason)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        victim_content,
                        now,
                        victim_importance,
                        ArchiveReason::LruEviction.as_str()
                    ],
                )?;
                archived_id = Some(tx.last_insert_rowid());
            }
            tx.execute("DELETE FROM working_memory WHERE id = ?1", [victim_id])?;
            evicted_id = Some(victim_id);
        }

        tx.commit()?;

        Ok(WorkingUpsert {
            added: WorkingItem {
                id: added_id,
                content: content.to_string(),
                importance,
                last_accessed: now,
                created_at: now,
            },
            evicted_id,
            archived_id,
        })
    }

    /// All working items, most recently accessed first.
    pub fn list_working(&self) -> Result<Vec<WorkingItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, importance, last_accessed, created_at FROM working_memory
             ORDER BY last_accessed DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WorkingItem {
                id: row.get(0)?,
                content: row.get(1)?,
                importance: row.get(2)?,
                last_accessed: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Bump `last_accessed` on read/touch.
    pub fn touch_working(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE working_memory SET last_accessed = ?1 WHERE id = ?2",
            params![Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("working item {id}")));
        }
        Ok(())
    }

    pub fn working_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM working_memory", [], |r| r.get(0))?)
    }

    /// Manually archive a working item into the stale tier.
    pub fn archive_working(&self, id: i64) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let (content, importance) = tx
            .query_row(
                "SELECT content, importance FROM working_memory WHERE id = ?1",
                [id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("working item {id}")))?;
        tx.execute(
            "INSERT INTO stale_memory (content, archived_at, original_importance, reason)
             VALUES (?1, ?2, ?3, ?4)",
            params![content, Utc::now(), importance, ArchiveReason::ManualArchive.as_str()],
        )?;
        let stale_id = tx.last_insert_rowid();
        tx.execute("DELETE FROM working_memory WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(stale_id)
    }

    // ========================================================================
    // EPISODES
    // ========================================================================

    /// Insert an episode with the embedding of its query text.
    pub fn insert_episode(
        &self,
        query: &str,
        reward: f64,
        reflection: &str,
        query_embedding: &[f32],
    ) -> Result<Episode> {
        if !(-1.0..=1.0).contains(&reward) {
            return Err(StorageError::Invalid(format!(
                "reward must be within [-1, 1], got {reward}"
            )));
        }
        if query_embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(StorageError::Invalid(format!(
                "query embedding must have {} dimensions, got {}",
                EMBEDDING_DIMENSIONS,
                query_embedding.len()
            )));
        }
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO episodes (query, reward, reflection, created_at, query_embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![query, reward, reflection, now, vector_to_blob(query_embedding)],
        )?;
        Ok(Episode {
            id: conn.last_insert_rowid(),
            query: query.to_string(),
            reward,
            reflection: reflection.to_string(),
            created_at: now,
        })
    }

    /// Episodes with their stored query embeddings, filtered, newest first.
    pub fn episodes_with_embeddings(
        &self,
        filter: &EpisodeFilter,
    ) -> Result<Vec<(Episode, Vec<f32>)>> {
        let cutoff = filter.days_back.map(|d| Utc::now() - Duration::days(d));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, query, reward, reflection, created_at, query_embedding FROM episodes
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                Episode {
                    id: row.get(0)?,
                    query: row.get(1)?,
                    reward: row.get(2)?,
                    reflection: row.get(3)?,
                    created_at: row.get(4)?,
                },
                row.get::<_, Vec<u8>>(5)?,
            ))
        })?;

        let mut episodes = Vec::new();
        for row in rows {
            let (episode, blob) = row?;
            if let Some(min) = filter.reward_min {
                if episode.reward < min {
                    continue;
                }
            }
            if let Some(cutoff) = cutoff {
                if episode.created_at < cutoff {
                    continue;
                }
            }
            let vector = blob_to_vector(&blob).ok_or_else(|| {
                StorageError::Corrupt(format!("episodes.query_embedding for id {}", episode.id))
            })?;
            episodes.push((episode, vector));
        }
        Ok(episodes)
    }

    /// Stored query embedding for one episode.
    pub fn episode_embedding(&self, id: i64) -> Result<Vec<f32>> {
        let conn = self.conn()?;
        let blob: Vec<u8> = conn
            .query_row("SELECT query_embedding FROM episodes WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("episode {id}")))?;
        blob_to_vector(&blob)
            .ok_or_else(|| StorageError::Corrupt(format!("episodes.query_embedding for id {id}")))
    }

    // ========================================================================
    // STALE ARCHIVE
    // ========================================================================

    /// Filtered listing of the stale archive, newest first.
    pub fn query_stale(&self, query: &StaleQuery) -> Result<Vec<StaleItem>> {
        let cutoff = query.days_back.map(|d| Utc::now() - Duration::days(d));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, archived_at, original_importance, reason FROM stale_memory
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, DateTime<Utc>>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, content, archived_at, original_importance, reason_raw) = row?;
            let reason = ArchiveReason::parse_name(&reason_raw)
                .ok_or_else(|| StorageError::Corrupt(format!("stale_memory.reason: {reason_raw}")))?;
            if let Some(want) = query.reason {
                if reason != want {
                    continue;
                }
            }
            if let Some(cutoff) = cutoff {
                if archived_at < cutoff {
                    continue;
                }
            }
            if let Some(min) = query.importance_min {
                if original_importance < min {
                    continue;
                }
            }
            items.push(StaleItem {
                id,
                content,
                archived_at,
                original_importance,
                reason,
            });
            if items.len() >= effective_limit(query.limit) {
                break;
            }
        }
        Ok(items)
    }
}

fn map_insight_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Insight>> {
    let id: i64 = row.get(0)?;
    let content: String = row.get(1)?;
    let created_at: DateTime<Utc> = row.get(2)?;
    let source_raw: String = row.get(3)?;
    let metadata_raw: Option<String> = row.get(4)?;
    Ok((|| {
        Ok(Insight {
            id,
            content,
            created_at,
            source_ids: parse_json_required(source_raw, "l2_insights.source_ids")?,
            metadata: parse_json_column(metadata_raw, "l2_insights.metadata")?,
        })
    })())
}

fn effective_limit(limit: usize) -> usize {
    if limit == 0 { 50 } else { limit.min(500) }
}

/// Escape user text for an FTS5 MATCH query: each token is double-quoted and
/// tokens are OR-joined so partial matches still rank.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}
