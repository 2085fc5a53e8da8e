//! Derived insights and their surfacing lifecycle
use chrono::Utc;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use crate::memory_db::{validate_unit_interval, DbPool};

const INSIGHT_COLUMNS: &str =
    "id, insight_type, content, source_memories, confidence, surfaced, surfaced_at, created_at";

pub struct InsightStore {
    pool: DbPool,
}

impl InsightStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Persist a new, unsurfaced insight.
    pub fn store_insight(&self, insight: &NewInsight) -> Result<Insight> {
        validate_unit_interval(insight.confidence)?;
        if insight.content.trim().is_empty() {
            return Err(MemoryError::Validation("Insight content must not be empty".into()));
        }

        let conn = self.get_conn()?;
        let stored = conn.query_row(
            &format!(
                "INSERT INTO insights (insight_type, content, source_memories, confidence, surfaced, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)
                 RETURNING {}",
                INSIGHT_COLUMNS
            ),
            params![
                insight.insight_type.as_str(),
                insight.content,
                serde_json::to_string(&insight.source_memories)?,
                insight.confidence,
                to_db_time(&Utc::now()),
            ],
            row_to_insight,
        )?;
        info!(
            "Stored {} insight {} (confidence {:.2})",
            stored.insight_type.as_str(),
            stored.id,
            stored.confidence
        );
        Ok(stored)
    }

    pub fn get(&self, id: InsightId) -> Result<Option<Insight>> {
        let conn = self.get_conn()?;
        let insight = conn
            .query_row(
                &format!("SELECT {} FROM insights WHERE id = ?1", INSIGHT_COLUMNS),
                [id],
                row_to_insight,
            )
            .optional()?;
        Ok(insight)
    }

    /// Unsurfaced insights at or above `min_confidence`, most confident first.
    pub fn get_pending_insights(&self, min_confidence: f64, limit: Option<usize>) -> Result<Vec<Insight>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM insights
             WHERE surfaced = 0 AND confidence >= ?1
             ORDER BY confidence DESC, id ASC
             LIMIT ?2",
            INSIGHT_COLUMNS
        ))?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![min_confidence, limit], row_to_insight)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Flip an insight to surfaced. Repeating the call is a no-op that keeps
    /// the original `surfaced_at`; an unknown id is `NotFound`.
    pub fn mark_insight_shown(&self, id: InsightId) -> Result<Insight> {
        let conn = self.get_conn()?;
        let updated = conn
            .query_row(
                &format!(
                    "UPDATE insights SET surfaced = 1, surfaced_at = ?2
                     WHERE id = ?1 AND surfaced = 0
                     RETURNING {}",
                    INSIGHT_COLUMNS
                ),
                params![id, to_db_time(&Utc::now())],
                row_to_insight,
            )
            .optional()?;

        if let Some(insight) = updated {
            debug!("Insight {} surfaced", id);
            return Ok(insight);
        }

        conn.query_row(
            &format!("SELECT {} FROM insights WHERE id = ?1", INSIGHT_COLUMNS),
            [id],
            row_to_insight,
        )
        .optional()?
        .ok_or_else(|| MemoryError::not_found("insight", id.to_string()))
    }

    /// Whether any insight, surfaced or not, already names both memories.
    pub fn has_insight_covering(&self, memory_a: &str, memory_b: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM insights
                 WHERE EXISTS (SELECT 1 FROM json_each(insights.source_memories) WHERE value = ?1)
                   AND EXISTS (SELECT 1 FROM json_each(insights.source_memories) WHERE value = ?2)
                 LIMIT 1",
                params![memory_a, memory_b],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Pending insights whose source memories intersect `memory_ids`.
    pub fn pending_touching(&self, memory_ids: &[String], min_confidence: f64) -> Result<Vec<Insight>> {
        if memory_ids.is_empty() {
            return Ok(Vec::new());
        }
        let pending = self.get_pending_insights(min_confidence, None)?;
        Ok(pending
            .into_iter()
            .filter(|insight| insight.source_memories.iter().any(|m| memory_ids.contains(m)))
            .collect())
    }
}

fn row_to_insight(row: &Row) -> rusqlite::Result<Insight> {
    let insight_type: String = row.get(1)?;
    let source_memories: String = row.get(3)?;
    let surfaced_at: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(Insight {
        id: row.get(0)?,
        insight_type: from_db_enum(1, &insight_type)?,
        content: row.get(2)?,
        source_memories: from_db_json(3, &source_memories)?,
        confidence: row.get(4)?,
        surfaced: row.get(5)?,
        surfaced_at: surfaced_at.map(|t| from_db_time(6, &t)).transpose()?,
        created_at: from_db_time(7, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::RelationshipStore;

    fn new_insight(content: &str, sources: &[&str], confidence: f64) -> NewInsight {
        NewInsight {
            insight_type: InsightType::Correlation,
            content: content.to_string(),
            source_memories: sources.iter().map(|s| s.to_string()).collect(),
            confidence,
        }
    }

    #[test]
    fn test_pending_ordering_and_threshold() {
        let store = RelationshipStore::new_in_memory().unwrap();
        store.store_insight(&new_insight("low", &["a", "b"], 0.3)).unwrap();
        store.store_insight(&new_insight("high", &["c", "d"], 0.9)).unwrap();
        store.store_insight(&new_insight("mid", &["e", "f"], 0.6)).unwrap();

        let pending = store.get_pending_insights(0.5, None).unwrap();
        assert_eq!(
            pending.iter().map(|i| i.content.as_str()).collect::<Vec<_>>(),
            vec!["high", "mid"]
        );
        assert!(pending.iter().all(|i| !i.surfaced && i.surfaced_at.is_none()));
        assert_eq!(store.get_pending_insights(0.0, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_shown_is_idempotent() {
        let store = RelationshipStore::new_in_memory().unwrap();
        let stored = store.store_insight(&new_insight("x", &["a", "b"], 0.8)).unwrap();

        let first = store.mark_insight_shown(stored.id).unwrap();
        assert!(first.surfaced);
        let surfaced_at = first.surfaced_at.unwrap();

        let second = store.mark_insight_shown(stored.id).unwrap();
        assert!(second.surfaced);
        assert_eq!(second.surfaced_at, Some(surfaced_at));

        assert!(store.get_pending_insights(0.0, None).unwrap().is_empty());
    }

    #[test]
    fn test_mark_unknown_insight_is_not_found() {
        let store = RelationshipStore::new_in_memory().unwrap();
        let err = store.mark_insight_shown(4242).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { kind: "insight", .. }));
    }

    #[test]
    fn test_store_insight_validation() {
        let store = RelationshipStore::new_in_memory().unwrap();
        assert!(store.store_insight(&new_insight("x", &["a"], 1.1)).is_err());
        assert!(store.store_insight(&new_insight("  ", &["a"], 0.5)).is_err());
    }

    #[test]
    fn test_covering_and_touching_lookups() {
        let store = RelationshipStore::new_in_memory().unwrap();
        store.store_insight(&new_insight("x", &["a", "b", "c"], 0.8)).unwrap();

        assert!(store.insights.has_insight_covering("a", "c").unwrap());
        assert!(store.insights.has_insight_covering("c", "b").unwrap());
        assert!(!store.insights.has_insight_covering("a", "z").unwrap());

        let touching = store.insights.pending_touching(&["z".to_string(), "b".to_string()], 0.0).unwrap();
        assert_eq!(touching.len(), 1);
        assert!(store.insights.pending_touching(&["z".to_string()], 0.0).unwrap().is_empty());
    }
}
