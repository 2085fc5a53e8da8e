//! Memoized pattern results keyed by a stable digest
use chrono::Utc;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use crate::memory_db::{validate_unit_interval, DbPool};

const PATTERN_COLUMNS: &str =
    "pattern_key, memory_ids, pattern_type, confidence, hit_count, last_hit_at, created_at";

/// Stable cache key for a pattern of `kind` over `parts`. Order of `parts`
/// matters; callers sort them when the pattern is unordered.
pub fn pattern_key(kind: &str, parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    for part in parts {
        hasher.update(&[0x1f]);
        hasher.update(part.as_bytes());
    }
    format!("{}:{}", kind, hasher.finalize().to_hex())
}

pub struct PatternStore {
    pool: DbPool,
}

impl PatternStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Insert or refresh a cached pattern. `hit_count`, `last_hit_at` and
    /// `created_at` survive a refresh.
    pub fn cache_pattern(
        &self,
        pattern_key: &str,
        memory_ids: &[String],
        pattern_type: &str,
        confidence: f64,
    ) -> Result<PatternCacheEntry> {
        validate_unit_interval(confidence)?;
        if pattern_key.is_empty() {
            return Err(MemoryError::Validation("Pattern key must not be empty".into()));
        }

        let conn = self.get_conn()?;
        let entry = conn.query_row(
            &format!(
                "INSERT INTO pattern_cache (pattern_key, memory_ids, pattern_type, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(pattern_key) DO UPDATE SET
                    memory_ids = excluded.memory_ids,
                    pattern_type = excluded.pattern_type,
                    confidence = excluded.confidence
                 RETURNING {}",
                PATTERN_COLUMNS
            ),
            params![
                pattern_key,
                serde_json::to_string(memory_ids)?,
                pattern_type,
                confidence,
                to_db_time(&Utc::now()),
            ],
            row_to_pattern,
        )?;
        debug!("Cached pattern {} ({})", pattern_key, pattern_type);
        Ok(entry)
    }

    /// Look up a cached pattern and record the hit.
    pub fn get_cached_pattern(&self, pattern_key: &str) -> Result<Option<PatternCacheEntry>> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                &format!(
                    "UPDATE pattern_cache
                     SET hit_count = hit_count + 1, last_hit_at = ?2
                     WHERE pattern_key = ?1
                     RETURNING {}",
                    PATTERN_COLUMNS
                ),
                params![pattern_key, to_db_time(&Utc::now())],
                row_to_pattern,
            )
            .optional()?;
        Ok(entry)
    }

    /// Most used patterns first.
    pub fn list_patterns(&self, pattern_type: Option<&str>, limit: usize) -> Result<Vec<PatternCacheEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pattern_cache
             WHERE (?1 IS NULL OR pattern_type = ?1)
             ORDER BY hit_count DESC, created_at DESC, pattern_key ASC
             LIMIT ?2",
            PATTERN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![pattern_type, limit as i64], row_to_pattern)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_pattern(row: &Row) -> rusqlite::Result<PatternCacheEntry> {
    let memory_ids: String = row.get(1)?;
    let last_hit_at: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(PatternCacheEntry {
        pattern_key: row.get(0)?,
        memory_ids: from_db_json(1, &memory_ids)?,
        pattern_type: row.get(2)?,
        confidence: row.get(3)?,
        hit_count: row.get(4)?,
        last_hit_at: last_hit_at.map(|t| from_db_time(5, &t)).transpose()?,
        created_at: from_db_time(6, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::RelationshipStore;

    #[test]
    fn test_pattern_key_is_stable_and_order_sensitive() {
        let a = pattern_key("correlation", &["x", "y"]);
        assert_eq!(a, pattern_key("correlation", &["x", "y"]));
        assert_ne!(a, pattern_key("correlation", &["y", "x"]));
        assert_ne!(pattern_key("correlation", &["ab", "c"]), pattern_key("correlation", &["a", "bc"]));
        assert!(a.starts_with("correlation:"));
    }

    #[test]
    fn test_hits_are_counted() {
        let store = RelationshipStore::new_in_memory().unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        let created = store.patterns.cache_pattern("k1", &ids, "correlation", 0.6).unwrap();
        assert_eq!(created.hit_count, 0);
        assert!(created.last_hit_at.is_none());

        let first = store.patterns.get_cached_pattern("k1").unwrap().unwrap();
        let second = store.patterns.get_cached_pattern("k1").unwrap().unwrap();
        assert_eq!(first.hit_count, 1);
        assert_eq!(second.hit_count, 2);
        assert!(second.last_hit_at.unwrap() >= first.last_hit_at.unwrap());
        assert_eq!(second.memory_ids, ids);

        assert!(store.patterns.get_cached_pattern("missing").unwrap().is_none());
    }

    #[test]
    fn test_refresh_keeps_hit_count() {
        let store = RelationshipStore::new_in_memory().unwrap();
        let ids = vec!["a".to_string()];
        let created = store.patterns.cache_pattern("k", &ids, "correlation", 0.5).unwrap();
        store.patterns.get_cached_pattern("k").unwrap();

        let refreshed = store.patterns.cache_pattern("k", &ids, "correlation", 0.9).unwrap();
        assert_eq!(refreshed.hit_count, 1);
        assert_eq!(refreshed.confidence, 0.9);
        assert_eq!(refreshed.created_at, created.created_at);

        assert!(store.patterns.cache_pattern("k", &ids, "correlation", 1.5).is_err());
    }

    #[test]
    fn test_list_patterns_orders_by_hits() {
        let store = RelationshipStore::new_in_memory().unwrap();
        store.patterns.cache_pattern("cold", &[], "correlation", 0.5).unwrap();
        store.patterns.cache_pattern("hot", &[], "correlation", 0.5).unwrap();
        store.patterns.cache_pattern("other", &[], "sequence", 0.5).unwrap();
        store.patterns.get_cached_pattern("hot").unwrap();

        let listed = store.patterns.list_patterns(Some("correlation"), 10).unwrap();
        assert_eq!(
            listed.iter().map(|p| p.pattern_key.as_str()).collect::<Vec<_>>(),
            vec!["hot", "cold"]
        );
        assert_eq!(store.patterns.list_patterns(None, 10).unwrap().len(), 3);
    }
}
