//! Relationship store - SQLite-backed storage for memories, typed edges,
//! cached patterns and insights
pub mod schema;
pub mod migration;
pub mod memory_store;
pub mod relationship_store;
pub mod traversal;
pub mod pattern_cache;
pub mod insight_store;

pub use schema::*;
pub use migration::MigrationManager;
pub use memory_store::MemoryStore;
pub use relationship_store::EdgeStore;
pub use pattern_cache::{pattern_key, PatternStore};
pub use insight_store::InsightStore;

use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{MemoryError, Result};

pub(crate) type DbPool = Arc<Pool<SqliteConnectionManager>>;

lazy_static! {
    static ref ID_PATTERN: Regex = Regex::new(r"^[^\s\p{Cc}]{1,256}$").expect("id pattern compiles");
}

/// Ids are opaque, but must be 1-256 characters with no whitespace or
/// control characters.
pub fn validate_id(id: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(MemoryError::InvalidId(id.to_string()))
    }
}

pub fn validate_unit_interval(value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MemoryError::InvalidStrength(value))
    }
}

/// Owns the typed edge graph plus the local memory, pattern and insight
/// tables. All sub-stores share one connection pool.
pub struct RelationshipStore {
    pub memories: MemoryStore,
    pub edges: EdgeStore,
    pub patterns: PatternStore,
    pub insights: InsightStore,
    pool: DbPool,
}

impl RelationshipStore {
    /// Open (or create) a file-backed store and apply pending migrations.
    pub fn new(db_path: &Path) -> Result<Self> {
        info!("Opening relationship store at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;
                     PRAGMA synchronous = NORMAL;",
                )
            });

        let pool = Pool::builder().max_size(8).build(manager)?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Relationship store initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// In-memory store for tests and embedding. Every SQLite in-memory
    /// connection is its own database, so the pool holds exactly one
    /// connection that is never recycled.
    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;

        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        debug!("In-memory relationship store ready");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: DbPool) -> Self {
        Self {
            memories: MemoryStore::new(Arc::clone(&pool)),
            edges: EdgeStore::new(Arc::clone(&pool)),
            patterns: PatternStore::new(Arc::clone(&pool)),
            insights: InsightStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn link(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        strength: f64,
        metadata: &Metadata,
    ) -> Result<RelationshipId> {
        self.edges.link(source_id, target_id, rel_type, strength, metadata)
    }

    pub fn get_related(
        &self,
        memory_id: &str,
        rel_type: Option<RelationshipType>,
        direction: Direction,
        min_strength: f64,
        limit: Option<usize>,
    ) -> Result<Vec<RelatedMemory>> {
        self.edges.get_related(memory_id, rel_type, direction, min_strength, limit)
    }

    pub fn traverse_chain(
        &self,
        start_id: &str,
        direction: ChainDirection,
        rel_types: &[RelationshipType],
        max_depth: usize,
        min_strength: f64,
    ) -> Result<Vec<ChainNode>> {
        let conn = self.pool.get()?;
        Ok(traversal::traverse_chain(
            &conn,
            start_id,
            direction,
            rel_types,
            max_depth,
            min_strength,
        )?)
    }

    pub fn find_paths(&self, source_id: &str, target_id: &str, max_depth: usize) -> Result<Vec<Vec<String>>> {
        let conn = self.pool.get()?;
        Ok(traversal::find_paths(&conn, source_id, target_id, max_depth)?)
    }

    pub fn get_correlation_candidates(
        &self,
        memory_ids: &[String],
        min_shared_connections: usize,
    ) -> Result<Vec<CorrelationCandidate>> {
        let conn = self.pool.get()?;
        Ok(traversal::correlation_candidates(&conn, memory_ids, min_shared_connections)?)
    }

    pub fn store_insight(&self, insight: &NewInsight) -> Result<Insight> {
        self.insights.store_insight(insight)
    }

    pub fn get_pending_insights(&self, min_confidence: f64, limit: Option<usize>) -> Result<Vec<Insight>> {
        self.insights.get_pending_insights(min_confidence, limit)
    }

    pub fn mark_insight_shown(&self, id: InsightId) -> Result<Insight> {
        self.insights.mark_insight_shown(id)
    }

    pub fn get_stats(&self) -> Result<RelationshipStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("m-1").is_ok());
        assert!(validate_id("sleep_poor").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("tab\there").is_err());
        assert!(validate_id(&"x".repeat(257)).is_err());
        assert!(validate_id(&"x".repeat(256)).is_ok());
    }

    #[test]
    fn test_validate_unit_interval() {
        assert!(validate_unit_interval(0.0).is_ok());
        assert!(validate_unit_interval(1.0).is_ok());
        assert!(validate_unit_interval(-0.01).is_err());
        assert!(validate_unit_interval(f64::NAN).is_err());
    }

    #[test]
    fn test_file_backed_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory.db");

        {
            let store = RelationshipStore::new(&path).unwrap();
            store
                .link("a", "b", RelationshipType::Caused, 0.8, &Metadata::new())
                .unwrap();
        }

        let store = RelationshipStore::new(&path).unwrap();
        let related = store
            .get_related("a", None, Direction::Outgoing, 0.0, None)
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].memory_id, "b");
    }

    #[test]
    fn test_stats_reflect_links_and_insights() {
        let store = RelationshipStore::new_in_memory().unwrap();
        let meta = Metadata::new();
        store.link("a", "b", RelationshipType::Caused, 1.0, &meta).unwrap();
        store.link("b", "c", RelationshipType::Caused, 0.5, &meta).unwrap();
        store.link("a", "c", RelationshipType::Supports, 0.5, &meta).unwrap();
        store
            .store_insight(&NewInsight {
                insight_type: InsightType::Correlation,
                content: "a and c move together".into(),
                source_memories: vec!["a".into(), "c".into()],
                confidence: 0.7,
            })
            .unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_relationships, 3);
        assert_eq!(stats.by_type.get("CAUSED"), Some(&2));
        assert_eq!(stats.by_type.get("SUPPORTS"), Some(&1));
        assert_eq!(stats.unique_memories_linked, 3);
        assert_eq!(stats.pending_insights, 1);
    }
}
