//! Database migration system

use rusqlite::{Connection, OptionalExtension, Result};
use std::collections::BTreeMap;
use tracing::{error, info};

use crate::memory_db::schema::RelationshipStats;

/// Applies versioned schema scripts and records them in `schema_version`.
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the schema up to the latest version. Safe to call on every open.
    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current relationship schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|found| found.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_initial.sql")),
        (2, include_str!("migrations/002_patterns_insights.sql")),
    ]
}

/// Latest schema version this build knows how to apply.
pub fn latest_version() -> i32 {
    get_migrations().last().map(|(v, _)| *v).unwrap_or(0)
}

/// Read-only statistics over the relationship database.
pub fn get_database_stats(conn: &Connection) -> Result<RelationshipStats> {
    fn count(conn: &Connection, sql: &str) -> rusqlite::Result<i64> {
        conn.query_row(sql, [], |row| row.get(0))
    }

    let mut by_type = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT rel_type, COUNT(*) FROM relationships GROUP BY rel_type ORDER BY rel_type",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (rel_type, n) = row?;
        by_type.insert(rel_type, n);
    }

    let storage_size_bytes: i64 = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;

    Ok(RelationshipStats {
        total_relationships: count(conn, "SELECT COUNT(*) FROM relationships")?,
        by_type,
        unique_memories_linked: count(
            conn,
            "SELECT COUNT(*) FROM (SELECT source_id AS id FROM relationships
                                   UNION SELECT target_id FROM relationships)",
        )?,
        pending_insights: count(conn, "SELECT COUNT(*) FROM insights WHERE surfaced = 0")?,
        storage_size_bytes,
        total_memories: count(conn, "SELECT COUNT(*) FROM memories")?,
        pattern_cache_entries: count(conn, "SELECT COUNT(*) FROM pattern_cache")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        {
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database().unwrap();
            assert_eq!(migrator.get_current_version().unwrap(), latest_version());
            assert!(migrator.has_migration_applied(1).unwrap());
            assert!(migrator.has_migration_applied(2).unwrap());
        }
        // Re-running is a no-op.
        let mut migrator = MigrationManager::new(&mut conn);
        migrator.initialize_database().unwrap();
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(applied, latest_version() as i64);
    }

    #[test]
    fn test_stats_on_empty_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();
        let stats = get_database_stats(&conn).unwrap();
        assert_eq!(stats.total_relationships, 0);
        assert_eq!(stats.unique_memories_linked, 0);
        assert!(stats.by_type.is_empty());
        assert!(stats.storage_size_bytes > 0);
    }

    #[test]
    fn test_strength_check_constraint() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();
        let result = conn.execute(
            "INSERT INTO relationships (source_id, target_id, rel_type, strength, created_at, updated_at)
             VALUES ('a', 'b', 'CAUSED', 1.5, 'x', 'x')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_fail_when_a_table_is_missing() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::new(&mut conn).initialize_database().unwrap();
        conn.execute_batch("DROP TABLE insights; DROP TABLE memories;").unwrap();
        assert!(get_database_stats(&conn).is_err());
    }
}
