//! Typed, weighted edges between memories
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use crate::memory_db::{validate_id, validate_unit_interval, DbPool};

pub(crate) const RELATIONSHIP_COLUMNS: &str =
    "id, source_id, target_id, rel_type, strength, metadata, created_at, updated_at";

pub struct EdgeStore {
    pool: DbPool,
    /// One lock per (source, target, type) triple currently being written.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EdgeStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            write_locks: DashMap::new(),
        }
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Create or update the edge for `(source_id, target_id, rel_type)`.
    /// On update the new strength and metadata replace the old ones,
    /// `updated_at` advances and `created_at` is kept.
    pub fn link(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        strength: f64,
        metadata: &Metadata,
    ) -> Result<RelationshipId> {
        validate_id(source_id)?;
        validate_id(target_id)?;
        validate_unit_interval(strength)?;
        if source_id == target_id {
            return Err(MemoryError::Validation(format!(
                "Cannot link memory '{}' to itself",
                source_id
            )));
        }
        let metadata_json = serde_json::to_string(metadata)?;

        let key = format!("{}\u{1f}{}\u{1f}{}", source_id, target_id, rel_type.as_str());
        let lock = self
            .write_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let conn = self.get_conn()?;
            let now = to_db_time(&Utc::now());
            conn.query_row(
                "INSERT INTO relationships
                 (source_id, target_id, rel_type, strength, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(source_id, target_id, rel_type) DO UPDATE SET
                    strength = excluded.strength,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![source_id, target_id, rel_type.as_str(), strength, metadata_json, now],
                |row| row.get::<_, i64>(0),
            )
        };

        drop(lock);
        self.write_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        let id = result?;
        debug!(
            "Linked {} -[{} {:.2}]-> {} (id {})",
            source_id, rel_type, strength, target_id, id
        );
        Ok(id)
    }

    pub fn get(&self, id: RelationshipId) -> Result<Option<Relationship>> {
        let conn = self.get_conn()?;
        let edge = conn
            .query_row(
                &format!("SELECT {} FROM relationships WHERE id = ?1", RELATIONSHIP_COLUMNS),
                [id],
                row_to_relationship,
            )
            .optional()?;
        Ok(edge)
    }

    pub fn find(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
    ) -> Result<Option<Relationship>> {
        let conn = self.get_conn()?;
        let edge = conn
            .query_row(
                &format!(
                    "SELECT {} FROM relationships
                     WHERE source_id = ?1 AND target_id = ?2 AND rel_type = ?3",
                    RELATIONSHIP_COLUMNS
                ),
                params![source_id, target_id, rel_type.as_str()],
                row_to_relationship,
            )
            .optional()?;
        Ok(edge)
    }

    /// Ids that appear in any edge, most connected first.
    pub fn linked_ids(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, COUNT(*) AS degree FROM (
                 SELECT source_id AS id FROM relationships
                 UNION ALL
                 SELECT target_id FROM relationships
             )
             GROUP BY id
             ORDER BY degree DESC, id ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Direct neighbors of `memory_id`, strongest first. An unknown id yields
    /// an empty list.
    pub fn get_related(
        &self,
        memory_id: &str,
        rel_type: Option<RelationshipType>,
        direction: Direction,
        min_strength: f64,
        limit: Option<usize>,
    ) -> Result<Vec<RelatedMemory>> {
        let conn = self.get_conn()?;
        let mut related = Vec::new();

        if matches!(direction, Direction::Both | Direction::Outgoing) {
            for edge in edges_touching(&conn, memory_id, Direction::Outgoing, min_strength)? {
                if rel_type.map_or(true, |t| t == edge.rel_type) {
                    related.push(RelatedMemory {
                        memory_id: edge.target_id.clone(),
                        direction: Direction::Outgoing,
                        relationship: edge,
                    });
                }
            }
        }
        if matches!(direction, Direction::Both | Direction::Incoming) {
            for edge in edges_touching(&conn, memory_id, Direction::Incoming, min_strength)? {
                if rel_type.map_or(true, |t| t == edge.rel_type) {
                    related.push(RelatedMemory {
                        memory_id: edge.source_id.clone(),
                        direction: Direction::Incoming,
                        relationship: edge,
                    });
                }
            }
        }

        related.sort_by(|a, b| {
            b.relationship
                .strength
                .total_cmp(&a.relationship.strength)
                .then_with(|| b.relationship.updated_at.cmp(&a.relationship.updated_at))
                .then_with(|| a.relationship.id.cmp(&b.relationship.id))
        });
        if let Some(limit) = limit {
            related.truncate(limit);
        }
        Ok(related)
    }
}

/// Edges leaving (`Outgoing`) or entering (`Incoming`) `memory_id` with at
/// least `min_strength`. `Both` returns the union.
pub(crate) fn edges_touching(
    conn: &Connection,
    memory_id: &str,
    direction: Direction,
    min_strength: f64,
) -> rusqlite::Result<Vec<Relationship>> {
    let filter = match direction {
        Direction::Outgoing => "source_id = ?1",
        Direction::Incoming => "target_id = ?1",
        Direction::Both => "(source_id = ?1 OR target_id = ?1)",
    };
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM relationships
         WHERE {} AND strength >= ?2
         ORDER BY strength DESC, id ASC",
        RELATIONSHIP_COLUMNS, filter
    ))?;
    let rows = stmt.query_map(params![memory_id, min_strength], row_to_relationship)?;
    rows.collect()
}

pub(crate) fn row_to_relationship(row: &Row) -> rusqlite::Result<Relationship> {
    let rel_type: String = row.get(3)?;
    let metadata: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Relationship {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        rel_type: from_db_enum(3, &rel_type)?,
        strength: row.get(4)?,
        metadata: from_db_json(5, &metadata)?,
        created_at: from_db_time(6, &created_at)?,
        updated_at: from_db_time(7, &updated_at)?,
    })
}
