//! Local memory records and the ids each backend assigned to them
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::memory_db::schema::*;
use crate::memory_db::{validate_id, DbPool};

pub struct MemoryStore {
    pool: DbPool,
}

const MEMORY_COLUMNS: &str = "id, content, memory_type, domain, created_at, metadata";

impl MemoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Insert a new memory. Memories are immutable, so an existing id is a
    /// validation error rather than an update.
    pub fn insert(&self, memory: &Memory) -> Result<()> {
        validate_id(&memory.id)?;
        if memory.content.trim().is_empty() {
            return Err(MemoryError::Validation("Memory content must not be empty".into()));
        }

        let conn = self.get_conn()?;
        let inserted = conn.execute(
            "INSERT INTO memories (id, content, memory_type, domain, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                memory.id,
                memory.content,
                memory.memory_type.as_str(),
                memory.domain.as_str(),
                to_db_time(&memory.created_at),
                serde_json::to_string(&memory.metadata)?,
            ],
        )?;

        if inserted == 0 {
            return Err(MemoryError::Validation(format!("Memory '{}' already exists", memory.id)));
        }
        debug!("Stored memory {} ({})", memory.id, memory.memory_type);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.get_conn()?;
        let memory = conn
            .query_row(
                &format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS),
                [id],
                row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// Fetch several memories at once; unknown ids are simply absent.
    pub fn get_many(&self, ids: &[String]) -> Result<HashMap<String, Memory>> {
        let mut found = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(found);
        }

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM memories WHERE id = ?1",
            MEMORY_COLUMNS
        ))?;
        for id in ids {
            if found.contains_key(id) {
                continue;
            }
            if let Some(memory) = stmt.query_row([id], row_to_memory).optional()? {
                found.insert(memory.id.clone(), memory);
            }
        }
        Ok(found)
    }

    /// Most recent memories, optionally restricted to a domain and a lower
    /// bound on `created_at`.
    pub fn recent(
        &self,
        domain: Option<Domain>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories
             WHERE (?1 IS NULL OR domain = ?1) AND (?2 IS NULL OR created_at >= ?2)
             ORDER BY created_at DESC, id ASC
             LIMIT ?3",
            MEMORY_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![
                domain.map(|d| d.as_str()),
                since.map(|t| to_db_time(&t)),
                limit as i64
            ],
            row_to_memory,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?)
    }

    /// Remember which opaque id `adapter` assigned to `memory_id`.
    pub fn record_adapter_ref(&self, memory_id: &str, adapter: &str, external_id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO adapter_refs (memory_id, adapter, external_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(memory_id, adapter) DO UPDATE SET external_id = excluded.external_id",
            params![memory_id, adapter, external_id, to_db_time(&Utc::now())],
        )?;
        Ok(())
    }

    /// Map an adapter's search hit id back to the local memory id.
    pub fn resolve_adapter_ref(&self, adapter: &str, external_id: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT memory_id FROM adapter_refs WHERE adapter = ?1 AND external_id = ?2",
                params![adapter, external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn adapter_refs(&self, memory_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT adapter, external_id FROM adapter_refs WHERE memory_id = ?1 ORDER BY adapter",
        )?;
        let rows = stmt.query_map([memory_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let memory_type: String = row.get(2)?;
    let domain: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let metadata: String = row.get(5)?;
    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        memory_type: from_db_enum(2, &memory_type)?,
        domain: from_db_enum(3, &domain)?,
        created_at: from_db_time(4, &created_at)?,
        metadata: from_db_json(5, &metadata)?,
    })
}
