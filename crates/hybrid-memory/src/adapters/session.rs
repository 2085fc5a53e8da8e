//! Full-text search over chronological session transcripts.
//!
//! A transcript is a `*.jsonl` file in the session directory; each line is
//! an object with `content` (or `text`) and optionally `id`, `created_at`
//! (or `timestamp`), `type` and `domain`. Lines without an `id` are
//! addressed as `<file stem>:<line number>`. `store` appends to
//! `memories.jsonl`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::text::{keyword_score, query_terms};
use super::{Adapter, AdapterHealth, AdapterHit, AdapterKind, SearchFilters};
use crate::memory_db::{Domain, Memory, MemoryType};

const STORE_FILE: &str = "memories.jsonl";

pub struct SessionSearchAdapter {
    name: String,
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionSearchAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "session".to_string(),
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Adapter for SessionSearchAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Session
    }

    async fn store(&self, memory: &Memory) -> anyhow::Result<String> {
        let line = serde_json::to_string(&json!({
            "id": memory.id,
            "content": memory.content,
            "type": memory.memory_type,
            "domain": memory.domain,
            "created_at": memory.created_at.to_rfc3339(),
        }))?;
        let path = self.dir.join(STORE_FILE);

        let _guard = self.write_lock.lock().await;
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{}", line)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("Session write task failed: {}", e))??;

        Ok(memory.id.clone())
    }

    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> anyhow::Result<Vec<AdapterHit>> {
        let dir = self.dir.clone();
        let terms = query_terms(query);
        let filters = filters.clone();

        tokio::task::spawn_blocking(move || scan_transcripts(&dir, &terms, &filters, limit))
            .await
            .map_err(|e| anyhow::anyhow!("Session search task failed: {}", e))?
    }

    async fn health(&self) -> AdapterHealth {
        match tokio::task::spawn_blocking({
            let dir = self.dir.clone();
            move || fs::read_dir(&dir).is_ok()
        })
        .await
        {
            Ok(true) => AdapterHealth::Available,
            _ => AdapterHealth::Unavailable,
        }
    }
}

fn scan_transcripts(
    dir: &Path,
    terms: &[String],
    filters: &SearchFilters,
    limit: usize,
) -> anyhow::Result<Vec<AdapterHit>> {
    if terms.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "jsonl"))
        .collect();
    files.sort();

    let mut hits = Vec::new();
    for path in files {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Skipping transcript {}: {}", path.display(), e);
                continue;
            }
        };

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut line_no = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => line_no += 1,
                Err(e) => {
                    warn!("Stopped reading transcript {} at line {}: {}", path.display(), line_no + 1, e);
                    break;
                }
            }
            // Bytes that are not UTF-8 are replaced; the JSON parse decides.
            let line = String::from_utf8_lossy(&buf);
            if line.trim().is_empty() {
                continue;
            }
            let entry: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Unparseable line {}:{}: {}", stem, line_no, e);
                    continue;
                }
            };
            if let Some(hit) = score_entry(&entry, &stem, line_no, terms, filters) {
                hits.push(hit);
            }
        }
    }

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    Ok(hits)
}

fn score_entry(
    entry: &serde_json::Value,
    stem: &str,
    line_no: usize,
    terms: &[String],
    filters: &SearchFilters,
) -> Option<AdapterHit> {
    let content = entry
        .get("content")
        .or_else(|| entry.get("text"))
        .and_then(|c| c.as_str())?;

    let memory_type: Option<MemoryType> = entry.get("type").and_then(|t| t.as_str()).and_then(|t| t.parse().ok());
    let domain: Option<Domain> = entry.get("domain").and_then(|d| d.as_str()).and_then(|d| d.parse().ok());
    let created_at: Option<DateTime<Utc>> = entry
        .get("created_at")
        .or_else(|| entry.get("timestamp"))
        .and_then(|t| t.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    if !filters.matches_parts(memory_type, domain, created_at) {
        return None;
    }

    let score = keyword_score(content, terms);
    if score <= 0.0 {
        return None;
    }

    let id = entry
        .get("id")
        .and_then(|i| i.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", stem, line_no));

    Some(AdapterHit {
        id,
        score,
        content: Some(content.to_string()),
        memory_type,
        domain,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_transcript(dir: &Path, name: &str, lines: &[serde_json::Value]) {
        let body: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        fs::write(dir.join(name), body.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn test_search_scores_transcript_lines() {
        let dir = TempDir::new().unwrap();
        write_transcript(
            dir.path(),
            "2024-05-01.jsonl",
            &[
                json!({"content": "Talked about the quarterly budget", "timestamp": "2024-05-01T10:00:00Z"}),
                json!({"content": "Lunch was fine"}),
                json!({"id": "s-9", "text": "Budget review moved to Friday, budget owner is Sam"}),
            ],
        );
        fs::write(dir.path().join("notes.txt"), "budget budget budget").unwrap();

        let adapter = SessionSearchAdapter::new(dir.path());
        let hits = adapter.search("budget", &SearchFilters::default(), 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|h| h.id == "2024-05-01:1"));
        assert!(hits.iter().any(|h| h.id == "s-9"));
        assert!(hits.iter().all(|h| h.content.is_some()));
    }

    #[tokio::test]
    async fn test_store_then_search_round_trips_id() {
        let dir = TempDir::new().unwrap();
        let adapter = SessionSearchAdapter::new(dir.path());
        let memory = Memory::new("Promised to review the migration plan", MemoryType::Commitment, Domain::Work)
            .with_id("mem-1");

        assert_eq!(adapter.store(&memory).await.unwrap(), "mem-1");

        let filters = SearchFilters {
            types: vec![MemoryType::Commitment],
            ..SearchFilters::default()
        };
        let hits = adapter.search("migration plan", &filters, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "mem-1");
        assert_eq!(hits[0].domain, Some(Domain::Work));

        let wrong_type = SearchFilters {
            types: vec![MemoryType::Decision],
            ..SearchFilters::default()
        };
        assert!(adapter.search("migration", &wrong_type, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let adapter = SessionSearchAdapter::new(dir.path().join("nope"));
        assert_eq!(adapter.health().await, AdapterHealth::Unavailable);
        assert!(adapter.search("anything", &SearchFilters::default(), 5).await.is_err());

        let present = SessionSearchAdapter::new(dir.path());
        assert_eq!(present.health().await, AdapterHealth::Available);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("broken.jsonl"),
            "{not json}\n{\"content\": \"deploy failed again\"}\n",
        )
        .unwrap();
        let adapter = SessionSearchAdapter::new(dir.path());
        let hits = adapter.search("deploy", &SearchFilters::default(), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "broken:2");
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_hide_other_transcripts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jsonl"), "{\"content\": \"budget review moved\"}\n").unwrap();
        fs::write(dir.path().join("b.jsonl"), [0xff, 0xfe, b'\n']).unwrap();
        let mut mixed = b"{\"content\": \"budget \xff cut\"}\n".to_vec();
        mixed.extend_from_slice(b"{\"content\": \"budget approved\"}\n");
        fs::write(dir.path().join("c.jsonl"), mixed).unwrap();

        let adapter = SessionSearchAdapter::new(dir.path());
        let hits = adapter.search("budget", &SearchFilters::default(), 10).await.unwrap();
        let mut ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a:1", "c:1", "c:2"]);
    }
}
