//! In-process backend. Keeps memories in a `DashMap` and scores them by
//! keyword, or returns scripted hits. Health, latency and failures can be
//! set at runtime, which makes it the backend of choice for embedding the
//! core without external services and for exercising degradation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::text::{keyword_score, query_terms};
use super::{Adapter, AdapterHealth, AdapterHit, AdapterKind, GraphMirror, SearchFilters};
use crate::memory_db::{Memory, Relationship};

#[derive(Debug, Clone)]
struct Behavior {
    health: AdapterHealth,
    latency: Option<Duration>,
    failure: Option<String>,
    scripted: Option<Vec<AdapterHit>>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            health: AdapterHealth::Available,
            latency: None,
            failure: None,
            scripted: None,
        }
    }
}

#[derive(Clone)]
pub struct InMemoryAdapter {
    name: String,
    kind: AdapterKind,
    records: Arc<DashMap<String, Memory>>,
    behavior: Arc<Mutex<Behavior>>,
    mirrored: Arc<Mutex<Vec<Relationship>>>,
}

impl InMemoryAdapter {
    pub fn new(name: impl Into<String>, kind: AdapterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            records: Arc::new(DashMap::new()),
            behavior: Arc::new(Mutex::new(Behavior::default())),
            mirrored: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn behavior(&self) -> MutexGuard<'_, Behavior> {
        self.behavior.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_health(&self, health: AdapterHealth) {
        self.behavior().health = health;
    }

    /// Delay applied to every `store` and `search` call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.behavior().latency = latency;
    }

    /// Make `store` and `search` fail with `message` until cleared.
    pub fn set_failure(&self, message: Option<&str>) {
        self.behavior().failure = message.map(str::to_string);
    }

    /// Return these hits from `search` instead of scoring stored records.
    pub fn script_results(&self, hits: Vec<AdapterHit>) {
        self.behavior().scripted = Some(hits);
    }

    /// External id this adapter hands out for a memory.
    pub fn external_id(&self, memory_id: &str) -> String {
        format!("{}:{}", self.name, memory_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, memory_id: &str) -> bool {
        self.records.contains_key(&self.external_id(memory_id))
    }

    pub fn mirrored_edges(&self) -> Vec<Relationship> {
        self.mirrored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply the configured latency and failure, without holding the lock
    /// across the sleep.
    async fn before_call(&self, call: &str) -> anyhow::Result<()> {
        let (latency, failure) = {
            let behavior = self.behavior();
            (behavior.latency, behavior.failure.clone())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = failure {
            return Err(anyhow::anyhow!("{} {} failed: {}", self.name, call, message));
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for InMemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn store(&self, memory: &Memory) -> anyhow::Result<String> {
        self.before_call("store").await?;
        let id = self.external_id(&memory.id);
        self.records.insert(id.clone(), memory.clone());
        Ok(id)
    }

    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> anyhow::Result<Vec<AdapterHit>> {
        self.before_call("search").await?;

        let scripted = self.behavior().scripted.clone();
        if let Some(mut hits) = scripted {
            hits.truncate(limit);
            return Ok(hits);
        }

        let terms = query_terms(query);
        let mut hits: Vec<AdapterHit> = self
            .records
            .iter()
            .filter(|entry| filters.matches(entry.value()))
            .filter_map(|entry| {
                let memory = entry.value();
                let score = keyword_score(&memory.content, &terms);
                (score > 0.0).then(|| AdapterHit {
                    id: entry.key().clone(),
                    score,
                    content: Some(memory.content.clone()),
                    memory_type: Some(memory.memory_type),
                    domain: Some(memory.domain),
                    created_at: Some(memory.created_at),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn health(&self) -> AdapterHealth {
        self.behavior().health
    }
}

#[async_trait]
impl GraphMirror for InMemoryAdapter {
    async fn mirror_edge(&self, edge: &Relationship) -> anyhow::Result<()> {
        self.before_call("mirror").await?;
        self.mirrored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(edge.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::{Domain, MemoryType};

    #[tokio::test]
    async fn test_store_and_keyword_search() {
        let adapter = InMemoryAdapter::new("local", AdapterKind::Vector);
        let a = Memory::new("Moved standup to 10am", MemoryType::Decision, Domain::Work).with_id("a");
        let b = Memory::new("Standup notes about the outage", MemoryType::Observation, Domain::Work).with_id("b");
        let c = Memory::new("Dentist on Tuesday", MemoryType::Commitment, Domain::Health).with_id("c");
        for m in [&a, &b, &c] {
            adapter.store(m).await.unwrap();
        }
        assert_eq!(adapter.len(), 3);
        assert!(adapter.contains("a"));

        let hits = adapter.search("standup outage", &SearchFilters::default(), 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "local:b");

        let decisions = SearchFilters {
            types: vec![MemoryType::Decision],
            ..SearchFilters::default()
        };
        let hits = adapter.search("standup", &decisions, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "local:a");
    }

    #[tokio::test]
    async fn test_scripted_results_and_failures() {
        let adapter = InMemoryAdapter::new("scripted", AdapterKind::Graph);
        adapter.script_results(vec![AdapterHit::new("x", 2.0), AdapterHit::new("y", 1.0)]);
        let hits = adapter.search("anything", &SearchFilters::default(), 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "x");

        adapter.set_failure(Some("disk on fire"));
        let err = adapter.search("anything", &SearchFilters::default(), 1).await.unwrap_err();
        assert!(err.to_string().contains("disk on fire"));

        adapter.set_failure(None);
        adapter.set_health(AdapterHealth::Degraded);
        assert_eq!(adapter.health().await, AdapterHealth::Degraded);
    }

    #[tokio::test]
    async fn test_mirror_records_edges() {
        let adapter = InMemoryAdapter::new("graph", AdapterKind::Graph);
        let now = chrono::Utc::now();
        let edge = Relationship {
            id: 3,
            source_id: "a".into(),
            target_id: "b".into(),
            rel_type: crate::memory_db::RelationshipType::Supports,
            strength: 0.5,
            metadata: Default::default(),
            created_at: now,
            updated_at: now,
        };
        adapter.mirror_edge(&edge).await.unwrap();
        assert_eq!(adapter.mirrored_edges(), vec![edge]);
    }
}
