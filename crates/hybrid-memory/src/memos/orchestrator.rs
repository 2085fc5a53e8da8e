//! Memory orchestrator: the `remember` / `recall` / `relate` / `reflect`
//! facade over the relationship store and the backend adapters.
//!
//! Adapters are consulted concurrently, each behind its own health check and
//! timeout. An adapter that is unavailable, slow or failing only shows up in
//! the per-source reports of the outcome; store failures propagate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapters::{Adapter, AdapterHealth, AdapterHit, AdapterKind, GraphMirror, SearchFilters};
use crate::error::{MemoryError, Result};
use crate::memory_db::{
    validate_id, validate_unit_interval, CorrelationCandidate, Direction, Domain, Insight, Memory, MemoryType,
    Metadata, Relationship, RelationshipStats, RelationshipStore, RelationshipType,
};
use crate::memos::merge::{self, RankedMemory};
use crate::memos::mirror::EdgeMirror;
use crate::metrics;

/// Source label for memories added by one-hop graph expansion.
pub const GRAPH_EXPANSION_SOURCE: &str = "relationships";

/// Source label for reflection without a topic.
pub const RECENT_SOURCE: &str = "recent";

/// Neighbors considered per expanded hit.
const EXPANSION_FANOUT: usize = 20;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Budget for each adapter health check and each adapter call.
    pub adapter_timeout: Duration,
    /// How long a health probe result is reported by `status`.
    pub health_ttl: Duration,
    pub graph_expansion_top_k: usize,
    pub graph_expansion_discount: f64,
    pub default_recall_limit: usize,
    /// Each adapter is asked for `limit * fanout` hits so merging has
    /// something to rank.
    pub search_fanout: usize,
    pub reflect_limit: usize,
    pub correlation_min_shared: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_millis(3000),
            health_ttl: Duration::from_secs(30),
            graph_expansion_top_k: 5,
            graph_expansion_discount: 0.7,
            default_recall_limit: 10,
            search_fanout: 2,
            reflect_limit: 20,
            correlation_min_shared: 2,
        }
    }
}

fn default_strength() -> f64 {
    1.0
}

fn default_hint_type() -> RelationshipType {
    RelationshipType::RelatedTo
}

fn default_true() -> bool {
    true
}

/// Link the new memory to an existing one as part of `remember`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedHint {
    pub memory_id: String,
    #[serde(default = "default_hint_type")]
    pub rel_type: RelationshipType,
    #[serde(default = "default_strength")]
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default)]
    pub metadata: Metadata,
    /// Caller-assigned id; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_to: Option<RelatedHint>,
}

impl RememberRequest {
    pub fn new(content: impl Into<String>, memory_type: MemoryType, domain: Domain) -> Self {
        Self {
            content: content.into(),
            memory_type,
            domain,
            metadata: Metadata::new(),
            id: None,
            created_at: None,
            related_to: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn related_to(mut self, memory_id: impl Into<String>, rel_type: RelationshipType, strength: f64) -> Self {
        self.related_to = Some(RelatedHint {
            memory_id: memory_id.into(),
            rel_type,
            strength,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Unavailable,
    Timeout,
    Failed,
}

/// What happened when one adapter was asked to do one thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub adapter: String,
    pub kind: AdapterKind,
    pub status: SourceStatus,
    pub hits: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl SourceReport {
    fn new(adapter: &dyn Adapter, status: SourceStatus, started: Instant, error: Option<MemoryError>) -> Self {
        Self {
            adapter: adapter.name().to_string(),
            kind: adapter.kind(),
            status,
            hits: 0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: error.map(|e| e.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SourceStatus::Ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberOutcome {
    pub memory: Memory,
    pub relationship: Option<Relationship>,
    /// Opaque ids assigned by each adapter that accepted the write.
    pub adapter_ids: BTreeMap<String, String>,
    pub reports: Vec<SourceReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallRequest {
    pub query: String,
    #[serde(default)]
    pub types: Vec<MemoryType>,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_true")]
    pub use_graph: bool,
    #[serde(default = "default_true")]
    pub use_vector: bool,
    #[serde(default = "default_true")]
    pub use_sessions: bool,
}

impl RecallRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            types: Vec::new(),
            domain: None,
            since: None,
            limit: None,
            use_graph: true,
            use_vector: true,
            use_sessions: true,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_types(mut self, types: Vec<MemoryType>) -> Self {
        self.types = types;
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn filters(&self) -> SearchFilters {
        SearchFilters {
            types: self.types.clone(),
            domain: self.domain,
            since: self.since,
        }
    }

    fn wants(&self, kind: AdapterKind) -> bool {
        match kind {
            AdapterKind::Vector => self.use_vector,
            AdapterKind::Graph => self.use_graph,
            AdapterKind::Session => self.use_sessions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallOutcome {
    pub memories: Vec<RankedMemory>,
    pub sources: Vec<SourceReport>,
    /// True when any consulted adapter did not answer.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelateRequest {
    pub from_id: String,
    pub to_id: String,
    pub relationship: RelationshipType,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub properties: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub timeframe_days: Option<u32>,
    #[serde(default)]
    pub domain: Option<Domain>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectOutcome {
    pub matches: Vec<RankedMemory>,
    pub correlations: Vec<CorrelationCandidate>,
    /// Unsurfaced insights that mention any matched memory.
    pub insights: Vec<Insight>,
    pub sources: Vec<SourceReport>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub name: String,
    pub kind: AdapterKind,
    pub health: AdapterHealth,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub adapters: Vec<AdapterStatus>,
    pub stats: RelationshipStats,
    pub mirror_enabled: bool,
    pub mirror_failures: usize,
}

#[derive(Debug, Clone, Copy)]
struct HealthSnapshot {
    health: AdapterHealth,
    checked_at: DateTime<Utc>,
}

pub struct MemoryOrchestrator {
    store: Arc<RelationshipStore>,
    adapters: Vec<Arc<dyn Adapter>>,
    mirror: Option<EdgeMirror>,
    health_cache: moka::future::Cache<String, HealthSnapshot>,
    config: OrchestratorConfig,
}

impl MemoryOrchestrator {
    /// Mirroring needs a tokio runtime; without one the orchestrator works
    /// but does not mirror edges.
    pub fn new(
        store: Arc<RelationshipStore>,
        adapters: Vec<Arc<dyn Adapter>>,
        mirror: Option<Arc<dyn GraphMirror>>,
        config: OrchestratorConfig,
    ) -> Self {
        let mirror = mirror
            .and_then(|target| EdgeMirror::spawn(target, config.adapter_timeout))
            .map(|(mirror, _worker)| mirror);

        let health_cache = moka::future::Cache::builder()
            .max_capacity(256)
            .time_to_live(config.health_ttl)
            .build();

        info!(
            "Memory orchestrator ready with {} adapter(s){}",
            adapters.len(),
            if mirror.is_some() { " and graph mirroring" } else { "" }
        );

        Self {
            store,
            adapters,
            mirror,
            health_cache,
            config,
        }
    }

    pub fn store(&self) -> &Arc<RelationshipStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    async fn probe(&self, adapter: &dyn Adapter) -> AdapterHealth {
        let health = match timeout(self.config.adapter_timeout, adapter.health()).await {
            Ok(health) => health,
            Err(_) => AdapterHealth::Unavailable,
        };
        self.record_health(adapter.name(), health).await;
        health
    }

    async fn record_health(&self, name: &str, health: AdapterHealth) {
        self.health_cache
            .insert(
                name.to_string(),
                HealthSnapshot {
                    health,
                    checked_at: Utc::now(),
                },
            )
            .await;
    }

    /// Health-check `adapter`, then run `op` under the adapter timeout.
    async fn invoke<T, F, Fut>(&self, adapter: &dyn Adapter, call: &'static str, op: F) -> (SourceReport, Option<T>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let name = adapter.name();

        if !self.probe(adapter).await.is_usable() {
            warn!("Skipping {} on adapter '{}': unavailable", call, name);
            metrics::inc_adapter_call(name, call, "unavailable");
            let error = MemoryError::AdapterUnavailable(name.to_string());
            return (SourceReport::new(adapter, SourceStatus::Unavailable, started, Some(error)), None);
        }

        match timeout(self.config.adapter_timeout, op()).await {
            Ok(Ok(value)) => {
                metrics::inc_adapter_call(name, call, "ok");
                (SourceReport::new(adapter, SourceStatus::Ok, started, None), Some(value))
            }
            Ok(Err(e)) => {
                let error = MemoryError::Adapter {
                    adapter: name.to_string(),
                    message: e.to_string(),
                };
                warn!("Adapter {} failed: {}", call, error);
                metrics::inc_adapter_call(name, call, "error");
                (SourceReport::new(adapter, SourceStatus::Failed, started, Some(error)), None)
            }
            Err(_) => {
                let error = MemoryError::AdapterTimeout {
                    adapter: name.to_string(),
                    after_ms: self.config.adapter_timeout.as_millis() as u64,
                };
                warn!("Adapter {} abandoned: {}", call, error);
                metrics::inc_adapter_call(name, call, "timeout");
                self.record_health(name, AdapterHealth::Unavailable).await;
                (SourceReport::new(adapter, SourceStatus::Timeout, started, Some(error)), None)
            }
        }
    }

    /// Record a memory locally, optionally link it, then fan the write out
    /// to every adapter. The local write either succeeds or the call fails;
    /// adapter failures only appear in the reports.
    pub async fn remember(&self, request: RememberRequest) -> Result<RememberOutcome> {
        let result = self.remember_inner(request).await;
        metrics::inc_memory_op("remember", if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn remember_inner(&self, request: RememberRequest) -> Result<RememberOutcome> {
        if request.content.trim().is_empty() {
            return Err(MemoryError::Validation("Memory content must not be empty".into()));
        }

        let mut memory = Memory::new(request.content, request.memory_type, request.domain)
            .with_metadata(request.metadata);
        if let Some(id) = request.id {
            memory = memory.with_id(id);
        }
        if let Some(created_at) = request.created_at {
            memory = memory.with_created_at(created_at);
        }

        if let Some(hint) = &request.related_to {
            validate_id(&hint.memory_id)?;
            validate_unit_interval(hint.strength)?;
            if hint.memory_id == memory.id {
                return Err(MemoryError::Validation("A memory cannot be related to itself".into()));
            }
        }

        self.store.memories.insert(&memory)?;

        let relationship = match &request.related_to {
            Some(hint) => {
                let id = self
                    .store
                    .link(&memory.id, &hint.memory_id, hint.rel_type, hint.strength, &Metadata::new())?;
                let edge = self.store.edges.get(id)?;
                if let (Some(mirror), Some(edge)) = (&self.mirror, &edge) {
                    mirror.send(edge.clone());
                }
                edge
            }
            None => None,
        };

        let results = join_all(
            self.adapters
                .iter()
                .map(|adapter| self.invoke(adapter.as_ref(), "store", || adapter.store(&memory))),
        )
        .await;

        let mut adapter_ids = BTreeMap::new();
        let mut reports = Vec::with_capacity(results.len());
        for (report, external_id) in results {
            if let Some(external_id) = external_id {
                if let Err(e) = self
                    .store
                    .memories
                    .record_adapter_ref(&memory.id, &report.adapter, &external_id)
                {
                    warn!("Could not record {} id for {}: {}", report.adapter, memory.id, e);
                }
                adapter_ids.insert(report.adapter.clone(), external_id);
            }
            reports.push(report);
        }

        info!(
            "Remembered {} ({}, {}) in {}/{} adapter(s)",
            memory.id,
            memory.memory_type,
            memory.domain,
            adapter_ids.len(),
            self.adapters.len()
        );

        Ok(RememberOutcome {
            memory,
            relationship,
            adapter_ids,
            reports,
        })
    }

    /// Query the selected adapters in parallel, merge their results and,
    /// when `use_graph` is set, expand the top hits one hop through the
    /// relationship graph.
    pub async fn recall(&self, request: RecallRequest) -> Result<RecallOutcome> {
        let started = Instant::now();
        let result = self.recall_inner(&request).await;
        metrics::observe_recall(started.elapsed().as_secs_f64());
        let status = match &result {
            Ok(outcome) if outcome.degraded => "degraded",
            Ok(_) => "ok",
            Err(_) => "error",
        };
        metrics::inc_memory_op("recall", status);
        result
    }

    async fn recall_inner(&self, request: &RecallRequest) -> Result<RecallOutcome> {
        let limit = request.limit.unwrap_or(self.config.default_recall_limit);
        let filters = request.filters();
        let per_adapter = limit.saturating_mul(self.config.search_fanout.max(1)).max(limit);
        let query = request.query.as_str();

        let selected: Vec<&Arc<dyn Adapter>> = self
            .adapters
            .iter()
            .filter(|adapter| request.wants(adapter.kind()))
            .collect();

        let results = join_all(selected.iter().map(|adapter| {
            let filters = &filters;
            self.invoke(adapter.as_ref(), "search", move || adapter.search(query, filters, per_adapter))
        }))
        .await;

        let now = Utc::now();
        let mut by_source: BTreeMap<String, Vec<(Memory, f64)>> = BTreeMap::new();
        let mut sources = Vec::with_capacity(results.len());
        for (mut report, hits) in results {
            if let Some(hits) = hits {
                report.hits = hits.len();
                let resolved = self.resolve_hits(&report.adapter, hits, &filters, now)?;
                if !resolved.is_empty() {
                    by_source.insert(report.adapter.clone(), resolved);
                }
            }
            sources.push(report);
        }

        let mut ranked = merge::merge(&by_source, now, usize::MAX);
        if request.use_graph && self.config.graph_expansion_top_k > 0 {
            self.expand_graph(&mut ranked, &filters)?;
        }
        let memories = merge::sort_and_truncate(ranked, limit);

        let degraded = sources.iter().any(|s| !s.is_ok());
        debug!(
            "Recall '{}' -> {} memories from {} source(s){}",
            request.query,
            memories.len(),
            sources.len(),
            if degraded { " (degraded)" } else { "" }
        );

        Ok(RecallOutcome {
            memories,
            sources,
            degraded,
        })
    }

    /// Map adapter hits to memories. Hit ids are looked up through the
    /// recorded adapter ids, then as local ids; hits unknown locally are
    /// kept when the backend returned their text.
    fn resolve_hits(
        &self,
        adapter: &str,
        hits: Vec<AdapterHit>,
        filters: &SearchFilters,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Memory, f64)>> {
        let mut local_ids = Vec::with_capacity(hits.len());
        for hit in &hits {
            let local = self.store.memories.resolve_adapter_ref(adapter, &hit.id)?;
            local_ids.push(local.unwrap_or_else(|| hit.id.clone()));
        }
        let known = self.store.memories.get_many(&local_ids)?;

        let mut resolved = Vec::with_capacity(hits.len());
        for (hit, local_id) in hits.into_iter().zip(local_ids) {
            let memory = match known.get(&local_id) {
                Some(memory) => memory.clone(),
                None => match synthesize(adapter, &hit, now) {
                    Some(memory) => memory,
                    None => {
                        debug!("Dropping {} hit {}: unknown locally and no content", adapter, hit.id);
                        continue;
                    }
                },
            };
            if filters.matches(&memory) {
                resolved.push((memory, hit.score));
            }
        }
        Ok(resolved)
    }

    fn expand_graph(&self, ranked: &mut Vec<RankedMemory>, filters: &SearchFilters) -> Result<()> {
        let present: HashSet<String> = ranked.iter().map(|r| r.memory.id.clone()).collect();
        let mut additions: BTreeMap<String, f64> = BTreeMap::new();

        for parent in ranked.iter().take(self.config.graph_expansion_top_k) {
            // Hits synthesized from backend text may carry ids the store never saw.
            if validate_id(&parent.memory.id).is_err() {
                continue;
            }
            let neighbors =
                self.store
                    .get_related(&parent.memory.id, None, Direction::Both, 0.0, Some(EXPANSION_FANOUT))?;
            for neighbor in neighbors {
                if present.contains(&neighbor.memory_id) {
                    continue;
                }
                let score = parent.score * self.config.graph_expansion_discount;
                let best = additions.entry(neighbor.memory_id).or_insert(score);
                if score > *best {
                    *best = score;
                }
            }
        }
        if additions.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = additions.keys().cloned().collect();
        let found: HashMap<String, Memory> = self.store.memories.get_many(&ids)?;
        for (id, score) in additions {
            if let Some(memory) = found.get(&id) {
                if filters.matches(memory) {
                    ranked.push(RankedMemory {
                        memory: memory.clone(),
                        score,
                        sources: vec![GRAPH_EXPANSION_SOURCE.to_string()],
                    });
                }
            }
        }
        Ok(())
    }

    /// Link two memories and hand the edge to the graph mirror without
    /// waiting for it.
    pub async fn relate(&self, request: RelateRequest) -> Result<Relationship> {
        let result = self.relate_inner(request);
        metrics::inc_memory_op("relate", if result.is_ok() { "ok" } else { "error" });
        result
    }

    fn relate_inner(&self, request: RelateRequest) -> Result<Relationship> {
        let id = self.store.link(
            &request.from_id,
            &request.to_id,
            request.relationship,
            request.strength,
            &request.properties,
        )?;
        let edge = self
            .store
            .edges
            .get(id)?
            .ok_or_else(|| MemoryError::not_found("relationship", id.to_string()))?;

        if let Some(mirror) = &self.mirror {
            mirror.send(edge.clone());
        }
        Ok(edge)
    }

    /// Recall within a timeframe, then look for correlated pairs among the
    /// matches. Without a topic, the most recent memories in the timeframe
    /// are reviewed instead.
    pub async fn reflect(&self, request: ReflectRequest) -> Result<ReflectOutcome> {
        let result = self.reflect_inner(request).await;
        metrics::inc_memory_op("reflect", if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn reflect_inner(&self, request: ReflectRequest) -> Result<ReflectOutcome> {
        let now = Utc::now();
        let since = request
            .timeframe_days
            .map(|days| now - chrono::Duration::days(i64::from(days)));
        let limit = self.config.reflect_limit;

        let (matches, sources, degraded) = if request.topic.trim().is_empty() {
            let recent = self.store.memories.recent(request.domain, since, limit)?;
            let matches = recent
                .into_iter()
                .map(|memory| RankedMemory {
                    score: merge::recency_multiplier(&memory, now),
                    memory,
                    sources: vec![RECENT_SOURCE.to_string()],
                })
                .collect();
            (matches, Vec::new(), false)
        } else {
            let recall = RecallRequest {
                query: request.topic.clone(),
                types: Vec::new(),
                domain: request.domain,
                since,
                limit: Some(limit),
                use_graph: true,
                use_vector: true,
                use_sessions: true,
            };
            let outcome = self.recall_inner(&recall).await?;
            (outcome.memories, outcome.sources, outcome.degraded)
        };

        let ids: Vec<String> = matches.iter().map(|m| m.memory.id.clone()).collect();
        let correlations = self
            .store
            .get_correlation_candidates(&ids, self.config.correlation_min_shared)?;
        let insights = self.store.insights.pending_touching(&ids, 0.0)?;

        info!(
            "Reflected on '{}': {} matches, {} correlations, {} pending insights",
            request.topic,
            matches.len(),
            correlations.len(),
            insights.len()
        );

        Ok(ReflectOutcome {
            matches,
            correlations,
            insights,
            sources,
            degraded,
        })
    }

    /// Last-known adapter health plus store statistics. Adapters whose
    /// cached health has expired are probed again.
    pub async fn status(&self) -> Result<StatusReport> {
        let mut adapters = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let snapshot = match self.health_cache.get(adapter.name()).await {
                Some(snapshot) => snapshot,
                None => {
                    let health = self.probe(adapter.as_ref()).await;
                    HealthSnapshot {
                        health,
                        checked_at: Utc::now(),
                    }
                }
            };
            adapters.push(AdapterStatus {
                name: adapter.name().to_string(),
                kind: adapter.kind(),
                health: snapshot.health,
                checked_at: snapshot.checked_at,
            });
        }

        Ok(StatusReport {
            adapters,
            stats: self.store.get_stats()?,
            mirror_enabled: self.mirror.is_some(),
            mirror_failures: self.mirror.as_ref().map_or(0, EdgeMirror::failure_count),
        })
    }

    /// Probe every adapter now, in parallel.
    pub async fn refresh_health(&self) -> Vec<AdapterStatus> {
        let healths = join_all(self.adapters.iter().map(|adapter| self.probe(adapter.as_ref()))).await;
        let now = Utc::now();
        self.adapters
            .iter()
            .zip(healths)
            .map(|(adapter, health)| AdapterStatus {
                name: adapter.name().to_string(),
                kind: adapter.kind(),
                health,
                checked_at: now,
            })
            .collect()
    }
}

fn synthesize(adapter: &str, hit: &AdapterHit, now: DateTime<Utc>) -> Option<Memory> {
    let content = hit.content.as_ref()?;
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), serde_json::Value::String(adapter.to_string()));
    Some(Memory {
        id: hit.id.clone(),
        content: content.clone(),
        memory_type: hit.memory_type.unwrap_or(MemoryType::Conversation),
        domain: hit.domain.unwrap_or_default(),
        created_at: hit.created_at.unwrap_or(now),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryAdapter;

    struct Fixture {
        orchestrator: MemoryOrchestrator,
        vector: InMemoryAdapter,
        graph: InMemoryAdapter,
        session: InMemoryAdapter,
    }

    fn fixture_with(config: OrchestratorConfig) -> Fixture {
        let store = Arc::new(RelationshipStore::new_in_memory().unwrap());
        let vector = InMemoryAdapter::new("vector", AdapterKind::Vector);
        let graph = InMemoryAdapter::new("graph", AdapterKind::Graph);
        let session = InMemoryAdapter::new("session", AdapterKind::Session);
        let adapters: Vec<Arc<dyn Adapter>> = vec![
            Arc::new(vector.clone()),
            Arc::new(graph.clone()),
            Arc::new(session.clone()),
        ];
        let orchestrator = MemoryOrchestrator::new(store, adapters, Some(Arc::new(graph.clone())), config);
        Fixture {
            orchestrator,
            vector,
            graph,
            session,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(OrchestratorConfig {
            adapter_timeout: Duration::from_millis(200),
            ..OrchestratorConfig::default()
        })
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_remember_writes_everywhere() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .remember(RememberRequest::new("Chose Postgres for billing", MemoryType::Decision, Domain::Work).with_id("d1"))
            .await
            .unwrap();

        assert_eq!(outcome.adapter_ids.len(), 3);
        assert!(outcome.reports.iter().all(|r| r.is_ok()));
        assert!(f.vector.contains("d1") && f.graph.contains("d1") && f.session.contains("d1"));
        assert_eq!(
            f.orchestrator.store().memories.resolve_adapter_ref("vector", "vector:d1").unwrap(),
            Some("d1".to_string())
        );
    }

    #[tokio::test]
    async fn test_remember_partial_success_is_success() {
        let f = fixture();
        f.vector.set_failure(Some("index offline"));
        f.session.set_health(AdapterHealth::Unavailable);

        let outcome = f
            .orchestrator
            .remember(RememberRequest::new("Slept five hours", MemoryType::Observation, Domain::Health).with_id("o1"))
            .await
            .unwrap();

        assert_eq!(outcome.adapter_ids.keys().collect::<Vec<_>>(), vec!["graph"]);
        let status: BTreeMap<&str, SourceStatus> =
            outcome.reports.iter().map(|r| (r.adapter.as_str(), r.status)).collect();
        assert_eq!(status["vector"], SourceStatus::Failed);
        assert_eq!(status["session"], SourceStatus::Unavailable);
        assert!(f.orchestrator.store().memories.get("o1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remember_rejects_invalid_input_before_writing() {
        let f = fixture();
        let empty = f
            .orchestrator
            .remember(RememberRequest::new("  ", MemoryType::Decision, Domain::Work))
            .await;
        assert!(empty.unwrap_err().is_validation());

        let bad_hint = f
            .orchestrator
            .remember(
                RememberRequest::new("x", MemoryType::Decision, Domain::Work)
                    .with_id("x1")
                    .related_to("other", RelationshipType::Supports, 2.0),
            )
            .await;
        assert!(matches!(bad_hint, Err(MemoryError::InvalidStrength(_))));
        assert!(f.orchestrator.store().memories.get("x1").unwrap().is_none());
        assert!(f.vector.is_empty());
    }

    #[tokio::test]
    async fn test_remember_with_hint_links_and_mirrors() {
        let f = fixture();
        f.orchestrator
            .remember(RememberRequest::new("Outage on Monday", MemoryType::Observation, Domain::Work).with_id("outage"))
            .await
            .unwrap();
        let outcome = f
            .orchestrator
            .remember(
                RememberRequest::new("Add canary deploys", MemoryType::Decision, Domain::Work)
                    .with_id("canary")
                    .related_to("outage", RelationshipType::LearnedFrom, 0.9),
            )
            .await
            .unwrap();

        let edge = outcome.relationship.unwrap();
        assert_eq!(edge.source_id, "canary");
        assert_eq!(edge.target_id, "outage");
        assert_eq!(edge.rel_type, RelationshipType::LearnedFrom);

        wait_for(|| f.graph.mirrored_edges().len() == 1).await;
        assert_eq!(f.graph.mirrored_edges()[0].id, edge.id);
    }

    #[tokio::test]
    async fn test_recall_merges_and_ranks_shared_hits_first() {
        let f = fixture();
        for id in ["v1", "v2", "v3", "g1"] {
            f.orchestrator
                .remember(RememberRequest::new(format!("memory {}", id), MemoryType::Observation, Domain::Work).with_id(id))
                .await
                .unwrap();
        }
        f.vector.script_results(vec![
            AdapterHit::new("v1", 0.95),
            AdapterHit::new("v2", 0.90),
            AdapterHit::new("v3", 0.60),
        ]);
        f.graph.script_results(vec![
            AdapterHit::new("v1", 4.0),
            AdapterHit::new("v2", 3.0),
            AdapterHit::new("g1", 1.0),
        ]);
        f.session.script_results(Vec::new());

        let mut request = RecallRequest::new("anything");
        request.use_graph = true;
        let outcome = f.orchestrator.recall(request).await.unwrap();

        assert!(!outcome.degraded);
        assert_eq!(outcome.memories.len(), 4);
        let ids: Vec<&str> = outcome.memories.iter().map(|m| m.memory.id.as_str()).collect();
        assert_eq!(&ids[..2], &["v1", "v2"]);
        assert!(outcome.memories[..2].iter().all(|m| m.sources.len() == 2));
        assert!(outcome.memories[2..].iter().all(|m| m.sources.len() == 1));
    }

    #[tokio::test]
    async fn test_recall_survives_timeouts_and_failures() {
        let f = fixture();
        f.orchestrator
            .remember(RememberRequest::new("Budget approved", MemoryType::Decision, Domain::Work).with_id("b1"))
            .await
            .unwrap();

        f.vector.set_latency(Some(Duration::from_secs(5)));
        f.graph.set_failure(Some("graph down"));

        let started = Instant::now();
        let outcome = f.orchestrator.recall(RecallRequest::new("budget")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(outcome.degraded);
        let status: BTreeMap<&str, SourceStatus> =
            outcome.sources.iter().map(|r| (r.adapter.as_str(), r.status)).collect();
        assert_eq!(status["vector"], SourceStatus::Timeout);
        assert_eq!(status["graph"], SourceStatus::Failed);
        assert_eq!(status["session"], SourceStatus::Ok);
        assert_eq!(outcome.memories.len(), 1);
        assert_eq!(outcome.memories[0].memory.id, "b1");
    }

    #[tokio::test]
    async fn test_recall_with_every_adapter_down_is_empty_not_error() {
        let f = fixture();
        for adapter in [&f.vector, &f.graph, &f.session] {
            adapter.set_health(AdapterHealth::Unavailable);
        }
        let outcome = f.orchestrator.recall(RecallRequest::new("anything")).await.unwrap();
        assert!(outcome.degraded);
        assert!(outcome.memories.is_empty());
        assert!(outcome.sources.iter().all(|s| s.status == SourceStatus::Unavailable));
    }

    #[tokio::test]
    async fn test_graph_expansion_adds_discounted_neighbors() {
        let f = fixture();
        for (id, content) in [("hit", "deploy freeze announced"), ("cause", "incident review"), ("far", "unrelated")] {
            f.orchestrator
                .remember(RememberRequest::new(content, MemoryType::Observation, Domain::Work).with_id(id))
                .await
                .unwrap();
        }
        f.orchestrator
            .relate(RelateRequest {
                from_id: "cause".into(),
                to_id: "hit".into(),
                relationship: RelationshipType::Caused,
                strength: 0.8,
                properties: Metadata::new(),
            })
            .await
            .unwrap();

        let mut request = RecallRequest::new("deploy freeze");
        request.use_vector = false;
        request.use_sessions = false;
        f.graph.script_results(vec![AdapterHit::new("hit", 1.0)]);

        let outcome = f.orchestrator.recall(request.clone()).await.unwrap();
        let ids: Vec<&str> = outcome.memories.iter().map(|m| m.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["hit", "cause"]);
        let expanded = &outcome.memories[1];
        assert_eq!(expanded.sources, vec![GRAPH_EXPANSION_SOURCE]);
        assert!((expanded.score - outcome.memories[0].score * 0.7).abs() < 1e-9);

        request.use_graph = false;
        request.use_vector = true;
        f.vector.script_results(vec![AdapterHit::new("hit", 1.0)]);
        let flat = f.orchestrator.recall(request).await.unwrap();
        assert_eq!(flat.memories.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_hits_with_content_are_kept() {
        let f = fixture();
        f.session.script_results(vec![AdapterHit::new("2024-05-01:3", 0.7).with_content("talked about the budget")]);
        f.vector.script_results(vec![AdapterHit::new("ghost", 0.9)]);
        f.graph.script_results(Vec::new());

        let outcome = f.orchestrator.recall(RecallRequest::new("budget")).await.unwrap();
        assert_eq!(outcome.memories.len(), 1);
        let memory = &outcome.memories[0].memory;
        assert_eq!(memory.id, "2024-05-01:3");
        assert_eq!(memory.memory_type, MemoryType::Conversation);
        assert_eq!(memory.metadata["source"], "session");
    }

    #[tokio::test]
    async fn test_relate_validates_and_upserts() {
        let f = fixture();
        let relate = |strength: f64| RelateRequest {
            from_id: "a".into(),
            to_id: "b".into(),
            relationship: RelationshipType::Caused,
            strength,
            properties: Metadata::new(),
        };
        let first = f.orchestrator.relate(relate(0.9)).await.unwrap();
        let second = f.orchestrator.relate(relate(0.4)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.strength, 0.4);
        assert!(matches!(
            f.orchestrator.relate(relate(1.4)).await,
            Err(MemoryError::InvalidStrength(_))
        ));

        wait_for(|| f.graph.mirrored_edges().len() == 2).await;
        assert_eq!(f.graph.mirrored_edges().len(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_cached_health() {
        let f = fixture();
        f.session.set_health(AdapterHealth::Degraded);
        let status = f.orchestrator.status().await.unwrap();
        assert_eq!(status.adapters.len(), 3);
        assert!(status.mirror_enabled);
        let session = status.adapters.iter().find(|a| a.name == "session").unwrap();
        assert_eq!(session.health, AdapterHealth::Degraded);

        // Cached until refreshed.
        f.session.set_health(AdapterHealth::Available);
        let cached = f.orchestrator.status().await.unwrap();
        assert_eq!(
            cached.adapters.iter().find(|a| a.name == "session").unwrap().health,
            AdapterHealth::Degraded
        );

        let refreshed = f.orchestrator.refresh_health().await;
        assert!(refreshed.iter().all(|a| a.health == AdapterHealth::Available));
    }

    #[tokio::test]
    async fn test_reflect_finds_correlations_in_timeframe() {
        let f = fixture_with(OrchestratorConfig {
            adapter_timeout: Duration::from_millis(200),
            graph_expansion_top_k: 0,
            ..OrchestratorConfig::default()
        });
        let o = &f.orchestrator;
        for (id, content) in [
            ("sleep_poor", "sleep was poor again"),
            ("missed_deadline", "missed the deadline, poor sleep blamed"),
            ("late_night", "late night coding"),
            ("caffeine", "too much caffeine"),
        ] {
            o.remember(RememberRequest::new(content, MemoryType::Observation, Domain::Health).with_id(id))
                .await
                .unwrap();
        }
        for n in ["late_night", "caffeine"] {
            for (from, to) in [("sleep_poor", n), (n, "missed_deadline")] {
                o.relate(RelateRequest {
                    from_id: from.into(),
                    to_id: to.into(),
                    relationship: RelationshipType::RelatedTo,
                    strength: 0.8,
                    properties: Metadata::new(),
                })
                .await
                .unwrap();
            }
        }

        let outcome = o
            .reflect(ReflectRequest {
                topic: "poor sleep".into(),
                timeframe_days: Some(7),
                domain: Some(Domain::Health),
            })
            .await
            .unwrap();

        let ids: HashSet<&str> = outcome.matches.iter().map(|m| m.memory.id.as_str()).collect();
        assert!(ids.contains("sleep_poor") && ids.contains("missed_deadline"));
        assert_eq!(outcome.correlations.len(), 1);
        assert_eq!(outcome.correlations[0].shared_connections, 2);

        let review = o
            .reflect(ReflectRequest {
                topic: String::new(),
                timeframe_days: Some(7),
                domain: None,
            })
            .await
            .unwrap();
        assert_eq!(review.matches.len(), 4);
        assert!(review.matches.iter().all(|m| m.sources == vec![RECENT_SOURCE]));
    }
}
