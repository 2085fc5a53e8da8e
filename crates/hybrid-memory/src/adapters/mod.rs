//! Backend adapters: one polymorphic contract over vector search, graph
//! database and session search collaborators.
pub mod graph;
pub mod memory;
pub mod session;
pub mod text;
pub mod vector;

pub use graph::GraphDatabaseAdapter;
pub use memory::InMemoryAdapter;
pub use session::SessionSearchAdapter;
pub use vector::VectorSearchAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::memory_db::{Domain, Memory, MemoryType, Relationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Vector,
    Graph,
    Session,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Vector => "vector",
            AdapterKind::Graph => "graph",
            AdapterKind::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterHealth {
    Available,
    Degraded,
    Unavailable,
}

impl AdapterHealth {
    pub fn is_usable(&self) -> bool {
        !matches!(self, AdapterHealth::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterHealth::Available => "available",
            AdapterHealth::Degraded => "degraded",
            AdapterHealth::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for AdapterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restrictions a search applies on top of the query text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub types: Vec<MemoryType>,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn matches(&self, memory: &Memory) -> bool {
        self.matches_parts(Some(memory.memory_type), Some(memory.domain), Some(memory.created_at))
    }

    /// Unknown attributes pass the corresponding filter.
    pub fn matches_parts(
        &self,
        memory_type: Option<MemoryType>,
        domain: Option<Domain>,
        created_at: Option<DateTime<Utc>>,
    ) -> bool {
        if let (false, Some(t)) = (self.types.is_empty(), memory_type) {
            if !self.types.contains(&t) {
                return false;
            }
        }
        if let (Some(wanted), Some(d)) = (self.domain, domain) {
            if wanted != d {
                return false;
            }
        }
        if let (Some(since), Some(at)) = (self.since, created_at) {
            if at < since {
                return false;
            }
        }
        true
    }
}

/// One search result in the adapter's own id space and score scale.
/// Backends that hold the text return it so the hit can be shown even when
/// the local store has never seen the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterHit {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AdapterHit {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            content: None,
            memory_type: None,
            domain: None,
            created_at: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Contract every storage/search backend implements. `name` and `kind` are
/// identification only; the behavior is the three async calls.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Best-effort write; returns the backend's opaque id for the memory.
    async fn store(&self, memory: &Memory) -> anyhow::Result<String>;

    /// Ranked hits with adapter-local scores.
    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> anyhow::Result<Vec<AdapterHit>>;

    async fn health(&self) -> AdapterHealth;
}

/// Receives relationship edges for mirroring. A mirror is never the source
/// of truth; failures are logged by the caller and otherwise ignored.
#[async_trait]
pub trait GraphMirror: Send + Sync {
    async fn mirror_edge(&self, edge: &Relationship) -> anyhow::Result<()>;
}

/// Interpret a `GET /health` style response. 2xx is available unless the
/// body reports `"status": "degraded"`, other 4xx are degraded, everything
/// else is unavailable.
pub(crate) async fn probe_health(client: &reqwest::Client, url: &str) -> AdapterHealth {
    let resp = match client.get(url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!("Health probe {} failed: {}", url, e);
            return AdapterHealth::Unavailable;
        }
    };

    let status = resp.status();
    if status.is_success() {
        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        match body.get("status").and_then(|s| s.as_str()) {
            Some(s) if s.eq_ignore_ascii_case("degraded") => AdapterHealth::Degraded,
            Some(s) if s.eq_ignore_ascii_case("unavailable") => AdapterHealth::Unavailable,
            _ => AdapterHealth::Available,
        }
    } else if status.is_client_error() {
        AdapterHealth::Degraded
    } else {
        AdapterHealth::Unavailable
    }
}

/// Parse the `{"results": [...]}` envelope shared by the HTTP backends.
pub(crate) fn parse_hits(body: &serde_json::Value) -> anyhow::Result<Vec<AdapterHit>> {
    let results = body
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Response has no 'results' array"))?;

    let mut hits = Vec::with_capacity(results.len());
    for item in results {
        let id = match item.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
        let payload = item.get("payload").unwrap_or(item);
        hits.push(AdapterHit {
            id,
            score,
            content: payload.get("content").and_then(|c| c.as_str()).map(str::to_string),
            memory_type: payload
                .get("type")
                .and_then(|t| t.as_str())
                .and_then(|t| t.parse().ok()),
            domain: payload
                .get("domain")
                .and_then(|d| d.as_str())
                .and_then(|d| d.parse().ok()),
            created_at: payload
                .get("created_at")
                .and_then(|c| c.as_str())
                .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                .map(|c| c.with_timezone(&Utc)),
        });
    }
    Ok(hits)
}
