//! HTTP client for a graph database used as a mirror of the relationship
//! store. Memories become nodes labelled by type; relationships become
//! typed edges.
//!
//! Endpoints (relative to the base URL):
//! - `POST /nodes` `{id, label, properties}` -> `{id}`
//! - `POST /edges` `{source, target, type, properties}`
//! - `POST /search` `{query, limit, labels, domain, since}` -> `{results: [...]}`
//! - `GET /health`

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{parse_hits, probe_health, Adapter, AdapterHealth, AdapterHit, AdapterKind, GraphMirror, SearchFilters};
use crate::memory_db::{Memory, Relationship};

pub struct GraphDatabaseAdapter {
    name: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl GraphDatabaseAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build graph HTTP client: {}", e))?;
        Ok(Self {
            name: "graph".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn post(&self, path: &str, payload: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http_client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Graph request to {} failed: {}", path, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Graph {} failed ({}): {}", path, status, body));
        }

        // Edge writes may answer with an empty body.
        let text = resp.text().await.unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("Failed to parse graph response: {}", e))
    }
}

#[async_trait]
impl Adapter for GraphDatabaseAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Graph
    }

    async fn store(&self, memory: &Memory) -> anyhow::Result<String> {
        let payload = json!({
            "id": memory.id,
            "label": memory.memory_type.node_label(),
            "properties": {
                "content": memory.content,
                "domain": memory.domain,
                "created_at": memory.created_at.to_rfc3339(),
                "metadata": memory.metadata,
            },
        });
        let body = self.post("/nodes", &payload).await?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| memory.id.clone());
        Ok(id)
    }

    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> anyhow::Result<Vec<AdapterHit>> {
        let labels: Vec<&str> = filters.types.iter().map(|t| t.node_label()).collect();
        let payload = json!({
            "query": query,
            "limit": limit,
            "labels": labels,
            "domain": filters.domain,
            "since": filters.since.map(|t| t.to_rfc3339()),
        });
        let body = self.post("/search", &payload).await?;
        let mut hits = parse_hits(&body)?;
        hits.truncate(limit);
        Ok(hits)
    }

    async fn health(&self) -> AdapterHealth {
        probe_health(&self.http_client, &format!("{}/health", self.base_url)).await
    }
}

#[async_trait]
impl GraphMirror for GraphDatabaseAdapter {
    async fn mirror_edge(&self, edge: &Relationship) -> anyhow::Result<()> {
        let payload = json!({
            "source": edge.source_id,
            "target": edge.target_id,
            "type": edge.rel_type.as_str(),
            "properties": {
                "strength": edge.strength,
                "metadata": edge.metadata,
                "updated_at": edge.updated_at.to_rfc3339(),
            },
        });
        self.post("/edges", &payload).await?;
        debug!(
            "Mirrored {} -[{}]-> {} to graph",
            edge.source_id, edge.rel_type, edge.target_id
        );
        Ok(())
    }
}
