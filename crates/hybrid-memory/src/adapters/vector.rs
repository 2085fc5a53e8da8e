//! HTTP client for a vector-similarity service. The service owns embedding
//! generation; this side only ships text and metadata.
//!
//! Endpoints (relative to the base URL):
//! - `POST /collections/{c}/points` `{id, content, metadata}` -> `{id}`
//! - `POST /collections/{c}/search` `{query, limit, filter}` -> `{results: [{id, score, payload?}]}`
//! - `GET /health`

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{parse_hits, probe_health, Adapter, AdapterHealth, AdapterHit, AdapterKind, SearchFilters};
use crate::memory_db::Memory;

pub struct VectorSearchAdapter {
    name: String,
    base_url: String,
    collection: String,
    http_client: reqwest::Client,
}

impl VectorSearchAdapter {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build vector HTTP client: {}", e))?;
        Ok(Self {
            name: "vector".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            http_client,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}/{}", self.base_url, self.collection, suffix)
    }
}

#[async_trait]
impl Adapter for VectorSearchAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Vector
    }

    async fn store(&self, memory: &Memory) -> anyhow::Result<String> {
        let payload = json!({
            "id": memory.id,
            "content": memory.content,
            "metadata": {
                "memory_id": memory.id,
                "type": memory.memory_type,
                "domain": memory.domain,
                "created_at": memory.created_at.to_rfc3339(),
                "extra": memory.metadata,
            },
        });

        let resp = self
            .http_client
            .post(self.collection_url("points"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Vector store request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Vector store failed ({}): {}", status, body));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse vector store response: {}", e))?;

        let id = match body.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => memory.id.clone(),
        };
        debug!("Vector service stored {} as {}", memory.id, id);
        Ok(id)
    }

    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize) -> anyhow::Result<Vec<AdapterHit>> {
        let payload = json!({
            "query": query,
            "limit": limit,
            "filter": {
                "types": filters.types,
                "domain": filters.domain,
                "since": filters.since.map(|t| t.to_rfc3339()),
            },
        });

        let resp = self
            .http_client
            .post(self.collection_url("search"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Vector search request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Vector search failed ({}): {}", status, body));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse vector search response: {}", e))?;
        let mut hits = parse_hits(&body)?;
        hits.truncate(limit);
        Ok(hits)
    }

    async fn health(&self) -> AdapterHealth {
        probe_health(&self.http_client, &format!("{}/health", self.base_url)).await
    }
}
