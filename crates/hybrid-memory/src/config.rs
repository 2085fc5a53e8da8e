// hybrid-memory/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::memos::{InsightEngineConfig, OrchestratorConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub vector_url: Option<String>,
    pub vector_collection: String,
    pub graph_url: Option<String>,
    pub session_dir: Option<PathBuf>,
    pub adapter_timeout_ms: u64,
    pub health_ttl_seconds: u64,
    pub graph_expansion_top_k: usize,
    pub graph_expansion_discount: f64,
    pub reflect_limit: usize,
    pub correlation_min_shared: usize,
    pub insight_confidence_floor: f64,
    pub insight_interval_seconds: u64,
    pub insight_max_candidates: usize,
    pub api_host: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing or blank keys
    /// fall back to defaults; present but malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            db_path: PathBuf::from(get("MEMORY_DB_PATH").unwrap_or_else(|| "./data/memory.db".into())),
            vector_url: get("VECTOR_URL"),
            vector_collection: get("VECTOR_COLLECTION").unwrap_or_else(|| "memories".into()),
            graph_url: get("GRAPH_URL"),
            session_dir: get("SESSION_DIR").map(PathBuf::from),
            adapter_timeout_ms: parse_or(&get, "ADAPTER_TIMEOUT_MS", 3000)?,
            health_ttl_seconds: parse_or(&get, "HEALTH_TTL_SECONDS", 30)?,
            graph_expansion_top_k: parse_or(&get, "GRAPH_EXPANSION_TOP_K", 5)?,
            graph_expansion_discount: parse_or(&get, "GRAPH_EXPANSION_DISCOUNT", 0.7)?,
            reflect_limit: parse_or(&get, "REFLECT_LIMIT", 20)?,
            correlation_min_shared: parse_or(&get, "CORRELATION_MIN_SHARED", 2)?,
            insight_confidence_floor: parse_or(&get, "INSIGHT_CONFIDENCE_FLOOR", 0.5)?,
            insight_interval_seconds: parse_or(&get, "INSIGHT_INTERVAL_SECONDS", 3600)?,
            insight_max_candidates: parse_or(&get, "INSIGHT_MAX_CANDIDATES", 200)?,
            api_host: get("API_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            api_port: parse_or(&get, "API_PORT", 8000)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.graph_expansion_discount) {
            anyhow::bail!(
                "GRAPH_EXPANSION_DISCOUNT must be within [0, 1], got {}",
                self.graph_expansion_discount
            );
        }
        if !(0.0..=1.0).contains(&self.insight_confidence_floor) {
            anyhow::bail!(
                "INSIGHT_CONFIDENCE_FLOOR must be within [0, 1], got {}",
                self.insight_confidence_floor
            );
        }
        if self.adapter_timeout_ms == 0 {
            anyhow::bail!("ADAPTER_TIMEOUT_MS must be positive");
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            adapter_timeout: Duration::from_millis(self.adapter_timeout_ms),
            health_ttl: Duration::from_secs(self.health_ttl_seconds),
            graph_expansion_top_k: self.graph_expansion_top_k,
            graph_expansion_discount: self.graph_expansion_discount,
            reflect_limit: self.reflect_limit,
            correlation_min_shared: self.correlation_min_shared,
            ..OrchestratorConfig::default()
        }
    }

    pub fn insight_config(&self) -> InsightEngineConfig {
        InsightEngineConfig {
            confidence_floor: self.insight_confidence_floor,
            min_shared_connections: self.correlation_min_shared,
            max_candidates: self.insight_max_candidates,
            interval: Duration::from_secs(self.insight_interval_seconds.max(1)),
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.db_path.display());
        info!("- Vector: {}", self.vector_url.as_deref().unwrap_or("(disabled)"));
        info!("- Vector Collection: {}", self.vector_collection);
        info!("- Graph: {}", self.graph_url.as_deref().unwrap_or("(disabled)"));
        info!(
            "- Sessions: {}",
            self.session_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(disabled)".into())
        );
        info!("- Adapter Timeout: {}ms", self.adapter_timeout_ms);
        info!(
            "- Graph Expansion: top {} at x{}",
            self.graph_expansion_top_k, self.graph_expansion_discount
        );
        info!(
            "- Insights: floor {}, every {}s, max {} candidates",
            self.insight_confidence_floor, self.insight_interval_seconds, self.insight_max_candidates
        );
        info!("- API: {}:{}", self.api_host, self.api_port);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
