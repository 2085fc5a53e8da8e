//! Process-wide state shared by the HTTP handlers and background tasks

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use crate::adapters::{
    Adapter, AdapterKind, GraphDatabaseAdapter, GraphMirror, InMemoryAdapter, SessionSearchAdapter,
    VectorSearchAdapter,
};
use crate::config::Config;
use crate::memory_db::RelationshipStore;
use crate::memos::{InsightEngine, MemoryOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<MemoryOrchestrator>,
    pub insights: Arc<InsightEngine>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    /// Open the store and wire up every configured backend. Fails when the
    /// store cannot be opened. Must run inside a tokio runtime for graph
    /// mirroring to start.
    pub fn build(cfg: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(
            RelationshipStore::new(&cfg.db_path)
                .with_context(|| format!("failed to open relationship store at {}", cfg.db_path.display()))?,
        );
        info!("Relationship store opened at {}", cfg.db_path.display());

        let (adapters, mirror) = build_adapters(cfg)?;
        let orchestrator = Arc::new(MemoryOrchestrator::new(
            Arc::clone(&store),
            adapters,
            mirror,
            cfg.orchestrator_config(),
        ));
        let insights = Arc::new(InsightEngine::new(store, cfg.insight_config()));

        Ok(Self {
            orchestrator,
            insights,
            config: Arc::new(cfg.clone()),
            started_at: Instant::now(),
        })
    }

    /// State over an existing orchestrator, for embedding and tests.
    pub fn from_parts(orchestrator: Arc<MemoryOrchestrator>, insights: Arc<InsightEngine>, config: Config) -> Self {
        Self {
            orchestrator,
            insights,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

type Backends = (Vec<Arc<dyn Adapter>>, Option<Arc<dyn GraphMirror>>);

/// One adapter per configured backend. With nothing configured the
/// in-process backend stands in so the service still answers.
fn build_adapters(cfg: &Config) -> anyhow::Result<Backends> {
    let timeout = Duration::from_millis(cfg.adapter_timeout_ms);
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();
    let mut mirror: Option<Arc<dyn GraphMirror>> = None;

    if let Some(url) = &cfg.vector_url {
        adapters.push(Arc::new(VectorSearchAdapter::new(url.clone(), cfg.vector_collection.clone(), timeout)?));
        info!("Vector backend: {}", url);
    }
    if let Some(url) = &cfg.graph_url {
        let graph = Arc::new(GraphDatabaseAdapter::new(url.clone(), timeout)?);
        mirror = Some(graph.clone());
        adapters.push(graph);
        info!("Graph backend: {}", url);
    }
    if let Some(dir) = &cfg.session_dir {
        adapters.push(Arc::new(SessionSearchAdapter::new(dir.clone())));
        info!("Session transcripts: {}", dir.display());
    }

    if adapters.is_empty() {
        warn!("No backends configured; using the in-process backend");
        adapters.push(Arc::new(InMemoryAdapter::new("local", AdapterKind::Vector)));
    }
    Ok((adapters, mirror))
}
