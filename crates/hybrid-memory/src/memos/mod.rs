//! Memory orchestration - fan-out to backends, merged ranking, relationship
//! mirroring and insight generation

pub mod merge;
pub mod mirror;
pub mod orchestrator;
pub mod insight_engine;

pub use merge::{merge, sort_and_truncate, RankedMemory};
pub use mirror::EdgeMirror;
pub use orchestrator::{
    AdapterStatus, MemoryOrchestrator, OrchestratorConfig, RecallOutcome, RecallRequest, ReflectOutcome,
    ReflectRequest, RelateRequest, RelatedHint, RememberOutcome, RememberRequest, SourceReport, SourceStatus,
    StatusReport,
};
pub use insight_engine::{InsightEngine, InsightEngineConfig, InsightRunReport};

use std::sync::Arc;

use crate::adapters::{Adapter, AdapterKind, InMemoryAdapter};
use crate::error::Result;
use crate::memory_db::RelationshipStore;

/// Orchestrator over an in-memory store with one in-process backend, for
/// embedding without external services.
pub fn create_default_orchestrator() -> Result<MemoryOrchestrator> {
    let store = Arc::new(RelationshipStore::new_in_memory()?);
    let local: Arc<dyn Adapter> = Arc::new(InMemoryAdapter::new("local", AdapterKind::Vector));
    Ok(MemoryOrchestrator::new(store, vec![local], None, OrchestratorConfig::default()))
}
