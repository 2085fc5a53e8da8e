// hybrid-memory/src/lib.rs

pub mod adapters;
pub mod config;
pub mod error;
pub mod memory_db;
pub mod memos;
pub mod metrics;
pub mod telemetry;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;
#[cfg(feature = "cli")]
pub mod shared_state;

// Public API exports
pub use adapters::{Adapter, AdapterHealth, AdapterKind, GraphMirror, InMemoryAdapter, SearchFilters};
pub use config::Config;
pub use error::{MemoryError, Result};
pub use memory_db::{Domain, Memory, MemoryType, Relationship, RelationshipStore, RelationshipType};
pub use memos::{
    create_default_orchestrator, InsightEngine, InsightEngineConfig, MemoryOrchestrator, OrchestratorConfig,
    RankedMemory, RecallRequest, ReflectRequest, RelateRequest, RememberRequest,
};

#[cfg(feature = "cli")]
pub use server::run_server;
