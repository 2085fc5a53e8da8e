//! Error taxonomy for the memory core.
//!
//! Validation and storage failures are fatal to the calling operation.
//! Adapter failures are absorbed by the orchestrator and only ever show up as
//! degraded-result metadata, never as an `Err` returned from `recall`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Invalid strength {0}: must be within [0.0, 1.0]")]
    InvalidStrength(f64),

    #[error("Invalid id '{0}'")]
    InvalidId(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Adapter '{0}' is unavailable")]
    AdapterUnavailable(String),

    #[error("Adapter '{adapter}' timed out after {after_ms}ms")]
    AdapterTimeout { adapter: String, after_ms: u64 },

    #[error("Adapter '{adapter}' failed: {message}")]
    Adapter { adapter: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
}

impl MemoryError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        MemoryError::NotFound { kind, id: id.into() }
    }

    /// Validation failures are rejected synchronously and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MemoryError::InvalidStrength(_) | MemoryError::InvalidId(_) | MemoryError::Validation(_)
        )
    }

    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            MemoryError::AdapterUnavailable(_)
                | MemoryError::AdapterTimeout { .. }
                | MemoryError::Adapter { .. }
        )
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for MemoryError {
    fn from(e: r2d2::Error) -> Self {
        MemoryError::Storage(format!("Failed to get connection from pool: {}", e))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Storage(format!("Serialization error: {}", e))
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::Storage(format!("IO error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(MemoryError::InvalidStrength(1.5).is_validation());
        assert!(MemoryError::InvalidId(String::new()).is_validation());
        assert!(!MemoryError::Storage("disk".into()).is_validation());
    }

    #[test]
    fn test_adapter_classification() {
        let timeout = MemoryError::AdapterTimeout {
            adapter: "vector".into(),
            after_ms: 3000,
        };
        assert!(timeout.is_adapter_failure());
        assert!(timeout.to_string().contains("3000ms"));
        assert!(!MemoryError::not_found("insight", "42").is_adapter_failure());
    }

    #[test]
    fn test_rusqlite_errors_become_storage() {
        let err: MemoryError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, MemoryError::Storage(_)));
    }
}
