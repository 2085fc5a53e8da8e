//! Fire-and-forget mirroring of relationship edges into a graph backend.
//!
//! `EdgeMirror::send` never blocks and never fails the caller. A detached
//! worker drains a bounded queue and reports failures on its own error
//! channel, where a second task logs and counts them. An edge that finds
//! the queue full is dropped and counted as a failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapters::GraphMirror;
use crate::memory_db::Relationship;
use crate::metrics;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct MirrorFailure {
    pub edge: Relationship,
    pub error: String,
}

#[derive(Clone)]
pub struct EdgeMirror {
    tx: mpsc::Sender<Relationship>,
    failures: Arc<AtomicUsize>,
}

impl EdgeMirror {
    /// Start the worker and error-logging tasks on the current runtime.
    /// Returns `None` outside a tokio runtime.
    pub fn spawn(target: Arc<dyn GraphMirror>, timeout: Duration) -> Option<(Self, JoinHandle<()>)> {
        Self::spawn_with_capacity(target, timeout, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(
        target: Arc<dyn GraphMirror>,
        timeout: Duration,
        capacity: usize,
    ) -> Option<(Self, JoinHandle<()>)> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime; graph mirroring disabled");
                return None;
            }
        };

        let (tx, mut rx) = mpsc::channel::<Relationship>(capacity.max(1));
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<MirrorFailure>();
        let failures = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&failures);
        handle.spawn(async move {
            while let Some(failure) = err_rx.recv().await {
                counter.fetch_add(1, Ordering::Relaxed);
                metrics::inc_mirror_failures();
                warn!(
                    "Graph mirror failed for {} -[{}]-> {}: {}",
                    failure.edge.source_id, failure.edge.rel_type, failure.edge.target_id, failure.error
                );
            }
        });

        let worker = handle.spawn(async move {
            while let Some(edge) = rx.recv().await {
                let error = match tokio::time::timeout(timeout, target.mirror_edge(&edge)).await {
                    Ok(Ok(())) => {
                        debug!("Mirrored edge {}", edge.id);
                        continue;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("timed out after {}ms", timeout.as_millis()),
                };
                // The logger only goes away at shutdown.
                let _ = err_tx.send(MirrorFailure { edge, error });
            }
            debug!("Graph mirror worker stopped");
        });

        Some((Self { tx, failures }, worker))
    }

    pub fn send(&self, edge: Relationship) {
        match self.tx.try_send(edge) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(edge)) => {
                warn!("Graph mirror queue full; edge {} not mirrored", edge.id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Graph mirror worker has stopped; edge not mirrored");
            }
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
        metrics::inc_mirror_failures();
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterKind, InMemoryAdapter};
    use crate::memory_db::{Metadata, RelationshipType};
    use chrono::Utc;

    fn edge(id: i64) -> Relationship {
        let now = Utc::now();
        Relationship {
            id,
            source_id: "a".into(),
            target_id: "b".into(),
            rel_type: RelationshipType::Caused,
            strength: 1.0,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
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
    async fn test_edges_reach_the_target() {
        let target = InMemoryAdapter::new("graph", AdapterKind::Graph);
        let (mirror, _worker) = EdgeMirror::spawn(Arc::new(target.clone()), Duration::from_secs(1)).unwrap();

        mirror.send(edge(1));
        mirror.send(edge(2));
        wait_for(|| target.mirrored_edges().len() == 2).await;

        assert_eq!(target.mirrored_edges().len(), 2);
        assert_eq!(mirror.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let target = InMemoryAdapter::new("graph", AdapterKind::Graph);
        target.set_failure(Some("graph down"));
        let (mirror, _worker) = EdgeMirror::spawn(Arc::new(target.clone()), Duration::from_secs(1)).unwrap();

        mirror.send(edge(1));
        wait_for(|| mirror.failure_count() == 1).await;
        assert_eq!(mirror.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_target_times_out() {
        let target = InMemoryAdapter::new("graph", AdapterKind::Graph);
        target.set_latency(Some(Duration::from_millis(200)));
        let (mirror, _worker) = EdgeMirror::spawn(Arc::new(target.clone()), Duration::from_millis(20)).unwrap();

        mirror.send(edge(1));
        wait_for(|| mirror.failure_count() == 1).await;
        assert_eq!(mirror.failure_count(), 1);
        assert!(target.mirrored_edges().is_empty());
    }

    #[test]
    fn test_no_runtime_disables_mirroring() {
        let target = InMemoryAdapter::new("graph", AdapterKind::Graph);
        assert!(EdgeMirror::spawn(Arc::new(target), Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let target = InMemoryAdapter::new("graph", AdapterKind::Graph);
        target.set_latency(Some(Duration::from_millis(300)));
        let (mirror, _worker) =
            EdgeMirror::spawn_with_capacity(Arc::new(target.clone()), Duration::from_secs(1), 1).unwrap();

        // The worker holds the first edge while the second fills the queue.
        mirror.send(edge(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        mirror.send(edge(2));
        mirror.send(edge(3));
        mirror.send(edge(4));
        assert_eq!(mirror.failure_count(), 2);

        wait_for(|| target.mirrored_edges().len() == 2).await;
        let ids: Vec<i64> = target.mirrored_edges().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
