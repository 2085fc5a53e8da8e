//! Insight engine: turns correlated memory pairs in the relationship graph
//! into stored insights.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::memory_db::{pattern_key, CorrelationCandidate, InsightType, NewInsight, RelationshipStore};
use crate::metrics;

pub const CORRELATION_PATTERN: &str = "correlation";

/// Weight of one `a - n - b` path in the confidence of a correlation.
const PATH_WEIGHT: f64 = 0.35;

#[derive(Debug, Clone)]
pub struct InsightEngineConfig {
    pub confidence_floor: f64,
    pub min_shared_connections: usize,
    /// Most connected memories considered per run.
    pub max_candidates: usize,
    pub interval: Duration,
}

impl Default for InsightEngineConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            min_shared_connections: 2,
            max_candidates: 200,
            interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightRunReport {
    pub candidates_considered: usize,
    pub created: usize,
    pub skipped_existing: usize,
    pub below_floor: usize,
    pub cache_hits: usize,
}

/// `1 - prod(1 - 0.35 * s)` over the path strengths. Grows with every
/// additional path and with every stronger edge.
pub fn correlation_confidence(path_strengths: &[f64]) -> f64 {
    let miss: f64 = path_strengths
        .iter()
        .map(|s| 1.0 - PATH_WEIGHT * s.clamp(0.0, 1.0))
        .product();
    (1.0 - miss).clamp(0.0, 1.0)
}

fn candidate_key(candidate: &CorrelationCandidate) -> String {
    let strengths: Vec<String> = candidate.path_strengths.iter().map(|s| format!("{:.4}", s)).collect();
    let mut parts = vec![candidate.memory_a.as_str(), candidate.memory_b.as_str()];
    parts.extend(candidate.shared_neighbors.iter().map(String::as_str));
    parts.extend(strengths.iter().map(String::as_str));
    pattern_key(CORRELATION_PATTERN, &parts)
}

fn describe(candidate: &CorrelationCandidate) -> String {
    format!(
        "{} and {} keep showing up together: they share {} connection(s) ({})",
        candidate.memory_a,
        candidate.memory_b,
        candidate.shared_connections,
        candidate.shared_neighbors.join(", ")
    )
}

pub struct InsightEngine {
    store: Arc<RelationshipStore>,
    config: InsightEngineConfig,
}

impl InsightEngine {
    pub fn new(store: Arc<RelationshipStore>, config: InsightEngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &InsightEngineConfig {
        &self.config
    }

    /// One pass over the most connected memories. Pairs already covered by
    /// an insight, surfaced or not, are left alone.
    pub fn run_once(&self) -> Result<InsightRunReport> {
        let ids = self.store.edges.linked_ids(self.config.max_candidates)?;
        let candidates = self
            .store
            .get_correlation_candidates(&ids, self.config.min_shared_connections)?;

        let mut report = InsightRunReport {
            candidates_considered: candidates.len(),
            ..InsightRunReport::default()
        };

        for candidate in &candidates {
            let key = candidate_key(candidate);
            let confidence = match self.store.patterns.get_cached_pattern(&key)? {
                Some(entry) => {
                    report.cache_hits += 1;
                    entry.confidence
                }
                None => {
                    let confidence = correlation_confidence(&candidate.path_strengths);
                    let members = vec![candidate.memory_a.clone(), candidate.memory_b.clone()];
                    self.store
                        .patterns
                        .cache_pattern(&key, &members, CORRELATION_PATTERN, confidence)?;
                    confidence
                }
            };

            if confidence < self.config.confidence_floor {
                report.below_floor += 1;
                continue;
            }
            if self
                .store
                .insights
                .has_insight_covering(&candidate.memory_a, &candidate.memory_b)?
            {
                report.skipped_existing += 1;
                continue;
            }

            let insight = self.store.store_insight(&NewInsight {
                insight_type: InsightType::Correlation,
                content: describe(candidate),
                source_memories: vec![candidate.memory_a.clone(), candidate.memory_b.clone()],
                confidence,
            })?;
            debug!("Created insight {} ({:.2})", insight.id, insight.confidence);
            report.created += 1;
        }

        metrics::inc_insights_created(report.created as u64);
        info!(
            "Insight run: {} candidates, {} created, {} existing, {} below floor",
            report.candidates_considered, report.created, report.skipped_existing, report.below_floor
        );
        Ok(report)
    }

    /// Run on a fixed interval on the current runtime, starting now. Store
    /// work happens on the blocking pool.
    pub fn spawn_periodic(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let engine = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || engine.run_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Insight run failed: {}", e),
                    Err(e) => warn!("Insight run panicked: {}", e),
                }
            }
        })
    }
}
