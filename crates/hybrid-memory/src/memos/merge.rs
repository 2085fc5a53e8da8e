//! Merge and ranking of per-source search results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::memory_db::Memory;

/// Floor of the recency multiplier; a memory older than a year keeps half
/// its score.
pub const RECENCY_FLOOR: f64 = 0.5;
pub const RECENCY_HORIZON_DAYS: f64 = 365.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMemory {
    pub memory: Memory,
    pub score: f64,
    /// Sources that returned this memory, sorted.
    pub sources: Vec<String>,
}

pub fn recency_multiplier(memory: &Memory, now: DateTime<Utc>) -> f64 {
    (1.0 - memory.age_days(now) / RECENCY_HORIZON_DAYS).max(RECENCY_FLOOR)
}

/// Min-max normalize one source's scores. A single result, or a source
/// whose scores are all equal, normalizes to 1.0.
pub fn normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if scores.len() == 1 || range <= f64::EPSILON || !range.is_finite() {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Combine per-source results into one ranked list:
/// normalize each source, merge duplicates with `1 - prod(1 - s_i)`, apply
/// the recency multiplier, sort and truncate. Pure and deterministic.
pub fn merge(
    results_by_source: &BTreeMap<String, Vec<(Memory, f64)>>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<RankedMemory> {
    // id -> (memory, product of (1 - s_i), sources)
    let mut combined: HashMap<String, (Memory, f64, Vec<String>)> = HashMap::new();

    for (source, results) in results_by_source {
        // A repeated id within one source keeps its best raw score.
        let mut best: BTreeMap<&str, (&Memory, f64)> = BTreeMap::new();
        for (memory, score) in results {
            let score = if score.is_finite() { *score } else { 0.0 };
            best.entry(memory.id.as_str())
                .and_modify(|entry| {
                    if score > entry.1 {
                        *entry = (memory, score);
                    }
                })
                .or_insert((memory, score));
        }

        let raw: Vec<f64> = best.values().map(|(_, s)| *s).collect();
        let normalized = normalize(&raw);

        for ((id, (memory, _)), norm) in best.into_iter().zip(normalized) {
            let entry = combined
                .entry(id.to_string())
                .or_insert_with(|| ((*memory).clone(), 1.0, Vec::new()));
            entry.1 *= 1.0 - norm.clamp(0.0, 1.0);
            entry.2.push(source.clone());
        }
    }

    let ranked = combined
        .into_values()
        .map(|(memory, miss, mut sources)| {
            sources.sort();
            sources.dedup();
            let score = (1.0 - miss) * recency_multiplier(&memory, now);
            RankedMemory { memory, score, sources }
        })
        .collect();

    sort_and_truncate(ranked, limit)
}

/// Score descending, then `created_at` descending, then id ascending.
pub fn sort_and_truncate(mut ranked: Vec<RankedMemory>, limit: usize) -> Vec<RankedMemory> {
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    ranked.truncate(limit);
    ranked
}
