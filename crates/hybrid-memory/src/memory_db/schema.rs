//! Data model for memories, relationships, cached patterns and insights
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::MemoryError;

/// Open key/value metadata attached to memories and relationships.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Row id of a relationship in the `relationships` table.
pub type RelationshipId = i64;

/// Row id of an insight in the `insights` table.
pub type InsightId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Commitment,
    Decision,
    Pattern,
    Observation,
    Conversation,
    Entity,
}

impl MemoryType {
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Commitment,
        MemoryType::Decision,
        MemoryType::Pattern,
        MemoryType::Observation,
        MemoryType::Conversation,
        MemoryType::Entity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Commitment => "commitment",
            MemoryType::Decision => "decision",
            MemoryType::Pattern => "pattern",
            MemoryType::Observation => "observation",
            MemoryType::Conversation => "conversation",
            MemoryType::Entity => "entity",
        }
    }

    /// Node label used when the memory is mirrored into a graph database.
    pub fn node_label(&self) -> &'static str {
        match self {
            MemoryType::Commitment => "Commitment",
            MemoryType::Decision => "Decision",
            MemoryType::Pattern => "Pattern",
            MemoryType::Observation => "Observation",
            MemoryType::Conversation => "Conversation",
            MemoryType::Entity => "Entity",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MemoryError::Validation(format!("Unknown memory type '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Work,
    Personal,
    Health,
    #[default]
    General,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Domain::Work, Domain::Personal, Domain::Health, Domain::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Work => "work",
            Domain::Personal => "personal",
            Domain::Health => "health",
            Domain::General => "general",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MemoryError::Validation(format!("Unknown domain '{}'", s)))
    }
}

/// Typed edge label between two memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Caused,
    Prevented,
    Enabled,
    Preceded,
    Followed,
    Concurrent,
    RelatedTo,
    Contradicts,
    Supports,
    Elaborates,
    BelongsTo,
    Impacts,
    LearnedFrom,
    AppliedTo,
    InvalidatedBy,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 15] = [
        RelationshipType::Caused,
        RelationshipType::Prevented,
        RelationshipType::Enabled,
        RelationshipType::Preceded,
        RelationshipType::Followed,
        RelationshipType::Concurrent,
        RelationshipType::RelatedTo,
        RelationshipType::Contradicts,
        RelationshipType::Supports,
        RelationshipType::Elaborates,
        RelationshipType::BelongsTo,
        RelationshipType::Impacts,
        RelationshipType::LearnedFrom,
        RelationshipType::AppliedTo,
        RelationshipType::InvalidatedBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Caused => "CAUSED",
            RelationshipType::Prevented => "PREVENTED",
            RelationshipType::Enabled => "ENABLED",
            RelationshipType::Preceded => "PRECEDED",
            RelationshipType::Followed => "FOLLOWED",
            RelationshipType::Concurrent => "CONCURRENT",
            RelationshipType::RelatedTo => "RELATED_TO",
            RelationshipType::Contradicts => "CONTRADICTS",
            RelationshipType::Supports => "SUPPORTS",
            RelationshipType::Elaborates => "ELABORATES",
            RelationshipType::BelongsTo => "BELONGS_TO",
            RelationshipType::Impacts => "IMPACTS",
            RelationshipType::LearnedFrom => "LEARNED_FROM",
            RelationshipType::AppliedTo => "APPLIED_TO",
            RelationshipType::InvalidatedBy => "INVALIDATED_BY",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        RelationshipType::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| MemoryError::Validation(format!("Unknown relationship type '{}'", s)))
    }
}

/// Which edges of a node a read considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Both,
    Outgoing,
    Incoming,
}

/// Chain traversal direction: forward follows effects, backward follows causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChainDirection {
    #[default]
    Forward,
    Backward,
}

/// A stored fact. Never mutated in place; corrections are new memories
/// linked to the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub domain: Domain,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Memory {
    pub fn new(content: impl Into<String>, memory_type: MemoryType, domain: Domain) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            memory_type,
            domain,
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Age in fractional days relative to `now`; never negative.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.created_at).num_seconds().max(0) as f64;
        seconds / 86_400.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: RelationshipType,
    pub strength: f64,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// The endpoint on the other side of this edge from `memory_id`.
    pub fn other_end(&self, memory_id: &str) -> &str {
        if self.source_id == memory_id {
            &self.target_id
        } else {
            &self.source_id
        }
    }
}

/// One neighbor returned by `get_related`. `direction` is `Outgoing` or
/// `Incoming` relative to the queried memory, never `Both`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedMemory {
    pub memory_id: String,
    pub direction: Direction,
    pub relationship: Relationship,
}

/// A node reached by `traverse_chain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainNode {
    pub memory_id: String,
    pub depth: usize,
    pub parent_id: String,
    pub relationship: Relationship,
}

/// Two memories that share enough one-hop neighbors to suggest an
/// undiscovered relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCandidate {
    pub memory_a: String,
    pub memory_b: String,
    pub shared_connections: usize,
    pub total_strength: f64,
    pub shared_neighbors: Vec<String>,
    /// Mean of the two edge strengths on each `a - n - b` path, aligned with
    /// `shared_neighbors`.
    pub path_strengths: Vec<f64>,
}

impl CorrelationCandidate {
    pub fn average_strength(&self) -> f64 {
        if self.path_strengths.is_empty() {
            return 0.0;
        }
        self.path_strengths.iter().sum::<f64>() / self.path_strengths.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCacheEntry {
    pub pattern_key: String,
    pub memory_ids: Vec<String>,
    pub pattern_type: String,
    pub confidence: f64,
    pub hit_count: i64,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Pattern,
    Correlation,
    Warning,
    Opportunity,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Pattern => "pattern",
            InsightType::Correlation => "correlation",
            InsightType::Warning => "warning",
            InsightType::Opportunity => "opportunity",
        }
    }
}

impl FromStr for InsightType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pattern" => Ok(InsightType::Pattern),
            "correlation" => Ok(InsightType::Correlation),
            "warning" => Ok(InsightType::Warning),
            "opportunity" => Ok(InsightType::Opportunity),
            other => Err(MemoryError::Validation(format!("Unknown insight type '{}'", other))),
        }
    }
}

/// Input to `store_insight`; the store assigns id and lifecycle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInsight {
    pub insight_type: InsightType,
    pub content: String,
    pub source_memories: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: InsightId,
    pub insight_type: InsightType,
    pub content: String,
    pub source_memories: Vec<String>,
    pub confidence: f64,
    pub surfaced: bool,
    pub surfaced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipStats {
    pub total_relationships: i64,
    pub by_type: BTreeMap<String, i64>,
    pub unique_memories_linked: i64,
    pub pending_insights: i64,
    pub storage_size_bytes: i64,
    pub total_memories: i64,
    pub pattern_cache_entries: i64,
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort
/// lexicographically.
pub(crate) fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn from_db_json<T: serde::de::DeserializeOwned>(idx: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn from_db_enum<T: FromStr<Err = MemoryError>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
