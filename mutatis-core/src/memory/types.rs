//! Core data types for facts, tracker entries and evolved relations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Unique identifier for a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(pub Uuid);

impl FactId {
    /// Generate a new random fact ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durability class of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Requests, reminders, passing states; expires after a day
    Transient,
    /// Ordinary statements; expires after a month
    Episodic,
    /// Identity, family, health, beliefs and other durable facts
    Foundational,
}

impl Tier {
    /// All tiers, highest gravity first.
    pub const ALL: [Tier; 3] = [Tier::Foundational, Tier::Episodic, Tier::Transient];

    /// Multiplier applied to raw similarity before ranking.
    ///
    /// A foundational fact outranks a transient one whenever its similarity is
    /// at least `0.5 / sqrt(2)` (about 0.354) of the transient similarity.
    pub fn gravity(self) -> f64 {
        match self {
            Tier::Foundational => std::f64::consts::SQRT_2,
            Tier::Episodic => 1.0,
            Tier::Transient => 0.5,
        }
    }

    /// Boost a raw similarity by this tier's gravity.
    pub fn boost(self, raw: f64) -> f64 {
        raw * self.gravity()
    }

    /// Time to live in hours, `None` for facts that never expire.
    pub fn ttl_hours(self) -> Option<u32> {
        match self {
            Tier::Transient => Some(24),
            Tier::Episodic => Some(720),
            Tier::Foundational => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Transient => "transient",
            Tier::Episodic => "episodic",
            Tier::Foundational => "foundational",
        }
    }

    /// Position of this tier's buffer in the scan index.
    pub(crate) fn slot(self) -> usize {
        match self {
            Tier::Foundational => 0,
            Tier::Episodic => 1,
            Tier::Transient => 2,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Tier::Transient),
            "episodic" => Ok(Tier::Episodic),
            "foundational" => Ok(Tier::Foundational),
            other => Err(Error::storage(format!("unknown tier '{}'", other))),
        }
    }
}

/// A single remembered statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub content: String,
    pub tier: Tier,
    pub confidence: f64,
    pub schema_eligible: bool,
    pub created_at: DateTime<Utc>,
    /// Hours until expiry, derived from the tier
    pub ttl_hours: Option<u32>,
}

impl Fact {
    /// Create a fact with the tier's default time to live.
    pub fn new(content: impl Into<String>, tier: Tier, confidence: f64) -> Self {
        Self {
            id: FactId::new(),
            content: content.into(),
            tier,
            confidence,
            schema_eligible: false,
            created_at: Utc::now(),
            ttl_hours: tier.ttl_hours(),
        }
    }

    pub fn with_schema_eligible(mut self, eligible: bool) -> Self {
        self.schema_eligible = eligible;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether the fact's time to live has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl_hours
            .map(|hours| self.created_at + Duration::hours(i64::from(hours)) < now)
            .unwrap_or(false)
    }
}

/// Accumulated evidence for one (pattern type, entity) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub pattern_type: String,
    pub entity: String,
    pub mention_count: u32,
    /// Confidence of the first detection; never changes afterwards
    pub base_confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub evolved: bool,
}

/// Record of a completed schema evolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub pattern_type: String,
    pub table_name: String,
    pub created_at: DateTime<Utc>,
    /// Rows present at swap time
    pub record_count: u64,
}

/// A row of an evolved relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolvedRow {
    pub id: String,
    pub entity: String,
    pub content: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    /// Fact this row was copied from
    pub source_id: FactId,
}

/// Statistics about the memory store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_facts: u64,
    pub facts_by_tier: HashMap<Tier, u64>,
    pub tracked_patterns: u64,
    pub evolved_relations: u64,
    pub session_evolutions: u32,
}

impl MemoryStats {
    /// Number of facts stored under `tier`.
    pub fn count(&self, tier: Tier) -> u64 {
        self.facts_by_tier.get(&tier).copied().unwrap_or(0)
    }
}
