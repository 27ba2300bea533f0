//! Tier-partitioned vector index.
//!
//! Each tier keeps its vectors in one contiguous `Vec<f32>` (row-major, one
//! row per fact) next to a parallel vector of fact metadata. Search scores
//! every row of every tier by dot product, multiplies by the tier's gravity
//! and returns the best `k` across tiers.

use serde::{Deserialize, Serialize};

use super::embedding::{check_dimensions, dot};
use crate::error::Result;
use crate::memory::{Fact, FactId, Tier};

/// Rows scored per batch.
const BATCH_ROWS: usize = 8;

/// Metadata kept beside each stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFact {
    pub id: FactId,
    pub content: String,
    pub tier: Tier,
    pub confidence: f64,
}

impl From<&Fact> for IndexedFact {
    fn from(fact: &Fact) -> Self {
        Self {
            id: fact.id.clone(),
            content: fact.content.clone(),
            tier: fact.tier,
            confidence: fact.confidence,
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFact {
    pub fact: IndexedFact,
    /// Dot product before the tier boost
    pub raw_score: f64,
    /// Score after the tier boost
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
struct TierBuffer {
    facts: Vec<IndexedFact>,
    vectors: Vec<f32>,
}

impl TierBuffer {
    fn push(&mut self, fact: IndexedFact, vector: &[f32]) {
        self.facts.push(fact);
        self.vectors.extend_from_slice(vector);
    }

    /// Raw dot products against every row, in insertion order.
    fn raw_scores(&self, query: &[f32], dimensions: usize) -> Vec<f32> {
        let mut scores = Vec::with_capacity(self.facts.len());
        for batch in self.vectors.chunks(BATCH_ROWS * dimensions) {
            scores.extend(batch.chunks_exact(dimensions).map(|row| dot(row, query)));
        }
        scores
    }

    fn clear(&mut self) {
        self.facts.clear();
        self.vectors.clear();
    }
}

/// In-memory similarity index over all facts, partitioned by tier.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    buffers: [TierBuffer; 3],
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            buffers: Default::default(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Append a fact's vector to its tier's buffer.
    pub fn insert(&mut self, fact: &Fact, vector: &[f32]) -> Result<()> {
        check_dimensions(vector, self.dimensions)?;
        self.buffers[fact.tier.slot()].push(IndexedFact::from(fact), vector);
        Ok(())
    }

    /// Top `k` facts by boosted score.
    ///
    /// Ties keep tier order (foundational first) and then insertion order, so
    /// repeated searches over the same index return identical results.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredFact>> {
        check_dimensions(query, self.dimensions)?;
        if k == 0 || self.dimensions == 0 {
            return Ok(Vec::new());
        }

        let mut hits = Vec::with_capacity(self.len());
        for tier in Tier::ALL {
            let buffer = &self.buffers[tier.slot()];
            let scores = buffer.raw_scores(query, self.dimensions);
            hits.extend(buffer.facts.iter().zip(scores).map(|(fact, raw)| {
                let raw_score = f64::from(raw);
                ScoredFact {
                    fact: fact.clone(),
                    raw_score,
                    score: tier.boost(raw_score),
                }
            }));
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        self.buffers.iter().map(|b| b.facts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Facts stored for one tier.
    pub fn tier_len(&self, tier: Tier) -> usize {
        self.buffers[tier.slot()].facts.len()
    }

    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }
}
