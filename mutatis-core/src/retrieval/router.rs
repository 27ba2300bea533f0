//! Dual-path query routing.
//!
//! The indexed path runs first: if the query names an evolved entity, that
//! entity's rows come straight from its evolved relation. The gravity-boosted
//! scan always runs and fills in whatever the indexed rows did not already
//! cover.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::embedding::Embedder;
use super::index::VectorIndex;
use crate::classifier::{mentions_entity, normalize};
use crate::error::Result;
use crate::memory::{EvolvedRow, SqliteFactStore, Tier};

/// Which path answered a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum QueryPath {
    /// An evolved relation matched
    Indexed { table_name: String, entity: String },
    /// Similarity scan only
    Scan,
}

impl QueryPath {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }
}

/// Where a single entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    Indexed,
    Scan,
}

/// One ranked entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEntry {
    /// Id of the generic fact
    pub id: String,
    pub content: String,
    /// Unknown for rows served from an evolved relation
    pub tier: Option<Tier>,
    /// Row confidence on the indexed path, boosted similarity on the scan path
    pub score: f64,
    pub origin: EntryOrigin,
}

/// Answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub path: QueryPath,
    pub entries: Vec<QueryEntry>,
}

/// Indexed-first query router.
#[derive(Debug, Clone)]
pub struct QueryRouter {
    indexed_limit: usize,
}

impl QueryRouter {
    pub fn new(indexed_limit: usize) -> Self {
        Self { indexed_limit }
    }

    /// Rows for the first evolved entity the query mentions.
    ///
    /// Pairs are tried in the order they were first tracked. A pair whose
    /// relation holds no rows for it does not count as a match.
    pub fn indexed_lookup(
        &self,
        store: &SqliteFactStore,
        text: &str,
    ) -> Result<Option<(QueryPath, Vec<EvolvedRow>)>> {
        let normalized = normalize(text);
        for entry in store.evolved_patterns()? {
            if !mentions_entity(&normalized, &entry.entity) {
                continue;
            }
            let Some(registry) = store.registry_entry(&entry.pattern_type)? else {
                continue;
            };
            let rows = store.evolved_rows(&registry.table_name, &entry.entity)?;
            if rows.is_empty() {
                continue;
            }
            debug!(
                table = %registry.table_name,
                entity = %entry.entity,
                rows = rows.len(),
                "indexed path hit"
            );
            let path = QueryPath::Indexed {
                table_name: registry.table_name,
                entity: entry.entity,
            };
            return Ok(Some((path, rows)));
        }
        Ok(None)
    }

    /// Answer `text` with up to `indexed_limit` indexed rows followed by up
    /// to `k` scan hits not already present among them.
    pub fn route(
        &self,
        store: &SqliteFactStore,
        index: &VectorIndex,
        embedder: &dyn Embedder,
        text: &str,
        k: usize,
    ) -> Result<QueryResult> {
        let (path, mut entries) = match self.indexed_lookup(store, text)? {
            Some((path, rows)) => {
                let entries = rows
                    .into_iter()
                    .take(self.indexed_limit)
                    .map(|row| QueryEntry {
                        id: row.source_id.to_string(),
                        content: row.content,
                        tier: None,
                        score: row.confidence,
                        origin: EntryOrigin::Indexed,
                    })
                    .collect::<Vec<_>>();
                (path, entries)
            }
            None => (QueryPath::Scan, Vec::new()),
        };

        let seen: HashSet<String> = entries.iter().map(|e| content_key(&e.content)).collect();
        let query = embedder.embed(text)?;
        // Over-fetch so duplicates of indexed rows do not shrink the scan share
        let hits = index.search(&query, k.saturating_add(seen.len()))?;
        entries.extend(
            hits.into_iter()
                .filter(|hit| !seen.contains(&content_key(&hit.fact.content)))
                .take(k)
                .map(|hit| QueryEntry {
                    id: hit.fact.id.to_string(),
                    content: hit.fact.content,
                    tier: Some(hit.fact.tier),
                    score: hit.score,
                    origin: EntryOrigin::Scan,
                }),
        );

        Ok(QueryResult { path, entries })
    }
}

fn content_key(content: &str) -> String {
    content.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::{EvolutionBudget, EvolutionEngine, EvolutionRequest};
    use crate::memory::Fact;
    use crate::retrieval::embedding::HashEmbedder;
    use chrono::Utc;

    struct Fixture {
        store: SqliteFactStore,
        index: VectorIndex,
        embedder: HashEmbedder,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: SqliteFactStore::in_memory().unwrap(),
                index: VectorIndex::new(128),
                embedder: HashEmbedder::new(128).unwrap(),
            }
        }

        fn add(&mut self, text: &str, tier: Tier, confidence: f64) {
            let fact = Fact::new(text, tier, confidence);
            let vector = self.embedder.embed(text).unwrap();
            self.store.insert_fact(&fact, Some(&vector)).unwrap();
            self.index.insert(&fact, &vector).unwrap();
        }
    }

    #[test]
    fn test_scan_only_without_evolved_entities() {
        let mut fx = Fixture::new();
        fx.add("My wife is Sara", Tier::Foundational, 0.85);
        fx.add("Remind me to call Sara", Tier::Transient, 0.3);

        let result = QueryRouter::new(3)
            .route(&fx.store, &fx.index, &fx.embedder, "who is sara?", 5)
            .unwrap();

        assert_eq!(result.path, QueryPath::Scan);
        assert_eq!(result.entries.len(), 2);
        assert!(result.entries.iter().all(|e| e.origin == EntryOrigin::Scan));
        assert_eq!(result.entries[0].tier, Some(Tier::Foundational));
    }

    #[test]
    fn test_indexed_rows_first_and_deduplicated() {
        let mut fx = Fixture::new();
        fx.add("My wife is Sara", Tier::Foundational, 0.85);
        fx.add("Sara is my wife", Tier::Foundational, 0.93);
        fx.add("The meeting ran long", Tier::Episodic, 0.5);
        for _ in 0..3 {
            fx.store
                .record_mention("family_spouse", "sara", 0.85, Utc::now())
                .unwrap();
        }
        EvolutionEngine::new()
            .evolve(
                &fx.store,
                &mut EvolutionBudget::new(3),
                &EvolutionRequest::new("family_spouse", "sara", 0.99),
            )
            .unwrap();

        let result = QueryRouter::new(3)
            .route(&fx.store, &fx.index, &fx.embedder, "Who is Sara?", 5)
            .unwrap();

        assert_eq!(
            result.path,
            QueryPath::Indexed {
                table_name: "family_spouse_evolved".to_string(),
                entity: "sara".to_string(),
            }
        );
        let indexed: Vec<_> = result
            .entries
            .iter()
            .filter(|e| e.origin == EntryOrigin::Indexed)
            .collect();
        assert_eq!(indexed.len(), 2);
        assert_eq!(indexed[0].content, "Sara is my wife");
        assert_eq!(indexed[0].score, 0.93);
        // Scan hits never repeat indexed content
        let scanned: Vec<_> = result
            .entries
            .iter()
            .filter(|e| e.origin == EntryOrigin::Scan)
            .collect();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].content, "The meeting ran long");
    }

    #[test]
    fn test_unbounded_k_on_indexed_path() {
        let mut fx = Fixture::new();
        fx.add("My wife is Sara", Tier::Foundational, 0.85);
        fx.add("The meeting ran long", Tier::Episodic, 0.5);
        for _ in 0..3 {
            fx.store
                .record_mention("family_spouse", "sara", 0.85, Utc::now())
                .unwrap();
        }
        EvolutionEngine::new()
            .evolve(
                &fx.store,
                &mut EvolutionBudget::new(3),
                &EvolutionRequest::new("family_spouse", "sara", 0.99),
            )
            .unwrap();

        let result = QueryRouter::new(3)
            .route(&fx.store, &fx.index, &fx.embedder, "who is sara?", usize::MAX)
            .unwrap();

        assert!(result.path.is_indexed());
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].origin, EntryOrigin::Indexed);
        assert_eq!(result.entries[1].content, "The meeting ran long");
    }

    #[test]
    fn test_indexed_limit_caps_rows() {
        let mut fx = Fixture::new();
        for i in 0..5 {
            fx.add(&format!("sara fact {}", i), Tier::Episodic, 0.5);
        }
        for _ in 0..3 {
            fx.store
                .record_mention("identity_name", "sara", 0.90, Utc::now())
                .unwrap();
        }
        EvolutionEngine::new()
            .evolve(
                &fx.store,
                &mut EvolutionBudget::new(3),
                &EvolutionRequest::new("identity_name", "sara", 0.99),
            )
            .unwrap();

        let result = QueryRouter::new(3)
            .route(&fx.store, &fx.index, &fx.embedder, "sara", 0)
            .unwrap();

        assert!(result.path.is_indexed());
        assert_eq!(result.entries.len(), 3);
    }
}
