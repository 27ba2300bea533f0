//! The adaptive memory facade.
//!
//! [`AdaptiveMemory`] ties the pieces together: every `add` is classified,
//! embedded, persisted, indexed and, when its entity has earned it, evolved
//! into an indexed relation. `query` goes through the dual-path router.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{Classifier, ConnectionTracker, Reason};
use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::evolution::naming::validate_identifier;
use crate::evolution::{EvolutionBudget, EvolutionEngine, EvolutionOutcome, EvolutionRequest};
use crate::memory::store::{insert_evolved_row, insert_fact_row, lookup_registry};
use crate::memory::{Fact, FactId, MemoryStats, SqliteFactStore, Tier};
use crate::retrieval::embedding::check_dimensions;
use crate::retrieval::{Embedder, HashEmbedder, QueryResult, QueryRouter, VectorIndex};

/// What happened to one added fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOutcome {
    pub fact_id: FactId,
    pub tier: Tier,
    pub confidence: f64,
    pub reason: Reason,
    pub pattern_type: Option<String>,
    pub entity: Option<String>,
    pub schema_eligible: bool,
    /// Set when the fact was also appended to an existing evolved relation
    pub routed_to: Option<String>,
    /// Set when the classifier asked for an evolution
    pub evolution: Option<EvolutionOutcome>,
}

/// Adaptive memory store.
pub struct AdaptiveMemory {
    config: MemoryConfig,
    store: SqliteFactStore,
    classifier: Classifier,
    evolution: EvolutionEngine,
    budget: EvolutionBudget,
    embedder: Box<dyn Embedder + Send + Sync>,
    index: VectorIndex,
    router: QueryRouter,
}

impl std::fmt::Debug for AdaptiveMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveMemory")
            .field("config", &self.config)
            .field("budget", &self.budget)
            .field("indexed_facts", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl AdaptiveMemory {
    /// Store backed by an in-memory database.
    pub fn in_memory(config: MemoryConfig) -> Result<Self> {
        let embedder = HashEmbedder::new(config.embedding_dimensions)?;
        Self::with_embedder(SqliteFactStore::in_memory()?, config, Box::new(embedder))
    }

    /// Open or create a store at `path`, reloading its facts into the index.
    pub fn open(path: impl AsRef<Path>, config: MemoryConfig) -> Result<Self> {
        let embedder = HashEmbedder::new(config.embedding_dimensions)?;
        Self::with_embedder(SqliteFactStore::open(path)?, config, Box::new(embedder))
    }

    /// Assemble a store around an existing fact store and a custom embedder.
    pub fn with_embedder(
        store: SqliteFactStore,
        config: MemoryConfig,
        embedder: Box<dyn Embedder + Send + Sync>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimensions() != config.embedding_dimensions {
            return Err(Error::embedding_dimension(
                config.embedding_dimensions,
                embedder.dimensions(),
            ));
        }

        let mut memory = Self {
            classifier: Classifier::new(config.max_entity_len),
            evolution: EvolutionEngine::with_max_entity_len(config.max_entity_len),
            budget: EvolutionBudget::new(config.session_evolution_cap),
            index: VectorIndex::new(config.embedding_dimensions),
            router: QueryRouter::new(config.indexed_result_limit),
            config,
            store,
            embedder,
        };
        memory.rebuild_index()?;
        info!(facts = memory.index.len(), "adaptive memory ready");
        Ok(memory)
    }

    /// Reload every persisted fact into the scan index.
    ///
    /// Facts without a usable stored embedding are embedded again.
    fn rebuild_index(&mut self) -> Result<()> {
        self.index.clear();
        let dimensions = self.config.embedding_dimensions;
        for (fact, stored) in self.store.load_facts()? {
            let vector = match stored {
                Some(vector) if vector.len() == dimensions => vector,
                _ => self.embedder.embed(&fact.content)?,
            };
            self.index.insert(&fact, &vector)?;
        }
        debug!(facts = self.index.len(), "scan index rebuilt");
        Ok(())
    }

    /// Remember one statement.
    ///
    /// Fails on blank input. The tracker mention, the fact row and any routed
    /// row are written in one transaction, after embedding succeeds, so a
    /// failed `add` leaves no trace. If the classifier then asks for an
    /// evolution and the migration fails, the fact stays stored and indexed,
    /// the failure is returned and the entity remains eligible for a later
    /// attempt.
    pub fn add(&mut self, text: &str) -> Result<AddOutcome> {
        let content = text.trim();
        if content.is_empty() {
            return Err(Error::validation("cannot add empty text"));
        }

        let vector = self.embedder.embed(content)?;
        check_dimensions(&vector, self.config.embedding_dimensions)?;

        let route_new_facts = self.config.route_new_facts;
        let (classification, fact, routed_to) = self.store.with_transaction(|tx| {
            let classification = self
                .classifier
                .classify(content, &mut ConnectionTracker::new(tx))?;
            let fact = Fact::new(content, classification.tier, classification.confidence)
                .with_schema_eligible(classification.schema_eligible);
            insert_fact_row(tx, &fact, Some(&vector)).map_err(Error::storage)?;

            let mut routed_to = None;
            if let (Some(pattern_type), Some(entity)) =
                (&classification.pattern_type, &classification.entity)
            {
                if classification.already_evolved && route_new_facts {
                    if let Some(registry) =
                        lookup_registry(tx, pattern_type).map_err(Error::storage)?
                    {
                        validate_identifier(&registry.table_name)?;
                        insert_evolved_row(
                            tx,
                            &registry.table_name,
                            entity,
                            &fact.content,
                            fact.confidence,
                            &fact.created_at.to_rfc3339(),
                            &fact.id.to_string(),
                        )
                        .map_err(Error::storage)?;
                        debug!(table = %registry.table_name, entity = %entity, "fact routed");
                        routed_to = Some(registry.table_name);
                    }
                }
            }
            Ok((classification, fact, routed_to))
        })?;
        self.index.insert(&fact, &vector)?;

        let mut evolution = None;
        if let (Some(pattern_type), Some(entity)) =
            (&classification.pattern_type, &classification.entity)
        {
            if classification.should_evolve {
                let request =
                    EvolutionRequest::new(pattern_type, entity, classification.confidence);
                evolution = Some(self.evolution.evolve(&self.store, &mut self.budget, &request)?);
            }
        }

        Ok(AddOutcome {
            fact_id: fact.id,
            tier: classification.tier,
            confidence: classification.confidence,
            reason: classification.reason,
            pattern_type: classification.pattern_type,
            entity: classification.entity,
            schema_eligible: classification.schema_eligible,
            routed_to,
            evolution,
        })
    }

    /// Retrieve up to `k` scan results, preceded by indexed rows when the
    /// query names an evolved entity.
    pub fn query(&self, text: &str, k: usize) -> Result<QueryResult> {
        if text.trim().is_empty() {
            return Err(Error::validation("cannot query empty text"));
        }
        self.router
            .route(&self.store, &self.index, self.embedder.as_ref(), text, k)
    }

    /// Store counts, plus evolutions used this session.
    pub fn stats(&self) -> Result<MemoryStats> {
        let mut stats = self.store.stats()?;
        stats.session_evolutions = self.budget.used();
        Ok(stats)
    }

    /// Start a new evolution session.
    pub fn reset_session(&mut self) {
        info!(used = self.budget.used(), "evolution session reset");
        self.budget.reset();
    }

    /// Delete facts that expired before `now` and drop them from the index.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let purged = self.store.purge_expired(now)?;
        if purged > 0 {
            self.rebuild_index()?;
            info!(purged, "expired facts purged");
        }
        Ok(purged)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteFactStore {
        &self.store
    }

    pub fn budget(&self) -> &EvolutionBudget {
        &self.budget
    }

    /// Number of facts in the scan index.
    pub fn indexed_facts(&self) -> usize {
        self.index.len()
    }
}
