//! Schema evolution: promoting an entity's records into an indexed relation.
//!
//! Once an entity's accumulated confidence crosses
//! [`EVOLUTION_THRESHOLD`](crate::classifier::EVOLUTION_THRESHOLD), every
//! generic fact mentioning it is copied into `<pattern_type>_evolved`, a
//! relation indexed on `entity`. A run moves through
//!
//! ```text
//! Eligible -> ShadowCreated -> Backfilled -> Swapped
//!                  \______________\____________\__> Failed (rolled back)
//! ```
//!
//! and every step after the guards executes inside one SQLite transaction:
//! either the registry row, the promoted relation and the tracker's `evolved`
//! flag all appear together, or none of them do and the pair can be retried.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mutatis_core::evolution::{EvolutionBudget, EvolutionEngine, EvolutionRequest};
//!
//! let engine = EvolutionEngine::new();
//! let mut budget = EvolutionBudget::new(3);
//! let outcome = engine.evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "sara", 0.99))?;
//! assert!(outcome.triggered);
//! ```

mod budget;
pub mod naming;

pub use budget::EvolutionBudget;

use crate::classifier::EVOLUTION_THRESHOLD;
use crate::error::{Error, Result};
use crate::memory::schema::{create_evolved_table, table_exists};
use crate::memory::store::{insert_evolved_row, mark_evolved, register_evolution};
use crate::memory::{RegistryEntry, SqliteFactStore};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default longest entity accepted by the engine.
const DEFAULT_MAX_ENTITY_LEN: usize = 64;

/// A request to evolve one (pattern type, entity) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionRequest {
    pub pattern_type: String,
    pub entity: String,
    pub confidence: f64,
}

impl EvolutionRequest {
    pub fn new(
        pattern_type: impl Into<String>,
        entity: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            pattern_type: pattern_type.into(),
            entity: entity.into(),
            confidence,
        }
    }
}

/// Why an evolution request was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionSkip {
    BelowThreshold,
    RateLimited,
    AlreadyEvolved,
    /// The tracker has never seen this pair
    Untracked,
}

impl EvolutionSkip {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelowThreshold => "below threshold",
            Self::RateLimited => "rate limited",
            Self::AlreadyEvolved => "already evolved",
            Self::Untracked => "not tracked",
        }
    }
}

impl std::fmt::Display for EvolutionSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an evolution request that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub triggered: bool,
    pub table_name: Option<String>,
    /// Rows in the promoted relation at swap time
    pub record_count: Option<u64>,
    pub skipped: Option<EvolutionSkip>,
    pub message: String,
}

impl EvolutionOutcome {
    fn swapped(table_name: String, record_count: u64) -> Self {
        Self {
            message: format!("evolved into {} ({} records)", table_name, record_count),
            triggered: true,
            table_name: Some(table_name),
            record_count: Some(record_count),
            skipped: None,
        }
    }

    fn skipped(reason: EvolutionSkip) -> Self {
        Self {
            triggered: false,
            table_name: None,
            record_count: None,
            skipped: Some(reason),
            message: reason.to_string(),
        }
    }
}

/// Runs the guard sequence and the shadow-table migration.
#[derive(Debug, Clone)]
pub struct EvolutionEngine {
    max_entity_len: usize,
}

impl Default for EvolutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EvolutionEngine {
    pub fn new() -> Self {
        Self {
            max_entity_len: DEFAULT_MAX_ENTITY_LEN,
        }
    }

    pub fn with_max_entity_len(max_entity_len: usize) -> Self {
        Self { max_entity_len }
    }

    /// Evolve a pair if the guards allow it.
    ///
    /// Guards run in order: confidence, session budget, tracker state. A
    /// declined request is an `Ok` outcome with `triggered == false`. A
    /// migration error rolls everything back and returns
    /// [`Error::EvolutionFailure`]; the budget is only charged on success.
    pub fn evolve(
        &self,
        store: &SqliteFactStore,
        budget: &mut EvolutionBudget,
        request: &EvolutionRequest,
    ) -> Result<EvolutionOutcome> {
        if request.confidence < EVOLUTION_THRESHOLD {
            return Ok(self.decline(request, EvolutionSkip::BelowThreshold));
        }
        if budget.is_exhausted() {
            return Ok(self.decline(request, EvolutionSkip::RateLimited));
        }
        match store.pattern_entry(&request.pattern_type, &request.entity)? {
            None => return Ok(self.decline(request, EvolutionSkip::Untracked)),
            Some(entry) if entry.evolved => {
                return Ok(self.decline(request, EvolutionSkip::AlreadyEvolved))
            }
            Some(_) => {}
        }

        let target = naming::evolved_table_name(&request.pattern_type)?;
        naming::validate_entity(&request.entity, self.max_entity_len)?;
        let now = Utc::now();
        let shadow = naming::shadow_table_name(&target, now)?;

        let record_count = store
            .with_transaction(|tx| {
                create_evolved_table(tx, &shadow).map_err(Error::storage)?;
                let seeded = seed_from_live(tx, &target, &shadow, &request.entity)?;
                let backfilled = backfill(tx, &shadow, &request.entity)?;
                promote(tx, &shadow, &target)?;

                let record_count = seeded + backfilled;
                register_evolution(
                    tx,
                    &RegistryEntry {
                        pattern_type: request.pattern_type.clone(),
                        table_name: target.clone(),
                        created_at: now,
                        record_count,
                    },
                )
                .map_err(Error::storage)?;
                if !mark_evolved(tx, &request.pattern_type, &request.entity)
                    .map_err(Error::storage)?
                {
                    return Err(Error::storage("tracker entry vanished during evolution"));
                }
                Ok(record_count)
            })
            .map_err(|e| {
                warn!(
                    pattern = %request.pattern_type,
                    entity = %request.entity,
                    error = %e,
                    "schema evolution rolled back"
                );
                Error::evolution_failure(&request.pattern_type, &request.entity, e)
            })?;

        budget.consume();
        info!(
            pattern = %request.pattern_type,
            entity = %request.entity,
            table = %target,
            records = record_count,
            remaining = budget.remaining(),
            "schema evolved"
        );
        Ok(EvolutionOutcome::swapped(target, record_count))
    }

    fn decline(&self, request: &EvolutionRequest, reason: EvolutionSkip) -> EvolutionOutcome {
        info!(
            pattern = %request.pattern_type,
            entity = %request.entity,
            reason = %reason,
            "schema evolution skipped"
        );
        EvolutionOutcome::skipped(reason)
    }
}

/// Carry rows for other entities over from a live relation of the same name.
fn seed_from_live(conn: &Connection, target: &str, shadow: &str, entity: &str) -> Result<u64> {
    if !table_exists(conn, target).map_err(Error::storage)? {
        return Ok(0);
    }
    let copied = conn
        .execute(
            &format!(
                "INSERT INTO {shadow} (id, entity, content, confidence, created_at, source_id)
                 SELECT id, entity, content, confidence, created_at, source_id
                 FROM {target} WHERE entity <> ?1"
            ),
            params![entity],
        )
        .map_err(Error::storage)?;
    Ok(copied as u64)
}

/// Copy every generic fact mentioning `entity` into the shadow relation.
///
/// Matching is a case-insensitive substring test done with Unicode case
/// folding; SQLite's `lower()` only folds ASCII.
fn backfill(conn: &Connection, shadow: &str, entity: &str) -> Result<u64> {
    let rows: Vec<(String, String, f64, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT id, content, confidence, created_at FROM generic_memories
                 ORDER BY created_at, rowid",
            )
            .map_err(Error::storage)?;
        let rows: Vec<(String, String, f64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(Error::storage)?;
        rows.into_iter()
            .filter(|(_, content, _, _)| content.to_lowercase().contains(entity))
            .collect()
    };

    for (source_id, content, confidence, created_at) in &rows {
        insert_evolved_row(conn, shadow, entity, content, *confidence, created_at, source_id)
            .map_err(Error::storage)?;
    }
    Ok(rows.len() as u64)
}

/// Replace the live relation with the shadow.
fn promote(conn: &Connection, shadow: &str, target: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {target};
         ALTER TABLE {shadow} RENAME TO {target};"
    ))
    .map_err(Error::storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fact, Tier};

    fn store_with_sara() -> SqliteFactStore {
        let store = SqliteFactStore::in_memory().unwrap();
        let now = Utc::now();
        for (text, confidence) in [
            ("My wife is Sara", 0.85),
            ("Sara is my wife", 0.93),
            ("Went hiking with SARA", 0.5),
            ("The meeting ran long", 0.5),
        ] {
            store
                .insert_fact(&Fact::new(text, Tier::Foundational, confidence), None)
                .unwrap();
        }
        for _ in 0..3 {
            store.record_mention("family_spouse", "sara", 0.85, now).unwrap();
        }
        store
    }

    fn table_count(store: &SqliteFactStore, prefix: &str) -> i64 {
        store
            .with_transaction(|tx| {
                tx.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE ?1",
                    params![format!("{}%", prefix)],
                    |row| row.get(0),
                )
                .map_err(Error::storage)
            })
            .unwrap()
    }

    #[test]
    fn test_successful_evolution() {
        let store = store_with_sara();
        let mut budget = EvolutionBudget::new(3);

        let outcome = EvolutionEngine::new()
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "sara", 0.99))
            .unwrap();

        assert!(outcome.triggered);
        assert_eq!(outcome.table_name.as_deref(), Some("family_spouse_evolved"));
        assert_eq!(outcome.record_count, Some(3));
        assert_eq!(budget.used(), 1);

        let entry = store.pattern_entry("family_spouse", "sara").unwrap().unwrap();
        assert!(entry.evolved);
        let registry = store.registry_entry("family_spouse").unwrap().unwrap();
        assert_eq!(registry.table_name, "family_spouse_evolved");
        assert_eq!(registry.record_count, 3);
        // The shadow was renamed, not left behind
        assert_eq!(table_count(&store, "family_spouse_evolved_shadow"), 0);
    }

    #[test]
    fn test_evolved_rows_trace_back_to_sources() {
        let store = store_with_sara();
        let mut budget = EvolutionBudget::new(3);
        EvolutionEngine::new()
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "sara", 0.99))
            .unwrap();

        let rows = store.evolved_rows("family_spouse_evolved", "sara").unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        for row in rows {
            let source = store.get_fact(&row.source_id).unwrap().unwrap();
            assert_eq!(source.content, row.content);
        }
    }

    #[test]
    fn test_guard_order() {
        let store = store_with_sara();
        let engine = EvolutionEngine::new();

        let mut budget = EvolutionBudget::new(0);
        let low = engine
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "sara", 0.93))
            .unwrap();
        assert_eq!(low.skipped, Some(EvolutionSkip::BelowThreshold));

        let limited = engine
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "sara", 0.99))
            .unwrap();
        assert_eq!(limited.skipped, Some(EvolutionSkip::RateLimited));
        assert_eq!(limited.message, "rate limited");

        let mut budget = EvolutionBudget::new(3);
        let unknown = engine
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "anna", 0.99))
            .unwrap();
        assert_eq!(unknown.skipped, Some(EvolutionSkip::Untracked));
    }

    #[test]
    fn test_second_evolution_is_noop() {
        let store = store_with_sara();
        let engine = EvolutionEngine::new();
        let mut budget = EvolutionBudget::new(3);
        let request = EvolutionRequest::new("family_spouse", "sara", 0.99);

        assert!(engine.evolve(&store, &mut budget, &request).unwrap().triggered);
        let again = engine.evolve(&store, &mut budget, &request).unwrap();

        assert!(!again.triggered);
        assert_eq!(again.skipped, Some(EvolutionSkip::AlreadyEvolved));
        assert_eq!(again.message, "already evolved");
        assert_eq!(budget.used(), 1);
    }

    #[test]
    fn test_failed_promotion_rolls_back_everything() {
        let store = store_with_sara();
        // A view squatting on the target name makes the drop step fail
        store
            .with_transaction(|tx| {
                tx.execute_batch("CREATE VIEW family_spouse_evolved AS SELECT 1 AS x")
                    .map_err(Error::storage)
            })
            .unwrap();
        let mut budget = EvolutionBudget::new(3);

        let err = EvolutionEngine::new()
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "sara", 0.99))
            .unwrap_err();

        assert!(matches!(err, Error::EvolutionFailure { .. }));
        assert_eq!(budget.used(), 0);
        assert!(!store.pattern_entry("family_spouse", "sara").unwrap().unwrap().evolved);
        assert!(store.registry_entry("family_spouse").unwrap().is_none());
        assert_eq!(table_count(&store, "family_spouse_evolved_shadow"), 0);
    }

    #[test]
    fn test_shared_relation_keeps_earlier_entity() {
        let store = store_with_sara();
        let now = Utc::now();
        store
            .insert_fact(&Fact::new("My husband is Tom", Tier::Foundational, 0.85), None)
            .unwrap();
        for _ in 0..3 {
            store.record_mention("family_spouse", "tom", 0.85, now).unwrap();
        }
        let engine = EvolutionEngine::new();
        let mut budget = EvolutionBudget::new(3);

        engine
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "sara", 0.99))
            .unwrap();
        let second = engine
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "tom", 0.99))
            .unwrap();

        assert_eq!(second.record_count, Some(4));
        assert_eq!(store.evolved_rows("family_spouse_evolved", "sara").unwrap().len(), 3);
        assert_eq!(store.evolved_rows("family_spouse_evolved", "tom").unwrap().len(), 1);
        assert_eq!(store.registry_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_backfill_folds_non_ascii_case() {
        let store = SqliteFactStore::in_memory().unwrap();
        for text in [
            "My wife is ZOË",
            "Dinner with Zoë tonight",
            "We went to the zoo",
            "Ozone levels",
        ] {
            store
                .insert_fact(&Fact::new(text, Tier::Foundational, 0.85), None)
                .unwrap();
        }
        for _ in 0..3 {
            store.record_mention("family_spouse", "zoë", 0.85, Utc::now()).unwrap();
        }
        let mut budget = EvolutionBudget::new(3);

        let outcome = EvolutionEngine::new()
            .evolve(&store, &mut budget, &EvolutionRequest::new("family_spouse", "zoë", 0.99))
            .unwrap();

        assert_eq!(outcome.record_count, Some(2));
        let mut contents: Vec<String> = store
            .evolved_rows("family_spouse_evolved", "zoë")
            .unwrap()
            .into_iter()
            .map(|row| row.content)
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["Dinner with Zoë tonight", "My wife is ZOË"]);
    }

    #[test]
    fn test_invalid_pattern_type_is_rejected_before_ddl() {
        let store = SqliteFactStore::in_memory().unwrap();
        store
            .record_mention("bad name; --", "sara", 0.85, Utc::now())
            .unwrap();
        let mut budget = EvolutionBudget::new(3);

        let err = EvolutionEngine::new()
            .evolve(&store, &mut budget, &EvolutionRequest::new("bad name; --", "sara", 0.99))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
