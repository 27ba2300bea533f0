//! SQLite-backed fact store implementation.

use crate::error::{Error, Result};
use crate::evolution::naming::validate_identifier;
use crate::memory::schema::{initialize_schema, is_initialized};
use crate::memory::types::*;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const FACT_COLUMNS: &str =
    "id, content, tier, confidence, schema_eligible, created_at, ttl, embedding";

const TRACKER_COLUMNS: &str =
    "pattern_type, entity, mention_count, base_confidence, first_seen, last_seen, evolved";

/// SQLite-backed fact store.
///
/// Owns the generic fact table, the pattern tracker, the schema registry and
/// every evolved relation. Cloning yields another handle to the same
/// connection.
#[derive(Clone)]
pub struct SqliteFactStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFactStore {
    /// Open or create a fact store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::storage)?;

        if !is_initialized(&conn) {
            debug!("initializing fact store schema");
            initialize_schema(&conn).map_err(Error::storage)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::storage)?;
        initialize_schema(&conn).map_err(Error::storage)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(Error::storage)
    }

    /// Run `f` inside one transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error rolls back
    /// every statement `f` issued, DDL included.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        let tx = conn.transaction().map_err(Error::storage)?;
        let value = f(&tx)?;
        tx.commit().map_err(Error::storage)?;
        Ok(value)
    }

    // ==================== Fact Operations ====================

    /// Insert a fact, with its embedding when one was computed.
    pub fn insert_fact(&self, fact: &Fact, embedding: Option<&[f32]>) -> Result<()> {
        self.with_conn(|conn| insert_fact_row(conn, fact, embedding))
    }

    /// Get a fact by ID.
    pub fn get_fact(&self, id: &FactId) -> Result<Option<Fact>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {FACT_COLUMNS} FROM generic_memories WHERE id = ?1"),
                params![id.to_string()],
                |row| Self::row_to_fact(row).map(|(fact, _)| fact),
            )
            .optional()
        })
    }

    /// Every stored fact with its decoded embedding, oldest first.
    pub fn load_facts(&self) -> Result<Vec<(Fact, Option<Vec<f32>>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM generic_memories ORDER BY created_at, rowid"
            ))?;
            let facts = stmt
                .query_map([], |row| Self::row_to_fact(row))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(facts)
        })
    }

    fn row_to_fact(row: &rusqlite::Row) -> rusqlite::Result<(Fact, Option<Vec<f32>>)> {
        let id_str: String = row.get(0)?;
        let tier_str: String = row.get(2)?;

        let id = FactId::parse(&id_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
        let tier = tier_str
            .parse::<Tier>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        let embedding = row.get::<_, Option<Vec<u8>>>(7)?.map(|b| decode_embedding(&b));

        let fact = Fact {
            id,
            content: row.get(1)?,
            tier,
            confidence: row.get(3)?,
            schema_eligible: row.get(4)?,
            created_at: parse_datetime(row.get::<_, String>(5)?),
            ttl_hours: row.get(6)?,
        };
        Ok((fact, embedding))
    }

    /// Delete facts whose time to live has run out.
    ///
    /// Facts still referenced by an evolved relation are kept so every evolved
    /// row stays traceable to its source.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let tables: Vec<String> = self
            .registry_entries()?
            .into_iter()
            .map(|entry| entry.table_name)
            .collect();
        for table in &tables {
            validate_identifier(table)?;
        }

        self.with_transaction(|tx| {
            let mut referenced = HashSet::new();
            for table in &tables {
                let mut stmt = tx
                    .prepare(&format!("SELECT source_id FROM {table}"))
                    .map_err(Error::storage)?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(Error::storage)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(Error::storage)?;
                referenced.extend(ids);
            }

            let candidates: Vec<(String, String, u32)> = {
                let mut stmt = tx
                    .prepare("SELECT id, created_at, ttl FROM generic_memories WHERE ttl IS NOT NULL")
                    .map_err(Error::storage)?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                    .map_err(Error::storage)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(Error::storage)?;
                rows
            };

            let mut deleted = 0;
            for (id, created_at, ttl) in candidates {
                let expires_at =
                    parse_datetime(created_at) + chrono::Duration::hours(i64::from(ttl));
                if expires_at < now && !referenced.contains(&id) {
                    deleted += tx
                        .execute("DELETE FROM generic_memories WHERE id = ?1", params![id])
                        .map_err(Error::storage)?;
                }
            }
            Ok(deleted)
        })
    }

    // ==================== Tracker Operations ====================

    /// Count one more mention of a pair, creating its entry on first sight.
    ///
    /// `base_confidence` is only written when the entry is created.
    pub fn record_mention(
        &self,
        pattern_type: &str,
        entity: &str,
        base_confidence: f64,
        seen_at: DateTime<Utc>,
    ) -> Result<PatternEntry> {
        self.with_conn(|conn| upsert_mention(conn, pattern_type, entity, base_confidence, seen_at))
    }

    /// Get the tracker entry for a pair.
    pub fn pattern_entry(&self, pattern_type: &str, entity: &str) -> Result<Option<PatternEntry>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {TRACKER_COLUMNS} FROM pattern_tracker
                     WHERE pattern_type = ?1 AND entity = ?2"
                ),
                params![pattern_type, entity],
                |row| Self::row_to_entry(row),
            )
            .optional()
        })
    }

    /// All tracker entries in first-seen order.
    pub fn tracked_patterns(&self) -> Result<Vec<PatternEntry>> {
        self.with_conn(tracked_entries)
    }

    /// Tracker entries that have been evolved, in first-seen order.
    pub fn evolved_patterns(&self) -> Result<Vec<PatternEntry>> {
        self.query_entries("SELECT {} FROM pattern_tracker WHERE evolved = 1 ORDER BY id")
    }

    fn query_entries(&self, template: &str) -> Result<Vec<PatternEntry>> {
        let sql = template.replacen("{}", TRACKER_COLUMNS, 1);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map([], |row| Self::row_to_entry(row))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<PatternEntry> {
        Ok(PatternEntry {
            pattern_type: row.get(0)?,
            entity: row.get(1)?,
            mention_count: row.get(2)?,
            base_confidence: row.get(3)?,
            first_seen: parse_datetime(row.get::<_, String>(4)?),
            last_seen: parse_datetime(row.get::<_, String>(5)?),
            evolved: row.get(6)?,
        })
    }

    // ==================== Registry Operations ====================

    /// Registry entry for a pattern type, if it has been evolved.
    pub fn registry_entry(&self, pattern_type: &str) -> Result<Option<RegistryEntry>> {
        self.with_conn(|conn| lookup_registry(conn, pattern_type))
    }

    /// All registry entries, oldest first.
    pub fn registry_entries(&self) -> Result<Vec<RegistryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pattern_type, table_name, created_at, record_count
                 FROM schema_registry ORDER BY id",
            )?;
            let entries = stmt
                .query_map([], |row| Self::row_to_registry(row))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    fn row_to_registry(row: &rusqlite::Row) -> rusqlite::Result<RegistryEntry> {
        Ok(RegistryEntry {
            pattern_type: row.get(0)?,
            table_name: row.get(1)?,
            created_at: parse_datetime(row.get::<_, String>(2)?),
            record_count: row.get::<_, i64>(3)? as u64,
        })
    }

    // ==================== Evolved Relations ====================

    /// Rows of an evolved relation for one entity, highest confidence first.
    pub fn evolved_rows(&self, table: &str, entity: &str) -> Result<Vec<EvolvedRow>> {
        validate_identifier(table)?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, entity, content, confidence, created_at, source_id
                 FROM {table} WHERE entity = ?1
                 ORDER BY confidence DESC, created_at, rowid"
            ))?;
            let rows = stmt
                .query_map(params![entity], |row| {
                    let source: String = row.get(5)?;
                    Ok(EvolvedRow {
                        id: row.get(0)?,
                        entity: row.get(1)?,
                        content: row.get(2)?,
                        confidence: row.get(3)?,
                        created_at: parse_datetime(row.get::<_, String>(4)?),
                        source_id: FactId::parse(&source).map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                        })?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Append a fact to a live evolved relation.
    pub fn append_evolved_row(&self, table: &str, entity: &str, fact: &Fact) -> Result<()> {
        validate_identifier(table)?;
        self.with_conn(|conn| {
            insert_evolved_row(
                conn,
                table,
                entity,
                &fact.content,
                fact.confidence,
                &fact.created_at.to_rfc3339(),
                &fact.id.to_string(),
            )
        })
    }

    // ==================== Statistics ====================

    /// Get statistics about the store.
    ///
    /// `session_evolutions` is left at zero; the budget lives with the caller.
    pub fn stats(&self) -> Result<MemoryStats> {
        self.with_conn(|conn| {
            let facts_by_tier: HashMap<Tier, u64> = {
                let mut stmt =
                    conn.prepare("SELECT tier, COUNT(*) FROM generic_memories GROUP BY tier")?;
                let rows = stmt.query_map([], |row| {
                    let tier_str: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((tier_str, count))
                })?;
                let mut result = HashMap::new();
                for row in rows {
                    let (tier_str, count) = row?;
                    if let Ok(tier) = tier_str.parse::<Tier>() {
                        result.insert(tier, count as u64);
                    }
                }
                result
            };

            let tracked_patterns: i64 =
                conn.query_row("SELECT COUNT(*) FROM pattern_tracker", [], |row| row.get(0))?;
            let evolved_relations: i64 =
                conn.query_row("SELECT COUNT(*) FROM schema_registry", [], |row| row.get(0))?;

            Ok(MemoryStats {
                total_facts: facts_by_tier.values().sum(),
                facts_by_tier,
                tracked_patterns: tracked_patterns as u64,
                evolved_relations: evolved_relations as u64,
                session_evolutions: 0,
            })
        })
    }
}

// ==================== Transaction-scoped primitives ====================

/// Insert one generic fact row.
pub(crate) fn insert_fact_row(
    conn: &Connection,
    fact: &Fact,
    embedding: Option<&[f32]>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO generic_memories (
            id, content, embedding, tier, confidence, schema_eligible, created_at, ttl
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            fact.id.to_string(),
            fact.content,
            embedding.map(encode_embedding),
            fact.tier.as_str(),
            fact.confidence,
            fact.schema_eligible,
            fact.created_at.to_rfc3339(),
            fact.ttl_hours,
        ],
    )?;
    Ok(())
}

/// Count one mention of a pair and return the updated entry.
pub(crate) fn upsert_mention(
    conn: &Connection,
    pattern_type: &str,
    entity: &str,
    base_confidence: f64,
    seen_at: DateTime<Utc>,
) -> rusqlite::Result<PatternEntry> {
    conn.execute(
        "INSERT INTO pattern_tracker (
            pattern_type, entity, mention_count, base_confidence, first_seen, last_seen, evolved
        ) VALUES (?1, ?2, 1, ?3, ?4, ?4, 0)
        ON CONFLICT (pattern_type, entity) DO UPDATE SET
            mention_count = mention_count + 1,
            last_seen = excluded.last_seen",
        params![pattern_type, entity, base_confidence, seen_at.to_rfc3339()],
    )?;
    conn.query_row(
        &format!(
            "SELECT {TRACKER_COLUMNS} FROM pattern_tracker
             WHERE pattern_type = ?1 AND entity = ?2"
        ),
        params![pattern_type, entity],
        |row| SqliteFactStore::row_to_entry(row),
    )
}

/// Every tracker entry in first-seen order.
pub(crate) fn tracked_entries(conn: &Connection) -> rusqlite::Result<Vec<PatternEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRACKER_COLUMNS} FROM pattern_tracker ORDER BY id"
    ))?;
    let entries = stmt
        .query_map([], |row| SqliteFactStore::row_to_entry(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub(crate) fn lookup_registry(
    conn: &Connection,
    pattern_type: &str,
) -> rusqlite::Result<Option<RegistryEntry>> {
    conn.query_row(
        "SELECT pattern_type, table_name, created_at, record_count
         FROM schema_registry WHERE pattern_type = ?1",
        params![pattern_type],
        |row| SqliteFactStore::row_to_registry(row),
    )
    .optional()
}

/// Insert one row into an evolved (or shadow) relation.
pub(crate) fn insert_evolved_row(
    conn: &Connection,
    table: &str,
    entity: &str,
    content: &str,
    confidence: f64,
    created_at: &str,
    source_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table} (id, entity, content, confidence, created_at, source_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        params![
            uuid::Uuid::new_v4().to_string(),
            entity,
            content,
            confidence,
            created_at,
            source_id
        ],
    )?;
    Ok(())
}

/// Flip a tracker entry's evolved flag. Returns false if the pair is unknown.
pub(crate) fn mark_evolved(
    conn: &Connection,
    pattern_type: &str,
    entity: &str,
) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE pattern_tracker SET evolved = 1 WHERE pattern_type = ?1 AND entity = ?2",
        params![pattern_type, entity],
    )?;
    Ok(rows > 0)
}

/// Replace the registry row for a pattern type.
pub(crate) fn register_evolution(conn: &Connection, entry: &RegistryEntry) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM schema_registry WHERE pattern_type = ?1",
        params![entry.pattern_type],
    )?;
    conn.execute(
        "INSERT INTO schema_registry (pattern_type, table_name, created_at, record_count)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.pattern_type,
            entry.table_name,
            entry.created_at.to_rfc3339(),
            entry.record_count as i64,
        ],
    )?;
    Ok(())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_and_get_fact() {
        let store = SqliteFactStore::in_memory().unwrap();
        let fact =
            Fact::new("My wife is Sara", Tier::Foundational, 0.85).with_schema_eligible(true);

        store.insert_fact(&fact, Some(&[0.5, -0.25])).unwrap();
        let retrieved = store.get_fact(&fact.id).unwrap().unwrap();

        assert_eq!(retrieved.content, "My wife is Sara");
        assert_eq!(retrieved.tier, Tier::Foundational);
        assert!(retrieved.schema_eligible);
        assert_eq!(retrieved.ttl_hours, None);
    }

    #[test]
    fn test_embedding_round_trip() {
        let store = SqliteFactStore::in_memory().unwrap();
        let fact = Fact::new("it is sunny", Tier::Transient, 0.3);

        store.insert_fact(&fact, Some(&[1.0, -0.5, 0.125])).unwrap();
        let loaded = store.load_facts().unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1, Some(vec![1.0, -0.5, 0.125]));
        assert_eq!(loaded[0].0.ttl_hours, Some(24));
    }

    #[test]
    fn test_record_mention_keeps_first_base_confidence() {
        let store = SqliteFactStore::in_memory().unwrap();
        let now = Utc::now();

        let first = store.record_mention("family_spouse", "sara", 0.85, now).unwrap();
        let second = store
            .record_mention("family_spouse", "sara", 0.60, now + Duration::seconds(5))
            .unwrap();

        assert_eq!(first.mention_count, 1);
        assert_eq!(second.mention_count, 2);
        assert_eq!(second.base_confidence, 0.85);
        assert!(second.last_seen > second.first_seen);
        assert!(!second.evolved);
    }

    #[test]
    fn test_tracked_patterns_in_first_seen_order() {
        let store = SqliteFactStore::in_memory().unwrap();
        let now = Utc::now();
        store.record_mention("location", "lisbon", 0.8, now).unwrap();
        store.record_mention("family_spouse", "sara", 0.85, now).unwrap();
        store.record_mention("location", "lisbon", 0.8, now).unwrap();

        let entities: Vec<String> = store
            .tracked_patterns()
            .unwrap()
            .into_iter()
            .map(|e| e.entity)
            .collect();
        assert_eq!(entities, vec!["lisbon".to_string(), "sara".to_string()]);
        assert!(store.evolved_patterns().unwrap().is_empty());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = SqliteFactStore::in_memory().unwrap();

        let result: Result<()> = store.with_transaction(|tx| {
            tx.execute("CREATE TABLE scratch (id TEXT)", [])
                .map_err(Error::storage)?;
            Err(Error::storage("boom"))
        });

        assert!(result.is_err());
        let exists: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(exists, 0);
    }

    #[test]
    fn test_stats_counts_per_tier() {
        let store = SqliteFactStore::in_memory().unwrap();
        store
            .insert_fact(&Fact::new("F1", Tier::Foundational, 0.9), None)
            .unwrap();
        store
            .insert_fact(&Fact::new("E1", Tier::Episodic, 0.5), None)
            .unwrap();
        store
            .insert_fact(&Fact::new("E2", Tier::Episodic, 0.5), None)
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_facts, 3);
        assert_eq!(stats.count(Tier::Episodic), 2);
        assert_eq!(stats.count(Tier::Transient), 0);
    }

    #[test]
    fn test_purge_expired_removes_only_lapsed_facts() {
        let store = SqliteFactStore::in_memory().unwrap();
        let now = Utc::now();
        let stale = Fact::new("is it raining?", Tier::Transient, 0.3)
            .with_created_at(now - Duration::hours(30));
        let fresh = Fact::new("remind me at noon", Tier::Transient, 0.3);
        let durable = Fact::new("my name is ada", Tier::Foundational, 0.9)
            .with_created_at(now - Duration::days(400));
        for fact in [&stale, &fresh, &durable] {
            store.insert_fact(fact, None).unwrap();
        }

        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert!(store.get_fact(&stale.id).unwrap().is_none());
        assert!(store.get_fact(&fresh.id).unwrap().is_some());
        assert!(store.get_fact(&durable.id).unwrap().is_some());
    }

    #[test]
    fn test_purge_keeps_facts_referenced_by_evolved_rows() {
        let store = SqliteFactStore::in_memory().unwrap();
        let now = Utc::now();
        let stale = Fact::new("went hiking with sara", Tier::Episodic, 0.5)
            .with_created_at(now - Duration::days(40));
        store.insert_fact(&stale, None).unwrap();
        store
            .with_transaction(|tx| {
                crate::memory::schema::create_evolved_table(tx, "family_spouse_evolved")
                    .map_err(Error::storage)?;
                register_evolution(
                    tx,
                    &RegistryEntry {
                        pattern_type: "family_spouse".to_string(),
                        table_name: "family_spouse_evolved".to_string(),
                        created_at: now,
                        record_count: 0,
                    },
                )
                .map_err(Error::storage)
            })
            .unwrap();
        store
            .append_evolved_row("family_spouse_evolved", "sara", &stale)
            .unwrap();

        assert_eq!(store.purge_expired(now).unwrap(), 0);
        assert!(store.get_fact(&stale.id).unwrap().is_some());
        let rows = store.evolved_rows("family_spouse_evolved", "sara").unwrap();
        assert_eq!(rows[0].source_id, stale.id);
    }
}
