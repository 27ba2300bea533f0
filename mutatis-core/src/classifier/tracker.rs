//! Tracker state consulted and updated by the classifier.

use chrono::Utc;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::memory::store::{tracked_entries, upsert_mention};
use crate::memory::{PatternEntry, SqliteFactStore};

/// Per-(pattern type, entity) mention accumulator.
pub trait PatternTracker {
    /// Count one mention, creating the entry with `base_confidence` on first
    /// sight. Later calls never change the stored base confidence.
    fn record_mention(
        &mut self,
        pattern_type: &str,
        entity: &str,
        base_confidence: f64,
    ) -> Result<PatternEntry>;

    /// Every tracked entry, in first-seen order.
    fn tracked(&self) -> Result<Vec<PatternEntry>>;
}

impl PatternTracker for SqliteFactStore {
    fn record_mention(
        &mut self,
        pattern_type: &str,
        entity: &str,
        base_confidence: f64,
    ) -> Result<PatternEntry> {
        SqliteFactStore::record_mention(self, pattern_type, entity, base_confidence, Utc::now())
    }

    fn tracked(&self) -> Result<Vec<PatternEntry>> {
        self.tracked_patterns()
    }
}

/// Tracker bound to one open connection, usually a transaction.
///
/// Mentions recorded through it commit or roll back with that transaction.
pub(crate) struct ConnectionTracker<'a> {
    conn: &'a Connection,
}

impl<'a> ConnectionTracker<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl PatternTracker for ConnectionTracker<'_> {
    fn record_mention(
        &mut self,
        pattern_type: &str,
        entity: &str,
        base_confidence: f64,
    ) -> Result<PatternEntry> {
        upsert_mention(self.conn, pattern_type, entity, base_confidence, Utc::now())
            .map_err(Error::storage)
    }

    fn tracked(&self) -> Result<Vec<PatternEntry>> {
        tracked_entries(self.conn).map_err(Error::storage)
    }
}

/// Tracker kept entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTracker {
    entries: Vec<PatternEntry>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pattern_type: &str, entity: &str) -> Option<&PatternEntry> {
        self.entries
            .iter()
            .find(|e| e.pattern_type == pattern_type && e.entity == entity)
    }

    /// Flag a pair as evolved. Returns false if the pair is unknown.
    pub fn mark_evolved(&mut self, pattern_type: &str, entity: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.pattern_type == pattern_type && e.entity == entity)
        {
            Some(entry) => {
                entry.evolved = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PatternTracker for InMemoryTracker {
    fn record_mention(
        &mut self,
        pattern_type: &str,
        entity: &str,
        base_confidence: f64,
    ) -> Result<PatternEntry> {
        let now = Utc::now();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.pattern_type == pattern_type && e.entity == entity)
        {
            entry.mention_count += 1;
            entry.last_seen = now;
            return Ok(entry.clone());
        }

        let entry = PatternEntry {
            pattern_type: pattern_type.to_string(),
            entity: entity.to_string(),
            mention_count: 1,
            base_confidence,
            first_seen: now,
            last_seen: now,
            evolved: false,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn tracked(&self) -> Result<Vec<PatternEntry>> {
        Ok(self.entries.clone())
    }
}
