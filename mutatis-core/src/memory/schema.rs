//! SQLite schema and migrations for the fact store.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // In-memory databases report "memory" and ignore the request
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

/// Apply version 1 schema.
fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    // Generic, scanned fact table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS generic_memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding BLOB,
            tier TEXT NOT NULL CHECK (tier IN ('transient', 'episodic', 'foundational')),
            confidence REAL NOT NULL,
            schema_eligible INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            ttl INTEGER,
            stored_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pattern_tracker (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_type TEXT NOT NULL,
            entity TEXT NOT NULL,
            mention_count INTEGER NOT NULL DEFAULT 1,
            base_confidence REAL NOT NULL DEFAULT 0.80,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            evolved INTEGER NOT NULL DEFAULT 0,
            UNIQUE (pattern_type, entity)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_registry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_type TEXT NOT NULL,
            table_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            record_count INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_generic_tier ON generic_memories(tier)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_generic_created ON generic_memories(created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tracker_pattern ON pattern_tracker(pattern_type, entity)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registry_table ON schema_registry(table_name)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Create an evolved relation and its entity index.
///
/// `table` must already have passed identifier validation.
pub fn create_evolved_table(conn: &Connection, table: &str) -> SqliteResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE {table} (
            id TEXT PRIMARY KEY,
            entity TEXT NOT NULL,
            content TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL,
            source_id TEXT NOT NULL
        );
        CREATE INDEX {table}_entity_idx ON {table}(entity);"
    ))
}

/// Check whether a table with this exact name exists.
pub fn table_exists(conn: &Connection, table: &str) -> SqliteResult<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='generic_memories'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
