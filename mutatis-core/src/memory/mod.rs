//! Persistent fact storage.
//!
//! Three fixed relations back every store:
//!
//! - **generic_memories**: every fact ever added, with tier, confidence,
//!   time to live and optional embedding
//! - **pattern_tracker**: mention counts per (pattern type, entity)
//! - **schema_registry**: one row per evolved relation
//!
//! Evolved relations (`<pattern_type>_evolved`) are created at runtime by the
//! [`evolution`](crate::evolution) engine.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mutatis_core::memory::{Fact, SqliteFactStore, Tier};
//!
//! let store = SqliteFactStore::in_memory()?;
//! let fact = Fact::new("My wife is Sara", Tier::Foundational, 0.85);
//! store.insert_fact(&fact, None)?;
//! ```

pub mod schema;
pub mod store;
mod types;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::SqliteFactStore;
pub use types::{EvolvedRow, Fact, FactId, MemoryStats, PatternEntry, RegistryEntry, Tier};
