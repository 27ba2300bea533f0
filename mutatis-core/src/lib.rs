//! # mutatis-core
//!
//! An adaptive memory store: facts are tiered by durability, entities that
//! keep coming up are promoted into their own indexed relations, and retrieval
//! ranks durable facts above fleeting ones.
//!
//! ## Core Components
//!
//! - **Classifier**: tier assignment and per-entity confidence accumulation
//! - **Evolution**: shadow-table migration of an entity's records into an
//!   indexed relation, in one transaction
//! - **Retrieval**: indexed lookup first, gravity-boosted similarity scan after
//! - **Memory**: the SQLite store holding facts, tracker and registry
//!
//! ## Example
//!
//! ```rust,ignore
//! use mutatis_core::{AdaptiveMemory, MemoryConfig};
//!
//! let mut memory = AdaptiveMemory::in_memory(MemoryConfig::default())?;
//! memory.add("My wife is Sara")?;
//! memory.add("Sara is my wife")?;
//! let outcome = memory.add("My wife is Sara")?;
//! assert!(outcome.evolution.unwrap().triggered);
//!
//! let result = memory.query("who is sara?", 5)?;
//! assert!(result.path.is_indexed());
//! ```

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod evolution;
pub mod memory;
mod proptest;
pub mod retrieval;

// Re-exports for convenience
pub use classifier::{Classification, Classifier, PatternTracker, Reason, RuleBook};
pub use config::MemoryConfig;
pub use engine::{AddOutcome, AdaptiveMemory};
pub use error::{Error, Result};
pub use evolution::{
    EvolutionBudget, EvolutionEngine, EvolutionOutcome, EvolutionRequest, EvolutionSkip,
};
pub use memory::{Fact, FactId, MemoryStats, SqliteFactStore, Tier};
pub use retrieval::{
    Embedder, EntryOrigin, HashEmbedder, QueryEntry, QueryPath, QueryResult, VectorIndex,
};
