//! Ranked retrieval over generic facts and evolved relations.
//!
//! - [`Embedder`]: pluggable text to vector conversion
//! - [`VectorIndex`]: per-tier vector buffers with gravity-boosted search
//! - [`QueryRouter`]: indexed-first routing with scan fallback

pub mod embedding;
mod index;
mod router;

pub use embedding::{Embedder, HashEmbedder};
pub use index::{IndexedFact, ScoredFact, VectorIndex};
pub use router::{EntryOrigin, QueryEntry, QueryPath, QueryResult, QueryRouter};
