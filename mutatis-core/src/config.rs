//! Store configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default width of the hashed embedding vectors.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Configuration for an [`AdaptiveMemory`](crate::AdaptiveMemory) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Length of every vector held by the scan index
    pub embedding_dimensions: usize,
    /// Maximum schema evolutions per session
    pub session_evolution_cap: u32,
    /// Maximum rows presented from an evolved relation per query
    pub indexed_result_limit: usize,
    /// Longest entity string the classifier will track
    pub max_entity_len: usize,
    /// Append new mentions of an evolved entity to its relation
    pub route_new_facts: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            session_evolution_cap: 3,
            indexed_result_limit: 3,
            max_entity_len: 64,
            route_new_facts: true,
        }
    }
}

impl MemoryConfig {
    /// Small vectors, for tests and constrained hosts.
    pub fn compact() -> Self {
        Self {
            embedding_dimensions: 256,
            ..Self::default()
        }
    }

    /// Override the embedding width.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.embedding_dimensions = dimensions;
        self
    }

    /// Override the per-session evolution cap.
    pub fn with_session_cap(mut self, cap: u32) -> Self {
        self.session_evolution_cap = cap;
        self
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimensions == 0 {
            return Err(Error::validation("embedding_dimensions must be positive"));
        }
        if self.indexed_result_limit == 0 {
            return Err(Error::validation("indexed_result_limit must be positive"));
        }
        if self.max_entity_len == 0 {
            return Err(Error::validation("max_entity_len must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = MemoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session_evolution_cap, 3);
        assert_eq!(config.embedding_dimensions, 1536);
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let config = MemoryConfig::default().with_dimensions(0);
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{"session_evolution_cap": 5}"#).unwrap();
        assert_eq!(config.session_evolution_cap, 5);
        assert_eq!(config.indexed_result_limit, 3);
        assert!(config.route_new_facts);
    }
}
