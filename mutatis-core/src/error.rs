//! Error types for mutatis-core.

use thiserror::Error;

/// Result type alias using mutatis-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Input rejected before any work was done
    #[error("Validation error: {0}")]
    Validation(String),

    /// Underlying relation unavailable or corrupt
    #[error("Storage error: {0}")]
    Storage(String),

    /// Schema evolution failed mid-migration and was rolled back
    #[error("Evolution of {pattern_type}/{entity} failed: {source}")]
    EvolutionFailure {
        pattern_type: String,
        entity: String,
        #[source]
        source: Box<Error>,
    },

    /// Embedder returned a vector of the wrong length
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimension { expected: usize, actual: usize },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap a storage-layer failure.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Create an evolution failure carrying its cause.
    pub fn evolution_failure(
        pattern_type: impl Into<String>,
        entity: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::EvolutionFailure {
            pattern_type: pattern_type.into(),
            entity: entity.into(),
            source: Box::new(source),
        }
    }

    /// Create an embedding dimension mismatch error.
    pub fn embedding_dimension(expected: usize, actual: usize) -> Self {
        Self::EmbeddingDimension { expected, actual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_evolution_failure_keeps_cause() {
        let err = Error::evolution_failure(
            "family_spouse",
            "sara",
            Error::storage("no such table: generic_memories"),
        );

        let message = err.to_string();
        assert!(message.contains("family_spouse/sara"));
        assert!(message.contains("no such table"));
        assert!(err.source().is_some());
    }
}
