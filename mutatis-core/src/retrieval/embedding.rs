//! Text to vector conversion.
//!
//! [`Embedder`] is the seam a real embedding model plugs into. The bundled
//! [`HashEmbedder`] is deterministic and offline: each content word is hashed
//! into a signed bucket and the resulting bag of words is normalised to a unit
//! vector, so texts sharing words have a positive dot product.

use sha2::{Digest, Sha256};

use crate::classifier::normalize;
use crate::error::{Error, Result};

/// Words too common to say anything about a fact.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "has",
    "have", "i", "i'm", "in", "is", "it", "me", "my", "of", "on", "or", "our", "so", "that", "the",
    "this", "to", "was", "we", "what", "when", "where", "who", "with", "you", "your",
];

/// Produces fixed-length vectors for text.
pub trait Embedder {
    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic hashed bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::validation("embedding dimensions must be positive"));
        }
        Ok(Self { dimensions })
    }

    /// Bucket and sign for one token.
    fn project(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(head) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            let (bucket, sign) = self.project(&token);
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

/// Content words of `text`, normalised.
fn tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Check a vector against the expected length.
pub fn check_dimensions(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::embedding_dimension(expected, vector.len()));
    }
    Ok(())
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(256).unwrap();
        let a = embedder.embed("Sara loves hiking").unwrap();
        let b = embedder.embed("sara LOVES hiking").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        let norm = dot(&a, &a).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let embedder = HashEmbedder::new(512).unwrap();
        let query = embedder.embed("who is sara?").unwrap();
        let related = embedder.embed("My wife is Sara").unwrap();
        let unrelated = embedder.embed("The meeting ran long").unwrap();

        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn test_stopword_only_text_is_zero() {
        let embedder = HashEmbedder::new(64).unwrap();
        let vector = embedder.embed("who is it?").unwrap();
        assert!(vector.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_dimension_check() {
        assert!(check_dimensions(&[0.0; 4], 4).is_ok());
        assert!(matches!(
            check_dimensions(&[0.0; 3], 4),
            Err(Error::EmbeddingDimension { expected: 4, actual: 3 })
        ));
        assert!(HashEmbedder::new(0).is_err());
    }
}
