//! Test utilities - deterministic embedder and fixture helpers
//!
//! Kept in the library (not `tests/`) so both unit tests and downstream
//! crates can embed text without a real model.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// Deterministic embedder for tests that don't need real ML.
/// Produces hash-seeded vectors of a configurable dimension in range [-1, 1].
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Default test dimension, small enough to keep fixtures fast.
    pub fn new() -> Self {
        Self::with_dimension(8)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Generate a deterministic "embedding" from text using hashing.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        (0..self.dimension)
            .map(|i| {
                // Seed + index gives pseudo-random but reproducible values.
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                let normalized = (x as f32) / (u64::MAX as f32);
                (normalized * 2.0) - 1.0
            })
            .collect()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_embedding_is_deterministic() {
        let embedder = MockEmbedder::new();
        let emb1 = embedder.embed_text("hello world");
        let emb2 = embedder.embed_text("hello world");
        assert_eq!(emb1, emb2);
    }

    #[test]
    fn mock_embedding_has_configured_dimensions() {
        let embedder = MockEmbedder::with_dimension(384);
        assert_eq!(embedder.dimension(), 384);
        assert_eq!(embedder.embed_text("test").len(), 384);
    }

    #[test]
    fn mock_embedding_values_in_range() {
        let embedder = MockEmbedder::new();
        for val in embedder.embed_text("test input") {
            assert!((-1.0..=1.0).contains(&val), "Value {} out of range", val);
        }
    }

    #[test]
    fn mock_embedding_different_for_different_inputs() {
        let embedder = MockEmbedder::new();
        assert_ne!(embedder.embed_text("hello"), embedder.embed_text("world"));
    }
}
