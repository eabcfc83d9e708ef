//! Embedding provider abstraction
//!
//! The service stores and searches vectors; producing them is delegated to
//! whatever model the caller wires in. Implementations must report a fixed
//! dimension, since each namespace locks its dimensionality on first write.

use async_trait::async_trait;

use crate::error::Result;

/// Converts text into fixed-dimension embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text into a vector of exactly `dimension()` floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The dimensionality of every vector this provider produces.
    fn dimension(&self) -> usize;
}
