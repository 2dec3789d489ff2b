//! Embedding providers for semantic search
//!
//! The engine only needs [`EmbeddingProvider`]; callers inject whichever
//! backend they run. [`VectorEngine`] adds a text -> vector cache in front
//! of any provider. With the `fastembed` feature, [`FastEmbedProvider`]
//! runs all-MiniLM-L6-v2 locally.

mod discovery;
mod engine;
#[cfg(feature = "fastembed")]
mod fastembed;

pub use discovery::find_model_cache_dir;
pub use engine::VectorEngine;
#[cfg(feature = "fastembed")]
pub use self::fastembed::FastEmbedProvider;

use crate::error::Result;

/// Source of fixed-length embedding vectors.
///
/// Vectors are not guaranteed to be bit-stable across provider versions.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; backends that batch natively should override
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;
}
