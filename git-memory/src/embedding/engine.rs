//! Vector embedding engine
//!
//! Wraps any provider with a dimension check and a text -> vector cache.

use std::sync::Arc;

use dashmap::DashMap;

use super::EmbeddingProvider;
use crate::error::{MemoryError, Result};

/// Vector embedding engine with caching
///
/// The cache lives as long as the engine; build a fresh engine after
/// switching provider versions.
pub struct VectorEngine {
    provider: Arc<dyn EmbeddingProvider>,
    cache: DashMap<String, Vec<f32>>,
    dimension: usize,
}

impl VectorEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = provider.dimension();
        log::info!("VectorEngine ready ({}d)", dimension);

        Self {
            provider,
            cache: DashMap::new(),
            dimension,
        }
    }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Get cache size
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl EmbeddingProvider for VectorEngine {
    /// Generate embedding with caching
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.provider.embed(text)?;
        self.check(&embedding)?;
        self.cache.insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Batch embed with caching
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = texts
            .iter()
            .map(|text| self.cache.get(*text).map(|v| v.clone()))
            .collect();

        let uncached: Vec<(usize, &str)> = results
            .iter()
            .enumerate()
            .filter(|(_, cached)| cached.is_none())
            .map(|(i, _)| (i, texts[i]))
            .collect();

        if !uncached.is_empty() {
            let uncached_texts: Vec<&str> = uncached.iter().map(|(_, t)| *t).collect();
            let new_embeddings = self.provider.embed_batch(&uncached_texts)?;
            if new_embeddings.len() != uncached.len() {
                return Err(MemoryError::embedding(format!(
                    "provider returned {} vectors for {} texts",
                    new_embeddings.len(),
                    uncached.len()
                )));
            }

            for ((idx, text), emb) in uncached.iter().zip(new_embeddings) {
                self.check(&emb)?;
                self.cache.insert(text.to_string(), emb.clone());
                results[*idx] = Some(emb);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
