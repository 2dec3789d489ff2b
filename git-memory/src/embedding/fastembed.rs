//! fastembed backend
//!
//! Local ONNX sentence embeddings. Models download into the cache
//! directory on first use.

use std::path::PathBuf;

use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{find_model_cache_dir, EmbeddingProvider};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};

/// fastembed text embedding model wrapper
pub struct FastEmbedProvider {
    model: TextEmbedding,
    model_name: EmbeddingModel,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Load `model_name` using `cache_dir` for model files
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self> {
        let (model_name, dimension) = resolve_model(model_name)?;

        log::info!(
            "Loading embedding model {:?} from {}",
            model_name,
            cache_dir.display()
        );

        let options = InitOptions::new(model_name.clone())
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| MemoryError::model(format!("Failed to load {model_name:?}: {e}")))?;

        log::info!("Loaded embedding model ({}d)", dimension);

        Ok(Self {
            model,
            model_name,
            dimension,
        })
    }

    /// Load the configured model, checking it matches the configured dimension
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        let cache_dir =
            find_model_cache_dir(config.model_cache_dir.as_deref(), Some(&config.index_path))?;
        let provider = Self::new(&config.embedding_model, cache_dir)?;

        if provider.dimension != config.embedding_dimension {
            return Err(MemoryError::model(format!(
                "Dimension mismatch: model '{}' produces {}-dim vectors but config specifies {}",
                config.embedding_model, provider.dimension, config.embedding_dimension
            )));
        }
        Ok(provider)
    }

    pub fn model_name(&self) -> &EmbeddingModel {
        &self.model_name
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.model
            .embed(vec![text], None)
            .map_err(|e| MemoryError::embedding(format!("Failed to encode text: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::embedding("Empty embedding result"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| MemoryError::embedding(format!("Failed to encode texts: {e}")))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    let resolved = match name {
        "all-MiniLM-L6-v2" | "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "all-MiniLM-L12-v2" | "AllMiniLML12V2" => (EmbeddingModel::AllMiniLML12V2, 384),
        "bge-small-en-v1.5" | "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en-v1.5" | "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
        "nomic-embed-text-v1.5" | "NomicEmbedTextV15" => (EmbeddingModel::NomicEmbedTextV15, 768),
        _ => {
            return Err(MemoryError::model(format!(
                "Unknown embedding model: '{name}'. Supported models: all-MiniLM-L6-v2, \
                 all-MiniLM-L12-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5"
            )))
        }
    };
    Ok(resolved)
}
