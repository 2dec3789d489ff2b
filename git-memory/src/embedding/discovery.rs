//! Model cache discovery
//!
//! Finds where embedding model files live (or should be downloaded to).

use std::path::{Path, PathBuf};

use crate::error::{MemoryError, Result};

/// Find the embedding model cache directory with priority:
/// 1. GIT_MEMORY_MODEL_CACHE environment variable
/// 2. Explicitly configured directory
/// 3. `models/` next to the index directory, if it already exists
/// 4. User cache directory (~/.cache/git-memory/models)
pub fn find_model_cache_dir(
    configured: Option<&Path>,
    index_path: Option<&Path>,
) -> Result<PathBuf> {
    // Priority 1: environment override
    if let Some(dir) = std::env::var_os("GIT_MEMORY_MODEL_CACHE") {
        let path = PathBuf::from(dir);
        log::info!("Using GIT_MEMORY_MODEL_CACHE: {}", path.display());
        return Ok(path);
    }

    // Priority 2: configuration
    if let Some(dir) = configured {
        log::info!("Using configured model cache: {}", dir.display());
        return Ok(dir.to_path_buf());
    }

    // Priority 3: alongside the index
    if let Some(models) = index_path.and_then(Path::parent).map(|p| p.join("models")) {
        if models.is_dir() {
            log::info!("Using model cache next to index: {}", models.display());
            return Ok(models);
        }
    }

    // Priority 4: user cache directory
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let user_path = PathBuf::from(home)
            .join(".cache")
            .join("git-memory")
            .join("models");
        log::info!("Using user model cache: {}", user_path.display());
        return Ok(user_path);
    }

    Err(MemoryError::model(
        "No model cache directory found. Checked:\n\
         - GIT_MEMORY_MODEL_CACHE environment variable\n\
         - configured model_cache_dir\n\
         - models/ next to the index directory\n\
         - ~/.cache/git-memory/models",
    ))
}
