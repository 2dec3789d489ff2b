//! Runtime configuration
//!
//! Defaults suit a single local repository. `from_env` applies
//! `GIT_MEMORY_*` overrides; malformed values are logged and ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::temporal::DEFAULT_HALF_LIFE_DAYS;

/// Hard upper bound on results from any recall or vector search
pub const MAX_RECALL_LIMIT: usize = 100;

/// Dimension of all-MiniLM-L6-v2 embeddings
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Default embedding model name
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// Memory engine configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Repository holding the notes refs
    pub repo_path: PathBuf,
    /// Index directory (defaults to `<repo>/.git/git-memory/index`)
    pub index_path: PathBuf,
    pub embedding_model: String,
    /// System-wide embedding dimension
    pub embedding_dimension: usize,
    /// Upper bound applied to every `limit` argument
    pub max_recall_limit: usize,
    pub default_recall_limit: usize,
    pub half_life_days: f64,
    pub min_decay: Option<f64>,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    /// Soft latency budgets; overruns are logged, never enforced
    pub search_budget: Duration,
    pub hydrate_budget: Duration,
    pub context_budget: Duration,
    /// How long opening the index waits for another process to release it
    pub lock_timeout: Duration,
    /// Override for the embedding model cache directory
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let repo_path = PathBuf::from(".");
        Self {
            index_path: default_index_path(&repo_path),
            repo_path,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            max_recall_limit: MAX_RECALL_LIMIT,
            default_recall_limit: 10,
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
            min_decay: None,
            cache_max_size: 256,
            cache_ttl: Duration::from_secs(300),
            search_budget: Duration::from_millis(100),
            hydrate_budget: Duration::from_millis(200),
            context_budget: Duration::from_millis(500),
            lock_timeout: Duration::from_secs(2),
            model_cache_dir: None,
        }
    }
}

impl MemoryConfig {
    /// Configuration for a repository at `repo_path`
    pub fn for_repo(repo_path: impl Into<PathBuf>) -> Self {
        let repo_path = repo_path.into();
        Self {
            index_path: default_index_path(&repo_path),
            repo_path,
            ..Self::default()
        }
    }

    /// Defaults with `GIT_MEMORY_*` environment overrides applied
    pub fn from_env() -> Self {
        let mut config = match std::env::var_os("GIT_MEMORY_REPO") {
            Some(repo) => Self::for_repo(repo),
            None => Self::default(),
        };

        if let Some(path) = std::env::var_os("GIT_MEMORY_INDEX_PATH") {
            config.index_path = PathBuf::from(path);
        }
        if let Ok(model) = std::env::var("GIT_MEMORY_MODEL") {
            config.embedding_model = model;
        }
        if let Some(dim) = env_parse("GIT_MEMORY_EMBEDDING_DIM") {
            config.embedding_dimension = dim;
        }
        if let Some(limit) = env_parse::<usize>("GIT_MEMORY_MAX_LIMIT") {
            config.max_recall_limit = limit.clamp(1, MAX_RECALL_LIMIT);
        }
        if let Some(days) = env_parse("GIT_MEMORY_HALF_LIFE_DAYS") {
            config.half_life_days = days;
        }
        if let Some(secs) = env_parse("GIT_MEMORY_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse("GIT_MEMORY_CACHE_SIZE") {
            config.cache_max_size = size;
        }
        if let Some(ms) = env_parse("GIT_MEMORY_LOCK_TIMEOUT_MS") {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(dir) = std::env::var_os("GIT_MEMORY_MODEL_CACHE") {
            config.model_cache_dir = Some(PathBuf::from(dir));
        }

        config
    }

    /// Clamp a caller-supplied limit to `max_recall_limit`
    pub fn clamp_limit(&self, limit: usize) -> usize {
        limit.min(self.max_recall_limit)
    }
}

fn default_index_path(repo_path: &std::path::Path) -> PathBuf {
    repo_path.join(".git").join("git-memory").join("index")
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}
