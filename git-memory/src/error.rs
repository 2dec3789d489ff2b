//! Error types for git-memory

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the note codec.
///
/// Every variant names the specific reason the text or identifier was
/// rejected. Callers treat these as recoverable: a bad note is skipped or
/// reported, it never aborts a capture/recall pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Input was empty or whitespace only
    #[error("Empty note text")]
    Empty,

    /// Text does not start with a `---` line, or the block is never closed
    #[error("Missing frontmatter: {0}")]
    MissingFrontmatter(&'static str),

    /// Frontmatter block is not valid YAML
    #[error("Invalid YAML in frontmatter: {0}")]
    InvalidYaml(String),

    /// A required frontmatter key is absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Timestamp could not be parsed as ISO-8601
    #[error("Invalid timestamp '{0}': expected ISO-8601 with 'Z' or an explicit offset")]
    InvalidTimestamp(String),

    /// A field is present but has the wrong shape or an unknown value
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Summary exceeds the maximum length
    #[error("Summary is {len} characters, exceeds the {max} character limit")]
    SummaryTooLong { len: usize, max: usize },

    /// Memory id does not match either the current or the legacy format
    #[error("invalid memory id: {0}")]
    InvalidMemoryId(String),
}

impl ParseError {
    pub(crate) fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur in the memory system
#[derive(Debug, Error)]
pub enum MemoryError {
    /// RocksDB error
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Note text or memory id could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Builder error
    #[error("Builder error: {0}")]
    Builder(#[from] crate::memory::MemoryBuilderError),

    /// Index is in an unusable state (unknown schema, inconsistent record)
    #[error("Index error: {0}")]
    Index(String),

    /// Model loading error
    #[error("Model error: {0}")]
    Model(String),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector does not have the system-wide embedding dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Memory not found
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// A note already exists for this commit and namespace
    #[error("Memory already captured for {namespace} on commit {commit}")]
    AlreadyCaptured { commit: String, namespace: String },

    /// Git binary could not be executed
    #[error("Git is not available on this system")]
    GitNotAvailable,

    /// Path is not inside a git repository
    #[error("Path is not a git repository: {0}")]
    NotARepository(PathBuf),

    /// Git command exited with a failure status
    #[error("Git command failed: {0}")]
    Git(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Command output was not UTF-8
    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl MemoryError {
    /// Create an index error
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a git command error
    pub fn git(msg: impl Into<String>) -> Self {
        Self::Git(msg.into())
    }

    /// True when the failure came from the durable note store
    pub fn is_git(&self) -> bool {
        matches!(
            self,
            Self::Git(_) | Self::GitNotAvailable | Self::NotARepository(_)
        )
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
