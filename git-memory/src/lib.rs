//! Git Memory
//!
//! Long-term memory for coding assistants. Memories are short structured
//! notes attached to commits as git notes; a local RocksDB index mirrors
//! them with embeddings for fast semantic recall.
//!
//! ## Features
//!
//! - **Durable notes** - One note per commit and namespace under `refs/notes/mem/*`
//! - **Semantic recall** - Cosine search with an HNSW graph for large indexes
//! - **Progressive hydration** - Summary, then raw note, then commit files
//! - **Search optimization** - Query expansion, result cache, recency-aware reranking
//! - **Rebuildable index** - Verify against notes, reindex on corruption
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use git_memory::{
//!     CaptureRequest, CaptureService, GitNoteStore, IndexStore, MemoryConfig, Namespace,
//!     RecallFilter, RecallService,
//! };
//!
//! let config = MemoryConfig::for_repo(".");
//! let index = Arc::new(IndexStore::open_with_config(&config)?);
//! let store = Arc::new(GitNoteStore::new(&config.repo_path)?);
//! let embedder = Arc::new(my_provider); // any EmbeddingProvider
//!
//! let capture = CaptureService::new(index.clone(), embedder.clone(), store.clone());
//! capture.capture(
//!     CaptureRequest::new(Namespace::Decisions, "Use RocksDB for the index")
//!         .spec("memory-engine")
//!         .content("Embedded, LZ4 compressed, prefix iteration."),
//! )?;
//!
//! let recall = RecallService::new(index, embedder, store, config);
//! let results = recall.search("why rocksdb", &RecallFilter::new(), 5)?;
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod embedding;
pub mod error;
pub mod git;
pub mod memory;
pub mod migration;
pub mod recall;
pub mod search;
pub mod storage;
pub mod sync;
pub mod temporal;

// Re-exports for convenience
pub use capture::{CaptureRequest, CaptureResult, CaptureService};
pub use codec::NoteMetadata;
pub use config::MemoryConfig;
pub use embedding::{EmbeddingProvider, VectorEngine};
pub use error::{MemoryError, ParseError, Result};
pub use git::{GitNoteStore, NoteStore, StoredNote};
pub use memory::{
    CommitInfo, HydratedMemory, HydrationLevel, IndexStats, Memory, MemoryBuilder, MemoryId,
    MemoryResult, Namespace, SpecContext, VerificationResult,
};
pub use recall::{RecallFilter, RecallService};
pub use search::{
    QueryExpander, RankFactors, RankedResult, ResultReranker, SearchCache, SearchOptimizer,
    SearchQuery,
};
pub use storage::{IndexStore, SearchFilters};
pub use sync::{ReindexReport, SyncService};
pub use temporal::{decay, TemporalDecay};

#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedProvider;
