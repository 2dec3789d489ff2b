//! Recall façade
//!
//! Read path over the index: semantic search, progressive hydration from
//! the note store, spec context, recency and commit lookups.
//!
//! Hydration degrades instead of failing. When the note store errors at
//! FULL or FILES, the result keeps every level already fetched and
//! [`HydratedMemory::level`] records how far it got.
//!
//! `similar` reuses the embedding stored in the index for the input memory
//! and only re-embeds memories the index does not know.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MemoryConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::git::NoteStore;
use crate::memory::{HydratedMemory, HydrationLevel, Memory, MemoryResult, Namespace, SpecContext};
use crate::search::{cache_scope, RankedResult, SearchOptimizer};
use crate::storage::{IndexStore, SearchFilters};

/// Optional scope for recall queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecallFilter {
    pub spec: Option<String>,
    pub namespace: Option<Namespace>,
}

impl RecallFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    fn to_search_filters(&self) -> SearchFilters {
        SearchFilters {
            namespace: self.namespace,
            spec: self.spec.clone(),
            commit_sha: None,
        }
    }
}

/// Read-side entry point for consumers
pub struct RecallService {
    index: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn NoteStore>,
    config: MemoryConfig,
    optimizer: Option<SearchOptimizer>,
}

impl RecallService {
    pub fn new(
        index: Arc<IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn NoteStore>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            store,
            config,
            optimizer: None,
        }
    }

    /// Enable expansion, caching and reranking for [`Self::search_optimized`]
    pub fn with_optimizer(mut self, optimizer: SearchOptimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn optimizer(&self) -> Option<&SearchOptimizer> {
        self.optimizer.as_ref()
    }

    pub fn index(&self) -> &Arc<IndexStore> {
        &self.index
    }

    /// Semantic search, ascending by distance
    pub fn search(
        &self,
        query: &str,
        filter: &RecallFilter,
        limit: usize,
    ) -> Result<Vec<MemoryResult>> {
        let start = Instant::now();
        let limit = self.config.clamp_limit(limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query)?;
        let hits = self
            .index
            .search_vector(&embedding, &filter.to_search_filters(), limit)?;
        let results = self.resolve(hits)?;

        over_budget("search", start, self.config.search_budget);
        Ok(results)
    }

    /// Look up hit ids, dropping any the index can no longer resolve
    fn resolve(&self, hits: Vec<(String, f32)>) -> Result<Vec<MemoryResult>> {
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        let memories = self.index.get_batch(&ids)?;

        let mut dropped = 0;
        let results: Vec<MemoryResult> = hits
            .iter()
            .zip(memories)
            .filter_map(|((_, distance), memory)| match memory {
                Some(memory) => Some(MemoryResult::new(memory, *distance)),
                None => {
                    dropped += 1;
                    None
                }
            })
            .collect();

        if dropped > 0 {
            log::warn!("Dropped {} search hits missing from the index", dropped);
        }
        Ok(results)
    }

    /// Enrich a result up to `level`, each level adding to the previous.
    ///
    /// Note store failures stop hydration at the last level reached.
    pub fn hydrate(&self, result: MemoryResult, level: HydrationLevel) -> HydratedMemory {
        let start = Instant::now();
        let mut hydrated = HydratedMemory::summary(result);

        while let Some(next) = hydrated.level.next().filter(|next| *next <= level) {
            if let Err(e) = self.hydrate_step(&mut hydrated, next) {
                log::warn!(
                    "Hydration of {} stopped at {:?}: {}",
                    hydrated.memory().id,
                    hydrated.level,
                    e
                );
                break;
            }
            hydrated.level = next;
        }

        over_budget("hydrate", start, self.config.hydrate_budget);
        hydrated
    }

    /// Fetch only what `level` adds over the level below it
    fn hydrate_step(&self, hydrated: &mut HydratedMemory, level: HydrationLevel) -> Result<()> {
        let memory = &hydrated.result.memory;

        match level {
            HydrationLevel::Summary => Ok(()),
            HydrationLevel::Full => {
                let text = self
                    .store
                    .show_note(&memory.commit_sha, memory.namespace)?
                    .ok_or_else(|| {
                        MemoryError::not_found(format!(
                            "{} note on {}",
                            memory.namespace, memory.commit_sha
                        ))
                    })?;
                hydrated.full_content = Some(text);
                Ok(())
            }
            HydrationLevel::Files => {
                let commit_info = self.store.get_commit_info(&memory.commit_sha)?;

                let mut files = BTreeMap::new();
                for path in self.store.get_changed_files(&memory.commit_sha)? {
                    if let Some(content) =
                        self.store.get_file_at_commit(&memory.commit_sha, &path)?
                    {
                        files.insert(path, content);
                    }
                }

                hydrated.commit_info = Some(commit_info);
                hydrated.files = files;
                Ok(())
            }
        }
    }

    /// Everything recorded for a spec
    pub fn context(&self, spec: &str) -> Result<SpecContext> {
        let start = Instant::now();
        let context = SpecContext::new(spec, self.index.get_by_spec(spec)?);
        over_budget("context", start, self.config.context_budget);
        Ok(context)
    }

    /// Newest memories first
    pub fn recent(&self, filter: &RecallFilter, limit: usize) -> Result<Vec<Memory>> {
        self.index
            .list_recent(filter.spec.as_deref(), filter.namespace, limit)
    }

    /// Memories near `memory`, never including `memory` itself
    pub fn similar(&self, memory: &Memory, limit: usize) -> Result<Vec<MemoryResult>> {
        let start = Instant::now();
        let limit = self.config.clamp_limit(limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let id = memory.id.to_string();
        let embedding = match self.index.get_embedding(&id) {
            Some(embedding) => embedding,
            None => self.embedder.embed(&memory.searchable_text())?,
        };

        let hits = self.index.search_vector_excluding(
            &embedding,
            &SearchFilters::default(),
            &id,
            limit,
        )?;

        let results = self.resolve(hits)?;
        over_budget("similar", start, self.config.search_budget);
        Ok(results)
    }

    pub fn by_commit(&self, commit_sha: &str) -> Result<Vec<Memory>> {
        self.index.get_by_commit(commit_sha)
    }

    /// Search with query expansion, result caching and reranking.
    ///
    /// Falls back to [`Self::search`] ordering when no optimizer is set.
    pub fn search_optimized(
        &self,
        query: &str,
        filter: &RecallFilter,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let Some(optimizer) = &self.optimizer else {
            return Ok(self
                .search(query, filter, limit)?
                .into_iter()
                .map(|result| result.memory)
                .collect());
        };

        let expanded = optimizer.expand_query(query);
        let key = format!(
            "{}/{}/{}",
            expanded.scoped_cache_key(filter.spec.as_deref()),
            filter.namespace.map_or("*", |ns| ns.as_str()),
            limit
        );

        if let Some(cached) = optimizer.get_cached(&key) {
            return Ok(cached);
        }

        let results = self.search(&expanded.expanded_text(), filter, limit)?;
        let ranked: Vec<RankedResult> =
            optimizer.rerank(results, query, filter.spec.as_deref(), &[]);
        let memories: Vec<Memory> = ranked.into_iter().map(|r| r.result.memory).collect();

        optimizer.cache_results(key, memories.clone());
        Ok(memories)
    }

    /// Drop cached optimized results for a spec, or all of them
    pub fn invalidate_cache(&self, spec: Option<&str>) -> usize {
        let Some(optimizer) = &self.optimizer else {
            return 0;
        };
        match spec {
            Some(spec) => optimizer.invalidate_cache(Some(&cache_scope(Some(spec)))),
            None => optimizer.invalidate_cache(None),
        }
    }
}

/// Log a soft latency budget overrun; the operation is never aborted
pub(crate) fn over_budget(operation: &str, start: Instant, budget: Duration) {
    let elapsed = start.elapsed();
    if elapsed > budget {
        log::warn!(
            "{} took {:?}, over its {:?} budget",
            operation,
            elapsed,
            budget
        );
    }
}
