//! Index rebuild and verification
//!
//! The note store is authoritative; this rebuilds the index from it after
//! corruption, a schema change or an embedding model switch.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::codec;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::git::NoteStore;
use crate::memory::{Memory, Namespace, VerificationResult};
use crate::storage::IndexStore;

/// Notes embedded and written per batch
const REINDEX_BATCH_SIZE: usize = 64;

/// Counts from a full rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub indexed: usize,
    /// Notes that failed to parse
    pub skipped: usize,
}

pub struct SyncService {
    index: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn NoteStore>,
}

impl SyncService {
    pub fn new(
        index: Arc<IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn NoteStore>,
    ) -> Self {
        Self {
            index,
            embedder,
            store,
        }
    }

    /// Clear the index and rebuild it from every namespace's notes
    pub fn reindex(&self) -> Result<ReindexReport> {
        let start = Instant::now();
        log::info!("Rebuilding index at {}", self.index.path().display());

        self.index.clear()?;

        let mut report = ReindexReport::default();
        for namespace in Namespace::ALL {
            let memories = self.load_namespace(namespace, &mut report.skipped)?;
            for chunk in memories.chunks(REINDEX_BATCH_SIZE) {
                self.index_chunk(chunk)?;
                report.indexed += chunk.len();
            }
        }

        self.index.mark_synced(Utc::now())?;
        log::info!(
            "Rebuilt index: {} indexed, {} skipped in {:?}",
            report.indexed,
            report.skipped,
            start.elapsed()
        );
        Ok(report)
    }

    fn load_namespace(&self, namespace: Namespace, skipped: &mut usize) -> Result<Vec<Memory>> {
        let mut memories = Vec::new();
        for note in self.store.list_notes(namespace)? {
            match codec::parse(&note.text) {
                Ok((metadata, body)) => {
                    memories.push(metadata.into_memory(note.commit_sha, body));
                }
                Err(e) => {
                    log::warn!(
                        "Skipping {} note on {}: {}",
                        namespace,
                        note.commit_sha,
                        e
                    );
                    *skipped += 1;
                }
            }
        }
        Ok(memories)
    }

    fn index_chunk(&self, chunk: &[Memory]) -> Result<()> {
        let texts: Vec<String> = chunk.iter().map(Memory::searchable_text).collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self.embedder.embed_batch(&text_refs)?;
        if embeddings.len() != chunk.len() {
            return Err(MemoryError::embedding(format!(
                "expected {} embeddings, got {}",
                chunk.len(),
                embeddings.len()
            )));
        }

        let items: Vec<(Memory, Vec<f32>)> = chunk.iter().cloned().zip(embeddings).collect();
        self.index.insert_batch(&items)
    }

    /// Report divergence between the index and the note store
    pub fn verify(&self) -> Result<VerificationResult> {
        self.index.verify(self.store.as_ref())
    }
}
