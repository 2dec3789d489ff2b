//! Capture service
//!
//! Write path: format a note, attach it to a commit in the note store,
//! then mirror it into the index. The note store write is the one that
//! counts; index failures are reported, not raised, since a reindex
//! repairs them.

use std::sync::Arc;

use chrono::Utc;

use crate::codec::{self, NoteMetadata};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::git::NoteStore;
use crate::memory::{Memory, Namespace};
use crate::storage::IndexStore;

/// A memory to record
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub namespace: Namespace,
    pub summary: String,
    pub content: String,
    pub spec: Option<String>,
    pub phase: Option<String>,
    pub tags: Vec<String>,
    pub status: Option<String>,
    pub relates_to: Vec<String>,
    /// Revision to attach to; `HEAD` when absent
    pub commit: Option<String>,
}

impl CaptureRequest {
    pub fn new(namespace: Namespace, summary: impl Into<String>) -> Self {
        Self {
            namespace,
            summary: summary.into(),
            content: String::new(),
            spec: None,
            phase: None,
            tags: Vec::new(),
            status: None,
            relates_to: Vec::new(),
            commit: None,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn relates_to(mut self, id: impl Into<String>) -> Self {
        self.relates_to.push(id.into());
        self
    }

    pub fn commit(mut self, rev: impl Into<String>) -> Self {
        self.commit = Some(rev.into());
        self
    }
}

/// Outcome of a capture whose note was written
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub memory: Memory,
    /// False when the note was written but the index was not updated
    pub indexed: bool,
    /// Soft validation findings and index failures
    pub warnings: Vec<String>,
}

pub struct CaptureService {
    index: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn NoteStore>,
}

impl CaptureService {
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

    /// Record a memory.
    ///
    /// Fails on format errors (e.g. an over-long summary), an unknown
    /// revision, or an existing note for the commit and namespace.
    pub fn capture(&self, request: CaptureRequest) -> Result<CaptureResult> {
        let commit = self
            .store
            .resolve_commit(request.commit.as_deref().unwrap_or("HEAD"))?;

        let metadata = NoteMetadata {
            namespace: request.namespace,
            spec: request.spec,
            phase: request.phase,
            timestamp: Utc::now(),
            summary: request.summary,
            tags: request.tags,
            status: request.status,
            relates_to: request.relates_to,
        };
        let text = codec::format(&metadata, &request.content)?;
        let mut warnings = codec::validate(&text);

        self.store.add_note(&commit, metadata.namespace, &text)?;

        // Index exactly what a reindex would read back
        let (stored, body) = codec::parse(&text)?;
        let memory = stored.into_memory(commit, body);
        log::info!("Captured {}", memory.id);

        let indexed = match self.index_memory(&memory) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Captured {} but indexing failed: {}", memory.id, e);
                warnings.push(format!("not indexed: {e}"));
                false
            }
        };

        Ok(CaptureResult {
            memory,
            indexed,
            warnings,
        })
    }

    fn index_memory(&self, memory: &Memory) -> Result<()> {
        let embedding = self.embedder.embed(&memory.searchable_text())?;
        self.index.insert(memory, &embedding)
    }
}
