#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use git_memory::{
    CommitInfo, EmbeddingProvider, Memory, MemoryError, Namespace, NoteStore, Result, StoredNote,
};
use parking_lot::Mutex;

pub const DIM: usize = 32;

/// Deterministic, pairwise-distinct vector for item `i`
pub fn item_embedding(i: usize) -> Vec<f32> {
    (0..DIM)
        .map(|j| (((i + 1) * (j + 3)) as f32 * 0.37).sin())
        .collect()
}

pub fn sha(i: usize) -> String {
    format!("{:07x}{:033x}", i + 1, 0xdead_beef_u64)
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
}

pub fn memory(i: usize, namespace: Namespace, spec: Option<&str>) -> Memory {
    let mut builder = Memory::builder()
        .namespace(namespace)
        .commit(sha(i))
        .summary(format!("memory number {i}"))
        .content(format!("body of memory {i}"))
        .timestamp(base_time() + Duration::minutes(i as i64));
    if let Some(spec) = spec {
        builder = builder.spec(spec);
    }
    builder.build().unwrap()
}

/// Hashes text into a vector; equal texts embed identically
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MemoryError::embedding("provider offline"));
        }

        let mut bytes = [0u8; DIM];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);
        Ok(bytes.iter().map(|b| *b as f32 / 127.5 - 1.0).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// In-memory note store with switchable failures
#[derive(Default)]
pub struct FakeNoteStore {
    pub notes: Mutex<HashMap<(String, Namespace), String>>,
    pub files: Mutex<HashMap<String, Vec<(String, Option<String>)>>>,
    pub head: Mutex<Option<String>>,
    pub fail_notes: AtomicBool,
    pub fail_commits: AtomicBool,
    pub show_calls: AtomicUsize,
    pub commit_info_calls: AtomicUsize,
}

impl FakeNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_note(&self, commit: &str, namespace: Namespace, text: &str) {
        self.notes
            .lock()
            .insert((commit.to_string(), namespace), text.to_string());
    }

    pub fn put_files(&self, commit: &str, files: Vec<(&str, Option<&str>)>) {
        self.files.lock().insert(
            commit.to_string(),
            files
                .into_iter()
                .map(|(p, c)| (p.to_string(), c.map(str::to_string)))
                .collect(),
        );
    }

    pub fn set_head(&self, commit: &str) {
        *self.head.lock() = Some(commit.to_string());
    }
}

impl NoteStore for FakeNoteStore {
    fn show_note(&self, commit: &str, namespace: Namespace) -> Result<Option<String>> {
        self.show_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_notes.load(Ordering::SeqCst) {
            return Err(MemoryError::git("notes unavailable"));
        }
        Ok(self
            .notes
            .lock()
            .get(&(commit.to_string(), namespace))
            .cloned())
    }

    fn get_commit_info(&self, commit: &str) -> Result<CommitInfo> {
        self.commit_info_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(MemoryError::git("commit unavailable"));
        }
        Ok(CommitInfo {
            sha: commit.to_string(),
            author_name: "Dev".to_string(),
            author_email: "dev@example.com".to_string(),
            date: "2024-01-15T10:30:00+00:00".to_string(),
            message: "Commit message".to_string(),
        })
    }

    fn get_changed_files(&self, commit: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .lock()
            .get(commit)
            .map(|files| files.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default())
    }

    fn get_file_at_commit(&self, commit: &str, path: &str) -> Result<Option<String>> {
        Ok(self.files.lock().get(commit).and_then(|files| {
            files
                .iter()
                .find(|(p, _)| p == path)
                .and_then(|(_, c)| c.clone())
        }))
    }

    fn list_notes(&self, namespace: Namespace) -> Result<Vec<StoredNote>> {
        let mut notes: Vec<StoredNote> = self
            .notes
            .lock()
            .iter()
            .filter(|((_, ns), _)| *ns == namespace)
            .map(|((commit, _), text)| StoredNote {
                commit_sha: commit.clone(),
                text: text.clone(),
            })
            .collect();
        notes.sort_by(|a, b| a.commit_sha.cmp(&b.commit_sha));
        Ok(notes)
    }

    fn add_note(&self, commit: &str, namespace: Namespace, text: &str) -> Result<()> {
        let mut notes = self.notes.lock();
        let key = (commit.to_string(), namespace);
        if notes.contains_key(&key) {
            return Err(MemoryError::AlreadyCaptured {
                commit: commit.to_string(),
                namespace: namespace.to_string(),
            });
        }
        notes.insert(key, text.to_string());
        Ok(())
    }

    fn resolve_commit(&self, rev: &str) -> Result<String> {
        if rev == "HEAD" {
            return self
                .head
                .lock()
                .clone()
                .ok_or_else(|| MemoryError::git("no HEAD"));
        }
        Ok(rev.to_string())
    }
}
