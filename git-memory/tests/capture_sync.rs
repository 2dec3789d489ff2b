mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{memory, sha, FakeNoteStore, HashEmbedder, DIM};
use git_memory::codec;
use git_memory::{
    CaptureRequest, CaptureService, IndexStore, MemoryError, Namespace, ParseError, SyncService,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    index: Arc<IndexStore>,
    embedder: Arc<HashEmbedder>,
    notes: Arc<FakeNoteStore>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let index = Arc::new(IndexStore::open(dir.path().join("index"), DIM).unwrap());
    let notes = Arc::new(FakeNoteStore::new());
    notes.set_head(&sha(0));
    Fixture {
        _dir: dir,
        index,
        embedder: Arc::new(HashEmbedder::new()),
        notes,
    }
}

impl Fixture {
    fn capture(&self) -> CaptureService {
        CaptureService::new(self.index.clone(), self.embedder.clone(), self.notes.clone())
    }

    fn sync(&self) -> SyncService {
        SyncService::new(self.index.clone(), self.embedder.clone(), self.notes.clone())
    }
}

#[test]
fn capture_writes_note_and_index() {
    let f = fixture();
    let result = f
        .capture()
        .capture(
            CaptureRequest::new(Namespace::Decisions, "Use RocksDB for the index")
                .spec("memory-engine")
                .tag("storage")
                .content("Embedded and fast.\n"),
        )
        .unwrap();

    assert!(result.indexed);
    assert!(result.warnings.is_empty());
    assert_eq!(result.memory.commit_sha, sha(0));
    assert_eq!(result.memory.content, "Embedded and fast.");

    let text = f.notes.notes.lock()[&(sha(0), Namespace::Decisions)].clone();
    let (metadata, body) = codec::parse(&text).unwrap();
    assert_eq!(metadata.summary, "Use RocksDB for the index");
    assert_eq!(metadata.tags, vec!["storage"]);
    assert_eq!(body, "Embedded and fast.");

    let indexed = f.index.get(&result.memory.id.to_string()).unwrap();
    assert_eq!(indexed, Some(result.memory));
    assert!(f.sync().verify().unwrap().is_consistent);
}

#[test]
fn capture_refuses_duplicate() {
    let f = fixture();
    let capture = f.capture();
    capture
        .capture(CaptureRequest::new(Namespace::Blockers, "first").commit(sha(1)))
        .unwrap();

    let err = capture
        .capture(CaptureRequest::new(Namespace::Blockers, "second").commit(sha(1)))
        .unwrap_err();
    assert!(matches!(err, MemoryError::AlreadyCaptured { .. }));

    // Another namespace on the same commit is fine
    capture
        .capture(CaptureRequest::new(Namespace::Learnings, "third").commit(sha(1)))
        .unwrap();
}

#[test]
fn capture_rejects_long_summary_before_writing() {
    let f = fixture();
    let err = f
        .capture()
        .capture(CaptureRequest::new(Namespace::Decisions, "x".repeat(150)))
        .unwrap_err();

    assert!(matches!(
        err,
        MemoryError::Parse(ParseError::SummaryTooLong { len: 150, max: 100 })
    ));
    assert!(f.notes.notes.lock().is_empty());
}

#[test]
fn capture_survives_embedding_failure() {
    let f = fixture();
    f.embedder.fail.store(true, Ordering::SeqCst);

    let result = f
        .capture()
        .capture(CaptureRequest::new(Namespace::Progress, "halfway").spec("billing"))
        .unwrap();

    assert!(!result.indexed);
    assert!(result.warnings.iter().any(|w| w.starts_with("not indexed")));
    assert_eq!(f.notes.notes.lock().len(), 1);
    assert!(f.index.is_empty());

    let report = f.sync().verify().unwrap();
    assert!(report
        .missing_in_index
        .contains(&result.memory.id.to_string()));
}

#[test]
fn reindex_rebuilds_from_notes() {
    let f = fixture();
    for i in 0..10 {
        let ns = Namespace::ALL[i % Namespace::ALL.len()];
        let m = memory(i, ns, Some("billing"));
        f.notes
            .put_note(&m.commit_sha, m.namespace, &codec::format_memory(&m).unwrap());
    }
    f.notes
        .put_note(&sha(42), Namespace::Reviews, "---\nsummary: no type\n---\n");

    // Stale entry that is not backed by any note
    let orphan = memory(77, Namespace::Decisions, None);
    f.index.insert(&orphan, &[0.5; DIM]).unwrap();

    let report = f.sync().reindex().unwrap();
    assert_eq!(report.indexed, 10);
    assert_eq!(report.skipped, 1);

    assert_eq!(f.index.len(), 10);
    assert!(f.index.get(&orphan.id.to_string()).unwrap().is_none());

    let stats = f.index.get_stats().unwrap();
    assert_eq!(stats.by_spec.get("billing"), Some(&10));
    assert!(stats.last_sync.is_some());

    assert!(f.sync().verify().unwrap().is_consistent);
}
