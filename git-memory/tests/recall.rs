mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{memory, FakeNoteStore, HashEmbedder, DIM};
use git_memory::codec;
use git_memory::{
    EmbeddingProvider, HydrationLevel, IndexStore, MemoryConfig, MemoryError, MemoryResult,
    Namespace, RecallFilter, RecallService, SearchOptimizer,
};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    index: Arc<IndexStore>,
    embedder: Arc<HashEmbedder>,
    notes: Arc<FakeNoteStore>,
    recall: RecallService,
}

fn config() -> MemoryConfig {
    MemoryConfig {
        embedding_dimension: DIM,
        max_recall_limit: 20,
        ..MemoryConfig::default()
    }
}

fn fixture_with(config: MemoryConfig) -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = MemoryConfig {
        index_path: dir.path().join("index"),
        ..config
    };
    let index = Arc::new(IndexStore::open_with_config(&config).unwrap());
    let embedder = Arc::new(HashEmbedder::new());
    let notes = Arc::new(FakeNoteStore::new());
    let recall = RecallService::new(index.clone(), embedder.clone(), notes.clone(), config);
    Fixture {
        _dir: dir,
        index,
        embedder,
        notes,
        recall,
    }
}

fn fixture() -> Fixture {
    fixture_with(config())
}

impl Fixture {
    /// Index a memory the way capture would, with its note in the store
    fn add(&self, i: usize, namespace: Namespace, spec: Option<&str>) -> git_memory::Memory {
        let m = memory(i, namespace, spec);
        let embedding = self.embedder.embed(&m.searchable_text()).unwrap();
        self.index.insert(&m, &embedding).unwrap();
        self.notes
            .put_note(&m.commit_sha, m.namespace, &codec::format_memory(&m).unwrap());
        m
    }
}

#[test]
fn search_returns_closest_first() {
    let f = fixture();
    let target = f.add(4, Namespace::Decisions, Some("billing"));
    for i in 0..10 {
        if i != 4 {
            f.add(i, Namespace::Decisions, Some("billing"));
        }
    }

    let results = f
        .recall
        .search(&target.searchable_text(), &RecallFilter::new(), 5)
        .unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].memory, target);
    assert!(results[0].distance < 1e-4);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn search_applies_only_present_filters() {
    let f = fixture();
    for i in 0..12 {
        let (ns, spec) = if i % 2 == 0 {
            (Namespace::Decisions, Some("billing"))
        } else {
            (Namespace::Learnings, Some("auth"))
        };
        f.add(i, ns, spec);
    }

    let all = f.recall.search("anything", &RecallFilter::new(), 20).unwrap();
    assert_eq!(all.len(), 12);

    let billing = f
        .recall
        .search("anything", &RecallFilter::new().spec("billing"), 20)
        .unwrap();
    assert_eq!(billing.len(), 6);
    assert!(billing
        .iter()
        .all(|r| r.memory.spec.as_deref() == Some("billing")));

    let learnings = f
        .recall
        .search(
            "anything",
            &RecallFilter::new().namespace(Namespace::Learnings),
            20,
        )
        .unwrap();
    assert!(learnings
        .iter()
        .all(|r| r.memory.namespace == Namespace::Learnings));
}

#[test]
fn search_limit_never_exceeds_maximum() {
    let f = fixture();
    for i in 0..30 {
        f.add(i, Namespace::Progress, None);
    }

    assert_eq!(
        f.recall
            .search("q", &RecallFilter::new(), 1_000)
            .unwrap()
            .len(),
        20
    );
    assert_eq!(
        f.recall.search("q", &RecallFilter::new(), 3).unwrap().len(),
        3
    );
    assert!(f
        .recall
        .search("q", &RecallFilter::new(), 0)
        .unwrap()
        .is_empty());
}

#[test]
fn search_propagates_embedding_failure() {
    let f = fixture();
    f.add(1, Namespace::Decisions, None);
    f.embedder.fail.store(true, Ordering::SeqCst);

    let err = f
        .recall
        .search("query", &RecallFilter::new(), 5)
        .unwrap_err();
    assert!(matches!(err, MemoryError::Embedding(_)));
}

#[test]
fn similar_excludes_the_input_memory() {
    let f = fixture();
    let memories: Vec<_> = (0..8).map(|i| f.add(i, Namespace::Patterns, None)).collect();
    let target = &memories[2];

    let results = f.recall.similar(target, 5).unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.memory.id != target.id));
}

#[test]
fn similar_fills_limit_at_maximum() {
    let f = fixture_with(MemoryConfig {
        max_recall_limit: 5,
        ..config()
    });
    let memories: Vec<_> = (0..10).map(|i| f.add(i, Namespace::Patterns, None)).collect();
    let target = &memories[4];

    let results = f.recall.similar(target, 5).unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.memory.id != target.id));
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));

    // Asking for more than the maximum still yields the maximum
    assert_eq!(f.recall.similar(target, 50).unwrap().len(), 5);
}

#[test]
fn similar_reuses_stored_embedding() {
    let f = fixture();
    let memories: Vec<_> = (0..4).map(|i| f.add(i, Namespace::Patterns, None)).collect();
    let calls = f.embedder.calls();

    f.recall.similar(&memories[0], 3).unwrap();
    assert_eq!(f.embedder.calls(), calls);

    // Unknown to the index, so it is embedded
    let outsider = memory(99, Namespace::Patterns, None);
    let results = f.recall.similar(&outsider, 3).unwrap();
    assert_eq!(f.embedder.calls(), calls + 1);
    assert_eq!(results.len(), 3);
}

#[test]
fn hydrate_summary_fetches_nothing() {
    let f = fixture();
    let m = f.add(1, Namespace::Decisions, None);

    let hydrated = f
        .recall
        .hydrate(MemoryResult::new(m.clone(), 0.1), HydrationLevel::Summary);
    assert_eq!(hydrated.level, HydrationLevel::Summary);
    assert!(hydrated.full_content.is_none());
    assert!(hydrated.files.is_empty());
    assert!(hydrated.commit_info.is_none());
    assert_eq!(f.notes.show_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn hydrate_full_reads_note_once() {
    let f = fixture();
    let m = f.add(1, Namespace::Decisions, Some("billing"));

    let hydrated = f
        .recall
        .hydrate(MemoryResult::new(m.clone(), 0.1), HydrationLevel::Full);
    assert_eq!(hydrated.level, HydrationLevel::Full);
    let text = hydrated.full_content.unwrap();
    assert!(text.starts_with("---\n"));
    assert!(text.contains("body of memory 1"));
    assert!(hydrated.files.is_empty());
    assert_eq!(f.notes.show_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.notes.commit_info_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn hydrate_files_adds_commit_and_files() {
    let f = fixture();
    let m = f.add(1, Namespace::Decisions, None);
    f.notes.put_files(
        &m.commit_sha,
        vec![
            ("src/lib.rs", Some("pub mod a;")),
            ("src/removed.rs", None),
        ],
    );

    let hydrated = f
        .recall
        .hydrate(MemoryResult::new(m.clone(), 0.1), HydrationLevel::Files);
    assert_eq!(hydrated.level, HydrationLevel::Files);
    assert!(hydrated.full_content.is_some());
    assert_eq!(hydrated.commit_info.unwrap().sha, m.commit_sha);
    assert_eq!(hydrated.files.len(), 1);
    assert_eq!(hydrated.files["src/lib.rs"], "pub mod a;");
    assert_eq!(f.notes.show_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.notes.commit_info_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn hydrate_degrades_when_note_store_fails() {
    let f = fixture();
    let m = f.add(1, Namespace::Decisions, None);

    f.notes.fail_commits.store(true, Ordering::SeqCst);
    let hydrated = f
        .recall
        .hydrate(MemoryResult::new(m.clone(), 0.1), HydrationLevel::Files);
    assert_eq!(hydrated.level, HydrationLevel::Full);
    assert!(hydrated.full_content.is_some());
    assert!(hydrated.commit_info.is_none());
    assert!(hydrated.files.is_empty());

    f.notes.fail_notes.store(true, Ordering::SeqCst);
    let hydrated = f
        .recall
        .hydrate(MemoryResult::new(m, 0.1), HydrationLevel::Files);
    assert_eq!(hydrated.level, HydrationLevel::Summary);
    assert!(hydrated.full_content.is_none());
}

#[test]
fn context_for_spec() {
    let f = fixture();
    for i in 0..3 {
        f.add(i, Namespace::Decisions, Some("billing"));
    }
    f.add(3, Namespace::Blockers, Some("billing"));
    f.add(4, Namespace::Blockers, Some("auth"));

    let context = f.recall.context("billing").unwrap();
    assert_eq!(context.spec, "billing");
    assert_eq!(context.total_count, 4);
    assert_eq!(context.memories[&Namespace::Decisions].len(), 3);
    assert!(context.token_estimate > 0);

    let empty = f.recall.context("nonexistent-spec").unwrap();
    assert_eq!(empty.total_count, 0);
    assert!(empty.memories.is_empty());
    assert!(empty.is_empty());
}

#[test]
fn recent_and_by_commit_pass_through() {
    let f = fixture();
    for i in 0..6 {
        f.add(i, Namespace::Progress, Some("billing"));
    }
    let m = f.add(6, Namespace::Reviews, None);

    let recent = f
        .recall
        .recent(&RecallFilter::new().namespace(Namespace::Progress), 2)
        .unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].summary, "memory number 5");

    let on_commit = f.recall.by_commit(&m.commit_sha).unwrap();
    assert_eq!(on_commit, vec![m]);
}

#[test]
fn optimized_search_caches_and_invalidates() {
    let f = fixture_with(config());
    let recall = RecallService::new(
        f.index.clone(),
        f.embedder.clone(),
        f.notes.clone(),
        config(),
    )
    .with_optimizer(SearchOptimizer::default());

    for i in 0..5 {
        f.add(i, Namespace::Decisions, Some("billing"));
    }

    let filter = RecallFilter::new().spec("billing");
    let first = recall
        .search_optimized("why the database", &filter, 3)
        .unwrap();
    assert_eq!(first.len(), 3);
    let calls = f.embedder.calls();

    let second = recall
        .search_optimized("why the database", &filter, 3)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(f.embedder.calls(), calls);

    let stats = recall.optimizer().unwrap().cache_stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.hits, 1);

    // A slug that extends another one is its own scope
    let nested = RecallFilter::new().spec("billing/v2");
    assert!(recall
        .search_optimized("why the database", &nested, 3)
        .unwrap()
        .is_empty());
    recall
        .search_optimized("why the database", &RecallFilter::new(), 3)
        .unwrap();
    assert_eq!(recall.optimizer().unwrap().cache_stats().size, 3);

    assert_eq!(recall.invalidate_cache(Some("auth")), 0);
    assert_eq!(recall.invalidate_cache(Some("*")), 0);
    assert_eq!(recall.invalidate_cache(Some("billing")), 1);
    assert_eq!(recall.invalidate_cache(Some("billing/v2")), 1);
    assert_eq!(recall.invalidate_cache(None), 1);
}

#[test]
fn optimized_search_without_optimizer_is_plain_search() {
    let f = fixture();
    let target = f.add(2, Namespace::Decisions, None);
    f.add(3, Namespace::Decisions, None);

    let results = f
        .recall
        .search_optimized(&target.searchable_text(), &RecallFilter::new(), 1)
        .unwrap();
    assert_eq!(results, vec![target]);
    assert_eq!(f.recall.invalidate_cache(None), 0);
}
