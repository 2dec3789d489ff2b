use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use git_memory::config::DEFAULT_EMBEDDING_DIMENSION as DIM;
use git_memory::search::QueryExpander;
use git_memory::{IndexStore, Memory, Namespace, SearchFilters};
use tempfile::TempDir;

fn embedding(i: usize) -> Vec<f32> {
    (0..DIM)
        .map(|j| (((i + 1) * (j + 5)) as f32 * 0.013).cos())
        .collect()
}

fn memory(i: usize) -> Memory {
    let namespace = Namespace::ALL[i % Namespace::ALL.len()];
    Memory::builder()
        .namespace(namespace)
        .commit(format!("{:07x}{:033x}", i + 1, 0xbe4c_u64))
        .spec(if i % 2 == 0 { "billing" } else { "auth" })
        .summary(format!("benchmark memory {i}"))
        .content("Some representative body text for a captured decision.")
        .timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i as i64))
        .build()
        .unwrap()
}

fn filled_store(count: usize) -> (TempDir, IndexStore) {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path().join("index"), DIM).unwrap();
    let items: Vec<_> = (0..count).map(|i| (memory(i), embedding(i))).collect();
    store.insert_batch(&items).unwrap();
    (dir, store)
}

fn bench_insert(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path().join("index"), DIM).unwrap();
    let mut i = 0;

    c.bench_function("index_insert", |b| {
        b.iter_batched(
            || {
                i += 1;
                (memory(i), embedding(i))
            },
            |(m, e)| store.insert(&m, &e).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_vector");

    for count in [100, 500, 2000] {
        let (_dir, store) = filled_store(count);
        let query = embedding(count / 2);

        group.bench_with_input(BenchmarkId::new("unfiltered", count), &count, |b, _| {
            b.iter(|| {
                store
                    .search_vector(black_box(&query), &SearchFilters::new(), 10)
                    .unwrap()
            })
        });

        let filters = SearchFilters::new().spec("billing");
        group.bench_with_input(BenchmarkId::new("by_spec", count), &count, |b, _| {
            b.iter(|| {
                store
                    .search_vector(black_box(&query), &filters, 10)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_lookups(c: &mut Criterion) {
    let (_dir, store) = filled_store(500);
    let ids: Vec<String> = (0..20).map(|i| memory(i * 25).id.to_string()).collect();

    c.bench_function("get_stats", |b| b.iter(|| store.get_stats().unwrap()));
    c.bench_function("get_batch_20", |b| {
        b.iter(|| store.get_batch(black_box(&ids)).unwrap())
    });
    c.bench_function("list_recent_10", |b| {
        b.iter(|| store.list_recent(Some("billing"), None, 10).unwrap())
    });
}

fn bench_expand(c: &mut Criterion) {
    let expander = QueryExpander::new();
    c.bench_function("query_expand", |b| {
        b.iter(|| expander.expand(black_box("why did we pick this database for auth"), 3))
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_search,
    bench_lookups,
    bench_expand
);
criterion_main!(benches);
