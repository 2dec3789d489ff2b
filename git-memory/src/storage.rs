//! RocksDB index store with HNSW search
//!
//! A rebuildable mirror of captured memories. Records live in RocksDB
//! (LZ4 compressed) under key prefixes:
//!
//! ```text
//! mem:<id>                 bincode Memory
//! vec:<id>                 bincode Vec<f32>
//! commit:<sha>\0<id>       -> id
//! spec:<spec>\0<id>        -> id
//! ts:<ms, 20 digits>\0<id> -> id
//! meta:*                   schema version, last sync
//! ```
//!
//! Vectors and filter fields are also held in memory for search. Filtered
//! or small searches scan exactly; large unfiltered searches go through an
//! instant-distance HNSW graph rebuilt lazily after writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use instant_distance::{Builder, HnswMap, Point, Search};
use parking_lot::{Mutex, RwLock};
use rocksdb::{Direction, ErrorKind, IteratorMode, Options, WriteBatch, DB};

use crate::codec;
use crate::config::{MemoryConfig, MAX_RECALL_LIMIT};
use crate::error::{MemoryError, Result};
use crate::git::NoteStore;
use crate::memory::{IndexStats, Memory, Namespace, VerificationResult};
use crate::migration::{self, SCHEMA_VERSION_KEY};

pub(crate) const MEM_PREFIX: &[u8] = b"mem:";
const VEC_PREFIX: &str = "vec:";
const COMMIT_PREFIX: &str = "commit:";
const SPEC_PREFIX: &str = "spec:";
const TS_PREFIX: &[u8] = b"ts:";
const LAST_SYNC_KEY: &[u8] = b"meta:last_sync";

/// Below this many entries (or with filters) search scans exactly
pub const HNSW_MIN_POINTS: usize = 1024;

/// How long `open` waits for another handle to release the index
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const LOCK_RETRY_INITIAL: Duration = Duration::from_millis(10);
const LOCK_RETRY_MAX: Duration = Duration::from_millis(200);

pub(crate) fn mem_key(id: &str) -> Vec<u8> {
    format!("mem:{id}").into_bytes()
}

fn vec_key(id: &str) -> Vec<u8> {
    format!("{VEC_PREFIX}{id}").into_bytes()
}

/// Secondary index keys for a memory; values are the memory id
pub(crate) fn secondary_keys(memory: &Memory) -> Vec<(Vec<u8>, Vec<u8>)> {
    let id = memory.id.to_string();
    let ts = memory.timestamp.timestamp_millis().max(0);

    let mut keys = vec![
        (
            format!("{COMMIT_PREFIX}{}\0{id}", memory.commit_sha).into_bytes(),
            id.clone().into_bytes(),
        ),
        (
            format!("ts:{ts:020}\0{id}").into_bytes(),
            id.clone().into_bytes(),
        ),
    ];
    if let Some(spec) = &memory.spec {
        keys.push((
            format!("{SPEC_PREFIX}{spec}\0{id}").into_bytes(),
            id.into_bytes(),
        ));
    }
    keys
}

/// Exact-match restrictions for vector search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub namespace: Option<Namespace>,
    pub spec: Option<String>,
    pub commit_sha: Option<String>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    pub fn commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.namespace.is_none() && self.spec.is_none() && self.commit_sha.is_none()
    }

    fn matches(&self, entry: &IndexedEntry) -> bool {
        self.namespace.map_or(true, |ns| ns == entry.namespace)
            && self
                .spec
                .as_deref()
                .map_or(true, |spec| entry.spec.as_deref() == Some(spec))
            && self
                .commit_sha
                .as_deref()
                .map_or(true, |sha| entry.commit_sha == sha)
    }
}

/// In-memory view of one indexed memory
struct IndexedEntry {
    vector: Vec<f32>,
    namespace: Namespace,
    spec: Option<String>,
    commit_sha: String,
}

/// HNSW point wrapper for semantic search
#[derive(Clone)]
struct MemoryPoint {
    vector: Vec<f32>,
}

impl Point for MemoryPoint {
    fn distance(&self, other: &Self) -> f32 {
        cosine_distance(&self.vector, &other.vector)
    }
}

/// HNSW index wrapper, values are memory ids
struct HnswIndex {
    hnsw: HnswMap<MemoryPoint, String>,
}

/// Running counts kept in step with every write
#[derive(Debug, Default, Clone)]
struct Aggregates {
    total: usize,
    by_namespace: BTreeMap<String, usize>,
    by_spec: BTreeMap<String, usize>,
}

impl Aggregates {
    fn add(&mut self, memory: &Memory) {
        self.total += 1;
        *self
            .by_namespace
            .entry(memory.namespace.to_string())
            .or_insert(0) += 1;
        if let Some(spec) = &memory.spec {
            *self.by_spec.entry(spec.clone()).or_insert(0) += 1;
        }
    }

    fn remove(&mut self, memory: &Memory) {
        self.total = self.total.saturating_sub(1);
        decrement(&mut self.by_namespace, memory.namespace.as_str());
        if let Some(spec) = &memory.spec {
            decrement(&mut self.by_spec, spec);
        }
    }
}

fn decrement(counts: &mut BTreeMap<String, usize>, key: &str) {
    if let Some(count) = counts.get_mut(key) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            counts.remove(key);
        }
    }
}

/// RocksDB-based index of memories and their embeddings
pub struct IndexStore {
    db: DB,
    path: PathBuf,
    dimension: usize,
    max_limit: usize,
    entries: DashMap<String, IndexedEntry>,
    aggregates: RwLock<Aggregates>,
    hnsw_index: RwLock<Option<HnswIndex>>,
    hnsw_dirty: AtomicBool,
    /// Held across read-modify-write of records and aggregates
    write_lock: Mutex<()>,
}

impl IndexStore {
    /// Open (or create) the index at `path` for vectors of `dimension`.
    ///
    /// Waits up to [`DEFAULT_LOCK_TIMEOUT`] if another handle holds the index.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        Self::open_with_timeout(path, dimension, DEFAULT_LOCK_TIMEOUT)
    }

    /// Open, retrying with backoff while the RocksDB lock is held elsewhere
    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        dimension: usize,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = open_locked(&opts, path, lock_timeout)?;

        log::info!("IndexStore opened at: {}", path.display());

        let store = Self {
            db,
            path: path.to_path_buf(),
            dimension,
            max_limit: MAX_RECALL_LIMIT,
            entries: DashMap::new(),
            aggregates: RwLock::new(Aggregates::default()),
            hnsw_index: RwLock::new(None),
            hnsw_dirty: AtomicBool::new(true),
            write_lock: Mutex::new(()),
        };

        store.initialize()?;
        store.load_cache()?;
        Ok(store)
    }

    /// Open using the configured path, dimension and limit
    pub fn open_with_config(config: &MemoryConfig) -> Result<Self> {
        let mut store = Self::open_with_timeout(
            &config.index_path,
            config.embedding_dimension,
            config.lock_timeout,
        )?;
        store.max_limit = config.max_recall_limit.clamp(1, MAX_RECALL_LIMIT);
        Ok(store)
    }

    /// Open the index, discarding it first if RocksDB reports corruption
    /// or an unsupported schema. The returned flag is true when the index
    /// was reset and needs a rebuild from the durable store.
    pub fn open_or_reset(path: impl AsRef<Path>, dimension: usize) -> Result<(Self, bool)> {
        let path = path.as_ref();
        match Self::open(path, dimension) {
            Ok(store) => Ok((store, false)),
            Err(MemoryError::Storage(e)) if e.kind() == ErrorKind::Corruption => {
                log::warn!("Index at {} is corrupt ({}), discarding", path.display(), e);
                Self::destroy(path)?;
                Ok((Self::open(path, dimension)?, true))
            }
            Err(MemoryError::Index(reason)) => {
                log::warn!("Index at {} unusable ({}), discarding", path.display(), reason);
                Self::destroy(path)?;
                Ok((Self::open(path, dimension)?, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the index files at `path`
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        DB::destroy(&Options::default(), path.as_ref())?;
        Ok(())
    }

    /// Idempotent schema setup
    pub fn initialize(&self) -> Result<()> {
        migration::migrate_if_needed(&self.db)?;
        Ok(())
    }

    /// Load vectors and aggregates on startup
    fn load_cache(&self) -> Result<()> {
        let mut count = 0;
        let mut skipped = 0;
        let mut aggregates = Aggregates::default();

        for item in self.prefix_iter(MEM_PREFIX) {
            let (key, value) = item?;
            let id = String::from_utf8_lossy(&key[MEM_PREFIX.len()..]).into_owned();

            // Gracefully handle deserialization errors
            let memory = match bincode::deserialize::<Memory>(&value) {
                Ok(memory) => memory,
                Err(e) => {
                    log::warn!("Failed to deserialize memory {}: {}. Skipping.", id, e);
                    skipped += 1;
                    continue;
                }
            };

            let vector = match self.db.get(vec_key(&id))? {
                Some(bytes) => bincode::deserialize::<Vec<f32>>(&bytes).ok(),
                None => None,
            };
            let Some(vector) = vector.filter(|v| v.len() == self.dimension) else {
                log::warn!("Memory {} has no usable embedding. Skipping.", id);
                skipped += 1;
                continue;
            };

            aggregates.add(&memory);
            self.entries.insert(id, IndexedEntry::new(&memory, vector));
            count += 1;
        }

        *self.aggregates.write() = aggregates;

        if count > 0 {
            log::info!("Loaded {} memories from index", count);
        }
        if skipped > 0 {
            log::warn!("Skipped {} index records; rebuild to repair", skipped);
        }
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn prefix_iter<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>> + 'a
    {
        self.db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
            .take_while(move |item| match item {
                Ok((key, _)) => key.starts_with(prefix),
                Err(_) => true,
            })
    }

    /// Ids stored under a secondary-key prefix
    fn ids_with_prefix(&self, prefix: &[u8]) -> Result<Vec<String>> {
        self.prefix_iter(prefix)
            .map(|item| {
                let (_, value) = item?;
                Ok(String::from_utf8_lossy(&value).into_owned())
            })
            .collect()
    }

    /// Upsert a memory and its embedding by id
    pub fn insert(&self, memory: &Memory, embedding: &[f32]) -> Result<()> {
        self.insert_batch(&[(memory.clone(), embedding.to_vec())])
    }

    /// Upsert many memories in a single write.
    ///
    /// When an id appears more than once, the last occurrence wins.
    pub fn insert_batch(&self, items: &[(Memory, Vec<f32>)]) -> Result<()> {
        for (_, embedding) in items {
            self.check_dimension(embedding)?;
        }

        let mut last_seen: HashMap<String, usize> = HashMap::with_capacity(items.len());
        for (i, (memory, _)) in items.iter().enumerate() {
            last_seen.insert(memory.id.to_string(), i);
        }
        let items: Vec<&(Memory, Vec<f32>)> = items
            .iter()
            .enumerate()
            .filter(|(i, (memory, _))| last_seen.get(&memory.id.to_string()) == Some(i))
            .map(|(_, item)| item)
            .collect();

        let _write = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let mut replaced = Vec::new();

        for (memory, embedding) in &items {
            let id = memory.id.to_string();

            if let Some(old) = self.get(&id)? {
                for (key, _) in secondary_keys(&old) {
                    batch.delete(key);
                }
                replaced.push(old);
            }

            batch.put(mem_key(&id), bincode::serialize(memory)?);
            batch.put(vec_key(&id), bincode::serialize(embedding)?);
            for (key, value) in secondary_keys(memory) {
                batch.put(key, value);
            }
        }

        self.db.write(batch)?;

        let mut aggregates = self.aggregates.write();
        for old in &replaced {
            aggregates.remove(old);
        }
        for (memory, embedding) in &items {
            aggregates.add(memory);
            self.entries.insert(
                memory.id.to_string(),
                IndexedEntry::new(memory, embedding.clone()),
            );
        }
        drop(aggregates);

        self.hnsw_dirty.store(true, Ordering::Release);
        log::debug!("Indexed {} memories", items.len());
        Ok(())
    }

    /// Get a memory by id
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        match self.db.get(mem_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up many ids in one round trip; output is aligned with `ids`
    pub fn get_batch<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Option<Memory>>> {
        let keys = ids.iter().map(|id| mem_key(id.as_ref()));

        self.db
            .multi_get(keys)
            .into_iter()
            .map(|value| match value? {
                Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
                None => Ok(None),
            })
            .collect()
    }

    /// Stored embedding for a memory
    pub fn get_embedding(&self, id: &str) -> Option<Vec<f32>> {
        self.entries.get(id).map(|e| e.vector.clone())
    }

    /// Nearest neighbours of `embedding`, ascending by cosine distance.
    ///
    /// `limit` is clamped to the configured maximum.
    pub fn search_vector(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        self.check_dimension(embedding)?;
        Ok(self.nearest(embedding, filters, limit.min(self.max_limit)))
    }

    /// Like [`Self::search_vector`], but `exclude_id` never takes up a slot.
    ///
    /// `limit` is clamped to the configured maximum.
    pub fn search_vector_excluding(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        self.check_dimension(embedding)?;

        let limit = limit.min(self.max_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut results = self.nearest(embedding, filters, limit + 1);
        results.retain(|(id, _)| id != exclude_id);
        results.truncate(limit);
        Ok(results)
    }

    /// Unclamped nearest-neighbour lookup
    fn nearest(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<(String, f32)> {
        if limit == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let start = Instant::now();
        let results = if filters.is_empty() && self.entries.len() >= HNSW_MIN_POINTS {
            self.hnsw_search(embedding, limit)
        } else {
            self.linear_search(embedding, filters, limit)
        };

        log::debug!(
            "search_vector: {} results from {} entries in {:?}",
            results.len(),
            self.entries.len(),
            start.elapsed()
        );
        results
    }

    /// Exact scan
    fn linear_search(
        &self,
        query: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<(String, f32)> {
        let mut results: Vec<(String, f32)> = self
            .entries
            .iter()
            .filter(|entry| filters.matches(entry.value()))
            .map(|entry| (entry.key().clone(), cosine_distance(query, &entry.vector)))
            .collect();

        sort_by_distance(&mut results);
        results.truncate(limit);
        results
    }

    /// Approximate search over the HNSW graph
    fn hnsw_search(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        self.ensure_hnsw();

        let index_guard = self.hnsw_index.read();
        let Some(index) = index_guard.as_ref() else {
            drop(index_guard);
            return self.linear_search(query, &SearchFilters::default(), limit);
        };

        let query_point = MemoryPoint {
            vector: query.to_vec(),
        };
        let mut search = Search::default();
        let mut results: Vec<(String, f32)> = index
            .hnsw
            .search(&query_point, &mut search)
            .take(limit)
            .map(|item| (item.value.clone(), item.distance.max(0.0)))
            .collect();

        sort_by_distance(&mut results);
        results
    }

    /// Rebuild the HNSW graph if writes happened since the last build
    fn ensure_hnsw(&self) {
        if !self.hnsw_dirty.load(Ordering::Acquire) && self.hnsw_index.read().is_some() {
            return;
        }

        let mut guard = self.hnsw_index.write();
        if !self.hnsw_dirty.swap(false, Ordering::AcqRel) && guard.is_some() {
            return;
        }

        let start = Instant::now();
        let (points, ids): (Vec<MemoryPoint>, Vec<String>) = self
            .entries
            .iter()
            .map(|entry| {
                (
                    MemoryPoint {
                        vector: entry.vector.clone(),
                    },
                    entry.key().clone(),
                )
            })
            .unzip();

        if points.is_empty() {
            *guard = None;
            return;
        }

        let count = points.len();
        let hnsw = Builder::default().ef_construction(100).build(points, ids);
        *guard = Some(HnswIndex { hnsw });

        log::debug!("Rebuilt HNSW index over {} points in {:?}", count, start.elapsed());
    }

    /// Newest memories first, optionally filtered
    pub fn list_recent(
        &self,
        spec: Option<&str>,
        namespace: Option<Namespace>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let limit = limit.min(self.max_limit);
        let filters = SearchFilters {
            namespace,
            spec: spec.map(str::to_string),
            commit_sha: None,
        };

        let mut ids = Vec::with_capacity(limit);
        // ';' sorts right after ':', so this seeks to the last ts: key
        for item in self
            .db
            .iterator(IteratorMode::From(b"ts;", Direction::Reverse))
        {
            if ids.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(TS_PREFIX) {
                break;
            }

            let id = String::from_utf8_lossy(&value).into_owned();
            let matches = self
                .entries
                .get(&id)
                .is_some_and(|entry| filters.matches(entry.value()));
            if matches {
                ids.push(id);
            }
        }

        Ok(self.get_batch(&ids)?.into_iter().flatten().collect())
    }

    /// All memories attached to a commit.
    ///
    /// An abbreviated sha matches every commit it is a prefix of.
    pub fn get_by_commit(&self, commit_sha: &str) -> Result<Vec<Memory>> {
        if commit_sha.is_empty() {
            return Ok(Vec::new());
        }

        let prefix = format!("{COMMIT_PREFIX}{commit_sha}");
        let ids = self.ids_with_prefix(prefix.as_bytes())?;
        let mut memories: Vec<Memory> = self.get_batch(&ids)?.into_iter().flatten().collect();
        memories.sort_by(|a, b| {
            a.namespace
                .cmp(&b.namespace)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        Ok(memories)
    }

    /// Memories of one spec grouped by namespace, newest first per group
    pub fn get_by_spec(&self, spec: &str) -> Result<BTreeMap<Namespace, Vec<Memory>>> {
        let prefix = format!("{SPEC_PREFIX}{spec}\0");
        let ids = self.ids_with_prefix(prefix.as_bytes())?;

        let mut groups: BTreeMap<Namespace, Vec<Memory>> = BTreeMap::new();
        for memory in self.get_batch(&ids)?.into_iter().flatten() {
            groups.entry(memory.namespace).or_default().push(memory);
        }
        for memories in groups.values_mut() {
            memories.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        Ok(groups)
    }

    /// Aggregate counts, maintained incrementally
    pub fn get_stats(&self) -> Result<IndexStats> {
        let aggregates = self.aggregates.read().clone();

        let sst = self
            .db
            .property_int_value("rocksdb.total-sst-files-size")?
            .unwrap_or(0);
        let memtables = self
            .db
            .property_int_value("rocksdb.cur-size-all-mem-tables")?
            .unwrap_or(0);

        Ok(IndexStats {
            total_memories: aggregates.total,
            by_namespace: aggregates.by_namespace,
            by_spec: aggregates.by_spec,
            last_sync: self.last_sync()?,
            index_size_bytes: sst + memtables,
        })
    }

    /// Time of the last full sync with the durable store
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(bytes) = self.db.get(LAST_SYNC_KEY)? else {
            return Ok(None);
        };
        let ms_bytes: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| MemoryError::index("Invalid last_sync format"))?;
        Ok(Utc
            .timestamp_millis_opt(i64::from_le_bytes(ms_bytes))
            .single())
    }

    /// Record a completed sync
    pub fn mark_synced(&self, at: DateTime<Utc>) -> Result<()> {
        self.db
            .put(LAST_SYNC_KEY, at.timestamp_millis().to_le_bytes())?;
        Ok(())
    }

    /// Cross-check against the durable store. Reports, never repairs.
    pub fn verify(&self, durable: &dyn NoteStore) -> Result<VerificationResult> {
        let mut durable_memories: HashMap<String, Memory> = HashMap::new();
        for namespace in Namespace::ALL {
            for note in durable.list_notes(namespace)? {
                match codec::parse(&note.text) {
                    Ok((metadata, body)) => {
                        let memory = metadata.into_memory(note.commit_sha, body);
                        durable_memories.insert(memory.id.to_string(), memory);
                    }
                    Err(e) => {
                        log::warn!(
                            "Unparseable {} note on {}: {}",
                            namespace,
                            note.commit_sha,
                            e
                        );
                    }
                }
            }
        }

        let mut indexed: HashMap<String, Memory> = HashMap::new();
        for item in self.prefix_iter(MEM_PREFIX) {
            let (_, value) = item?;
            if let Ok(memory) = bincode::deserialize::<Memory>(&value) {
                indexed.insert(memory.id.to_string(), memory);
            }
        }

        let mut missing = BTreeSet::new();
        let mut mismatched = BTreeSet::new();
        for (id, durable_memory) in &durable_memories {
            match indexed.get(id) {
                None => {
                    missing.insert(id.clone());
                }
                Some(indexed_memory) if diverges(indexed_memory, durable_memory) => {
                    mismatched.insert(id.clone());
                }
                Some(_) => {}
            }
        }

        let orphaned: BTreeSet<String> = indexed
            .keys()
            .filter(|id| !durable_memories.contains_key(*id))
            .cloned()
            .collect();

        let result = VerificationResult::new(missing, orphaned, mismatched);
        if !result.is_consistent {
            log::warn!(
                "Index diverges from notes: {} missing, {} orphaned, {} mismatched",
                result.missing_in_index.len(),
                result.orphaned_in_index.len(),
                result.mismatched.len()
            );
        }
        Ok(result)
    }

    /// Remove every memory, keeping the schema
    pub fn clear(&self) -> Result<()> {
        let _write = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            if key.as_ref() != SCHEMA_VERSION_KEY {
                batch.delete(key);
            }
        }
        self.db.write(batch)?;

        self.entries.clear();
        *self.aggregates.write() = Aggregates::default();
        *self.hnsw_index.write() = None;
        self.hnsw_dirty.store(true, Ordering::Release);

        log::info!("Cleared index at {}", self.path.display());
        Ok(())
    }

    /// Number of indexed memories
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of every indexed memory
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the storage handle
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        log::info!("IndexStore closed at: {}", self.path.display());
        Ok(())
    }
}

impl IndexedEntry {
    fn new(memory: &Memory, vector: Vec<f32>) -> Self {
        Self {
            vector,
            namespace: memory.namespace,
            spec: memory.spec.clone(),
            commit_sha: memory.commit_sha.clone(),
        }
    }
}

/// Whether an indexed memory no longer matches its note.
///
/// Every field counts; body text is compared without surrounding whitespace.
fn diverges(indexed: &Memory, durable: &Memory) -> bool {
    let normalized = |memory: &Memory| Memory {
        content: memory.content.trim().to_string(),
        ..memory.clone()
    };
    normalized(indexed) != normalized(durable)
}

/// RocksDB refuses a second opener through its LOCK file
fn is_lock_error(e: &rocksdb::Error) -> bool {
    let message = e.to_string().to_lowercase();
    e.kind() == ErrorKind::IOError
        && (message.contains("lock") || message.contains("temporarily unavailable"))
}

/// `DB::open` with bounded backoff while another handle holds the lock
fn open_locked(opts: &Options, path: &Path, timeout: Duration) -> Result<DB> {
    let start = Instant::now();
    let mut delay = LOCK_RETRY_INITIAL;
    let mut waiting = false;

    loop {
        match DB::open(opts, path) {
            Ok(db) => {
                if waiting {
                    log::info!("Acquired index lock after {:?}", start.elapsed());
                }
                return Ok(db);
            }
            Err(e) if is_lock_error(&e) && start.elapsed() < timeout => {
                if !waiting {
                    log::warn!(
                        "Index at {} is held by another handle, waiting up to {:?}",
                        path.display(),
                        timeout
                    );
                    waiting = true;
                }
                std::thread::sleep(delay.min(timeout.saturating_sub(start.elapsed())));
                delay = (delay * 2).min(LOCK_RETRY_MAX);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Ascending by distance, ties broken by id
fn sort_by_distance(results: &mut [(String, f32)]) {
    results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
}

/// Cosine distance (1 - similarity), floored at zero
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

/// Calculate cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
