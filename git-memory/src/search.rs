//! Search optimization
//!
//! Query expansion, a process-local result cache and a reranker that
//! folds recency, namespace, spec and tag signals into vector distance.
//! [`SearchOptimizer`] bundles the three for injection into recall.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::memory::{Memory, MemoryResult, Namespace};
use crate::temporal::TemporalDecay;

/// Related terms appended for recognized domain vocabulary
const SYNONYMS: &[(&str, &[&str])] = &[
    ("database", &["db", "postgres", "sql", "storage"]),
    ("db", &["database", "sql", "storage"]),
    ("sql", &["database", "query", "postgres"]),
    ("why", &["decision", "reason", "rationale"]),
    ("decide", &["decision", "reason", "choice"]),
    ("decided", &["decision", "reason", "choice"]),
    ("decision", &["choice", "reason", "tradeoff"]),
    ("auth", &["authentication", "login", "token", "session"]),
    ("authentication", &["auth", "login", "credentials"]),
    ("login", &["auth", "authentication", "session"]),
    ("api", &["endpoint", "rest", "http", "route"]),
    ("endpoint", &["api", "route", "handler"]),
    ("bug", &["error", "issue", "fix", "defect"]),
    ("error", &["bug", "failure", "exception"]),
    ("fix", &["bug", "patch", "resolve"]),
    ("slow", &["performance", "latency", "bottleneck"]),
    ("performance", &["latency", "throughput", "speed"]),
    ("cache", &["caching", "memoize", "ttl"]),
    ("test", &["testing", "spec", "coverage"]),
    ("deploy", &["deployment", "release", "ci"]),
    ("config", &["configuration", "settings", "env"]),
    ("blocked", &["blocker", "stuck", "issue"]),
    ("learned", &["learning", "insight", "lesson"]),
    ("pattern", &["convention", "idiom", "approach"]),
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// A query plus the related terms added by expansion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub original: String,
    pub expanded_terms: Vec<String>,
}

impl SearchQuery {
    pub fn new(original: impl Into<String>, expanded_terms: Vec<String>) -> Self {
        Self {
            original: original.into(),
            expanded_terms,
        }
    }

    /// Stable key, independent of expansion order
    pub fn cache_key(&self) -> String {
        let mut terms: Vec<&str> = self.expanded_terms.iter().map(String::as_str).collect();
        terms.sort_unstable();
        terms.dedup();

        let mut hasher = blake3::Hasher::new();
        hash_field(&mut hasher, &self.original);
        for term in terms {
            hash_field(&mut hasher, term);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Cache key prefixed with the spec scope, so a spec can be invalidated alone
    pub fn scoped_cache_key(&self, spec: Option<&str>) -> String {
        format!("{}{}", cache_scope(spec), self.cache_key())
    }

    /// Text handed to the embedding provider
    pub fn expanded_text(&self) -> String {
        if self.expanded_terms.is_empty() {
            self.original.clone()
        } else {
            format!("{} {}", self.original, self.expanded_terms.join(" "))
        }
    }
}

/// Length-prefixed, so field boundaries cannot shift between keys
fn hash_field(hasher: &mut blake3::Hasher, field: &str) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

/// Key prefix for a spec scope: `s<len>:<spec>/`, or `-/` when unscoped.
///
/// No scope is a prefix of another, so invalidating one spec leaves
/// every other spec's entries alone.
pub fn cache_scope(spec: Option<&str>) -> String {
    match spec {
        Some(spec) => format!("s{}:{}/", spec.len(), spec),
        None => "-/".to_string(),
    }
}

/// Appends synonyms for recognized domain terms
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExpander;

impl QueryExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand `text` with at most `max_expansions` synonyms per recognized
    /// term and about `2 * max_expansions` in total.
    pub fn expand(&self, text: &str, max_expansions: usize) -> SearchQuery {
        let original = text.trim();
        let tokens = tokenize(original);
        let cap = max_expansions.saturating_mul(2);

        let mut seen: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let mut expanded: Vec<String> = Vec::new();

        'outer: for token in &tokens {
            let Some((_, related)) = SYNONYMS
                .iter()
                .find(|(term, _)| *term == token.as_str())
            else {
                continue;
            };
            for term in related.iter().take(max_expansions) {
                if expanded.len() >= cap {
                    break 'outer;
                }
                if seen.insert(*term) {
                    expanded.push((*term).to_string());
                }
            }
        }

        log::debug!("Expanded {:?} with {:?}", original, expanded);
        SearchQuery::new(original, expanded)
    }
}

struct CacheEntry {
    results: Vec<Memory>,
    inserted: Instant,
}

/// Snapshot of cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl: Duration,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded LRU of resolved results with a time-to-live
pub struct SearchCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SearchCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_size: capacity.get(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn set(&self, key: impl Into<String>, results: Vec<Memory>) {
        self.entries.lock().put(
            key.into(),
            CacheEntry {
                results,
                inserted: Instant::now(),
            },
        );
    }

    /// Cached results, or `None` on a miss or expired entry
    pub fn get(&self, key: &str) -> Option<Vec<Memory>> {
        let mut entries = self.entries.lock();

        let expired = entries
            .peek(key)
            .map(|entry| entry.inserted.elapsed() >= self.ttl);
        let fresh = match expired {
            Some(false) => entries.get(key).map(|entry| entry.results.clone()),
            Some(true) => {
                entries.pop(key);
                None
            }
            None => None,
        };

        match &fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    /// Drop every entry, or those whose key starts with `prefix`.
    /// Returns how many were removed.
    pub fn invalidate(&self, prefix: Option<&str>) -> usize {
        let mut entries = self.entries.lock();

        let Some(prefix) = prefix else {
            let removed = entries.len();
            entries.clear();
            return removed;
        };

        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            max_size: self.max_size,
            ttl: self.ttl,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SearchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Per-result boosts; each is added to the denominator of the score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankFactors {
    pub recency: f32,
    pub namespace: f32,
    pub spec: f32,
    pub tags: f32,
}

impl RankFactors {
    pub fn total(&self) -> f32 {
        self.recency + self.namespace + self.spec + self.tags
    }
}

/// A result with its boosted score (lower ranks first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub result: MemoryResult,
    pub rank_factors: RankFactors,
    pub score: f32,
}

/// Boost weights for [`ResultReranker`]
#[derive(Debug, Clone, PartialEq)]
pub struct RerankWeights {
    /// Multiplies the recency decay weight
    pub recency: f32,
    pub spec_match: f32,
    /// Per overlapping tag
    pub per_tag: f32,
    /// Cap on the total tag boost
    pub max_tags: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            spec_match: 0.25,
            per_tag: 0.05,
            max_tags: 0.2,
        }
    }
}

/// Fixed weight per namespace; decisions and blockers surface first
pub fn namespace_weight(namespace: Namespace) -> f32 {
    match namespace {
        Namespace::Decisions => 0.2,
        Namespace::Blockers => 0.15,
        Namespace::Learnings => 0.1,
        Namespace::Patterns => 0.1,
        Namespace::Reviews => 0.05,
        Namespace::Progress => 0.05,
        Namespace::Retrospective => 0.05,
    }
}

/// Reorders vector results by recency, namespace, spec and tag signals
#[derive(Debug, Clone, Default)]
pub struct ResultReranker {
    decay: TemporalDecay,
    weights: RerankWeights,
}

impl ResultReranker {
    pub fn new(decay: TemporalDecay) -> Self {
        Self {
            decay,
            weights: RerankWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: RerankWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Boosts for one memory, with recency measured against `now`
    pub fn factors(
        &self,
        memory: &Memory,
        now: DateTime<Utc>,
        target_spec: Option<&str>,
        target_tags: &[String],
    ) -> RankFactors {
        let recency =
            self.decay.weight_at(Some(memory.timestamp), now) as f32 * self.weights.recency;

        let spec = match (target_spec, memory.spec.as_deref()) {
            (Some(target), Some(spec)) if target == spec => self.weights.spec_match,
            _ => 0.0,
        };

        let overlap = target_tags.iter().filter(|t| memory.has_tag(t)).count();
        let tags = (overlap as f32 * self.weights.per_tag).min(self.weights.max_tags);

        RankFactors {
            recency,
            namespace: namespace_weight(memory.namespace),
            spec,
            tags,
        }
    }

    /// Ascending by boosted score `distance / (1 + boosts)`; ties keep
    /// their input order.
    pub fn rerank(
        &self,
        results: Vec<MemoryResult>,
        query: &str,
        target_spec: Option<&str>,
        target_tags: &[String],
    ) -> Vec<RankedResult> {
        let now = Utc::now();
        let mut ranked: Vec<RankedResult> = results
            .into_iter()
            .map(|result| {
                let rank_factors = self.factors(&result.memory, now, target_spec, target_tags);
                let score = result.distance / (1.0 + rank_factors.total());
                RankedResult {
                    result,
                    rank_factors,
                    score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
        log::debug!("Reranked {} results for {:?}", ranked.len(), query);
        ranked
    }
}

/// Expansion, caching and reranking behind one handle
#[derive(Debug)]
pub struct SearchOptimizer {
    expander: QueryExpander,
    cache: SearchCache,
    reranker: ResultReranker,
    max_expansions: usize,
}

impl SearchOptimizer {
    pub fn new(cache: SearchCache, reranker: ResultReranker) -> Self {
        Self {
            expander: QueryExpander::new(),
            cache,
            reranker,
            max_expansions: 3,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        let decay = TemporalDecay::new(config.half_life_days);
        let decay = match config.min_decay {
            Some(floor) => decay.with_min_decay(floor),
            None => decay,
        };
        Self::new(
            SearchCache::new(config.cache_max_size, config.cache_ttl),
            ResultReranker::new(decay),
        )
    }

    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    pub fn expand_query(&self, text: &str) -> SearchQuery {
        self.expander.expand(text, self.max_expansions)
    }

    pub fn cache_results(&self, key: impl Into<String>, results: Vec<Memory>) {
        self.cache.set(key, results);
    }

    pub fn get_cached(&self, key: &str) -> Option<Vec<Memory>> {
        let cached = self.cache.get(key);
        log::debug!(
            "Search cache {} for {}",
            if cached.is_some() { "hit" } else { "miss" },
            key
        );
        cached
    }

    pub fn invalidate_cache(&self, prefix: Option<&str>) -> usize {
        self.cache.invalidate(prefix)
    }

    pub fn rerank(
        &self,
        results: Vec<MemoryResult>,
        query: &str,
        target_spec: Option<&str>,
        target_tags: &[String],
    ) -> Vec<RankedResult> {
        self.reranker
            .rerank(results, query, target_spec, target_tags)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Default for SearchOptimizer {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}
