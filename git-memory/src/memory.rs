//! Memory types and builders
//!
//! Core types for representing captured memories and the values the
//! index and recall layers hand back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::ParseError;

/// Length of the abbreviated commit sha used in memory ids
pub const SHORT_SHA_LEN: usize = 7;

/// Fixed category of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Decisions,
    Learnings,
    Blockers,
    Progress,
    Patterns,
    Reviews,
    Retrospective,
}

impl Namespace {
    /// All namespaces, in declaration order
    pub const ALL: [Namespace; 7] = [
        Namespace::Decisions,
        Namespace::Learnings,
        Namespace::Blockers,
        Namespace::Progress,
        Namespace::Patterns,
        Namespace::Reviews,
        Namespace::Retrospective,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decisions => "decisions",
            Self::Learnings => "learnings",
            Self::Blockers => "blockers",
            Self::Progress => "progress",
            Self::Patterns => "patterns",
            Self::Reviews => "reviews",
            Self::Retrospective => "retrospective",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s.trim())
            .ok_or_else(|| ParseError::invalid_field("type", format!("unknown namespace '{s}'")))
    }
}

/// Identifier of a memory: `<namespace>:<short-sha>:<epoch-ms>`.
///
/// Legacy ids (`<namespace>:<sha>`) carry no timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MemoryId {
    pub namespace: Namespace,
    pub short_sha: String,
    pub timestamp_ms: Option<i64>,
}

impl MemoryId {
    /// Derive the id for a memory captured on `commit_sha` at `timestamp`
    pub fn new(namespace: Namespace, commit_sha: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            namespace,
            short_sha: short_sha(commit_sha).to_string(),
            timestamp_ms: Some(timestamp.timestamp_millis()),
        }
    }

    /// True for ids in the two-part legacy format
    pub fn is_legacy(&self) -> bool {
        self.timestamp_ms.is_none()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp_ms {
            Some(ms) => write!(f, "{}:{}:{}", self.namespace, self.short_sha, ms),
            None => write!(f, "{}:{}", self.namespace, self.short_sha),
        }
    }
}

impl FromStr for MemoryId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        codec::parse_id(s)
    }
}

impl From<MemoryId> for String {
    fn from(id: MemoryId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for MemoryId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        codec::parse_id(&value)
    }
}

/// First seven characters of a commit sha (or the whole sha if shorter)
pub fn short_sha(commit_sha: &str) -> &str {
    match commit_sha.char_indices().nth(SHORT_SHA_LEN) {
        Some((idx, _)) => &commit_sha[..idx],
        None => commit_sha,
    }
}

/// An immutable captured note attached to a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Derived from namespace, commit and timestamp
    pub id: MemoryId,
    /// Commit the note is attached to
    pub commit_sha: String,
    pub namespace: Namespace,
    /// Project slug this memory is scoped to
    pub spec: Option<String>,
    pub phase: Option<String>,
    /// One-line summary (at most 100 characters once formatted)
    pub summary: String,
    /// Full note body
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub status: Option<String>,
    /// Ids of related memories
    #[serde(default)]
    pub relates_to: Vec<String>,
}

impl Memory {
    /// Create a new builder for Memory
    pub fn builder() -> MemoryBuilder {
        MemoryBuilder::default()
    }

    /// Text fed to the embedding provider
    pub fn searchable_text(&self) -> String {
        if self.content.is_empty() {
            self.summary.clone()
        } else {
            format!("{}\n{}", self.summary, self.content)
        }
    }

    /// True when `tag` is attached to this memory
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Builder for Memory with fluent API
#[derive(Debug, Default)]
pub struct MemoryBuilder {
    commit_sha: Option<String>,
    namespace: Option<Namespace>,
    spec: Option<String>,
    phase: Option<String>,
    summary: Option<String>,
    content: String,
    tags: Vec<String>,
    timestamp: Option<DateTime<Utc>>,
    status: Option<String>,
    relates_to: Vec<String>,
}

impl MemoryBuilder {
    pub fn commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    /// Set the spec from an optional value
    pub fn maybe_spec(mut self, spec: Option<String>) -> Self {
        self.spec = spec;
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set multiple tags
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Capture time (defaults to now)
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn relates_to(mut self, ids: Vec<String>) -> Self {
        self.relates_to = ids;
        self
    }

    /// Build the Memory, deriving its id
    pub fn build(self) -> Result<Memory, MemoryBuilderError> {
        let namespace = self.namespace.ok_or(MemoryBuilderError::MissingNamespace)?;
        let commit_sha = self.commit_sha.ok_or(MemoryBuilderError::MissingCommit)?;
        let summary = self.summary.ok_or(MemoryBuilderError::MissingSummary)?;
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);

        Ok(Memory {
            id: MemoryId::new(namespace, &commit_sha, timestamp),
            commit_sha,
            namespace,
            spec: self.spec,
            phase: self.phase,
            summary,
            content: self.content,
            tags: self.tags,
            timestamp,
            status: self.status,
            relates_to: self.relates_to,
        })
    }
}

/// Errors that can occur when building a Memory
#[derive(Debug, thiserror::Error)]
pub enum MemoryBuilderError {
    #[error("Missing required field: namespace")]
    MissingNamespace,
    #[error("Missing required field: commit")]
    MissingCommit,
    #[error("Missing required field: summary")]
    MissingSummary,
}

/// A memory paired with its distance to a query (0 = identical)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryResult {
    pub memory: Memory,
    pub distance: f32,
}

impl MemoryResult {
    pub fn new(memory: Memory, distance: f32) -> Self {
        Self { memory, distance }
    }
}

/// How much context to attach to a result; each level includes the previous
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HydrationLevel {
    /// Index metadata only
    Summary = 1,
    /// Plus the raw note text
    Full = 2,
    /// Plus commit metadata and changed file contents
    Files = 3,
}

impl HydrationLevel {
    /// The next richer level, if any
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Summary => Some(Self::Full),
            Self::Full => Some(Self::Files),
            Self::Files => None,
        }
    }
}

/// Commit metadata from the durable store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    /// Author date, ISO-8601
    pub date: String,
    pub message: String,
}

/// A search result enriched up to some [`HydrationLevel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedMemory {
    pub result: MemoryResult,
    /// Level actually reached
    pub level: HydrationLevel,
    /// Raw note text (FULL and above)
    pub full_content: Option<String>,
    /// File path -> content at the commit (FILES)
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Commit metadata (FILES)
    pub commit_info: Option<CommitInfo>,
}

impl HydratedMemory {
    /// SUMMARY-level wrapper around a result
    pub fn summary(result: MemoryResult) -> Self {
        Self {
            result,
            level: HydrationLevel::Summary,
            full_content: None,
            files: BTreeMap::new(),
            commit_info: None,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.result.memory
    }
}

/// Everything recorded for one spec, grouped by namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecContext {
    pub spec: String,
    pub memories: BTreeMap<Namespace, Vec<Memory>>,
    pub total_count: usize,
    /// Approximate token cost (about four characters per token)
    pub token_estimate: usize,
}

impl SpecContext {
    pub fn new(spec: impl Into<String>, memories: BTreeMap<Namespace, Vec<Memory>>) -> Self {
        let total_count = memories.values().map(Vec::len).sum();
        let chars: usize = memories
            .values()
            .flatten()
            .map(|m| m.summary.chars().count() + m.content.chars().count())
            .sum();

        Self {
            spec: spec.into(),
            memories,
            total_count,
            token_estimate: chars.div_ceil(4),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

/// Aggregate counts over the index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_memories: usize,
    pub by_namespace: BTreeMap<String, usize>,
    pub by_spec: BTreeMap<String, usize>,
    pub last_sync: Option<DateTime<Utc>>,
    pub index_size_bytes: u64,
}

/// Outcome of cross-checking the index against the durable store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_consistent: bool,
    /// In the durable store, absent from the index
    pub missing_in_index: BTreeSet<String>,
    /// In the index, absent from the durable store
    pub orphaned_in_index: BTreeSet<String>,
    /// Present in both with diverging content
    pub mismatched: BTreeSet<String>,
}

impl VerificationResult {
    pub fn new(
        missing_in_index: BTreeSet<String>,
        orphaned_in_index: BTreeSet<String>,
        mismatched: BTreeSet<String>,
    ) -> Self {
        Self {
            is_consistent: missing_in_index.is_empty()
                && orphaned_in_index.is_empty()
                && mismatched.is_empty(),
            missing_in_index,
            orphaned_in_index,
            mismatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SHA: &str = "abcdef1234567890abcdef1234567890abcdef12";

    fn sample() -> Memory {
        Memory::builder()
            .namespace(Namespace::Decisions)
            .commit(SHA)
            .spec("auth-rework")
            .summary("Use RocksDB for the index")
            .content("Embedded, fast, good Rust bindings.")
            .tag("storage")
            .timestamp(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_namespace_round_trip() {
        for ns in Namespace::ALL {
            assert_eq!(ns.as_str().parse::<Namespace>().unwrap(), ns);
        }
        assert!("todo".parse::<Namespace>().is_err());
    }

    #[test]
    fn test_builder_derives_id() {
        let memory = sample();
        assert_eq!(memory.id.to_string(), "decisions:abcdef1:1705314600000");
        assert_eq!(memory.id.short_sha, "abcdef1");
        assert!(!memory.id.is_legacy());
    }

    #[test]
    fn test_builder_missing_required() {
        let result = Memory::builder().commit(SHA).summary("x").build();
        assert!(matches!(result, Err(MemoryBuilderError::MissingNamespace)));

        let result = Memory::builder()
            .namespace(Namespace::Progress)
            .summary("x")
            .build();
        assert!(matches!(result, Err(MemoryBuilderError::MissingCommit)));
    }

    #[test]
    fn test_short_sha_of_short_input() {
        assert_eq!(short_sha("abc"), "abc");
        assert_eq!(short_sha(SHA), "abcdef1");
    }

    #[test]
    fn test_hydration_levels_ordered() {
        assert!(HydrationLevel::Summary < HydrationLevel::Full);
        assert!(HydrationLevel::Full < HydrationLevel::Files);
        assert_eq!(HydrationLevel::Files as u8, 3);
        assert_eq!(HydrationLevel::Summary.next(), Some(HydrationLevel::Full));
        assert_eq!(HydrationLevel::Files.next(), None);
    }

    #[test]
    fn test_summary_hydration_defaults() {
        let hydrated = HydratedMemory::summary(MemoryResult::new(sample(), 0.1));
        assert_eq!(hydrated.level, HydrationLevel::Summary);
        assert!(hydrated.full_content.is_none());
        assert!(hydrated.files.is_empty());
        assert!(hydrated.commit_info.is_none());
    }

    #[test]
    fn test_spec_context_counts() {
        let mut groups = BTreeMap::new();
        groups.insert(Namespace::Decisions, vec![sample(), sample()]);
        let context = SpecContext::new("auth-rework", groups);
        assert_eq!(context.total_count, 2);
        assert!(context.token_estimate > 0);

        let empty = SpecContext::new("nothing", BTreeMap::new());
        assert!(empty.is_empty());
        assert_eq!(empty.token_estimate, 0);
    }

    #[test]
    fn test_verification_consistency_flag() {
        let clean = VerificationResult::new(BTreeSet::new(), BTreeSet::new(), BTreeSet::new());
        assert!(clean.is_consistent);

        let dirty = VerificationResult::new(
            BTreeSet::from(["decisions:abcdef1:1".to_string()]),
            BTreeSet::new(),
            BTreeSet::new(),
        );
        assert!(!dirty.is_consistent);
    }

    #[test]
    fn test_memory_bincode_round_trip() {
        let memory = sample();
        let bytes = bincode::serialize(&memory).unwrap();
        let restored: Memory = bincode::deserialize(&bytes).unwrap();
        assert_eq!(memory, restored);
    }
}
