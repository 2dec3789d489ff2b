//! Note text format
//!
//! A note is a YAML frontmatter block between two `---` lines, a blank
//! line, then free-form body text:
//!
//! ```text
//! ---
//! type: decisions
//! spec: auth-rework
//! timestamp: 2024-01-15T10:30:00Z
//! summary: Use RocksDB for the index
//! tags:
//! - storage
//! ---
//!
//! Embedded, fast, good Rust bindings.
//! ```
//!
//! `type`, `spec`, `timestamp` and `summary` are required keys (`spec` may
//! be null). The format is shared with other tools reading the same notes
//! refs, so the emitted key order is fixed.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::ParseError;
use crate::memory::{short_sha, Memory, MemoryId, Namespace};

/// Frontmatter delimiter line
pub const DELIMITER: &str = "---";

/// Maximum summary length in characters
pub const MAX_SUMMARY_LEN: usize = 100;

/// Keys every note must carry
pub const REQUIRED_FIELDS: [&str; 4] = ["type", "spec", "timestamp", "summary"];

/// Structured frontmatter of a note
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMetadata {
    /// Serialized as `type`
    pub namespace: Namespace,
    pub spec: Option<String>,
    pub phase: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub tags: Vec<String>,
    pub status: Option<String>,
    pub relates_to: Vec<String>,
}

impl NoteMetadata {
    /// Minimal metadata; optional fields empty
    pub fn new(namespace: Namespace, timestamp: DateTime<Utc>, summary: impl Into<String>) -> Self {
        Self {
            namespace,
            spec: None,
            phase: None,
            timestamp,
            summary: summary.into(),
            tags: Vec::new(),
            status: None,
            relates_to: Vec::new(),
        }
    }

    /// Frontmatter describing an existing memory
    pub fn from_memory(memory: &Memory) -> Self {
        Self {
            namespace: memory.namespace,
            spec: memory.spec.clone(),
            phase: memory.phase.clone(),
            timestamp: memory.timestamp,
            summary: memory.summary.clone(),
            tags: memory.tags.clone(),
            status: memory.status.clone(),
            relates_to: memory.relates_to.clone(),
        }
    }

    /// Combine with the note body and its commit into a memory
    pub fn into_memory(self, commit_sha: impl Into<String>, body: impl Into<String>) -> Memory {
        let commit_sha = commit_sha.into();
        Memory {
            id: MemoryId::new(self.namespace, &commit_sha, self.timestamp),
            commit_sha,
            namespace: self.namespace,
            spec: self.spec,
            phase: self.phase,
            summary: self.summary,
            content: body.into(),
            tags: self.tags,
            timestamp: self.timestamp,
            status: self.status,
            relates_to: self.relates_to,
        }
    }
}

/// Emitted frontmatter; field order is the on-disk key order.
#[derive(Serialize)]
struct Frontmatter<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    spec: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<&'a str>,
    timestamp: String,
    summary: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    relates_to: &'a [String],
}

/// Split note text into frontmatter metadata and body.
pub fn parse(text: &str) -> Result<(NoteMetadata, String), ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let (yaml, body) = split_frontmatter(text.trim_start())?;

    let mapping = match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(mapping)) => mapping,
        Ok(Value::Null) => Mapping::new(),
        Ok(_) => {
            return Err(ParseError::InvalidYaml(
                "frontmatter must be a key/value mapping".into(),
            ))
        }
        Err(e) => return Err(ParseError::InvalidYaml(e.to_string())),
    };

    for field in REQUIRED_FIELDS {
        if !mapping.contains_key(field) {
            return Err(ParseError::MissingField(field));
        }
    }

    let namespace = required_string(&mapping, "type")?.parse::<Namespace>()?;
    let timestamp = parse_timestamp(&required_string(&mapping, "timestamp")?)?;
    let summary = required_string(&mapping, "summary")?;

    let metadata = NoteMetadata {
        namespace,
        spec: optional_string(&mapping, "spec")?,
        phase: optional_string(&mapping, "phase")?,
        timestamp,
        summary,
        tags: string_list(&mapping, "tags")?,
        status: optional_string(&mapping, "status")?,
        relates_to: string_list(&mapping, "relates_to")?,
    };

    Ok((metadata, body.trim().to_string()))
}

/// Render metadata and body as note text.
pub fn format(metadata: &NoteMetadata, body: &str) -> Result<String, ParseError> {
    if metadata.summary.trim().is_empty() {
        return Err(ParseError::MissingField("summary"));
    }

    let len = metadata.summary.chars().count();
    if len > MAX_SUMMARY_LEN {
        return Err(ParseError::SummaryTooLong {
            len,
            max: MAX_SUMMARY_LEN,
        });
    }

    let frontmatter = Frontmatter {
        kind: metadata.namespace.as_str(),
        spec: metadata.spec.as_deref(),
        phase: metadata.phase.as_deref(),
        timestamp: metadata
            .timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        summary: &metadata.summary,
        tags: &metadata.tags,
        status: metadata.status.as_deref(),
        relates_to: &metadata.relates_to,
    };

    let yaml =
        serde_yaml::to_string(&frontmatter).map_err(|e| ParseError::InvalidYaml(e.to_string()))?;

    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n\n{}\n", body.trim()))
}

/// Render a memory as note text.
pub fn format_memory(memory: &Memory) -> Result<String, ParseError> {
    format(&NoteMetadata::from_memory(memory), &memory.content)
}

/// Collect problems with a note without failing.
///
/// A note that does not parse yields exactly one warning carrying the
/// parse failure. Parseable notes may still draw soft warnings.
pub fn validate(text: &str) -> Vec<String> {
    let (metadata, body) = match parse(text) {
        Ok(parsed) => parsed,
        Err(e) => return vec![e.to_string()],
    };

    let mut warnings = Vec::new();

    let len = metadata.summary.chars().count();
    if len > MAX_SUMMARY_LEN {
        warnings.push(format!(
            "summary is {len} characters, longer than the {MAX_SUMMARY_LEN} character limit"
        ));
    }
    if metadata.spec.is_none() {
        warnings.push("note is not scoped to a spec".to_string());
    }
    if body.is_empty() {
        warnings.push("note body is empty".to_string());
    }

    warnings
}

/// Memory id for a note: `<namespace>:<sha[:7]>:<epoch-ms>`.
///
/// `timestamp` defaults to now.
pub fn extract_id(
    namespace: Namespace,
    commit_sha: &str,
    timestamp: Option<DateTime<Utc>>,
) -> String {
    let timestamp = timestamp.unwrap_or_else(Utc::now);
    format!(
        "{}:{}:{}",
        namespace,
        short_sha(commit_sha),
        timestamp.timestamp_millis()
    )
}

/// Parse a memory id in the current or legacy format.
pub fn parse_id(id: &str) -> Result<MemoryId, ParseError> {
    let invalid = || ParseError::InvalidMemoryId(id.to_string());

    let parts: Vec<&str> = id.split(':').collect();
    let (namespace, sha, timestamp_ms) = match parts.as_slice() {
        [namespace, sha, ms] => (
            *namespace,
            *sha,
            Some(ms.parse::<i64>().map_err(|_| invalid())?),
        ),
        [namespace, sha] => (*namespace, *sha, None),
        _ => return Err(invalid()),
    };

    if sha.is_empty() {
        return Err(invalid());
    }

    Ok(MemoryId {
        namespace: namespace.parse().map_err(|_| invalid())?,
        short_sha: sha.to_string(),
        timestamp_ms,
    })
}

/// Parse an ISO-8601 timestamp. A 'Z' suffix or explicit offset is
/// honoured; a timestamp without either is read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ParseError::InvalidTimestamp(raw.to_string()))
}

fn split_frontmatter(text: &str) -> Result<(&str, &str), ParseError> {
    let mut lines = text.split_inclusive('\n');

    let first = lines.next().unwrap_or_default();
    if first.trim_end() != DELIMITER {
        return Err(ParseError::MissingFrontmatter(
            "note must start with a '---' line",
        ));
    }

    let start = first.len();
    let mut offset = start;
    for line in lines {
        if line.trim_end() == DELIMITER {
            return Ok((&text[start..offset], &text[offset + line.len()..]));
        }
        offset += line.len();
    }

    Err(ParseError::MissingFrontmatter(
        "no closing '---' delimiter",
    ))
}

fn scalar_string(field: &'static str, value: &Value) -> Result<Option<String>, ParseError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(ParseError::invalid_field(field, "expected a scalar value")),
    }
}

fn required_string(mapping: &Mapping, field: &'static str) -> Result<String, ParseError> {
    let value = mapping.get(field).ok_or(ParseError::MissingField(field))?;
    scalar_string(field, value)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ParseError::invalid_field(field, "must not be empty"))
}

fn optional_string(mapping: &Mapping, field: &'static str) -> Result<Option<String>, ParseError> {
    match mapping.get(field) {
        Some(value) => scalar_string(field, value),
        None => Ok(None),
    }
}

/// A list field may be a YAML sequence or a comma-separated string.
fn string_list(mapping: &Mapping, field: &'static str) -> Result<Vec<String>, ParseError> {
    match mapping.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| scalar_string(field, item).transpose())
            .collect(),
        Some(Value::String(s)) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()),
        Some(_) => Err(ParseError::invalid_field(
            field,
            "expected a list or a comma-separated string",
        )),
    }
}
