//! Temporal decay for recency weighting
//!
//! A single exponential half-life curve backs the reranker's recency
//! factor and the staleness checks on [`crate::Memory`]:
//!
//! ```text
//! decay = 2 ^ (-age_days / half_life_days)
//! ```
//!
//! Fresh memories weigh ~1.0, a memory one half-life old weighs 0.5, and
//! the weight keeps halving from there unless floored by `min_decay`.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Default half-life in days
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Weight returned when a memory has no timestamp
pub const NEUTRAL_DECAY: f64 = 0.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Recency weight of `timestamp` relative to the current UTC time.
///
/// Returns a value in `(0, 1]`. A missing timestamp yields
/// [`NEUTRAL_DECAY`]. Timestamps in the future count as age zero.
/// `min_decay` floors the result so very old memories keep a minimal
/// non-zero weight. A non-positive half-life disables decay.
pub fn decay(
    timestamp: Option<DateTime<Utc>>,
    half_life_days: f64,
    min_decay: Option<f64>,
) -> f64 {
    decay_at(timestamp, Utc::now(), half_life_days, min_decay)
}

/// Same as [`decay`] for timestamps without a timezone, read as UTC.
pub fn decay_naive(
    timestamp: Option<NaiveDateTime>,
    half_life_days: f64,
    min_decay: Option<f64>,
) -> f64 {
    decay(timestamp.map(|ts| ts.and_utc()), half_life_days, min_decay)
}

/// Recency weight measured against an explicit `now`.
pub fn decay_at(
    timestamp: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    half_life_days: f64,
    min_decay: Option<f64>,
) -> f64 {
    let Some(timestamp) = timestamp else {
        return NEUTRAL_DECAY;
    };

    if half_life_days <= 0.0 || !half_life_days.is_finite() {
        return 1.0;
    }

    let age_days = ((now - timestamp).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY).max(0.0);
    let value = 2f64.powf(-age_days / half_life_days);

    match min_decay {
        Some(floor) => value.max(floor.clamp(0.0, 1.0)),
        None => value,
    }
}

/// Half-life decay with its parameters bound, shared by the reranker and
/// staleness checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalDecay {
    /// Days after which the weight halves
    pub half_life_days: f64,
    /// Optional floor for very old memories
    pub min_decay: Option<f64>,
}

impl TemporalDecay {
    pub fn new(half_life_days: f64) -> Self {
        Self {
            half_life_days,
            min_decay: None,
        }
    }

    /// Set the minimum weight
    pub fn with_min_decay(mut self, min_decay: f64) -> Self {
        self.min_decay = Some(min_decay);
        self
    }

    /// Weight for a timestamp, measured against now
    pub fn weight(&self, timestamp: Option<DateTime<Utc>>) -> f64 {
        decay(timestamp, self.half_life_days, self.min_decay)
    }

    /// Weight for a timestamp, measured against `now`
    pub fn weight_at(&self, timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        decay_at(timestamp, now, self.half_life_days, self.min_decay)
    }

    /// True when the weight has dropped below `threshold`
    pub fn is_stale(&self, timestamp: Option<DateTime<Utc>>, threshold: f64) -> bool {
        self.weight(timestamp) < threshold
    }
}

impl Default for TemporalDecay {
    fn default() -> Self {
        Self::new(DEFAULT_HALF_LIFE_DAYS)
    }
}
