//! Domain models for training records and derived feature rows.
//!
//! A [`RawRecord`] is what the loader managed to parse from one unit of input.
//! Every required attribute is optional at that point so the validator can
//! classify what is missing. A [`ValidatedRecord`] can only be obtained from
//! the validator and carries the proven, non-optional values. Many validated
//! records aggregate into one [`FeatureRow`] keyed by subject and time bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Known activity types.
///
/// Labels are matched case-insensitively and `-` or spaces are treated as
/// `_`, so `"Indoor Cycling"`, `"indoor-cycling"` and `"INDOOR_CYCLING"` all
/// resolve to [`ActivityType::IndoorCycling`].
///
/// # Examples
///
/// ```
/// use training_analytics::core::domain::ActivityType;
///
/// let kind: ActivityType = "INDOOR_CYCLING".parse().unwrap();
/// assert_eq!(kind, ActivityType::IndoorCycling);
/// assert!("juggling".parse::<ActivityType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Running,
    Cycling,
    IndoorCycling,
    Swimming,
    Walking,
    Hiking,
    Rowing,
    StrengthTraining,
    Yoga,
    Other,
}

impl ActivityType {
    pub const ALL: [ActivityType; 10] = [
        ActivityType::Running,
        ActivityType::Cycling,
        ActivityType::IndoorCycling,
        ActivityType::Swimming,
        ActivityType::Walking,
        ActivityType::Hiking,
        ActivityType::Rowing,
        ActivityType::StrengthTraining,
        ActivityType::Yoga,
        ActivityType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Running => "running",
            ActivityType::Cycling => "cycling",
            ActivityType::IndoorCycling => "indoor_cycling",
            ActivityType::Swimming => "swimming",
            ActivityType::Walking => "walking",
            ActivityType::Hiking => "hiking",
            ActivityType::Rowing => "rowing",
            ActivityType::StrengthTraining => "strength_training",
            ActivityType::Yoga => "yoga",
            ActivityType::Other => "other",
        }
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        ActivityType::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("Unknown activity type: {}", s))
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata scalar. Nested values are not representable on purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl MetadataValue {
    /// Interpret a free-form text cell (used for CSV columns).
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed {
            "true" | "TRUE" | "True" => MetadataValue::Bool(true),
            "false" | "FALSE" | "False" => MetadataValue::Bool(false),
            _ => match trimmed.parse::<f64>() {
                Ok(number) if number.is_finite() => MetadataValue::Number(number),
                _ => MetadataValue::String(text.to_string()),
            },
        }
    }
}

/// Ordered so that serialized output is deterministic
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One observed training event as read from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Zero-based position among the records produced by the loader
    pub sequence: u64,
    pub subject_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Activity label as it appeared in the source
    pub activity_type: Option<String>,
    pub duration_s: Option<f64>,
    pub load: Option<f64>,
    pub metadata: Metadata,
}

/// A record that satisfied every domain constraint.
///
/// Only [`RecordValidator`](crate::preprocessing::validator::RecordValidator)
/// constructs these.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    sequence: u64,
    subject_id: String,
    timestamp: DateTime<Utc>,
    activity_type: ActivityType,
    duration_s: f64,
    load: f64,
    metadata: Metadata,
}

impl ValidatedRecord {
    pub(crate) fn new(
        sequence: u64,
        subject_id: String,
        timestamp: DateTime<Utc>,
        activity_type: ActivityType,
        duration_s: f64,
        load: f64,
        metadata: Metadata,
    ) -> Self {
        Self {
            sequence,
            subject_id,
            timestamp,
            activity_type,
            duration_s,
            load,
            metadata,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn activity_type(&self) -> ActivityType {
        self.activity_type
    }

    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// One row of the output dataset, keyed by subject and bucket start.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub subject_id: String,
    /// Bucket start in Unix seconds (UTC)
    pub bucket_start: i64,
    pub record_count: u32,
    pub total_duration_s: f64,
    pub total_load: f64,
    pub mean_load: f64,
    /// Mean total load over the trailing window ending at this bucket
    pub rolling_mean_load: f64,
    /// Least-squares slope of total load per bucket over the trailing window
    pub load_trend: f64,
}

impl FeatureRow {
    pub fn key(&self) -> (&str, i64) {
        (&self.subject_id, self.bucket_start)
    }

    pub fn bucket_start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.bucket_start, 0)
    }
}
