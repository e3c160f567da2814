use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::core::domain::{Metadata, RawRecord};

/// Custom deserializer that accepts either string or integer for subject ID
fn deserialize_subject_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    Ok(Option::<StringOrInt>::deserialize(deserializer)?.map(|value| match value {
        StringOrInt::String(s) => s,
        StringOrInt::Int(i) => i.to_string(),
    }))
}

/// Numeric fields may also arrive as strings, e.g. `"1800"`; a blank string is missing
fn deserialize_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Number(f64),
        String(String),
    }

    match Option::<StringOrNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StringOrNumber::Number(n)) => Ok(Some(n)),
        Some(StringOrNumber::String(s)) if s.trim().is_empty() => Ok(None),
        Some(StringOrNumber::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid number '{}': {}", s, e))),
    }
}

/// Timestamps may be RFC 3339 text or Unix seconds
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimestampValue {
    Seconds(i64),
    FractionalSeconds(f64),
    Text(String),
}

/// Raw JSON structure for one record line
#[derive(Debug, Deserialize)]
struct RecordLine {
    #[serde(default, deserialize_with = "deserialize_subject_id")]
    subject_id: Option<String>,
    timestamp: Option<TimestampValue>,
    activity_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_number")]
    duration_s: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_number")]
    load: Option<f64>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

/// Parse a timestamp cell as RFC 3339, falling back to a naive UTC datetime.
pub fn parse_timestamp_text(text: &str) -> Result<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(secs) = trimmed.parse::<i64>() {
        return timestamp_from_seconds(secs as f64);
    }

    bail!("Unrecognized timestamp: {}", text)
}

fn timestamp_from_seconds(secs: f64) -> Result<DateTime<Utc>> {
    if !secs.is_finite() {
        bail!("Non-finite timestamp");
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .with_context(|| format!("Timestamp out of representable range: {}", secs))
}

fn resolve_timestamp(value: TimestampValue) -> Result<DateTime<Utc>> {
    match value {
        TimestampValue::Seconds(secs) => DateTime::from_timestamp(secs, 0)
            .with_context(|| format!("Timestamp out of representable range: {}", secs)),
        TimestampValue::FractionalSeconds(secs) => timestamp_from_seconds(secs),
        TimestampValue::Text(text) => parse_timestamp_text(&text),
    }
}

/// Parse one JSON Lines entry into a [`RawRecord`].
///
/// Absent or `null` required fields are kept as `None` for the validator to
/// report. Anything that is not a JSON object with the expected field types
/// is an error, which the loader counts as a skipped line.
///
/// # Arguments
/// * `line` - One line of input, without the trailing newline
/// * `sequence` - Position of the record in the source
pub fn parse_record_line(line: &str, sequence: u64) -> Result<RawRecord> {
    let parsed: RecordLine =
        serde_json::from_str(line).context("Failed to parse record line")?;

    let timestamp = parsed
        .timestamp
        .map(resolve_timestamp)
        .transpose()
        .context("Failed to parse timestamp")?;

    Ok(RawRecord {
        sequence,
        subject_id: parsed.subject_id,
        timestamp,
        activity_type: parsed.activity_type,
        duration_s: parsed.duration_s,
        load: parsed.load,
        metadata: parsed.metadata.unwrap_or_default(),
    })
}
