//! Device export files.
//!
//! An export consists of three JSON documents: the activity summary (an
//! object), its laps (an array) and the raw sample streams (an array whose
//! entries use hyphenated keys such as `recording-rate`).

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

use super::{ActivityError, ActivityResult};

/// Sample type code of heart-rate streams
pub const HEART_RATE_SAMPLE_TYPE: &str = "2";

/// Recording rate assumed when a sample does not state one
pub const DEFAULT_RECORDING_RATE: u32 = 5;

/// Activity-level summary. Every field is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub activity_id: i64,
    pub activity_name: String,
    pub duration_in_seconds: i64,
    pub start_time_in_seconds: i64,
    pub start_time_offset_in_seconds: i64,
    pub activity_type: String,
    pub average_heart_rate_in_beats_per_minute: i64,
    pub active_kilocalories: i64,
    pub device_name: String,
    pub max_heart_rate_in_beats_per_minute: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapData {
    pub start_time_in_seconds: i64,
    #[serde(default)]
    pub air_temperature_celsius: Option<f64>,
    #[serde(default)]
    pub heart_rate: Option<f64>,
    pub total_distance_in_meters: serde_json::Number,
    pub timer_duration_in_seconds: serde_json::Number,
}

/// One raw sample stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    #[serde(rename = "recording-rate", default = "default_recording_rate")]
    pub recording_rate: u32,
    #[serde(rename = "sample-type", deserialize_with = "string_or_number")]
    pub sample_type: String,
    /// Comma-separated values, possibly containing `null` or other non-numbers
    pub data: String,
}

impl SampleData {
    pub fn is_heart_rate(&self) -> bool {
        self.sample_type.trim() == HEART_RATE_SAMPLE_TYPE
    }
}

fn default_recording_rate() -> u32 {
    DEFAULT_RECORDING_RATE
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

/// The three documents of one activity export
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityExport {
    pub summary: ActivitySummary,
    pub laps: Vec<LapData>,
    pub samples: Vec<SampleData>,
}

impl ActivityExport {
    /// Read and parse the export files.
    pub fn load(summary: &Path, laps: &Path, samples: &Path) -> ActivityResult<Self> {
        let summary_json = read_file(summary)?;
        let laps_json = read_file(laps)?;
        let samples_json = read_file(samples)?;
        Self::from_json_strs(&summary_json, &laps_json, &samples_json)
    }

    pub fn from_json_strs(summary: &str, laps: &str, samples: &str) -> ActivityResult<Self> {
        let export = Self {
            summary: parse("activity summary", summary)?,
            laps: parse("laps", laps)?,
            samples: parse("samples", samples)?,
        };

        log::debug!(
            "Parsed activity {} with {} laps and {} sample streams",
            export.summary.activity_id,
            export.laps.len(),
            export.samples.len()
        );
        Ok(export)
    }

    /// Heart-rate streams in file order
    pub fn heart_rate_samples(&self) -> Vec<&SampleData> {
        self.samples.iter().filter(|s| s.is_heart_rate()).collect()
    }
}

fn read_file(path: &Path) -> ActivityResult<String> {
    fs::read_to_string(path).map_err(|source| ActivityError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse<T: serde::de::DeserializeOwned>(what: &str, json: &str) -> ActivityResult<T> {
    serde_json::from_str(json).map_err(|source| ActivityError::Parse {
        what: what.to_string(),
        source,
    })
}
