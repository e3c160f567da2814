//! Training summary consolidation and export.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use super::export::{ActivityExport, ActivitySummary, LapData, SampleData, DEFAULT_RECORDING_RATE};
use super::heart_rate::{flatten_jumps, forward_fill, parse_series, upsample};
use super::{ActivityError, ActivityResult};

/// One upsampled heart-rate value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub sample_index: usize,
    pub heart_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    pub start_time_in_seconds: i64,
    pub total_distance_in_meters: serde_json::Number,
    pub timer_duration_in_seconds: serde_json::Number,
    pub heart_rate_samples: Vec<HeartRateSample>,
}

/// Consolidated view of one activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub activity_overview: ActivitySummary,
    pub laps: Vec<Lap>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationSettings {
    /// Largest accepted jump between neighbouring heart-rate values
    pub outlier_threshold: f64,
    /// Heart-rate streams assigned to each lap, in order
    pub samples_per_lap: usize,
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        Self {
            outlier_threshold: f64::INFINITY,
            samples_per_lap: 2,
        }
    }
}

/// Builds a [`TrainingSummary`] from an [`ActivityExport`]
#[derive(Debug, Clone)]
pub struct ActivityConsolidator {
    settings: ConsolidationSettings,
}

impl ActivityConsolidator {
    pub fn new(settings: ConsolidationSettings) -> ActivityResult<Self> {
        if settings.samples_per_lap == 0 {
            return Err(ActivityError::InvalidSettings(
                "samples_per_lap must be greater than 0".to_string(),
            ));
        }
        if settings.outlier_threshold.is_nan() || settings.outlier_threshold < 0.0 {
            return Err(ActivityError::InvalidSettings(format!(
                "outlier threshold {} is not a non-negative number",
                settings.outlier_threshold
            )));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ConsolidationSettings {
        &self.settings
    }

    /// Lap `i` takes heart-rate streams `[i·k, (i+1)·k)`; laps past the end
    /// of the streams get an empty series.
    pub fn consolidate(&self, export: &ActivityExport) -> TrainingSummary {
        let heart_rate = export.heart_rate_samples();
        let per_lap = self.settings.samples_per_lap;

        let laps = export
            .laps
            .iter()
            .enumerate()
            .map(|(i, lap)| {
                let start = i.saturating_mul(per_lap).min(heart_rate.len());
                let end = start.saturating_add(per_lap).min(heart_rate.len());
                self.build_lap(lap, &heart_rate[start..end])
            })
            .collect();

        TrainingSummary {
            activity_overview: export.summary.clone(),
            laps,
        }
    }

    fn build_lap(&self, lap: &LapData, streams: &[&SampleData]) -> Lap {
        let mut values: Vec<Option<f64>> = streams
            .iter()
            .flat_map(|sample| parse_series(&sample.data))
            .collect();

        forward_fill(&mut values);
        flatten_jumps(&mut values, self.settings.outlier_threshold);

        let steps = streams
            .first()
            .map(|sample| sample.recording_rate)
            .filter(|rate| *rate > 0)
            .unwrap_or(DEFAULT_RECORDING_RATE);

        let heart_rate_samples = upsample(&values, steps)
            .into_iter()
            .enumerate()
            .map(|(sample_index, heart_rate)| HeartRateSample {
                sample_index,
                heart_rate,
            })
            .collect();

        Lap {
            start_time_in_seconds: lap.start_time_in_seconds,
            total_distance_in_meters: lap.total_distance_in_meters.clone(),
            timer_duration_in_seconds: lap.timer_duration_in_seconds.clone(),
            heart_rate_samples,
        }
    }
}

/// Write `summary` as indented JSON, replacing `path` atomically.
pub fn export_summary(summary: &TrainingSummary, path: &Path) -> ActivityResult<()> {
    let write_error = |reason: String| ActivityError::Write {
        path: path.to_path_buf(),
        reason,
    };

    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    summary
        .serialize(&mut serializer)
        .map_err(|e| write_error(e.to_string()))?;
    bytes.push(b'\n');

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)
        .map_err(|e| write_error(e.to_string()))?;
    staged
        .write_all(&bytes)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| write_error(e.to_string()))?;
    staged
        .persist(path)
        .map_err(|e| write_error(e.error.to_string()))?;

    log::info!(
        "Wrote training summary with {} laps to {}",
        summary.laps.len(),
        path.display()
    );
    Ok(())
}
