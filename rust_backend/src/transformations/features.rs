//! Per-subject time-bucket features.
//!
//! Validated records are grouped by subject and by fixed-width time bucket.
//! Each bucket becomes one [`FeatureRow`] with its own aggregates plus
//! trailing statistics over the subject's last `rolling_window` buckets.

use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::FeatureSettings;
use crate::core::domain::{FeatureRow, ValidatedRecord};
use crate::error::{PipelineError, PipelineResult};
use crate::transformations::rolling::{least_squares_slope, mean, trailing_window_starts};

/// Start of the bucket containing `timestamp`, both in Unix seconds
pub fn bucket_start(timestamp: i64, width: i64) -> i64 {
    timestamp.div_euclid(width) * width
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: i64,
    count: u32,
    duration_s: f64,
    load: f64,
}

/// Computes feature rows from validated records.
///
/// # Examples
///
/// ```
/// use training_analytics::config::FeatureSettings;
/// use training_analytics::transformations::features::FeatureTransformer;
///
/// let transformer = FeatureTransformer::new(&FeatureSettings::default()).unwrap();
/// assert!(transformer.transform(Vec::new()).is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    width: i64,
    window: usize,
    parallel: bool,
}

impl FeatureTransformer {
    pub fn new(settings: &FeatureSettings) -> PipelineResult<Self> {
        let width = i64::try_from(settings.bucket_width_secs())
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "bucket width of {}s is not usable",
                    settings.bucket_width_secs()
                ))
            })?;

        if settings.rolling_window == 0 {
            return Err(PipelineError::Configuration(
                "rolling_window must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            width,
            window: settings.rolling_window,
            parallel: settings.parallel,
        })
    }

    /// Aggregate `records` into rows ordered by subject, then bucket start.
    pub fn transform(&self, records: Vec<ValidatedRecord>) -> Vec<FeatureRow> {
        let mut by_subject: BTreeMap<String, Vec<ValidatedRecord>> = BTreeMap::new();
        for record in records {
            by_subject
                .entry(record.subject_id().to_string())
                .or_default()
                .push(record);
        }

        let subjects: Vec<(String, Vec<ValidatedRecord>)> = by_subject.into_iter().collect();
        log::debug!(
            "Computing features for {} subjects (parallel: {})",
            subjects.len(),
            self.parallel
        );

        let per_subject = self.map_subjects(subjects);
        let rows: Vec<FeatureRow> = per_subject.into_iter().flatten().collect();

        log::info!("Computed {} feature rows", rows.len());
        rows
    }

    #[cfg(feature = "parallel")]
    fn map_subjects(&self, subjects: Vec<(String, Vec<ValidatedRecord>)>) -> Vec<Vec<FeatureRow>> {
        if self.parallel {
            subjects
                .into_par_iter()
                .map(|(subject, records)| self.subject_rows(subject, records))
                .collect()
        } else {
            self.map_subjects_sequential(subjects)
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn map_subjects(&self, subjects: Vec<(String, Vec<ValidatedRecord>)>) -> Vec<Vec<FeatureRow>> {
        self.map_subjects_sequential(subjects)
    }

    fn map_subjects_sequential(
        &self,
        subjects: Vec<(String, Vec<ValidatedRecord>)>,
    ) -> Vec<Vec<FeatureRow>> {
        subjects
            .into_iter()
            .map(|(subject, records)| self.subject_rows(subject, records))
            .collect()
    }

    fn subject_rows(&self, subject: String, mut records: Vec<ValidatedRecord>) -> Vec<FeatureRow> {
        // Ties on timestamp keep load order
        records.sort_by_key(|r| (r.timestamp(), r.sequence()));

        let buckets = self.bucketize(&records);
        let starts: Vec<i64> = buckets.iter().map(|b| b.start).collect();
        let loads: Vec<f64> = buckets.iter().map(|b| b.load).collect();
        let positions: Vec<f64> = starts
            .iter()
            .map(|s| s.div_euclid(self.width) as f64)
            .collect();

        let span = self
            .width
            .saturating_mul(i64::try_from(self.window - 1).unwrap_or(i64::MAX));
        let lows = trailing_window_starts(&starts, span);

        buckets
            .iter()
            .zip(lows)
            .enumerate()
            .map(|(i, (bucket, low))| {
                // Positions relative to the current bucket keep the slope well conditioned
                let xs: Vec<f64> = positions[low..=i].iter().map(|x| x - positions[i]).collect();
                FeatureRow {
                    subject_id: subject.clone(),
                    bucket_start: bucket.start,
                    record_count: bucket.count,
                    total_duration_s: bucket.duration_s,
                    total_load: bucket.load,
                    mean_load: bucket.load / f64::from(bucket.count),
                    rolling_mean_load: mean(&loads[low..=i]),
                    load_trend: least_squares_slope(&xs, &loads[low..=i]),
                }
            })
            .collect()
    }

    /// Records must already be sorted by timestamp
    fn bucketize(&self, records: &[ValidatedRecord]) -> Vec<Bucket> {
        let mut buckets: Vec<Bucket> = Vec::new();
        for record in records {
            let start = bucket_start(record.timestamp().timestamp(), self.width);
            match buckets.last_mut() {
                Some(bucket) if bucket.start == start => {
                    bucket.count += 1;
                    bucket.duration_s += record.duration_s();
                    bucket.load += record.load();
                }
                _ => buckets.push(Bucket {
                    start,
                    count: 1,
                    duration_s: record.duration_s(),
                    load: record.load(),
                }),
            }
        }
        buckets
    }
}
