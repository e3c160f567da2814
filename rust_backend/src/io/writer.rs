//! Dataset writer.
//!
//! Feature rows are written as a Parquet file plus a JSON manifest into a
//! destination directory. Both files are staged as temporary files in the
//! same directory before anything at the final paths changes. Publishing then
//! removes the previous manifest, renames the dataset into place and renames
//! the manifest last, so a manifest on disk always describes a complete
//! dataset. A failed publish leaves either the previous artifact untouched or
//! neither final file.

use polars::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;

use crate::config::FeatureSettings;
use crate::core::domain::FeatureRow;
use crate::core::run::RunStats;
use crate::error::{PipelineError, PipelineResult};
use crate::io::manifest::{
    feature_columns, read_manifest, Manifest, DATASET_FILE, MANIFEST_FILE, SCHEMA_VERSION,
};

/// Paths and manifest of a published artifact
#[derive(Debug, Clone)]
pub struct WrittenArtifact {
    pub dataset_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

/// Target of the Writing stage.
///
/// [`DatasetWriter`] is the Parquet implementation used by default.
/// Implementations must not publish anything once `cancel` is set.
pub trait DatasetSink: Send + Sync {
    fn publish(
        &self,
        rows: &[FeatureRow],
        settings: &FeatureSettings,
        stats: &RunStats,
        cancel: &AtomicBool,
    ) -> PipelineResult<WrittenArtifact>;
}

/// Convert feature rows to a Polars DataFrame with the manifest's column layout
pub fn rows_to_dataframe(rows: &[FeatureRow]) -> PolarsResult<DataFrame> {
    let n = rows.len();

    let mut subject_ids: Vec<&str> = Vec::with_capacity(n);
    let mut bucket_starts = Vec::with_capacity(n);
    let mut record_counts = Vec::with_capacity(n);
    let mut total_durations = Vec::with_capacity(n);
    let mut total_loads = Vec::with_capacity(n);
    let mut mean_loads = Vec::with_capacity(n);
    let mut rolling_means = Vec::with_capacity(n);
    let mut trends = Vec::with_capacity(n);

    for row in rows {
        subject_ids.push(&row.subject_id);
        bucket_starts.push(row.bucket_start);
        record_counts.push(row.record_count);
        total_durations.push(row.total_duration_s);
        total_loads.push(row.total_load);
        mean_loads.push(row.mean_load);
        rolling_means.push(row.rolling_mean_load);
        trends.push(row.load_trend);
    }

    DataFrame::new(vec![
        Column::new("subject_id".into(), subject_ids),
        Column::new("bucket_start".into(), bucket_starts),
        Column::new("record_count".into(), record_counts),
        Column::new("total_duration_s".into(), total_durations),
        Column::new("total_load".into(), total_loads),
        Column::new("mean_load".into(), mean_loads),
        Column::new("rolling_mean_load".into(), rolling_means),
        Column::new("load_trend".into(), trends),
    ])
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes feature datasets into a destination directory
pub struct DatasetWriter {
    destination: PathBuf,
}

impl DatasetWriter {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Serialize `rows` and publish the dataset and its manifest.
    ///
    /// # Arguments
    /// * `rows` - Feature rows, already in output order
    /// * `settings` - Feature settings recorded in the manifest
    /// * `stats` - Record counts of the generating run
    ///
    /// # Errors
    /// [`PipelineError::WriteFailure`] if the destination cannot be created
    /// or written. Neither `features.parquet` nor `manifest.json` is left
    /// half-published in that case.
    pub fn write(
        &self,
        rows: &[FeatureRow],
        settings: &FeatureSettings,
        stats: &RunStats,
    ) -> PipelineResult<WrittenArtifact> {
        self.publish(rows, settings, stats, &AtomicBool::new(false))
    }

    fn stage(&self, bytes: &[u8]) -> PipelineResult<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.destination)
            .map_err(|e| PipelineError::write_failure(&self.destination, e))?;

        staged
            .write_all(bytes)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| PipelineError::write_failure(staged.path(), e))?;

        Ok(staged)
    }
}

impl DatasetSink for DatasetWriter {
    fn publish(
        &self,
        rows: &[FeatureRow],
        settings: &FeatureSettings,
        stats: &RunStats,
        cancel: &AtomicBool,
    ) -> PipelineResult<WrittenArtifact> {
        fs::create_dir_all(&self.destination)
            .map_err(|e| PipelineError::write_failure(&self.destination, e))?;

        let mut df = rows_to_dataframe(rows)
            .map_err(|e| PipelineError::Internal(format!("Failed to build feature table: {}", e)))?;

        let mut dataset_bytes = Vec::new();
        ParquetWriter::new(&mut dataset_bytes)
            .finish(&mut df)
            .map_err(|e| PipelineError::Internal(format!("Failed to encode Parquet: {}", e)))?;

        let manifest = Manifest {
            schema_version: SCHEMA_VERSION,
            columns: feature_columns(),
            bucket_width_s: settings.bucket_width_secs(),
            rolling_window: settings.rolling_window,
            row_count: rows.len(),
            counts: *stats,
            dataset_file: DATASET_FILE.to_string(),
            dataset_sha256: sha256_hex(&dataset_bytes),
        };

        let dataset_path = self.destination.join(DATASET_FILE);
        let manifest_path = self.destination.join(MANIFEST_FILE);

        let staged_dataset = self.stage(&dataset_bytes)?;
        let staged_manifest = self.stage(&manifest.to_json_bytes()?)?;

        ensure_active(cancel, &dataset_path)?;
        // Until this succeeds the previous artifact, if any, is still intact
        retract(&manifest_path)?;

        let committed = persist(staged_dataset, &dataset_path)
            .and_then(|_| ensure_active(cancel, &manifest_path))
            .and_then(|_| persist(staged_manifest, &manifest_path));
        if let Err(e) = committed {
            discard(&dataset_path);
            return Err(e);
        }

        log::info!(
            "Wrote {} feature rows to {}",
            manifest.row_count,
            dataset_path.display()
        );

        Ok(WrittenArtifact {
            dataset_path,
            manifest_path,
            manifest,
        })
    }
}

fn ensure_active(cancel: &AtomicBool, final_path: &Path) -> PipelineResult<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(PipelineError::write_failure(final_path, "publish cancelled"));
    }
    Ok(())
}

fn persist(staged: NamedTempFile, final_path: &Path) -> PipelineResult<()> {
    staged
        .persist(final_path)
        .map(|_| ())
        .map_err(|e| PipelineError::write_failure(final_path, e.error))
}

/// Remove a previously published manifest
fn retract(manifest_path: &Path) -> PipelineResult<()> {
    match fs::remove_file(manifest_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::write_failure(manifest_path, e)),
    }
}

fn discard(dataset_path: &Path) {
    match fs::remove_file(dataset_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", dataset_path.display(), e),
    }
}

/// Load a published dataset after checking its manifest and checksum.
pub fn read_dataset(dir: &Path) -> PipelineResult<DataFrame> {
    let manifest = read_manifest(dir)?;
    manifest.check_compatible(SCHEMA_VERSION)?;

    let dataset_path = dir.join(&manifest.dataset_file);
    let bytes = fs::read(&dataset_path).map_err(|e| {
        PipelineError::InvalidArtifact(format!("Failed to read {}: {}", dataset_path.display(), e))
    })?;

    if sha256_hex(&bytes) != manifest.dataset_sha256 {
        return Err(PipelineError::InvalidArtifact(format!(
            "{} does not match the manifest checksum",
            dataset_path.display()
        )));
    }

    let df = ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| PipelineError::InvalidArtifact(format!("Failed to decode Parquet: {}", e)))?;

    if df.height() != manifest.row_count {
        return Err(PipelineError::InvalidArtifact(format!(
            "dataset has {} rows, manifest records {}",
            df.height(),
            manifest.row_count
        )));
    }

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn row(subject: &str, bucket_start: i64, load: f64) -> FeatureRow {
        FeatureRow {
            subject_id: subject.to_string(),
            bucket_start,
            record_count: 1,
            total_duration_s: 3600.0,
            total_load: load,
            mean_load: load,
            rolling_mean_load: load,
            load_trend: 0.0,
        }
    }

    fn sample_rows() -> Vec<FeatureRow> {
        vec![
            row("A", 1_704_067_200, 10.0),
            row("A", 1_704_153_600, 20.0),
            row("B", 1_704_067_200, 5.0),
        ]
    }

    #[test]
    fn test_rows_to_dataframe_layout() {
        let df = rows_to_dataframe(&sample_rows()).unwrap();
        assert_eq!(df.height(), 3);

        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let expected: Vec<String> = feature_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, expected);

        assert_eq!(df.column("record_count").unwrap().dtype(), &DataType::UInt32);
        assert_eq!(df.column("bucket_start").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_empty_rows_keep_schema() {
        let df = rows_to_dataframe(&[]).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), feature_columns().len());
        assert_eq!(df.column("subject_id").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("features");
        let mut stats = RunStats::default();
        stats.record_loaded(3, 0);

        let writer = DatasetWriter::new(&destination);
        let artifact = writer
            .write(&sample_rows(), &FeatureSettings::default(), &stats)
            .unwrap();

        assert!(artifact.dataset_path.exists());
        assert!(artifact.manifest_path.exists());
        assert_eq!(artifact.manifest.row_count, 3);
        assert_eq!(artifact.manifest.counts.read, 3);
        assert_eq!(artifact.manifest.rolling_window, 7);

        let df = read_dataset(&destination).unwrap();
        assert_eq!(df.height(), 3);
        let loads: Vec<Option<f64>> = df
            .column("total_load")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(loads, vec![Some(10.0), Some(20.0), Some(5.0)]);

        assert_eq!(staging_leftovers(&destination), 0);
    }

    #[test]
    fn test_writes_are_byte_identical() {
        let dir = TempDir::new().unwrap();
        let settings = FeatureSettings::default();
        let stats = RunStats::default();

        DatasetWriter::new(dir.path().join("one"))
            .write(&sample_rows(), &settings, &stats)
            .unwrap();
        DatasetWriter::new(dir.path().join("two"))
            .write(&sample_rows(), &settings, &stats)
            .unwrap();

        for file in [DATASET_FILE, MANIFEST_FILE] {
            let one = fs::read(dir.path().join("one").join(file)).unwrap();
            let two = fs::read(dir.path().join("two").join(file)).unwrap();
            assert_eq!(one, two, "{} differs between runs", file);
        }
    }

    #[test]
    fn test_unwritable_destination_is_write_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("occupied");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = DatasetWriter::new(&blocker)
            .write(&sample_rows(), &FeatureSettings::default(), &RunStats::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailure);
    }

    fn staging_leftovers(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".partial-"))
            .count()
    }

    #[test]
    fn test_cancelled_write_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let cancel = AtomicBool::new(true);

        let err = DatasetWriter::new(dir.path())
            .publish(
                &sample_rows(),
                &FeatureSettings::default(),
                &RunStats::default(),
                &cancel,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailure);

        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 0);
    }

    #[test]
    fn test_cancelled_rewrite_keeps_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let writer = DatasetWriter::new(dir.path());
        writer
            .write(&sample_rows(), &FeatureSettings::default(), &RunStats::default())
            .unwrap();

        let err = writer
            .publish(
                &sample_rows()[..1],
                &FeatureSettings::default(),
                &RunStats::default(),
                &AtomicBool::new(true),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailure);
        assert_eq!(read_dataset(dir.path()).unwrap().height(), 3);
    }

    #[test]
    fn test_failed_manifest_publish_leaves_no_dataset() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory where the manifest should go cannot be replaced
        let blocked = dir.path().join(MANIFEST_FILE);
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), b"x").unwrap();

        let err = DatasetWriter::new(dir.path())
            .write(&sample_rows()[..1], &FeatureSettings::default(), &RunStats::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriteFailure);
        assert!(!dir.path().join(DATASET_FILE).exists());
        assert!(!blocked.is_file());
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[test]
    fn test_failed_republish_removes_previous_manifest() {
        let dir = TempDir::new().unwrap();
        let writer = DatasetWriter::new(dir.path());
        writer
            .write(&sample_rows(), &FeatureSettings::default(), &RunStats::default())
            .unwrap();

        // The dataset can no longer be replaced, but the old manifest can be removed
        let dataset = dir.path().join(DATASET_FILE);
        fs::remove_file(&dataset).unwrap();
        fs::create_dir(&dataset).unwrap();
        fs::write(dataset.join("keep"), b"x").unwrap();

        let err = writer
            .write(&sample_rows()[..1], &FeatureSettings::default(), &RunStats::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriteFailure);
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(read_manifest(dir.path()).is_err());
        assert_eq!(staging_leftovers(dir.path()), 0);
    }

    #[test]
    fn test_read_dataset_detects_tampering() {
        let dir = TempDir::new().unwrap();
        DatasetWriter::new(dir.path())
            .write(&sample_rows(), &FeatureSettings::default(), &RunStats::default())
            .unwrap();

        fs::write(dir.path().join(DATASET_FILE), b"truncated").unwrap();
        let err = read_dataset(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArtifact);
    }
}
