//! Pipeline orchestration.
//!
//! [`PipelineRunner`] drives one [`PipelineRun`] through
//! `Loading → Validating → Transforming → Writing`. Stages run strictly in
//! order; the first fatal error moves the run to `Failed` with the stage it
//! happened in. Blocking file work happens on tokio's blocking pool, and the
//! Loading and Writing stages are bounded by the configured timeout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::core::domain::RawRecord;
use crate::core::run::{PipelineRun, RunState};
use crate::error::{PipelineError, PipelineResult};
use crate::io::loaders::{RecordLoader, SourceRef};
use crate::io::writer::{DatasetSink, DatasetWriter};
use crate::preprocessing::validator::RecordValidator;
use crate::transformations::features::FeatureTransformer;

/// Records read by the Loading stage
struct LoadedRecords {
    records: Vec<RawRecord>,
    skipped: u64,
}

/// Main pipeline orchestrator
pub struct PipelineRunner {
    config: PipelineConfig,
    sink: Option<Arc<dyn DatasetSink>>,
}

impl PipelineRunner {
    /// Create a runner after checking the configuration.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config, sink: None })
    }

    /// Publish through `sink` instead of a [`DatasetWriter`] on the configured destination
    pub fn with_sink(mut self, sink: Arc<dyn DatasetSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run. The report is returned whether the run succeeded or not.
    pub async fn run(&self) -> PipelineRun {
        let mut run = PipelineRun::new(
            self.config.pipeline.source.clone(),
            self.config.pipeline.destination.clone(),
        );
        log::info!(
            "Starting run {} from {} to {}",
            run.run_id(),
            run.source(),
            run.destination().display()
        );

        match self.execute(&mut run).await {
            Ok(()) => {
                let stats = run.stats();
                log::info!(
                    "Run {} completed: {} read, {} skipped, {} valid, {} rejected, {} feature rows",
                    run.run_id(),
                    stats.read,
                    stats.skipped,
                    stats.valid,
                    stats.rejected,
                    run.feature_rows()
                );
            }
            Err(e) => {
                log::error!("Run {} failed during {}: {}", run.run_id(), run.state(), e);
                run.fail(&e);
            }
        }

        run
    }

    async fn execute(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        let settings = &self.config.pipeline;
        let cancel = Arc::new(AtomicBool::new(false));

        run.advance(RunState::Loading)?;
        let source = SourceRef::parse(&settings.source);
        let load_cancel = Arc::clone(&cancel);
        let loaded = run_blocking_stage(RunState::Loading, settings.timeout, &cancel, move || {
            load_records(&source, load_cancel)
        })
        .await?;
        run.stats_mut()?
            .record_loaded(loaded.records.len() as u64, loaded.skipped);

        run.advance(RunState::Validating)?;
        let validator = RecordValidator::new(&self.config.validation);
        let outcome = validator.validate_all(loaded.records, run.stats_mut()?);
        if let Some(warning) = outcome.warning {
            if settings.strict {
                return Err(PipelineError::EmptyResult);
            }
            run.warn(warning)?;
        }

        run.advance(RunState::Transforming)?;
        let transformer = FeatureTransformer::new(&self.config.features)?;
        let records = outcome.records;
        let rows = run_blocking_stage(RunState::Transforming, None, &cancel, move || {
            Ok(transformer.transform(records))
        })
        .await?;
        run.set_feature_rows(rows.len())?;

        run.advance(RunState::Writing)?;
        let sink: Arc<dyn DatasetSink> = match &self.sink {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(DatasetWriter::new(settings.destination.clone())),
        };
        let features = self.config.features.clone();
        let stats = *run.stats();
        let write_cancel = Arc::clone(&cancel);
        let artifact = run_blocking_stage(RunState::Writing, settings.timeout, &cancel, move || {
            sink.publish(&rows, &features, &stats, &write_cancel)
        })
        .await?;
        run.set_artifact(artifact_dir(&artifact.manifest_path, &settings.destination))?;

        run.advance(RunState::Completed)
    }
}

fn artifact_dir(manifest_path: &Path, fallback: &Path) -> PathBuf {
    manifest_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| fallback.to_path_buf())
}

fn load_records(source: &SourceRef, cancel: Arc<AtomicBool>) -> PipelineResult<LoadedRecords> {
    let mut stream = RecordLoader::open(source)?.with_cancellation(cancel);
    let records: Vec<RawRecord> = stream.by_ref().collect();
    let skipped = stream.finish()?;

    log::info!(
        "Loaded {} records from {} ({} skipped)",
        records.len(),
        source,
        skipped
    );
    Ok(LoadedRecords { records, skipped })
}

/// Run `task` on the blocking pool, bounded by `limit` when one is given.
///
/// On timeout `cancel` is set so the task stops at its next checkpoint
/// instead of completing its work after the stage was abandoned.
pub(crate) async fn run_blocking_stage<T, F>(
    stage: RunState,
    limit: Option<Duration>,
    cancel: &Arc<AtomicBool>,
    task: F,
) -> PipelineResult<T>
where
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(task);

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                return Err(PipelineError::Timeout { stage, limit });
            }
        },
        None => handle.await,
    };

    joined.map_err(|e| PipelineError::Internal(format!("{} stage task failed: {}", stage, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSettings;
    use crate::core::domain::FeatureRow;
    use crate::core::run::RunStats;
    use crate::error::ErrorKind;
    use crate::io::manifest::{read_manifest, DATASET_FILE, MANIFEST_FILE};
    use crate::io::writer::WrittenArtifact;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Holds the Writing stage until released, then hands over to a real writer
    struct GatedSink {
        inner: DatasetWriter,
        release: Mutex<Receiver<()>>,
        done: Mutex<Sender<bool>>,
    }

    impl DatasetSink for GatedSink {
        fn publish(
            &self,
            rows: &[FeatureRow],
            settings: &FeatureSettings,
            stats: &RunStats,
            cancel: &AtomicBool,
        ) -> PipelineResult<WrittenArtifact> {
            let _ = self.release.lock().unwrap().recv();
            let result = self.inner.publish(rows, settings, stats, cancel);
            let _ = self.done.lock().unwrap().send(result.is_ok());
            result
        }
    }

    const RECORDS: &str = r#"{"subject_id": "A", "timestamp": "2024-01-01T08:00:00Z", "activity_type": "running", "duration_s": 1800, "load": 10}
{"subject_id": "A", "timestamp": "2024-01-02T08:00:00Z", "activity_type": "running", "duration_s": 1800, "load": 20}
{"subject_id": "A", "timestamp": "2024-01-03T08:00:00Z", "activity_type": "running", "duration_s": 1800, "load": 30}
{"subject_id": "B", "timestamp": "2024-01-01T09:00:00Z", "activity_type": "cycling", "duration_s": -5, "load": 50}
"#;

    fn config_for(source: &Path, destination: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.pipeline.source = source.display().to_string();
        config.pipeline.destination = destination.to_path_buf();
        config.features.rolling_window = 2;
        config
    }

    fn write_source(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_runner_rejects_invalid_config() {
        assert!(PipelineRunner::new(PipelineConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_successful_run() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "records.jsonl", RECORDS);
        let destination = dir.path().join("out");

        let runner = PipelineRunner::new(config_for(&source, &destination)).unwrap();
        let run = runner.run().await;

        assert!(run.is_success(), "failure: {:?}", run.failure());
        assert_eq!(
            run.history(),
            &[
                RunState::Idle,
                RunState::Loading,
                RunState::Validating,
                RunState::Transforming,
                RunState::Writing,
                RunState::Completed,
            ]
        );

        let stats = run.stats();
        assert_eq!(stats.read, 4);
        assert_eq!(stats.valid, 3);
        assert_eq!(stats.rejections.non_positive_duration, 1);
        assert!(stats.is_balanced());
        assert_eq!(run.feature_rows(), 3);
        assert_eq!(run.artifact(), Some(destination.as_path()));

        let manifest = read_manifest(&destination).unwrap();
        assert_eq!(manifest.row_count, 3);
        assert_eq!(manifest.counts, *stats);
        assert!(destination.join(DATASET_FILE).exists());
    }

    #[tokio::test]
    async fn test_missing_source_fails_in_loading() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out");
        let runner = PipelineRunner::new(config_for(
            &dir.path().join("absent.jsonl"),
            &destination,
        ))
        .unwrap();

        let run = runner.run().await;
        let failure = run.failure().unwrap();
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(failure.stage, RunState::Loading);
        assert_eq!(failure.kind, ErrorKind::SourceUnavailable);
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_empty_source_lenient_and_strict() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "empty.jsonl", "");

        let lenient_dest = dir.path().join("lenient");
        let run = PipelineRunner::new(config_for(&source, &lenient_dest))
            .unwrap()
            .run()
            .await;
        assert!(run.is_success());
        assert!(run.has_warning(ErrorKind::PipelineEmptyResult));
        assert_eq!(run.feature_rows(), 0);
        assert_eq!(read_manifest(&lenient_dest).unwrap().row_count, 0);

        let strict_dest = dir.path().join("strict");
        let mut config = config_for(&source, &strict_dest);
        config.pipeline.strict = true;
        let run = PipelineRunner::new(config).unwrap().run().await;
        let failure = run.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::PipelineEmptyResult);
        assert_eq!(failure.stage, RunState::Validating);
        assert!(!strict_dest.join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_unwritable_destination_fails_in_writing() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "records.jsonl", RECORDS);
        let blocker = write_source(&dir, "occupied", "file, not a directory");

        let run = PipelineRunner::new(config_for(&source, &blocker))
            .unwrap()
            .run()
            .await;
        let failure = run.failure().unwrap();
        assert_eq!(failure.stage, RunState::Writing);
        assert_eq!(failure.kind, ErrorKind::WriteFailure);
        // Counts gathered before the failure are kept
        assert_eq!(run.stats().valid, 3);
    }

    #[tokio::test]
    async fn test_write_timeout_fails_run_and_publishes_nothing() {
        let dir = TempDir::new().unwrap();
        let source = write_source(&dir, "records.jsonl", RECORDS);
        let destination = dir.path().join("out");
        let (release_tx, release_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let sink = GatedSink {
            inner: DatasetWriter::new(&destination),
            release: Mutex::new(release_rx),
            done: Mutex::new(done_tx),
        };

        let mut config = config_for(&source, &destination);
        config.pipeline.timeout = Some(Duration::from_millis(200));
        let run = PipelineRunner::new(config)
            .unwrap()
            .with_sink(Arc::new(sink))
            .run()
            .await;

        assert_eq!(run.state(), RunState::Failed);
        let failure = run.failure().unwrap();
        assert_eq!(failure.stage, RunState::Writing);
        assert_eq!(failure.kind, ErrorKind::Timeout);
        assert_eq!(run.stats().valid, 3);
        assert_eq!(run.artifact(), None);

        // The abandoned write sees the cancellation and publishes nothing
        release_tx.send(()).unwrap();
        let published = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(!published);
        assert!(!destination.join(DATASET_FILE).exists());
        assert!(!destination.join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_blocking_stage_timeout_sets_cancel() {
        let cancel = Arc::new(AtomicBool::new(false));
        let result = run_blocking_stage(
            RunState::Loading,
            Some(Duration::from_millis(20)),
            &cancel,
            || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("Loading"));
        assert!(cancel.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_blocking_stage_without_limit() {
        let cancel = Arc::new(AtomicBool::new(false));
        let value = run_blocking_stage(RunState::Transforming, None, &cancel, || Ok(7))
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(!cancel.load(Ordering::Relaxed));
    }
}
