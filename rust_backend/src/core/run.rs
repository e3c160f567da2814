//! State of a single pipeline run.
//!
//! A [`PipelineRun`] is created when orchestration starts, is advanced through
//! the stages strictly in order, and becomes read-only once it reaches
//! `Completed` or `Failed`. Counters live in [`RunStats`], which the
//! orchestrator lends to each stage by `&mut`; nothing here is shared between
//! runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError, PipelineResult};

/// Orchestrator states.
///
/// `Idle → Loading → Validating → Transforming → Writing → Completed`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Loading,
    Validating,
    Transforming,
    Writing,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Loading => "Loading",
            RunState::Validating => "Validating",
            RunState::Transforming => "Transforming",
            RunState::Writing => "Writing",
            RunState::Completed => "Completed",
            RunState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// The only state a successful run may move to from here
    pub fn successor(&self) -> Option<RunState> {
        match self {
            RunState::Idle => Some(RunState::Loading),
            RunState::Loading => Some(RunState::Validating),
            RunState::Validating => Some(RunState::Transforming),
            RunState::Transforming => Some(RunState::Writing),
            RunState::Writing => Some(RunState::Completed),
            RunState::Completed | RunState::Failed => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed taxonomy of per-record validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    OutOfRangeTimestamp,
    NonPositiveDuration,
    UnknownActivityType,
    MissingRequiredField,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 4] = [
        RejectionReason::OutOfRangeTimestamp,
        RejectionReason::NonPositiveDuration,
        RejectionReason::UnknownActivityType,
        RejectionReason::MissingRequiredField,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::OutOfRangeTimestamp => "OutOfRangeTimestamp",
            RejectionReason::NonPositiveDuration => "NonPositiveDuration",
            RejectionReason::UnknownActivityType => "UnknownActivityType",
            RejectionReason::MissingRequiredField => "MissingRequiredField",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-reason rejection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub out_of_range_timestamp: u64,
    pub non_positive_duration: u64,
    pub unknown_activity_type: u64,
    pub missing_required_field: u64,
}

impl RejectionCounts {
    pub fn get(&self, reason: RejectionReason) -> u64 {
        match reason {
            RejectionReason::OutOfRangeTimestamp => self.out_of_range_timestamp,
            RejectionReason::NonPositiveDuration => self.non_positive_duration,
            RejectionReason::UnknownActivityType => self.unknown_activity_type,
            RejectionReason::MissingRequiredField => self.missing_required_field,
        }
    }

    pub fn increment(&mut self, reason: RejectionReason) {
        let counter = match reason {
            RejectionReason::OutOfRangeTimestamp => &mut self.out_of_range_timestamp,
            RejectionReason::NonPositiveDuration => &mut self.non_positive_duration,
            RejectionReason::UnknownActivityType => &mut self.unknown_activity_type,
            RejectionReason::MissingRequiredField => &mut self.missing_required_field,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u64 {
        RejectionReason::ALL.iter().map(|reason| self.get(*reason)).sum()
    }
}

/// Record counts gathered over a run.
///
/// `read` counts records the loader produced; lines it could not parse at all
/// are counted in `skipped` and never reach the validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub read: u64,
    pub skipped: u64,
    pub valid: u64,
    pub rejected: u64,
    pub rejections: RejectionCounts,
}

impl RunStats {
    pub fn record_loaded(&mut self, read: u64, skipped: u64) {
        self.read += read;
        self.skipped += skipped;
    }

    pub fn record_valid(&mut self) {
        self.valid += 1;
    }

    pub fn record_rejection(&mut self, reason: RejectionReason) {
        self.rejected += 1;
        self.rejections.increment(reason);
    }

    /// Every record read was either accepted or rejected for exactly one reason
    pub fn is_balanced(&self) -> bool {
        self.rejections.total() == self.rejected && self.read == self.valid + self.rejected
    }
}

/// A non-fatal condition recorded on a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWarning {
    pub kind: ErrorKind,
    pub message: String,
}

/// Where and why a run stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub stage: RunState,
    pub kind: ErrorKind,
    pub message: String,
}

/// One end-to-end execution of the pipeline against one source.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    run_id: Uuid,
    source: String,
    destination: PathBuf,
    state: RunState,
    history: Vec<RunState>,
    stats: RunStats,
    warnings: Vec<RunWarning>,
    failure: Option<RunFailure>,
    feature_rows: usize,
    artifact: Option<PathBuf>,
}

impl PipelineRun {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source: source.into(),
            destination: destination.into(),
            state: RunState::Idle,
            history: vec![RunState::Idle],
            stats: RunStats::default(),
            warnings: Vec::new(),
            failure: None,
            feature_rows: 0,
            artifact: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state the run has entered, in order, starting with `Idle`
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn feature_rows(&self) -> usize {
        self.feature_rows
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn has_warning(&self, kind: ErrorKind) -> bool {
        self.warnings.iter().any(|warning| warning.kind == kind)
    }

    /// Move to the next stage. Skipping or repeating a stage is an error.
    pub fn advance(&mut self, next: RunState) -> PipelineResult<()> {
        if self.state.successor() != Some(next) {
            return Err(PipelineError::Internal(format!(
                "illegal transition {} -> {}",
                self.state, next
            )));
        }
        self.enter(next);
        Ok(())
    }

    /// Counters are only writable while the run is in flight.
    pub fn stats_mut(&mut self) -> PipelineResult<&mut RunStats> {
        self.ensure_active()?;
        Ok(&mut self.stats)
    }

    pub fn warn(&mut self, warning: RunWarning) -> PipelineResult<()> {
        self.ensure_active()?;
        log::warn!("run {}: {}: {}", self.run_id, warning.kind, warning.message);
        self.warnings.push(warning);
        Ok(())
    }

    pub fn set_feature_rows(&mut self, rows: usize) -> PipelineResult<()> {
        self.ensure_active()?;
        self.feature_rows = rows;
        Ok(())
    }

    pub fn set_artifact(&mut self, path: PathBuf) -> PipelineResult<()> {
        self.ensure_active()?;
        self.artifact = Some(path);
        Ok(())
    }

    /// Record the error against the current stage and move to `Failed`.
    ///
    /// A run that already reached a terminal state keeps its outcome.
    pub fn fail(&mut self, error: &PipelineError) {
        if self.state.is_terminal() {
            return;
        }
        self.failure = Some(RunFailure {
            stage: self.state,
            kind: error.kind(),
            message: error.to_string(),
        });
        self.enter(RunState::Failed);
    }

    fn enter(&mut self, next: RunState) {
        log::debug!("run {}: {} -> {}", self.run_id, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn ensure_active(&self) -> PipelineResult<()> {
        if self.state.is_terminal() {
            return Err(PipelineError::Internal(format!(
                "run {} is already {}",
                self.run_id, self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_to(run: &mut PipelineRun, target: RunState) {
        while run.state() != target {
            let next = run.state().successor().unwrap();
            run.advance(next).unwrap();
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = PipelineRun::new("a.jsonl", "/tmp/out");
        advance_to(&mut run, RunState::Completed);
        assert!(run.is_success());
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
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let mut run = PipelineRun::new("a.jsonl", "/tmp/out");
        let err = run.advance(RunState::Validating).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(run.state(), RunState::Idle);
    }

    #[test]
    fn test_fail_records_stage_and_kind() {
        for stage in [
            RunState::Idle,
            RunState::Loading,
            RunState::Validating,
            RunState::Transforming,
            RunState::Writing,
        ] {
            let mut run = PipelineRun::new("a.jsonl", "/tmp/out");
            advance_to(&mut run, stage);
            run.fail(&PipelineError::EmptyResult);

            let failure = run.failure().unwrap();
            assert_eq!(run.state(), RunState::Failed);
            assert_eq!(failure.stage, stage);
            assert_eq!(failure.kind, ErrorKind::PipelineEmptyResult);
        }
    }

    #[test]
    fn test_terminal_run_is_frozen() {
        let mut run = PipelineRun::new("a.jsonl", "/tmp/out");
        advance_to(&mut run, RunState::Loading);
        run.fail(&PipelineError::source_unavailable("a.jsonl", "gone"));

        assert!(run.stats_mut().is_err());
        assert!(run.set_feature_rows(3).is_err());
        assert!(run.advance(RunState::Validating).is_err());

        // A second failure does not overwrite the first
        run.fail(&PipelineError::EmptyResult);
        assert_eq!(run.failure().unwrap().kind, ErrorKind::SourceUnavailable);
        assert_eq!(run.failure().unwrap().stage, RunState::Loading);
    }

    #[test]
    fn test_stats_balance() {
        let mut stats = RunStats::default();
        stats.record_loaded(4, 1);
        stats.record_valid();
        stats.record_valid();
        stats.record_rejection(RejectionReason::NonPositiveDuration);
        stats.record_rejection(RejectionReason::UnknownActivityType);

        assert!(stats.is_balanced());
        assert_eq!(stats.rejections.total(), 2);
        assert_eq!(stats.rejections.get(RejectionReason::NonPositiveDuration), 1);
        assert_eq!(stats.skipped, 1);
    }
}
