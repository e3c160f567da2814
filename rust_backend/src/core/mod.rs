//! Core domain models for training analytics.
//!
//! This module defines the fundamental data structures used throughout the pipeline,
//! representing raw and validated training records, feature rows, and the state of
//! a single pipeline run.

pub mod domain;
pub mod run;

pub use domain::{ActivityType, FeatureRow, Metadata, MetadataValue, RawRecord, ValidatedRecord};
pub use run::{PipelineRun, RejectionCounts, RejectionReason, RunFailure, RunState, RunStats, RunWarning};
