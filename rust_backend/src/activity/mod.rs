//! Single-activity consolidation.
//!
//! Combines a device export (activity summary, laps and raw sample streams)
//! into one [`TrainingSummary`] with a cleaned, upsampled heart-rate series
//! per lap.
//!
//! # Modules
//!
//! - [`export`]: Input file models and loading
//! - [`heart_rate`]: Series cleaning and interpolation
//! - [`summary`]: Consolidation and JSON export
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use training_analytics::activity::{ActivityConsolidator, ActivityExport, ConsolidationSettings};
//!
//! # fn example() -> training_analytics::activity::ActivityResult<()> {
//! let export = ActivityExport::load(
//!     Path::new("data/summary.json"),
//!     Path::new("data/laps.json"),
//!     Path::new("data/samples.json"),
//! )?;
//! let consolidator = ActivityConsolidator::new(ConsolidationSettings::default())?;
//! let summary = consolidator.consolidate(&export);
//! training_analytics::activity::export_summary(&summary, Path::new("data/training_summary.json"))?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod export;
pub mod heart_rate;
pub mod summary;


pub use export::{ActivityExport, ActivitySummary, LapData, SampleData};
pub use summary::{
    export_summary, ActivityConsolidator, ConsolidationSettings, HeartRateSample, Lap,
    TrainingSummary,
};

/// Result type for activity consolidation
pub type ActivityResult<T> = Result<T, ActivityError>;

#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid consolidation settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
}
