//! Training activity analytics.
//!
//! Loads per-subject training records, validates them, aggregates them into
//! time-bucketed feature rows and publishes the result as a Parquet dataset
//! with a manifest. A separate consolidator turns a single device export into
//! a per-lap heart-rate summary.
//!
//! # Example
//!
//! ```no_run
//! use training_analytics::{PipelineConfig, PipelineRunner};
//!
//! # async fn example() -> training_analytics::PipelineResult<()> {
//! let mut config = PipelineConfig::default();
//! config.pipeline.source = "data/records.jsonl".to_string();
//! config.pipeline.destination = "data/features".into();
//!
//! let run = PipelineRunner::new(config)?.run().await;
//! println!("{} -> {}", run.run_id(), run.state());
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod parsing;
pub mod preprocessing;
pub mod transformations;

pub use config::PipelineConfig;
pub use core::{FeatureRow, PipelineRun, RunState, RunStats};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use preprocessing::PipelineRunner;
