//! Feature computation over validated records.
//!
//! # Modules
//!
//! - [`features`]: Group records by subject and time bucket into feature rows
//! - [`rolling`]: Trailing-window mean and trend helpers
//!
//! # Example
//!
//! ```no_run
//! use training_analytics::config::FeatureSettings;
//! use training_analytics::transformations::FeatureTransformer;
//!
//! # fn example(records: Vec<training_analytics::core::ValidatedRecord>) {
//! let transformer = FeatureTransformer::new(&FeatureSettings::default())
//!     .expect("default settings are valid");
//! let rows = transformer.transform(records);
//! println!("{} feature rows", rows.len());
//! # }
//! ```

pub mod features;
pub mod rolling;

pub use features::{bucket_start, FeatureTransformer};
