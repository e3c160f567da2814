//! Record loading and dataset publishing.
//!
//! [`loaders`] opens a record source and yields raw records lazily;
//! [`writer`] publishes the feature table and its [`manifest`].
//!
//! # Example
//!
//! ```no_run
//! use training_analytics::io::loaders::{RecordLoader, SourceRef};
//!
//! let stream = RecordLoader::open(&SourceRef::parse("records.jsonl"))
//!     .expect("Failed to open source");
//! let records: Vec<_> = stream.collect();
//! println!("Loaded {} records", records.len());
//! ```

pub mod loaders;
pub mod manifest;
pub mod writer;


pub use loaders::{RecordLoader, RecordStream, SourceFormat, SourceRef};
pub use manifest::{read_manifest, Manifest, SCHEMA_VERSION};
pub use writer::{read_dataset, DatasetSink, DatasetWriter, WrittenArtifact};
