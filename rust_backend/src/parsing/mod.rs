//! Parsers for raw training record formats.
//!
//! This module turns individual units of source input into [`RawRecord`]s:
//! one JSON object per line for JSON Lines sources, one row per record for CSV.
//! Neither parser validates domain constraints; that is the validator's job.
//!
//! # Parsers
//!
//! - [`record_parser`]: Parse a JSON Lines entry
//! - [`csv_parser`]: Parse CSV record files via Polars
//!
//! # Example
//!
//! ```
//! use training_analytics::parsing::record_parser::parse_record_line;
//!
//! let line = r#"{"subject_id": "A", "timestamp": "2024-01-01T08:00:00Z",
//!     "activity_type": "running", "duration_s": 1800, "load": 42.5}"#;
//! let record = parse_record_line(line, 0).expect("Failed to parse record");
//! assert_eq!(record.subject_id.as_deref(), Some("A"));
//! ```
//!
//! [`RawRecord`]: crate::core::domain::RawRecord

pub mod csv_parser;
pub mod record_parser;

#[cfg(test)]
mod csv_parser_tests;

pub use record_parser::{parse_record_line, parse_timestamp_text};
