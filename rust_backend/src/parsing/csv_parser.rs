use anyhow::{Context, Result};
use polars::prelude::*;
use std::io::Cursor;
use std::path::Path;

use crate::core::domain::{Metadata, MetadataValue, RawRecord};
use crate::parsing::record_parser::parse_timestamp_text;

/// Columns mapped onto [`RawRecord`] fields; every other column is metadata
pub const RECORD_COLUMNS: [&str; 5] = [
    "subject_id",
    "timestamp",
    "activity_type",
    "duration_s",
    "load",
];

/// Record table read from a CSV file
#[derive(Debug)]
pub struct CsvTable {
    /// One string column per CSV column
    pub frame: DataFrame,
    /// Rows dropped because they could not be read at all
    pub malformed: u64,
}

fn read_options() -> CsvReadOptions {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|options| options.with_truncate_ragged_lines(true))
}

fn read_frame(bytes: Vec<u8>) -> Result<DataFrame> {
    read_options()
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .context("Failed to parse CSV into DataFrame")
}

/// Parse a record CSV file into a Polars DataFrame of string columns.
///
/// Every column is read as text so that a bad cell only affects its own row:
/// type coercion happens per row in [`row_to_record`]. Rows with too many or
/// too few fields are truncated or padded with nulls.
///
/// When Polars rejects the file as a whole (a row with invalid UTF-8, an
/// unbalanced quote), the file is read again one line at a time and the
/// lines that still fail are counted in [`CsvTable::malformed`]. In that mode
/// a quoted field cannot span lines.
pub fn parse_record_csv(csv_path: &Path) -> Result<CsvTable> {
    let bytes = std::fs::read(csv_path)
        .with_context(|| format!("Failed to read {}", csv_path.display()))?;
    if bytes.is_empty() {
        return Ok(CsvTable {
            frame: DataFrame::empty(),
            malformed: 0,
        });
    }

    match read_frame(bytes.clone()) {
        Ok(frame) => Ok(CsvTable {
            frame,
            malformed: 0,
        }),
        Err(e) => {
            log::warn!("{}: {:#}; reading line by line", csv_path.display(), e);
            parse_lines(&bytes)
        }
    }
}

fn parse_lines(bytes: &[u8]) -> Result<CsvTable> {
    let mut lines = bytes.split(|b| *b == b'\n');
    let header = lines.next().unwrap_or_default();

    let mut frame: Option<DataFrame> = None;
    let mut malformed = 0;
    for line in lines {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let mut document = Vec::with_capacity(header.len() + line.len() + 1);
        document.extend_from_slice(header);
        document.push(b'\n');
        document.extend_from_slice(line);

        match read_frame(document) {
            Ok(row) if row.height() == 1 => match frame.as_mut() {
                Some(frame) => {
                    frame.vstack_mut(&row)?;
                }
                None => frame = Some(row),
            },
            _ => malformed += 1,
        }
    }

    let frame = match frame {
        Some(frame) => frame,
        None => read_frame(header.to_vec()).context("Failed to parse CSV header")?,
    };
    Ok(CsvTable { frame, malformed })
}

fn cell<'a>(df: &'a DataFrame, name: &str, row: usize) -> Option<&'a str> {
    df.column(name)
        .ok()?
        .str()
        .ok()?
        .get(row)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn number_cell(df: &DataFrame, name: &str, row: usize) -> Result<Option<f64>> {
    cell(df, name, row)
        .map(|text| {
            text.parse::<f64>()
                .with_context(|| format!("Invalid {} '{}' at row {}", name, text, row))
        })
        .transpose()
}

/// Convert one DataFrame row into a [`RawRecord`].
///
/// Empty cells become `None`; a cell that is present but cannot be coerced
/// to its field type makes the whole row an error.
pub fn row_to_record(df: &DataFrame, row: usize, sequence: u64) -> Result<RawRecord> {
    let timestamp = cell(df, "timestamp", row)
        .map(parse_timestamp_text)
        .transpose()
        .with_context(|| format!("Invalid timestamp at row {}", row))?;

    let mut metadata = Metadata::new();
    for column in df.get_column_names() {
        let name = column.as_str();
        if RECORD_COLUMNS.contains(&name) {
            continue;
        }
        if let Some(value) = cell(df, name, row) {
            metadata.insert(name.to_string(), MetadataValue::from_text(value));
        }
    }

    Ok(RawRecord {
        sequence,
        subject_id: cell(df, "subject_id", row).map(str::to_string),
        timestamp,
        activity_type: cell(df, "activity_type", row).map(str::to_string),
        duration_s: number_cell(df, "duration_s", row)?,
        load: number_cell(df, "load", row)?,
        metadata,
    })
}
