use polars::prelude::DataFrame;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::domain::RawRecord;
use crate::error::{PipelineError, PipelineResult};
use crate::parsing::{csv_parser, record_parser};

/// Represents the on-disk format of a record source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    JsonLines,
    Csv,
}

impl SourceFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension().and_then(|ext| ext.to_str())?;
        match extension.to_lowercase().as_str() {
            "jsonl" | "ndjson" | "json" => Some(SourceFormat::JsonLines),
            "csv" => Some(SourceFormat::Csv),
            _ => None,
        }
    }
}

/// Where records are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Path(PathBuf),
    /// JSON Lines on standard input
    Stdin,
}

impl SourceRef {
    /// `-` selects standard input, anything else is a file path
    pub fn parse(location: &str) -> Self {
        match location.trim() {
            "-" => SourceRef::Stdin,
            other => SourceRef::Path(PathBuf::from(other)),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Path(path) => write!(f, "{}", path.display()),
            SourceRef::Stdin => f.write_str("<stdin>"),
        }
    }
}

enum StreamInput {
    Lines(Box<dyn BufRead + Send>),
    Table { frame: DataFrame, next_row: usize },
}

/// Lazy, single-pass sequence of [`RawRecord`]s.
///
/// Units that cannot be parsed are skipped and counted. An I/O error stops
/// the stream; [`RecordStream::finish`] reports it. A stream cannot be
/// rewound: load the source again to start over.
pub struct RecordStream {
    source: String,
    input: StreamInput,
    produced: u64,
    skipped: u64,
    failure: Option<String>,
    cancel: Option<Arc<AtomicBool>>,
    buffer: Vec<u8>,
}

impl RecordStream {
    fn new(source: String, input: StreamInput) -> Self {
        Self {
            source,
            input,
            produced: 0,
            skipped: 0,
            failure: None,
            cancel: None,
            buffer: Vec::new(),
        }
    }

    /// Stop yielding records once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Records yielded so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Units skipped as malformed so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Consume the stream, returning the skipped count or the I/O error that cut it short.
    pub fn finish(self) -> PipelineResult<u64> {
        match self.failure {
            Some(reason) => Err(PipelineError::source_unavailable(self.source, reason)),
            None => Ok(self.skipped),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn next_line(&mut self) -> Option<RawRecord> {
        loop {
            let StreamInput::Lines(reader) = &mut self.input else {
                return None;
            };

            self.buffer.clear();
            match reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("{}: read failed: {}", self.source, e);
                    self.failure = Some(e.to_string());
                    return None;
                }
            }

            let Ok(text) = std::str::from_utf8(&self.buffer) else {
                self.skip("line is not valid UTF-8");
                continue;
            };
            let line = text.trim();
            if line.is_empty() {
                continue;
            }

            match record_parser::parse_record_line(line, self.produced) {
                Ok(record) => return Some(record),
                Err(e) => self.skip(&format!("{:#}", e)),
            }
        }
    }

    fn next_row(&mut self) -> Option<RawRecord> {
        loop {
            let StreamInput::Table { frame, next_row } = &mut self.input else {
                return None;
            };
            if *next_row >= frame.height() {
                return None;
            }

            let row = *next_row;
            *next_row += 1;
            match csv_parser::row_to_record(frame, row, self.produced) {
                Ok(record) => return Some(record),
                Err(e) => self.skip(&format!("{:#}", e)),
            }
        }
    }

    fn skip(&mut self, reason: &str) {
        self.skipped += 1;
        log::debug!("{}: skipped malformed entry: {}", self.source, reason);
    }
}

impl Iterator for RecordStream {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failure.is_some() || self.is_cancelled() {
            return None;
        }

        let record = match self.input {
            StreamInput::Lines(_) => self.next_line(),
            StreamInput::Table { .. } => self.next_row(),
        };

        if record.is_some() {
            self.produced += 1;
        }
        record
    }
}

/// Unified interface for opening record sources
pub struct RecordLoader;

impl RecordLoader {
    /// Open a source, detecting the format from the file extension.
    ///
    /// Fails with [`PipelineError::SourceUnavailable`] when the source cannot
    /// be opened or its format is not supported.
    pub fn open(source: &SourceRef) -> PipelineResult<RecordStream> {
        match source {
            SourceRef::Stdin => Ok(Self::from_reader(
                source.to_string(),
                BufReader::new(io::stdin()),
            )),
            SourceRef::Path(path) => Self::open_path(path),
        }
    }

    /// Open a record file
    pub fn open_path(path: &Path) -> PipelineResult<RecordStream> {
        let location = path.display().to_string();
        let format = SourceFormat::from_path(path).ok_or_else(|| {
            PipelineError::source_unavailable(&location, "Unsupported file format")
        })?;

        match format {
            SourceFormat::JsonLines => {
                let file = File::open(path)
                    .map_err(|e| PipelineError::source_unavailable(&location, e))?;
                Ok(Self::from_reader(location, BufReader::new(file)))
            }
            SourceFormat::Csv => {
                let table = csv_parser::parse_record_csv(path)
                    .map_err(|e| PipelineError::source_unavailable(&location, format!("{:#}", e)))?;
                let mut stream = RecordStream::new(
                    location,
                    StreamInput::Table {
                        frame: table.frame,
                        next_row: 0,
                    },
                );
                stream.skipped = table.malformed;
                Ok(stream)
            }
        }
    }

    /// Read JSON Lines from an already-open stream
    pub fn from_reader<R>(name: impl Into<String>, reader: R) -> RecordStream
    where
        R: BufRead + Send + 'static,
    {
        RecordStream::new(name.into(), StreamInput::Lines(Box::new(reader)))
    }
}
