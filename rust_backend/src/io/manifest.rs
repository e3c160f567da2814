//! Dataset manifest.
//!
//! The manifest sits next to the dataset file and is the only thing a
//! consumer needs to read to decide whether it understands the artifact.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::run::RunStats;
use crate::error::{PipelineError, PipelineResult};

/// Version of the feature table layout. Bump on any column change.
pub const SCHEMA_VERSION: u32 = 1;
pub const DATASET_FILE: &str = "features.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Name and logical type of one dataset column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: String,
}

impl ColumnSpec {
    fn new(name: &str, dtype: &str) -> Self {
        Self {
            name: name.to_string(),
            dtype: dtype.to_string(),
        }
    }
}

/// Columns of the feature table, in file order
pub fn feature_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("subject_id", "str"),
        ColumnSpec::new("bucket_start", "i64"),
        ColumnSpec::new("record_count", "u32"),
        ColumnSpec::new("total_duration_s", "f64"),
        ColumnSpec::new("total_load", "f64"),
        ColumnSpec::new("mean_load", "f64"),
        ColumnSpec::new("rolling_mean_load", "f64"),
        ColumnSpec::new("load_trend", "f64"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub columns: Vec<ColumnSpec>,
    pub bucket_width_s: u64,
    pub rolling_window: usize,
    pub row_count: usize,
    pub counts: RunStats,
    pub dataset_file: String,
    pub dataset_sha256: String,
}

impl Manifest {
    /// Fail unless the artifact was written with the `supported` schema version.
    pub fn check_compatible(&self, supported: u32) -> PipelineResult<()> {
        if self.schema_version != supported {
            return Err(PipelineError::InvalidArtifact(format!(
                "schema version {} is not supported (expected {})",
                self.schema_version, supported
            )));
        }
        Ok(())
    }

    pub fn to_json_bytes(&self) -> PipelineResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| PipelineError::Internal(format!("Failed to serialize manifest: {}", e)))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Read `manifest.json` from an artifact directory
pub fn read_manifest(dir: &Path) -> PipelineResult<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let content = fs::read(&path).map_err(|e| {
        PipelineError::InvalidArtifact(format!("Failed to read {}: {}", path.display(), e))
    })?;

    serde_json::from_slice(&content).map_err(|e| {
        PipelineError::InvalidArtifact(format!("Failed to parse {}: {}", path.display(), e))
    })
}
