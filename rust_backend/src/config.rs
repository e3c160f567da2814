//! Pipeline configuration file support.
//!
//! Configuration is read from a TOML file with three sections. Every field
//! has a default, so an empty file is a valid (if incomplete) configuration;
//! the command line fills in or overrides `source` and `destination`.
//!
//! ```toml
//! [pipeline]
//! source = "data/records.jsonl"
//! destination = "data/features"
//! strict = false
//! timeout = "5m"
//!
//! [features]
//! bucket_width = "1d"
//! rolling_window = 7
//! parallel = true
//!
//! [validation]
//! earliest = "2000-01-01T00:00:00Z"
//! latest = "2100-01-01T00:00:00Z"
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

/// Full pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub features: FeatureSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
}

/// Input, output and run policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Record file path, or `-` for standard input
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: PathBuf,
    /// Treat an empty result as fatal
    #[serde(default)]
    pub strict: bool,
    /// Limit for the loading and writing stages
    #[serde(default = "default_timeout", with = "duration_format::option")]
    pub timeout: Option<Duration>,
}

/// Feature transformer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSettings {
    #[serde(default = "default_bucket_width", with = "duration_format")]
    pub bucket_width: Duration,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

/// Plausible timestamp range, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_earliest")]
    pub earliest: DateTime<Utc>,
    #[serde(default = "default_latest")]
    pub latest: DateTime<Utc>,
}

fn default_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_bucket_width() -> Duration {
    Duration::from_secs(86_400)
}

fn default_rolling_window() -> usize {
    7
}

fn default_parallel() -> bool {
    true
}

fn default_earliest() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn default_latest() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            source: String::new(),
            destination: PathBuf::new(),
            strict: false,
            timeout: default_timeout(),
        }
    }
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            bucket_width: default_bucket_width(),
            rolling_window: default_rolling_window(),
            parallel: default_parallel(),
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            earliest: default_earliest(),
            latest: default_latest(),
        }
    }
}

impl FeatureSettings {
    /// Bucket width in whole seconds
    pub fn bucket_width_secs(&self) -> u64 {
        self.bucket_width.as_secs()
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Ok(PipelineConfig)` if successful
    /// * `Err(PipelineError::Configuration)` if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> PipelineResult<Self> {
        toml::from_str(content).map_err(|e| {
            PipelineError::Configuration(format!("Failed to parse config file: {}", e))
        })
    }

    /// Load configuration from the default location, if one exists.
    ///
    /// Searches for `pipeline.toml` in:
    /// 1. Current directory
    /// 2. `config/` directory
    /// 3. Parent directory
    ///
    /// # Returns
    /// * `Ok(Some(PipelineConfig))` if found and parsed successfully
    /// * `Ok(None)` if no file exists in any of the standard locations
    /// * `Err(PipelineError)` if a file was found but could not be parsed
    pub fn from_default_location() -> PipelineResult<Option<Self>> {
        let search_paths = [
            PathBuf::from(DEFAULT_CONFIG_FILE),
            PathBuf::from("config").join(DEFAULT_CONFIG_FILE),
            PathBuf::from("..").join(DEFAULT_CONFIG_FILE),
        ];

        for path in search_paths {
            if path.exists() {
                log::info!("Using configuration from {}", path.display());
                return Self::from_file(&path).map(Some);
            }
        }

        Ok(None)
    }

    /// Check that the configuration describes a runnable pipeline.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.pipeline.source.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "pipeline requires a 'source' setting".to_string(),
            ));
        }

        if self.pipeline.destination.as_os_str().is_empty() {
            return Err(PipelineError::Configuration(
                "pipeline requires a 'destination' setting".to_string(),
            ));
        }

        if self.features.bucket_width_secs() == 0 {
            return Err(PipelineError::Configuration(
                "bucket_width must be at least one second".to_string(),
            ));
        }

        if self.features.rolling_window == 0 {
            return Err(PipelineError::Configuration(
                "rolling_window must be at least 1".to_string(),
            ));
        }

        if self.validation.earliest > self.validation.latest {
            return Err(PipelineError::Configuration(format!(
                "validation range is empty: {} > {}",
                self.validation.earliest, self.validation.latest
            )));
        }

        if self.pipeline.timeout == Some(Duration::ZERO) {
            return Err(PipelineError::Configuration(
                "timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a duration such as `"1d"`, `"12h"`, `"30m"`, `"45s"` or `"90"`.
///
/// A bare number is taken as seconds. Units may be combined (`"1h30m"`).
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }

    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in trimmed.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return Err(format!("invalid duration unit '{}' in '{}'", c, text)),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{}' in '{}'", c, text))?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("duration '{}' is too large", text))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("trailing number without unit in '{}'", text));
    }

    Ok(Duration::from_secs(total))
}

/// Render a duration in the largest unit that divides it exactly.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0 => "0s".to_string(),
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

/// Serde helpers accepting either a duration string or whole seconds
pub mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrSeconds {
        Seconds(u64),
        Text(String),
    }

    fn resolve(value: StringOrSeconds) -> Result<Duration, String> {
        match value {
            StringOrSeconds::Seconds(secs) => Ok(Duration::from_secs(secs)),
            StringOrSeconds::Text(text) => super::parse_duration(&text),
        }
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        use serde::de::Error;
        resolve(StringOrSeconds::deserialize(deserializer)?).map_err(D::Error::custom)
    }

    /// `"off"`, `"none"` or `0` disable the limit
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_str("off"),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            use serde::de::Error;
            match StringOrSeconds::deserialize(deserializer)? {
                StringOrSeconds::Text(text)
                    if matches!(text.trim().to_lowercase().as_str(), "off" | "none") =>
                {
                    Ok(None)
                }
                StringOrSeconds::Seconds(0) => Ok(None),
                other => resolve(other).map(Some).map_err(D::Error::custom),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[pipeline]
source = "data/records.jsonl"
destination = "data/features"
strict = true
timeout = "30s"

[features]
bucket_width = "12h"
rolling_window = 3
parallel = false

[validation]
earliest = "2020-01-01T00:00:00Z"
latest = "2030-01-01T00:00:00Z"
"#;

        let config = PipelineConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.pipeline.source, "data/records.jsonl");
        assert_eq!(config.pipeline.destination, PathBuf::from("data/features"));
        assert!(config.pipeline.strict);
        assert_eq!(config.pipeline.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.features.bucket_width_secs(), 43_200);
        assert_eq!(config.features.rolling_window, 3);
        assert!(!config.features.parallel);
        assert_eq!(config.validation.earliest.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let toml = r#"
[pipeline]
source = "records.csv"
destination = "out"
"#;

        let config = PipelineConfig::from_toml_str(toml).unwrap();
        assert!(!config.pipeline.strict);
        assert_eq!(config.pipeline.timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.features, FeatureSettings::default());
        assert_eq!(config.features.bucket_width_secs(), 86_400);
        assert_eq!(config.features.rolling_window, 7);
        assert_eq!(config.validation, ValidationSettings::default());
    }

    #[test]
    fn test_timeout_can_be_disabled() {
        let config = PipelineConfig::from_toml_str("[pipeline]\ntimeout = \"off\"\n").unwrap();
        assert_eq!(config.pipeline.timeout, None);

        let config = PipelineConfig::from_toml_str("[pipeline]\ntimeout = 0\n").unwrap();
        assert_eq!(config.pipeline.timeout, None);
    }

    #[test]
    fn test_validate_requires_source_and_destination() {
        let mut config = PipelineConfig::default();
        assert!(config.validate().is_err());

        config.pipeline.source = "records.jsonl".to_string();
        assert!(config.validate().is_err());

        config.pipeline.destination = PathBuf::from("out");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_degenerate_features() {
        let mut config = PipelineConfig::default();
        config.pipeline.source = "records.jsonl".to_string();
        config.pipeline.destination = PathBuf::from("out");

        config.features.rolling_window = 0;
        assert!(config.validate().is_err());

        config.features.rolling_window = 7;
        config.features.bucket_width = Duration::from_millis(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = PipelineConfig::from_toml_str("[features]\nbucket_width = \"1w\"\n").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1d"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("6h"), Ok(Duration::from_secs(21_600)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5_400)));
        assert_eq!(parse_duration("90"), Ok(Duration::from_secs(90)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10").is_ok());
        assert!(parse_duration("1d2").is_err());
        assert!(parse_duration("3w").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(86_400)), "1d");
        assert_eq!(format_duration(Duration::from_secs(7_200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
    }
}
