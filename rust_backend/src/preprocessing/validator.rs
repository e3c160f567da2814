//! Record validation.
//!
//! Turns [`RawRecord`]s into [`ValidatedRecord`]s or classifies why they were
//! rejected. Checks run in a fixed order and the first failing one decides
//! the reason, so every rejected record is counted exactly once:
//!
//! 1. required fields present ([`RejectionReason::MissingRequiredField`])
//! 2. timestamp inside the plausible range ([`RejectionReason::OutOfRangeTimestamp`])
//! 3. duration strictly positive ([`RejectionReason::NonPositiveDuration`])
//! 4. activity label known ([`RejectionReason::UnknownActivityType`])

use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::ValidationSettings;
use crate::core::domain::{ActivityType, RawRecord, ValidatedRecord};
use crate::core::run::{RejectionReason, RunStats, RunWarning};
use crate::error::ErrorKind;

/// Why a single record was refused
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub sequence: u64,
    pub reason: RejectionReason,
    pub detail: String,
}

impl Rejection {
    fn new(sequence: u64, reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            sequence,
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}: {}", self.sequence, self.reason, self.detail)
    }
}

/// Accepted records plus the empty-result warning, if any
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub records: Vec<ValidatedRecord>,
    pub warning: Option<RunWarning>,
}

/// Validator for raw training records.
///
/// # Examples
///
/// ```
/// use training_analytics::config::ValidationSettings;
/// use training_analytics::core::domain::RawRecord;
/// use training_analytics::core::run::{RejectionReason, RunStats};
/// use training_analytics::preprocessing::validator::RecordValidator;
///
/// let validator = RecordValidator::new(&ValidationSettings::default());
/// let mut stats = RunStats::default();
///
/// let record = RawRecord {
///     sequence: 0,
///     subject_id: Some("athlete-1".to_string()),
///     timestamp: None,
///     activity_type: Some("running".to_string()),
///     duration_s: Some(1800.0),
///     load: Some(42.0),
///     metadata: Default::default(),
/// };
///
/// let rejection = validator.validate(record, &mut stats).unwrap_err();
/// assert_eq!(rejection.reason, RejectionReason::MissingRequiredField);
/// assert_eq!(stats.rejections.missing_required_field, 1);
/// ```
#[derive(Debug, Clone)]
pub struct RecordValidator {
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
}

impl RecordValidator {
    pub fn new(settings: &ValidationSettings) -> Self {
        Self {
            earliest: settings.earliest,
            latest: settings.latest,
        }
    }

    /// Validate one record and count the outcome on `stats`.
    pub fn validate(
        &self,
        record: RawRecord,
        stats: &mut RunStats,
    ) -> Result<ValidatedRecord, Rejection> {
        match self.check(record) {
            Ok(valid) => {
                stats.record_valid();
                Ok(valid)
            }
            Err(rejection) => {
                stats.record_rejection(rejection.reason);
                Err(rejection)
            }
        }
    }

    /// Validate every record, keeping accepted ones in input order.
    ///
    /// Zero accepted records yields a `PipelineEmptyResult` warning; whether
    /// that is fatal is up to the caller.
    pub fn validate_all<I>(&self, records: I, stats: &mut RunStats) -> ValidationOutcome
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut accepted = Vec::new();
        for record in records {
            match self.validate(record, stats) {
                Ok(valid) => accepted.push(valid),
                Err(rejection) => log::debug!("Rejected {}", rejection),
            }
        }

        if stats.rejected > 0 {
            log::info!(
                "Rejected {} of {} records ({} missing field, {} out of range, {} non-positive duration, {} unknown activity)",
                stats.rejected,
                stats.read,
                stats.rejections.missing_required_field,
                stats.rejections.out_of_range_timestamp,
                stats.rejections.non_positive_duration,
                stats.rejections.unknown_activity_type,
            );
        }

        let warning = accepted.is_empty().then(|| RunWarning {
            kind: ErrorKind::PipelineEmptyResult,
            message: format!("no valid records out of {} read", stats.read),
        });

        ValidationOutcome {
            records: accepted,
            warning,
        }
    }

    fn check(&self, record: RawRecord) -> Result<ValidatedRecord, Rejection> {
        let RawRecord {
            sequence,
            subject_id,
            timestamp,
            activity_type,
            duration_s,
            load,
            metadata,
        } = record;

        let missing = |field: &str| {
            Rejection::new(
                sequence,
                RejectionReason::MissingRequiredField,
                format!("missing {}", field),
            )
        };

        let subject_id = subject_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("subject_id"))?;
        let timestamp = timestamp.ok_or_else(|| missing("timestamp"))?;
        let label = activity_type.ok_or_else(|| missing("activity_type"))?;
        let duration_s = duration_s
            .filter(|d| d.is_finite())
            .ok_or_else(|| missing("duration_s"))?;
        let load = load
            .filter(|l| l.is_finite())
            .ok_or_else(|| missing("load"))?;

        if timestamp < self.earliest || timestamp > self.latest {
            return Err(Rejection::new(
                sequence,
                RejectionReason::OutOfRangeTimestamp,
                format!(
                    "{} outside [{}, {}]",
                    timestamp.to_rfc3339(),
                    self.earliest.to_rfc3339(),
                    self.latest.to_rfc3339()
                ),
            ));
        }

        if duration_s <= 0.0 {
            return Err(Rejection::new(
                sequence,
                RejectionReason::NonPositiveDuration,
                format!("duration_s = {}", duration_s),
            ));
        }

        let activity_type: ActivityType = label
            .parse()
            .map_err(|e: String| Rejection::new(sequence, RejectionReason::UnknownActivityType, e))?;

        Ok(ValidatedRecord::new(
            sequence,
            subject_id,
            timestamp,
            activity_type,
            duration_s,
            load,
            metadata,
        ))
    }
}
