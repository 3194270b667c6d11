//! Error taxonomy for the nexus engine.
//!
//! Two families, matching two different propagation policies: row-level
//! issues never abort a run and are collected into a
//! [`ValidationReport`]; configuration/engine issues are fatal and
//! returned as `Err`.

use chrono::NaiveDate;
use thiserror::Error;

/// Row-level problems encountered while normalizing transactions.
///
/// These never abort `compute`. The offending row is dropped and the
/// error is recorded as a warning in the [`ValidationReport`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("row {0}: missing required field {1}")]
    MissingField(usize, &'static str),

    #[error("row {0}: unrecognized jurisdiction code {1:?}")]
    UnknownJurisdiction(usize, String),

    #[error("row {0}: transaction date {1} is after the as-of date")]
    FutureDate(usize, NaiveDate),

    #[error("row {0}: negative sales amount")]
    NegativeAmount(usize),

    #[error("row {0}: exempt_amount exceeds sales_amount")]
    ExemptExceedsSales(usize),

    #[error("row {0}: unparseable transaction date {1:?}")]
    UnparseableDate(usize, String),

    #[error("row {0}: invalid numeric value for field {1}")]
    InvalidNumber(usize, &'static str),
}

/// Severity of a row reported in the [`ValidationReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One entry in the validation report surfaced to the caller. `row_index`
/// is `None` for findings that are not tied to a single input row, such
/// as a jurisdiction with no registered rule.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValidationEntry {
    pub row_index: Option<usize>,
    pub field: &'static str,
    pub message: String,
    pub severity: Severity,
}

/// Accumulated findings from normalization and computation. Never aborts
/// a run; the caller inspects `error_count()` to decide whether to halt.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationReport {
    pub entries: Vec<ValidationEntry>,
}

impl ValidationReport {
    pub fn push_error(&mut self, row_index: usize, field: &'static str, err: &RowError) {
        self.entries.push(ValidationEntry {
            row_index: Some(row_index),
            field,
            message: err.to_string(),
            severity: Severity::Error,
        });
    }

    pub fn push_warning(&mut self, row_index: usize, field: &'static str, message: impl Into<String>) {
        self.entries.push(ValidationEntry {
            row_index: Some(row_index),
            field,
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    /// Records an engine-level error (e.g. a jurisdiction with no
    /// registered rule) that is not tied to a single input row.
    pub fn push_engine_error(&mut self, err: &EngineError) {
        self.entries.push(ValidationEntry {
            row_index: None,
            field: "jurisdiction_code",
            message: err.to_string(),
            severity: Severity::Error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|e| e.severity == Severity::Error).count()
    }
}

/// Engine-level errors: missing rule data, invalid rule configuration, or
/// an arithmetic impossibility.
///
/// `RuleMissing` is surfaced through [`ValidationReport::push_engine_error`]
/// rather than aborting `compute`: the affected jurisdiction is skipped
/// and the caller decides, from the report, whether to halt or proceed
/// with the partial result set. `Configuration` and `Arithmetic` remain
/// fatal, returned as `Err` from [`crate::rules::RuleRegistry::load`] and
/// the calculation helpers respectively.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("no rule registered for jurisdiction {0:?}")]
    RuleMissing(String),

    #[error("invalid jurisdiction rule configuration for {jurisdiction:?}: {reason}")]
    Configuration { jurisdiction: String, reason: String },

    #[error("arithmetic error: {0}")]
    Arithmetic(String),
}
