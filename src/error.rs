// ⚠️ Pipeline Errors
// One taxonomy for every stage: ingestion, alignment, growth, prediction, storage

use crate::period::Frequency;
use thiserror::Error;

/// Errors raised by the indicator pipeline.
///
/// Null results in growth arithmetic (missing previous period, division by
/// zero) are NOT errors and never show up here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source has no usable timestamp or value column
    #[error("malformed source for indicator '{indicator}': {reason}")]
    MalformedSource { indicator: String, reason: String },

    /// Series or table at the wrong frequency for the requested operation
    #[error("frequency mismatch in {context}: expected {expected}, found {found}")]
    FrequencyMismatch {
        context: String,
        expected: Frequency,
        found: Frequency,
    },

    /// Too few observations to fit a model
    #[error("insufficient data for {context}: need at least {required}, got {actual}")]
    InsufficientData {
        context: String,
        required: usize,
        actual: usize,
    },

    /// Forecasting capability is not compiled in or disabled
    #[error("forecast unavailable: {0}")]
    ForecastUnavailable(String),

    #[error("invalid input for {context}: {reason}")]
    InvalidInput { context: String, reason: String },

    #[error("storage error on table '{table}': {source}")]
    Storage {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn malformed(indicator: &str, reason: impl Into<String>) -> Self {
        PipelineError::MalformedSource {
            indicator: indicator.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(context: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::InvalidInput {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a rusqlite error with the table it happened on
    pub fn storage(table: &str, source: rusqlite::Error) -> Self {
        PipelineError::Storage {
            table: table.to_string(),
            source,
        }
    }

    /// Short machine-friendly kind, used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedSource { .. } => "malformed_source",
            PipelineError::FrequencyMismatch { .. } => "frequency_mismatch",
            PipelineError::InsufficientData { .. } => "insufficient_data",
            PipelineError::ForecastUnavailable(_) => "forecast_unavailable",
            PipelineError::InvalidInput { .. } => "invalid_input",
            PipelineError::Storage { .. } | PipelineError::Sqlite(_) => "storage",
            PipelineError::Io(_) => "io",
            PipelineError::Csv(_) => "csv",
            PipelineError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
