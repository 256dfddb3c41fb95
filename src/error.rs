//! Error types for Sepsis Flux

use thiserror::Error;

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feed '{feed}' is missing required columns: {}", columns.join(", "))]
    MissingColumns { feed: String, columns: Vec<String> },

    #[error("Unsupported feed format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Batch buffered {buffered} events, above the ceiling of {ceiling}")]
    MemoryCeilingExceeded { buffered: usize, ceiling: usize },

    #[error("Worker pool error: {0}")]
    ThreadPool(String),

    #[error("Invalid row {line} in output file: {error}")]
    InvalidOutputRow { line: usize, error: RowError },
}

/// Row-level failures. These never abort a run: the row is skipped and counted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("Invalid timestamp in '{column}': {value}")]
    InvalidTimestamp { column: String, value: String },

    #[error("Timestamp out of range in '{column}': {value}")]
    TimestampOutOfRange { column: String, value: String },

    #[error("Invalid number in '{column}': {value}")]
    InvalidNumber { column: String, value: String },

    #[error("Empty value in '{0}'")]
    EmptyValue(String),

    #[error("Malformed row: {0}")]
    Malformed(String),
}
