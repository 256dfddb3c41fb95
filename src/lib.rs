//! Sepsis Flux - Hourly ICU feature matrix with retrospective sepsis labels
//!
//! Flux transforms irregular clinical event feeds into one row per ICU stay
//! and clock hour through a deterministic pipeline: cohort selection →
//! per-source hourly reduction → source merge → onset labeling → row assembly.
//!
//! ## Modules
//!
//! - **Pipeline**: cohort batching and per-stay stages on a worker pool
//! - **Schema**: input feeds (CSV / NDJSON / in-memory) and their records
//! - **Encoder**: output sinks with a fixed column layout
//! - **Report**: label and antibiotic aggregates over the final table

pub mod antibiotics;
pub mod assembler;
pub mod cohort;
pub mod config;
pub mod encoder;
pub mod error;
pub mod label;
pub mod merger;
pub mod pipeline;
pub mod reducer;
pub mod report;
pub mod schema;
pub mod types;
pub mod variables;

pub use config::PipelineConfig;
pub use encoder::{output_columns, CsvSink, MemorySink, NdjsonSink, RowSink};
pub use error::{PipelineError, RowError};
pub use pipeline::{process_to_rows, Pipeline, RunSummary, StayProcessor};
pub use report::LabelReport;
pub use schema::{FeedFormat, FeedPaths, FileSource, MemorySource, TabularSource};
pub use types::{HourlyFeatureRow, Stay, WindowKey};
pub use variables::Variable;

/// Crate version reported by the CLI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name
pub const PRODUCER_NAME: &str = "sepsis-flux";
