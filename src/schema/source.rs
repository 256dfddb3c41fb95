//! Tabular sources
//!
//! The pipeline consumes four feeds through the [`TabularSource`] trait. Each
//! call opens a fresh pass over the feed, so a source can be streamed once per
//! batch of stays instead of being held in memory.

use crate::error::{PipelineError, RowError};
use crate::schema::records::*;
use crate::types::{AntibioticAdministration, SepsisCandidate};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Outcome of reading one row: `Err` on the outer level aborts the run,
/// `Err` on the inner level skips the row.
pub type RowItem<T> = Result<Result<T, RowError>, PipelineError>;

/// Stream of rows from one pass over a feed
pub type RowStream<'a, T> = Box<dyn Iterator<Item = RowItem<T>> + 'a>;

/// Abstract tabular event source
pub trait TabularSource {
    fn admissions(&self) -> Result<RowStream<'_, Admission>, PipelineError>;
    fn events(&self) -> Result<RowStream<'_, ChartEvent>, PipelineError>;
    fn antibiotics(&self) -> Result<RowStream<'_, AntibioticAdministration>, PipelineError>;
    fn sepsis(&self) -> Result<RowStream<'_, SepsisCandidate>, PipelineError>;

    /// Check that every feed declares its required columns without reading
    /// rows. Runs before the cohort is built, so a malformed feed aborts the
    /// run even when no stay is eligible.
    fn check_schema(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// On-disk feed format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// Comma-separated with a header row
    Csv,
    /// Newline-delimited JSON objects
    Ndjson,
}

impl FeedFormat {
    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(FeedFormat::Csv),
            Some("ndjson") | Some("jsonl") => Ok(FeedFormat::Ndjson),
            _ => Err(PipelineError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Paths of the four input feeds
#[derive(Debug, Clone)]
pub struct FeedPaths {
    pub stays: PathBuf,
    pub events: PathBuf,
    pub antibiotics: PathBuf,
    pub sepsis: PathBuf,
}

impl FeedPaths {
    pub fn path(&self, feed: Feed) -> &Path {
        match feed {
            Feed::Stays => &self.stays,
            Feed::Events => &self.events,
            Feed::Antibiotics => &self.antibiotics,
            Feed::Sepsis => &self.sepsis,
        }
    }
}

/// File-backed source reading CSV or NDJSON feeds
#[derive(Debug, Clone)]
pub struct FileSource {
    paths: FeedPaths,
    format: Option<FeedFormat>,
}

impl FileSource {
    /// Create a source that infers each feed's format from its extension
    pub fn new(paths: FeedPaths) -> Self {
        Self {
            paths,
            format: None,
        }
    }

    /// Force one format for every feed
    pub fn with_format(mut self, format: FeedFormat) -> Self {
        self.format = Some(format);
        self
    }

    fn format_of(&self, feed: Feed) -> Result<FeedFormat, PipelineError> {
        match self.format {
            Some(format) => Ok(format),
            None => FeedFormat::from_path(self.paths.path(feed)),
        }
    }

    fn stream<R, T, F>(&self, feed: Feed, parse: F) -> Result<RowStream<'static, T>, PipelineError>
    where
        R: DeserializeOwned + 'static,
        T: 'static,
        F: Fn(R) -> Result<T, RowError> + 'static,
    {
        let path = self.paths.path(feed);
        match self.format_of(feed)? {
            FeedFormat::Csv => {
                let reader = csv_reader(feed, path)?;
                let rows = reader.into_deserialize::<R>().map(move |row| match row {
                    Ok(record) => Ok(parse(record)),
                    Err(e) if e.is_io_error() => Err(PipelineError::Csv(e)),
                    Err(e) => Ok(Err(RowError::Malformed(e.to_string()))),
                });
                Ok(Box::new(rows))
            }
            FeedFormat::Ndjson => {
                let lines = BufReader::new(File::open(path)?).lines();
                let rows = lines.filter_map(move |line| {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => return Some(Err(PipelineError::Io(e))),
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    Some(ndjson_row::<R>(feed, trimmed).map(|row| row.and_then(&parse)))
                });
                Ok(Box::new(rows))
            }
        }
    }
}

impl TabularSource for FileSource {
    fn admissions(&self) -> Result<RowStream<'_, Admission>, PipelineError> {
        self.stream(Feed::Stays, StayRecord::parse)
    }

    fn events(&self) -> Result<RowStream<'_, ChartEvent>, PipelineError> {
        self.stream(Feed::Events, EventRecord::parse)
    }

    fn antibiotics(&self) -> Result<RowStream<'_, AntibioticAdministration>, PipelineError> {
        self.stream(Feed::Antibiotics, AntibioticRecord::parse)
    }

    fn sepsis(&self) -> Result<RowStream<'_, SepsisCandidate>, PipelineError> {
        self.stream(Feed::Sepsis, SepsisRecord::parse)
    }

    fn check_schema(&self) -> Result<(), PipelineError> {
        for feed in Feed::ALL {
            let path = self.paths.path(feed);
            match self.format_of(feed)? {
                FeedFormat::Csv => {
                    csv_reader(feed, path)?;
                }
                FeedFormat::Ndjson => check_first_ndjson_object(feed, path)?,
            }
        }
        Ok(())
    }
}

/// Open a CSV feed and verify its header declares every required column
fn csv_reader(feed: Feed, path: &Path) -> Result<csv::Reader<File>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let present: Vec<&str> = headers.iter().collect();
    let missing = feed.missing_columns(present.iter().copied());
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            feed: feed.as_str().to_string(),
            columns: missing,
        });
    }
    Ok(reader)
}

/// Decode one NDJSON line. Missing keys are a schema failure for the whole feed
fn ndjson_row<R: DeserializeOwned>(feed: Feed, line: &str) -> RowItem<R> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return Ok(Err(RowError::Malformed(e.to_string()))),
    };
    let Some(object) = value.as_object() else {
        return Ok(Err(RowError::Malformed("expected a JSON object".to_string())));
    };
    let missing = feed.missing_columns(object.keys().map(String::as_str));
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            feed: feed.as_str().to_string(),
            columns: missing,
        });
    }
    Ok(serde_json::from_value(value).map_err(|e| RowError::Malformed(e.to_string())))
}

fn check_first_ndjson_object(feed: Feed, path: &Path) -> Result<(), PipelineError> {
    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let keys: Vec<&str> = value
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        let missing = feed.missing_columns(keys.iter().copied());
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns {
                feed: feed.as_str().to_string(),
                columns: missing,
            });
        }
        break;
    }
    Ok(())
}

/// In-memory source of already-parsed rows
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub admissions: Vec<Admission>,
    pub events: Vec<ChartEvent>,
    pub antibiotics: Vec<AntibioticAdministration>,
    pub sepsis: Vec<SepsisCandidate>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }
}

fn memory_stream<T: Clone>(rows: &[T]) -> RowStream<'_, T> {
    Box::new(rows.iter().cloned().map(|row| Ok(Ok(row))))
}

impl TabularSource for MemorySource {
    fn admissions(&self) -> Result<RowStream<'_, Admission>, PipelineError> {
        Ok(memory_stream(&self.admissions))
    }

    fn events(&self) -> Result<RowStream<'_, ChartEvent>, PipelineError> {
        Ok(memory_stream(&self.events))
    }

    fn antibiotics(&self) -> Result<RowStream<'_, AntibioticAdministration>, PipelineError> {
        Ok(memory_stream(&self.antibiotics))
    }

    fn sepsis(&self) -> Result<RowStream<'_, SepsisCandidate>, PipelineError> {
        Ok(memory_stream(&self.sepsis))
    }
}
