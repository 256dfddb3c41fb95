//! Label reporting
//!
//! Read-only aggregations over the final hourly table: positive label counts,
//! the early-positive check, antibiotic usage, and the distribution of
//! co-administered antibiotic combinations. Reports can be built from rows in
//! memory or by re-reading a CSV / NDJSON output file.

use crate::config::LabelConfig;
use crate::error::PipelineError;
use crate::schema::{parse_timestamp, FeedFormat};
use crate::types::{HourlyFeatureRow, StayId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// The columns of an output row a report needs
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub stay_id: StayId,
    pub intime: DateTime<Utc>,
    pub hour: DateTime<Utc>,
    pub antibiotic_flag: u8,
    pub antibiotic_names: Option<String>,
    pub sepsis_label: u8,
}

impl From<&HourlyFeatureRow> for ReportRow {
    fn from(row: &HourlyFeatureRow) -> Self {
        Self {
            stay_id: row.stay_id,
            intime: row.intime,
            hour: row.hour,
            antibiotic_flag: row.antibiotic_flag,
            antibiotic_names: row.antibiotic_names.clone(),
            sepsis_label: row.sepsis_label,
        }
    }
}

/// Report columns as written to disk
#[derive(Debug, Deserialize)]
struct StoredRow {
    stay_id: StayId,
    intime: String,
    hour: String,
    antibiotic_flag: u8,
    antibiotic_names: Option<String>,
    sepsis_label: u8,
}

impl StoredRow {
    fn parse(self, line: usize) -> Result<ReportRow, PipelineError> {
        let invalid = |error| PipelineError::InvalidOutputRow { line, error };
        Ok(ReportRow {
            stay_id: self.stay_id,
            intime: parse_timestamp("intime", &self.intime).map_err(invalid)?,
            hour: parse_timestamp("hour", &self.hour).map_err(invalid)?,
            antibiotic_flag: self.antibiotic_flag,
            antibiotic_names: self.antibiotic_names.filter(|n| !n.trim().is_empty()),
            sepsis_label: self.sepsis_label,
        })
    }
}

/// One co-administered antibiotic combination and how many hours it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationCount {
    pub names: String,
    pub hours: usize,
}

/// Aggregate label and antibiotic statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelReport {
    pub total_rows: usize,
    pub total_stays: usize,
    pub positive_rows: usize,
    pub septic_stays: usize,
    /// positive_rows / total_rows, NaN when there are no rows
    pub positive_row_rate: f64,
    /// Positive rows before intime + onset delay. Must be 0
    pub early_positive_violations: usize,
    pub antibiotic_hours: usize,
    /// antibiotic_hours / total_rows, NaN when there are no rows
    pub antibiotic_usage_rate: f64,
    /// Most frequent first, ties by name
    pub antibiotic_combinations: Vec<CombinationCount>,
}

impl LabelReport {
    pub fn from_rows(rows: &[HourlyFeatureRow]) -> Self {
        let mut builder = LabelReportBuilder::default();
        for row in rows {
            builder.add(&ReportRow::from(row));
        }
        builder.finish()
    }

    /// Build a report by re-reading an output file
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        Self::from_file_with(path, LabelReportBuilder::default())
    }

    pub fn from_file_with(path: &Path, mut builder: LabelReportBuilder) -> Result<Self, PipelineError> {
        match FeedFormat::from_path(path)? {
            FeedFormat::Csv => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(true)
                    .trim(csv::Trim::All)
                    .from_path(path)?;
                for (index, stored) in reader.deserialize::<StoredRow>().enumerate() {
                    // header is line 1
                    builder.add(&stored?.parse(index + 2)?);
                }
            }
            FeedFormat::Ndjson => {
                for (index, line) in BufReader::new(File::open(path)?).lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let stored: StoredRow = serde_json::from_str(&line)?;
                    builder.add(&stored.parse(index + 1)?);
                }
            }
        }
        Ok(builder.finish())
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Incremental report accumulator
#[derive(Debug, Clone)]
pub struct LabelReportBuilder {
    min_onset_delay: Duration,
    total_rows: usize,
    stays: BTreeSet<StayId>,
    septic: BTreeSet<StayId>,
    positive_rows: usize,
    early_positive_violations: usize,
    antibiotic_hours: usize,
    combinations: BTreeMap<String, usize>,
}

impl Default for LabelReportBuilder {
    fn default() -> Self {
        Self::from(&LabelConfig::default())
    }
}

impl From<&LabelConfig> for LabelReportBuilder {
    fn from(config: &LabelConfig) -> Self {
        Self::new(config.min_onset_delay_hours)
    }
}

impl LabelReportBuilder {
    pub fn new(min_onset_delay_hours: i64) -> Self {
        Self {
            min_onset_delay: Duration::hours(min_onset_delay_hours),
            total_rows: 0,
            stays: BTreeSet::new(),
            septic: BTreeSet::new(),
            positive_rows: 0,
            early_positive_violations: 0,
            antibiotic_hours: 0,
            combinations: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, row: &ReportRow) {
        self.total_rows += 1;
        self.stays.insert(row.stay_id);

        if row.sepsis_label == 1 {
            self.positive_rows += 1;
            self.septic.insert(row.stay_id);
            if row.hour < row.intime + self.min_onset_delay {
                self.early_positive_violations += 1;
            }
        }

        if row.antibiotic_flag == 1 {
            self.antibiotic_hours += 1;
            if let Some(names) = &row.antibiotic_names {
                *self.combinations.entry(names.clone()).or_default() += 1;
            }
        }
    }

    pub fn finish(self) -> LabelReport {
        let mut antibiotic_combinations: Vec<CombinationCount> = self
            .combinations
            .into_iter()
            .map(|(names, hours)| CombinationCount { names, hours })
            .collect();
        // BTreeMap order is by name; a stable sort keeps it among equal counts
        antibiotic_combinations.sort_by(|a, b| b.hours.cmp(&a.hours));

        LabelReport {
            total_rows: self.total_rows,
            total_stays: self.stays.len(),
            positive_rows: self.positive_rows,
            septic_stays: self.septic.len(),
            positive_row_rate: rate(self.positive_rows, self.total_rows),
            early_positive_violations: self.early_positive_violations,
            antibiotic_hours: self.antibiotic_hours,
            antibiotic_usage_rate: rate(self.antibiotic_hours, self.total_rows),
            antibiotic_combinations,
        }
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        f64::NAN
    } else {
        count as f64 / total as f64
    }
}
