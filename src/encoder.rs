//! Output encoding
//!
//! This module writes assembled hourly rows to a sink. Column order is fixed
//! and shared by every sink: identity and stay attributes, the hour, the
//! catalog features in catalog order, then antibiotic columns and the label.

use crate::error::PipelineError;
use crate::types::HourlyFeatureRow;
use crate::variables::Variable;
use chrono::{DateTime, Utc};
use std::io::Write;

/// Timestamp format used in CSV output
pub const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LEADING_COLUMNS: [&str; 12] = [
    "subject_id",
    "hadm_id",
    "stay_id",
    "gender",
    "age",
    "unit1",
    "unit2",
    "hosp_adm_time",
    "icu_los_hours",
    "intime",
    "outtime",
    "hour",
];

const TRAILING_COLUMNS: [&str; 4] = [
    "antibiotic_flag",
    "antibiotic_count",
    "antibiotic_names",
    "sepsis_label",
];

/// Output column names in order
pub fn output_columns() -> Vec<&'static str> {
    LEADING_COLUMNS
        .iter()
        .copied()
        .chain(Variable::ALL.iter().map(|v| v.name()))
        .chain(TRAILING_COLUMNS.iter().copied())
        .collect()
}

/// Destination for assembled rows
pub trait RowSink {
    /// Write one batch of rows, already in output order
    fn write_rows(&mut self, rows: &[HourlyFeatureRow]) -> Result<(), PipelineError>;

    /// Flush anything buffered. Called once after the last batch
    fn finish(&mut self) -> Result<(), PipelineError>;
}

/// CSV sink. Nulls are written as empty fields
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(inner),
            header_written: false,
        }
    }

    fn write_header(&mut self) -> Result<(), PipelineError> {
        if !self.header_written {
            self.writer.write_record(output_columns())?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn into_inner(mut self) -> Result<W, PipelineError> {
        self.write_header()?;
        self.writer
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn write_rows(&mut self, rows: &[HourlyFeatureRow]) -> Result<(), PipelineError> {
        self.write_header()?;
        for row in rows {
            self.writer.write_record(csv_record(row))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        self.write_header()?;
        self.writer.flush()?;
        Ok(())
    }
}

fn csv_record(row: &HourlyFeatureRow) -> Vec<String> {
    let mut record = Vec::with_capacity(LEADING_COLUMNS.len() + Variable::ALL.len() + 4);
    record.push(row.subject_id.to_string());
    record.push(row.hadm_id.to_string());
    record.push(row.stay_id.to_string());
    record.push(row.gender.clone());
    record.push(row.age.to_string());
    record.push(row.unit1.to_string());
    record.push(row.unit2.to_string());
    record.push(format_number(Some(row.hosp_adm_time)));
    record.push(format_number(Some(row.icu_los_hours)));
    record.push(format_timestamp(row.intime));
    record.push(format_timestamp(row.outtime));
    record.push(format_timestamp(row.hour));
    record.extend(row.features.iter().map(|(_, value)| format_number(value)));
    record.push(row.antibiotic_flag.to_string());
    record.push(row.antibiotic_count.to_string());
    record.push(row.antibiotic_names.clone().unwrap_or_default());
    record.push(row.sepsis_label.to_string());
    record
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(CSV_TIMESTAMP_FORMAT).to_string()
}

fn format_number(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

/// Newline-delimited JSON sink, one object per row
pub struct NdjsonSink<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RowSink for NdjsonSink<W> {
    fn write_rows(&mut self, rows: &[HourlyFeatureRow]) -> Result<(), PipelineError> {
        for row in rows {
            serde_json::to_writer(&mut self.writer, row)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink collecting rows, for tests and library callers
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<HourlyFeatureRow>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowSink for MemorySink {
    fn write_rows(&mut self, rows: &[HourlyFeatureRow]) -> Result<(), PipelineError> {
        self.rows.extend_from_slice(rows);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureVector;
    use chrono::TimeZone;

    fn row() -> HourlyFeatureRow {
        let intime = Utc.with_ymd_and_hms(2150, 1, 1, 0, 15, 0).unwrap();
        let mut features = FeatureVector::default();
        features.set(Variable::HeartRate, Some(88.5));
        features.set(Variable::Platelets, Some(210.0));
        HourlyFeatureRow {
            subject_id: 10,
            hadm_id: 100,
            stay_id: 1,
            gender: "F".to_string(),
            age: 70,
            unit1: 1,
            unit2: 0,
            hosp_adm_time: -1.5,
            icu_los_hours: 30.0,
            intime,
            outtime: intime + chrono::Duration::hours(30),
            hour: Utc.with_ymd_and_hms(2150, 1, 1, 3, 0, 0).unwrap(),
            features,
            antibiotic_flag: 1,
            antibiotic_count: 2,
            antibiotic_names: Some("cefepime, vancomycin".to_string()),
            sepsis_label: 0,
        }
    }

    #[test]
    fn test_output_columns_order() {
        let columns = output_columns();
        assert_eq!(columns.len(), 12 + 34 + 4);
        assert_eq!(columns[0], "subject_id");
        assert_eq!(columns[11], "hour");
        assert_eq!(columns[12], Variable::HeartRate.name());
        assert_eq!(columns[45], Variable::Platelets.name());
        assert_eq!(columns.last(), Some(&"sepsis_label"));
    }

    #[test]
    fn test_csv_sink_writes_header_once_and_empty_nulls() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_rows(&[row()]).unwrap();
        sink.write_rows(&[row()]).unwrap();
        sink.finish().unwrap();
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("subject_id,hadm_id,stay_id"));
        assert!(lines[1].starts_with("10,100,1,F,70,1,0,-1.5,30,2150-01-01 00:15:00"));
        assert!(lines[1].contains(",2150-01-01 03:00:00,88.5,,"));
        assert!(lines[1].ends_with(",210,1,2,\"cefepime, vancomycin\",0"));
    }

    #[test]
    fn test_csv_sink_without_rows_still_has_header() {
        let mut sink = CsvSink::new(Vec::new());
        sink.finish().unwrap();
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_ndjson_sink() {
        let mut sink = NdjsonSink::new(Vec::new());
        sink.write_rows(&[row(), row()]).unwrap();
        sink.finish().unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["stay_id"], 1);
        assert_eq!(value["heart_rate"], 88.5);
        assert!(value["lactate"].is_null());
        assert_eq!(value["antibiotic_count"], 2);
        assert_eq!(value.as_object().unwrap().len(), output_columns().len());
    }
}
