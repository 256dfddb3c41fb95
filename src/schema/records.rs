//! Input feed records
//!
//! Raw rows as they arrive from the admissions, event, antibiotic and sepsis
//! feeds, and their parsed counterparts. Raw rows keep timestamps as text so
//! that one malformed value skips the row instead of failing the feed.

use crate::error::RowError;
use crate::types::{truncate_to_hour, AntibioticAdministration, SepsisCandidate, StayId};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input feeds consumed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    Stays,
    Events,
    Antibiotics,
    Sepsis,
}

impl Feed {
    pub const ALL: [Feed; 4] = [Feed::Stays, Feed::Events, Feed::Antibiotics, Feed::Sepsis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Stays => "stays",
            Feed::Events => "events",
            Feed::Antibiotics => "antibiotics",
            Feed::Sepsis => "sepsis",
        }
    }

    /// Columns every row of the feed must declare
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Feed::Stays => &[
                "stay_id",
                "subject_id",
                "hadm_id",
                "intime",
                "outtime",
                "first_careunit",
                "anchor_age",
                "anchor_year",
                "admittime",
                "gender",
            ],
            Feed::Events => &["stay_id", "subject_id", "hadm_id", "charttime", "itemid", "valuenum"],
            Feed::Antibiotics => &["stay_id", "antibiotic", "starttime", "stoptime"],
            Feed::Sepsis => &["stay_id", "suspected_infection_time", "sofa_time", "sepsis3"],
        }
    }

    /// Required columns absent from `present`
    pub fn missing_columns<'a, I>(&self, present: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        self.required_columns()
            .iter()
            .filter(|col| !present.clone().into_iter().any(|p| p.trim() == **col))
            .map(|col| col.to_string())
            .collect()
    }
}

/// Parse a feed timestamp: RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS`
/// (also with `T` separator, optional fractional seconds) read as UTC.
pub fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RowError::EmptyValue(column.to_string()));
    }
    let parsed = match DateTime::parse_from_rfc3339(trimmed) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(_) => ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(|naive| naive.and_utc())
            .ok_or_else(|| RowError::InvalidTimestamp {
                column: column.to_string(),
                value: value.to_string(),
            })?,
    };
    // Hourly windows need a truncatable timestamp
    if truncate_to_hour(parsed).is_none() {
        return Err(RowError::TimestampOutOfRange {
            column: column.to_string(),
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, RowError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_timestamp(column, v).map(Some),
    }
}

/// Boolean flag as it appears in CSV (`t`, `true`, `1`) or JSON
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            FlagValue::Integer(i) => Some(*i != 0),
            FlagValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "y" | "yes" => Some(true),
                "f" | "false" | "0" | "n" | "no" => Some(false),
                _ => None,
            },
        }
    }
}

/// Admissions/patients feed row
#[derive(Debug, Clone, Deserialize)]
pub struct StayRecord {
    pub stay_id: StayId,
    pub subject_id: i64,
    pub hadm_id: i64,
    pub intime: String,
    pub outtime: String,
    pub first_careunit: Option<String>,
    pub anchor_age: i32,
    pub anchor_year: i32,
    pub admittime: String,
    pub gender: String,
}

/// Parsed admission, before cohort eligibility is applied
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub stay_id: StayId,
    pub subject_id: i64,
    pub hadm_id: i64,
    pub intime: DateTime<Utc>,
    pub outtime: DateTime<Utc>,
    pub first_careunit: String,
    /// Patient age in the reference year
    pub anchor_age: i32,
    pub anchor_year: i32,
    pub admittime: DateTime<Utc>,
    pub gender: String,
}

impl StayRecord {
    pub fn parse(self) -> Result<Admission, RowError> {
        Ok(Admission {
            stay_id: self.stay_id,
            subject_id: self.subject_id,
            hadm_id: self.hadm_id,
            intime: parse_timestamp("intime", &self.intime)?,
            outtime: parse_timestamp("outtime", &self.outtime)?,
            first_careunit: self.first_careunit.unwrap_or_default(),
            anchor_age: self.anchor_age,
            anchor_year: self.anchor_year,
            admittime: parse_timestamp("admittime", &self.admittime)?,
            gender: self.gender.trim().to_string(),
        })
    }
}

/// Vitals/labs event feed row
#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub stay_id: Option<StayId>,
    pub subject_id: Option<i64>,
    pub hadm_id: Option<i64>,
    pub charttime: String,
    pub itemid: i64,
    pub valuenum: Option<f64>,
}

/// Parsed chart or lab event. The stay may still be unresolved
#[derive(Debug, Clone, PartialEq)]
pub struct ChartEvent {
    pub stay_id: Option<StayId>,
    pub subject_id: Option<i64>,
    pub hadm_id: Option<i64>,
    pub charttime: DateTime<Utc>,
    pub itemid: i64,
    pub value: f64,
}

impl EventRecord {
    pub fn parse(self) -> Result<ChartEvent, RowError> {
        let value = self
            .valuenum
            .ok_or_else(|| RowError::EmptyValue("valuenum".to_string()))?;
        Ok(ChartEvent {
            stay_id: self.stay_id,
            subject_id: self.subject_id,
            hadm_id: self.hadm_id,
            charttime: parse_timestamp("charttime", &self.charttime)?,
            itemid: self.itemid,
            value,
        })
    }
}

/// Antibiotic administration feed row
#[derive(Debug, Clone, Deserialize)]
pub struct AntibioticRecord {
    pub stay_id: StayId,
    pub antibiotic: String,
    pub starttime: String,
    pub stoptime: Option<String>,
}

impl AntibioticRecord {
    pub fn parse(self) -> Result<AntibioticAdministration, RowError> {
        let antibiotic = self.antibiotic.trim().to_string();
        if antibiotic.is_empty() {
            return Err(RowError::EmptyValue("antibiotic".to_string()));
        }
        Ok(AntibioticAdministration {
            stay_id: self.stay_id,
            antibiotic,
            starttime: parse_timestamp("starttime", &self.starttime)?,
            stoptime: parse_optional_timestamp("stoptime", self.stoptime.as_deref())?,
        })
    }
}

/// Sepsis-episode feed row
#[derive(Debug, Clone, Deserialize)]
pub struct SepsisRecord {
    pub stay_id: StayId,
    pub suspected_infection_time: Option<String>,
    pub sofa_time: Option<String>,
    pub sepsis3: Option<FlagValue>,
}

impl SepsisRecord {
    pub fn parse(self) -> Result<SepsisCandidate, RowError> {
        let sepsis3 = match &self.sepsis3 {
            None => false,
            Some(flag) => flag.as_bool().ok_or_else(|| {
                RowError::Malformed(format!("unrecognized sepsis3 flag {:?}", flag))
            })?,
        };
        Ok(SepsisCandidate {
            stay_id: self.stay_id,
            suspected_infection_time: parse_optional_timestamp(
                "suspected_infection_time",
                self.suspected_infection_time.as_deref(),
            )?,
            sofa_time: parse_optional_timestamp("sofa_time", self.sofa_time.as_deref())?,
            sepsis3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2150, 1, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("t", "2150-01-01 10:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("t", "2150-01-01T10:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("t", "2150-01-01T10:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("t", "2150-01-01 10:30").unwrap(), expected);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("charttime", "yesterday"),
            Err(RowError::InvalidTimestamp { .. })
        ));
        assert!(matches!(
            parse_timestamp("charttime", "  "),
            Err(RowError::EmptyValue(_))
        ));
    }

    #[test]
    fn test_parse_timestamp_rejects_out_of_range() {
        assert!(matches!(
            parse_timestamp("charttime", "2263-01-01 00:00:00"),
            Err(RowError::TimestampOutOfRange { .. })
        ));
        assert!(parse_timestamp("charttime", "2262-01-01 00:00:00").is_ok());
    }

    #[test]
    fn test_missing_columns() {
        let present = ["stay_id", "antibiotic", "starttime"];
        assert_eq!(
            Feed::Antibiotics.missing_columns(present.iter().copied()),
            vec!["stoptime".to_string()]
        );
    }

    #[test]
    fn test_flag_values() {
        assert_eq!(FlagValue::Text("t".to_string()).as_bool(), Some(true));
        assert_eq!(FlagValue::Text("False".to_string()).as_bool(), Some(false));
        assert_eq!(FlagValue::Integer(1).as_bool(), Some(true));
        assert_eq!(FlagValue::Text("maybe".to_string()).as_bool(), None);
    }

    #[test]
    fn test_event_without_value_is_row_error() {
        let record = EventRecord {
            stay_id: Some(1),
            subject_id: None,
            hadm_id: None,
            charttime: "2150-01-01 10:30:00".to_string(),
            itemid: 220045,
            valuenum: None,
        };
        assert_eq!(
            record.parse(),
            Err(RowError::EmptyValue("valuenum".to_string()))
        );
    }

    #[test]
    fn test_sepsis_record_optional_times() {
        let record = SepsisRecord {
            stay_id: 7,
            suspected_infection_time: Some("2150-01-01 12:00:00".to_string()),
            sofa_time: None,
            sepsis3: Some(FlagValue::Bool(true)),
        };
        let candidate = record.parse().unwrap();
        assert!(candidate.suspected_infection_time.is_some());
        assert!(candidate.sofa_time.is_none());
        assert!(candidate.sepsis3);
    }
}
