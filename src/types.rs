//! Core types for the Sepsis Flux pipeline
//!
//! This module defines the value records that flow through each stage of the
//! pipeline: stays, events, per-source hourly rows, sepsis episodes, and the
//! final hourly feature row.

use crate::variables::{Variable, VARIABLE_COUNT};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;

/// ICU stay identifier
pub type StayId = i64;

/// Truncate a timestamp to the start of its clock hour. `None` outside the
/// nanosecond-representable range (roughly 1677 to 2262).
pub fn truncate_to_hour(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    ts.duration_trunc(Duration::hours(1)).ok()
}

/// Join key for all aggregation and merge steps: (stay, clock hour)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub stay_id: StayId,
    pub hour: DateTime<Utc>,
}

impl WindowKey {
    pub fn new(stay_id: StayId, timestamp: DateTime<Utc>) -> Option<Self> {
        truncate_to_hour(timestamp).map(|hour| Self { stay_id, hour })
    }
}

/// One eligible ICU stay with its derived attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stay {
    pub stay_id: StayId,
    pub subject_id: i64,
    pub hadm_id: i64,
    /// ICU admission time
    pub intime: DateTime<Utc>,
    /// ICU discharge time
    pub outtime: DateTime<Utc>,
    /// Hospital admission time
    pub admittime: DateTime<Utc>,
    pub gender: String,
    /// Age at hospital admission (years)
    pub age: i32,
    /// Medical ICU flag
    pub unit1: bool,
    /// Surgical ICU flag
    pub unit2: bool,
    /// Hours from ICU admission back to hospital admission (admittime - intime)
    pub hosp_adm_time_hours: f64,
    /// Length of stay (hours)
    pub los_hours: f64,
}

impl Stay {
    /// Whether `ts` lies within the closed stay window [intime, outtime]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.intime && ts <= self.outtime
    }
}

/// A single numeric observation from the chart or lab feed
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub stay_id: StayId,
    pub itemid: i64,
    pub charttime: DateTime<Utc>,
    pub value: f64,
}

/// A single antibiotic administration
#[derive(Debug, Clone, PartialEq)]
pub struct AntibioticAdministration {
    pub stay_id: StayId,
    pub antibiotic: String,
    pub starttime: DateTime<Utc>,
    pub stoptime: Option<DateTime<Utc>>,
}

/// Candidate onset times for one stay, as delivered by the sepsis feed
#[derive(Debug, Clone, PartialEq)]
pub struct SepsisCandidate {
    pub stay_id: StayId,
    pub suspected_infection_time: Option<DateTime<Utc>>,
    pub sofa_time: Option<DateTime<Utc>>,
    pub sepsis3: bool,
}

/// A qualifying sepsis episode for one stay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SepsisEpisode {
    pub stay_id: StayId,
    pub suspected_infection_time: DateTime<Utc>,
    pub sofa_time: DateTime<Utc>,
    /// min(suspected_infection_time, sofa_time)
    pub onset_time: DateTime<Utc>,
}

/// Sparse feature vector indexed by catalog variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [Option<f64>; VARIABLE_COUNT],
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            values: [None; VARIABLE_COUNT],
        }
    }
}

impl FeatureVector {
    pub fn get(&self, variable: Variable) -> Option<f64> {
        self.values[variable.index()]
    }

    pub fn set(&mut self, variable: Variable, value: Option<f64>) {
        self.values[variable.index()] = value;
    }

    /// Fill every null slot of `self` from `other`
    pub fn fill_from(&mut self, other: &FeatureVector) {
        for (slot, incoming) in self.values.iter_mut().zip(other.values.iter()) {
            if slot.is_none() {
                *slot = *incoming;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, Option<f64>)> + '_ {
        Variable::ALL.iter().map(move |v| (*v, self.get(*v)))
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(VARIABLE_COUNT))?;
        for (variable, value) in self.iter() {
            map.serialize_entry(variable.name(), &value)?;
        }
        map.end()
    }
}

/// Antibiotic exposure for one (stay, hour)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AntibioticExposure {
    /// Distinct substances active during the hour
    pub substances: BTreeSet<String>,
}

impl AntibioticExposure {
    pub fn count(&self) -> u32 {
        self.substances.len() as u32
    }

    /// Sorted, comma-joined substance names
    pub fn joined_names(&self) -> String {
        self.substances
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn merge(&mut self, other: &AntibioticExposure) {
        self.substances.extend(other.substances.iter().cloned());
    }
}

/// The final per-(stay, hour) output row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyFeatureRow {
    pub subject_id: i64,
    pub hadm_id: i64,
    pub stay_id: StayId,
    pub gender: String,
    pub age: i32,
    pub unit1: u8,
    pub unit2: u8,
    pub hosp_adm_time: f64,
    pub icu_los_hours: f64,
    pub intime: DateTime<Utc>,
    pub outtime: DateTime<Utc>,
    pub hour: DateTime<Utc>,
    #[serde(flatten)]
    pub features: FeatureVector,
    pub antibiotic_flag: u8,
    pub antibiotic_count: u32,
    pub antibiotic_names: Option<String>,
    pub sepsis_label: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_to_hour() {
        let ts = Utc.with_ymd_and_hms(2150, 3, 1, 10, 47, 13).unwrap();
        assert_eq!(
            truncate_to_hour(ts),
            Utc.with_ymd_and_hms(2150, 3, 1, 10, 0, 0).single()
        );
    }

    #[test]
    fn test_truncate_out_of_range_is_none() {
        let ts = Utc.with_ymd_and_hms(2300, 1, 1, 10, 47, 13).unwrap();
        assert_eq!(truncate_to_hour(ts), None);
        assert_eq!(WindowKey::new(1, ts), None);
    }

    #[test]
    fn test_feature_vector_fill_keeps_existing() {
        let mut a = FeatureVector::default();
        a.set(Variable::HeartRate, Some(80.0));
        let mut b = FeatureVector::default();
        b.set(Variable::HeartRate, Some(90.0));
        b.set(Variable::Ph, Some(7.4));

        a.fill_from(&b);
        assert_eq!(a.get(Variable::HeartRate), Some(80.0));
        assert_eq!(a.get(Variable::Ph), Some(7.4));
        assert_eq!(a.present_count(), 2);
    }

    #[test]
    fn test_feature_vector_serializes_all_columns() {
        let mut v = FeatureVector::default();
        v.set(Variable::Potassium, Some(4.1));
        let json = serde_json::to_value(v).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), VARIABLE_COUNT);
        assert_eq!(obj["potassium"], 4.1);
        assert!(obj["heart_rate"].is_null());
    }

    #[test]
    fn test_antibiotic_names_are_sorted() {
        let mut exposure = AntibioticExposure::default();
        exposure.substances.insert("Vancomycin".to_string());
        exposure.substances.insert("Cefepime".to_string());
        assert_eq!(exposure.joined_names(), "Cefepime, Vancomycin");
        assert_eq!(exposure.count(), 2);
    }
}
