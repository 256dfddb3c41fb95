//! Cohort selection
//!
//! This module turns parsed admissions into eligible stays:
//! - Length-of-stay and age bounds
//! - Age at admission from the patient's reference age and year
//! - Care-unit flags and hospital-to-ICU lead time

use crate::config::CohortConfig;
use crate::schema::Admission;
use crate::types::Stay;
use chrono::{Datelike, Duration};
use serde::{Deserialize, Serialize};

/// Why an admission was left out of the cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    /// outtime - intime below the minimum (or non-positive)
    ShortStay,
    /// Age outside [min_age, max_age]
    AgeOutOfRange,
}

/// Counts of admissions seen by the filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortStats {
    pub admissions: usize,
    pub eligible: usize,
    pub short_stay: usize,
    pub age_out_of_range: usize,
}

impl CohortStats {
    pub fn record(&mut self, outcome: Result<(), Exclusion>) {
        self.admissions += 1;
        match outcome {
            Ok(()) => self.eligible += 1,
            Err(Exclusion::ShortStay) => self.short_stay += 1,
            Err(Exclusion::AgeOutOfRange) => self.age_out_of_range += 1,
        }
    }
}

/// Cohort filter for selecting eligible stays
pub struct CohortFilter {
    config: CohortConfig,
    unit1_pattern: String,
    unit2_pattern: String,
}

impl CohortFilter {
    pub fn new(config: CohortConfig) -> Self {
        let unit1_pattern = config.unit1_pattern.to_ascii_lowercase();
        let unit2_pattern = config.unit2_pattern.to_ascii_lowercase();
        Self {
            config,
            unit1_pattern,
            unit2_pattern,
        }
    }

    /// Evaluate one admission. Ineligible admissions are excluded, not errors
    pub fn evaluate(&self, admission: &Admission) -> Result<Stay, Exclusion> {
        let los = admission.outtime - admission.intime;
        if los <= Duration::zero() || los < Duration::hours(self.config.min_los_hours) {
            return Err(Exclusion::ShortStay);
        }

        let age = age_at_admission(admission);
        if age < self.config.min_age || age > self.config.max_age {
            return Err(Exclusion::AgeOutOfRange);
        }

        let unit = admission.first_careunit.to_ascii_lowercase();

        Ok(Stay {
            stay_id: admission.stay_id,
            subject_id: admission.subject_id,
            hadm_id: admission.hadm_id,
            intime: admission.intime,
            outtime: admission.outtime,
            admittime: admission.admittime,
            gender: admission.gender.clone(),
            age,
            unit1: !self.unit1_pattern.is_empty() && unit.contains(&self.unit1_pattern),
            unit2: !self.unit2_pattern.is_empty() && unit.contains(&self.unit2_pattern),
            hosp_adm_time_hours: hours(admission.admittime - admission.intime),
            los_hours: hours(los),
        })
    }
}

/// Reference age plus the years between the reference year and admission
pub fn age_at_admission(admission: &Admission) -> i32 {
    admission.anchor_age + (admission.admittime.year() - admission.anchor_year)
}

fn hours(d: Duration) -> f64 {
    d.num_seconds() as f64 / 3600.0
}
