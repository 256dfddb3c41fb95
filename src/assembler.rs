//! Row assembly
//!
//! Turns a stay's merged hourly table into final output rows:
//! - Hours are restricted to the closed stay window
//! - Static stay attributes are attached to every row
//! - MAP is imputed from systolic and diastolic pressure when missing
//! - Antibiotic columns default to "not exposed"
//! - The sepsis label is applied per hour

use crate::label::LabelDeriver;
use crate::merger::MergedTable;
use crate::types::{FeatureVector, HourlyFeatureRow, SepsisEpisode, Stay};
use crate::variables::Variable;

/// Assembler for final hourly rows
pub struct RowAssembler;

impl RowAssembler {
    /// Assemble the rows of one stay, ordered by hour
    pub fn assemble(
        stay: &Stay,
        merged: &MergedTable,
        labels: &LabelDeriver,
        episode: Option<&SepsisEpisode>,
    ) -> Vec<HourlyFeatureRow> {
        merged
            .iter()
            .filter(|(key, row)| {
                key.stay_id == stay.stay_id && stay.contains(key.hour) && row.has_source()
            })
            .map(|(key, row)| {
                let mut features = row.features();
                impute_map(&mut features);

                let (antibiotic_count, antibiotic_names) = match &row.antibiotics {
                    Some(exposure) if exposure.count() > 0 => {
                        (exposure.count(), Some(exposure.joined_names()))
                    }
                    _ => (0, None),
                };

                HourlyFeatureRow {
                    subject_id: stay.subject_id,
                    hadm_id: stay.hadm_id,
                    stay_id: stay.stay_id,
                    gender: stay.gender.clone(),
                    age: stay.age,
                    unit1: u8::from(stay.unit1),
                    unit2: u8::from(stay.unit2),
                    hosp_adm_time: stay.hosp_adm_time_hours,
                    icu_los_hours: stay.los_hours,
                    intime: stay.intime,
                    outtime: stay.outtime,
                    hour: key.hour,
                    features,
                    antibiotic_flag: u8::from(antibiotic_count > 0),
                    antibiotic_count,
                    antibiotic_names,
                    sepsis_label: labels.label(stay, episode, key.hour),
                }
            })
            .collect()
    }
}

/// Fill a missing MAP with (sbp + 2 * dbp) / 3 when both pressures exist
pub fn impute_map(features: &mut FeatureVector) {
    if features.get(Variable::Map).is_some() {
        return;
    }
    if let (Some(sbp), Some(dbp)) = (features.get(Variable::Sbp), features.get(Variable::Dbp)) {
        features.set(Variable::Map, Some((sbp + 2.0 * dbp) / 3.0));
    }
}
