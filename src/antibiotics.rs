//! Antibiotic exposure
//!
//! Expands antibiotic administrations into the clock hours they cover and
//! collects, per (stay, hour), the distinct substances active.

use crate::config::AntibioticConfig;
use crate::types::{truncate_to_hour, AntibioticAdministration, AntibioticExposure, Stay, WindowKey};
use chrono::Duration;
use std::collections::BTreeMap;

/// Hourly antibiotic exposure for one stay
pub type ExposureTable = BTreeMap<WindowKey, AntibioticExposure>;

/// Reducer for the antibiotic source
#[derive(Debug, Clone)]
pub struct AntibioticReducer {
    tolerance: Duration,
}

impl Default for AntibioticReducer {
    fn default() -> Self {
        Self::new(&AntibioticConfig::default())
    }
}

impl AntibioticReducer {
    pub fn new(config: &AntibioticConfig) -> Self {
        Self {
            tolerance: Duration::hours(config.tolerance_hours),
        }
    }

    /// Whether an administration overlaps the stay widened by the tolerance.
    /// The tolerance only decides participation; hours are clipped to the stay.
    pub fn participates(&self, stay: &Stay, admin: &AntibioticAdministration) -> bool {
        if admin.stay_id != stay.stay_id {
            return false;
        }
        let stop = admin.stoptime.unwrap_or(admin.starttime).max(admin.starttime);
        admin.starttime <= stay.outtime + self.tolerance && stop >= stay.intime - self.tolerance
    }

    /// Reduce one stay's administrations to hourly exposure
    pub fn reduce(&self, stay: &Stay, administrations: &[AntibioticAdministration]) -> ExposureTable {
        let mut table = ExposureTable::new();

        for admin in administrations.iter().filter(|a| self.participates(stay, a)) {
            let substance = admin.antibiotic.trim().to_lowercase();
            if substance.is_empty() {
                continue;
            }

            let stop = admin.stoptime.unwrap_or(admin.starttime).max(admin.starttime);
            let (Some(first), Some(last), Some(stay_start)) = (
                truncate_to_hour(admin.starttime),
                truncate_to_hour(stop),
                truncate_to_hour(stay.intime),
            ) else {
                continue;
            };

            // Walk only the part of the interval that can land inside the stay
            let mut hour = first.max(stay_start);
            let end = last.min(stay.outtime);
            while hour <= end {
                if stay.contains(hour) {
                    table
                        .entry(WindowKey {
                            stay_id: stay.stay_id,
                            hour,
                        })
                        .or_default()
                        .substances
                        .insert(substance.clone());
                }
                hour += Duration::hours(1);
            }
        }

        table
    }
}
