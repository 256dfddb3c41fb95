//! Variable reduction
//!
//! This module reduces a stay's raw chart and lab events to one value per
//! (hour, variable):
//! - Readings outside the stay window are ignored
//! - Readings outside the variable's physiological range are dropped
//! - Fahrenheit temperatures are converted before the range check
//! - The remaining readings in each hour are reduced to their median

use crate::merger::union_feature_tables;
use crate::types::{Event, FeatureVector, Stay, WindowKey};
use crate::variables::{SourceGroup, SubGroup, Variable};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One hourly table per source: (stay, hour) -> reduced features.
/// A key is present only if at least one variable had a valid reading.
pub type FeatureTable = BTreeMap<WindowKey, FeatureVector>;

/// Reducer for numeric sources (vitals, labs)
pub struct VariableReducer;

impl VariableReducer {
    /// Reduce one stay's events for a numeric source group.
    ///
    /// Each sub-group is reduced on its own, then the sub-group tables are
    /// unioned on (stay, hour).
    pub fn reduce(stay: &Stay, events: &[Event], source: SourceGroup) -> FeatureTable {
        SubGroup::of(source)
            .map(|group| Self::reduce_sub_group(stay, events, group))
            .fold(FeatureTable::new(), union_feature_tables)
    }

    /// Reduce the variables of one sub-group
    pub fn reduce_sub_group(stay: &Stay, events: &[Event], group: SubGroup) -> FeatureTable {
        let mut readings: BTreeMap<(WindowKey, Variable), Vec<f64>> = BTreeMap::new();

        for event in events {
            if event.stay_id != stay.stay_id || !stay.contains(event.charttime) {
                continue;
            }
            let Some((variable, unit)) = Variable::for_item(event.itemid) else {
                continue;
            };
            if variable.sub_group() != group {
                continue;
            }
            let Some(key) = WindowKey::new(stay.stay_id, event.charttime) else {
                continue;
            };
            if let Some(value) = variable.validate(event.value, unit) {
                readings.entry((key, variable)).or_default().push(value);
            }
        }

        let mut table = FeatureTable::new();
        for ((key, variable), mut values) in readings {
            if let Some(value) = median(&mut values) {
                table.entry(key).or_default().set(variable, Some(value));
            }
        }
        table
    }
}

/// Median of the values; the mean of the two middle values for even counts.
/// Sorts in place, so the result does not depend on input order.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
