//! Source merging
//!
//! Unions the per-source hourly tables on (stay, hour). Every key present in
//! any source appears exactly once in the result, with a slot per source that
//! is `None` when that source had nothing for the hour.
//!
//! The key set is always the union of all distinct keys across sources; keys
//! are never coalesced pairwise, so partially overlapping hour sets cannot
//! drop or misalign rows.

use crate::antibiotics::ExposureTable;
use crate::reducer::FeatureTable;
use crate::types::{AntibioticExposure, FeatureVector, WindowKey};
use std::collections::BTreeMap;

/// All sources' contributions to one (stay, hour)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedRow {
    pub vitals: Option<FeatureVector>,
    pub labs: Option<FeatureVector>,
    pub antibiotics: Option<AntibioticExposure>,
}

impl MergedRow {
    /// Whether any source contributed to this hour
    pub fn has_source(&self) -> bool {
        self.vitals.is_some() || self.labs.is_some() || self.antibiotics.is_some()
    }

    /// Vitals and labs overlaid into one feature vector
    pub fn features(&self) -> FeatureVector {
        let mut features = self.vitals.unwrap_or_default();
        if let Some(labs) = &self.labs {
            features.fill_from(labs);
        }
        features
    }

    /// Fold another row for the same key into this one. Slots filled on the
    /// left win value-by-value, which keeps the fold associative.
    fn absorb(&mut self, other: MergedRow) {
        absorb_vector(&mut self.vitals, other.vitals);
        absorb_vector(&mut self.labs, other.labs);
        match (self.antibiotics.as_mut(), other.antibiotics) {
            (Some(mine), Some(theirs)) => mine.merge(&theirs),
            (None, theirs) => self.antibiotics = theirs,
            (Some(_), None) => {}
        }
    }
}

fn absorb_vector(slot: &mut Option<FeatureVector>, other: Option<FeatureVector>) {
    match (slot.as_mut(), other) {
        (Some(mine), Some(theirs)) => mine.fill_from(&theirs),
        (None, theirs) => *slot = theirs,
        (Some(_), None) => {}
    }
}

/// Merged hourly table keyed by (stay, hour)
pub type MergedTable = BTreeMap<WindowKey, MergedRow>;

/// Merger for the vitals, labs and antibiotic tables
pub struct SourceMerger;

impl SourceMerger {
    pub fn from_vitals(table: FeatureTable) -> MergedTable {
        table
            .into_iter()
            .map(|(key, v)| {
                (
                    key,
                    MergedRow {
                        vitals: Some(v),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    pub fn from_labs(table: FeatureTable) -> MergedTable {
        table
            .into_iter()
            .map(|(key, v)| {
                (
                    key,
                    MergedRow {
                        labs: Some(v),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    pub fn from_antibiotics(table: ExposureTable) -> MergedTable {
        table
            .into_iter()
            .map(|(key, a)| {
                (
                    key,
                    MergedRow {
                        antibiotics: Some(a),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    /// Full outer union of two merged tables
    pub fn merge(mut left: MergedTable, right: MergedTable) -> MergedTable {
        for (key, row) in right {
            left.entry(key).or_default().absorb(row);
        }
        left
    }

    /// Merge the three source tables
    pub fn merge_sources(
        vitals: FeatureTable,
        labs: FeatureTable,
        antibiotics: ExposureTable,
    ) -> MergedTable {
        [
            Self::from_vitals(vitals),
            Self::from_labs(labs),
            Self::from_antibiotics(antibiotics),
        ]
        .into_iter()
        .fold(MergedTable::new(), Self::merge)
    }
}

/// Union two feature tables of the same source (used to fold sub-groups)
pub fn union_feature_tables(mut left: FeatureTable, right: FeatureTable) -> FeatureTable {
    for (key, features) in right {
        left.entry(key).or_default().fill_from(&features);
    }
    left
}
