//! Variable catalog
//!
//! Every hourly feature the pipeline emits, with the source group and
//! sub-group it is reduced in, the item codes that feed it, and the closed
//! physiological range a reading must fall in to be kept.

use serde::{Deserialize, Serialize};

/// Number of catalog variables (feature columns)
pub const VARIABLE_COUNT: usize = 34;

/// Source feed a variable is reduced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGroup {
    Vitals,
    Labs,
}

impl SourceGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceGroup::Vitals => "vitals",
            SourceGroup::Labs => "labs",
        }
    }
}

/// Co-aggregated variable sub-groups within a numeric source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubGroup {
    Hemodynamics,
    RespiratoryThermal,
    BloodGas,
    Chemistry,
    Hematology,
}

impl SubGroup {
    pub const ALL: [SubGroup; 5] = [
        SubGroup::Hemodynamics,
        SubGroup::RespiratoryThermal,
        SubGroup::BloodGas,
        SubGroup::Chemistry,
        SubGroup::Hematology,
    ];

    pub fn source(&self) -> SourceGroup {
        match self {
            SubGroup::Hemodynamics | SubGroup::RespiratoryThermal => SourceGroup::Vitals,
            SubGroup::BloodGas | SubGroup::Chemistry | SubGroup::Hematology => SourceGroup::Labs,
        }
    }

    /// Sub-groups reduced for a numeric source
    pub fn of(source: SourceGroup) -> impl Iterator<Item = SubGroup> {
        Self::ALL.into_iter().filter(move |g| g.source() == source)
    }
}

/// Unit a raw reading arrives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUnit {
    /// Already in the catalog unit
    Native,
    /// Fahrenheit, converted to Celsius before the range check
    Fahrenheit,
}

/// Closed validity range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Raw Fahrenheit range accepted for temperature before conversion
pub const FAHRENHEIT_BOUNDS: Bounds = Bounds::new(86.0, 113.0);

/// One item code feeding a variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemCode {
    pub itemid: i64,
    pub unit: SourceUnit,
}

/// Hourly feature variables, in output column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    HeartRate,
    O2Sat,
    Temp,
    Sbp,
    Map,
    Dbp,
    Resp,
    EtCo2,
    BaseExcess,
    Hco3,
    FiO2,
    Ph,
    PaCo2,
    SaO2,
    Ast,
    Bun,
    AlkalinePhos,
    Calcium,
    Chloride,
    Creatinine,
    BilirubinDirect,
    Glucose,
    Lactate,
    Magnesium,
    Phosphate,
    Potassium,
    BilirubinTotal,
    TroponinI,
    Hct,
    Hgb,
    Ptt,
    Wbc,
    Fibrinogen,
    Platelets,
}

impl Variable {
    pub const ALL: [Variable; VARIABLE_COUNT] = [
        Variable::HeartRate,
        Variable::O2Sat,
        Variable::Temp,
        Variable::Sbp,
        Variable::Map,
        Variable::Dbp,
        Variable::Resp,
        Variable::EtCo2,
        Variable::BaseExcess,
        Variable::Hco3,
        Variable::FiO2,
        Variable::Ph,
        Variable::PaCo2,
        Variable::SaO2,
        Variable::Ast,
        Variable::Bun,
        Variable::AlkalinePhos,
        Variable::Calcium,
        Variable::Chloride,
        Variable::Creatinine,
        Variable::BilirubinDirect,
        Variable::Glucose,
        Variable::Lactate,
        Variable::Magnesium,
        Variable::Phosphate,
        Variable::Potassium,
        Variable::BilirubinTotal,
        Variable::TroponinI,
        Variable::Hct,
        Variable::Hgb,
        Variable::Ptt,
        Variable::Wbc,
        Variable::Fibrinogen,
        Variable::Platelets,
    ];

    /// Position in the feature vector and output column order
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Output column name
    pub fn name(&self) -> &'static str {
        match self {
            Variable::HeartRate => "heart_rate",
            Variable::O2Sat => "o2sat",
            Variable::Temp => "temp",
            Variable::Sbp => "sbp",
            Variable::Map => "map",
            Variable::Dbp => "dbp",
            Variable::Resp => "resp",
            Variable::EtCo2 => "etco2",
            Variable::BaseExcess => "base_excess",
            Variable::Hco3 => "hco3",
            Variable::FiO2 => "fio2",
            Variable::Ph => "ph",
            Variable::PaCo2 => "paco2",
            Variable::SaO2 => "sao2",
            Variable::Ast => "ast",
            Variable::Bun => "bun",
            Variable::AlkalinePhos => "alkalinephos",
            Variable::Calcium => "calcium",
            Variable::Chloride => "chloride",
            Variable::Creatinine => "creatinine",
            Variable::BilirubinDirect => "bilirubin_direct",
            Variable::Glucose => "glucose",
            Variable::Lactate => "lactate",
            Variable::Magnesium => "magnesium",
            Variable::Phosphate => "phosphate",
            Variable::Potassium => "potassium",
            Variable::BilirubinTotal => "bilirubin_total",
            Variable::TroponinI => "troponin_i",
            Variable::Hct => "hct",
            Variable::Hgb => "hgb",
            Variable::Ptt => "ptt",
            Variable::Wbc => "wbc",
            Variable::Fibrinogen => "fibrinogen",
            Variable::Platelets => "platelets",
        }
    }

    pub fn sub_group(&self) -> SubGroup {
        use Variable::*;
        match self {
            HeartRate | Sbp | Map | Dbp => SubGroup::Hemodynamics,
            O2Sat | Temp | Resp | EtCo2 => SubGroup::RespiratoryThermal,
            BaseExcess | Hco3 | FiO2 | Ph | PaCo2 | SaO2 | Lactate => SubGroup::BloodGas,
            Ast | Bun | AlkalinePhos | Calcium | Chloride | Creatinine | BilirubinDirect
            | Glucose | Magnesium | Phosphate | Potassium | BilirubinTotal | TroponinI => {
                SubGroup::Chemistry
            }
            Hct | Hgb | Ptt | Wbc | Fibrinogen | Platelets => SubGroup::Hematology,
        }
    }

    pub fn source(&self) -> SourceGroup {
        self.sub_group().source()
    }

    /// Closed validity range, in catalog units
    pub fn bounds(&self) -> Bounds {
        use Variable::*;
        match self {
            HeartRate => Bounds::new(20.0, 300.0),
            O2Sat => Bounds::new(50.0, 100.0),
            Temp => Bounds::new(30.0, 45.0),
            Sbp => Bounds::new(40.0, 300.0),
            Map => Bounds::new(20.0, 250.0),
            Dbp => Bounds::new(10.0, 200.0),
            Resp => Bounds::new(4.0, 70.0),
            EtCo2 => Bounds::new(0.0, 100.0),
            BaseExcess => Bounds::new(-40.0, 40.0),
            Hco3 => Bounds::new(5.0, 60.0),
            FiO2 => Bounds::new(21.0, 100.0),
            Ph => Bounds::new(6.8, 8.0),
            PaCo2 => Bounds::new(5.0, 200.0),
            SaO2 => Bounds::new(50.0, 100.0),
            Ast => Bounds::new(0.0, 10000.0),
            Bun => Bounds::new(1.0, 300.0),
            AlkalinePhos => Bounds::new(1.0, 3000.0),
            Calcium => Bounds::new(2.0, 20.0),
            Chloride => Bounds::new(50.0, 200.0),
            Creatinine => Bounds::new(0.1, 30.0),
            BilirubinDirect => Bounds::new(0.0, 70.0),
            Glucose => Bounds::new(10.0, 2000.0),
            Lactate => Bounds::new(0.1, 30.0),
            Magnesium => Bounds::new(0.3, 10.0),
            Phosphate => Bounds::new(0.3, 20.0),
            Potassium => Bounds::new(2.0, 10.0),
            BilirubinTotal => Bounds::new(0.1, 70.0),
            TroponinI => Bounds::new(0.0, 100.0),
            Hct => Bounds::new(5.0, 75.0),
            Hgb => Bounds::new(2.0, 25.0),
            Ptt => Bounds::new(10.0, 250.0),
            Wbc => Bounds::new(0.0, 500.0),
            Fibrinogen => Bounds::new(20.0, 1500.0),
            Platelets => Bounds::new(1.0, 2000.0),
        }
    }

    /// Item codes (chart and lab item ids) feeding this variable
    pub fn item_codes(&self) -> &'static [ItemCode] {
        use Variable::*;
        match self {
            HeartRate => &[ItemCode { itemid: 220045, unit: SourceUnit::Native }],
            O2Sat => &[ItemCode { itemid: 220277, unit: SourceUnit::Native }],
            Temp => &[
                ItemCode {
                    itemid: 223761,
                    unit: SourceUnit::Fahrenheit,
                },
                ItemCode { itemid: 223762, unit: SourceUnit::Native },
            ],
            Sbp => &[
                ItemCode { itemid: 220179, unit: SourceUnit::Native },
                ItemCode { itemid: 220050, unit: SourceUnit::Native },
            ],
            Map => &[
                ItemCode { itemid: 220181, unit: SourceUnit::Native },
                ItemCode { itemid: 220052, unit: SourceUnit::Native },
                ItemCode { itemid: 225312, unit: SourceUnit::Native },
            ],
            Dbp => &[
                ItemCode { itemid: 220180, unit: SourceUnit::Native },
                ItemCode { itemid: 220051, unit: SourceUnit::Native },
            ],
            Resp => &[
                ItemCode { itemid: 220210, unit: SourceUnit::Native },
                ItemCode { itemid: 224690, unit: SourceUnit::Native },
            ],
            EtCo2 => &[ItemCode { itemid: 228640, unit: SourceUnit::Native }],
            BaseExcess => &[ItemCode { itemid: 50802, unit: SourceUnit::Native }],
            Hco3 => &[
                ItemCode { itemid: 50882, unit: SourceUnit::Native },
                ItemCode { itemid: 50803, unit: SourceUnit::Native },
            ],
            FiO2 => &[
                ItemCode { itemid: 50816, unit: SourceUnit::Native },
                ItemCode { itemid: 223835, unit: SourceUnit::Native },
            ],
            Ph => &[ItemCode { itemid: 50820, unit: SourceUnit::Native }],
            PaCo2 => &[ItemCode { itemid: 50818, unit: SourceUnit::Native }],
            SaO2 => &[ItemCode { itemid: 50817, unit: SourceUnit::Native }],
            Ast => &[ItemCode { itemid: 50878, unit: SourceUnit::Native }],
            Bun => &[ItemCode { itemid: 51006, unit: SourceUnit::Native }],
            AlkalinePhos => &[ItemCode { itemid: 50863, unit: SourceUnit::Native }],
            Calcium => &[ItemCode { itemid: 50893, unit: SourceUnit::Native }],
            Chloride => &[
                ItemCode { itemid: 50902, unit: SourceUnit::Native },
                ItemCode { itemid: 50806, unit: SourceUnit::Native },
            ],
            Creatinine => &[ItemCode { itemid: 50912, unit: SourceUnit::Native }],
            BilirubinDirect => &[ItemCode { itemid: 50883, unit: SourceUnit::Native }],
            Glucose => &[
                ItemCode { itemid: 50931, unit: SourceUnit::Native },
                ItemCode { itemid: 50809, unit: SourceUnit::Native },
            ],
            Lactate => &[ItemCode { itemid: 50813, unit: SourceUnit::Native }],
            Magnesium => &[ItemCode { itemid: 50960, unit: SourceUnit::Native }],
            Phosphate => &[ItemCode { itemid: 50970, unit: SourceUnit::Native }],
            Potassium => &[
                ItemCode { itemid: 50971, unit: SourceUnit::Native },
                ItemCode { itemid: 50822, unit: SourceUnit::Native },
            ],
            BilirubinTotal => &[ItemCode { itemid: 50885, unit: SourceUnit::Native }],
            TroponinI => &[ItemCode { itemid: 51002, unit: SourceUnit::Native }],
            Hct => &[
                ItemCode { itemid: 51221, unit: SourceUnit::Native },
                ItemCode { itemid: 50810, unit: SourceUnit::Native },
            ],
            Hgb => &[
                ItemCode { itemid: 51222, unit: SourceUnit::Native },
                ItemCode { itemid: 50811, unit: SourceUnit::Native },
            ],
            Ptt => &[ItemCode { itemid: 51275, unit: SourceUnit::Native }],
            Wbc => &[
                ItemCode { itemid: 51301, unit: SourceUnit::Native },
                ItemCode { itemid: 51300, unit: SourceUnit::Native },
            ],
            Fibrinogen => &[ItemCode { itemid: 51214, unit: SourceUnit::Native }],
            Platelets => &[ItemCode { itemid: 51265, unit: SourceUnit::Native }],
        }
    }

    /// Look up the variable and source unit for an item code
    pub fn for_item(itemid: i64) -> Option<(Variable, SourceUnit)> {
        Self::ALL.iter().find_map(|variable| {
            variable
                .item_codes()
                .iter()
                .find(|code| code.itemid == itemid)
                .map(|code| (*variable, code.unit))
        })
    }

    /// Validate a raw reading, converting units first. Returns `None` when the
    /// reading falls outside the variable's range.
    pub fn validate(&self, raw: f64, unit: SourceUnit) -> Option<f64> {
        if !raw.is_finite() {
            return None;
        }
        let value = match unit {
            SourceUnit::Native => raw,
            SourceUnit::Fahrenheit => {
                if !FAHRENHEIT_BOUNDS.contains(raw) {
                    return None;
                }
                fahrenheit_to_celsius(raw)
            }
        };
        self.bounds().contains(value).then_some(value)
    }
}

/// (v - 32) * 5/9
pub fn fahrenheit_to_celsius(value: f64) -> f64 {
    (value - 32.0) * 5.0 / 9.0
}
