//! Pipeline configuration
//!
//! Resource knobs (batch size, worker count, memory ceiling) and the clinical
//! constants of each stage, passed explicitly into the pipeline.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of stays processed per batch
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Default ceiling on events buffered for one batch
pub const DEFAULT_MEMORY_CEILING_EVENTS: usize = 5_000_000;

/// Main configuration for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stays per batch; bounds memory together with `memory_ceiling_events`
    pub batch_size: usize,
    /// Worker threads. `None` uses the rayon default
    pub workers: Option<usize>,
    /// Maximum events buffered for a single batch
    pub memory_ceiling_events: usize,
    pub cohort: CohortConfig,
    pub label: LabelConfig,
    pub antibiotics: AntibioticConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: None,
            memory_ceiling_events: DEFAULT_MEMORY_CEILING_EVENTS,
            cohort: CohortConfig::default(),
            label: LabelConfig::default(),
            antibiotics: AntibioticConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_memory_ceiling(mut self, events: usize) -> Self {
        self.memory_ceiling_events = events;
        self
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "workers must be > 0".to_string(),
            ));
        }
        if self.memory_ceiling_events == 0 {
            return Err(PipelineError::InvalidConfig(
                "memory_ceiling_events must be > 0".to_string(),
            ));
        }
        if self.cohort.min_age > self.cohort.max_age {
            return Err(PipelineError::InvalidConfig(format!(
                "min_age {} exceeds max_age {}",
                self.cohort.min_age, self.cohort.max_age
            )));
        }
        let hours = [
            ("cohort.min_los_hours", self.cohort.min_los_hours),
            ("label.window_before_hours", self.label.window_before_hours),
            ("label.window_after_hours", self.label.window_after_hours),
            ("label.min_onset_delay_hours", self.label.min_onset_delay_hours),
            ("label.lookback_hours", self.label.lookback_hours),
            ("antibiotics.tolerance_hours", self.antibiotics.tolerance_hours),
        ];
        if let Some((name, value)) = hours.iter().find(|(_, v)| *v < 0) {
            return Err(PipelineError::InvalidConfig(format!(
                "{} must be >= 0, got {}",
                name, value
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Cohort eligibility bounds and care-unit patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub min_los_hours: i64,
    pub min_age: i32,
    pub max_age: i32,
    /// Care-unit name pattern for the medical ICU flag
    pub unit1_pattern: String,
    /// Care-unit name pattern for the surgical ICU flag
    pub unit2_pattern: String,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            min_los_hours: 8,
            min_age: 18,
            max_age: 89,
            unit1_pattern: "MICU".to_string(),
            unit2_pattern: "SICU".to_string(),
        }
    }
}

/// Onset validity window and labeling offsets (hours)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// How far the dysfunction time may precede the suspicion time
    pub window_before_hours: i64,
    /// How far the dysfunction time may follow the suspicion time
    pub window_after_hours: i64,
    /// Onset must be at or after intime plus this delay
    pub min_onset_delay_hours: i64,
    /// Positive labels start this many hours before onset
    pub lookback_hours: i64,
    /// Only episodes flagged septic by the feed qualify
    pub require_sepsis_flag: bool,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            window_before_hours: 24,
            window_after_hours: 12,
            min_onset_delay_hours: 4,
            lookback_hours: 6,
            require_sepsis_flag: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntibioticConfig {
    /// Administrations within this many hours of the stay participate
    pub tolerance_hours: i64,
}

impl Default for AntibioticConfig {
    fn default() -> Self {
        Self { tolerance_hours: 24 }
    }
}
