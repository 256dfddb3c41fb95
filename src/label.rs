//! Sepsis label derivation
//!
//! Computes each stay's onset time from its suspected-infection and
//! organ-dysfunction times, then labels hours relative to that onset.
//!
//! A stay qualifies only when:
//! - both candidate times are present (and the episode is flagged septic)
//! - dysfunction lies within [-24h, +12h] of suspicion, bounds inclusive
//! - onset = min(suspicion, dysfunction) is at or after intime + 4h
//!
//! For a qualifying stay, an hour is positive iff
//! `hour >= onset - 6h && hour >= intime + 4h`. Every other hour is 0.

use crate::config::LabelConfig;
use crate::types::{SepsisCandidate, SepsisEpisode, Stay};
use chrono::{DateTime, Duration, Utc};

/// Label deriver for retrospective onset labels
#[derive(Debug, Clone)]
pub struct LabelDeriver {
    window_before: Duration,
    window_after: Duration,
    min_onset_delay: Duration,
    lookback: Duration,
    require_sepsis_flag: bool,
}

impl Default for LabelDeriver {
    fn default() -> Self {
        Self::new(&LabelConfig::default())
    }
}

impl LabelDeriver {
    pub fn new(config: &LabelConfig) -> Self {
        Self {
            window_before: Duration::hours(config.window_before_hours),
            window_after: Duration::hours(config.window_after_hours),
            min_onset_delay: Duration::hours(config.min_onset_delay_hours),
            lookback: Duration::hours(config.lookback_hours),
            require_sepsis_flag: config.require_sepsis_flag,
        }
    }

    /// Qualifying episode for one candidate, if any
    pub fn qualify(&self, stay: &Stay, candidate: &SepsisCandidate) -> Option<SepsisEpisode> {
        if candidate.stay_id != stay.stay_id {
            return None;
        }
        if self.require_sepsis_flag && !candidate.sepsis3 {
            return None;
        }
        let suspicion = candidate.suspected_infection_time?;
        let dysfunction = candidate.sofa_time?;

        let offset = dysfunction - suspicion;
        if offset < -self.window_before || offset > self.window_after {
            return None;
        }

        let onset = suspicion.min(dysfunction);
        if onset < stay.intime + self.min_onset_delay {
            return None;
        }

        Some(SepsisEpisode {
            stay_id: stay.stay_id,
            suspected_infection_time: suspicion,
            sofa_time: dysfunction,
            onset_time: onset,
        })
    }

    /// The stay's episode: the qualifying candidate with the earliest onset
    pub fn episode(&self, stay: &Stay, candidates: &[SepsisCandidate]) -> Option<SepsisEpisode> {
        candidates
            .iter()
            .filter_map(|c| self.qualify(stay, c))
            .min_by_key(|e| e.onset_time)
    }

    /// Binary label for one hour of a stay
    pub fn label(&self, stay: &Stay, episode: Option<&SepsisEpisode>, hour: DateTime<Utc>) -> u8 {
        match episode {
            Some(e)
                if e.stay_id == stay.stay_id
                    && hour >= e.onset_time - self.lookback
                    && hour >= stay.intime + self.min_onset_delay =>
            {
                1
            }
            _ => 0,
        }
    }
}
