//! Pipeline orchestration
//!
//! This module provides the public API for Sepsis Flux. It builds the cohort,
//! splits it into batches, streams each feed once per batch, and runs the
//! per-stay stages on a worker pool.
//!
//! Per-stay stages:
//! 1. VariableReducer - vitals and labs to hourly medians
//! 2. AntibioticReducer - administrations to hourly exposure
//! 3. SourceMerger - outer union on (stay, hour)
//! 4. LabelDeriver - onset and per-hour labels
//! 5. RowAssembler - final hourly rows

use crate::antibiotics::AntibioticReducer;
use crate::assembler::RowAssembler;
use crate::cohort::{CohortFilter, CohortStats};
use crate::config::PipelineConfig;
use crate::encoder::{MemorySink, RowSink};
use crate::error::{PipelineError, RowError};
use crate::label::LabelDeriver;
use crate::merger::SourceMerger;
use crate::reducer::VariableReducer;
use crate::schema::{ChartEvent, TabularSource};
use crate::types::{
    AntibioticAdministration, Event, HourlyFeatureRow, SepsisCandidate, Stay, StayId,
};
use crate::variables::SourceGroup;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything one stay needs, gathered from the feeds
#[derive(Debug, Clone)]
pub struct StayInputs {
    pub stay: Stay,
    pub events: Vec<Event>,
    pub antibiotics: Vec<AntibioticAdministration>,
    pub sepsis: Vec<SepsisCandidate>,
}

impl StayInputs {
    pub fn new(stay: Stay) -> Self {
        Self {
            stay,
            events: Vec::new(),
            antibiotics: Vec::new(),
            sepsis: Vec::new(),
        }
    }
}

/// Rows produced for one stay
#[derive(Debug, Clone)]
pub struct StayOutput {
    pub rows: Vec<HourlyFeatureRow>,
    pub septic: bool,
}

/// Runs the per-stay stages. Holds no state across stays
#[derive(Debug, Clone)]
pub struct StayProcessor {
    antibiotics: AntibioticReducer,
    labels: LabelDeriver,
}

impl Default for StayProcessor {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl StayProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            antibiotics: AntibioticReducer::new(&config.antibiotics),
            labels: LabelDeriver::new(&config.label),
        }
    }

    pub fn process(&self, inputs: &StayInputs) -> StayOutput {
        let stay = &inputs.stay;

        let vitals = VariableReducer::reduce(stay, &inputs.events, SourceGroup::Vitals);
        let labs = VariableReducer::reduce(stay, &inputs.events, SourceGroup::Labs);
        let exposure = self.antibiotics.reduce(stay, &inputs.antibiotics);
        let merged = SourceMerger::merge_sources(vitals, labs, exposure);

        let episode = self.labels.episode(stay, &inputs.sepsis);
        let rows = RowAssembler::assemble(stay, &merged, &self.labels, episode.as_ref());

        StayOutput {
            rows,
            septic: episode.is_some(),
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub cohort: CohortStats,
    pub batches: usize,
    /// Rows skipped for unparseable values, across all feeds
    pub rows_skipped: usize,
    /// Events dropped because no stay could be resolved for them
    pub events_unresolved: usize,
    pub rows_written: usize,
    /// Stays with a qualifying sepsis episode
    pub septic_stays: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Counters shared by the passes of one run
#[derive(Debug, Default)]
struct RunCounters {
    rows_skipped: usize,
    events_unresolved: usize,
}

impl RunCounters {
    /// Count a skipped row. Feeds are re-read per batch, so only the first
    /// pass counts
    fn skip(&mut self, feed: &str, error: &RowError, count: bool) {
        if count {
            self.rows_skipped += 1;
            debug!(feed, %error, "Skipping row");
        }
    }
}

/// Maps events without a stay id onto a stay by (subject, admission) and time
struct StayResolver {
    by_admission: HashMap<(i64, i64), Vec<(StayId, DateTime<Utc>, DateTime<Utc>)>>,
}

impl StayResolver {
    fn new(cohort: &[Stay]) -> Self {
        let mut by_admission: HashMap<(i64, i64), Vec<_>> = HashMap::new();
        for stay in cohort {
            by_admission
                .entry((stay.subject_id, stay.hadm_id))
                .or_default()
                .push((stay.stay_id, stay.intime, stay.outtime));
        }
        Self { by_admission }
    }

    fn resolve(&self, event: &ChartEvent) -> Option<StayId> {
        if let Some(stay_id) = event.stay_id {
            return Some(stay_id);
        }
        let key = (event.subject_id?, event.hadm_id?);
        self.by_admission.get(&key)?.iter().find_map(|(id, intime, outtime)| {
            (event.charttime >= *intime && event.charttime <= *outtime).then_some(*id)
        })
    }
}

/// Batch pipeline over a tabular source
pub struct Pipeline {
    config: PipelineConfig,
    cohort_filter: CohortFilter,
    processor: StayProcessor,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    /// Create a pipeline with its own worker pool
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let threads = config.workers.unwrap_or_else(rayon::current_num_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        Ok(Self {
            cohort_filter: CohortFilter::new(config.cohort.clone()),
            processor: StayProcessor::new(&config),
            config,
            pool,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read the admissions feed and keep eligible stays, sorted by
    /// (subject_id, stay_id). Duplicate stay ids keep their first row.
    pub fn build_cohort(
        &self,
        source: &dyn TabularSource,
    ) -> Result<(Vec<Stay>, CohortStats, usize), PipelineError> {
        let mut stats = CohortStats::default();
        let mut seen = BTreeSet::new();
        let mut cohort = Vec::new();
        let mut skipped = 0usize;
        let mut duplicates = 0usize;

        for item in source.admissions()? {
            let admission = match item? {
                Ok(admission) => admission,
                Err(error) => {
                    skipped += 1;
                    debug!(feed = "stays", %error, "Skipping row");
                    continue;
                }
            };
            if !seen.insert(admission.stay_id) {
                duplicates += 1;
                continue;
            }
            match self.cohort_filter.evaluate(&admission) {
                Ok(stay) => {
                    stats.record(Ok(()));
                    cohort.push(stay);
                }
                Err(exclusion) => stats.record(Err(exclusion)),
            }
        }

        cohort.sort_by_key(|s| (s.subject_id, s.stay_id));

        if duplicates > 0 {
            warn!(duplicates, "Ignored duplicate stay rows");
        }
        if stats.short_stay + stats.age_out_of_range > 0 {
            warn!(
                short_stay = stats.short_stay,
                age_out_of_range = stats.age_out_of_range,
                "Excluded stays from cohort"
            );
        }
        info!(
            admissions = stats.admissions,
            eligible = stats.eligible,
            "Cohort built"
        );

        Ok((cohort, stats, skipped))
    }

    /// Run the full pipeline, writing rows to `sink` batch by batch
    pub fn run(
        &self,
        source: &dyn TabularSource,
        sink: &mut dyn RowSink,
    ) -> Result<RunSummary, PipelineError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, batch_size = self.config.batch_size, "Starting run");

        source.check_schema()?;
        let (cohort, cohort_stats, admission_skips) = self.build_cohort(source)?;
        let resolver = StayResolver::new(&cohort);
        let mut counters = RunCounters {
            rows_skipped: admission_skips,
            ..Default::default()
        };

        let mut batches = 0usize;
        let mut rows_written = 0usize;
        let mut septic_stays = 0usize;

        for (index, batch) in cohort.chunks(self.config.batch_size).enumerate() {
            let inputs = self.load_batch(source, batch, &resolver, &mut counters, index == 0)?;

            let outputs: Vec<StayOutput> = self
                .pool
                .install(|| inputs.par_iter().map(|i| self.processor.process(i)).collect());

            let mut batch_rows = 0usize;
            for output in &outputs {
                sink.write_rows(&output.rows)?;
                batch_rows += output.rows.len();
                septic_stays += usize::from(output.septic);
            }
            rows_written += batch_rows;
            batches += 1;

            info!(
                batch = index,
                stays = batch.len(),
                rows = batch_rows,
                "Batch complete"
            );
        }

        sink.finish()?;

        if counters.events_unresolved > 0 {
            warn!(
                events = counters.events_unresolved,
                "Dropped events without a resolvable stay"
            );
        }

        let summary = RunSummary {
            run_id,
            started_at,
            cohort: cohort_stats,
            batches,
            rows_skipped: counters.rows_skipped,
            events_unresolved: counters.events_unresolved,
            rows_written,
            septic_stays,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            %run_id,
            rows = summary.rows_written,
            septic_stays = summary.septic_stays,
            skipped = summary.rows_skipped,
            elapsed_ms = summary.elapsed_ms,
            "Run complete"
        );
        Ok(summary)
    }

    /// Stream every feed once, keeping only rows of the batch's stays
    fn load_batch(
        &self,
        source: &dyn TabularSource,
        batch: &[Stay],
        resolver: &StayResolver,
        counters: &mut RunCounters,
        first_pass: bool,
    ) -> Result<Vec<StayInputs>, PipelineError> {
        let position: HashMap<StayId, usize> = batch
            .iter()
            .enumerate()
            .map(|(i, s)| (s.stay_id, i))
            .collect();
        let mut inputs: Vec<StayInputs> = batch.iter().cloned().map(StayInputs::new).collect();
        let ceiling = self.config.memory_ceiling_events;
        let mut buffered = 0usize;

        for item in source.events()? {
            let event = match item? {
                Ok(event) => event,
                Err(error) => {
                    counters.skip("events", &error, first_pass);
                    continue;
                }
            };
            let Some(stay_id) = resolver.resolve(&event) else {
                if first_pass {
                    counters.events_unresolved += 1;
                }
                continue;
            };
            if let Some(&i) = position.get(&stay_id) {
                inputs[i].events.push(Event {
                    stay_id,
                    itemid: event.itemid,
                    charttime: event.charttime,
                    value: event.value,
                });
                buffered += 1;
                if buffered > ceiling {
                    return Err(PipelineError::MemoryCeilingExceeded { buffered, ceiling });
                }
            }
        }

        for item in source.antibiotics()? {
            match item? {
                Ok(admin) => {
                    if let Some(&i) = position.get(&admin.stay_id) {
                        inputs[i].antibiotics.push(admin);
                        buffered += 1;
                        if buffered > ceiling {
                            return Err(PipelineError::MemoryCeilingExceeded { buffered, ceiling });
                        }
                    }
                }
                Err(error) => counters.skip("antibiotics", &error, first_pass),
            }
        }

        for item in source.sepsis()? {
            match item? {
                Ok(candidate) => {
                    if let Some(&i) = position.get(&candidate.stay_id) {
                        inputs[i].sepsis.push(candidate);
                    }
                }
                Err(error) => counters.skip("sepsis", &error, first_pass),
            }
        }

        debug!(stays = batch.len(), buffered, "Batch loaded");
        Ok(inputs)
    }
}

/// Run the pipeline and collect every row in memory
pub fn process_to_rows(
    config: PipelineConfig,
    source: &dyn TabularSource,
) -> Result<(Vec<HourlyFeatureRow>, RunSummary), PipelineError> {
    let pipeline = Pipeline::new(config)?;
    let mut sink = MemorySink::new();
    let summary = pipeline.run(source, &mut sink)?;
    Ok((sink.rows, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Admission, MemorySource};
    use crate::variables::Variable;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2150, 1, 1, 0, 0, 0).unwrap()
    }

    fn admission(stay_id: StayId, subject_id: i64, los_hours: i64) -> Admission {
        Admission {
            stay_id,
            subject_id,
            hadm_id: stay_id * 10,
            intime: t0(),
            outtime: t0() + Duration::hours(los_hours),
            first_careunit: "Medical Intensive Care Unit (MICU)".to_string(),
            anchor_age: 60,
            anchor_year: 2150,
            admittime: t0() - Duration::hours(3),
            gender: "M".to_string(),
        }
    }

    fn heart_rate(stay_id: Option<StayId>, hadm_id: i64, hours: i64, value: f64) -> ChartEvent {
        ChartEvent {
            stay_id,
            subject_id: Some(1),
            hadm_id: Some(hadm_id),
            charttime: t0() + Duration::hours(hours) + Duration::minutes(5),
            itemid: 220045,
            value,
        }
    }

    #[test]
    fn test_cohort_sorted_and_filtered() {
        let source = MemorySource {
            admissions: vec![
                admission(3, 2, 24),
                admission(2, 1, 24),
                admission(1, 1, 4), // too short
                admission(2, 1, 48), // duplicate stay id
            ],
            ..Default::default()
        };
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let (cohort, stats, skipped) = pipeline.build_cohort(&source).unwrap();

        let ids: Vec<_> = cohort.iter().map(|s| s.stay_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(stats.admissions, 3);
        assert_eq!(stats.short_stay, 1);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_events_resolved_by_admission() {
        let source = MemorySource {
            admissions: vec![admission(1, 1, 24)],
            events: vec![
                heart_rate(None, 10, 2, 90.0),
                heart_rate(None, 99, 2, 90.0), // unknown admission
                heart_rate(None, 10, 30, 90.0), // after outtime
            ],
            ..Default::default()
        };
        let (rows, summary) = process_to_rows(PipelineConfig::default(), &source).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].features.get(Variable::HeartRate), Some(90.0));
        assert_eq!(summary.events_unresolved, 2);
    }

    #[test]
    fn test_batches_preserve_cohort_order() {
        let source = MemorySource {
            admissions: (1..=5).map(|id| admission(id, 6 - id, 24)).collect(),
            events: (1..=5)
                .map(|id| heart_rate(Some(id), id * 10, 1, 80.0))
                .collect(),
            ..Default::default()
        };
        let config = PipelineConfig::new().with_batch_size(2).with_workers(2);
        let (rows, summary) = process_to_rows(config, &source).unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.rows_written, 5);
        let subjects: Vec<_> = rows.iter().map(|r| r.subject_id).collect();
        assert_eq!(subjects, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_memory_ceiling() {
        let source = MemorySource {
            admissions: vec![admission(1, 1, 24)],
            events: (0..5).map(|h| heart_rate(Some(1), 10, h, 80.0)).collect(),
            ..Default::default()
        };
        let config = PipelineConfig::new().with_memory_ceiling(3);
        match process_to_rows(config, &source) {
            Err(PipelineError::MemoryCeilingExceeded { buffered, ceiling }) => {
                assert_eq!(buffered, 4);
                assert_eq!(ceiling, 3);
            }
            other => panic!("expected ceiling error, got {other:?}"),
        }
    }

    #[test]
    fn test_processor_marks_septic_stays() {
        let filter = CohortFilter::new(Default::default());
        let stay = filter.evaluate(&admission(1, 1, 24)).unwrap();
        let mut inputs = StayInputs::new(stay);
        inputs.events.push(Event {
            stay_id: 1,
            itemid: 220045,
            charttime: t0() + Duration::hours(9),
            value: 100.0,
        });
        inputs.sepsis.push(SepsisCandidate {
            stay_id: 1,
            suspected_infection_time: Some(t0() + Duration::hours(10)),
            sofa_time: Some(t0() + Duration::hours(12)),
            sepsis3: true,
        });

        let output = StayProcessor::default().process(&inputs);
        assert!(output.septic);
        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.rows[0].sepsis_label, 1);
    }
}
