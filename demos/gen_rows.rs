//! Generate hourly rows for a small synthetic cohort, as NDJSON on stdout

use chrono::{Duration, TimeZone, Utc};
use sepsis_flux::encoder::NdjsonSink;
use sepsis_flux::schema::{Admission, ChartEvent, MemorySource};
use sepsis_flux::types::{AntibioticAdministration, SepsisCandidate};
use sepsis_flux::{Pipeline, PipelineConfig};

fn main() {
    let Some(intime) = Utc.with_ymd_and_hms(2150, 1, 1, 8, 0, 0).single() else {
        return;
    };
    let at = |hours: i64| intime + Duration::hours(hours) + Duration::minutes(20);

    let source = MemorySource {
        admissions: vec![Admission {
            stay_id: 1,
            subject_id: 10,
            hadm_id: 100,
            intime,
            outtime: intime + Duration::hours(16),
            first_careunit: "Medical Intensive Care Unit (MICU)".to_string(),
            anchor_age: 64,
            anchor_year: 2149,
            admittime: intime - Duration::hours(5),
            gender: "F".to_string(),
        }],
        events: (0..12)
            .flat_map(|h| {
                [(220045, 84.0 + h as f64 * 2.0), (220179, 118.0), (220180, 61.0)]
                    .into_iter()
                    .map(move |(itemid, value)| ChartEvent {
                        stay_id: Some(1),
                        subject_id: Some(10),
                        hadm_id: Some(100),
                        charttime: at(h),
                        itemid,
                        value,
                    })
            })
            .collect(),
        antibiotics: vec![AntibioticAdministration {
            stay_id: 1,
            antibiotic: "Vancomycin".to_string(),
            starttime: at(7),
            stoptime: Some(at(9)),
        }],
        sepsis: vec![SepsisCandidate {
            stay_id: 1,
            suspected_infection_time: Some(at(9)),
            sofa_time: Some(at(11)),
            sepsis3: true,
        }],
    };

    let result = Pipeline::new(PipelineConfig::default()).and_then(|pipeline| {
        let mut sink = NdjsonSink::new(std::io::stdout());
        pipeline.run(&source, &mut sink)
    });
    match result {
        Ok(summary) => eprintln!("{} rows", summary.rows_written),
        Err(e) => eprintln!("Error: {e:?}"),
    }
}
