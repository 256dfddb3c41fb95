//! End-to-end tests through the in-memory and file-backed sources

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use sepsis_flux::encoder::{CsvSink, NdjsonSink};
use sepsis_flux::schema::{Admission, ChartEvent, FeedPaths, FileSource, MemorySource, TabularSource};
use sepsis_flux::types::{AntibioticAdministration, SepsisCandidate};
use sepsis_flux::{
    process_to_rows, HourlyFeatureRow, LabelReport, Pipeline, PipelineConfig, PipelineError,
    Variable,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2150, 3, 1, 8, 0, 0).unwrap()
}

fn at(hours: i64, minutes: i64) -> DateTime<Utc> {
    t0() + Duration::hours(hours) + Duration::minutes(minutes)
}

fn admission(stay_id: i64, subject_id: i64, los_hours: i64) -> Admission {
    Admission {
        stay_id,
        subject_id,
        hadm_id: stay_id + 1000,
        intime: t0(),
        outtime: t0() + Duration::hours(los_hours),
        first_careunit: "Medical Intensive Care Unit (MICU)".to_string(),
        anchor_age: 55,
        anchor_year: 2148,
        admittime: t0() - Duration::hours(6),
        gender: "F".to_string(),
    }
}

fn event(stay_id: i64, itemid: i64, hours: i64, minutes: i64, value: f64) -> ChartEvent {
    ChartEvent {
        stay_id: Some(stay_id),
        subject_id: None,
        hadm_id: None,
        charttime: at(hours, minutes),
        itemid,
        value,
    }
}

fn candidate(stay_id: i64, suspicion: i64, sofa: i64) -> SepsisCandidate {
    SepsisCandidate {
        stay_id,
        suspected_infection_time: Some(at(suspicion, 0)),
        sofa_time: Some(at(sofa, 0)),
        sepsis3: true,
    }
}

/// Stay 1: septic, onset T0+10h. Stay 2: onset too early. Stay 3: no episode.
/// Stay 4: too short for the cohort.
fn source() -> MemorySource {
    let mut events = Vec::new();
    for stay in 1..=3 {
        for hour in 0..20 {
            events.push(event(stay, 220045, hour, 15, 80.0 + hour as f64));
        }
    }
    events.extend([
        // {72, 400, 68} -> 70
        event(3, 220045, 21, 5, 72.0),
        event(3, 220045, 21, 10, 400.0),
        event(3, 220045, 21, 20, 68.0),
        // MAP from components only
        event(3, 220179, 22, 0, 120.0),
        event(3, 220180, 22, 30, 60.0),
        // labs only
        event(3, 50813, 23, 0, 2.4),
        // before intime and after outtime
        event(3, 220045, -1, 30, 90.0),
        event(3, 220045, 31, 0, 90.0),
        event(4, 220045, 1, 0, 90.0),
    ]);

    MemorySource {
        admissions: vec![
            admission(3, 30, 30),
            admission(1, 10, 30),
            admission(2, 20, 30),
            admission(4, 40, 5),
        ],
        events,
        antibiotics: vec![
            AntibioticAdministration {
                stay_id: 1,
                antibiotic: "Vancomycin".to_string(),
                starttime: at(9, 30),
                stoptime: Some(at(12, 10)),
            },
            AntibioticAdministration {
                stay_id: 1,
                antibiotic: "Piperacillin".to_string(),
                starttime: at(11, 0),
                stoptime: None,
            },
            AntibioticAdministration {
                stay_id: 3,
                antibiotic: "Cefepime".to_string(),
                starttime: at(25, 0),
                stoptime: Some(at(26, 0)),
            },
        ],
        sepsis: vec![candidate(1, 10, 12), candidate(2, 2, 3)],
    }
}

fn by_stay(rows: &[HourlyFeatureRow]) -> BTreeMap<i64, Vec<&HourlyFeatureRow>> {
    let mut map: BTreeMap<i64, Vec<&HourlyFeatureRow>> = BTreeMap::new();
    for row in rows {
        map.entry(row.stay_id).or_default().push(row);
    }
    map
}

fn run() -> Vec<HourlyFeatureRow> {
    process_to_rows(PipelineConfig::default(), &source()).unwrap().0
}

#[test]
fn test_rows_lie_within_stay_window() {
    let rows = run();
    assert!(!rows.is_empty());
    for row in &rows {
        assert!(row.intime <= row.hour && row.hour <= row.outtime);
    }
    assert!(rows.iter().all(|r| r.stay_id != 4));
}

#[test]
fn test_output_is_ordered_and_unique() {
    let rows = run();
    let keys: Vec<_> = rows.iter().map(|r| (r.subject_id, r.stay_id, r.hour)).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(keys, sorted);
}

#[test]
fn test_labels_are_monotone_per_stay() {
    let rows = run();
    for (_, stay_rows) in by_stay(&rows) {
        let labels: Vec<u8> = stay_rows.iter().map(|r| r.sepsis_label).collect();
        assert!(labels.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn test_end_to_end_label_scenario() {
    let rows = run();
    let stays = by_stay(&rows);
    let label_at = |stay: i64, hour: i64| {
        stays[&stay]
            .iter()
            .find(|r| r.hour == at(hour, 0))
            .map(|r| r.sepsis_label)
    };

    assert_eq!(label_at(1, 3), Some(0));
    assert_eq!(label_at(1, 4), Some(1));
    assert_eq!(label_at(1, 5), Some(1));

    // onset T0+2h is excluded entirely
    assert!(stays[&2].iter().all(|r| r.sepsis_label == 0));
    // no episode at all
    assert!(stays[&3].iter().all(|r| r.sepsis_label == 0));
}

#[test]
fn test_antibiotic_flag_matches_count() {
    let rows = run();
    for row in &rows {
        assert_eq!(row.antibiotic_flag == 1, row.antibiotic_count >= 1);
        assert_eq!(row.antibiotic_names.is_some(), row.antibiotic_count >= 1);
    }

    let stays = by_stay(&rows);
    let hour_11 = stays[&1].iter().find(|r| r.hour == at(11, 0)).unwrap();
    assert_eq!(hour_11.antibiotic_count, 2);
    assert_eq!(
        hour_11.antibiotic_names.as_deref(),
        Some("piperacillin, vancomycin")
    );

    // antibiotic-only hours still produce rows
    let hour_25 = stays[&3].iter().find(|r| r.hour == at(25, 0)).unwrap();
    assert_eq!(hour_25.antibiotic_flag, 1);
    assert!(hour_25.features.is_empty());
}

#[test]
fn test_reduction_imputation_and_merge() {
    let rows = run();
    let stays = by_stay(&rows);
    let row_at = |hour: i64| stays[&3].iter().find(|r| r.hour == at(hour, 0)).copied();

    assert_eq!(row_at(21).unwrap().features.get(Variable::HeartRate), Some(70.0));

    let map_row = row_at(22).unwrap();
    assert_eq!(map_row.features.get(Variable::Map), Some(80.0));
    assert_eq!(map_row.features.get(Variable::HeartRate), None);

    let lab_row = row_at(23).unwrap();
    assert_eq!(lab_row.features.get(Variable::Lactate), Some(2.4));
    assert_eq!(lab_row.features.get(Variable::HeartRate), None);

    assert!(row_at(31).is_none());
}

#[test]
fn test_stay_attributes() {
    let rows = run();
    let row = rows.iter().find(|r| r.stay_id == 1).unwrap();
    assert_eq!(row.subject_id, 10);
    assert_eq!(row.hadm_id, 1001);
    assert_eq!(row.age, 57);
    assert_eq!(row.unit1, 1);
    assert_eq!(row.unit2, 0);
    assert_eq!(row.hosp_adm_time, -6.0);
    assert_eq!(row.icu_los_hours, 30.0);
}

#[test]
fn test_batching_and_workers_do_not_change_output() {
    let reference = run();
    for (batch_size, workers) in [(1, 1), (2, 3), (3, 2)] {
        let config = PipelineConfig::new()
            .with_batch_size(batch_size)
            .with_workers(workers);
        let (rows, summary) = process_to_rows(config, &source()).unwrap();
        assert_eq!(rows, reference);
        assert_eq!(summary.rows_written, reference.len());
        assert_eq!(summary.septic_stays, 1);
        assert_eq!(summary.cohort.eligible, 3);
        assert_eq!(summary.cohort.short_stay, 1);
    }
}

#[test]
fn test_report_over_memory_rows() {
    let rows = run();
    let report = LabelReport::from_rows(&rows);
    assert_eq!(report.total_rows, rows.len());
    assert_eq!(report.total_stays, 3);
    assert_eq!(report.septic_stays, 1);
    assert_eq!(report.early_positive_violations, 0);
    assert!(report.antibiotic_hours > 0);
    assert!(report.positive_row_rate > 0.0 && report.positive_row_rate < 1.0);
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn csv_feeds(dir: &Path, events_header: &str) -> FeedPaths {
    FeedPaths {
        stays: write(
            dir,
            "stays.csv",
            "stay_id,subject_id,hadm_id,intime,outtime,first_careunit,anchor_age,anchor_year,admittime,gender\n\
             1,10,100,2150-03-01 08:00:00,2150-03-02 08:00:00,Surgical Intensive Care Unit (SICU),70,2150,2150-03-01 06:30:00,M\n\
             2,20,200,2150-03-01 08:00:00,2150-03-01 12:00:00,MICU,70,2150,2150-03-01 06:30:00,F\n",
        ),
        events: write(
            dir,
            "events.csv",
            &format!(
                "{events_header}\n\
                 1,10,100,2150-03-01 09:10:00,220045,88\n\
                 ,10,100,2150-03-01 09:40:00,220045,92\n\
                 1,10,100,2150-03-01 10:05:00,223762,38\n\
                 1,10,100,bad-time,220045,88\n\
                 1,10,100,2150-03-01 19:00:00,220045,120\n"
            ),
        ),
        antibiotics: write(
            dir,
            "abx.csv",
            "stay_id,antibiotic,starttime,stoptime\n1,Cefepime,2150-03-01 10:30:00,2150-03-01 11:15:00\n",
        ),
        sepsis: write(
            dir,
            "sepsis.csv",
            "stay_id,suspected_infection_time,sofa_time,sepsis3\n1,2150-03-01 20:00:00,2150-03-01 18:30:00,1\n",
        ),
    }
}

#[test]
fn test_csv_feeds_to_csv_output_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let feeds = csv_feeds(dir.path(), "stay_id,subject_id,hadm_id,charttime,itemid,valuenum");
    let source = FileSource::new(feeds);
    source.check_schema().unwrap();

    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let mut sink = CsvSink::new(Vec::new());
    let summary = pipeline.run(&source, &mut sink).unwrap();
    let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();

    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(summary.events_unresolved, 0);
    assert_eq!(summary.cohort.short_stay, 1);
    assert_eq!(summary.septic_stays, 1);

    // header + hours 09, 10, 11, 19
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[1].contains(",2150-03-01 09:00:00,90,"));
    assert!(lines[2].contains(",38,"));
    assert!(lines[3].ends_with(",1,1,cefepime,0"));

    let out = dir.path().join("out.csv");
    fs::write(&out, &text).unwrap();
    let report = LabelReport::from_file(&out).unwrap();
    assert_eq!(report.total_rows, 4);
    assert_eq!(report.positive_rows, 1);
    assert_eq!(report.early_positive_violations, 0);
    assert_eq!(report.antibiotic_hours, 2);
}

#[test]
fn test_ndjson_output_report_matches_memory_report() {
    let rows = run();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.ndjson");

    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let mut sink = NdjsonSink::new(fs::File::create(&out).unwrap());
    pipeline.run(&source(), &mut sink).unwrap();
    drop(sink);

    let from_file = LabelReport::from_file(&out).unwrap();
    let from_memory = LabelReport::from_rows(&rows);
    assert_eq!(from_file, from_memory);
}

#[test]
fn test_missing_required_column_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let feeds = csv_feeds(dir.path(), "stay_id,subject_id,hadm_id,charttime,valuenum");
    let source = FileSource::new(feeds);

    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let mut sink = CsvSink::new(Vec::new());
    match pipeline.run(&source, &mut sink) {
        Err(PipelineError::MissingColumns { feed, columns }) => {
            assert_eq!(feed, "events");
            assert_eq!(columns, vec!["itemid".to_string()]);
        }
        other => panic!("expected missing columns, got {other:?}"),
    }
}

#[test]
fn test_missing_column_aborts_run_with_empty_cohort() {
    let dir = tempfile::tempdir().unwrap();
    let feeds = FeedPaths {
        stays: write(
            dir.path(),
            "stays.csv",
            "stay_id,subject_id,hadm_id,intime,outtime,first_careunit,anchor_age,anchor_year,admittime,gender\n\
             2,20,200,2150-03-01 08:00:00,2150-03-01 10:00:00,MICU,70,2150,2150-03-01 06:30:00,F\n",
        ),
        events: write(dir.path(), "events.csv", "stay_id,charttime\n"),
        antibiotics: write(dir.path(), "abx.csv", "stay_id\n"),
        sepsis: write(dir.path(), "sepsis.csv", "stay_id\n"),
    };
    let source = FileSource::new(feeds);

    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let mut sink = CsvSink::new(Vec::new());
    match pipeline.run(&source, &mut sink) {
        Err(PipelineError::MissingColumns { feed, .. }) => assert_eq!(feed, "events"),
        other => panic!("expected missing columns, got {other:?}"),
    }
}

#[test]
fn test_out_of_range_charttime_is_skipped() {
    let mut source = source();
    source.events.push(ChartEvent {
        charttime: Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap(),
        ..event(1, 220045, 0, 0, 90.0)
    });
    let (rows, _) = process_to_rows(PipelineConfig::default(), &source).unwrap();
    assert_eq!(rows, run());
}
