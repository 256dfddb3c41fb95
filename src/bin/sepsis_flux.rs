//! Flux CLI - Command-line interface for Sepsis Flux
//!
//! Commands:
//! - transform: Build the hourly feature table from the four input feeds
//! - report: Summarize labels and antibiotic usage of an output file
//! - validate: Check input feed headers and row parsing
//! - doctor: Diagnose configuration and catalog
//! - schema: Print input or output columns

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use sepsis_flux::encoder::{output_columns, CsvSink, NdjsonSink, RowSink};
use sepsis_flux::error::PipelineError;
use sepsis_flux::pipeline::Pipeline;
use sepsis_flux::report::{LabelReport, LabelReportBuilder};
use sepsis_flux::schema::{Feed, FeedFormat, FeedPaths, FileSource, TabularSource};
use sepsis_flux::variables::{Variable, VARIABLE_COUNT};
use sepsis_flux::{PipelineConfig, FLUX_VERSION, PRODUCER_NAME};

/// Flux - Hourly ICU feature matrix with retrospective sepsis labels
#[derive(Parser)]
#[command(name = "sepsis-flux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Transform ICU event feeds into hourly labeled feature rows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct FeedArgs {
    /// Stays / admissions feed
    #[arg(long)]
    stays: PathBuf,

    /// Chart and lab events feed
    #[arg(long)]
    events: PathBuf,

    /// Antibiotic administrations feed
    #[arg(long)]
    antibiotics: PathBuf,

    /// Sepsis episode feed
    #[arg(long)]
    sepsis: PathBuf,

    /// Input format for every feed (inferred from extensions when omitted)
    #[arg(long)]
    input_format: Option<Format>,
}

impl FeedArgs {
    fn source(&self) -> FileSource {
        let source = FileSource::new(FeedPaths {
            stays: self.stays.clone(),
            events: self.events.clone(),
            antibiotics: self.antibiotics.clone(),
            sepsis: self.sepsis.clone(),
        });
        match self.input_format {
            Some(format) => source.with_format(format.into()),
            None => source,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the hourly feature table
    Transform {
        #[command(flatten)]
        feeds: FeedArgs,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "csv")]
        format: Format,

        /// Pipeline configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stays per batch (overrides the configuration)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Worker threads (overrides the configuration)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Summarize labels and antibiotic usage of an output file
    Report {
        /// Output file produced by `transform` (.csv or .ndjson)
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration the output was produced with (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check input feed headers and row parsing
    Validate {
        #[command(flatten)]
        feeds: FeedArgs,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and catalog
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Comma-separated values with a header row
    Csv,
    /// Newline-delimited JSON
    Ndjson,
}

impl From<Format> for FeedFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Csv => FeedFormat::Csv,
            Format::Ndjson => FeedFormat::Ndjson,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Required input feed columns
    Input,
    /// Output table columns
    Output,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays clean for data
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Transform {
            feeds,
            output,
            format,
            config,
            batch_size,
            workers,
        } => cmd_transform(&feeds, &output, format, config.as_deref(), batch_size, workers),

        Commands::Report {
            input,
            config,
            json,
        } => cmd_report(&input, config.as_deref(), json),

        Commands::Validate { feeds, json } => cmd_validate(&feeds, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema { schema_type, json } => cmd_schema(schema_type, json),
    }
}

fn cmd_transform(
    feeds: &FeedArgs,
    output: &Path,
    format: Format,
    config_path: Option<&Path>,
    batch_size: Option<usize>,
    workers: Option<usize>,
) -> Result<(), FluxCliError> {
    let mut config = match config_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(batch_size) = batch_size {
        config = config.with_batch_size(batch_size);
    }
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }

    let source = feeds.source();
    source.check_schema()?;
    let pipeline = Pipeline::new(config)?;

    let writer: Box<dyn Write> = if output.as_os_str() == "-" {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        Box::new(BufWriter::new(File::create(output)?))
    };

    let summary = match format {
        Format::Csv => {
            let mut sink = CsvSink::new(writer);
            pipeline.run(&source, &mut sink)?
        }
        Format::Ndjson => {
            let mut sink = NdjsonSink::new(writer);
            pipeline.run(&source, &mut sink)?
        }
    };

    eprintln!("{}", summary.to_json()?);
    Ok(())
}

fn cmd_report(input: &Path, config_path: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let config = match config_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let report = LabelReport::from_file_with(input, LabelReportBuilder::from(&config.label))?;

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!("Flux Label Report");
    println!("=================");
    println!("Rows:              {}", report.total_rows);
    println!("Stays:             {}", report.total_stays);
    println!("Positive rows:     {}", report.positive_rows);
    println!("Septic stays:      {}", report.septic_stays);
    println!("Positive rate:     {}", format_rate(report.positive_row_rate));
    println!("Early positives:   {}", report.early_positive_violations);
    println!("Antibiotic hours:  {}", report.antibiotic_hours);
    println!("Antibiotic rate:   {}", format_rate(report.antibiotic_usage_rate));

    if !report.antibiotic_combinations.is_empty() {
        println!("\nAntibiotic combinations:");
        for combination in &report.antibiotic_combinations {
            println!("  {:>8}  {}", combination.hours, combination.names);
        }
    }
    Ok(())
}

fn format_rate(rate: f64) -> String {
    if rate.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.4}", rate)
    }
}

fn cmd_validate(feeds: &FeedArgs, json: bool) -> Result<(), FluxCliError> {
    let source = feeds.source();
    source.check_schema()?;

    let reports = vec![
        count_rows(Feed::Stays, source.admissions()?)?,
        count_rows(Feed::Events, source.events()?)?,
        count_rows(Feed::Antibiotics, source.antibiotics()?)?,
        count_rows(Feed::Sepsis, source.sepsis()?)?,
    ];
    let invalid: usize = reports.iter().map(|r| r.invalid_rows).sum();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!(
                "{:<12} {:>10} rows, {:>8} invalid",
                report.feed, report.rows, report.invalid_rows
            );
            for error in &report.sample_errors {
                println!("  - {}", error);
            }
        }
    }

    if invalid > 0 {
        Err(FluxCliError::ValidationFailed(invalid))
    } else {
        Ok(())
    }
}

const SAMPLE_ERRORS: usize = 5;

fn count_rows<T>(
    feed: Feed,
    rows: sepsis_flux::schema::RowStream<'_, T>,
) -> Result<FeedReport, FluxCliError> {
    let mut report = FeedReport {
        feed: feed.as_str().to_string(),
        rows: 0,
        invalid_rows: 0,
        sample_errors: Vec::new(),
    };
    for item in rows {
        report.rows += 1;
        if let Err(e) = item? {
            report.invalid_rows += 1;
            if report.sample_errors.len() < SAMPLE_ERRORS {
                report.sample_errors.push(format!("row {}: {}", report.rows, e));
            }
        }
    }
    Ok(report)
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Flux version {}", FLUX_VERSION),
    });

    let item_codes: usize = Variable::ALL.iter().map(|v| v.item_codes().len()).sum();
    checks.push(DoctorCheck {
        name: "catalog".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} variables, {} item codes", VARIABLE_COUNT, item_codes),
    });

    checks.push(DoctorCheck {
        name: "workers".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} threads available", rayon::current_num_threads()),
    });

    if let Some(path) = config {
        let check = if !path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist".to_string(),
            }
        } else {
            match PipelineConfig::load(path) {
                Ok(config) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Configuration valid (batch_size {}, workers {})",
                        config.batch_size,
                        config
                            .workers
                            .map(|w| w.to_string())
                            .unwrap_or_else(|| "default".to_string())
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid configuration: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Flux Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json: bool) -> Result<(), FluxCliError> {
    match schema_type {
        SchemaType::Input => {
            if json {
                let feeds: serde_json::Map<String, serde_json::Value> = Feed::ALL
                    .iter()
                    .map(|feed| (feed.as_str().to_string(), serde_json::json!(feed.required_columns())))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&feeds)?);
            } else {
                for feed in Feed::ALL {
                    println!("{}: {}", feed.as_str(), feed.required_columns().join(", "));
                }
            }
        }
        SchemaType::Output => {
            if json {
                let columns: Vec<serde_json::Value> = output_columns()
                    .into_iter()
                    .map(|name| match Variable::ALL.iter().find(|v| v.name() == name) {
                        Some(v) => serde_json::json!({
                            "name": name,
                            "source": v.source().as_str(),
                            "min": v.bounds().min,
                            "max": v.bounds().max,
                        }),
                        None => serde_json::json!({ "name": name }),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&columns)?);
            } else {
                for name in output_columns() {
                    println!("{}", name);
                }
            }
        }
    }
    Ok(())
}

// Error handling

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<PipelineError> for FluxCliError {
    fn from(e: PipelineError) -> Self {
        FluxCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Pipeline(e) => {
                let (code, hint) = match &e {
                    PipelineError::MissingColumns { .. } => (
                        "SCHEMA_ERROR",
                        "Run 'sepsis-flux schema input' for required columns",
                    ),
                    PipelineError::InvalidConfig(_) => {
                        ("CONFIG_ERROR", "Run 'sepsis-flux doctor --config <file>'")
                    }
                    PipelineError::MemoryCeilingExceeded { .. } => {
                        ("MEMORY_CEILING", "Retry with a smaller --batch-size")
                    }
                    PipelineError::UnsupportedFormat(_) => {
                        ("FORMAT_ERROR", "Use .csv, .ndjson or .jsonl files, or pass --input-format")
                    }
                    PipelineError::InvalidOutputRow { .. } => {
                        ("PARSE_ERROR", "Check that the file was produced by 'sepsis-flux transform'")
                    }
                    _ => ("PIPELINE_ERROR", "Check input feeds and retry"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} rows failed validation", count),
                hint: Some("Fix the reported rows or let transform skip them".to_string()),
            },
            FluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct FeedReport {
    feed: String,
    rows: usize,
    invalid_rows: usize,
    sample_errors: Vec<String>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
