//! Phase CLI - Command-line interface for Pulse Phase
//!
//! Commands:
//! - transform: Process interval events into per-tick records (batch mode)
//! - run: Process streaming input from stdin (streaming mode)
//! - validate: Validate interval event schema
//! - doctor: Diagnose engine health and configuration
//! - schema: Print schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use pulse_phase::annotation::AnnotationConfig;
use pulse_phase::classifier::CentroidSet;
use pulse_phase::features::ExtractorConfig;
use pulse_phase::hysteresis::HysteresisConfig;
use pulse_phase::types::{IntervalSample, RrEvent};
use pulse_phase::{EngineConfig, EngineError, PhaseEngine, ENGINE_VERSION, PRODUCER_NAME};

/// Phase - Real-time phase-space engine for beat-to-beat heart intervals
#[derive(Parser)]
#[command(name = "phase")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Transform interval streams into phase-space state records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform interval events into per-tick records (batch mode)
    Transform {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine settings file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Process streaming input from stdin (streaming mode)
    Run {
        /// Engine settings file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Validate interval event schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose engine health and configuration
    Doctor {
        /// Check an engine settings file
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
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (interval events)
    Input,
    /// Output schema (per-tick records)
    Output,
}

fn main() -> ExitCode {
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

fn run(cli: Cli) -> Result<(), PhaseCliError> {
    match cli.command {
        Commands::Transform {
            input,
            output,
            input_format,
            output_format,
            config,
        } => cmd_transform(&input, &output, input_format, output_format, config.as_deref()),

        Commands::Run { config, flush } => cmd_run(config.as_deref(), flush),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

/// Engine settings file shape: every field optional, unset fields keep the
/// engine defaults.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EngineSettings {
    buffer_capacity: Option<usize>,
    history_capacity: Option<usize>,
    coherence_lag: Option<usize>,
    temperature: Option<f64>,
    /// Expected oscillation period in samples; recenters the entrainment
    /// lag scan. Ignored when an explicit extractor block is present.
    expected_period_samples: Option<usize>,
    extractor: Option<ExtractorConfig>,
    centroids: Option<CentroidSet>,
    hysteresis: Option<HysteresisConfig>,
    annotation: Option<AnnotationConfig>,
}

impl EngineSettings {
    fn load(path: Option<&std::path::Path>) -> Result<Self, PhaseCliError> {
        match path {
            Some(path) => {
                let data = fs::read_to_string(path)?;
                Ok(serde_json::from_str(&data)?)
            }
            None => Ok(Self::default()),
        }
    }

    fn into_engine(self) -> Result<PhaseEngine, PhaseCliError> {
        let mut config = EngineConfig::default();
        if let Some(capacity) = self.buffer_capacity {
            config.buffer_capacity = capacity;
        }
        if let Some(capacity) = self.history_capacity {
            config.history_capacity = capacity;
        }
        if let Some(lag) = self.coherence_lag {
            config.coherence_lag = lag;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(extractor) = self.extractor {
            config.extractor = extractor;
        } else if let Some(period) = self.expected_period_samples {
            config.extractor = ExtractorConfig::with_expected_period(period);
        }
        if let Some(centroids) = self.centroids {
            config.centroids = centroids;
        }
        if let Some(hysteresis) = self.hysteresis {
            config.hysteresis = hysteresis;
        }
        if let Some(annotation) = self.annotation {
            config.annotation = annotation;
        }
        Ok(PhaseEngine::with_config(config)?)
    }
}

fn parse_events(data: &str, format: &InputFormat) -> Result<Vec<RrEvent>, PhaseCliError> {
    let events: Vec<RrEvent> = match format {
        InputFormat::Ndjson => data
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                serde_json::from_str(l).map_err(|e| {
                    PhaseCliError::ParseError(format!("Failed to parse event: {}", e))
                })
            })
            .collect::<Result<_, _>>()?,
        InputFormat::Json => serde_json::from_str(data)?,
    };
    Ok(events)
}

fn cmd_transform(
    input: &PathBuf,
    output: &PathBuf,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&std::path::Path>,
) -> Result<(), PhaseCliError> {
    // Read input
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let events = parse_events(&input_data, &input_format)?;
    if events.is_empty() {
        return Err(PhaseCliError::NoEvents);
    }
    for event in &events {
        event.validate()?;
    }

    let mut engine = EngineSettings::load(config)?.into_engine()?;

    let mut records: Vec<serde_json::Value> = Vec::with_capacity(events.len());
    for event in &events {
        let record = engine.tick(IntervalSample::new(event.rr_ms, event.ts));
        records.push(serde_json::to_value(&record)?);
    }

    let output_data = format_output(&records, &output_format)?;

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_run(config: Option<&std::path::Path>, flush: bool) -> Result<(), PhaseCliError> {
    let mut engine = EngineSettings::load(config)?.into_engine()?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: RrEvent = serde_json::from_str(trimmed)
            .map_err(|e| PhaseCliError::ParseError(format!("Failed to parse event: {}", e)))?;
        event.validate()?;

        let record = engine.tick(IntervalSample::new(event.rr_ms, event.ts));
        writeln!(stdout, "{}", record.to_json()?)?;
        if flush {
            stdout.flush()?;
        }
    }

    Ok(())
}

fn cmd_validate(
    input: &PathBuf,
    input_format: InputFormat,
    json: bool,
) -> Result<(), PhaseCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let events = parse_events(&input_data, &input_format)?;

    let mut errors: Vec<ValidationErrorDetail> = Vec::new();
    let mut last_ts = None;
    for (index, event) in events.iter().enumerate() {
        if let Err(e) = event.validate() {
            errors.push(ValidationErrorDetail {
                index,
                error: e.to_string(),
            });
            continue;
        }
        if let Some(prev) = last_ts {
            if event.ts < prev {
                errors.push(ValidationErrorDetail {
                    index,
                    error: "timestamp out of order".to_string(),
                });
            }
        }
        last_ts = Some(event.ts);
    }

    let report = ValidationReport {
        total_events: events.len(),
        valid_events: events.len() - errors.len(),
        invalid_events: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Event at index {}: {}", err.index, err.error);
            }
        }
    }

    if report.invalid_events > 0 {
        Err(PhaseCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&std::path::Path>, json: bool) -> Result<(), PhaseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Engine version {}", ENGINE_VERSION),
    });

    // Default configuration must always construct
    match PhaseEngine::with_config(EngineConfig::default()) {
        Ok(_) => checks.push(DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Ok,
            message: "Default engine configuration is valid".to_string(),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Error,
            message: format!("Default configuration rejected: {}", e),
        }),
    }

    // Check the settings file if provided
    if let Some(config_path) = config {
        if config_path.exists() {
            match EngineSettings::load(Some(config_path)).and_then(|s| s.into_engine()) {
                Ok(_) => checks.push(DoctorCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Ok,
                    message: "Settings file valid, engine constructs".to_string(),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid settings: {}", CliError::from(e).message),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "settings".to_string(),
                status: CheckStatus::Warning,
                message: "Settings file does not exist".to_string(),
            });
        }
    }

    // Check stdin is available (for streaming mode)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Phase Doctor Report");
        println!("===================");
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
        Err(PhaseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), PhaseCliError> {
    match schema_type {
        SchemaType::Input => {
            println!("Input Schema: interval events");
            println!();
            println!("One JSON object per NDJSON line (or a JSON array in batch mode):");
            println!();
            println!("  ts     - Observation timestamp, RFC 3339 (e.g. \"2024-01-15T12:00:00Z\")");
            println!("  rr_ms  - Beat-to-beat interval in milliseconds (positive integer)");
            println!();
            println!("Events must arrive in non-decreasing timestamp order.");
        }
        SchemaType::Output => {
            println!("Output Schema: per-tick state records");
            println!();
            println!("One record per consumed event:");
            println!();
            println!("- ts: tick timestamp (from the event, RFC 3339)");
            println!("- hr: instantaneous heart rate from the buffer mean (null when empty)");
            println!("- rr: interval value(s) consumed by this tick (ms)");
            println!("- metrics: {{ amp, ent, ent_label, breath, volatility, mode, mode_score }}");
            println!("- phase:");
            println!("  - position, velocity, velocity_mag, curvature");
            println!("  - stability, history_signature, coherence, phase_label");
            println!("  - soft_mode: {{ primary, secondary, ambiguity, membership }}");
            println!("  - movement_annotation, movement_aware_label");
            println!("  - mode_status (unknown | provisional | established), dwell_time");
        }
    }

    Ok(())
}

// Helper functions

fn format_output(
    records: &[serde_json::Value],
    format: &OutputFormat,
) -> Result<String, PhaseCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Error types

#[derive(Debug)]
enum PhaseCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for PhaseCliError {
    fn from(e: io::Error) -> Self {
        PhaseCliError::Io(e)
    }
}

impl From<EngineError> for PhaseCliError {
    fn from(e: EngineError) -> Self {
        PhaseCliError::Engine(e)
    }
}

impl From<serde_json::Error> for PhaseCliError {
    fn from(e: serde_json::Error) -> Self {
        PhaseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PhaseCliError> for CliError {
    fn from(e: PhaseCliError) -> Self {
        match e {
            PhaseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PhaseCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'phase doctor --config <file>' to check settings".to_string()),
            },
            PhaseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PhaseCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            PhaseCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            PhaseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            PhaseCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    error: String,
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
