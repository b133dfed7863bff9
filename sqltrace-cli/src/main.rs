//! sqltrace - correlate SQL client diagnostic events into dependency telemetry
//!
//! Records go to stdout; all logging goes to stderr.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sqltrace_core::{CollectorConfig, DriverScheme, RecordFormat, WriterSink};

mod replay;

/// Trace modules for engine tracing
#[derive(Debug, Clone, ValueEnum)]
enum TraceModule {
    Collector,
    Arbitration,
    Diagnostics,
    All,
}

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Record output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

impl From<OutputFormat> for RecordFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => RecordFormat::Json,
            OutputFormat::Text => RecordFormat::Text,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "sqltrace",
    about = "Correlate SQL client diagnostic events into dependency telemetry",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Enable engine tracing (comma-separated: collector,arbitration,diagnostics,all)
    #[clap(long, value_delimiter = ',', global = true)]
    trace: Vec<TraceModule>,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,
}

#[derive(Parser, Debug)]
enum Command {
    /// Replay a JSON-lines event capture and print the resulting records
    Replay {
        /// Event file, or "-" for stdin
        #[clap(default_value = "-")]
        input: String,

        /// Collector config file (YAML)
        #[clap(long)]
        config: Option<PathBuf>,

        /// Override the channel events are published on
        #[clap(long)]
        channel: Option<String>,

        /// Override the producer timestamp frequency
        #[clap(long)]
        ticks_per_second: Option<u64>,

        /// Output format for records
        #[clap(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Print a summary table to stderr when done
        #[clap(long)]
        summary: bool,
    },

    /// List recognized event names
    Names {
        /// Only show names for one driver scheme (legacy, current)
        #[clap(long)]
        scheme: Option<DriverScheme>,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Initialize tracing subscriber
///
/// Configures logging based on --log-level and --trace flags.
/// When --trace is set, enables JSON output for structured tracing.
fn initialize_tracing(log_level: &LogLevel, trace_modules: &[TraceModule]) {
    let mut filter = EnvFilter::new(log_level.to_filter_directive());

    for module in trace_modules {
        let directive = match module {
            TraceModule::Collector => "sqltrace_core::collector=trace",
            TraceModule::Arbitration => "sqltrace_core::arbitrator=trace",
            TraceModule::Diagnostics => "sqltrace::diagnostics=trace",
            TraceModule::All => "sqltrace_core=trace,sqltrace::diagnostics=trace",
        };

        for part in directive.split(',') {
            if let Ok(parsed) = part.parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    if !trace_modules.is_empty() {
        // JSON output for structured tracing - MUST go to stderr
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();

        tracing::info!(trace_modules = ?trace_modules, "sqltrace engine tracing enabled");
    } else {
        // Standard text output - MUST go to stderr, stdout carries records
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, &cli.trace);

    match cli.command {
        Command::Replay {
            input,
            config,
            channel,
            ticks_per_second,
            format,
            summary,
        } => replay_command(input, config, channel, ticks_per_second, format, summary),
        Command::Names { scheme, json } => names_command(scheme, json),
    }
}

fn replay_command(
    input: String,
    config_path: Option<PathBuf>,
    channel: Option<String>,
    ticks_per_second: Option<u64>,
    format: OutputFormat,
    print_summary: bool,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => CollectorConfig::load(path)?,
        None => CollectorConfig::default(),
    };
    if let Some(channel) = channel {
        config = config.with_channel(channel);
    }
    if let Some(ticks) = ticks_per_second {
        config = config.with_ticks_per_second(ticks);
    }
    config.validate().context("Invalid collector settings")?;
    debug!(?config, "Replay configuration");

    let reader: Box<dyn BufRead> = if input == "-" {
        info!("Reading events from stdin");
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&input).with_context(|| format!("Failed to open event file: {input}"))?;
        info!("Reading events from {}", input);
        Box::new(BufReader::new(file))
    };

    let sink = Arc::new(WriterSink::new(io::stdout(), format.into()));
    let summary = replay::replay(reader, config, sink)?;

    if print_summary {
        let table = Table::new(summary.rows())
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        eprintln!("{table}");
    }
    Ok(())
}

// Table row structure for event name display
#[derive(Tabled)]
struct NameTableRow {
    #[tabled(rename = "Scheme")]
    scheme: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Name")]
    name: String,
}

fn names_command(scheme: Option<DriverScheme>, json: bool) -> Result<()> {
    let schemes: Vec<DriverScheme> = match scheme {
        Some(scheme) => vec![scheme],
        None => DriverScheme::ALL.to_vec(),
    };

    let rows: Vec<NameTableRow> = schemes
        .iter()
        .flat_map(|scheme| {
            scheme.names().iter().map(move |(name, event)| NameTableRow {
                scheme: scheme.to_string(),
                event: event.canonical_name(),
                name: (*name).to_string(),
            })
        })
        .collect();

    if json {
        let output: Vec<_> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "scheme": row.scheme,
                    "event": row.event,
                    "name": row.name,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        println!("{table}");
    }
    Ok(())
}
