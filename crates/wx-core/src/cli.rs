//! Command-line interface.
//!
//! `run` loads observations, runs the pipeline and extracts results;
//! `check` resolves and validates configuration only; `schema` prints the
//! configuration file's JSON schema.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{error, info};
use wx_config::resolve::parse_overrides;
use wx_config::{
    keys, resolve_config, resolve_config_path, validate, ConfigSnapshot, PipelineFile,
    ResolvedConfig,
};

use crate::exit_codes::ExitCode;
use crate::extract::extract_results;
use crate::ingest::load_observations_file;
use crate::pipeline::{run_pipeline, PipelineContext, PipelineReport, StageStatus};
use crate::store::MemoryStore;

/// Weather series ARIMA pipeline.
#[derive(Parser, Debug)]
#[command(name = "wx-core", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Format of the report printed on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load observations and run the pipeline
    Run(RunArgs),
    /// Resolve and validate configuration without running anything
    Check(CheckArgs),
    /// Print the configuration file JSON schema
    Schema,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file (.toml or .json)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Observations as JSON lines
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Override a property
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Submit the final job without waiting for it
    #[arg(long)]
    pub no_wait: bool,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file (.toml or .json)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override a property
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Dispatch a parsed command line.
pub fn execute(cli: &Cli) -> ExitCode {
    let result = match &cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Check(args) => check_command(args),
        Commands::Schema => schema_command(),
    };
    result.unwrap_or_else(|err| {
        error!(code = err.code(), "{err}");
        eprintln!("error: {err}");
        ExitCode::for_error(&err)
    })
}

fn resolve(config: Option<&Path>, set: &[String]) -> wx_common::Result<ResolvedConfig> {
    let overrides = parse_overrides(set)?;
    let resolved = resolve_config(resolve_config_path(config), &overrides)?;
    info!(
        source = %resolved.paths.source,
        file = ?resolved.paths.config_file,
        "configuration resolved"
    );
    Ok(resolved)
}

fn run_command(args: &RunArgs) -> wx_common::Result<ExitCode> {
    let mut set = args.set.clone();
    if args.no_wait {
        set.push(format!("{}=false", keys::JOB_WAIT));
    }
    let resolved = resolve(args.config.as_deref(), &set)?;
    let props = &resolved.properties;

    let store = Arc::new(MemoryStore::new());
    let ingested = load_observations_file(store.clone(), props, &args.input)?;
    info!(
        observations = ingested.observations,
        malformed = ingested.malformed,
        "input loaded"
    );

    let mut report = run_pipeline(props, &PipelineContext::local(store.clone()));
    print_report(&report, args.format)?;

    // The store lives in this process, so a submitted job must finish here.
    if let Some(handle) = report.take_pending() {
        let job = handle.job().to_string();
        match handle.wait() {
            Ok(counters) => {
                info!(job = %job, cells = counters.cells_written, "submitted job finished");
                match extract_results(store, props, &report.run_id) {
                    Ok(summary) => info!(path = %summary.path.display(), "results extracted"),
                    Err(e) => error!(error = %e, "result extraction failed"),
                }
            }
            Err(e) => error!(job = %job, error = %e, "submitted job failed"),
        }
    }
    Ok(ExitCode::for_report(&report))
}

fn check_command(args: &CheckArgs) -> wx_common::Result<ExitCode> {
    let resolved = resolve(args.config.as_deref(), &args.set)?;
    let result = validate(&resolved.properties);
    let snapshot = ConfigSnapshot::capture(&resolved);
    let mut out = std::io::stdout().lock();
    match args.format {
        ReportFormat::Json => {
            let doc = json!({
                "valid": result.is_valid(),
                "errors": result.errors,
                "warnings": result.warnings,
                "snapshot": snapshot,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
        }
        ReportFormat::Text => {
            writeln!(out, "config source: {}", snapshot.source)?;
            if let Some(file) = &snapshot.config_file {
                writeln!(out, "config file:   {file}")?;
            }
            writeln!(out, "fingerprint:   {}", snapshot.fingerprint)?;
            for e in &result.errors {
                writeln!(out, "error:   {e}")?;
            }
            for w in &result.warnings {
                writeln!(out, "warning: {w}")?;
            }
            writeln!(out, "{}", if result.is_valid() { "OK" } else { "INVALID" })?;
        }
    }
    Ok(if result.is_valid() {
        ExitCode::Success
    } else {
        ExitCode::ConfigError
    })
}

fn schema_command() -> wx_common::Result<ExitCode> {
    let schema = PipelineFile::json_schema();
    writeln!(std::io::stdout().lock(), "{}", serde_json::to_string_pretty(&schema)?)?;
    Ok(ExitCode::Success)
}

fn status_label(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "ok",
        StageStatus::Skipped => "skipped",
        StageStatus::Running => "running",
        StageStatus::Failed => "FAILED",
    }
}

/// Render a report for humans.
pub fn render_text(report: &PipelineReport) -> String {
    let mut lines = vec![format!(
        "run {} {} ({})",
        report.run_id,
        report.result_code,
        &report.config_fingerprint[..report.config_fingerprint.len().min(12)]
    )];
    for e in &report.config_errors {
        lines.push(format!("  config: {e}"));
    }
    for s in &report.stages {
        let mut line = format!(
            "  Step {} - {:<12} {:<8} {:>6} ms",
            s.name.step(),
            s.name,
            status_label(s.status),
            s.elapsed_ms
        );
        if let Some(column) = &s.resolved_column {
            line.push_str(&format!("  column={column}"));
        }
        if let Some(c) = &s.counters {
            line.push_str(&format!(
                "  rows={} dropped={} cells={}",
                c.rows_scanned, c.records_dropped, c.cells_written
            ));
        }
        lines.push(line);
        if let Some(msg) = &s.message {
            lines.push(format!("    {msg}"));
        }
    }
    if let Some(path) = &report.results_location {
        lines.push(format!(
            "results: {} ({} series)",
            path.display(),
            report.results_count.unwrap_or(0)
        ));
    }
    if let Some(e) = &report.extraction_error {
        lines.push(format!("extraction failed: {e}"));
    }
    if let Some(e) = &report.error {
        lines.push(format!("error [{}]: {}", e.code, e.message));
    }
    lines.join("\n")
}

fn print_report(report: &PipelineReport, format: ReportFormat) -> wx_common::Result<()> {
    let mut out = std::io::stdout().lock();
    match format {
        ReportFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(report)?)?,
        ReportFormat::Text => writeln!(out, "{}", render_text(report))?,
    }
    Ok(())
}
