//! CLI command implementations

pub mod agents;
pub mod error;
pub mod export;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::window::WindowPlanner;

pub use agents::AgentsCommand;
pub use error::CliError;
pub use export::ExportArgs;

/// Accepted forms for `--start-time` and `--end-time` besides RFC 3339
const TIME_BOUND_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parse a time bound given as RFC 3339, `YYYY-MM-DDTHH:MM[:SS]`, or a bare
/// `YYYY-MM-DD` (midnight). Bounds without an offset are UTC.
pub fn parse_time_bound(input: &str) -> Result<DateTime<Utc>, String> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in TIME_BOUND_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            format!("invalid time '{input}' (expected YYYY-MM-DDTHH:MM, YYYY-MM-DD or RFC 3339)")
        })
}

/// Discovery data export CLI
#[derive(Parser, Debug)]
#[command(name = "discovery-export")]
#[command(about = "Export collected discovery agent data in bounded time windows", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Discovery gateway endpoint (required by commands that call the service).
    /// Requests are sent unsigned, so this must be a gateway or proxy that
    /// authenticates them
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Maximum number of retries for throttled or failed requests (range: 0-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Output format for results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Also write debug-level logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Endpoint for service calls
    ///
    /// # Errors
    /// [`CliError::InvalidArgument`] when `--endpoint` was not given
    pub fn service_endpoint(&self) -> Result<&str, CliError> {
        self.endpoint.as_deref().ok_or_else(|| {
            CliError::InvalidArgument(
                "--endpoint is required: pass the URL of an authenticating gateway for the discovery service"
                    .to_string(),
            )
        })
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the data of every selected agent
    Export(ExportArgs),

    /// List the selected agents and their planned export intervals
    Agents(AgentsCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Which agents to export and over which interval
#[derive(Args, Debug, Clone, Default)]
pub struct AgentScope {
    /// Export nothing collected before this time (YYYY-MM-DDTHH:MM, UTC)
    #[arg(long, value_parser = parse_time_bound)]
    pub start_time: Option<DateTime<Utc>>,

    /// Export nothing collected after this time (YYYY-MM-DDTHH:MM, UTC)
    #[arg(long, value_parser = parse_time_bound)]
    pub end_time: Option<DateTime<Utc>>,

    /// Only export these agent ids
    #[arg(long, num_args = 1..)]
    pub filters: Vec<String>,
}

impl AgentScope {
    /// Planner for the configured bounds
    ///
    /// # Errors
    /// [`CliError::InvalidArgument`] when the start bound is not before the end bound
    pub fn planner(&self) -> Result<WindowPlanner, CliError> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start >= end {
                return Err(CliError::InvalidArgument(format!(
                    "--start-time {start} must be before --end-time {end}"
                )));
            }
        }
        Ok(WindowPlanner::new(self.start_time, self.end_time))
    }
}
