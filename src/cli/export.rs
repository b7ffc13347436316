//! Export command implementation

use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{AgentScope, Cli, CliError, OutputFormat};
use crate::exporter::config::MAX_CONCURRENT_EXPORTS;
use crate::exporter::{
    AgentSelector, ArchiveFailurePolicy, ExportError, ExportScheduler, RunSummary,
    SchedulerConfig,
};
use crate::metrics::init_metrics;
use crate::output::StagingLayout;
use crate::resume::ResumeStore;
use crate::service::archive::HttpArchiveFetcher;
use crate::service::http::DiscoveryHttpClient;
use crate::service::pagination::PaginationHelper;
use crate::service::shared_resources::shared_http_client;
use crate::shutdown::SharedShutdown;

/// Upper bound for `--max-concurrent`; the service rejects far fewer
const MAX_CONCURRENT_LIMIT: usize = 64;

/// Parse and validate `--max-concurrent`
fn parse_max_concurrent(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("max concurrent exports must be at least 1".to_string());
    }
    if value > MAX_CONCURRENT_LIMIT {
        return Err(format!(
            "max concurrent exports {value} exceeds maximum of {MAX_CONCURRENT_LIMIT}"
        ));
    }
    Ok(value)
}

/// Export command arguments
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Root directory for staged files (written under <directory>/agentExports)
    #[arg(long, default_value = ".")]
    pub directory: PathBuf,

    /// Agent and time selection
    #[command(flatten)]
    pub scope: AgentScope,

    /// Maximum number of export tasks in flight
    #[arg(long, default_value_t = MAX_CONCURRENT_EXPORTS, value_parser = parse_max_concurrent)]
    pub max_concurrent: usize,

    /// Checkpoint in-flight exports here so an interrupted run can resume
    #[arg(long)]
    pub resume_dir: Option<PathBuf>,

    /// Reaction to an archive that cannot be downloaded: abort or retire-agent
    #[arg(long, default_value = "abort")]
    pub on_archive_failure: ArchiveFailurePolicy,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl ExportArgs {
    /// Scheduler configuration derived from the arguments
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_concurrent(self.max_concurrent)
            .with_archive_failure_policy(self.on_archive_failure)
    }

    /// Run the export
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let planner = self.scope.planner()?;
        let endpoint = cli.service_endpoint()?;
        if let Some(addr) = self.metrics_addr {
            init_metrics(addr)?;
        }

        let http = shared_http_client()?;
        let service = Arc::new(
            DiscoveryHttpClient::new(Arc::clone(&http), endpoint)
                .with_max_retries(cli.max_retries),
        );

        let listed = PaginationHelper::collect_agents(service.as_ref()).await?;
        let listed_count = listed.len();
        let agents = AgentSelector::new()
            .with_allow_list(self.scope.filters.iter().cloned())
            .select(listed);
        info!(
            listed = listed_count,
            selected = agents.len(),
            directory = %self.directory.display(),
            "Selected agents for export"
        );

        let mut scheduler = ExportScheduler::new(
            service,
            Arc::new(HttpArchiveFetcher::new(http)),
            StagingLayout::new(&self.directory),
            planner,
            self.scheduler_config(),
        )
        .with_shutdown(shutdown);
        if let Some(dir) = &self.resume_dir {
            scheduler = scheduler.with_resume(ResumeStore::open(dir)?);
        }
        scheduler.enqueue(agents);

        let result = scheduler.run().await;
        match cli.output_format {
            OutputFormat::Json => output_json(&result)?,
            OutputFormat::Human => output_human(&result, &self.directory),
        }
        result.map(|_| ()).map_err(CliError::from)
    }
}

fn output_json(result: &Result<RunSummary, ExportError>) -> Result<(), CliError> {
    let output = match result {
        Ok(summary) => serde_json::json!({
            "success": true,
            "summary": summary,
            "error": null,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "summary": null,
            "error": e.to_string(),
        }),
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn output_human(result: &Result<RunSummary, ExportError>, directory: &std::path::Path) {
    match result {
        Ok(summary) => {
            println!("\nExport completed successfully!");
            println!("Output: {}", StagingLayout::new(directory).exports_dir().display());
            println!(
                "Agents: {} total, {} completed, {} failed, {} skipped",
                summary.total_agents,
                summary.agents_completed,
                summary.agents_failed,
                summary.agents_skipped
            );
            println!(
                "Windows exported: {} of {} submitted",
                summary.windows_completed, summary.windows_submitted
            );
            println!("Files staged: {}", summary.files_staged);
            if summary.duplicates_adopted > 0 {
                println!("Existing exports adopted: {}", summary.duplicates_adopted);
            }
            if summary.concurrency_rejections > 0 {
                println!("Concurrency limit hits: {}", summary.concurrency_rejections);
            }
            println!("Elapsed: {:.1}s", summary.elapsed_secs);
        }
        Err(ExportError::Interrupted) => {
            eprintln!("\nExport interrupted. Staged files were kept.");
            eprintln!("Re-run with the same --resume-dir to continue.");
        }
        Err(e) => {
            eprintln!("\nExport failed!");
            eprintln!("Error: {e}");
        }
    }
}
