//! CLI command for listing the agents an export would cover

use clap::Args;
use serde::Serialize;
use std::sync::Arc;

use super::{AgentScope, Cli, CliError, OutputFormat};
use crate::exporter::AgentSelector;
use crate::service::http::DiscoveryHttpClient;
use crate::service::pagination::PaginationHelper;
use crate::service::shared_resources::shared_http_client;
use crate::window::{WindowPlan, WindowPlanner};
use crate::Agent;

/// Agents subcommand
#[derive(Debug, Args)]
pub struct AgentsCommand {
    /// Agent and time selection
    #[command(flatten)]
    pub scope: AgentScope,
}

/// One row of the agent listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentPlanRow {
    /// Agent identifier
    pub agent_id: String,
    /// Agent type reported by the service
    pub agent_type: String,
    /// Start of the planned interval (RFC 3339), absent when nothing is exported
    pub start: Option<String>,
    /// End of the planned interval (RFC 3339), absent when nothing is exported
    pub end: Option<String>,
    /// Windows needed if every window is fully covered
    pub windows: u64,
}

/// Plan every agent without contacting the export API
pub fn plan_rows(planner: &WindowPlanner, agents: &[Agent]) -> Vec<AgentPlanRow> {
    agents
        .iter()
        .map(|agent| {
            let (start, end, windows) = match planner.plan(agent) {
                WindowPlan::Export {
                    next_start,
                    final_end,
                } => (
                    Some(next_start.to_rfc3339()),
                    Some(final_end.to_rfc3339()),
                    planner.window_count(next_start, final_end),
                ),
                WindowPlan::NothingToExport { .. } => (None, None, 0),
            };
            AgentPlanRow {
                agent_id: agent.agent_id.clone(),
                agent_type: agent.agent_type.clone(),
                start,
                end,
                windows,
            }
        })
        .collect()
}

impl AgentsCommand {
    /// Execute the agents command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let planner = self.scope.planner()?;
        let endpoint = cli.service_endpoint()?;
        let http = shared_http_client()?;
        let service = Arc::new(
            DiscoveryHttpClient::new(http, endpoint).with_max_retries(cli.max_retries),
        );

        let agents = AgentSelector::new()
            .with_allow_list(self.scope.filters.iter().cloned())
            .select(PaginationHelper::collect_agents(service.as_ref()).await?);
        let rows = plan_rows(&planner, &agents);

        match cli.output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            OutputFormat::Human => {
                println!("{:<24} {:<10} {:<26} {:<26} {:>7}", "AGENT", "TYPE", "START", "END", "WINDOWS");
                for row in &rows {
                    println!(
                        "{:<24} {:<10} {:<26} {:<26} {:>7}",
                        row.agent_id,
                        row.agent_type,
                        row.start.as_deref().unwrap_or("-"),
                        row.end.as_deref().unwrap_or("-"),
                        row.windows
                    );
                }
                let total: u64 = rows.iter().map(|row| row.windows).sum();
                println!("\n{} agents, {} windows planned", rows.len(), total);
            }
        }
        Ok(())
    }
}
