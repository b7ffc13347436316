//! Bounded-concurrency export scheduler
//!
//! The scheduler owns the admission queue and the active set and drives a
//! single cooperative loop: admit agents while capacity remains, poll every
//! active agent once, pause, repeat. Every remote call is awaited in turn, so
//! the active set is the only concurrency there is.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::{ArchiveFailurePolicy, SchedulerConfig};
use super::extractor::ResultExtractor;
use super::poller::{PollOutcome, Poller};
use super::progress::{RunProgress, RunSummary};
use super::queue::{AdmissionQueue, QueuedAgent};
use super::state::{AgentExportState, Continuation, RetireReason, TerminalOutcome};
use super::{ExportError, ExportResult};
use crate::metrics::ExportMetrics;
use crate::output::StagingLayout;
use crate::resume::ResumeStore;
use crate::service::archive::ArchiveFetcher;
use crate::service::{DiscoveryService, ServiceError};
use crate::shutdown::SharedShutdown;
use crate::window::{ExportWindow, WindowPlan, WindowPlanner};
use crate::{Agent, ExportTask};

/// Result of submitting one window
#[derive(Debug)]
enum Submission {
    /// The agent now tracks this task (new or adopted duplicate)
    Tracked(String),
    /// The service refused because too many exports are running
    ConcurrencyLimited,
}

/// Drives every queued agent through its export windows
pub struct ExportScheduler {
    service: Arc<dyn DiscoveryService>,
    poller: Poller,
    extractor: ResultExtractor,
    planner: WindowPlanner,
    config: SchedulerConfig,
    queue: AdmissionQueue,
    active: BTreeMap<String, AgentExportState>,
    progress: RunProgress,
    peak_active: usize,
    resume: Option<ResumeStore>,
    dirty: bool,
    shutdown: Option<SharedShutdown>,
}

impl ExportScheduler {
    /// Create a scheduler with an empty queue
    pub fn new(
        service: Arc<dyn DiscoveryService>,
        fetcher: Arc<dyn ArchiveFetcher>,
        layout: StagingLayout,
        planner: WindowPlanner,
        config: SchedulerConfig,
    ) -> Self {
        let extractor =
            ResultExtractor::new(fetcher, layout).with_retry_policy(config.download_retry);
        Self {
            poller: Poller::new(Arc::clone(&service)),
            service,
            extractor,
            planner,
            config,
            queue: AdmissionQueue::new(),
            active: BTreeMap::new(),
            progress: RunProgress::new(),
            peak_active: 0,
            resume: None,
            dirty: false,
            shutdown: None,
        }
    }

    /// Checkpoint into `store` and restore the agents it left in flight.
    ///
    /// Restored agents go ahead of anything enqueued afterwards.
    pub fn with_resume(mut self, store: ResumeStore) -> Self {
        let restored = store.restored_entries();
        if !restored.is_empty() {
            info!(agents = restored.len(), "Restoring in-flight agents");
        }
        self.progress.add_agents(restored.len());
        for entry in restored {
            self.queue.push_back(entry);
        }
        self.resume = Some(store);
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Queue agents for export in the given order.
    ///
    /// Agents retired by an earlier run and agents already queued or active
    /// are skipped. Returns how many were queued.
    pub fn enqueue(&mut self, agents: Vec<Agent>) -> usize {
        let mut queued = 0;
        for agent in agents {
            let retired = self
                .resume
                .as_ref()
                .is_some_and(|store| store.is_retired(&agent.agent_id));
            if retired {
                debug!(agent_id = %agent.agent_id, "Agent finished in an earlier run; skipping");
                continue;
            }
            if self.queue.contains(&agent.agent_id) || self.active.contains_key(&agent.agent_id) {
                continue;
            }
            self.queue.push_back(QueuedAgent::Fresh(agent));
            queued += 1;
        }
        self.progress.add_agents(queued);
        self.publish_state();
        queued
    }

    /// Agents holding an export slot
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Agents waiting for a slot
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// State of an active agent
    pub fn active_state(&self, agent_id: &str) -> Option<&AgentExportState> {
        self.active.get(agent_id)
    }

    /// Largest active set observed so far
    pub fn peak_active(&self) -> usize {
        self.peak_active
    }

    /// Counters of the current run
    pub fn progress(&self) -> &RunProgress {
        &self.progress
    }

    /// Export every queued agent to completion.
    ///
    /// # Errors
    /// Unrecognized submission errors and unretrievable archives (under
    /// [`ArchiveFailurePolicy::AbortRun`]) end the run. A shutdown request
    /// ends it with [`ExportError::Interrupted`]. In-flight state is
    /// checkpointed before any error is returned.
    pub async fn run(&mut self) -> ExportResult<RunSummary> {
        let span = info_span!(
            "export_run",
            agents = self.progress.total_agents(),
            max_concurrent = self.config.max_concurrent
        );
        let result = self.drive().instrument(span).await;

        match result {
            Ok(()) => {
                if let Some(store) = self.resume.as_mut() {
                    store.clear()?;
                }
                let summary = self.progress.summary();
                info!(
                    agents = summary.total_agents,
                    completed = summary.agents_completed,
                    failed = summary.agents_failed,
                    skipped = summary.agents_skipped,
                    windows = summary.windows_completed,
                    files = summary.files_staged,
                    elapsed_secs = summary.elapsed_secs,
                    "Export run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                self.dirty = true;
                if let Err(save_err) = self.checkpoint() {
                    warn!(error = %save_err, "Failed to save resume state after error");
                }
                error!(error = %e, active = self.active.len(), queued = self.queue.len(), "Export run stopped");
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> ExportResult<()> {
        info!(queued = self.queue.len(), "Starting export run");

        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested - saving progress before exiting");
                return Err(ExportError::Interrupted);
            }

            self.admit().await?;
            self.checkpoint()?;
            if self.is_finished() {
                return Ok(());
            }

            self.poll_cycle().await?;
            self.checkpoint()?;
            self.publish_state();
            debug!(
                "{}",
                self.progress
                    .format_progress(self.active.len(), self.queue.len())
            );
            if self.is_finished() {
                return Ok(());
            }

            self.pause(self.config.poll_interval).await;
        }
    }

    fn is_finished(&self) -> bool {
        self.active.is_empty() && self.queue.is_empty()
    }

    /// Fill free slots from the front of the queue.
    ///
    /// A concurrency-limit rejection puts the agent back at the front, cools
    /// down, and ends the pass so finished tasks can be drained first.
    async fn admit(&mut self) -> ExportResult<()> {
        while self.active.len() < self.config.max_concurrent && !self.shutdown_requested() {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };

            let (agent_id, next_start, final_end, windows_submitted) = match entry {
                QueuedAgent::Resumed(state) => {
                    info!(
                        agent_id = %state.agent_id,
                        export_id = %state.export_id,
                        "Re-adopting export task from previous run"
                    );
                    self.progress.record_admitted();
                    self.track(state);
                    continue;
                }
                QueuedAgent::Fresh(agent) => match self.planner.plan(&agent) {
                    WindowPlan::NothingToExport { start, end } => {
                        info!(
                            agent_id = %agent.agent_id,
                            start = %start,
                            end = %end,
                            "Nothing to export for agent; skipping"
                        );
                        self.progress.record_skipped();
                        continue;
                    }
                    WindowPlan::Export {
                        next_start,
                        final_end,
                    } => (agent.agent_id, next_start, final_end, 0),
                },
                QueuedAgent::Continuing {
                    agent_id,
                    next_start,
                    final_end,
                    windows_submitted,
                } => (agent_id, next_start, final_end, windows_submitted),
            };

            let window = self.planner.window_from(next_start, final_end);
            match self.submit_window(&agent_id, &window).await? {
                Submission::Tracked(export_id) => {
                    if windows_submitted == 0 {
                        let ordinal = self.progress.record_admitted();
                        info!(
                            agent_id = %agent_id,
                            ordinal,
                            total = self.progress.total_agents(),
                            "Admitted agent"
                        );
                    }
                    self.track(AgentExportState {
                        agent_id,
                        next_start,
                        final_end,
                        export_id,
                        windows_submitted: windows_submitted + 1,
                        unknown_polls: 0,
                    });
                }
                Submission::ConcurrencyLimited => {
                    self.queue.requeue_front(QueuedAgent::Continuing {
                        agent_id,
                        next_start,
                        final_end,
                        windows_submitted,
                    });
                    self.dirty = true;
                    self.pause(self.config.cooldown).await;
                    break;
                }
            }
        }

        self.publish_state();
        Ok(())
    }

    /// Submit `window` and classify the outcome
    async fn submit_window(
        &mut self,
        agent_id: &str,
        window: &ExportWindow,
    ) -> ExportResult<Submission> {
        match self.service.start_export_task(agent_id, window).await {
            Ok(export_id) => {
                info!(
                    agent_id,
                    export_id = %export_id,
                    window_start = %window.start,
                    window_end = %window.end,
                    "Started export task"
                );
                ExportMetrics::record_submission("accepted");
                self.progress.record_window_submitted();
                Ok(Submission::Tracked(export_id))
            }
            Err(ServiceError::DuplicateExport { export_id, message }) => {
                info!(
                    agent_id,
                    export_id = %export_id,
                    window_start = %window.start,
                    window_end = %window.end,
                    message = %message,
                    "Window already exported; adopting existing task"
                );
                ExportMetrics::record_submission("duplicate");
                self.progress.record_duplicate();
                self.progress.record_window_submitted();
                Ok(Submission::Tracked(export_id))
            }
            Err(ServiceError::ConcurrencyLimitExceeded(message)) => {
                warn!(
                    agent_id,
                    message = %message,
                    cooldown_secs = self.config.cooldown.as_secs_f64(),
                    "Export concurrency limit reached; requeueing agent"
                );
                ExportMetrics::record_submission("concurrency_limited");
                self.progress.record_concurrency_rejection();
                Ok(Submission::ConcurrencyLimited)
            }
            Err(e) => {
                error!(agent_id, error = %e, "Export submission failed");
                ExportMetrics::record_submission("error");
                Err(e.into())
            }
        }
    }

    /// Poll every active agent once, in agent-id order
    async fn poll_cycle(&mut self) -> ExportResult<()> {
        let agent_ids: Vec<String> = self.active.keys().cloned().collect();

        for agent_id in agent_ids {
            if self.shutdown_requested() {
                break;
            }
            let Some(state) = self.active.get(&agent_id).cloned() else {
                continue;
            };

            match self.poller.poll(&state).await? {
                PollOutcome::InProgress => {
                    if let Some(tracked) = self.active.get_mut(&agent_id) {
                        tracked.unknown_polls = 0;
                    }
                }
                PollOutcome::Succeeded(task) => self.complete_window(state, task).await?,
                PollOutcome::Failed(task) => {
                    warn!(
                        agent_id = %agent_id,
                        export_id = %task.export_id,
                        status_message = task.status_message.as_deref().unwrap_or(""),
                        "Export task failed"
                    );
                    ExportMetrics::record_window_completed("failed");
                    self.progress.record_window_completed(0);
                    let outcome = TerminalOutcome::Failed {
                        requested_end: task.requested_end_time,
                    };
                    self.handle_terminal(state, outcome).await?;
                }
                PollOutcome::Unrecognized(status) => {
                    self.record_unknown(&agent_id, Some(status.as_str()))?
                }
                PollOutcome::Missing => self.record_unknown(&agent_id, None)?,
            }
        }

        Ok(())
    }

    /// Extract a succeeded window and continue the agent
    async fn complete_window(
        &mut self,
        state: AgentExportState,
        task: ExportTask,
    ) -> ExportResult<()> {
        let extraction = match task.download_url.as_deref() {
            Some(url) => {
                self.extractor
                    .extract(&state.agent_id, state.next_start, url)
                    .await
            }
            None => Err(ExportError::InvalidArchive {
                agent_id: state.agent_id.clone(),
                reason: format!("export {} succeeded without a download URL", task.export_id),
            }),
        };

        match extraction {
            Ok(extraction) => {
                ExportMetrics::record_window_completed("succeeded");
                self.progress
                    .record_window_completed(extraction.staged.len());
                self.handle_terminal(state, TerminalOutcome::Succeeded(extraction.covered))
                    .await
            }
            Err(e)
                if e.is_archive_failure()
                    && self.config.archive_failure_policy == ArchiveFailurePolicy::RetireAgent =>
            {
                error!(
                    agent_id = %state.agent_id,
                    export_id = %task.export_id,
                    error = %e,
                    "Archive unavailable; retiring agent"
                );
                self.retire(&state.agent_id, RetireReason::ArchiveUnavailable)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a terminal outcome: retire, or submit the next window right away
    async fn handle_terminal(
        &mut self,
        mut state: AgentExportState,
        outcome: TerminalOutcome,
    ) -> ExportResult<()> {
        let reason = match state.advance(&outcome) {
            Continuation::Retire(reason) => reason,
            Continuation::Continue => {
                let window = self.planner.window_from(state.next_start, state.final_end);
                match self.submit_window(&state.agent_id, &window).await? {
                    Submission::Tracked(export_id) => {
                        state.export_id = export_id;
                        state.windows_submitted += 1;
                        self.track(state);
                    }
                    Submission::ConcurrencyLimited => {
                        self.active.remove(&state.agent_id);
                        self.queue.requeue_front(QueuedAgent::Continuing {
                            agent_id: state.agent_id,
                            next_start: state.next_start,
                            final_end: state.final_end,
                            windows_submitted: state.windows_submitted,
                        });
                        self.dirty = true;
                        self.pause(self.config.cooldown).await;
                    }
                }
                return Ok(());
            }
        };

        // Keep the advanced position visible until the agent is removed
        self.active.insert(state.agent_id.clone(), state.clone());
        self.retire(&state.agent_id, reason)
    }

    fn record_unknown(&mut self, agent_id: &str, status: Option<&str>) -> ExportResult<()> {
        let Some(state) = self.active.get_mut(agent_id) else {
            return Ok(());
        };
        state.unknown_polls += 1;
        let unknown_polls = state.unknown_polls;

        warn!(
            agent_id,
            export_id = %state.export_id,
            status = status.unwrap_or("<missing>"),
            unknown_polls,
            max_unknown_polls = self.config.max_unknown_polls,
            "Export task status not recognized"
        );

        if unknown_polls >= self.config.max_unknown_polls {
            self.retire(agent_id, RetireReason::UnknownStatus)?;
        }
        Ok(())
    }

    fn track(&mut self, state: AgentExportState) {
        self.active.insert(state.agent_id.clone(), state);
        self.peak_active = self.peak_active.max(self.active.len());
        self.dirty = true;
    }

    fn retire(&mut self, agent_id: &str, reason: RetireReason) -> ExportResult<()> {
        let state = self.active.remove(agent_id);
        self.progress.record_retired(reason);
        ExportMetrics::record_agent_retired(reason);

        let windows = state.as_ref().map_or(0, |s| s.windows_submitted);
        let reached = state.as_ref().map(|s| s.next_start.to_string());
        if reason.is_failure() {
            warn!(agent_id, reason = %reason, windows, reached = ?reached, "Agent retired");
        } else {
            info!(agent_id, reason = %reason, windows, reached = ?reached, "Agent retired");
        }

        if let Some(store) = self.resume.as_mut() {
            store.mark_retired(agent_id)?;
        }
        self.dirty = true;
        Ok(())
    }

    fn checkpoint(&mut self) -> ExportResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(store) = self.resume.as_mut() {
            store.checkpoint(&self.active, &self.queue)?;
        }
        self.dirty = false;
        Ok(())
    }

    fn publish_state(&self) {
        ExportMetrics::set_scheduler_state(self.active.len(), self.queue.len());
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        match &self.shutdown {
            Some(shutdown) => {
                shutdown.sleep(duration).await;
            }
            None => tokio::time::sleep(duration).await,
        }
    }
}
