//! In-memory discovery service shared by the integration suite
//!
//! `FakeDiscovery` answers the three listing/submission operations and serves
//! result archives, enforcing its own export concurrency limit the way the
//! real service does.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use discovery_export::exporter::{ExportScheduler, SchedulerConfig};
use discovery_export::output::StagingLayout;
use discovery_export::service::archive::{ArchiveFetcher, DownloadRetryPolicy};
use discovery_export::service::protocol::classify_error;
use discovery_export::service::{
    AgentPage, DiscoveryService, ExportTaskPage, ServiceError, ServiceResult,
};
use discovery_export::shutdown::SharedShutdown;
use discovery_export::window::{ExportWindow, WindowPlanner};
use discovery_export::{Agent, ExportStatus, ExportTask, MANIFEST_TIME_FORMAT};

/// `2020-01-<day>T<hour>:00:00Z`
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, day, hour, 0, 0).unwrap()
}

/// An agent alive over `[registered, last_ping]`
pub fn agent(id: &str, registered: DateTime<Utc>, last_ping: DateTime<Utc>) -> Agent {
    Agent {
        agent_id: id.to_string(),
        agent_type: "EC2".to_string(),
        registered_time: registered,
        last_health_ping_time: last_ping,
    }
}

/// Scheduler settings without any real waiting
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_cooldown(Duration::ZERO)
        .with_poll_interval(Duration::ZERO)
        .with_download_retry(DownloadRetryPolicy {
            attempts: 3,
            backoff_unit: Duration::ZERO,
        })
}

/// Scheduler wired to `fake` for both the service and the archives
pub fn scheduler_for(
    fake: &Arc<FakeDiscovery>,
    root: &Path,
    planner: WindowPlanner,
    config: SchedulerConfig,
) -> ExportScheduler {
    ExportScheduler::new(
        fake.clone(),
        fake.clone(),
        StagingLayout::new(root),
        planner,
        config,
    )
}

/// How a fake export task ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// SUCCEEDED with a complete archive
    Succeed,
    /// SUCCEEDED with an archive missing its manifest
    NoManifest,
    /// FAILED
    Fail,
    /// A status string the client does not know
    Unknown,
    /// The task disappears from the listing
    Vanish,
}

const CONCURRENCY_BODY: &str = r#"{"__type":"com.amazonaws.discovery#OperationNotPermittedException","message":"There are 5 export tasks in progress. Please wait for current export tasks to finish before starting another."}"#;

struct FakeTask {
    agent_id: String,
    window: ExportWindow,
    polls_left: u32,
    finish: Finish,
    done: bool,
}

struct FakeState {
    agent_pages: Vec<Vec<Agent>>,
    repeat_last_token: bool,
    service_limit: usize,
    polls_until_done: u32,
    agent_polls: HashMap<String, u32>,
    coverage_cap: HashMap<String, DateTime<Utc>>,
    finish: HashMap<String, Finish>,
    scripted_errors: VecDeque<ServiceError>,
    limited_attempts: HashSet<u32>,
    submit_attempts: u32,
    existing: HashMap<(String, DateTime<Utc>, DateTime<Utc>), String>,
    tasks: BTreeMap<String, FakeTask>,
    submissions: Vec<(String, ExportWindow)>,
    rejections: usize,
    peak_in_progress: usize,
    archive_failures: u32,
    fetches: u32,
    paginate_statuses: bool,
    agent_page_calls: u32,
    status_polls: u32,
    shutdown_on_poll: Option<(SharedShutdown, u32)>,
    next_id: u32,
}

/// Scripted in-memory discovery service
pub struct FakeDiscovery {
    state: Mutex<FakeState>,
}

impl FakeDiscovery {
    /// A service with no agents, a limit of five running exports, and tasks that
    /// finish on the second poll
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                agent_pages: vec![Vec::new()],
                repeat_last_token: false,
                service_limit: 5,
                polls_until_done: 1,
                agent_polls: HashMap::new(),
                coverage_cap: HashMap::new(),
                finish: HashMap::new(),
                scripted_errors: VecDeque::new(),
                limited_attempts: HashSet::new(),
                submit_attempts: 0,
                existing: HashMap::new(),
                tasks: BTreeMap::new(),
                submissions: Vec::new(),
                rejections: 0,
                peak_in_progress: 0,
                archive_failures: 0,
                fetches: 0,
                paginate_statuses: false,
                agent_page_calls: 0,
                status_polls: 0,
                shutdown_on_poll: None,
                next_id: 0,
            }),
        }
    }

    fn configure(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// Serve the agent listing as the given pages
    pub fn with_agent_pages(self, pages: Vec<Vec<Agent>>) -> Self {
        self.configure(|s| s.agent_pages = pages)
    }

    /// Keep handing out the last page token instead of ending the listing
    pub fn with_repeating_agent_token(self) -> Self {
        self.configure(|s| s.repeat_last_token = true)
    }

    /// Remote limit on running exports
    pub fn with_service_limit(self, limit: usize) -> Self {
        self.configure(|s| s.service_limit = limit)
    }

    /// In-progress polls before a task reaches its terminal status
    pub fn with_polls_until_done(self, polls: u32) -> Self {
        self.configure(|s| s.polls_until_done = polls)
    }

    /// In-progress polls for tasks of `agent_id`, overriding the default
    pub fn with_agent_polls(self, agent_id: &str, polls: u32) -> Self {
        self.configure(|s| {
            s.agent_polls.insert(agent_id.to_string(), polls);
        })
    }

    /// Request shutdown while answering the `poll`-th status query
    pub fn with_shutdown_on_poll(self, shutdown: SharedShutdown, poll: u32) -> Self {
        self.configure(|s| s.shutdown_on_poll = Some((shutdown, poll)))
    }

    /// Data for `agent_id` stops at `end`
    pub fn with_coverage_cap(self, agent_id: &str, end: DateTime<Utc>) -> Self {
        self.configure(|s| {
            s.coverage_cap.insert(agent_id.to_string(), end);
        })
    }

    /// Every task of `agent_id` ends with `finish`
    pub fn with_finish(self, agent_id: &str, finish: Finish) -> Self {
        self.configure(|s| {
            s.finish.insert(agent_id.to_string(), finish);
        })
    }

    /// Fail the next submission with `error`
    pub fn with_submission_error(self, error: ServiceError) -> Self {
        self.configure(|s| s.scripted_errors.push_back(error))
    }

    /// Answer the 1-based submission `attempt` with the concurrency limit,
    /// whatever the number of running exports
    pub fn with_limit_on_attempt(self, attempt: u32) -> Self {
        self.configure(|s| {
            s.limited_attempts.insert(attempt);
        })
    }

    /// An export of `window` for `agent_id` already exists under `export_id`
    pub fn with_existing_export(self, agent_id: &str, window: ExportWindow, export_id: &str) -> Self {
        self.configure(|s| {
            s.existing.insert(
                (agent_id.to_string(), window.start, window.end),
                export_id.to_string(),
            );
            s.tasks.insert(
                export_id.to_string(),
                FakeTask {
                    agent_id: agent_id.to_string(),
                    window,
                    polls_left: 0,
                    finish: Finish::Succeed,
                    done: true,
                },
            );
        })
    }

    /// Fail the first `count` archive downloads
    pub fn with_archive_failures(self, count: u32) -> Self {
        self.configure(|s| s.archive_failures = count)
    }

    /// Put every task on the second page of the status listing
    pub fn with_paginated_statuses(self) -> Self {
        self.configure(|s| s.paginate_statuses = true)
    }

    /// Accepted submissions in order
    pub fn submissions(&self) -> Vec<(String, ExportWindow)> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Agents in the order of their first accepted submission
    pub fn admission_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for (agent_id, _) in self.submissions() {
            if !order.contains(&agent_id) {
                order.push(agent_id);
            }
        }
        order
    }

    /// Submissions refused by the concurrency limit
    pub fn rejections(&self) -> usize {
        self.state.lock().unwrap().rejections
    }

    /// Most exports running at once
    pub fn peak_in_progress(&self) -> usize {
        self.state.lock().unwrap().peak_in_progress
    }

    /// Archive download attempts
    pub fn fetches(&self) -> u32 {
        self.state.lock().unwrap().fetches
    }

    /// Status queries answered
    pub fn status_polls(&self) -> u32 {
        self.state.lock().unwrap().status_polls
    }

    /// Agent listing pages requested
    pub fn agent_page_calls(&self) -> u32 {
        self.state.lock().unwrap().agent_page_calls
    }
}

fn snapshot(export_id: &str, task: &FakeTask, status: ExportStatus) -> ExportTask {
    let download_url = (status == ExportStatus::Succeeded).then(|| format!("fake://{export_id}"));
    ExportTask {
        export_id: export_id.to_string(),
        status_message: (status == ExportStatus::Failed).then(|| "no data collected".to_string()),
        status,
        download_url,
        requested_start_time: Some(task.window.start),
        requested_end_time: Some(task.window.end),
    }
}

fn build_archive(task: &FakeTask, actual_end: DateTime<Utc>) -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let data = format!("{}_systemPerformance.csv", task.agent_id);
    writer.start_file(data, SimpleFileOptions::default()).unwrap();
    writer.write_all(b"timestamp,cpu\n").unwrap();

    if task.finish != Finish::NoManifest {
        let actual_start = task.window.start.min(actual_end);
        let manifest = serde_json::json!({
            "RequestedStartTime": task.window.start.format(MANIFEST_TIME_FORMAT).to_string(),
            "RequestedEndTime": task.window.end.format(MANIFEST_TIME_FORMAT).to_string(),
            "ExportSummary": {
                "ActualStartTime": actual_start.format(MANIFEST_TIME_FORMAT).to_string(),
                "ActualEndTime": actual_end.format(MANIFEST_TIME_FORMAT).to_string(),
            }
        });
        let name = format!("{}_results.json", task.agent_id);
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(manifest.to_string().as_bytes()).unwrap();
    }

    Bytes::from(writer.finish().unwrap().into_inner())
}

#[async_trait]
impl DiscoveryService for FakeDiscovery {
    async fn describe_agents(&self, next_token: Option<&str>) -> ServiceResult<AgentPage> {
        let mut s = self.state.lock().unwrap();
        s.agent_page_calls += 1;
        let index: usize = next_token.map_or(0, |t| t.parse().unwrap());
        let last = s.agent_pages.len() - 1;
        let page = index.min(last);

        let next_token = if page < last {
            Some((page + 1).to_string())
        } else if s.repeat_last_token {
            Some(page.to_string())
        } else {
            None
        };
        Ok(AgentPage {
            agents: s.agent_pages[page].clone(),
            next_token,
        })
    }

    async fn start_export_task(&self, agent_id: &str, window: &ExportWindow) -> ServiceResult<String> {
        let mut s = self.state.lock().unwrap();
        if let Some(error) = s.scripted_errors.pop_front() {
            return Err(error);
        }
        s.submit_attempts += 1;
        if s.limited_attempts.contains(&s.submit_attempts) {
            s.rejections += 1;
            return Err(classify_error(400, CONCURRENCY_BODY));
        }
        let key = (agent_id.to_string(), window.start, window.end);
        if let Some(existing) = s.existing.get(&key) {
            return Err(classify_error(
                400,
                &serde_json::json!({
                    "__type": "OperationNotPermittedException",
                    "message": format!("A successful export is already present Export ID: {existing}"),
                })
                .to_string(),
            ));
        }

        let running = s.tasks.values().filter(|t| !t.done).count();
        if running >= s.service_limit {
            s.rejections += 1;
            return Err(classify_error(400, CONCURRENCY_BODY));
        }

        s.next_id += 1;
        let export_id = format!("exp-{}", s.next_id);
        let task = FakeTask {
            agent_id: agent_id.to_string(),
            window: *window,
            polls_left: s
                .agent_polls
                .get(agent_id)
                .copied()
                .unwrap_or(s.polls_until_done),
            finish: s.finish.get(agent_id).copied().unwrap_or(Finish::Succeed),
            done: false,
        };
        s.tasks.insert(export_id.clone(), task);
        s.submissions.push((agent_id.to_string(), *window));
        s.peak_in_progress = s.peak_in_progress.max(running + 1);
        Ok(export_id)
    }

    async fn describe_export_tasks(
        &self,
        export_id: &str,
        _agent_id: &str,
        next_token: Option<&str>,
    ) -> ServiceResult<ExportTaskPage> {
        let mut s = self.state.lock().unwrap();
        s.status_polls += 1;
        if let Some((shutdown, poll)) = &s.shutdown_on_poll {
            if s.status_polls == *poll {
                shutdown.request_shutdown();
            }
        }
        if s.paginate_statuses && next_token.is_none() {
            return Ok(ExportTaskPage {
                tasks: Vec::new(),
                next_token: Some("page-2".to_string()),
            });
        }

        let Some(task) = s.tasks.get_mut(export_id) else {
            return Ok(ExportTaskPage::default());
        };
        if task.polls_left > 0 {
            task.polls_left -= 1;
            return Ok(ExportTaskPage {
                tasks: vec![snapshot(export_id, task, ExportStatus::InProgress)],
                next_token: None,
            });
        }

        task.done = true;
        let status = match task.finish {
            Finish::Succeed | Finish::NoManifest => ExportStatus::Succeeded,
            Finish::Fail => ExportStatus::Failed,
            Finish::Unknown => ExportStatus::Unknown("PAUSED".to_string()),
            Finish::Vanish => return Ok(ExportTaskPage::default()),
        };
        Ok(ExportTaskPage {
            tasks: vec![snapshot(export_id, task, status)],
            next_token: None,
        })
    }
}

#[async_trait]
impl ArchiveFetcher for FakeDiscovery {
    async fn fetch(&self, url: &str) -> ServiceResult<Bytes> {
        let mut s = self.state.lock().unwrap();
        s.fetches += 1;
        if s.archive_failures > 0 {
            s.archive_failures -= 1;
            return Err(ServiceError::ArchiveError("HTTP 503".to_string()));
        }

        let export_id = url.trim_start_matches("fake://");
        let task = s
            .tasks
            .get(export_id)
            .ok_or_else(|| ServiceError::ArchiveError(format!("HTTP 404 for {url}")))?;
        let actual_end = s
            .coverage_cap
            .get(&task.agent_id)
            .map_or(task.window.end, |cap| task.window.end.min(*cap));
        Ok(build_archive(task, actual_end))
    }
}
