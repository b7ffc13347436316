//! End-to-end scheduler runs against the in-memory discovery service

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tempfile::TempDir;

use discovery_export::exporter::{ArchiveFailurePolicy, ExportError};
use discovery_export::service::ServiceError;
use discovery_export::shutdown::ShutdownCoordinator;
use discovery_export::window::{ExportWindow, WindowPlanner};

use crate::support::fakes::{agent, at, fast_config, scheduler_for, FakeDiscovery, Finish};

fn unbounded() -> WindowPlanner {
    WindowPlanner::new(None, None)
}

#[tokio::test]
async fn test_agent_spanning_three_and_a_half_days_takes_two_windows() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new());
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(4, 12))]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(
        fake.submissions(),
        vec![
            (
                "o-1".to_string(),
                ExportWindow {
                    start: at(1, 0),
                    end: at(4, 0)
                }
            ),
            (
                "o-1".to_string(),
                ExportWindow {
                    start: at(4, 0),
                    end: at(4, 12)
                }
            ),
        ]
    );
    assert_eq!(summary.windows_completed, 2);
    assert_eq!(summary.agents_completed, 1);
    assert_eq!(summary.files_staged, 2);

    let category = dir.path().join("agentExports/o-1/systemPerformance");
    assert!(category
        .join("2020-01-01T000000Z_o-1_systemPerformance.csv")
        .exists());
    assert!(category
        .join("2020-01-04T000000Z_o-1_systemPerformance.csv")
        .exists());
    assert!(!dir.path().join("agentExports/o-1/results").exists());
}

#[tokio::test]
async fn test_long_lived_agent_windows_are_capped_and_increasing() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new());
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(11, 0))]);

    scheduler.run().await.unwrap();

    let windows: Vec<ExportWindow> = fake.submissions().into_iter().map(|(_, w)| w).collect();
    assert_eq!(windows.len(), 4);
    assert_eq!(windows.last().unwrap().end, at(11, 0));
    for window in &windows {
        assert!(window.span() <= ChronoDuration::days(3));
    }
    for pair in windows.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
        assert!(pair[0].start < pair[1].start);
    }
}

#[tokio::test]
async fn test_global_bounds_clip_the_interval() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new());
    let planner = WindowPlanner::new(Some(at(2, 0)), Some(at(4, 12)));
    let mut scheduler = scheduler_for(&fake, dir.path(), planner, fast_config());
    scheduler.enqueue(vec![
        agent("o-1", at(1, 0), at(10, 0)),
        agent("o-2", at(5, 0), at(9, 0)),
    ]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(
        fake.submissions(),
        vec![(
            "o-1".to_string(),
            ExportWindow {
                start: at(2, 0),
                end: at(4, 12)
            }
        )]
    );
    assert_eq!(summary.agents_skipped, 1);
    assert_eq!(summary.agents_completed, 1);
}

#[tokio::test]
async fn test_concurrency_rejection_requeues_agent_at_front() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_service_limit(2));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![
        agent("a", at(1, 0), at(2, 0)),
        agent("b", at(1, 0), at(2, 0)),
        agent("c", at(1, 0), at(2, 0)),
        agent("d", at(1, 0), at(2, 0)),
    ]);

    let summary = scheduler.run().await.unwrap();

    assert!(fake.rejections() >= 1);
    assert_eq!(summary.concurrency_rejections, fake.rejections() as u64);
    assert_eq!(fake.admission_order(), vec!["a", "b", "c", "d"]);
    assert!(fake.peak_in_progress() <= 2);
    assert_eq!(summary.agents_completed, 4);
    assert_eq!(summary.windows_completed, 4);
}

#[tokio::test]
async fn test_limited_continuation_resumes_from_next_window() {
    let dir = TempDir::new().unwrap();
    // The first submission is accepted, the continuation after it is rejected
    let fake = Arc::new(FakeDiscovery::new().with_limit_on_attempt(2));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(4, 12))]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(
        fake.submissions(),
        vec![
            (
                "o-1".to_string(),
                ExportWindow {
                    start: at(1, 0),
                    end: at(4, 0)
                }
            ),
            (
                "o-1".to_string(),
                ExportWindow {
                    start: at(4, 0),
                    end: at(4, 12)
                }
            ),
        ]
    );
    assert_eq!(fake.rejections(), 1);
    assert_eq!(summary.concurrency_rejections, 1);
    assert_eq!(summary.windows_submitted, 2);
    assert_eq!(summary.windows_completed, 2);
    assert_eq!(summary.total_agents, 1);
    assert_eq!(summary.agents_completed, 1);
    assert_eq!(summary.retired_by_reason.get("completed"), Some(&1));
    assert_eq!(scheduler.peak_active(), 1);
    assert_eq!(scheduler.active_count(), 0);
    assert_eq!(scheduler.queued_count(), 0);
    assert!(dir
        .path()
        .join("agentExports/o-1/systemPerformance/2020-01-04T000000Z_o-1_systemPerformance.csv")
        .exists());
}

#[tokio::test]
async fn test_active_set_never_exceeds_capacity() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(
        FakeDiscovery::new()
            .with_service_limit(100)
            .with_polls_until_done(3),
    );
    let config = fast_config().with_max_concurrent(2);
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), config);
    let agents = (0..7)
        .map(|i| agent(&format!("o-{i}"), at(1, 0), at(8, 0)))
        .collect();
    scheduler.enqueue(agents);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(scheduler.peak_active(), 2);
    assert!(fake.peak_in_progress() <= 2);
    assert_eq!(fake.rejections(), 0);
    assert_eq!(summary.agents_completed, 7);
    assert_eq!(summary.windows_completed, 7 * 3);
}

#[tokio::test]
async fn test_existing_export_is_adopted() {
    let dir = TempDir::new().unwrap();
    let first = ExportWindow {
        start: at(1, 0),
        end: at(4, 0),
    };
    let fake = Arc::new(FakeDiscovery::new().with_existing_export("o-1", first, "exp-existing"));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(4, 12))]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.duplicates_adopted, 1);
    assert_eq!(summary.windows_completed, 2);
    // Only the second window needed a new task
    assert_eq!(fake.submissions().len(), 1);
    assert!(dir
        .path()
        .join("agentExports/o-1/systemPerformance/2020-01-01T000000Z_o-1_systemPerformance.csv")
        .exists());
}

#[tokio::test]
async fn test_partial_coverage_continues_from_actual_end() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_coverage_cap("o-1", at(5, 0)));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(10, 0))]);

    let summary = scheduler.run().await.unwrap();

    let starts: Vec<_> = fake.submissions().into_iter().map(|(_, w)| w.start).collect();
    assert_eq!(starts, vec![at(1, 0), at(4, 0), at(5, 0)]);
    assert_eq!(summary.retired_by_reason.get("no_progress"), Some(&1));
    assert_eq!(summary.agents_failed, 0);
}

#[tokio::test]
async fn test_empty_coverage_retires_agent() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_coverage_cap("o-1", at(1, 0)));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(10, 0))]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(fake.submissions().len(), 1);
    assert_eq!(summary.retired_by_reason.get("no_progress"), Some(&1));
}

#[tokio::test]
async fn test_failed_task_retires_only_that_agent() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_finish("o-1", Finish::Fail));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![
        agent("o-1", at(1, 0), at(10, 0)),
        agent("o-2", at(1, 0), at(2, 0)),
    ]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.agents_failed, 1);
    assert_eq!(summary.agents_completed, 1);
    assert_eq!(summary.retired_by_reason.get("task_failed"), Some(&1));
    let o1_windows = fake
        .submissions()
        .iter()
        .filter(|(id, _)| id == "o-1")
        .count();
    assert_eq!(o1_windows, 1);
}

#[tokio::test]
async fn test_unknown_and_missing_status_are_bounded() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(
        FakeDiscovery::new()
            .with_polls_until_done(0)
            .with_finish("o-1", Finish::Unknown)
            .with_finish("o-2", Finish::Vanish),
    );
    let config = fast_config().with_max_unknown_polls(3);
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), config);
    scheduler.enqueue(vec![
        agent("o-1", at(1, 0), at(2, 0)),
        agent("o-2", at(1, 0), at(2, 0)),
    ]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.retired_by_reason.get("unknown_status"), Some(&2));
    assert_eq!(summary.agents_failed, 2);
    assert_eq!(fake.status_polls(), 6);
}

#[tokio::test]
async fn test_status_on_a_later_page_is_found() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_paginated_statuses());
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(2, 0))]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.agents_completed, 1);
    assert_eq!(summary.retired_by_reason.get("unknown_status"), None);
}

#[tokio::test]
async fn test_archive_failure_aborts_run_by_default() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_archive_failures(10));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(2, 0))]);

    let err = scheduler.run().await.unwrap_err();

    assert!(matches!(
        err,
        ExportError::ArchiveUnavailable { attempts: 3, .. }
    ));
    assert_eq!(fake.fetches(), 3);
}

#[tokio::test]
async fn test_transient_archive_failure_recovers() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_archive_failures(2));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(2, 0))]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(fake.fetches(), 3);
    assert_eq!(summary.agents_completed, 1);
}

#[tokio::test]
async fn test_archive_failure_can_retire_agent() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_finish("o-1", Finish::NoManifest));
    let config = fast_config().with_archive_failure_policy(ArchiveFailurePolicy::RetireAgent);
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), config);
    scheduler.enqueue(vec![
        agent("o-1", at(1, 0), at(2, 0)),
        agent("o-2", at(1, 0), at(2, 0)),
    ]);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.retired_by_reason.get("archive_unavailable"), Some(&1));
    assert_eq!(summary.agents_completed, 1);
}

#[tokio::test]
async fn test_unrecognized_submission_error_aborts_run() {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeDiscovery::new().with_submission_error(ServiceError::ApiError {
        code: "AuthorizationErrorException".to_string(),
        message: "not authorized".to_string(),
    }));
    let mut scheduler = scheduler_for(&fake, dir.path(), unbounded(), fast_config());
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(2, 0))]);

    let err = scheduler.run().await.unwrap_err();

    assert!(matches!(
        err,
        ExportError::Service(ServiceError::ApiError { .. })
    ));
    assert!(fake.submissions().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_run() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let fake = Arc::new(
        FakeDiscovery::new()
            .with_polls_until_done(50)
            .with_shutdown_on_poll(shutdown.clone(), 1),
    );
    let mut scheduler =
        scheduler_for(&fake, dir.path(), unbounded(), fast_config()).with_shutdown(shutdown);
    scheduler.enqueue(vec![agent("o-1", at(1, 0), at(2, 0))]);

    let err = scheduler.run().await.unwrap_err();

    assert!(matches!(err, ExportError::Interrupted));
    assert_eq!(scheduler.active_count(), 1);
    assert_eq!(fake.status_polls(), 1);
}
