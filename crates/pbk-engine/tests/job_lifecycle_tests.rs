//! Job state machine, per-entity status rows and artifact hand-off.

mod common;

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use common::{empty_catalog, sales_catalog, strings, Harness};
use pbk_engine::adapters::{JobStatusStore, MemoryStatusStore, TokioExecutor};
use pbk_engine::archive::ArchiveFormat;
use pbk_engine::jobs::{ArtifactDelivery, EntityState, ExportRequest, ImportRequest, JobOrchestrator, JobStatus};
use pbk_engine::schedule::{BackupSchedule, Frequency, RunStatus, ScheduleRunner};
use pbk_engine::{EngineConfig, EngineContext, EngineError};
use std::sync::Arc;
use std::time::Duration;

/// Status store whose per-job entity tables cannot be read back.
struct EntityTableUnreadable {
    inner: MemoryStatusStore,
}

#[async_trait]
impl JobStatusStore for EntityTableUnreadable {
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> anyhow::Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        if key.ends_with(":entities") {
            anyhow::bail!("entity table unavailable");
        }
        self.inner.get(key).await
    }
}

#[tokio::test]
async fn test_completed_export_leaves_every_entity_terminal() {
    let harness = Harness::new(sales_catalog().await).await;
    let request = ExportRequest::new(
        strings(&["Sales Invoice", "Customer", "Territory"]),
        ArchiveFormat::Document,
        "admin",
    );
    let id = harness.jobs.submit_export(request).await.unwrap();
    let job = harness.wait(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());

    let statuses = harness.jobs.get_entity_statuses(id).await.unwrap().unwrap();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|s| s.status == EntityState::Completed));
    let invoices = statuses.iter().find(|s| s.entity_type == "Sales Invoice").unwrap();
    assert_eq!(invoices.record_count, 3);
    assert!(invoices.size_estimate > 0);
}

#[tokio::test]
async fn test_stats_failure_marks_only_that_entity_failed() {
    let catalog = sales_catalog().await;
    catalog.fail_stats_for("Item").await;
    let harness = Harness::new(catalog).await;

    let request = ExportRequest::new(strings(&["Item", "Customer"]), ArchiveFormat::Document, "admin");
    let id = harness.jobs.submit_export(request).await.unwrap();
    let job = harness.wait(id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let result = job.export_result().unwrap();
    assert_eq!(result.failed_entities, strings(&["Item"]));
    assert_eq!(result.total_entities, 1);

    let statuses = harness.jobs.get_entity_statuses(id).await.unwrap().unwrap();
    let item = statuses.iter().find(|s| s.entity_type == "Item").unwrap();
    assert_eq!(item.status, EntityState::Failed);
    assert!(item.error.as_deref().unwrap().contains("table size lookup"));
    let customer = statuses.iter().find(|s| s.entity_type == "Customer").unwrap();
    assert_eq!(customer.status, EntityState::Completed);
}

#[tokio::test]
async fn test_invalid_requests_fail_before_a_job_exists() {
    let harness = Harness::new(sales_catalog().await).await;

    let err = harness
        .jobs
        .submit_export(ExportRequest::new(Vec::new(), ArchiveFormat::Document, "admin"))
        .await
        .unwrap_err();
    assert!(err.is_configuration());

    let err = harness
        .jobs
        .submit_import(ImportRequest::new("/no/such/archive.zip", "admin"))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_unreadable_archive_fails_the_job() {
    let harness = Harness::new(empty_catalog()).await;
    let path = harness.artifact_dir.path().join("garbage.zip");
    std::fs::write(&path, b"PK\x03\x04 definitely not a zip").unwrap();

    let id = harness.jobs.submit_import(ImportRequest::new(&path, "admin")).await.unwrap();
    let job = harness.wait(id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
    assert!(job.result.is_none());
}

#[tokio::test]
async fn test_unknown_job_reads_as_no_data() {
    let harness = Harness::new(empty_catalog()).await;
    let id = uuid::Uuid::new_v4();
    assert!(harness.jobs.get_job(id).await.unwrap().is_none());
    assert!(harness.jobs.get_entity_statuses(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_large_artifact_is_downloaded_once() {
    let harness = Harness::with_config(sales_catalog().await, |config| {
        config.inline_artifact_limit_bytes = 0;
    })
    .await;

    let request = ExportRequest::new(strings(&["Territory"]), ArchiveFormat::Document, "admin");
    let id = harness.jobs.submit_export(request).await.unwrap();
    let job = harness.wait(id).await;
    let result = job.export_result().unwrap();

    let ArtifactDelivery::Download { token } = &result.artifact else {
        panic!("expected a download token, got {:?}", result.artifact);
    };
    let (file_name, bytes) = harness.jobs.take_download(token).await.unwrap();
    assert_eq!(file_name, result.file_name);
    assert_eq!(bytes.len() as u64, result.size_bytes);
    assert!(!result.path.exists());

    let second = harness.jobs.take_download(token).await.unwrap_err();
    assert!(matches!(second, EngineError::DownloadUnavailable));
}

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

#[tokio::test]
async fn test_schedule_runs_export_and_records_outcome() {
    let harness = Harness::new(sales_catalog().await).await;
    let mut nightly = BackupSchedule::new(
        "nightly",
        Frequency::Daily,
        NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        strings(&["Customer"]),
    );
    nightly.next_run = Some(at("2025-03-10 02:00:00"));
    let mut broken = nightly.clone();
    broken.name = "broken".into();
    broken.entity_types = strings(&["Ghost"]);
    let mut idle = nightly.clone();
    idle.name = "idle".into();
    idle.next_run = Some(at("2025-03-11 02:00:00"));

    let mut runner = ScheduleRunner::new(harness.jobs.clone(), vec![nightly, broken, idle])
        .with_poll_interval(Duration::from_millis(10));
    let runs = runner.run_due(at("2025-03-10 02:00:30"), Duration::from_secs(10)).await;

    assert_eq!(runs.len(), 2);
    let nightly = &runner.schedules()[0];
    assert_eq!(nightly.last_status, Some(RunStatus::Success));
    assert!(nightly.last_message.as_deref().unwrap().contains("records: 2"));
    assert_eq!(nightly.next_run, Some(at("2025-03-11 02:00:00")));
    assert_eq!(runner.schedules()[2].last_run, None);

    let state = runner.state();
    assert!(state.contains_key("broken"));
}

#[tokio::test]
async fn test_disabled_schedule_cannot_run_now() {
    let harness = Harness::new(sales_catalog().await).await;
    let mut schedule = BackupSchedule::new(
        "off",
        Frequency::Daily,
        NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        strings(&["Customer"]),
    );
    schedule.enabled = false;
    let mut runner = ScheduleRunner::new(harness.jobs.clone(), vec![schedule]);

    let err = runner
        .run_now("off", at("2025-03-10 12:00:00"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_unreadable_entity_table_still_ends_jobs() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        artifact_dir: artifact_dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let status = Arc::new(EntityTableUnreadable {
        inner: MemoryStatusStore::new(),
    });
    let ctx = EngineContext::from_catalog(Arc::new(sales_catalog().await), status, config);
    let jobs = JobOrchestrator::new(ctx, Arc::new(TokioExecutor::current().unwrap()));
    let poll = Duration::from_millis(10);
    let max_wait = Duration::from_secs(10);

    let id = jobs
        .submit_export(ExportRequest::new(strings(&["Customer"]), ArchiveFormat::Document, "admin"))
        .await
        .unwrap();
    let job = jobs.wait_for_terminal(id, poll, max_wait).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let garbage = artifact_dir.path().join("garbage.zip");
    std::fs::write(&garbage, b"PK\x03\x04 definitely not a zip").unwrap();
    let id = jobs.submit_import(ImportRequest::new(&garbage, "admin")).await.unwrap();
    let job = jobs.wait_for_terminal(id, poll, max_wait).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
}
