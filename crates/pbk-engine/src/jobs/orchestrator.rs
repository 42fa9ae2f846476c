//! Job submission and the outer job boundary
//!
//! Submitting validates the request synchronously, records a `queued` job
//! and hands the body to the task executor. The body always ends in a
//! terminal state: errors, panics and the job's own timeout are all caught
//! here and written to the job record.

use super::artifacts::ArtifactStore;
use super::export::run_export;
use super::import::run_import;
use super::tracker::{JobHandle, JobTracker};
use super::types::{EntityStatus, ExportRequest, ImportRequest, Job, JobKind, JobResult};
use crate::adapters::TaskExecutor;
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use futures::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobOrchestrator {
    ctx: EngineContext,
    executor: Arc<dyn TaskExecutor>,
    tracker: JobTracker,
    artifacts: ArtifactStore,
}

impl JobOrchestrator {
    pub fn new(ctx: EngineContext, executor: Arc<dyn TaskExecutor>) -> Self {
        let ttl = ctx.config.status_ttl();
        let tracker = JobTracker::new(ctx.status.clone(), ttl);
        let artifacts = ArtifactStore::new(
            ctx.config.artifact_dir.clone(),
            ctx.config.inline_artifact_limit_bytes,
            ctx.status.clone(),
            ttl,
        );
        Self {
            ctx,
            executor,
            tracker,
            artifacts,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn validate_export(request: &ExportRequest) -> EngineResult<()> {
        if request.entity_types.iter().all(|t| t.trim().is_empty()) {
            return Err(EngineError::configuration("no entity types selected"));
        }
        request.transform.validate()
    }

    pub fn validate_import(request: &ImportRequest) -> EngineResult<()> {
        if !request.archive.is_file() {
            return Err(EngineError::configuration(format!(
                "archive {} does not exist",
                request.archive.display()
            )));
        }
        if let Some(selected) = &request.selected {
            if selected.is_empty() {
                return Err(EngineError::configuration("selection is present but empty"));
            }
        }
        request.transform.validate()
    }

    /// Queue an export. Configuration errors surface here, before any job
    /// exists; everything later is only visible through the job record.
    pub async fn submit_export(&self, request: ExportRequest) -> EngineResult<Uuid> {
        Self::validate_export(&request)?;
        let job = self.tracker.create(JobKind::Export, &request.created_by).await?;

        let this = self.clone();
        let id = job.id;
        self.executor.enqueue(
            &format!("export:{id}"),
            async move {
                this.execute_export(id, request)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            }
            .boxed(),
            self.ctx.config.executor_timeout(),
        );
        Ok(id)
    }

    pub async fn submit_import(&self, request: ImportRequest) -> EngineResult<Uuid> {
        Self::validate_import(&request)?;
        let job = self.tracker.create(JobKind::Import, &request.created_by).await?;

        let this = self.clone();
        let id = job.id;
        self.executor.enqueue(
            &format!("import:{id}"),
            async move {
                this.execute_import(id, request)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            }
            .boxed(),
            self.ctx.config.executor_timeout(),
        );
        Ok(id)
    }

    /// Export job body behind the job boundary. Exposed so callers can run
    /// a queued job inline.
    pub async fn execute_export(&self, id: Uuid, request: ExportRequest) -> EngineResult<Job> {
        let handle = JobHandle::new(self.tracker.clone(), id);
        let body = async {
            run_export(&self.ctx, &self.artifacts, &handle, &request)
                .await
                .map(JobResult::Export)
        };
        self.guard(id, body).await
    }

    pub async fn execute_import(&self, id: Uuid, request: ImportRequest) -> EngineResult<Job> {
        let handle = JobHandle::new(self.tracker.clone(), id);
        let body = async {
            run_import(&self.ctx, &handle, &request)
                .await
                .map(JobResult::Import)
        };
        self.guard(id, body).await
    }

    async fn guard<F>(&self, id: Uuid, body: F) -> EngineResult<Job>
    where
        F: Future<Output = EngineResult<JobResult>> + Send,
    {
        self.tracker.mark_running(id).await?;
        let limit = self.ctx.config.job_timeout();

        let outcome = tokio::time::timeout(limit, AssertUnwindSafe(body).catch_unwind()).await;
        let error = match outcome {
            Ok(Ok(Ok(result))) => {
                let job = self.tracker.complete(id, result).await?;
                info!(job_id = %id, "Job completed");
                return Ok(job);
            },
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("job panicked: {detail}")
            },
            Err(_) => format!("job exceeded its time limit of {}s", limit.as_secs()),
        };

        error!(job_id = %id, error = %error, "Job failed");
        // The terminal write must happen even when the entity table is unreachable.
        if let Err(e) = self.tracker.finalize_entities(id, &HashSet::new()).await {
            warn!(job_id = %id, error = %e, "Could not reconcile entity statuses of failed job");
        }
        self.tracker.fail(id, error).await
    }

    /// `None` until the job record exists, or after it expired.
    pub async fn get_job(&self, id: Uuid) -> EngineResult<Option<Job>> {
        self.tracker.load(id).await
    }

    pub async fn get_entity_statuses(&self, id: Uuid) -> EngineResult<Option<Vec<EntityStatus>>> {
        let rows = self.tracker.load_entities(id).await?;
        Ok((!rows.is_empty()).then_some(rows))
    }

    pub async fn take_download(&self, token: &str) -> EngineResult<(String, Vec<u8>)> {
        self.artifacts.take_download(token).await
    }

    /// Poll until the job is terminal or `max_wait` elapses.
    pub async fn wait_for_terminal(&self, id: Uuid, poll: Duration, max_wait: Duration) -> EngineResult<Job> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if let Some(job) = self.get_job(id).await? {
                if job.status.is_terminal() {
                    return Ok(job);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::Job(format!("job {id} did not finish within {}s", max_wait.as_secs())));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::archive::ArchiveFormat;

    #[test]
    fn test_export_needs_a_selection() {
        let request = ExportRequest::new(vec![" ".into()], ArchiveFormat::Document, "admin");
        assert!(JobOrchestrator::validate_export(&request).unwrap_err().is_configuration());
    }

    #[test]
    fn test_import_needs_an_existing_archive() {
        let request = ImportRequest::new("/definitely/not/here.zip", "admin");
        assert!(JobOrchestrator::validate_import(&request).unwrap_err().is_configuration());
    }
}
