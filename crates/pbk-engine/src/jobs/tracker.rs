//! Job state persistence over the TTL'd status store
//!
//! Every write is a read-modify-write of the whole job record or the whole
//! per-entity table. There is exactly one worker per job id, so no locking
//! is attempted.

use super::types::{EntityState, EntityStatus, Job, JobKind, JobResult, JobStatus};
use crate::adapters::JobStatusStore;
use crate::error::{EngineError, EngineResult};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub fn job_key(id: Uuid) -> String {
    format!("pbk:job:{id}")
}

pub fn entities_key(id: Uuid) -> String {
    format!("pbk:job:{id}:entities")
}

#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStatusStore>,
    ttl: Duration,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStatusStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> EngineResult<()> {
        let value = serde_json::to_value(value)?;
        self.store
            .set(key, value, self.ttl)
            .await
            .map_err(EngineError::status_store)
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        match self.store.get(key).await.map_err(EngineError::status_store)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn create(&self, kind: JobKind, created_by: &str) -> EngineResult<Job> {
        let job = Job::new(kind, created_by);
        self.save(&job).await?;
        info!(job_id = %job.id, kind = kind.as_str(), created_by = %created_by, "Job queued");
        Ok(job)
    }

    pub async fn save(&self, job: &Job) -> EngineResult<()> {
        self.put(&job_key(job.id), job).await
    }

    /// `None` means "no data yet"; the entry may also have expired.
    pub async fn load(&self, id: Uuid) -> EngineResult<Option<Job>> {
        self.fetch(&job_key(id)).await
    }

    async fn load_existing(&self, id: Uuid) -> EngineResult<Job> {
        self.load(id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))
    }

    /// queued -> running. Any other starting state is left alone.
    pub async fn mark_running(&self, id: Uuid) -> EngineResult<Job> {
        let mut job = self.load_existing(id).await?;
        if job.status != JobStatus::Queued {
            warn!(job_id = %id, status = job.status.as_str(), "Job was not queued, not restarting it");
            return Ok(job);
        }
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.progress_message = "Starting".to_string();
        self.save(&job).await?;
        debug!(job_id = %id, "Job running");
        Ok(job)
    }

    pub async fn set_progress(&self, id: Uuid, message: impl Into<String>) -> EngineResult<()> {
        let mut job = self.load_existing(id).await?;
        if job.status.is_terminal() {
            return Ok(());
        }
        job.progress_message = message.into();
        self.save(&job).await
    }

    /// Terminal states are written once; later calls return the stored job.
    async fn finish(&self, id: Uuid, status: JobStatus, result: Option<JobResult>, error: Option<String>) -> EngineResult<Job> {
        let mut job = self.load_existing(id).await?;
        if job.status.is_terminal() {
            debug!(job_id = %id, status = job.status.as_str(), "Job already terminal");
            return Ok(job);
        }
        job.status = status;
        job.finished_at = Some(Utc::now());
        job.progress_message = match &error {
            Some(e) => format!("Failed: {e}"),
            None => "Completed".to_string(),
        };
        job.result = result;
        job.error = error;
        self.save(&job).await?;
        Ok(job)
    }

    pub async fn complete(&self, id: Uuid, result: JobResult) -> EngineResult<Job> {
        self.finish(id, JobStatus::Completed, Some(result), None).await
    }

    pub async fn fail(&self, id: Uuid, error: impl Into<String>) -> EngineResult<Job> {
        self.finish(id, JobStatus::Failed, None, Some(error.into())).await
    }

    pub async fn init_entities(&self, id: Uuid, entity_types: &[String]) -> EngineResult<()> {
        let rows: Vec<EntityStatus> = entity_types.iter().map(EntityStatus::pending).collect();
        self.put(&entities_key(id), &rows).await
    }

    /// Absent table reads back as empty.
    pub async fn load_entities(&self, id: Uuid) -> EngineResult<Vec<EntityStatus>> {
        Ok(self.fetch(&entities_key(id)).await?.unwrap_or_default())
    }

    pub async fn update_entity(&self, id: Uuid, update: EntityUpdate<'_>) -> EngineResult<()> {
        let mut rows = self.load_entities(id).await?;
        let idx = match rows.iter().position(|r| r.entity_type == update.entity_type) {
            Some(idx) => idx,
            None => {
                rows.push(EntityStatus::pending(update.entity_type));
                rows.len() - 1
            },
        };

        let row = &mut rows[idx];
        row.status = update.state;
        if let Some(size) = update.size_estimate {
            row.size_estimate = size;
        }
        if let Some(count) = update.record_count {
            row.record_count = count;
        }
        if update.error.is_some() {
            row.error = update.error;
        }
        row.updated_at = Utc::now();
        self.put(&entities_key(id), &rows).await
    }

    /// Force every non-terminal row into a terminal state.
    ///
    /// A row whose data made it into the artifact becomes `completed`, the
    /// rest `failed`. Returns the reconciled table.
    pub async fn finalize_entities(&self, id: Uuid, delivered: &HashSet<String>) -> EngineResult<Vec<EntityStatus>> {
        let mut rows = self.load_entities(id).await?;
        let mut changed = 0;
        for row in rows.iter_mut().filter(|r| !r.status.is_terminal()) {
            if delivered.contains(&row.entity_type) {
                row.status = EntityState::Completed;
            } else {
                row.status = EntityState::Failed;
                row.error.get_or_insert_with(|| "Not processed before the job ended".to_string());
            }
            row.updated_at = Utc::now();
            changed += 1;
        }
        if changed > 0 {
            warn!(job_id = %id, reconciled = changed, "Entity statuses left non-terminal were reconciled");
            self.put(&entities_key(id), &rows).await?;
        }
        Ok(rows)
    }
}

/// Partial update of one entity status row
#[derive(Debug, Clone)]
pub struct EntityUpdate<'a> {
    pub entity_type: &'a str,
    pub state: EntityState,
    pub size_estimate: Option<u64>,
    pub record_count: Option<u64>,
    pub error: Option<String>,
}

impl<'a> EntityUpdate<'a> {
    pub fn new(entity_type: &'a str, state: EntityState) -> Self {
        Self {
            entity_type,
            state,
            size_estimate: None,
            record_count: None,
            error: None,
        }
    }

    pub fn processing(entity_type: &'a str) -> Self {
        Self::new(entity_type, EntityState::Processing)
    }

    pub fn completed(entity_type: &'a str, record_count: u64) -> Self {
        Self::new(entity_type, EntityState::Completed).with_records(record_count)
    }

    pub fn failed(entity_type: &'a str, error: impl Into<String>) -> Self {
        let mut update = Self::new(entity_type, EntityState::Failed);
        update.error = Some(error.into());
        update
    }

    pub fn with_records(mut self, record_count: u64) -> Self {
        self.record_count = Some(record_count);
        self
    }

    pub fn with_size(mut self, size_estimate: u64) -> Self {
        self.size_estimate = Some(size_estimate);
        self
    }
}

/// A tracker bound to one job. Intermediate writes that fail are logged and
/// swallowed; the finalize step reconciles whatever they missed.
#[derive(Clone)]
pub struct JobHandle {
    tracker: JobTracker,
    id: Uuid,
}

impl JobHandle {
    pub fn new(tracker: JobTracker, id: Uuid) -> Self {
        Self { tracker, id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub async fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(job_id = %self.id, progress = %message, "Progress");
        if let Err(e) = self.tracker.set_progress(self.id, message).await {
            warn!(job_id = %self.id, error = %e, "Failed to record progress");
        }
    }

    /// Reconcile leftover entity rows. A store failure here is logged and
    /// never replaces the job's terminal write.
    pub async fn finalize(&self, delivered: &HashSet<String>) {
        if let Err(e) = self.tracker.finalize_entities(self.id, delivered).await {
            warn!(job_id = %self.id, error = %e, "Failed to reconcile entity statuses");
        }
    }

    pub async fn entity(&self, update: EntityUpdate<'_>) {
        let entity_type = update.entity_type.to_string();
        if let Err(e) = self.tracker.update_entity(self.id, update).await {
            warn!(job_id = %self.id, entity_type = %entity_type, error = %e, "Failed to record entity status");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStatusStore;
    use crate::jobs::types::{ExportResult, ArtifactDelivery};
    use crate::archive::ArchiveFormat;

    fn tracker() -> JobTracker {
        JobTracker::new(Arc::new(MemoryStatusStore::new()), Duration::from_secs(3600))
    }

    fn result() -> JobResult {
        JobResult::Export(ExportResult {
            file_name: "a.zip".into(),
            format: ArchiveFormat::Document,
            path: "a.zip".into(),
            size_bytes: 1,
            sha256: "00".into(),
            artifact: ArtifactDelivery::Inline {
                content_base64: "AA==".into(),
            },
            total_entities: 0,
            total_records: 0,
            failed_entities: Vec::new(),
            files_bundled: 0,
            order: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_lifecycle_and_terminal_idempotence() {
        let tracker = tracker();
        let job = tracker.create(JobKind::Export, "admin").await.unwrap();
        assert_eq!(tracker.load(job.id).await.unwrap().unwrap().status, JobStatus::Queued);

        let running = tracker.mark_running(job.id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        let done = tracker.complete(job.id, result()).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let again = tracker.fail(job.id, "late failure").await.unwrap();
        assert_eq!(again.status, JobStatus::Completed);
        assert_eq!(again.finished_at, done.finished_at);
        assert!(again.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_reads_as_absent() {
        let tracker = tracker();
        assert!(tracker.load(Uuid::new_v4()).await.unwrap().is_none());
        assert!(tracker.load_entities(Uuid::new_v4()).await.unwrap().is_empty());
        assert!(matches!(
            tracker.mark_running(Uuid::new_v4()).await,
            Err(EngineError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_finalize_reconciles_leftovers() {
        let tracker = tracker();
        let id = Uuid::new_v4();
        let types: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        tracker.init_entities(id, &types).await.unwrap();
        tracker.update_entity(id, EntityUpdate::completed("A", 3)).await.unwrap();
        tracker.update_entity(id, EntityUpdate::processing("B")).await.unwrap();

        let delivered: HashSet<String> = ["B".to_string()].into_iter().collect();
        let rows = tracker.finalize_entities(id, &delivered).await.unwrap();

        let states: Vec<_> = rows.iter().map(|r| (r.entity_type.as_str(), r.status)).collect();
        assert_eq!(
            states,
            vec![
                ("A", EntityState::Completed),
                ("B", EntityState::Completed),
                ("C", EntityState::Failed),
            ]
        );
        assert_eq!(rows[0].record_count, 3);
        assert!(rows[2].error.is_some());
    }
}
