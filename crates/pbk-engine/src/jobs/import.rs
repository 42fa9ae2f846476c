//! Import job body

use super::tracker::{EntityUpdate, JobHandle};
use super::types::{ImportRequest, ImportResult};
use crate::archive::{ArchiveFormat, ArchiveReader};
use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::restore::{candidate_types, restore, LogStatus, RestoreLogEntry, RestoreOptions, RestoreProgress, ALL_ENTITIES};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::info;

/// Mirrors restore progress into the job's status records.
struct JobProgress<'a> {
    job: &'a JobHandle,
}

#[async_trait]
impl RestoreProgress for JobProgress<'_> {
    async fn entity_started(&self, entity_type: &str, position: usize, total: usize) {
        self.job
            .progress(format!("Importing {entity_type} ({position}/{total})"))
            .await;
        self.job.entity(EntityUpdate::processing(entity_type)).await;
    }

    async fn entity_finished(&self, entry: &RestoreLogEntry) {
        let update = match entry.status {
            LogStatus::Error => EntityUpdate::failed(&entry.entity_type, entry.message.clone()),
            _ => EntityUpdate::completed(&entry.entity_type, entry.imported),
        };
        self.job.entity(update).await;
    }
}

#[tracing::instrument(skip_all, fields(job_id = %job.id(), archive = %request.archive.display()))]
pub async fn run_import(ctx: &EngineContext, job: &JobHandle, request: &ImportRequest) -> EngineResult<ImportResult> {
    job.progress("Reading archive").await;
    let mut reader = ArchiveReader::open(&request.archive)?;

    let archived = reader.manifest().entity_types();
    let tracked = match reader.format() {
        ArchiveFormat::Sql => archived,
        _ => candidate_types(&archived, request.selected.as_deref()),
    };
    job.tracker().init_entities(job.id(), &tracked).await?;

    let options = RestoreOptions {
        selected: request.selected.clone(),
        transform: request.transform.clone(),
        restore_files: request.restore_files,
    };
    let log = restore(ctx, &mut reader, &options, &JobProgress { job }).await?;

    let restored: HashSet<String> = log
        .entries
        .iter()
        .filter(|e| e.entity_type != ALL_ENTITIES && e.status != LogStatus::Error)
        .map(|e| e.entity_type.clone())
        .collect();
    job.finalize(&restored).await;

    info!(
        imported = log.summary.imported,
        skipped = log.summary.skipped,
        failed = log.summary.failed,
        errors = log.summary.errors,
        "Import finished"
    );
    Ok(ImportResult {
        archive: request.archive.clone(),
        log,
    })
}
