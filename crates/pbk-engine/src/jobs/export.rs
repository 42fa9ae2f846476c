//! Export job body

use super::artifacts::ArtifactStore;
use super::tracker::{EntityUpdate, JobHandle};
use super::types::{ExportRequest, ExportResult};
use crate::archive::{bundle_files, ArchiveFormat, ArchiveWriter, FileCollector, WriterOptions};
use crate::context::EngineContext;
use crate::dependencies::{explore, sort};
use crate::error::{EngineError, EngineResult};
use crate::model::{table_name, SchemaDefinition};
use crate::records::{stream_records, ReadOptions};
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashSet;
use tracing::{info, warn};

/// Selected types plus, when requested, everything they transitively link
/// to; deduplicated, selection first.
async fn resolve_types(ctx: &EngineContext, request: &ExportRequest) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for t in &request.entity_types {
        if !types.contains(t) {
            types.push(t.clone());
        }
    }
    if request.include_dependencies {
        let exploration = explore(ctx.metadata.as_ref(), &types, ctx.config.max_dependency_depth).await;
        for t in exploration.all_types {
            if !types.contains(&t) {
                types.push(t);
            }
        }
    }
    types
}

pub fn artifact_file_name(format: ArchiveFormat, include_files: bool) -> String {
    format!(
        "partial_backup_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension(include_files)
    )
}

/// Progress cadence for one entity: every tenth of the rows, but only for
/// large tables.
fn progress_step(rows: u64, large_entity_rows: u64) -> Option<u64> {
    (rows > large_entity_rows).then(|| (rows / 10).max(1))
}

#[tracing::instrument(skip_all, fields(job_id = %job.id(), format = %request.format))]
pub async fn run_export(
    ctx: &EngineContext,
    artifacts: &ArtifactStore,
    job: &JobHandle,
    request: &ExportRequest,
) -> EngineResult<ExportResult> {
    let config = &ctx.config;

    job.progress("Resolving entity types").await;
    let types = resolve_types(ctx, request).await;
    let outcome = sort(ctx.metadata.as_ref(), &types).await;
    let order = outcome.order;
    job.tracker().init_entities(job.id(), &order).await?;

    let file_name = artifact_file_name(request.format, request.include_files);
    let path = artifacts.artifact_path(job.id(), &file_name);
    let mut options = WriterOptions::new(request.format, request.created_by.clone())
        .with_files(request.include_files)
        .with_table_rules(request.transform.table_rules.clone());
    options.sql_rows_per_statement = config.sql_rows_per_statement;
    let mut writer = ArchiveWriter::create(&path, options)?;

    let batch_size = match request.format {
        ArchiveFormat::Tabular => config.tabular_batch_size,
        _ => config.document_batch_size,
    };
    let mut collector = FileCollector::new();
    let mut exported: HashSet<String> = HashSet::new();
    let mut failed: Vec<String> = Vec::new();
    let total = order.len();

    for (idx, entity_type) in order.iter().enumerate() {
        job.progress(format!("Exporting {entity_type} ({}/{total})", idx + 1)).await;
        job.entity(EntityUpdate::processing(entity_type)).await;

        match export_entity(ctx, &mut writer, &mut collector, job, request, entity_type, batch_size).await {
            Ok(count) => {
                exported.insert(entity_type.clone());
                job.entity(EntityUpdate::completed(entity_type, count)).await;
            },
            Err(EntityFailure::Skipped(e)) => {
                warn!(entity_type = %entity_type, error = %e, "Entity skipped");
                failed.push(entity_type.clone());
                job.entity(EntityUpdate::failed(entity_type, e.to_string())).await;
            },
            Err(EntityFailure::Fatal(e)) => return Err(e),
        }
    }

    let files_bundled = if request.include_files {
        job.progress(format!("Bundling {} files", collector.len())).await;
        bundle_files(&mut writer, ctx.files.as_ref(), &collector).await?
    } else {
        0
    };

    job.progress("Finalizing archive").await;
    let manifest = writer.finish()?;
    job.finalize(&exported).await;
    let delivered = artifacts.deliver(&path).await?;

    info!(
        entities = manifest.entities.len(),
        records = manifest.total_records,
        failed = failed.len(),
        size_bytes = delivered.size_bytes,
        "Export finished"
    );
    Ok(ExportResult {
        file_name: delivered.file_name,
        format: request.format,
        path,
        size_bytes: delivered.size_bytes,
        sha256: delivered.sha256,
        artifact: delivered.delivery,
        total_entities: manifest.entities.len(),
        total_records: manifest.total_records,
        failed_entities: failed,
        files_bundled,
        order,
    })
}

enum EntityFailure {
    /// Entity-level problem: record it and move on
    Skipped(EngineError),
    /// Archive I/O problem: the whole job fails
    Fatal(EngineError),
}

async fn export_entity(
    ctx: &EngineContext,
    writer: &mut ArchiveWriter,
    collector: &mut FileCollector,
    job: &JobHandle,
    request: &ExportRequest,
    entity_type: &str,
    batch_size: usize,
) -> Result<u64, EntityFailure> {
    let meta = ctx.metadata.as_ref();
    let store = ctx.datastore.as_ref();
    let table = table_name(entity_type);

    let stats = store
        .table_stats(&table)
        .await
        .map_err(|e| EntityFailure::Skipped(EngineError::datastore(entity_type, format!("table size lookup: {e}"))))?;
    job.entity(EntityUpdate::processing(entity_type).with_size(stats.bytes)).await;

    let definition: SchemaDefinition = meta
        .get_definition(entity_type)
        .await
        .map_err(|e| EntityFailure::Skipped(EngineError::metadata(entity_type, e)))?
        .ok_or_else(|| EntityFailure::Skipped(EngineError::EntityNotFound(entity_type.to_string())))?;

    let ddl = if request.format == ArchiveFormat::Sql {
        match store.table_ddl(&table).await {
            Ok(ddl) => Some(ddl),
            Err(e) => {
                warn!(entity_type = %entity_type, error = %e, "Table definition unavailable");
                None
            },
        }
    } else {
        None
    };

    let read_options = ReadOptions {
        batch_size,
        is_container: definition.is_container,
    };
    let mut records = stream_records(store, entity_type, read_options)
        .await
        .map_err(EntityFailure::Skipped)?;

    writer.begin_entity(&definition, ddl.as_deref()).map_err(EntityFailure::Fatal)?;
    let step = progress_step(stats.rows, ctx.config.large_entity_rows);
    let mut written: u64 = 0;

    while let Some(mut record) = records.next().await {
        request.transform.apply_field_rules(&mut record);
        if request.include_files {
            collector.collect(store, &definition, &record).await;
        }
        writer.write_record(&record).map_err(EntityFailure::Fatal)?;
        written += 1;

        if let Some(step) = step {
            if written % step == 0 {
                let pct = (written * 100 / stats.rows.max(1)).min(100);
                job.progress(format!("Exporting {entity_type}: {pct}% ({written}/{} rows)", stats.rows))
                    .await;
            }
        }
    }

    writer.end_entity().map_err(EntityFailure::Fatal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_only_for_large_tables() {
        assert_eq!(progress_step(500, 10_000), None);
        assert_eq!(progress_step(50_000, 10_000), Some(5_000));
    }

    #[test]
    fn test_artifact_name_matches_container() {
        assert!(artifact_file_name(ArchiveFormat::Sql, false).ends_with(".sql"));
        assert!(artifact_file_name(ArchiveFormat::Sql, true).ends_with(".zip"));
        assert!(artifact_file_name(ArchiveFormat::Document, false).starts_with("partial_backup_"));
    }
}
