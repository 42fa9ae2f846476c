//! Restore sequencing
//!
//! Document and tabular archives are restored type by type in dependency
//! order: the destination schema is created only when absent, then records
//! stream batch by batch through the skip-if-exists write path. SQL archives
//! are replayed statement by statement in file order.

use crate::archive::sql::TableExtractor;
use crate::archive::{restore_files, ArchiveFormat, ArchiveReader, FileRestoreStats, SectionEvent};
use crate::context::EngineContext;
use crate::dependencies::{direct_dependencies, kahn_sort};
use crate::error::EngineResult;
use crate::model::Record;
use crate::records::{apply_records, MergePolicy, WriteStats};
use crate::transform::TransformRules;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info, warn};

/// Entry used for log lines that are not about one entity type.
pub const ALL_ENTITIES: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Restrict to these types; `None` restores the whole archive
    pub selected: Option<Vec<String>>,
    pub transform: TransformRules,
    pub restore_files: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// No record-level errors
    Success,
    /// Some records failed
    Partial,
    /// Nothing could be written for this type
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreLogEntry {
    pub entity_type: String,
    pub status: LogStatus,
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
    pub message: String,
}

impl RestoreLogEntry {
    fn from_stats(entity_type: &str, stats: WriteStats) -> Self {
        let status = if stats.failed == 0 {
            LogStatus::Success
        } else {
            LogStatus::Partial
        };
        Self {
            entity_type: entity_type.to_string(),
            status,
            imported: stats.imported,
            skipped: stats.skipped,
            failed: stats.failed,
            message: format!(
                "Imported {}, skipped {} existing, {} failed",
                stats.imported, stats.skipped, stats.failed
            ),
        }
    }

    fn error(entity_type: &str, message: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            status: LogStatus::Error,
            imported: 0,
            skipped: 0,
            failed: 0,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub entity_types: usize,
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreLog {
    pub entries: Vec<RestoreLogEntry>,
    /// Order the types were restored in
    pub order: Vec<String>,
    /// Types placed best-effort because of a dependency cycle
    pub cyclic: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FileRestoreStats>,
    pub summary: RestoreSummary,
}

impl RestoreLog {
    fn push(&mut self, entry: RestoreLogEntry) {
        if entry.entity_type != ALL_ENTITIES {
            self.summary.entity_types += 1;
        }
        self.summary.imported += entry.imported;
        self.summary.skipped += entry.skipped;
        self.summary.failed += entry.failed;
        if entry.status == LogStatus::Error {
            self.summary.errors += 1;
        }
        self.entries.push(entry);
    }

    pub fn entry(&self, entity_type: &str) -> Option<&RestoreLogEntry> {
        self.entries.iter().find(|e| e.entity_type == entity_type)
    }
}

/// Observer notified as each entity type is restored.
#[async_trait]
pub trait RestoreProgress: Send + Sync {
    async fn entity_started(&self, entity_type: &str, position: usize, total: usize);

    async fn entity_finished(&self, entry: &RestoreLogEntry);
}

/// Progress sink for callers that only want the final log.
pub struct NoProgress;

#[async_trait]
impl RestoreProgress for NoProgress {
    async fn entity_started(&self, _entity_type: &str, _position: usize, _total: usize) {}

    async fn entity_finished(&self, _entry: &RestoreLogEntry) {}
}

/// Types to restore: the archive's, narrowed to the selection if any.
pub fn candidate_types(archived: &[String], selected: Option<&[String]>) -> Vec<String> {
    match selected {
        None => archived.to_vec(),
        Some(selected) => {
            for missing in selected.iter().filter(|s| !archived.contains(*s)) {
                warn!(entity_type = %missing, "Selected type is not in the archive");
            }
            archived.iter().filter(|t| selected.contains(*t)).cloned().collect()
        },
    }
}

#[tracing::instrument(skip_all, fields(format = %reader.format()))]
pub async fn restore(
    ctx: &EngineContext,
    reader: &mut ArchiveReader,
    options: &RestoreOptions,
    progress: &dyn RestoreProgress,
) -> EngineResult<RestoreLog> {
    let mut log = match reader.format() {
        ArchiveFormat::Sql => restore_sql(ctx, reader, options, progress).await?,
        ArchiveFormat::Document | ArchiveFormat::Tabular => {
            restore_sections(ctx, reader, options, progress).await
        },
    };

    if options.restore_files && !reader.manifest().files.is_empty() {
        log.files = Some(restore_files(reader, ctx.files.as_ref()).await);
    }

    info!(
        entity_types = log.summary.entity_types,
        imported = log.summary.imported,
        skipped = log.summary.skipped,
        failed = log.summary.failed,
        errors = log.summary.errors,
        "Restore finished"
    );
    Ok(log)
}

async fn restore_sections(
    ctx: &EngineContext,
    reader: &mut ArchiveReader,
    options: &RestoreOptions,
    progress: &dyn RestoreProgress,
) -> RestoreLog {
    let manifest = reader.manifest().clone();
    let candidates = candidate_types(&manifest.entity_types(), options.selected.as_deref());

    // Edges come from the archived definitions; the destination may not
    // know these types yet.
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for entity_type in &candidates {
        let deps = match manifest.entry(entity_type) {
            Some(entry) if !entry.dependencies.is_empty() => entry.dependencies.clone(),
            _ => direct_dependencies(ctx.metadata.as_ref(), entity_type).await,
        };
        edges.insert(entity_type.clone(), deps);
    }

    let outcome = kahn_sort(&candidates, &edges);
    if outcome.has_cycle() {
        warn!(cyclic = %outcome.cyclic.join(", "), "Circular dependencies in archive, restoring best-effort");
    }

    let mut log = RestoreLog {
        order: outcome.order.clone(),
        cyclic: outcome.cyclic.clone(),
        ..RestoreLog::default()
    };

    let total = outcome.order.len();
    for (idx, entity_type) in outcome.order.iter().enumerate() {
        progress.entity_started(entity_type, idx + 1, total).await;
        let entry = restore_one(ctx, reader, options, entity_type).await;
        match entry.status {
            LogStatus::Error => error!(entity_type = %entity_type, message = %entry.message, "Entity restore failed"),
            _ => info!(entity_type = %entity_type, message = %entry.message, "Entity restored"),
        }
        progress.entity_finished(&entry).await;
        log.push(entry);
    }
    log
}

async fn restore_one(
    ctx: &EngineContext,
    reader: &mut ArchiveReader,
    options: &RestoreOptions,
    entity_type: &str,
) -> RestoreLogEntry {
    let batch_size = match reader.format() {
        ArchiveFormat::Tabular => ctx.config.tabular_batch_size,
        _ => ctx.config.document_batch_size,
    };
    let mut section = match reader.stream_section(entity_type, batch_size) {
        Ok(section) => section,
        Err(e) => return RestoreLogEntry::error(entity_type, format!("Unreadable archive section: {e}")),
    };
    let archived_definition = match section.next().await {
        Some(Ok(SectionEvent::Definition(definition))) => definition,
        Some(Ok(SectionEvent::Records(_))) | None => {
            return RestoreLogEntry::error(entity_type, "Archive section ended before its definition")
        },
        Some(Err(e)) => return RestoreLogEntry::error(entity_type, format!("Unreadable archive section: {e}")),
    };

    match ctx.metadata.get_definition(entity_type).await {
        Ok(Some(_)) => {},
        Ok(None) => {
            let Some(mut definition) = archived_definition else {
                return RestoreLogEntry::error(entity_type, "Type is missing at the destination and the archive has no definition");
            };
            definition.strip_audit_properties();
            if let Err(e) = ctx.metadata.create_definition(&definition).await {
                return RestoreLogEntry::error(entity_type, format!("Schema creation failed: {e}"));
            }
            info!(entity_type = %entity_type, "Created missing schema from archive");
        },
        Err(e) => return RestoreLogEntry::error(entity_type, format!("Metadata lookup failed: {e}")),
    }

    let mut stats = WriteStats::default();
    while let Some(event) = section.next().await {
        let batch = match event {
            Ok(SectionEvent::Records(batch)) => batch,
            Ok(SectionEvent::Definition(_)) => continue,
            Err(e) => {
                error!(entity_type = %entity_type, after = stats.total(), error = %e, "Archive section became unreadable");
                let mut entry = RestoreLogEntry::from_stats(entity_type, stats);
                entry.status = if stats.total() == 0 {
                    LogStatus::Error
                } else {
                    LogStatus::Partial
                };
                entry.message = format!("{}; section unreadable after {} records: {e}", entry.message, stats.total());
                return entry;
            },
        };

        let mut records: Vec<Record> = batch
            .into_iter()
            .map(|fields| Record::new(entity_type, fields))
            .collect();
        crate::transform::apply_field_rules(&mut records, &options.transform.field_rules);
        stats += apply_records(ctx.datastore.as_ref(), records, MergePolicy::SkipIfExists).await;
    }
    RestoreLogEntry::from_stats(entity_type, stats)
}

async fn restore_sql(
    ctx: &EngineContext,
    reader: &mut ArchiveReader,
    options: &RestoreOptions,
    progress: &dyn RestoreProgress,
) -> EngineResult<RestoreLog> {
    let manifest = reader.manifest().clone();
    let mut statements = reader.stream_statements()?;
    let extractor = TableExtractor::new()?;

    let mut log = RestoreLog {
        order: manifest.entity_types(),
        ..RestoreLog::default()
    };
    if options.selected.is_some() {
        let warning = RestoreLogEntry {
            entity_type: ALL_ENTITIES.to_string(),
            status: LogStatus::Warning,
            imported: 0,
            skipped: 0,
            failed: 0,
            message: "SQL archives cannot be restored selectively; every statement was executed".to_string(),
        };
        warn!("{}", warning.message);
        log.push(warning);
    }

    let mut failures: BTreeMap<String, u64> = BTreeMap::new();
    let mut executed = 0usize;
    while let Some(statement) = statements.next().await {
        let statement = statement?;
        executed += 1;
        if let Err(e) = ctx.datastore.exec_raw_statement(&statement).await {
            let entity_type = extractor.entity_type(&statement).unwrap_or(ALL_ENTITIES).to_string();
            warn!(statement = executed, entity_type = %entity_type, error = %e, "SQL statement failed");
            *failures.entry(entity_type).or_default() += 1;
        }
    }
    info!(statements = executed, failed = failures.values().sum::<u64>(), "SQL archive replayed");

    let total = manifest.entities.len();
    for (idx, archived) in manifest.entities.iter().enumerate() {
        progress.entity_started(&archived.entity_type, idx + 1, total).await;
        let failed = failures.remove(&archived.entity_type).unwrap_or(0);
        let entry = if failed == 0 {
            RestoreLogEntry {
                entity_type: archived.entity_type.clone(),
                status: LogStatus::Success,
                imported: archived.record_count,
                skipped: 0,
                failed: 0,
                message: format!("Executed statements for {} records", archived.record_count),
            }
        } else {
            RestoreLogEntry {
                entity_type: archived.entity_type.clone(),
                status: LogStatus::Partial,
                imported: 0,
                skipped: 0,
                failed,
                message: format!("{failed} statement(s) failed"),
            }
        };
        progress.entity_finished(&entry).await;
        log.push(entry);
    }

    for (entity_type, failed) in failures {
        log.push(RestoreLogEntry {
            entity_type,
            status: LogStatus::Partial,
            imported: 0,
            skipped: 0,
            failed,
            message: format!("{failed} statement(s) failed outside any archived entity section"),
        });
    }
    Ok(log)
}
