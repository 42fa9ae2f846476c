//! Schema-only export and import
//!
//! A schema archive is a zip holding `schemas.json` (every exported
//! definition) and a manifest whose export type is `schemas_only`. Import
//! creates absent types, updates existing custom types in place and leaves
//! standard types alone.

use crate::adapters::MetadataAdapter;
use crate::archive::{ArchiveFormat, ArchiveReader, ArchiveWriter, ExportType, Manifest, WriterOptions};
use crate::error::{EngineError, EngineResult};
use crate::model::SchemaDefinition;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaExport {
    pub path: PathBuf,
    pub manifest: Manifest,
    /// Requested types whose definition could not be read
    pub omitted: Vec<String>,
}

#[tracing::instrument(skip(meta, entity_types, path), fields(count = entity_types.len()))]
pub async fn export_schemas(
    meta: &dyn MetadataAdapter,
    entity_types: &[String],
    path: impl AsRef<Path>,
    created_by: &str,
) -> EngineResult<SchemaExport> {
    if entity_types.is_empty() {
        return Err(EngineError::configuration("no entity types selected"));
    }

    let mut definitions = Vec::new();
    let mut omitted = Vec::new();
    for entity_type in entity_types {
        match meta.get_definition(entity_type).await {
            Ok(Some(definition)) => definitions.push(definition),
            Ok(None) => {
                warn!(entity_type = %entity_type, "Unknown entity type, omitted from schema export");
                omitted.push(entity_type.clone());
            },
            Err(e) => {
                error!(entity_type = %entity_type, error = %e, "Failed to read definition");
                omitted.push(entity_type.clone());
            },
        }
    }

    let path = path.as_ref().to_path_buf();
    let options = WriterOptions::new(ArchiveFormat::Document, created_by).with_export_type(ExportType::SchemasOnly);
    let mut writer = ArchiveWriter::create(&path, options)?;
    writer.write_schemas(&definitions)?;
    let manifest = writer.finish()?;

    info!(exported = definitions.len(), omitted = omitted.len(), "Schemas exported");
    Ok(SchemaExport { path, manifest, omitted })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaPreview {
    pub entity_type: String,
    pub module: Option<String>,
    pub custom: bool,
    pub is_container: bool,
    pub exists: bool,
    /// "will update" or "will create"
    pub action: String,
}

pub async fn preview_schemas(meta: &dyn MetadataAdapter, reader: &mut ArchiveReader) -> EngineResult<Vec<SchemaPreview>> {
    let definitions = reader.read_schemas()?;
    let mut preview = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let exists = meta
            .get_definition(&definition.name)
            .await
            .map_err(|e| EngineError::metadata(&definition.name, e))?
            .is_some();
        preview.push(SchemaPreview {
            action: if exists { "will update" } else { "will create" }.to_string(),
            entity_type: definition.name,
            module: definition.module,
            custom: definition.custom,
            is_container: definition.is_container,
            exists,
        });
    }
    Ok(preview)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaImportStatus {
    Success,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaAction {
    Created,
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaImportEntry {
    pub entity_type: String,
    pub status: SchemaImportStatus,
    pub action: SchemaAction,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaImportSummary {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaImportReport {
    pub log: Vec<SchemaImportEntry>,
    pub summary: SchemaImportSummary,
}

async fn import_one(meta: &dyn MetadataAdapter, mut definition: SchemaDefinition) -> SchemaImportEntry {
    let name = definition.name.clone();
    definition.strip_audit_properties();

    let entry = |status, action, message: String| SchemaImportEntry {
        entity_type: name.clone(),
        status,
        action,
        message,
    };

    let existing = match meta.get_definition(&name).await {
        Ok(existing) => existing,
        Err(e) => return entry(SchemaImportStatus::Error, SchemaAction::Failed, format!("Error: {e}")),
    };

    match existing {
        Some(current) if current.custom => match meta.update_definition(&definition).await {
            Ok(()) => entry(
                SchemaImportStatus::Success,
                SchemaAction::Updated,
                format!("Entity type '{name}' updated"),
            ),
            Err(e) => entry(SchemaImportStatus::Error, SchemaAction::Failed, format!("Error: {e}")),
        },
        Some(_) => entry(
            SchemaImportStatus::Skipped,
            SchemaAction::Skipped,
            format!("Skipped standard entity type '{name}'"),
        ),
        None => match meta.create_definition(&definition).await {
            Ok(()) => entry(
                SchemaImportStatus::Success,
                SchemaAction::Created,
                format!("Entity type '{name}' created"),
            ),
            Err(e) => entry(SchemaImportStatus::Error, SchemaAction::Failed, format!("Error: {e}")),
        },
    }
}

/// Apply archived definitions. One type failing never stops the others.
#[tracing::instrument(skip_all)]
pub async fn import_schemas(
    meta: &dyn MetadataAdapter,
    reader: &mut ArchiveReader,
    selected: Option<&[String]>,
) -> EngineResult<SchemaImportReport> {
    let definitions: Vec<SchemaDefinition> = reader
        .read_schemas()?
        .into_iter()
        .filter(|d| selected.is_none_or(|s| s.contains(&d.name)))
        .collect();

    let mut report = SchemaImportReport::default();
    report.summary.total = definitions.len();
    for definition in definitions {
        let entry = import_one(meta, definition).await;
        match entry.status {
            SchemaImportStatus::Success => report.summary.success += 1,
            SchemaImportStatus::Skipped => report.summary.skipped += 1,
            SchemaImportStatus::Error => {
                error!(entity_type = %entry.entity_type, message = %entry.message, "Schema import failed");
                report.summary.errors += 1;
            },
        }
        report.log.push(entry);
    }

    info!(
        total = report.summary.total,
        success = report.summary.success,
        skipped = report.summary.skipped,
        errors = report.summary.errors,
        "Schemas imported"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapters::MemoryCatalog;
    use crate::model::{FieldDescriptor, FieldKind};
    use tempfile::TempDir;

    async fn source() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog
            .add_definition(
                SchemaDefinition::new("Project Note")
                    .custom()
                    .with_module("Projects")
                    .with_field(FieldDescriptor::new("body", FieldKind::Text)),
            )
            .await;
        catalog.add_definition(SchemaDefinition::new("Customer").with_module("Selling")).await;
        catalog.add_definition(SchemaDefinition::new("Broken").custom()).await;
        catalog
    }

    #[tokio::test]
    async fn test_export_requires_a_selection() {
        let dir = TempDir::new().unwrap();
        let err = export_schemas(&source().await, &[], dir.path().join("s.zip"), "admin")
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_import_creates_updates_and_skips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schemas.zip");
        let types: Vec<String> = ["Project Note", "Customer", "Broken", "Ghost"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let export = export_schemas(&source().await, &types, &path, "admin").await.unwrap();
        assert_eq!(export.omitted, vec!["Ghost".to_string()]);
        assert_eq!(export.manifest.export_type, ExportType::SchemasOnly);

        let target = MemoryCatalog::new();
        target.add_definition(SchemaDefinition::new("Project Note").custom()).await;
        target.add_definition(SchemaDefinition::new("Customer")).await;
        target.fail_definition_create("Broken").await;

        let mut reader = ArchiveReader::open(&path).unwrap();
        let preview = preview_schemas(&target, &mut reader).await.unwrap();
        assert_eq!(preview.iter().filter(|p| p.action == "will create").count(), 1);

        let report = import_schemas(&target, &mut reader, None).await.unwrap();
        assert_eq!(
            report.summary,
            SchemaImportSummary {
                total: 3,
                success: 1,
                errors: 1,
                skipped: 1,
            }
        );
        let updated = target.get_definition("Project Note").await.unwrap().unwrap();
        assert_eq!(updated.fields.len(), 1);
        assert_eq!(updated.module.as_deref(), Some("Projects"));
    }
}
