//! Archive inspection without restoring anything

use super::{ArchiveFormat, ArchiveReader, ExportType, Manifest};
use crate::error::EngineResult;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCount {
    pub entity_type: String,
    pub record_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    /// `document`, `tabular`, `sql` or `schema`
    pub file_type: String,
    pub is_zip: bool,
    pub format: ArchiveFormat,
    pub manifest: Manifest,
    pub entities: Vec<EntityCount>,
}

impl ArchiveSummary {
    fn from_reader(reader: &ArchiveReader) -> Self {
        let manifest = reader.manifest().clone();
        let entities = manifest
            .entities
            .iter()
            .map(|e| EntityCount {
                entity_type: e.entity_type.clone(),
                record_count: e.record_count,
            })
            .collect();
        Self {
            file_type: match manifest.export_type {
                ExportType::SchemasOnly => "schema".to_string(),
                ExportType::Data => manifest.format.to_string(),
            },
            is_zip: reader.is_zip(),
            format: reader.format(),
            manifest,
            entities,
        }
    }
}

/// Read an archive's manifest and per-entity counts.
pub fn parse_archive(path: impl AsRef<Path>) -> EngineResult<ArchiveSummary> {
    let reader = ArchiveReader::open(path)?;
    Ok(ArchiveSummary::from_reader(&reader))
}

pub fn parse_archive_bytes(bytes: Vec<u8>) -> EngineResult<ArchiveSummary> {
    let reader = ArchiveReader::from_bytes(bytes)?;
    Ok(ArchiveSummary::from_reader(&reader))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_text_summary() {
        let text = "-- Partial backup SQL archive\n-- Created by: ops\n-- Entity: Customer\nINSERT INTO `tabCustomer` (`name`) VALUES\n('C-1');\n-- Records exported: 1\n";
        let summary = parse_archive_bytes(text.as_bytes().to_vec()).unwrap();

        assert_eq!(summary.file_type, "sql");
        assert!(!summary.is_zip);
        assert_eq!(summary.format, ArchiveFormat::Sql);
        assert_eq!(summary.manifest.created_by, "ops");
        assert_eq!(
            summary.entities,
            vec![EntityCount {
                entity_type: "Customer".into(),
                record_count: 1
            }]
        );
    }

    #[test]
    fn test_garbage_is_an_archive_error() {
        assert!(parse_archive_bytes(vec![0xff, 0xfe, 0x00]).is_err());
    }
}
