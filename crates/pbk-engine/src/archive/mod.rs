//! Portable archive formats
//!
//! Three encodings share one manifest model:
//!
//! | Format   | Container | Per entity                                 |
//! |----------|-----------|--------------------------------------------|
//! | document | zip       | `entities/NNN_<type>.json`, schema + rows  |
//! | tabular  | zip       | `schemas/NNN_<type>.json` + `data/NNN_<type>.csv` |
//! | sql      | plain `.sql` (zip when files are bundled) | DROP/CREATE + batched INSERTs |
//!
//! Zip archives carry `manifest.json`; plain SQL archives carry the same
//! facts in header comments. Bundled attachments live under `files/`.

pub mod files;
pub mod parse;
pub mod reader;
pub mod sql;
pub mod tabular;
pub mod writer;

use crate::error::EngineError;
use crate::model::{FieldMap, SchemaDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use files::{bundle_files, restore_files, FileCollector, FileRestoreStats};
pub use parse::{parse_archive, parse_archive_bytes, ArchiveSummary, EntityCount};
pub use reader::{ArchiveReader, ArchiveStream, SectionEvent};
pub use writer::{ArchiveWriter, WriterOptions};

pub const MANIFEST_MEMBER: &str = "manifest.json";
pub const SQL_MEMBER: &str = "backup.sql";
pub const SCHEMAS_MEMBER: &str = "schemas.json";
pub const ARCHIVE_VERSION: u32 = 1;

/// Version string stamped into every archive.
pub fn engine_version() -> String {
    format!("pbk-engine {}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    #[serde(alias = "json")]
    Document,
    Sql,
    #[serde(alias = "csv")]
    Tabular,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Document => "document",
            ArchiveFormat::Sql => "sql",
            ArchiveFormat::Tabular => "tabular",
        }
    }

    /// Whether the artifact is a zip container.
    pub fn is_zip(&self, include_files: bool) -> bool {
        !matches!(self, ArchiveFormat::Sql) || include_files
    }

    pub fn extension(&self, include_files: bool) -> &'static str {
        if self.is_zip(include_files) {
            "zip"
        } else {
            "sql"
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" | "json" => Ok(ArchiveFormat::Document),
            "sql" => Ok(ArchiveFormat::Sql),
            "tabular" | "csv" => Ok(ArchiveFormat::Tabular),
            other => Err(EngineError::configuration(format!(
                "unknown archive format '{other}' (expected document, sql or tabular)"
            ))),
        }
    }
}

/// What the archive holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    #[default]
    Data,
    SchemasOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub entity_type: String,
    pub record_count: u64,
    /// Archive member(s) holding this entity; empty for plain SQL
    #[serde(default)]
    pub members: Vec<String>,
    /// SHA-256 of the last member, the one holding the rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Link targets declared by the archived definition
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Path at the source, restored verbatim
    pub path: String,
    pub member: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub archive_version: u32,
    #[serde(default)]
    pub export_type: ExportType,
    pub format: ArchiveFormat,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub entities: Vec<ManifestEntry>,
    pub total_records: u64,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn new(format: ArchiveFormat, export_type: ExportType, created_by: impl Into<String>) -> Self {
        Self {
            archive_version: ARCHIVE_VERSION,
            export_type,
            format,
            created_by: created_by.into(),
            created_at: Utc::now(),
            engine_version: engine_version(),
            entities: Vec::new(),
            total_records: 0,
            files: Vec::new(),
        }
    }

    pub fn entity_types(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.entity_type.clone()).collect()
    }

    pub fn entry(&self, entity_type: &str) -> Option<&ManifestEntry> {
        self.entities.iter().find(|e| e.entity_type == entity_type)
    }
}

/// One entity's schema and rows as read back from an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySection {
    pub entity_type: String,
    #[serde(default)]
    pub definition: Option<SchemaDefinition>,
    #[serde(default)]
    pub records: Vec<FieldMap>,
    #[serde(default)]
    pub record_count: u64,
}

/// Member-name-safe form of an entity type, prefixed with its position so
/// names that sanitize alike stay distinct.
pub(crate) fn member_stem(index: usize, entity_type: &str) -> String {
    let slug: String = entity_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{index:03}_{slug}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing_accepts_legacy_names() {
        assert_eq!("json".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Document);
        assert_eq!("CSV".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Tabular);
        assert!("xml".parse::<ArchiveFormat>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_sql_is_plain_unless_files_bundled() {
        assert_eq!(ArchiveFormat::Sql.extension(false), "sql");
        assert_eq!(ArchiveFormat::Sql.extension(true), "zip");
        assert_eq!(ArchiveFormat::Tabular.extension(false), "zip");
    }

    #[test]
    fn test_member_stem_is_unique_per_position() {
        assert_eq!(member_stem(0, "Sales Invoice"), "000_Sales_Invoice");
        assert_ne!(member_stem(1, "Sales_Invoice"), member_stem(0, "Sales Invoice"));
    }
}
