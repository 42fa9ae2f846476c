//! Attachment bundling
//!
//! Paths come from two places: the datastore's attachment registry for each
//! exported record, and attach-kind fields on the record itself. Both are
//! deduplicated across the whole export.

use super::{ArchiveReader, ArchiveWriter};
use crate::adapters::{Datastore, FileStore};
use crate::error::EngineResult;
use crate::model::{Record, SchemaDefinition, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct FileCollector {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl FileCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, path: &str) -> bool {
        let path = path.trim();
        if path.is_empty() || !self.seen.insert(path.to_string()) {
            return false;
        }
        self.paths.push(path.to_string());
        true
    }

    /// Gather the attachment paths of one record. Returns how many were new.
    pub async fn collect(&mut self, store: &dyn Datastore, definition: &SchemaDefinition, record: &Record) -> usize {
        let mut added = 0;

        for field in definition.fields.iter().filter(|f| f.kind.is_attachment()) {
            if let Some(Value::Text(path)) = record.get(&field.name) {
                added += usize::from(self.push(path));
            }
        }

        if let Some(name) = record.name() {
            match store.attachments_for(&record.entity_type, name).await {
                Ok(paths) => {
                    for path in &paths {
                        added += usize::from(self.push(path));
                    }
                },
                Err(e) => warn!(
                    entity_type = %record.entity_type,
                    record = %name,
                    error = %e,
                    "Attachment lookup failed"
                ),
            }
        }
        added
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Copy every collected file into the archive. Unreadable files are logged
/// and left out; the export carries on without them.
pub async fn bundle_files(
    writer: &mut ArchiveWriter,
    files: &dyn FileStore,
    collector: &FileCollector,
) -> EngineResult<usize> {
    let mut bundled = 0;
    for path in collector.paths() {
        let content = match files.read_file(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path, error = %e, "Attachment unreadable, not bundled");
                continue;
            },
        };
        if writer.add_file(path, &content)? {
            bundled += 1;
        }
    }
    info!(collected = collector.len(), bundled, "Attachments bundled");
    Ok(bundled)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRestoreStats {
    pub restored: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Write bundled files back to their original paths. A file that already
/// exists at the destination is left alone.
pub async fn restore_files(reader: &mut ArchiveReader, files: &dyn FileStore) -> FileRestoreStats {
    let mut stats = FileRestoreStats::default();
    let entries = reader.manifest().files.clone();

    for entry in &entries {
        match files.file_exists(&entry.path).await {
            Ok(true) => {
                debug!(path = %entry.path, "File exists, skipping");
                stats.skipped += 1;
                continue;
            },
            Ok(false) => {},
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Existence check failed");
                stats.failed += 1;
                continue;
            },
        }

        let content = match reader.read_file_member(entry) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Bundled file unreadable");
                stats.failed += 1;
                continue;
            },
        };
        match files.write_file(&entry.path, &content).await {
            Ok(()) => stats.restored += 1,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Failed to write file");
                stats.failed += 1;
            },
        }
    }

    if !entries.is_empty() {
        info!(restored = stats.restored, skipped = stats.skipped, failed = stats.failed, "Files restored");
    }
    stats
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapters::MemoryCatalog;
    use crate::archive::{ArchiveFormat, WriterOptions};
    use crate::model::{FieldDescriptor, FieldKind};
    use tempfile::TempDir;

    async fn source() -> (MemoryCatalog, SchemaDefinition) {
        let definition = SchemaDefinition::new("Employee").with_field(FieldDescriptor::new("photo", FieldKind::AttachImage));
        let catalog = MemoryCatalog::new();
        catalog.add_definition(definition.clone()).await;
        catalog.add_attachment("Employee", "E-1", "/private/files/contract.pdf").await;
        catalog.add_file("/files/e1.png", b"png".to_vec()).await;
        catalog.add_file("/private/files/contract.pdf", b"pdf".to_vec()).await;
        (catalog, definition)
    }

    #[tokio::test]
    async fn test_collects_fields_and_registry_once() {
        let (catalog, definition) = source().await;
        let record = Record::from_pairs("Employee", [("name", "E-1"), ("photo", "/files/e1.png")]);
        let mut collector = FileCollector::new();

        assert_eq!(collector.collect(&catalog, &definition, &record).await, 2);
        assert_eq!(collector.collect(&catalog, &definition, &record).await, 0);
        assert_eq!(collector.paths(), ["/files/e1.png", "/private/files/contract.pdf"]);
    }

    #[tokio::test]
    async fn test_restore_skips_existing_files() {
        let (catalog, definition) = source().await;
        let record = Record::from_pairs("Employee", [("name", "E-1"), ("photo", "/files/e1.png")]);
        let mut collector = FileCollector::new();
        collector.collect(&catalog, &definition, &record).await;
        collector.push("/files/missing.txt");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        let mut writer =
            ArchiveWriter::create(&path, WriterOptions::new(ArchiveFormat::Document, "admin").with_files(true)).unwrap();
        assert_eq!(bundle_files(&mut writer, &catalog, &collector).await.unwrap(), 2);
        writer.finish().unwrap();

        let target = MemoryCatalog::new();
        target.add_file("/files/e1.png", b"already here".to_vec()).await;
        let mut reader = ArchiveReader::open(&path).unwrap();
        let stats = restore_files(&mut reader, &target).await;

        assert_eq!(stats, FileRestoreStats { restored: 1, skipped: 1, failed: 0 });
        assert_eq!(target.read_file("/files/e1.png").await.unwrap(), b"already here");
        assert_eq!(target.read_file("/private/files/contract.pdf").await.unwrap(), b"pdf");
    }
}
