//! Skip-if-exists record writes

use crate::adapters::Datastore;
use crate::model::Record;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use tracing::{debug, warn};

/// Conflict handling on restore. Existing destination rows are never
/// touched; there is no update path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    #[default]
    SkipIfExists,
}

/// Outcome counters for one entity type's writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl WriteStats {
    pub fn inc_imported(&mut self) {
        self.imported += 1;
    }

    pub fn inc_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn inc_failed(&mut self) {
        self.failed += 1;
    }

    pub fn total(&self) -> u64 {
        self.imported + self.skipped + self.failed
    }
}

impl AddAssign for WriteStats {
    fn add_assign(&mut self, other: Self) {
        self.imported += other.imported;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Write `records` under `policy`. Per-record failures are logged and
/// counted; they never abort the remaining records.
pub async fn apply_records<I>(store: &dyn Datastore, records: I, policy: MergePolicy) -> WriteStats
where
    I: IntoIterator<Item = Record>,
{
    let MergePolicy::SkipIfExists = policy;
    let mut stats = WriteStats::default();

    for mut record in records {
        if let Some(name) = record.name() {
            match store.exists(&record.entity_type, name).await {
                Ok(true) => {
                    debug!(entity_type = %record.entity_type, record = %name, "Record exists, skipping");
                    stats.inc_skipped();
                    continue;
                },
                Ok(false) => {},
                Err(e) => {
                    warn!(entity_type = %record.entity_type, record = %name, error = %e, "Existence check failed");
                    stats.inc_failed();
                    continue;
                },
            }
        }

        record.strip_audit_fields();
        match store.insert_record(&record).await {
            Ok(()) => stats.inc_imported(),
            Err(e) => {
                warn!(
                    entity_type = %record.entity_type,
                    record = record.name().unwrap_or("<unnamed>"),
                    error = %e,
                    "Failed to insert record"
                );
                stats.inc_failed();
            },
        }
    }

    stats
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapters::MemoryCatalog;
    use crate::model::{SchemaDefinition, Value};

    fn rows() -> Vec<Record> {
        vec![
            Record::from_pairs("Note", [("name", "N1"), ("title", "a"), ("owner", "x@src")]),
            Record::from_pairs("Note", [("name", "N2"), ("title", "b"), ("modified", "2024-01-01")]),
        ]
    }

    async fn empty_catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.add_definition(SchemaDefinition::new("Note")).await;
        catalog
    }

    #[tokio::test]
    async fn test_insert_then_skip_on_second_pass() {
        let catalog = empty_catalog().await;

        let first = apply_records(&catalog, rows(), MergePolicy::SkipIfExists).await;
        assert_eq!(first, WriteStats { imported: 2, skipped: 0, failed: 0 });

        let second = apply_records(&catalog, rows(), MergePolicy::SkipIfExists).await;
        assert_eq!(second, WriteStats { imported: 0, skipped: 2, failed: 0 });
        assert_eq!(catalog.record_count("Note").await, 2);
    }

    #[tokio::test]
    async fn test_audit_fields_are_stripped() {
        let catalog = empty_catalog().await;
        apply_records(&catalog, rows(), MergePolicy::SkipIfExists).await;

        let stored = catalog.read_record("Note", "N1").await.unwrap();
        assert!(stored.get("owner").is_none());
        assert_eq!(stored.get("title"), Some(&Value::from("a")));
    }

    #[tokio::test]
    async fn test_failed_insert_does_not_stop_batch() {
        let catalog = empty_catalog().await;
        catalog.fail_insert_of("Note", "N1").await;

        let stats = apply_records(&catalog, rows(), MergePolicy::SkipIfExists).await;
        assert_eq!(stats, WriteStats { imported: 1, skipped: 0, failed: 1 });
        assert!(catalog.exists("Note", "N2").await.unwrap());
    }

    #[test]
    fn test_stats_add_assign() {
        let mut total = WriteStats { imported: 1, skipped: 2, failed: 0 };
        total += WriteStats { imported: 3, skipped: 0, failed: 1 };
        assert_eq!(total.total(), 7);
    }
}
