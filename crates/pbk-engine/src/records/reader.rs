//! Lazy, batched record reads
//!
//! Identifiers are listed once up front; full records are then fetched one
//! batch at a time so peak memory tracks the batch size, not the table size.

use crate::adapters::Datastore;
use crate::error::{EngineError, EngineResult};
use crate::model::Record;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub batch_size: usize,
    /// Single-instance type: at most one record, named after the type
    pub is_container: bool,
}

struct Cursor<'a> {
    store: &'a dyn Datastore,
    entity_type: &'a str,
    ids: Vec<String>,
    next: usize,
    batch_size: usize,
    buffered: VecDeque<Record>,
}

impl<'a> Cursor<'a> {
    async fn fill(&mut self) {
        while self.buffered.is_empty() && self.next < self.ids.len() {
            let end = (self.next + self.batch_size).min(self.ids.len());
            for id in &self.ids[self.next..end] {
                match self.store.read_record(self.entity_type, id).await {
                    Ok(record) => self.buffered.push_back(record),
                    Err(e) => warn!(
                        entity_type = %self.entity_type,
                        record = %id,
                        error = %e,
                        "Failed to read record, skipping"
                    ),
                }
            }
            debug!(entity_type = %self.entity_type, batch_start = self.next, batch_end = end, "Batch read");
            self.next = end;
        }
    }
}

/// Stream every record of `entity_type`.
///
/// Listing identifiers is the only failure surfaced here; it is a per-entity
/// error. Single unreadable records are logged and skipped. The stream is
/// finite and not restartable; call again to re-read.
pub async fn stream_records<'a>(
    store: &'a dyn Datastore,
    entity_type: &'a str,
    options: ReadOptions,
) -> EngineResult<BoxStream<'a, Record>> {
    let ids = if options.is_container {
        let exists = store
            .exists(entity_type, entity_type)
            .await
            .map_err(|e| EngineError::datastore(entity_type, e))?;
        if exists {
            vec![entity_type.to_string()]
        } else {
            Vec::new()
        }
    } else {
        store
            .list_identifiers(entity_type)
            .await
            .map_err(|e| EngineError::datastore(entity_type, e))?
    };

    let cursor = Cursor {
        store,
        entity_type,
        ids,
        next: 0,
        batch_size: options.batch_size.max(1),
        buffered: VecDeque::new(),
    };

    Ok(stream::unfold(cursor, |mut cursor| async move {
        cursor.fill().await;
        cursor.buffered.pop_front().map(|record| (record, cursor))
    })
    .boxed())
}
