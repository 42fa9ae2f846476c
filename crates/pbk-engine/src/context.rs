//! Collaborators shared by every engine operation

use crate::adapters::{Datastore, FileStore, JobStatusStore, MetadataAdapter};
use crate::config::EngineConfig;
use std::sync::Arc;

#[derive(Clone)]
pub struct EngineContext {
    pub metadata: Arc<dyn MetadataAdapter>,
    pub datastore: Arc<dyn Datastore>,
    pub files: Arc<dyn FileStore>,
    pub status: Arc<dyn JobStatusStore>,
    pub config: Arc<EngineConfig>,
}

impl EngineContext {
    pub fn new(
        metadata: Arc<dyn MetadataAdapter>,
        datastore: Arc<dyn Datastore>,
        files: Arc<dyn FileStore>,
        status: Arc<dyn JobStatusStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            metadata,
            datastore,
            files,
            status,
            config: Arc::new(config),
        }
    }

    /// Context over one value serving metadata, rows and files, such as
    /// [`MemoryCatalog`](crate::adapters::MemoryCatalog).
    pub fn from_catalog<C>(catalog: Arc<C>, status: Arc<dyn JobStatusStore>, config: EngineConfig) -> Self
    where
        C: MetadataAdapter + Datastore + FileStore + 'static,
    {
        Self::new(catalog.clone(), catalog.clone(), catalog, status, config)
    }
}
