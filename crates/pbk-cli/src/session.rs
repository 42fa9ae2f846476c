//! Engine wiring for one CLI invocation
//!
//! The catalogue snapshot is loaded once, every command runs against it,
//! and commands that change it write it back.

use crate::error::{CliError, Result};
use pbk_engine::adapters::{JobStatusStore, MemoryCatalog, MemoryStatusStore, PgStatusStore, TokioExecutor};
use pbk_engine::jobs::JobOrchestrator;
use pbk_engine::{EngineConfig, EngineContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Session {
    path: PathBuf,
    catalog: Arc<MemoryCatalog>,
    jobs: JobOrchestrator,
}

impl Session {
    pub async fn open(path: &Path) -> Result<Self> {
        let config = EngineConfig::load().map_err(CliError::config)?;
        let catalog = Arc::new(MemoryCatalog::load(path).await.map_err(CliError::catalog)?);
        let status = status_store(&config).await?;

        let ctx = EngineContext::from_catalog(catalog.clone(), status, config);
        let executor = TokioExecutor::current().map_err(CliError::config)?;
        let jobs = JobOrchestrator::new(ctx, Arc::new(executor));
        debug!(catalog = %path.display(), "Session opened");

        Ok(Self {
            path: path.to_path_buf(),
            catalog,
            jobs,
        })
    }

    pub fn catalog(&self) -> &MemoryCatalog {
        &self.catalog
    }

    pub fn jobs(&self) -> &JobOrchestrator {
        &self.jobs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.jobs.context().config
    }

    /// Write the catalogue back to its snapshot file.
    pub async fn save(&self) -> Result<()> {
        self.catalog.save(&self.path).await.map_err(CliError::catalog)?;
        info!(catalog = %self.path.display(), "Catalogue saved");
        Ok(())
    }
}

async fn status_store(config: &EngineConfig) -> Result<Arc<dyn JobStatusStore>> {
    match &config.status_database_url {
        Some(url) => {
            let store = PgStatusStore::connect(url, 5).await.map_err(CliError::config)?;
            store.ensure_schema().await.map_err(CliError::config)?;
            Ok(Arc::new(store))
        },
        None => Ok(Arc::new(MemoryStatusStore::new())),
    }
}
