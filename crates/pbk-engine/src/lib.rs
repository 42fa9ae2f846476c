//! PBK Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Dependency-aware partial export and restore of entity types.
//!
//! # Overview
//!
//! - **Dependencies**: link-field graph exploration, summaries and a stable
//!   topological order with cycle fallback ([`dependencies`])
//! - **Records**: batched reads from and skip-if-exists writes into the
//!   datastore ([`records`])
//! - **Transforms**: field value substitution and table renaming
//!   ([`transform`])
//! - **Archives**: document, tabular and SQL artifacts with a manifest and
//!   optional attachment bundle ([`archive`])
//! - **Jobs**: asynchronous export/import jobs with per-entity status in a
//!   TTL'd store ([`jobs`])
//! - **Restore**: dependency-ordered replay of an archive ([`restore`])
//!
//! Plus schema-only transfer, recurring schedules and catalogue listing.
//!
//! All external systems sit behind the traits in [`adapters`]; the
//! in-memory [`MemoryCatalog`](adapters::MemoryCatalog) implements them for
//! tests and for the snapshot-driven CLI.
//!
//! # Example
//!
//! ```no_run
//! use pbk_engine::adapters::{MemoryCatalog, MemoryStatusStore, TokioExecutor};
//! use pbk_engine::archive::ArchiveFormat;
//! use pbk_engine::jobs::{ExportRequest, JobOrchestrator};
//! use pbk_engine::{EngineConfig, EngineContext};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let catalog = Arc::new(MemoryCatalog::load("catalog.json").await?);
//! let ctx = EngineContext::from_catalog(catalog, Arc::new(MemoryStatusStore::new()), EngineConfig::load()?);
//! let jobs = JobOrchestrator::new(ctx, Arc::new(TokioExecutor::current()?));
//!
//! let request = ExportRequest::new(vec!["Sales Invoice".into()], ArchiveFormat::Document, "ops");
//! let id = jobs.submit_export(request).await?;
//! let job = jobs.wait_for_terminal(id, Duration::from_millis(200), Duration::from_secs(60)).await?;
//! println!("{:?}", job.status);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod context;
pub mod dependencies;
pub mod error;
pub mod jobs;
pub mod model;
pub mod records;
pub mod restore;
pub mod schedule;
pub mod schema_transfer;
pub mod transform;

pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
