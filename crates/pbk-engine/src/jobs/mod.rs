//! Asynchronous export and import jobs
//!
//! ```text
//! submit_*  ──► queued ──(executor picks up)──► running ──► completed
//!                                                   └──────► failed
//! ```
//!
//! Job records live under `pbk:job:<id>` and the per-entity table under
//! `pbk:job:<id>:entities` in the job status store.

pub mod artifacts;
pub mod export;
pub mod import;
pub mod orchestrator;
pub mod tracker;
pub mod types;

pub use artifacts::{ArtifactStore, DeliveredArtifact};
pub use orchestrator::JobOrchestrator;
pub use tracker::{entities_key, job_key, EntityUpdate, JobHandle, JobTracker};
pub use types::{
    ArtifactDelivery, EntityState, EntityStatus, ExportRequest, ExportResult, ImportRequest, ImportResult, Job,
    JobKind, JobResult, JobStatus,
};
