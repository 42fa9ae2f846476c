//! Artifact placement and hand-off
//!
//! Every artifact lands in `<root>/<job-id>/<file>`. Small ones are inlined
//! into the job result; larger ones get a one-time download token whose
//! redemption deletes the file.

use super::types::ArtifactDelivery;
use crate::adapters::JobStatusStore;
use crate::error::{EngineError, EngineResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbk_common::checksum::sha256_reader;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

fn download_key(token: &str) -> String {
    format!("pbk:download:{token}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadTicket {
    path: PathBuf,
    file_name: String,
    #[serde(default)]
    consumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredArtifact {
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub delivery: ArtifactDelivery,
}

#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    inline_limit: u64,
    status: Arc<dyn JobStatusStore>,
    ttl: Duration,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, inline_limit: u64, status: Arc<dyn JobStatusStore>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            inline_limit,
            status,
            ttl,
        }
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    pub fn artifact_path(&self, job_id: Uuid, file_name: &str) -> PathBuf {
        self.job_dir(job_id).join(file_name)
    }

    /// Checksum the artifact and decide how it reaches the caller.
    pub async fn deliver(&self, path: &Path) -> EngineResult<DeliveredArtifact> {
        let size_bytes = tokio::fs::metadata(path).await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let hash_path = path.to_path_buf();
        let sha256 = tokio::task::spawn_blocking(move || -> EngineResult<String> {
            let mut file = std::fs::File::open(hash_path)?;
            Ok(sha256_reader(&mut file)?)
        })
        .await
        .map_err(|e| EngineError::Job(format!("checksum task panicked: {e}")))??;

        let delivery = if size_bytes <= self.inline_limit {
            let bytes = tokio::fs::read(path).await?;
            ArtifactDelivery::Inline {
                content_base64: STANDARD.encode(bytes),
            }
        } else {
            let token = Uuid::new_v4().simple().to_string();
            let ticket = DownloadTicket {
                path: path.to_path_buf(),
                file_name: file_name.clone(),
                consumed: false,
            };
            self.status
                .set(&download_key(&token), serde_json::to_value(&ticket)?, self.ttl)
                .await
                .map_err(EngineError::status_store)?;
            ArtifactDelivery::Download { token }
        };

        info!(
            file = %file_name,
            size_bytes,
            inline = matches!(delivery, ArtifactDelivery::Inline { .. }),
            "Artifact ready"
        );
        Ok(DeliveredArtifact {
            file_name,
            size_bytes,
            sha256,
            delivery,
        })
    }

    /// Redeem a download token: returns the file name and bytes, then
    /// deletes the file. A second redemption fails.
    pub async fn take_download(&self, token: &str) -> EngineResult<(String, Vec<u8>)> {
        let key = download_key(token);
        let value = self
            .status
            .get(&key)
            .await
            .map_err(EngineError::status_store)?
            .ok_or(EngineError::DownloadUnavailable)?;
        let mut ticket: DownloadTicket = serde_json::from_value(value)?;
        if ticket.consumed {
            return Err(EngineError::DownloadUnavailable);
        }

        let bytes = match tokio::fs::read(&ticket.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(EngineError::DownloadUnavailable),
            Err(e) => return Err(e.into()),
        };

        ticket.consumed = true;
        self.status
            .set(&key, serde_json::to_value(&ticket)?, self.ttl)
            .await
            .map_err(EngineError::status_store)?;
        if let Err(e) = tokio::fs::remove_file(&ticket.path).await {
            warn!(path = %ticket.path.display(), error = %e, "Failed to delete downloaded artifact");
        }
        Ok((ticket.file_name, bytes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStatusStore;
    use pbk_common::checksum::sha256_hex;
    use tempfile::TempDir;

    fn store(dir: &TempDir, inline_limit: u64) -> ArtifactStore {
        ArtifactStore::new(
            dir.path(),
            inline_limit,
            Arc::new(MemoryStatusStore::new()),
            Duration::from_secs(60),
        )
    }

    async fn write(store: &ArtifactStore, job: Uuid, bytes: &[u8]) -> PathBuf {
        let path = store.artifact_path(job, "backup.zip");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_small_artifact_is_inlined() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 16);
        let path = write(&store, Uuid::new_v4(), b"tiny").await;

        let delivered = store.deliver(&path).await.unwrap();
        assert_eq!(delivered.size_bytes, 4);
        assert_eq!(delivered.sha256, sha256_hex(b"tiny"));
        assert_eq!(
            delivered.delivery,
            ArtifactDelivery::Inline {
                content_base64: STANDARD.encode(b"tiny")
            }
        );
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_large_artifact_downloads_once() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 4);
        let path = write(&store, Uuid::new_v4(), b"larger than four").await;

        let ArtifactDelivery::Download { token } = store.deliver(&path).await.unwrap().delivery else {
            panic!("expected a download token");
        };

        let (name, bytes) = store.take_download(&token).await.unwrap();
        assert_eq!(name, "backup.zip");
        assert_eq!(bytes, b"larger than four");
        assert!(!path.exists());
        assert!(matches!(
            store.take_download(&token).await,
            Err(EngineError::DownloadUnavailable)
        ));
        assert!(matches!(
            store.take_download("unknown").await,
            Err(EngineError::DownloadUnavailable)
        ));
    }
}
