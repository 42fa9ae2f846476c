//! Tokio-backed task executor

use super::{TaskExecutor, TaskFuture};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

/// Spawns each task on a Tokio runtime under a hard timeout. The join handle
/// is dropped; callers observe progress through the job status store only.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime the caller is running on.
    pub fn current() -> anyhow::Result<Self> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl TaskExecutor for TokioExecutor {
    fn enqueue(&self, name: &str, task: TaskFuture, timeout: Duration) {
        let name = name.to_string();
        info!(task = %name, timeout_secs = timeout.as_secs(), "Task enqueued");

        self.handle.spawn(async move {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => info!(task = %name, "Task finished"),
                Ok(Err(e)) => error!(task = %name, error = %e, "Task failed"),
                Err(_) => warn!(task = %name, "Task exceeded executor timeout and was dropped"),
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_enqueue_runs_task() {
        let executor = TokioExecutor::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        executor.enqueue(
            "ping",
            Box::pin(async move {
                let _ = tx.send(42);
                Ok(())
            }),
            Duration::from_secs(5),
        );

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_task() {
        let executor = TokioExecutor::current().unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        executor.enqueue(
            "slow",
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
            Duration::from_secs(1),
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
