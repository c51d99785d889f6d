//! TTL Cleanup Task
//!
//! Background task that periodically sweeps expired entries out of the
//! in-process store. A remote store expires entries itself.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::MemoryBackend;

/// Spawns a background task that periodically purges expired entries.
///
/// Returns a JoinHandle that can be used to abort the task during
/// graceful shutdown.
///
/// # Example
/// ```ignore
/// let backend = MemoryBackend::new(10_000);
/// let cleanup_handle = spawn_cleanup_task(backend.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(backend: MemoryBackend, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Starting TTL cleanup task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = backend.purge_expired().await;
            if removed > 0 {
                info!(removed, "TTL cleanup removed expired entries");
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreBackend;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let backend = MemoryBackend::new(100);
        backend
            .set("default:expire_soon", "1", Some(Duration::from_millis(200)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(backend.clone(), 1);

        // Wait for entry to expire and cleanup to run
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(backend.len().await, 0, "Expired entry should have been purged");
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let backend = MemoryBackend::new(100);
        backend
            .set("default:long_lived", "1", Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        backend.set("default:forever", "2", None).await.unwrap();

        let handle = spawn_cleanup_task(backend.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(backend.len().await, 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(MemoryBackend::new(10), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
