//! Per-key distributed locks, leased through the shared store.
//!
//! The lease carries a TTL so a crashed holder cannot block later
//! acquirers forever; after expiry the lease is considered abandoned and
//! the next `acquire` reclaims it. Release is compare-and-delete on a
//! random token, so a holder whose lease already expired and was reclaimed
//! never deletes the new holder's lease.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::error::TaskError;
use crate::store::KvStore;

/// How often a blocked acquirer re-polls the lease.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Scoped per-key mutual exclusion over the shared store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    acquire_timeout: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, acquire_timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            acquire_timeout,
        }
    }

    /// Run `body` while holding the lease for `name`.
    ///
    /// Blocks until the lease is granted or `acquire_timeout` elapses
    /// ([`TaskError::LockTimeout`]). The lease is released on every exit
    /// path of `body`, including `Err`; if the process dies mid-body, the
    /// TTL reclaims the lease instead.
    pub async fn with_lock<T>(
        &self,
        name: &str,
        body: impl Future<Output = Result<T, TaskError>>,
    ) -> Result<T, TaskError> {
        let key = format!("lock:{name}");
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        loop {
            if self.store.acquire(&key, &token, self.ttl).await? {
                break;
            }
            if started.elapsed() >= self.acquire_timeout {
                return Err(TaskError::LockTimeout {
                    key,
                    waited: self.acquire_timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let result = body.await;

        if let Err(e) = self.store.release(&key, &token).await {
            // The lease TTL will reclaim it; the next acquirer just waits.
            warn!(key, error = %e, "Failed to release lock");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(ttl_ms: u64, timeout_ms: u64) -> LockManager {
        LockManager::new(
            Arc::new(MemoryStore::new()),
            Duration::from_millis(ttl_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn body_runs_and_lock_is_reusable() {
        let lock = manager(5000, 1000);
        let value = lock
            .with_lock("task:1", async { Ok::<_, TaskError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        // Released: a second acquisition succeeds immediately.
        lock.with_lock("task:1", async { Ok::<_, TaskError>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn released_on_error_path() {
        let lock = manager(5000, 1000);
        let err = lock
            .with_lock("task:1", async {
                Err::<(), _>(TaskError::Validation("boom".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        lock.with_lock("task:1", async { Ok::<_, TaskError>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn contended_acquire_times_out() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        // Foreign holder that never releases.
        store
            .acquire("lock:task:1", "other", Duration::from_secs(60))
            .await
            .unwrap();
        let lock = LockManager::new(
            Arc::clone(&store),
            Duration::from_secs(60),
            Duration::from_millis(120),
        );
        let err = lock
            .with_lock("task:1", async { Ok::<_, TaskError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn abandoned_lease_reclaimed_after_ttl() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        store
            .acquire("lock:task:1", "crashed", Duration::from_millis(30))
            .await
            .unwrap();
        let lock = LockManager::new(
            Arc::clone(&store),
            Duration::from_secs(5),
            Duration::from_millis(500),
        );
        // Blocks briefly, then reclaims the expired lease within the wait.
        lock.with_lock("task:1", async { Ok::<_, TaskError>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mutual_exclusion_under_contention() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let lock = LockManager::new(
            Arc::clone(&store),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let counter = Arc::new(tokio::sync::Mutex::new((0u32, 0u32))); // (current, max)

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                lock.with_lock("task:1", async {
                    {
                        let mut c = counter.lock().await;
                        c.0 += 1;
                        c.1 = c.1.max(c.0);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let mut c = counter.lock().await;
                    c.0 -= 1;
                    Ok::<_, TaskError>(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(counter.lock().await.1, 1, "at most one body at a time");
    }
}
