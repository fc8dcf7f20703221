//! In-memory [`KvStore`] backend (for tests and single-node development).
//!
//! Mirrors the Redis backend's observable behavior: hash records, byte
//! blobs, glob scanning, and leases with deadlines checked on acquisition.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::traits::KvStore;

struct Lease {
    token: String,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
    leases: HashMap<String, Lease>,
}

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Glob match supporting `*` (any run) and `?` (any single char), the
/// subset of Redis MATCH syntax the task layer relies on.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            // Backtrack: let the last '*' absorb one more character.
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn decode_utf8(key: &str, field: &str, bytes: &[u8]) -> Result<String, StoreError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| StoreError::Decode(format!("field {field} of {key} is not UTF-8: {e}")))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field, value.into_bytes());
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().await;
        match inner.hashes.get(key).and_then(|h| h.get(field)) {
            Some(bytes) => Ok(Some(decode_utf8(key, field, bytes)?)),
            None => Ok(None),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.read().await;
        let mut out = HashMap::new();
        if let Some(hash) = inner.hashes.get(key) {
            for (field, bytes) in hash {
                out.insert(field.clone(), decode_utf8(key, field, bytes)?);
            }
        }
        Ok(out)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let had_hash = inner.hashes.remove(key).is_some();
        let had_lease = inner.leases.remove(key).is_some();
        Ok(had_hash || had_lease)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .hashes
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn blob_set(&self, key: &str, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn blob_get(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).and_then(|h| h.get(name)).cloned())
    }

    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(lease) = inner.leases.get(key) {
            if lease.deadline > Instant::now() {
                return Ok(false);
            }
            // Expired lease: the holder crashed or stalled, reclaim it.
        }
        inner.leases.insert(
            key.to_string(),
            Lease {
                token: token.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.leases.get(key).is_some_and(|l| l.token == token) {
            inner.leases.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_match("task:*", "task:abc"));
        assert!(glob_match("task:*", "task:"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("task:tr?in*", "task:train_1234"));
        assert!(!glob_match("task:*", "files:abc"));
        assert!(!glob_match("task:a", "task:ab"));
        assert!(glob_match("*_xyz", "long_prefix_xyz"));
        assert!(!glob_match("*_xyz", "long_prefix_xy"));
    }

    #[tokio::test]
    async fn hash_round_trip_and_delete() {
        let store = MemoryStore::new();
        store
            .hash_set(
                "task:1",
                vec![("status".into(), "queued".into()), ("service".into(), "train".into())],
            )
            .await
            .unwrap();
        assert!(store.exists("task:1").await.unwrap());
        assert_eq!(
            store.hash_get("task:1", "status").await.unwrap().as_deref(),
            Some("queued")
        );
        let all = store.hash_get_all("task:1").await.unwrap();
        assert_eq!(all.len(), 2);

        assert!(store.delete("task:1").await.unwrap());
        assert!(!store.delete("task:1").await.unwrap());
        assert!(!store.exists("task:1").await.unwrap());
        assert!(store.hash_get_all("task:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_returns_only_matching_keys() {
        let store = MemoryStore::new();
        for key in ["task:a1", "task:a2", "task:b1", "files:a1"] {
            store
                .hash_set(key, vec![("f".into(), "v".into())])
                .await
                .unwrap();
        }
        let mut keys = store.scan("task:a*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["task:a1", "task:a2"]);
    }

    #[tokio::test]
    async fn blob_set_get() {
        let store = MemoryStore::new();
        store.blob_set("files:1", "log", b"line one\n").await.unwrap();
        assert_eq!(
            store.blob_get("files:1", "log").await.unwrap().as_deref(),
            Some(&b"line one\n"[..])
        );
        assert!(store.blob_get("files:1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(5);
        assert!(store.acquire("lock:task:1", "a", ttl).await.unwrap());
        assert!(!store.acquire("lock:task:1", "b", ttl).await.unwrap());

        // Release with the wrong token is a no-op.
        store.release("lock:task:1", "b").await.unwrap();
        assert!(!store.acquire("lock:task:1", "b", ttl).await.unwrap());

        store.release("lock:task:1", "a").await.unwrap();
        assert!(store.acquire("lock:task:1", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let store = MemoryStore::new();
        assert!(
            store
                .acquire("lock:task:1", "dead", Duration::from_millis(10))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(
            store
                .acquire("lock:task:1", "next", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }
}
