//! Key-value store contract — the single seam between the task layer and
//! the shared durable store.
//!
//! Backends are dumb adapters: they expose hash records, byte blobs, glob
//! scanning, and a lease primitive, and know nothing about tasks. All
//! domain logic (record schema, status transitions, deletion policy) lives
//! above this trait in [`crate::tasks`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Backend-agnostic key-value store.
///
/// Absence of a key is a normal outcome (`None` / `false` / empty map),
/// never a [`StoreError`]. Implementations must be `Send + Sync`; the
/// store is shared across request handlers as `Arc<dyn KvStore>`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Create or overwrite string fields of a hash record.
    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<(), StoreError>;

    /// Read a single field of a hash record.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Read all string fields of a hash record. Empty map when the key is
    /// absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// O(1) presence check.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove a key and everything stored under it. Idempotent; returns
    /// `false` when the key did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All keys matching a glob-style pattern (`*`, `?`).
    ///
    /// Single pass over a live keyspace with **no snapshot isolation**:
    /// keys created or deleted while the scan runs may or may not appear.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Store a named byte blob under a key.
    async fn blob_set(&self, key: &str, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Read a named byte blob. `None` when the key or the name is absent.
    async fn blob_get(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Lease primitive: atomically set `key = token` only if the key is
    /// absent, with a TTL after which the lease is reclaimable. Returns
    /// `true` when the lease was granted.
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Release a lease, but only if it still holds `token`. A holder whose
    /// lease expired and was reclaimed by someone else must not delete the
    /// new holder's lease.
    async fn release(&self, key: &str, token: &str) -> Result<(), StoreError>;
}
