//! Redis backend — async [`KvStore`] implementation.
//!
//! Holds a [`MultiplexedConnection`], which is cheap to clone: all clones
//! share one TCP connection, so every method clones it for concurrent use.
//! Keys are namespaced under a configurable prefix (`{prefix}:{key}`) so
//! several deployments and test runs can share one Redis instance.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::info;

use crate::error::StoreError;
use crate::store::traits::KvStore;

/// Compare-and-delete: release a lease only while it still holds our token.
const LUA_RELEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed key-value store.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisStore {
    /// Connect to Redis at the given URL. Fails fast if the connection
    /// cannot be established.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid Redis URL {url}: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect to {url}: {e}")))?;
        info!(url, "Connected to Redis");
        Ok(Self {
            conn,
            key_prefix: "dispatchd".to_string(),
        })
    }

    /// Set a custom key prefix (builder pattern). Useful for test
    /// isolation: each run can use a unique prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Strip the deployment prefix from a key returned by SCAN.
    fn logical_key(&self, full: &str) -> Option<String> {
        full.strip_prefix(&self.key_prefix)
            .and_then(|k| k.strip_prefix(':'))
            .map(str::to_string)
    }
}

fn map_redis_error(err: redis::RedisError, key: &str) -> StoreError {
    StoreError::Backend {
        message: format!("Redis error for key {key}: {err}"),
        source: Some(Box::new(err)),
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<(), StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(&full, &fields)
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        conn.hget(&full, field)
            .await
            .map_err(|e| map_redis_error(e, key))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        conn.hgetall(&full)
            .await
            .map_err(|e| map_redis_error(e, key))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        conn.exists(&full)
            .await
            .map_err(|e| map_redis_error(e, key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(&full).await.map_err(|e| map_redis_error(e, key))?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let full_pattern = self.full_key(pattern);
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        // Cursor-based SCAN: bounded batches, no long-lived transaction.
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(e, pattern))?;
            keys.extend(batch.into_iter().filter_map(|k| self.logical_key(&k)));
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn blob_set(&self, key: &str, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(&full, name, data)
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(())
    }

    async fn blob_get(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        conn.hget(&full, name)
            .await
            .map_err(|e| map_redis_error(e, key))
    }

    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let full = self.full_key(key);
        let mut conn = self.conn.clone();
        // SET NX EX: grant the lease only if nobody holds it, with expiry
        // so a crashed holder cannot block acquisition forever.
        let granted: Option<String> = redis::cmd("SET")
            .arg(&full)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(granted.is_some())
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), StoreError> {
        let full = self.full_key(key);
        let script = Script::new(LUA_RELEASE);
        let _: i64 = script
            .key(&full)
            .arg(token)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(())
    }
}
