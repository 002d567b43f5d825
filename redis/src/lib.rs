//! Redis queue cache for Branchline.
//!
//! Each branch/day queue is a Redis list under `queue:{branch_id}:{service_date}` holding
//! JSON-encoded [`QueueEntry`] values, head first. Every write refreshes the key's TTL so
//! yesterday's queues expire on their own.
//!
//! # Example
//!
//! ```no_run
//! use branchline_redis::RedisQueueCache;
//!
//! # async fn example() -> Result<(), branchline_core::StoreError> {
//! let cache = RedisQueueCache::new("redis://127.0.0.1:6379", 48 * 3600).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use branchline_core::error::StoreError;
use branchline_core::store::{QueueCache, StoreFuture};
use branchline_core::token::{QueueEntry, QueueKey};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Redis-backed [`QueueCache`].
#[derive(Clone)]
pub struct RedisQueueCache {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Expiry applied to a queue list on every write.
    ttl_seconds: u64,
}

impl RedisQueueCache {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the client cannot be created or the first connection fails.
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self {
            conn_manager,
            ttl_seconds,
        })
    }

    fn ttl(&self) -> i64 {
        i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX)
    }

    async fn append(&self, key: QueueKey, entry: QueueEntry) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let list_key = key.cache_key();
        let payload = encode(&entry)?;

        let _: () = redis::pipe()
            .atomic()
            .rpush(&list_key, payload)
            .ignore()
            .expire(&list_key, self.ttl())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to push queue entry: {e}")))?;

        tracing::debug!(queue = %key, token_number = entry.token_number, "Pushed queue entry");
        Ok(())
    }

    async fn pop(&self, key: QueueKey) -> Result<Option<QueueEntry>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let payload: Option<String> = conn
            .lpop(key.cache_key(), None)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to pop queue entry: {e}")))?;
        payload.as_deref().map(decode).transpose()
    }

    async fn head(&self, key: QueueKey, limit: usize) -> Result<Vec<QueueEntry>, StoreError> {
        let Some(stop) = limit.checked_sub(1) else {
            return Ok(Vec::new());
        };
        let stop = isize::try_from(stop).unwrap_or(isize::MAX);
        let mut conn = self.conn_manager.clone();
        let payloads: Vec<String> = conn
            .lrange(key.cache_key(), 0, stop)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to read queue: {e}")))?;
        payloads.iter().map(|p| decode(p)).collect()
    }

    async fn overwrite(&self, key: QueueKey, entries: Vec<QueueEntry>) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let list_key = key.cache_key();
        let payloads = entries
            .iter()
            .map(encode)
            .collect::<Result<Vec<String>, StoreError>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(&list_key).ignore();
        if !payloads.is_empty() {
            pipe.rpush(&list_key, payloads)
                .ignore()
                .expire(&list_key, self.ttl())
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to replace queue: {e}")))?;

        tracing::info!(queue = %key, entries = entries.len(), "Replaced queue cache");
        Ok(())
    }
}

fn encode(entry: &QueueEntry) -> Result<String, StoreError> {
    serde_json::to_string(entry).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(payload: &str) -> Result<QueueEntry, StoreError> {
    serde_json::from_str(payload).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl QueueCache for RedisQueueCache {
    fn push_back(&self, key: QueueKey, entry: QueueEntry) -> StoreFuture<'_, ()> {
        Box::pin(self.append(key, entry))
    }

    fn pop_front(&self, key: QueueKey) -> StoreFuture<'_, Option<QueueEntry>> {
        Box::pin(self.pop(key))
    }

    fn range(&self, key: QueueKey, limit: usize) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(self.head(key, limit))
    }

    fn replace(&self, key: QueueKey, entries: Vec<QueueEntry>) -> StoreFuture<'_, ()> {
        Box::pin(self.overwrite(key, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchline_core::ids::{BranchId, TokenId};
    use chrono::NaiveDate;

    #[test]
    fn entries_are_stored_as_json() {
        let entry = QueueEntry {
            token_id: TokenId::new(),
            token_number: 7,
        };
        let payload = encode(&entry).unwrap_or_default();
        assert!(payload.contains("\"token_number\":7"));
        assert_eq!(decode(&payload), Ok(entry));
    }

    #[test]
    fn garbage_payload_is_a_serialization_error() {
        assert!(matches!(
            decode("not json"),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn list_key_names_branch_and_day() {
        let branch = BranchId::new();
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap_or_default();
        assert_eq!(
            QueueKey::new(branch, day).cache_key(),
            format!("queue:{branch}:2025-03-10")
        );
    }
}
