//! Counter store module
//!
//! The gateway keeps no contended in-process state: counters, time series
//! and bounded lists all live behind [`CounterStore`] and are mutated only
//! through its atomic primitives.

pub mod memory;
pub mod redis;

use crate::clock::Clock;
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// `REDIS_URL` value that selects the in-process store.
pub const MEMORY_URL: &str = "memory";

/// Shared key-value store with atomic counter, sorted-set and list primitives.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Expire `key` at an absolute Unix time in seconds.
    async fn expire_at(&self, key: &str, unix_secs: u64) -> Result<(), StoreError>;

    /// Increment and set expiry. Backends that can do both atomically should.
    async fn incr_with_expiry(&self, key: &str, unix_secs: u64) -> Result<i64, StoreError> {
        let count = self.incr(key).await?;
        self.expire_at(key, unix_secs).await?;
        Ok(count)
    }

    /// Add `member` to a sorted collection, replacing its score if present.
    async fn sorted_add(&self, collection: &str, score: u64, member: &str) -> Result<(), StoreError>;

    async fn list_push_head(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Keep only `start..=stop` of `list`. Negative indices count from the tail.
    async fn list_trim(&self, list: &str, start: isize, stop: isize) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Build the store named by `url`.
///
/// Redis connections are established lazily, so an unreachable server at
/// startup degrades to fail-open admission instead of a failed boot.
pub fn from_url(url: &str, clock: Arc<dyn Clock>) -> Result<Arc<dyn CounterStore>, StoreError> {
    if url == MEMORY_URL {
        tracing::warn!("Using in-process counter store; counters are not shared between instances");
        return Ok(Arc::new(MemoryStore::new(clock)));
    }

    Ok(Arc::new(RedisStore::new(url)?))
}
