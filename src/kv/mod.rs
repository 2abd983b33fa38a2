//! Shared key-value store used by response caching and rate limiting.
//!
//! # Design Decisions
//! - Atomicity of `incr`/`expire` and batched writes is the store's job, not
//!   the engine's; many request tasks hit the same keys concurrently
//! - TTL semantics follow redis: `-2` missing key, `-1` key without expiry

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value backend error: {0}")]
    Backend(String),

    #[error("value at '{0}' is not an integer")]
    NotAnInteger(String),
}

impl From<::redis::RedisError> for KvError {
    fn from(err: ::redis::RedisError) -> Self {
        KvError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KvError>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a UTF-8 value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read a raw value.
    async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>>;

    /// Remaining lifetime in seconds (`-2` missing, `-1` no expiry).
    async fn ttl(&self, key: &str) -> Result<i64>;

    /// Write all entries with the same TTL as one batch.
    async fn set_many_with_ttl(&self, entries: &[(String, Bytes)], ttl_secs: u64) -> Result<()>;

    /// Atomically increment an integer counter, creating it at 0.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set a key's expiry.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;
}
