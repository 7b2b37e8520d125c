//! Shared counter store clients.
//!
//! The admission gate keeps no cross-request memory of its own. All counter
//! state lives behind a [`CounterStore`], which is the only point where
//! concurrent increments from many gate instances are ordered.

mod memory;
mod redis;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Trait for counter store implementations.
///
/// This trait abstracts over the Redis-backed store shared by a fleet of
/// instances and the in-process store used on a single node.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at 1 if absent, and return
    /// the post-increment value.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Set a time-to-live on an existing key. Returns `false` if the key
    /// does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
