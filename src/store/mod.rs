//! Ephemeral key/expiry store.
//!
//! This is the authority for "who is suppressed right now and for how long".
//! Durations live in key TTLs rather than in process timers, so a restart
//! never silently clears an active suppression.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

mod memory;
#[cfg(feature = "redis-store")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;

/// Expiry state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    Remaining(Duration),
}

impl Ttl {
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Ttl::Remaining(d) => Some(*d),
            _ => None,
        }
    }
}

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// `ttl = None` stores the key without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn ttl(&self, key: &str) -> Result<Ttl>;
    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Missing keys start at 0 with no expiry; existing expiry is preserved.
    async fn incr(&self, key: &str) -> Result<i64>;
    /// Returns true when a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
