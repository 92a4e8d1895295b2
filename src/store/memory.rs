use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{EphemeralStore, Ttl};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process store with lazy, clock-driven expiry.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    fn with_live<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> R) -> Result<R> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        entries.retain(|_, e| e.expires_at.map_or(true, |at| at > now));
        Ok(f(&mut *entries, now))
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_live(|m, _| m.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_live(|m, now| {
            m.insert(
                key.to_string(),
                Entry { value: value.to_string(), expires_at: ttl.map(|d| now + d) },
            );
        })
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        self.with_live(|m, now| match m.get(key) {
            None => Ttl::Missing,
            Some(Entry { expires_at: None, .. }) => Ttl::Persistent,
            Some(Entry { expires_at: Some(at), .. }) => Ttl::Remaining(at.saturating_duration_since(now)),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.with_live(|m, now| match m.get_mut(key) {
            Some(e) => {
                e.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.with_live(|m, _| {
            let entry = m
                .entry(key.to_string())
                .or_insert_with(|| Entry { value: "0".to_string(), expires_at: None });
            let next = entry.value.parse::<i64>().map(|n| n + 1);
            if let Ok(n) = &next {
                entry.value = n.to_string();
            }
            next
        })?
        .map_err(|_| anyhow!("value at {} is not an integer", key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.with_live(|m, _| m.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_live(|m, _| {
            let mut keys: Vec<String> = m.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
            keys.sort();
            keys
        })
    }
}
