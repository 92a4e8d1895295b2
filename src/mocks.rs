//! In-process doubles for the external collaborators.
//!
//! Used by unit and integration tests to wire a full engine without a chat
//! workspace, an inventory service or Redis.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::inventory::{EffectToken, ItemModifierResolver};
use crate::ports::{mention_ids, Identity, MessageNotFound, Messaging};
use crate::store::{EphemeralStore, Ttl};

pub use crate::clock::MockClock;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Messaging
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Deleted { channel: String, message_id: String, author_id: String },
    Posted { channel: String, text: String },
    Ephemeral { channel: String, text: String, user_id: String },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MessengerFaults {
    pub deletes_not_found: bool,
    pub deletes_fail: bool,
    pub posts_fail: bool,
}

#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    faults: Mutex<MessengerFaults>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_faults(&self, faults: MessengerFaults) {
        *lock(&self.faults) = faults;
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Deleted { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    pub fn posted(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Posted { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }
}

#[async_trait]
impl Messaging for RecordingMessenger {
    async fn delete_message(&self, channel: &str, message_id: &str, author_id: &str) -> Result<()> {
        let faults = *lock(&self.faults);
        if faults.deletes_not_found {
            return Err(anyhow::Error::new(MessageNotFound));
        }
        if faults.deletes_fail {
            return Err(anyhow!("delete failed"));
        }
        lock(&self.sent).push(Sent::Deleted {
            channel: channel.to_string(),
            message_id: message_id.to_string(),
            author_id: author_id.to_string(),
        });
        Ok(())
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        if lock(&self.faults).posts_fail {
            return Err(anyhow!("post failed"));
        }
        lock(&self.sent).push(Sent::Posted { channel: channel.to_string(), text: text.to_string() });
        Ok(())
    }

    async fn post_ephemeral(&self, channel: &str, text: &str, user_id: &str) -> Result<()> {
        lock(&self.sent).push(Sent::Ephemeral {
            channel: channel.to_string(),
            text: text.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// Identity
// =============================================================================

#[derive(Debug, Clone)]
struct DirectoryUser {
    name: String,
    is_bot: bool,
}

/// Fixed member list; impersonation can be toggled at runtime.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: HashMap<String, DirectoryUser>,
    impersonating: Mutex<HashMap<String, String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, id: &str, name: &str) -> Self {
        self.users.insert(id.to_string(), DirectoryUser { name: name.to_string(), is_bot: false });
        self
    }

    pub fn with_bot(mut self, id: &str, name: &str) -> Self {
        self.users.insert(id.to_string(), DirectoryUser { name: name.to_string(), is_bot: true });
        self
    }

    pub fn set_impersonating(&self, user_id: &str, victim_id: Option<&str>) {
        let mut map = lock(&self.impersonating);
        match victim_id {
            Some(v) => map.insert(user_id.to_string(), v.to_string()),
            None => map.remove(user_id),
        };
    }
}

#[async_trait]
impl Identity for StaticDirectory {
    async fn resolve_mention_ids(&self, text: &str, _team_id: &str) -> Result<Vec<String>> {
        Ok(mention_ids(text).into_iter().filter(|id| self.users.contains_key(id)).collect())
    }

    async fn is_bot(&self, user_id: &str, _team_id: &str) -> Result<bool> {
        Ok(self.users.get(user_id).map(|u| u.is_bot).unwrap_or(false))
    }

    async fn display_name(&self, user_id: &str, _team_id: &str) -> Result<Option<String>> {
        Ok(self.users.get(user_id).map(|u| u.name.clone()))
    }

    async fn impersonated_user(&self, user_id: &str, _team_id: &str) -> Result<Option<String>> {
        Ok(lock(&self.impersonating).get(user_id).cloned())
    }
}

// =============================================================================
// Inventory
// =============================================================================

#[derive(Debug, Default)]
struct InventoryState {
    /// user -> purchaser of an active defensive item
    defensive: HashMap<String, String>,
    time_modifiers: HashMap<String, u64>,
    consumed: u32,
}

#[derive(Debug, Default)]
pub struct StaticInventory {
    state: Mutex<InventoryState>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect(&self, user_id: &str, purchaser_id: &str) {
        lock(&self.state).defensive.insert(user_id.to_string(), purchaser_id.to_string());
    }

    pub fn set_time_modifier(&self, user_id: &str, extra_ms: u64) {
        lock(&self.state).time_modifiers.insert(user_id.to_string(), extra_ms);
    }

    pub fn consumed(&self) -> u32 {
        lock(&self.state).consumed
    }
}

#[async_trait]
impl ItemModifierResolver for StaticInventory {
    async fn active_defensive_effect(&self, user_id: &str, team_id: &str) -> Result<Option<EffectToken>> {
        Ok(lock(&self.state).defensive.contains_key(user_id).then(|| EffectToken {
            key: format!("{}-{}", user_id, team_id),
            item_id: 1,
        }))
    }

    async fn active_time_modifiers(&self, user_id: &str, _team_id: &str) -> Result<u64> {
        Ok(lock(&self.state).time_modifiers.get(user_id).copied().unwrap_or(0))
    }

    async fn consume_effect(&self, token: &EffectToken) -> Result<Option<String>> {
        let user_id = token.key.split('-').next().unwrap_or_default();
        let mut state = lock(&self.state);
        let purchaser = state.defensive.remove(user_id);
        if purchaser.is_some() {
            state.consumed += 1;
        }
        Ok(purchaser)
    }
}

// =============================================================================
// Store
// =============================================================================

/// Every operation fails, as an unreachable Redis would.
#[derive(Debug, Default)]
pub struct UnreachableStore;

#[async_trait]
impl EphemeralStore for UnreachableStore {
    async fn get(&self, _: &str) -> Result<Option<String>> {
        Err(anyhow!("store unreachable"))
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<()> {
        Err(anyhow!("store unreachable"))
    }
    async fn ttl(&self, _: &str) -> Result<Ttl> {
        Err(anyhow!("store unreachable"))
    }
    async fn expire(&self, _: &str, _: Duration) -> Result<bool> {
        Err(anyhow!("store unreachable"))
    }
    async fn incr(&self, _: &str) -> Result<i64> {
        Err(anyhow!("store unreachable"))
    }
    async fn delete(&self, _: &str) -> Result<bool> {
        Err(anyhow!("store unreachable"))
    }
    async fn keys_with_prefix(&self, _: &str) -> Result<Vec<String>> {
        Err(anyhow!("store unreachable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_only_resolves_members() {
        let dir = StaticDirectory::new().with_user("U1", "alice");
        assert_eq!(dir.resolve_mention_ids("<@U1> <@U404>", "T1").await.unwrap(), vec!["U1"]);
        dir.set_impersonating("U2", Some("U1"));
        assert_eq!(dir.impersonated_user("U2", "T1").await.unwrap().as_deref(), Some("U1"));
        dir.set_impersonating("U2", None);
        assert_eq!(dir.impersonated_user("U2", "T1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_inventory_consumes_once() {
        let inv = StaticInventory::new();
        inv.protect("U1", "U9");
        let token = inv.active_defensive_effect("U1", "T1").await.unwrap().unwrap();
        assert_eq!(inv.consume_effect(&token).await.unwrap().as_deref(), Some("U9"));
        assert_eq!(inv.consume_effect(&token).await.unwrap(), None);
        assert_eq!(inv.consumed(), 1);
    }
}
