//! Read-side view of the economy's active item effects.
//!
//! The inventory subsystem owns purchases; it marks an item as in use by
//! writing `store.item.{user}-{team}.{item}.{use}` into the ephemeral store
//! with the purchaser (`{purchaser}-{team}`) as value and the effect's
//! lifetime as TTL. This module only reads those keys, plus deleting a
//! defensive use when it fires.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dice::Dice;
use crate::logging::{log, obj, ts_epoch_ms, v_num, v_str, Domain, Level};
use crate::store::EphemeralStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ItemEffect {
    pub item_id: u32,
    pub name: String,
    pub is_defensive: bool,
    pub is_time_modifier: bool,
    /// Inclusive range drawn from once per active use.
    pub magnitude_range_ms: (u64, u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemCatalog {
    items: Vec<ItemEffect>,
}

impl ItemCatalog {
    pub fn new(items: Vec<ItemEffect>) -> Self {
        Self { items }
    }

    pub fn get(&self, item_id: u32) -> Option<&ItemEffect> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    pub fn defensive(&self) -> impl Iterator<Item = &ItemEffect> {
        self.items.iter().filter(|i| i.is_defensive)
    }

    pub fn time_modifiers(&self) -> impl Iterator<Item = &ItemEffect> {
        self.items.iter().filter(|i| i.is_time_modifier)
    }
}

impl Default for ItemCatalog {
    fn default() -> Self {
        Self::new(vec![
            ItemEffect {
                item_id: 1,
                name: "Guardian Angel".to_string(),
                is_defensive: true,
                is_time_modifier: false,
                magnitude_range_ms: (0, 0),
            },
            ItemEffect {
                item_id: 2,
                name: "Moon Juice".to_string(),
                is_defensive: false,
                is_time_modifier: true,
                magnitude_range_ms: (30_000, 60_000),
            },
        ])
    }
}

/// Handle on one active defensive use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectToken {
    pub key: String,
    pub item_id: u32,
}

#[async_trait]
pub trait ItemModifierResolver: Send + Sync {
    async fn active_defensive_effect(&self, user_id: &str, team_id: &str) -> Result<Option<EffectToken>>;
    /// Extra suppression time contributed by the user's active time modifiers.
    async fn active_time_modifiers(&self, user_id: &str, team_id: &str) -> Result<u64>;
    /// Spend a defensive use; returns the purchaser to credit, if still present.
    async fn consume_effect(&self, token: &EffectToken) -> Result<Option<String>>;
}

fn item_prefix(user_id: &str, team_id: &str, item_id: u32) -> String {
    format!("store.item.{}-{}.{}.", user_id, team_id, item_id)
}

pub struct StoreItemResolver {
    store: Arc<dyn EphemeralStore>,
    catalog: ItemCatalog,
    dice: Arc<Dice>,
    use_seq: AtomicU64,
}

impl StoreItemResolver {
    pub fn new(store: Arc<dyn EphemeralStore>, catalog: ItemCatalog, dice: Arc<Dice>) -> Self {
        Self { store, catalog, dice, use_seq: AtomicU64::new(0) }
    }

    /// Mark `item_id` as in use on `user_id`, bought by `purchaser_id`.
    pub async fn grant(
        &self,
        user_id: &str,
        team_id: &str,
        item_id: u32,
        purchaser_id: &str,
        ttl: Duration,
    ) -> Result<EffectToken> {
        let seq = self.use_seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}{}-{}", item_prefix(user_id, team_id, item_id), ts_epoch_ms(), seq);
        self.store
            .set(&key, &format!("{}-{}", purchaser_id, team_id), Some(ttl))
            .await?;
        Ok(EffectToken { key, item_id })
    }
}

#[async_trait]
impl ItemModifierResolver for StoreItemResolver {
    async fn active_defensive_effect(&self, user_id: &str, team_id: &str) -> Result<Option<EffectToken>> {
        for item in self.catalog.defensive() {
            let keys = self.store.keys_with_prefix(&item_prefix(user_id, team_id, item.item_id)).await?;
            if let Some(key) = keys.into_iter().next() {
                return Ok(Some(EffectToken { key, item_id: item.item_id }));
            }
        }
        Ok(None)
    }

    async fn active_time_modifiers(&self, user_id: &str, team_id: &str) -> Result<u64> {
        let mut extra = 0u64;
        for item in self.catalog.time_modifiers() {
            let uses = self.store.keys_with_prefix(&item_prefix(user_id, team_id, item.item_id)).await?;
            let (lo, hi) = item.magnitude_range_ms;
            for _ in &uses {
                extra = extra.saturating_add(self.dice.between(lo, hi));
            }
        }
        Ok(extra)
    }

    async fn consume_effect(&self, token: &EffectToken) -> Result<Option<String>> {
        let Some(owner) = self.store.get(&token.key).await? else {
            return Ok(None);
        };
        self.store.delete(&token.key).await?;
        let purchaser = owner.split('-').next().unwrap_or_default().to_string();
        log(
            Level::Info,
            Domain::Inventory,
            "effect_consumed",
            obj(&[
                ("item_id", v_num(token.item_id as f64)),
                ("purchaser_id", v_str(&purchaser)),
            ]),
        );
        Ok(Some(purchaser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::dice::FixedRolls;
    use crate::store::MemoryStore;

    fn resolver() -> (StoreItemResolver, MockClock) {
        let clock = MockClock::default();
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let dice = Arc::new(Dice::fixed(FixedRolls { chance: false, coin: false, offset: 10_000 }));
        (StoreItemResolver::new(store, ItemCatalog::default(), dice), clock)
    }

    #[tokio::test]
    async fn test_defensive_effect_consumed_once() {
        let (r, _) = resolver();
        assert_eq!(r.active_defensive_effect("U1", "T1").await.unwrap(), None);
        r.grant("U1", "T1", 1, "U7", Duration::from_secs(600)).await.unwrap();
        let token = r.active_defensive_effect("U1", "T1").await.unwrap().unwrap();
        assert_eq!(r.consume_effect(&token).await.unwrap().as_deref(), Some("U7"));
        assert_eq!(r.consume_effect(&token).await.unwrap(), None);
        assert_eq!(r.active_defensive_effect("U1", "T1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_time_modifiers_sum_per_use() {
        let (r, clock) = resolver();
        assert_eq!(r.active_time_modifiers("U1", "T1").await.unwrap(), 0);
        r.grant("U1", "T1", 2, "U1", Duration::from_secs(60)).await.unwrap();
        r.grant("U1", "T1", 2, "U1", Duration::from_secs(120)).await.unwrap();
        // offset 10s on a 30s..60s range
        assert_eq!(r.active_time_modifiers("U1", "T1").await.unwrap(), 80_000);
        clock.advance(Duration::from_secs(60));
        assert_eq!(r.active_time_modifiers("U1", "T1").await.unwrap(), 40_000);
    }

    #[tokio::test]
    async fn test_defensive_items_do_not_modify_time() {
        let (r, _) = resolver();
        r.grant("U1", "T1", 1, "U9", Duration::from_secs(60)).await.unwrap();
        assert_eq!(r.active_time_modifiers("U1", "T1").await.unwrap(), 0);
    }

    #[test]
    fn test_catalog_partitions() {
        let catalog = ItemCatalog::default();
        assert_eq!(catalog.defensive().count(), 1);
        assert_eq!(catalog.time_modifiers().count(), 1);
        assert_eq!(catalog.get(1).map(|i| i.name.as_str()), Some("Guardian Angel"));
    }
}
