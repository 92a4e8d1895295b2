//! One-shot counter wards.
//!
//! A ward registered by `warder` against `blocked` reverses the next attempt
//! `blocked` makes against `warder`. It is deleted on first trigger and
//! otherwise lapses silently when its window ends.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::SuppressionLedger;
use crate::logging::{log, log_swallowed, obj, v_num, v_str, Domain, Level};
use crate::store::EphemeralStore;

fn ward_key(warder_id: &str, blocked_id: &str, team_id: &str) -> String {
    format!("ward.{}.{}-{}", warder_id, blocked_id, team_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ward {
    /// Durable ward id; 0 when the audit row could not be written.
    pub id: i64,
    pub warder_id: String,
    pub blocked_id: String,
    pub team_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WardRegistration {
    Registered { ward: Ward, window: Duration },
    AlreadyWarded,
}

pub struct CounterGuard {
    store: Arc<dyn EphemeralStore>,
    ledger: Arc<dyn SuppressionLedger>,
    window: Duration,
}

impl CounterGuard {
    pub fn new(store: Arc<dyn EphemeralStore>, ledger: Arc<dyn SuppressionLedger>, window: Duration) -> Self {
        Self { store, ledger, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn register(&self, warder_id: &str, blocked_id: &str, team_id: &str) -> Result<WardRegistration> {
        let key = ward_key(warder_id, blocked_id, team_id);
        if self.store.get(&key).await?.is_some() {
            return Ok(WardRegistration::AlreadyWarded);
        }
        let id = match self.ledger.record_ward(warder_id, blocked_id, team_id) {
            Ok(id) => id,
            Err(e) => {
                log_swallowed(Domain::Ledger, "record_ward", &e);
                0
            }
        };
        self.store.set(&key, &id.to_string(), Some(self.window)).await?;
        log(
            Level::Info,
            Domain::Ward,
            "registered",
            obj(&[
                ("warder_id", v_str(warder_id)),
                ("blocked_id", v_str(blocked_id)),
                ("team_id", v_str(team_id)),
                ("window_ms", v_num(self.window.as_millis() as f64)),
            ]),
        );
        Ok(WardRegistration::Registered {
            ward: Ward {
                id,
                warder_id: warder_id.to_string(),
                blocked_id: blocked_id.to_string(),
                team_id: team_id.to_string(),
            },
            window: self.window,
        })
    }

    pub async fn find(&self, warder_id: &str, blocked_id: &str, team_id: &str) -> Result<Option<Ward>> {
        let raw = self.store.get(&ward_key(warder_id, blocked_id, team_id)).await?;
        Ok(raw.map(|v| Ward {
            id: v.parse().unwrap_or(0),
            warder_id: warder_id.to_string(),
            blocked_id: blocked_id.to_string(),
            team_id: team_id.to_string(),
        }))
    }

    /// Delete the ward. Returns false if it was already gone.
    pub async fn consume(&self, ward: &Ward) -> Result<bool> {
        let removed = self
            .store
            .delete(&ward_key(&ward.warder_id, &ward.blocked_id, &ward.team_id))
            .await?;
        if removed && ward.id > 0 {
            if let Err(e) = self.ledger.mark_ward_countered(ward.id) {
                log_swallowed(Domain::Ledger, "mark_ward_countered", &e);
            }
        }
        log(
            Level::Info,
            Domain::Ward,
            "consumed",
            obj(&[
                ("warder_id", v_str(&ward.warder_id)),
                ("blocked_id", v_str(&ward.blocked_id)),
                ("team_id", v_str(&ward.team_id)),
                ("removed", serde_json::Value::Bool(removed)),
            ]),
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::ledger::SqliteLedger;
    use crate::store::MemoryStore;

    fn guard() -> (CounterGuard, Arc<SqliteLedger>, MockClock) {
        let clock = MockClock::default();
        let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        (CounterGuard::new(store, ledger.clone(), Duration::from_secs(300)), ledger, clock)
    }

    #[tokio::test]
    async fn test_duplicate_pair_rejected() {
        let (g, _, _) = guard();
        assert!(matches!(
            g.register("U1", "U2", "T1").await.unwrap(),
            WardRegistration::Registered { .. }
        ));
        assert_eq!(g.register("U1", "U2", "T1").await.unwrap(), WardRegistration::AlreadyWarded);
        // a different blocked issuer is a different ward
        assert!(matches!(
            g.register("U1", "U3", "T1").await.unwrap(),
            WardRegistration::Registered { .. }
        ));
    }

    #[tokio::test]
    async fn test_consume_is_one_shot() {
        let (g, ledger, _) = guard();
        g.register("U1", "U2", "T1").await.unwrap();
        let ward = g.find("U1", "U2", "T1").await.unwrap().unwrap();
        assert!(g.consume(&ward).await.unwrap());
        assert!(!g.consume(&ward).await.unwrap());
        assert_eq!(g.find("U1", "U2", "T1").await.unwrap(), None);
        assert_eq!(ledger.is_ward_countered(ward.id).unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_unused_ward_lapses() {
        let (g, ledger, clock) = guard();
        let WardRegistration::Registered { ward, .. } = g.register("U1", "U2", "T1").await.unwrap() else {
            panic!("expected registration");
        };
        clock.advance(Duration::from_secs(300));
        assert_eq!(g.find("U1", "U2", "T1").await.unwrap(), None);
        assert_eq!(ledger.is_ward_countered(ward.id).unwrap(), Some(false));
        assert!(matches!(
            g.register("U1", "U2", "T1").await.unwrap(),
            WardRegistration::Registered { .. }
        ));
    }
}
