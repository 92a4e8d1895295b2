//! Ephemeral projection of active suppressions.
//!
//! Layout per active record:
//! - `{kind}.{subject}-{team}` holds the durable record id, TTL = time left
//! - `{kind}.{subject}-{team}.suppressions` holds the in-flight redaction count,
//!   same TTL, reset to 0 on activation

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::SuppressionLedger;
use crate::logging::{log, log_swallowed, obj, v_num, v_str, Domain, Level};
use crate::model::{ActiveSuppression, SuppressionKind, SuppressionRecord};
use crate::store::{EphemeralStore, Ttl};

pub fn record_key(kind: SuppressionKind, subject_id: &str, team_id: &str) -> String {
    format!("{}.{}-{}", kind.as_str(), subject_id, team_id)
}

pub fn in_flight_key(kind: SuppressionKind, subject_id: &str, team_id: &str) -> String {
    format!("{}.suppressions", record_key(kind, subject_id, team_id))
}

pub struct SuppressionStateStore {
    store: Arc<dyn EphemeralStore>,
    ledger: Arc<dyn SuppressionLedger>,
}

impl SuppressionStateStore {
    pub fn new(store: Arc<dyn EphemeralStore>, ledger: Arc<dyn SuppressionLedger>) -> Self {
        Self { store, ledger }
    }

    /// Project a freshly created record into the store.
    pub async fn activate(&self, record: &SuppressionRecord) -> Result<ActiveSuppression> {
        let ttl = record.duration();
        let key = record_key(record.kind, &record.subject_id, &record.team_id);
        self.store.set(&key, &record.id.to_string(), ttl).await?;
        self.store
            .set(&in_flight_key(record.kind, &record.subject_id, &record.team_id), "0", ttl)
            .await?;
        log(
            Level::Info,
            Domain::State,
            "activated",
            obj(&[
                ("subject_id", v_str(&record.subject_id)),
                ("team_id", v_str(&record.team_id)),
                ("record_id", v_num(record.id as f64)),
                ("kind", v_str(record.kind.as_str())),
                ("ttl_ms", ttl.map(|d| v_num(d.as_millis() as f64)).unwrap_or_default()),
            ]),
        );
        Ok(ActiveSuppression {
            subject_id: record.subject_id.clone(),
            team_id: record.team_id.clone(),
            kind: record.kind,
            record_id: record.id,
        })
    }

    pub async fn active(&self, subject_id: &str, team_id: &str) -> Result<Option<ActiveSuppression>> {
        for kind in SuppressionKind::ALL {
            let Some(raw) = self.store.get(&record_key(kind, subject_id, team_id)).await? else {
                continue;
            };
            if let Ok(record_id) = raw.parse::<i64>() {
                return Ok(Some(ActiveSuppression {
                    subject_id: subject_id.to_string(),
                    team_id: team_id.to_string(),
                    kind,
                    record_id,
                }));
            }
        }
        Ok(None)
    }

    pub async fn is_active(&self, subject_id: &str, team_id: &str) -> Result<bool> {
        Ok(self.active(subject_id, team_id).await?.is_some())
    }

    pub async fn remaining(&self, subject_id: &str, team_id: &str) -> Result<Ttl> {
        match self.active(subject_id, team_id).await? {
            Some(a) => self.store.ttl(&record_key(a.kind, subject_id, team_id)).await,
            None => Ok(Ttl::Missing),
        }
    }

    /// Add `delta` to the active record's remaining time and durable duration.
    ///
    /// Read-modify-write on the TTL; two concurrent extensions can lose one
    /// increment. Returns the new remaining time, or `None` when nothing timed
    /// is active.
    pub async fn extend_time(&self, subject_id: &str, team_id: &str, delta: Duration) -> Result<Option<Duration>> {
        let Some(active) = self.active(subject_id, team_id).await? else {
            return Ok(None);
        };
        if !active.kind.is_timed() {
            return Ok(None);
        }
        let key = record_key(active.kind, subject_id, team_id);
        let Some(remaining) = self.store.ttl(&key).await?.remaining() else {
            return Ok(None);
        };
        let extended = remaining + delta;
        self.store.expire(&key, extended).await?;
        self.store.expire(&in_flight_key(active.kind, subject_id, team_id), extended).await?;

        if let Err(e) = self.ledger.add_duration(active.record_id, delta.as_millis() as u64) {
            log_swallowed(Domain::Ledger, "add_duration", &e);
        }
        log(
            Level::Info,
            Domain::State,
            "extended",
            obj(&[
                ("subject_id", v_str(subject_id)),
                ("team_id", v_str(team_id)),
                ("record_id", v_num(active.record_id as f64)),
                ("delta_ms", v_num(delta.as_millis() as f64)),
                ("remaining_ms", v_num(extended.as_millis() as f64)),
            ]),
        );
        Ok(Some(extended))
    }

    pub async fn redactions_in_flight(&self, active: &ActiveSuppression) -> Result<u32> {
        let raw = self
            .store
            .get(&in_flight_key(active.kind, &active.subject_id, &active.team_id))
            .await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub async fn increment_in_flight(&self, active: &ActiveSuppression) -> Result<u32> {
        let counter = in_flight_key(active.kind, &active.subject_id, &active.team_id);
        if self.store.ttl(&counter).await? == Ttl::Missing {
            // Counter vanished under us; re-seed it with the record's lifetime.
            let ttl = self
                .store
                .ttl(&record_key(active.kind, &active.subject_id, &active.team_id))
                .await?
                .remaining();
            self.store.set(&counter, "1", ttl).await?;
            return Ok(1);
        }
        Ok(self.store.incr(&counter).await?.max(0) as u32)
    }

    /// Drop the ephemeral projection of whatever is active. History stays.
    pub async fn revoke(&self, subject_id: &str, team_id: &str) -> Result<Option<ActiveSuppression>> {
        let Some(active) = self.active(subject_id, team_id).await? else {
            return Ok(None);
        };
        self.revoke_kind(active.kind, subject_id, team_id).await?;
        Ok(Some(active))
    }

    pub async fn revoke_kind(&self, kind: SuppressionKind, subject_id: &str, team_id: &str) -> Result<bool> {
        let removed = self.store.delete(&record_key(kind, subject_id, team_id)).await?;
        self.store.delete(&in_flight_key(kind, subject_id, team_id)).await?;
        if removed {
            log(
                Level::Info,
                Domain::State,
                "revoked",
                obj(&[
                    ("subject_id", v_str(subject_id)),
                    ("team_id", v_str(team_id)),
                    ("kind", v_str(kind.as_str())),
                ]),
            );
        }
        Ok(removed)
    }
}
