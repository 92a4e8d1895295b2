//! Per-requestor issuance limits.
//!
//! Two independent penalties:
//! - a rolling window counting issuances, capped at `max_issuances`
//! - probation, a flat ban on issuing for a long window after losing to a
//!   counter or a defensive item

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::store::EphemeralStore;

fn window_key(requestor_id: &str, team_id: &str) -> String {
    format!("throttle.issued.{}-{}", requestor_id, team_id)
}

fn probation_key(requestor_id: &str, team_id: &str) -> String {
    format!("throttle.probation.{}-{}", requestor_id, team_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleBlock {
    AtCap { issued: u32, cap: u32 },
    OnProbation,
}

pub struct RequestorThrottle {
    store: Arc<dyn EphemeralStore>,
    max_issuances: u32,
    window: Duration,
    probation: Duration,
}

impl RequestorThrottle {
    pub fn new(store: Arc<dyn EphemeralStore>, max_issuances: u32, window: Duration, probation: Duration) -> Self {
        Self { store, max_issuances, window, probation }
    }

    pub fn max_issuances(&self) -> u32 {
        self.max_issuances
    }

    pub async fn issued(&self, requestor_id: &str, team_id: &str) -> Result<u32> {
        let raw = self.store.get(&window_key(requestor_id, team_id)).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Count one issuance. The window starts with the first issuance and is
    /// not extended by later ones; the count never passes the cap.
    pub async fn record_issuance(&self, requestor_id: &str, team_id: &str) -> Result<u32> {
        let key = window_key(requestor_id, team_id);
        let issued = self.issued(requestor_id, team_id).await?;
        let count = if issued == 0 {
            self.store.set(&key, "1", Some(self.window)).await?;
            1
        } else if issued < self.max_issuances {
            self.store.incr(&key).await?.max(0) as u32
        } else {
            issued
        };
        log(
            Level::Debug,
            Domain::Throttle,
            "issuance",
            obj(&[
                ("requestor_id", v_str(requestor_id)),
                ("team_id", v_str(team_id)),
                ("count", v_num(count as f64)),
            ]),
        );
        Ok(count)
    }

    pub async fn is_at_cap(&self, requestor_id: &str, team_id: &str) -> Result<bool> {
        Ok(self.issued(requestor_id, team_id).await? >= self.max_issuances)
    }

    pub async fn place_on_probation(&self, requestor_id: &str, team_id: &str) -> Result<()> {
        self.store
            .set(&probation_key(requestor_id, team_id), "1", Some(self.probation))
            .await?;
        log(
            Level::Info,
            Domain::Throttle,
            "probation",
            obj(&[
                ("requestor_id", v_str(requestor_id)),
                ("team_id", v_str(team_id)),
                ("duration_ms", v_num(self.probation.as_millis() as f64)),
            ]),
        );
        Ok(())
    }

    pub async fn is_on_probation(&self, requestor_id: &str, team_id: &str) -> Result<bool> {
        Ok(self.store.get(&probation_key(requestor_id, team_id)).await?.is_some())
    }

    /// Probation is checked first: it refuses regardless of the window.
    pub async fn check(&self, requestor_id: &str, team_id: &str) -> Result<Option<ThrottleBlock>> {
        if self.is_on_probation(requestor_id, team_id).await? {
            return Ok(Some(ThrottleBlock::OnProbation));
        }
        let issued = self.issued(requestor_id, team_id).await?;
        if issued >= self.max_issuances {
            return Ok(Some(ThrottleBlock::AtCap { issued, cap: self.max_issuances }));
        }
        Ok(None)
    }
}
