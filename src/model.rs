//! Core suppression types shared by the engine, stores and gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionKind {
    Muzzle,
    Backfire,
    CounterReversal,
    /// Identity impersonation; no expiry, lifted only when the name reverts.
    Impersonation,
}

impl SuppressionKind {
    pub const ALL: [SuppressionKind; 4] = [
        SuppressionKind::Muzzle,
        SuppressionKind::Backfire,
        SuppressionKind::CounterReversal,
        SuppressionKind::Impersonation,
    ];

    /// Key prefix in the ephemeral store and discriminator in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionKind::Muzzle => "muzzle",
            SuppressionKind::Backfire => "backfire",
            SuppressionKind::CounterReversal => "counter",
            SuppressionKind::Impersonation => "impersonation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn is_timed(&self) -> bool {
        !matches!(self, SuppressionKind::Impersonation)
    }
}

impl fmt::Display for SuppressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable row for one suppression instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionRecord {
    pub id: i64,
    pub subject_id: String,
    pub team_id: String,
    pub kind: SuppressionKind,
    pub issuer_id: String,
    pub duration_ms: u64,
    pub messages_suppressed: u64,
    pub words_suppressed: u64,
    pub characters_suppressed: u64,
}

impl SuppressionRecord {
    pub fn duration(&self) -> Option<Duration> {
        self.kind.is_timed().then(|| Duration::from_millis(self.duration_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSuppression {
    pub subject_id: String,
    pub team_id: String,
    pub kind: SuppressionKind,
    pub issuer_id: String,
    pub duration_ms: u64,
}

/// Projection of an active record in the ephemeral store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSuppression {
    pub subject_id: String,
    pub team_id: String,
    pub kind: SuppressionKind,
    pub record_id: i64,
}

/// Render milliseconds the way users see them: `1m30s`, `2m00s`.
pub fn time_string(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = ((ms % 60_000) as f64 / 1000.0).round() as u64;
    if seconds == 60 {
        format!("{}m00s", minutes + 1)
    } else {
        format!("{}m{:02}s", minutes, seconds)
    }
}
