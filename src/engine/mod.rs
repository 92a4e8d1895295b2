//! Resolution of a single suppression attempt.
//!
//! ```text
//! apply(subject, requestor) ──► [rule 1] ──► [rule 2] ──► ... ──► [default]
//!                                   │            │                    │
//!                                   ▼            ▼                    ▼
//!                                Outcome      Outcome              Applied
//! ```
//!
//! Rules are evaluated in order and the first whose predicate matches
//! produces the outcome. Every predicate takes its own fresh reads; nothing
//! is cached between rules. See [`rules`] for the ordered list.
//!
//! Two attempts on the same subject can interleave between the "already
//! suppressed" check and record creation. That race is accepted.

pub mod rules;

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::dice::Dice;
use crate::inventory::ItemModifierResolver;
use crate::ledger::SuppressionLedger;
use crate::logging::{log, log_outcome, log_swallowed, obj, v_str, Domain, Level};
use crate::model::{time_string, NewSuppression, SuppressionRecord};
use crate::ports::{Identity, Messaging};
use crate::state_store::SuppressionStateStore;
use crate::throttle::RequestorThrottle;
use crate::wards::CounterGuard;

use self::rules::Rule;

/// Rendered when infrastructure fails mid-attempt.
pub const MUZZLE_FAILED: &str = "Muzzle failed!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionClass {
    /// Bad or missing target.
    Validation,
    /// Target or requestor state forbids the attempt.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TargetIsBot,
    InvalidTarget,
    SelfTarget,
    AlreadySuppressed { subject_name: String },
    IssuerSuppressed,
    RateLimited { cap: u32 },
}

impl Rejection {
    pub fn class(&self) -> RejectionClass {
        match self {
            Rejection::TargetIsBot | Rejection::InvalidTarget | Rejection::SelfTarget => RejectionClass::Validation,
            _ => RejectionClass::Conflict,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TargetIsBot => f.write_str("Sorry, you cannot muzzle bots."),
            Rejection::InvalidTarget => {
                f.write_str("Invalid username passed in. You can only muzzle existing slack users.")
            }
            Rejection::SelfTarget => f.write_str("You can't muzzle yourself."),
            Rejection::AlreadySuppressed { subject_name } => write!(f, "{} is already muzzled!", subject_name),
            Rejection::IssuerSuppressed => f.write_str("You can't muzzle someone if you are already muzzled!"),
            Rejection::RateLimited { cap } => {
                write!(f, "You're doing that too much. Only {} muzzles are allowed per hour.", cap)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reject(Rejection),
    /// A ward turned the attempt onto the requestor.
    Reversed { record: SuppressionRecord },
    Backfired { record: SuppressionRecord },
    /// A defensive item turned the attempt onto the requestor.
    Protected { record: SuppressionRecord, credited_id: String },
    Applied { record: SuppressionRecord, subject_name: String },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Reject(_) => "reject",
            Outcome::Reversed { .. } => "reversed",
            Outcome::Backfired { .. } => "backfired",
            Outcome::Protected { .. } => "protected",
            Outcome::Applied { .. } => "applied",
        }
    }

    pub fn record(&self) -> Option<&SuppressionRecord> {
        match self {
            Outcome::Reject(_) => None,
            Outcome::Reversed { record }
            | Outcome::Backfired { record }
            | Outcome::Protected { record, .. }
            | Outcome::Applied { record, .. } => Some(record),
        }
    }

    /// The single-line reply shown to the requestor.
    pub fn message(&self) -> String {
        match self {
            Outcome::Reject(r) => r.to_string(),
            Outcome::Reversed { .. } => "You've been countered! Better luck next time...".to_string(),
            Outcome::Backfired { .. } => ":boom: Backfired! Better luck next time... :boom:".to_string(),
            Outcome::Protected { .. } => ":innocent: The Light shines upon your enemy. :innocent:".to_string(),
            Outcome::Applied { record, subject_name } => {
                format!("Successfully muzzled {} for {}", subject_name, time_string(record.duration_ms))
            }
        }
    }
}

/// One suppression attempt.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub subject_id: &'a str,
    pub requestor_id: &'a str,
    pub team_id: &'a str,
    pub channel: &'a str,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub muzzle_min_ms: u64,
    pub muzzle_max_ms: u64,
    pub backfire_base_chance: f64,
    pub backfire_step_chance: f64,
    pub backfire_lookback: Duration,
    pub counter_reversal_ms: u64,
    pub probation_ms: u64,
}

impl From<&Config> for EngineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            muzzle_min_ms: cfg.muzzle_min_ms,
            muzzle_max_ms: cfg.muzzle_max_ms,
            backfire_base_chance: cfg.backfire_base_chance,
            backfire_step_chance: cfg.backfire_step_chance,
            backfire_lookback: Duration::from_secs(cfg.backfire_lookback_secs),
            counter_reversal_ms: cfg.counter_reversal_ms,
            probation_ms: cfg.probation_ms,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Everything the rules read from or write to.
pub struct EngineContext {
    pub state: Arc<SuppressionStateStore>,
    pub throttle: Arc<RequestorThrottle>,
    pub wards: Arc<CounterGuard>,
    pub ledger: Arc<dyn SuppressionLedger>,
    pub items: Arc<dyn ItemModifierResolver>,
    pub identity: Arc<dyn Identity>,
    pub messaging: Arc<dyn Messaging>,
    pub dice: Arc<Dice>,
    pub settings: EngineSettings,
}

impl EngineContext {
    /// Base random duration plus `user_id`'s active time modifiers.
    pub async fn roll_duration(&self, user_id: &str, team_id: &str) -> Result<u64> {
        let base = self.dice.between(self.settings.muzzle_min_ms, self.settings.muzzle_max_ms);
        let extra = self.items.active_time_modifiers(user_id, team_id).await?;
        Ok(base.saturating_add(extra))
    }

    /// Persist the audit row, then make it live.
    pub async fn create_active(&self, new: NewSuppression) -> Result<SuppressionRecord> {
        let record = self.ledger.create(&new)?;
        self.state.activate(&record).await?;
        Ok(record)
    }

    /// Channel notices are best-effort.
    pub async fn notify(&self, channel: &str, text: &str) {
        if let Err(e) = self.messaging.post_message(channel, text).await {
            log_swallowed(Domain::Engine, "post_message", &e);
        }
    }

    pub async fn subject_name(&self, subject_id: &str, team_id: &str) -> Result<String> {
        Ok(self
            .identity
            .display_name(subject_id, team_id)
            .await?
            .unwrap_or_else(|| format!("<@{}>", subject_id)))
    }
}

pub struct DecisionEngine {
    ctx: EngineContext,
    rules: Vec<Box<dyn Rule>>,
}

impl DecisionEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx, rules: rules::default_rules() }
    }

    pub fn with_rules(ctx: EngineContext, rules: Vec<Box<dyn Rule>>) -> Self {
        Self { ctx, rules }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub async fn apply(&self, subject_id: &str, requestor_id: &str, team_id: &str, channel: &str) -> Result<Outcome> {
        let attempt = Attempt { subject_id, requestor_id, team_id, channel };
        for rule in &self.rules {
            let Some(trigger) = rule.matches(&self.ctx, &attempt).await? else {
                continue;
            };
            let outcome = rule.apply(&self.ctx, &attempt, trigger).await?;
            log_outcome(subject_id, requestor_id, team_id, rule.name(), outcome.as_str());
            return Ok(outcome);
        }
        log(
            Level::Error,
            Domain::Engine,
            "no_rule_matched",
            obj(&[("subject_id", v_str(subject_id)), ("requestor_id", v_str(requestor_id))]),
        );
        Err(anyhow!("no rule matched attempt on {}", subject_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classes() {
        assert_eq!(Rejection::InvalidTarget.class(), RejectionClass::Validation);
        assert_eq!(Rejection::SelfTarget.class(), RejectionClass::Validation);
        assert_eq!(Rejection::RateLimited { cap: 2 }.class(), RejectionClass::Conflict);
        assert_eq!(Rejection::IssuerSuppressed.class(), RejectionClass::Conflict);
    }

    #[test]
    fn test_user_strings() {
        assert_eq!(
            Rejection::AlreadySuppressed { subject_name: "jrjrjr".to_string() }.to_string(),
            "jrjrjr is already muzzled!"
        );
        assert_eq!(
            Rejection::RateLimited { cap: 2 }.to_string(),
            "You're doing that too much. Only 2 muzzles are allowed per hour."
        );
    }
}
