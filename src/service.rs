//! Front door wiring every component once from [`Config`].

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::dice::Dice;
use crate::engine::{DecisionEngine, EngineContext, EngineSettings, Outcome, MUZZLE_FAILED};
use crate::gateway::{BotMessage, GatewayAction, GatewaySettings, IncomingMessage, SuppressionMessageGateway};
use crate::impersonation::{ImpersonationChange, ImpersonationGuard};
use crate::inventory::ItemModifierResolver;
use crate::ledger::SuppressionLedger;
use crate::logging::{log_swallowed, Domain};
use crate::model::{time_string, ActiveSuppression};
use crate::ports::{Identity, Messaging};
use crate::redactor::MessageRedactor;
use crate::retry::RetryConfig;
use crate::state_store::SuppressionStateStore;
use crate::store::EphemeralStore;
use crate::throttle::RequestorThrottle;
use crate::wards::{CounterGuard, WardRegistration};

pub const COUNTER_INVALID_USER: &str = "Invalid user. Only existing slack users can counter.";
pub const COUNTER_DUPLICATE: &str = "You already have a counter for this user.";
pub const COUNTER_FAILED: &str = "Counter failed!";

/// The shared resources and external collaborators.
pub struct Collaborators {
    pub store: Arc<dyn EphemeralStore>,
    pub ledger: Arc<dyn SuppressionLedger>,
    pub messaging: Arc<dyn Messaging>,
    pub identity: Arc<dyn Identity>,
    pub items: Arc<dyn ItemModifierResolver>,
    pub dice: Arc<Dice>,
}

pub struct SuppressionService {
    engine: DecisionEngine,
    gateway: Arc<SuppressionMessageGateway>,
    state: Arc<SuppressionStateStore>,
    wards: Arc<CounterGuard>,
    impersonation: ImpersonationGuard,
    identity: Arc<dyn Identity>,
}

impl SuppressionService {
    pub fn new(cfg: &Config, c: Collaborators) -> Self {
        let state = Arc::new(SuppressionStateStore::new(c.store.clone(), c.ledger.clone()));
        let throttle = Arc::new(RequestorThrottle::new(
            c.store.clone(),
            cfg.max_issuances,
            cfg.issuance_window(),
            cfg.probation(),
        ));
        let wards = Arc::new(CounterGuard::new(c.store.clone(), c.ledger.clone(), cfg.counter_window()));
        let redactor = Arc::new(MessageRedactor::new(
            c.ledger.clone(),
            c.dice.clone(),
            cfg.max_word_length,
            &cfg.placeholder,
        ));
        let gateway = Arc::new(SuppressionMessageGateway::new(
            state.clone(),
            redactor,
            c.messaging.clone(),
            c.identity.clone(),
            GatewaySettings {
                redaction_quota: cfg.redaction_quota,
                abuse_penalty: cfg.abuse_penalty(),
                bot_name: cfg.bot_name.clone(),
                retry: RetryConfig { max_retries: cfg.delete_max_retries, backoff_ms: cfg.delete_backoff_ms },
            },
        ));
        let impersonation = ImpersonationGuard::new(
            state.clone(),
            c.ledger.clone(),
            c.identity.clone(),
            c.messaging.clone(),
            &cfg.general_channel,
        );
        let engine = DecisionEngine::new(EngineContext {
            state: state.clone(),
            throttle,
            wards: wards.clone(),
            ledger: c.ledger,
            items: c.items,
            identity: c.identity.clone(),
            messaging: c.messaging,
            dice: c.dice,
            settings: EngineSettings::from(cfg),
        });
        Self { engine, gateway, state, wards, impersonation, identity: c.identity }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn gateway(&self) -> &Arc<SuppressionMessageGateway> {
        &self.gateway
    }

    pub fn state(&self) -> &Arc<SuppressionStateStore> {
        &self.state
    }

    /// Resolve an attempt and render the reply line.
    pub async fn apply_suppression(&self, subject_id: &str, requestor_id: &str, team_id: &str, channel: &str) -> String {
        match self.apply_outcome(subject_id, requestor_id, team_id, channel).await {
            Ok(outcome) => outcome.message(),
            Err(_) => MUZZLE_FAILED.to_string(),
        }
    }

    pub async fn apply_outcome(&self, subject_id: &str, requestor_id: &str, team_id: &str, channel: &str) -> Result<Outcome> {
        self.engine
            .apply(subject_id, requestor_id, team_id, channel)
            .await
            .inspect_err(|e| log_swallowed(Domain::Engine, "apply", e))
    }

    /// `warder` arms a one-shot reversal against `blocked`'s next attempt.
    pub async fn register_counter(&self, warder_id: &str, blocked_id: &str, team_id: &str) -> String {
        match self.identity.display_name(blocked_id, team_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return COUNTER_INVALID_USER.to_string(),
            Err(e) => {
                log_swallowed(Domain::Ward, "display_name", &e);
                return COUNTER_FAILED.to_string();
            }
        }
        match self.wards.register(warder_id, blocked_id, team_id).await {
            Ok(WardRegistration::Registered { window, .. }) => {
                format!("Counter set for the next {}", time_string(window.as_millis() as u64))
            }
            Ok(WardRegistration::AlreadyWarded) => COUNTER_DUPLICATE.to_string(),
            Err(e) => {
                log_swallowed(Domain::Ward, "register", &e);
                COUNTER_FAILED.to_string()
            }
        }
    }

    pub async fn on_incoming_message(&self, msg: &IncomingMessage) -> GatewayAction {
        self.gateway.on_message(msg).await
    }

    pub async fn on_bot_message(&self, msg: &BotMessage) -> GatewayAction {
        self.gateway.on_bot_message(msg).await
    }

    pub async fn on_profile_rename(&self, user_id: &str, team_id: &str) -> Result<ImpersonationChange> {
        self.impersonation.on_profile_rename(user_id, team_id).await
    }

    /// Lift whatever is active on `subject_id`. Durable history is untouched.
    pub async fn revoke(&self, subject_id: &str, team_id: &str) -> Result<Option<ActiveSuppression>> {
        self.state.revoke(subject_id, team_id).await
    }

    /// Remaining time on the subject's active suppression, if it has one.
    pub async fn remaining(&self, subject_id: &str, team_id: &str) -> Result<Option<Duration>> {
        Ok(self.state.remaining(subject_id, team_id).await?.remaining())
    }
}
