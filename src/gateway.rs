//! Per-message policy for suppressed authors.
//!
//! ```text
//! message ──► active? ──no──► Ignored
//!               │ (read error ──► FailedOpen)
//!               ▼ yes
//!          tag attempt? ──yes──► delete, extend, notice          (Abuse)
//!               │
//!               ▼ no
//!          under quota? ──yes──► delete, repost redacted         (Redacted)
//!               │
//!               ▼ no
//!          delete, count only                                    (Dropped)
//! ```

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::logging::{log, log_swallowed, obj, v_str, Domain, Level};
use crate::model::{time_string, ActiveSuppression};
use crate::ports::{mention_ids, Identity, Messaging};
use crate::redactor::{contains_broadcast, MessageRedactor};
use crate::retry::{delete_with_retry, DeleteOutcome, RetryConfig};
use crate::state_store::SuppressionStateStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Plain,
    TopicChange,
    /// Any other message subtype (edits, file shares, ...).
    Other(String),
}

impl MessageKind {
    pub fn from_subtype(subtype: Option<&str>) -> Self {
        match subtype {
            None | Some("") => MessageKind::Plain,
            Some("channel_topic") => MessageKind::TopicChange,
            Some(other) => MessageKind::Other(other.to_string()),
        }
    }

    /// Plain posts and topic changes are where a tag reaches people.
    pub fn is_tag_attempt(&self) -> bool {
        matches!(self, MessageKind::Plain | MessageKind::TopicChange)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user_id: String,
    pub team_id: String,
    pub channel: String,
    pub text: String,
    pub message_id: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotMessage {
    pub bot_name: Option<String>,
    pub author_id: String,
    pub team_id: String,
    pub channel: String,
    pub text: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayAction {
    Ignored,
    Abuse,
    Redacted,
    Dropped,
    /// The suppression check could not be made; the message was left alone.
    FailedOpen,
}

impl GatewayAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayAction::Ignored => "ignored",
            GatewayAction::Abuse => "abuse",
            GatewayAction::Redacted => "redacted",
            GatewayAction::Dropped => "dropped",
            GatewayAction::FailedOpen => "failed_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub redaction_quota: u32,
    pub abuse_penalty: Duration,
    pub bot_name: String,
    pub retry: RetryConfig,
}

pub struct SuppressionMessageGateway {
    state: Arc<SuppressionStateStore>,
    redactor: Arc<MessageRedactor>,
    messaging: Arc<dyn Messaging>,
    identity: Arc<dyn Identity>,
    settings: GatewaySettings,
}

impl SuppressionMessageGateway {
    pub fn new(
        state: Arc<SuppressionStateStore>,
        redactor: Arc<MessageRedactor>,
        messaging: Arc<dyn Messaging>,
        identity: Arc<dyn Identity>,
        settings: GatewaySettings,
    ) -> Self {
        Self { state, redactor, messaging, identity, settings }
    }

    /// Fire-and-forget variant of [`on_message`](Self::on_message).
    pub fn spawn(self: &Arc<Self>, msg: IncomingMessage) -> JoinHandle<GatewayAction> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.on_message(&msg).await })
    }

    /// Fire-and-forget variant of [`on_bot_message`](Self::on_bot_message).
    pub fn spawn_bot(self: &Arc<Self>, msg: BotMessage) -> JoinHandle<GatewayAction> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.on_bot_message(&msg).await })
    }

    pub async fn on_message(&self, msg: &IncomingMessage) -> GatewayAction {
        let active = match self.state.active(&msg.user_id, &msg.team_id).await {
            Ok(Some(active)) => active,
            Ok(None) => return GatewayAction::Ignored,
            Err(e) => {
                log(
                    Level::Warn,
                    Domain::Gateway,
                    "fail_open",
                    obj(&[
                        ("subject_id", v_str(&msg.user_id)),
                        ("team_id", v_str(&msg.team_id)),
                        ("error", v_str(&format!("{:#}", e))),
                    ]),
                );
                return GatewayAction::FailedOpen;
            }
        };

        let action = match self.enforce(msg, &active).await {
            Ok(action) => action,
            Err(e) => {
                log_swallowed(Domain::Gateway, "enforce", &e);
                GatewayAction::FailedOpen
            }
        };
        log(
            Level::Info,
            Domain::Gateway,
            "message",
            obj(&[
                ("subject_id", v_str(&msg.user_id)),
                ("team_id", v_str(&msg.team_id)),
                ("record_id", serde_json::json!(active.record_id)),
                ("action", v_str(action.as_str())),
            ]),
        );
        action
    }

    async fn enforce(&self, msg: &IncomingMessage, active: &ActiveSuppression) -> Result<GatewayAction> {
        let tagged = self.contains_forced_token(&msg.text, &msg.team_id).await;

        if tagged && msg.kind.is_tag_attempt() {
            self.delete(&msg.channel, &msg.message_id, &msg.user_id).await;
            let extended = match self.state.extend_time(&msg.user_id, &msg.team_id, self.settings.abuse_penalty).await {
                Ok(extended) => extended,
                Err(e) => {
                    log_swallowed(Domain::State, "extend_time", &e);
                    None
                }
            };
            self.redactor.track_deleted(&msg.text, active.record_id);
            if extended.is_some() {
                let notice = format!(
                    ":rotating_light: <@{}> attempted to @ while muzzled or change the channel topic! Muzzle increased by {} :rotating_light:",
                    msg.user_id,
                    time_string(self.settings.abuse_penalty.as_millis() as u64),
                );
                self.post(&msg.channel, &notice).await;
            }
            return Ok(GatewayAction::Abuse);
        }

        if tagged {
            self.delete(&msg.channel, &msg.message_id, &msg.user_id).await;
            self.redactor.track_deleted(&msg.text, active.record_id);
            return Ok(GatewayAction::Dropped);
        }

        let in_flight = self.state.redactions_in_flight(active).await?;
        self.delete(&msg.channel, &msg.message_id, &msg.user_id).await;
        if in_flight < self.settings.redaction_quota {
            self.state.increment_in_flight(active).await?;
            let redaction = self.redactor.redact(&msg.text, active.record_id);
            self.post(&msg.channel, &format!("<@{}> says \"{}\"", msg.user_id, redaction.output))
                .await;
            Ok(GatewayAction::Redacted)
        } else {
            self.redactor.track_deleted(&msg.text, active.record_id);
            Ok(GatewayAction::Dropped)
        }
    }

    /// Delete a foreign bot's post that names a suppressed user.
    pub async fn on_bot_message(&self, msg: &BotMessage) -> GatewayAction {
        if msg.bot_name.as_deref() == Some(self.settings.bot_name.as_str()) {
            return GatewayAction::Ignored;
        }
        for user_id in mention_ids(&msg.text) {
            let active = match self.state.active(&user_id, &msg.team_id).await {
                Ok(Some(active)) => active,
                Ok(None) => continue,
                Err(e) => {
                    log_swallowed(Domain::Gateway, "bot_message_check", &e);
                    return GatewayAction::FailedOpen;
                }
            };
            self.delete(&msg.channel, &msg.message_id, &msg.author_id).await;
            self.redactor.track_deleted(&msg.text, active.record_id);
            log(
                Level::Info,
                Domain::Gateway,
                "bot_message_dropped",
                obj(&[
                    ("subject_id", v_str(&user_id)),
                    ("team_id", v_str(&msg.team_id)),
                    ("bot_name", v_str(msg.bot_name.as_deref().unwrap_or_default())),
                ]),
            );
            return GatewayAction::Dropped;
        }
        GatewayAction::Ignored
    }

    async fn contains_forced_token(&self, text: &str, team_id: &str) -> bool {
        if contains_broadcast(text) {
            return true;
        }
        match self.identity.resolve_mention_ids(text, team_id).await {
            Ok(ids) => !ids.is_empty(),
            Err(e) => {
                // Unresolvable directory: any mention markup counts.
                log_swallowed(Domain::Gateway, "resolve_mention_ids", &e);
                !mention_ids(text).is_empty()
            }
        }
    }

    async fn delete(&self, channel: &str, message_id: &str, author_id: &str) -> DeleteOutcome {
        delete_with_retry(self.messaging.as_ref(), &self.settings.retry, channel, message_id, author_id).await
    }

    async fn post(&self, channel: &str, text: &str) {
        if let Err(e) = self.messaging.post_message(channel, text).await {
            log_swallowed(Domain::Gateway, "post_message", &e);
        }
    }
}
