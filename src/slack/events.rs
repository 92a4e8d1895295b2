//! Events API envelopes and their dispatch into the engine.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::signing::verify_request;
use crate::gateway::{BotMessage, GatewayAction, IncomingMessage, MessageKind};
use crate::impersonation::ImpersonationChange;
use crate::logging::{log, obj, ts_epoch_ms, v_str, Domain, Level};
use crate::service::SuppressionService;

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        team_id: String,
        event: SlackEvent,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BotProfile {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: Option<String>,
    /// A user id on messages, a full user object on profile events.
    pub user: Option<Value>,
    pub text: Option<String>,
    pub ts: Option<String>,
    pub channel: Option<String>,
    pub bot_id: Option<String>,
    pub bot_profile: Option<BotProfile>,
    pub username: Option<String>,
}

impl SlackEvent {
    pub fn user_id(&self) -> Option<&str> {
        match self.user.as_ref()? {
            Value::String(id) => Some(id),
            Value::Object(user) => user.get("id").and_then(Value::as_str),
            _ => None,
        }
    }

    fn bot_name(&self) -> Option<String> {
        self.bot_profile
            .as_ref()
            .map(|p| p.name.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| self.username.clone())
    }
}

#[derive(Debug)]
pub enum RouteResult {
    Challenge(String),
    /// Message handling runs on its own task; the handle yields its action.
    Dispatched(JoinHandle<GatewayAction>),
    Impersonation(ImpersonationChange),
    Ignored,
}

/// Optional request authentication.
#[derive(Debug, Clone)]
pub struct Verifier {
    pub signing_secret: String,
    pub max_age_secs: u64,
}

pub struct EventRouter {
    service: Arc<SuppressionService>,
    verifier: Option<Verifier>,
}

impl EventRouter {
    pub fn new(service: Arc<SuppressionService>) -> Self {
        Self { service, verifier: None }
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Check the signature headers, then route. Without a verifier, routes as is.
    pub async fn route_signed(&self, timestamp: &str, signature: &str, body: &str) -> Result<RouteResult> {
        if let Some(v) = &self.verifier {
            let now = (ts_epoch_ms() / 1000) as i64;
            verify_request(&v.signing_secret, timestamp, body, signature, now, v.max_age_secs)?;
        }
        self.route_json(body).await
    }

    pub async fn route_json(&self, body: &str) -> Result<RouteResult> {
        let envelope: Envelope = serde_json::from_str(body)?;
        self.route(envelope).await
    }

    pub async fn route(&self, envelope: Envelope) -> Result<RouteResult> {
        match envelope {
            Envelope::UrlVerification { challenge } => Ok(RouteResult::Challenge(challenge)),
            Envelope::EventCallback { team_id, event } => self.route_event(&team_id, event).await,
            Envelope::Unsupported => Ok(RouteResult::Ignored),
        }
    }

    async fn route_event(&self, team_id: &str, event: SlackEvent) -> Result<RouteResult> {
        log(
            Level::Trace,
            Domain::Slack,
            "event",
            obj(&[("team_id", v_str(team_id)), ("kind", v_str(&event.kind))]),
        );
        match event.kind.as_str() {
            "message" => Ok(self.route_message(team_id, event)),
            "user_change" | "user_profile_changed" => {
                let user_id = event.user_id().ok_or_else(|| anyhow!("profile event without user id"))?;
                let change = self.service.on_profile_rename(user_id, team_id).await?;
                Ok(RouteResult::Impersonation(change))
            }
            _ => Ok(RouteResult::Ignored),
        }
    }

    /// Hands the message to the gateway on its own task and returns at once.
    fn route_message(&self, team_id: &str, event: SlackEvent) -> RouteResult {
        let (Some(channel), Some(ts)) = (event.channel.clone(), event.ts.clone()) else {
            return RouteResult::Ignored;
        };
        let text = event.text.clone().unwrap_or_default();

        if let Some(bot_id) = &event.bot_id {
            let msg = BotMessage {
                bot_name: event.bot_name(),
                author_id: event.user_id().unwrap_or(bot_id).to_string(),
                team_id: team_id.to_string(),
                channel,
                text,
                message_id: ts,
            };
            return RouteResult::Dispatched(self.service.gateway().spawn_bot(msg));
        }

        let Some(user_id) = event.user_id() else {
            return RouteResult::Ignored;
        };
        let msg = IncomingMessage {
            user_id: user_id.to_string(),
            team_id: team_id.to_string(),
            channel,
            text,
            message_id: ts,
            kind: MessageKind::from_subtype(event.subtype.as_deref()),
        };
        RouteResult::Dispatched(self.service.gateway().spawn(msg))
    }
}
