use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::ports::{is_user_not_found, mention_ids, Identity, MessageNotFound, Messaging, UserNotFound};

pub struct SlackClient {
    client: Client,
    base: String,
    token: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SlackProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: SlackProfile,
}

impl SlackUser {
    /// The name other members see.
    pub fn shown_name(&self) -> &str {
        if !self.profile.display_name.is_empty() {
            &self.profile.display_name
        } else if !self.profile.real_name.is_empty() {
            &self.profile.real_name
        } else {
            &self.name
        }
    }
}

#[derive(Deserialize, Debug)]
struct UserInfoResponse {
    user: SlackUser,
}

#[derive(Deserialize, Debug)]
struct UserListResponse {
    #[serde(default)]
    members: Vec<SlackUser>,
}

/// Unwrap the `{ok, error}` envelope every Web API method returns.
pub fn check_response(method: &str, body: Value) -> Result<Value> {
    if body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(body);
    }
    let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
    match error {
        "message_not_found" => return Err(anyhow::Error::new(MessageNotFound)),
        "user_not_found" => return Err(anyhow::Error::new(UserNotFound)),
        _ => {}
    }
    Err(anyhow!("{} failed: {}", method, error))
}

/// Another live member showing the same name as `user_id`.
pub fn find_impersonated(user_id: &str, members: &[SlackUser]) -> Option<String> {
    let me = members.iter().find(|m| m.id == user_id)?;
    let shown = me.shown_name().trim().to_lowercase();
    if shown.is_empty() {
        return None;
    }
    members
        .iter()
        .filter(|m| m.id != user_id && !m.deleted && !m.is_bot)
        .find(|m| m.shown_name().trim().to_lowercase() == shown)
        .map(|m| m.id.clone())
}

impl SlackClient {
    pub fn new(base: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let token = cfg.slack_token.as_deref().ok_or_else(|| anyhow!("SLACK_BOT_TOKEN not set"))?;
        Ok(Self::new(&cfg.slack_api_base, token))
    }

    async fn post(&self, method: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base, method);
        let resp = self.client.post(&url).bearer_auth(&self.token).json(&body).send().await?;
        let data: Value = resp.json().await?;
        check_response(method, data)
    }

    async fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.base, method);
        let resp = self.client.get(&url).bearer_auth(&self.token).query(query).send().await?;
        let data: Value = resp.json().await?;
        check_response(method, data)
    }

    async fn user(&self, user_id: &str) -> Result<Option<SlackUser>> {
        match self.get("users.info", &[("user", user_id)]).await {
            Ok(body) => Ok(Some(serde_json::from_value::<UserInfoResponse>(body)?.user)),
            Err(e) if is_user_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn members(&self) -> Result<Vec<SlackUser>> {
        let body = self.get("users.list", &[]).await?;
        Ok(serde_json::from_value::<UserListResponse>(body)?.members)
    }
}

#[async_trait]
impl Messaging for SlackClient {
    async fn delete_message(&self, channel: &str, message_id: &str, author_id: &str) -> Result<()> {
        self.post("chat.delete", json!({ "channel": channel, "ts": message_id })).await?;
        log(
            Level::Debug,
            Domain::Slack,
            "deleted",
            obj(&[("channel", v_str(channel)), ("author_id", v_str(author_id))]),
        );
        Ok(())
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        self.post("chat.postMessage", json!({ "channel": channel, "text": text })).await?;
        Ok(())
    }

    async fn post_ephemeral(&self, channel: &str, text: &str, user_id: &str) -> Result<()> {
        self.post("chat.postEphemeral", json!({ "channel": channel, "text": text, "user": user_id }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Identity for SlackClient {
    async fn resolve_mention_ids(&self, text: &str, _team_id: &str) -> Result<Vec<String>> {
        let mut resolved = Vec::new();
        for id in mention_ids(text) {
            if self.user(&id).await?.is_some() {
                resolved.push(id);
            }
        }
        Ok(resolved)
    }

    async fn is_bot(&self, user_id: &str, _team_id: &str) -> Result<bool> {
        Ok(self.user(user_id).await?.map(|u| u.is_bot).unwrap_or(false))
    }

    async fn display_name(&self, user_id: &str, _team_id: &str) -> Result<Option<String>> {
        Ok(self.user(user_id).await?.map(|u| u.shown_name().to_string()))
    }

    async fn impersonated_user(&self, user_id: &str, _team_id: &str) -> Result<Option<String>> {
        Ok(find_impersonated(user_id, &self.members().await?))
    }
}
