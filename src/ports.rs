//! Collaborators the engine talks to but does not own.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Returned (inside `anyhow::Error`) when the message to delete is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageNotFound;

impl fmt::Display for MessageNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("message_not_found")
    }
}

impl std::error::Error for MessageNotFound {}

pub fn is_message_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<MessageNotFound>().is_some()
}

/// Returned (inside `anyhow::Error`) when a user lookup names nobody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserNotFound;

impl fmt::Display for UserNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("user_not_found")
    }
}

impl std::error::Error for UserNotFound {}

pub fn is_user_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<UserNotFound>().is_some()
}

#[async_trait]
pub trait Messaging: Send + Sync {
    async fn delete_message(&self, channel: &str, message_id: &str, author_id: &str) -> Result<()>;
    async fn post_message(&self, channel: &str, text: &str) -> Result<()>;
    async fn post_ephemeral(&self, channel: &str, text: &str, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait Identity: Send + Sync {
    /// Ids of users mentioned in `text` that resolve to real members.
    async fn resolve_mention_ids(&self, text: &str, team_id: &str) -> Result<Vec<String>>;
    async fn is_bot(&self, user_id: &str, team_id: &str) -> Result<bool>;
    /// `None` when the user cannot be resolved.
    async fn display_name(&self, user_id: &str, team_id: &str) -> Result<Option<String>>;
    /// Another member whose display name `user_id` is currently copying.
    async fn impersonated_user(&self, user_id: &str, team_id: &str) -> Result<Option<String>>;
}

/// Extract the raw ids from `<@U123>` / `<@U123|name>` mention markup.
pub fn mention_ids(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('>') else { break };
        let inner = &after[..end];
        let id = inner.split('|').next().unwrap_or_default();
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()) && !ids.iter().any(|x| x == id) {
            ids.push(id.to_string());
        }
        rest = &after[end + 1..];
    }
    ids
}

/// Whether a single token looks like user-mention markup at all.
pub fn is_mention_token(token: &str) -> bool {
    !mention_ids(token).is_empty()
}
