//! Untimed suppression for members copying someone else's display name.

use anyhow::Result;
use std::sync::Arc;

use crate::ledger::SuppressionLedger;
use crate::logging::{log, log_swallowed, obj, v_str, Domain, Level};
use crate::model::{NewSuppression, SuppressionKind, SuppressionRecord};
use crate::ports::{Identity, Messaging};
use crate::state_store::SuppressionStateStore;

pub const IMPERSONATION_ISSUER: &str = "perma-muzzle";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpersonationChange {
    Suppressed { record: SuppressionRecord, victim_id: String },
    Lifted,
    Unchanged,
}

pub struct ImpersonationGuard {
    state: Arc<SuppressionStateStore>,
    ledger: Arc<dyn SuppressionLedger>,
    identity: Arc<dyn Identity>,
    messaging: Arc<dyn Messaging>,
    general_channel: String,
}

impl ImpersonationGuard {
    pub fn new(
        state: Arc<SuppressionStateStore>,
        ledger: Arc<dyn SuppressionLedger>,
        identity: Arc<dyn Identity>,
        messaging: Arc<dyn Messaging>,
        general_channel: &str,
    ) -> Self {
        Self { state, ledger, identity, messaging, general_channel: general_channel.to_string() }
    }

    pub async fn on_profile_rename(&self, user_id: &str, team_id: &str) -> Result<ImpersonationChange> {
        let victim = self.identity.impersonated_user(user_id, team_id).await?;
        let active = self.state.active(user_id, team_id).await?;
        let already = active.as_ref().map(|a| a.kind) == Some(SuppressionKind::Impersonation);

        let Some(victim_id) = victim else {
            if already && self.state.revoke_kind(SuppressionKind::Impersonation, user_id, team_id).await? {
                log(
                    Level::Info,
                    Domain::Engine,
                    "impersonation_lifted",
                    obj(&[("subject_id", v_str(user_id)), ("team_id", v_str(team_id))]),
                );
                return Ok(ImpersonationChange::Lifted);
            }
            return Ok(ImpersonationChange::Unchanged);
        };
        if already {
            return Ok(ImpersonationChange::Unchanged);
        }

        // Supersedes whatever timed record is running.
        if let Some(timed) = active {
            self.state.revoke_kind(timed.kind, user_id, team_id).await?;
        }
        let record = self.ledger.create(&NewSuppression {
            subject_id: user_id.to_string(),
            team_id: team_id.to_string(),
            kind: SuppressionKind::Impersonation,
            issuer_id: IMPERSONATION_ISSUER.to_string(),
            duration_ms: 0,
        })?;
        self.state.activate(&record).await?;

        let notice = format!(
            ":cop: <@{}> is impersonating <@{}>! They are now muzzled until they assume their normal identity. :cop:",
            user_id, victim_id
        );
        if let Err(e) = self.messaging.post_message(&self.general_channel, &notice).await {
            log_swallowed(Domain::Engine, "post_message", &e);
        }
        log(
            Level::Info,
            Domain::Engine,
            "impersonation_suppressed",
            obj(&[
                ("subject_id", v_str(user_id)),
                ("team_id", v_str(team_id)),
                ("victim_id", v_str(&victim_id)),
            ]),
        );
        Ok(ImpersonationChange::Suppressed { record, victim_id })
    }
}
