//! Ordered precedence rules for a suppression attempt.
//!
//! | # | Rule                  | Outcome            |
//! |---|-----------------------|--------------------|
//! | 1 | target is a bot       | Reject (validation)|
//! | 2 | target unresolvable   | Reject (validation)|
//! | 3 | target is requestor   | Reject (validation)|
//! | 4 | target suppressed     | Reject (conflict)  |
//! | 5 | requestor suppressed  | Reject (conflict)  |
//! | 6 | ward blocks requestor | Reversed           |
//! | 7 | backfire roll         | Backfired          |
//! | 8 | target protected      | Protected          |
//! | 9 | requestor throttled   | Reject (conflict)  |
//! | 10| default               | Applied            |

use anyhow::Result;
use async_trait::async_trait;

use super::{Attempt, EngineContext, Outcome, Rejection};
use crate::inventory::EffectToken;
use crate::logging::{log, log_swallowed, obj, ts_epoch_ms, v_num, v_str, Domain, Level};
use crate::model::{time_string, NewSuppression, SuppressionKind};
use crate::throttle::ThrottleBlock;
use crate::wards::Ward;

/// What a matching predicate found, handed to the same rule's effect.
#[derive(Debug, Clone)]
pub enum Trigger {
    Reject(Rejection),
    Ward(Ward),
    Backfire,
    Defensive(EffectToken),
    Default,
}

#[async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    async fn matches(&self, ctx: &EngineContext, attempt: &Attempt<'_>) -> Result<Option<Trigger>>;
    async fn apply(&self, ctx: &EngineContext, attempt: &Attempt<'_>, trigger: Trigger) -> Result<Outcome>;
}

pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(TargetIsBot),
        Box::new(TargetUnresolvable),
        Box::new(TargetIsRequestor),
        Box::new(TargetSuppressed),
        Box::new(RequestorSuppressed),
        Box::new(CounterWard),
        Box::new(BackfireRoll),
        Box::new(DefensiveItem),
        Box::new(RequestorThrottled),
        Box::new(ApplyMuzzle),
    ]
}

/// Shared effect for the pure rejection rules.
async fn reject(trigger: Trigger) -> Result<Outcome> {
    match trigger {
        Trigger::Reject(r) => Ok(Outcome::Reject(r)),
        other => Err(anyhow::anyhow!("rejection rule fired with {:?}", other)),
    }
}

// =============================================================================
// Validation
// =============================================================================

pub struct TargetIsBot;

#[async_trait]
impl Rule for TargetIsBot {
    fn name(&self) -> &'static str {
        "target_is_bot"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        let bot = ctx.identity.is_bot(a.subject_id, a.team_id).await?;
        Ok(bot.then_some(Trigger::Reject(Rejection::TargetIsBot)))
    }

    async fn apply(&self, _: &EngineContext, _: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        reject(t).await
    }
}

pub struct TargetUnresolvable;

#[async_trait]
impl Rule for TargetUnresolvable {
    fn name(&self) -> &'static str {
        "target_unresolvable"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        if a.subject_id.trim().is_empty() {
            return Ok(Some(Trigger::Reject(Rejection::InvalidTarget)));
        }
        let name = ctx.identity.display_name(a.subject_id, a.team_id).await?;
        Ok(name.is_none().then_some(Trigger::Reject(Rejection::InvalidTarget)))
    }

    async fn apply(&self, _: &EngineContext, _: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        reject(t).await
    }
}

pub struct TargetIsRequestor;

#[async_trait]
impl Rule for TargetIsRequestor {
    fn name(&self) -> &'static str {
        "target_is_requestor"
    }

    async fn matches(&self, _: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        Ok((a.subject_id == a.requestor_id).then_some(Trigger::Reject(Rejection::SelfTarget)))
    }

    async fn apply(&self, _: &EngineContext, _: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        reject(t).await
    }
}

// =============================================================================
// Conflicts with live state
// =============================================================================

pub struct TargetSuppressed;

#[async_trait]
impl Rule for TargetSuppressed {
    fn name(&self) -> &'static str {
        "target_suppressed"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        if !ctx.state.is_active(a.subject_id, a.team_id).await? {
            return Ok(None);
        }
        let subject_name = ctx.subject_name(a.subject_id, a.team_id).await?;
        Ok(Some(Trigger::Reject(Rejection::AlreadySuppressed { subject_name })))
    }

    async fn apply(&self, _: &EngineContext, _: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        reject(t).await
    }
}

pub struct RequestorSuppressed;

#[async_trait]
impl Rule for RequestorSuppressed {
    fn name(&self) -> &'static str {
        "requestor_suppressed"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        let active = ctx.state.is_active(a.requestor_id, a.team_id).await?;
        Ok(active.then_some(Trigger::Reject(Rejection::IssuerSuppressed)))
    }

    async fn apply(&self, _: &EngineContext, _: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        reject(t).await
    }
}

// =============================================================================
// Reversals
// =============================================================================

pub struct CounterWard;

#[async_trait]
impl Rule for CounterWard {
    fn name(&self) -> &'static str {
        "counter_ward"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        let ward = ctx.wards.find(a.subject_id, a.requestor_id, a.team_id).await?;
        Ok(ward.map(Trigger::Ward))
    }

    async fn apply(&self, ctx: &EngineContext, a: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        let ward = match t {
            Trigger::Ward(ward) => ward,
            other => return reject(other).await,
        };
        if !ctx.wards.consume(&ward).await? {
            // Another attempt spent the ward first and already reversed onto us.
            return Ok(Outcome::Reject(Rejection::IssuerSuppressed));
        }
        let record = ctx
            .create_active(NewSuppression {
                subject_id: a.requestor_id.to_string(),
                team_id: a.team_id.to_string(),
                kind: SuppressionKind::CounterReversal,
                issuer_id: a.subject_id.to_string(),
                duration_ms: ctx.settings.counter_reversal_ms,
            })
            .await?;
        ctx.throttle.place_on_probation(a.requestor_id, a.team_id).await?;
        let notice = format!(
            ":crossed_swords: <@{s}> successfully countered <@{r}>! <@{r}> has lost muzzle privileges for {h} hours and is muzzled for the next {t}! :crossed_swords:",
            s = a.subject_id,
            r = a.requestor_id,
            h = ctx.settings.probation_ms / 3_600_000,
            t = time_string(ctx.settings.counter_reversal_ms),
        );
        ctx.notify(a.channel, &notice).await;
        Ok(Outcome::Reversed { record })
    }
}

pub struct BackfireRoll;

impl BackfireRoll {
    /// Base chance plus a step per muzzle the requestor issued in the lookback.
    fn chance(ctx: &EngineContext, requestor_id: &str, team_id: &str) -> f64 {
        let since = ts_epoch_ms().saturating_sub(ctx.settings.backfire_lookback.as_millis() as u64) as i64;
        let recent = match ctx.ledger.count_issued_since(requestor_id, team_id, since) {
            Ok(n) => n,
            Err(e) => {
                log_swallowed(Domain::Ledger, "count_issued_since", &e);
                0
            }
        };
        (ctx.settings.backfire_base_chance + ctx.settings.backfire_step_chance * recent as f64).min(1.0)
    }
}

#[async_trait]
impl Rule for BackfireRoll {
    fn name(&self) -> &'static str {
        "backfire_roll"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        let p = Self::chance(ctx, a.requestor_id, a.team_id);
        let hit = ctx.dice.chance(p);
        log(
            Level::Debug,
            Domain::Engine,
            "backfire_roll",
            obj(&[
                ("requestor_id", v_str(a.requestor_id)),
                ("chance", v_num(p)),
                ("hit", serde_json::Value::Bool(hit)),
            ]),
        );
        Ok(hit.then_some(Trigger::Backfire))
    }

    async fn apply(&self, ctx: &EngineContext, a: &Attempt<'_>, _: Trigger) -> Result<Outcome> {
        let duration_ms = ctx.roll_duration(a.requestor_id, a.team_id).await?;
        let record = ctx
            .create_active(NewSuppression {
                subject_id: a.requestor_id.to_string(),
                team_id: a.team_id.to_string(),
                kind: SuppressionKind::Backfire,
                issuer_id: a.requestor_id.to_string(),
                duration_ms,
            })
            .await?;
        // A backfire still spends one of the requestor's issuances.
        ctx.throttle.record_issuance(a.requestor_id, a.team_id).await?;
        let notice = format!(
            ":boom: <@{}> attempted to muzzle <@{}> but it backfired! :boom:",
            a.requestor_id, a.subject_id
        );
        ctx.notify(a.channel, &notice).await;
        Ok(Outcome::Backfired { record })
    }
}

pub struct DefensiveItem;

#[async_trait]
impl Rule for DefensiveItem {
    fn name(&self) -> &'static str {
        "defensive_item"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        let effect = ctx.items.active_defensive_effect(a.subject_id, a.team_id).await?;
        Ok(effect.map(Trigger::Defensive))
    }

    async fn apply(&self, ctx: &EngineContext, a: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        let token = match t {
            Trigger::Defensive(token) => token,
            other => return reject(other).await,
        };
        let credited_id = ctx
            .items
            .consume_effect(&token)
            .await?
            .unwrap_or_else(|| a.subject_id.to_string());
        let duration_ms = ctx.roll_duration(&credited_id, a.team_id).await?;
        let record = ctx
            .create_active(NewSuppression {
                subject_id: a.requestor_id.to_string(),
                team_id: a.team_id.to_string(),
                kind: SuppressionKind::Muzzle,
                issuer_id: credited_id.clone(),
                duration_ms,
            })
            .await?;
        ctx.throttle.place_on_probation(a.requestor_id, a.team_id).await?;
        let notice = format!(
            ":innocent: <@{r}> attempted to muzzle <@{s}> but they were protected by a `Guardian Angel`. <@{r}> is now muzzled. :innocent:",
            r = a.requestor_id,
            s = a.subject_id,
        );
        ctx.notify(a.channel, &notice).await;
        Ok(Outcome::Protected { record, credited_id })
    }
}

// =============================================================================
// Issuance limits and the default path
// =============================================================================

pub struct RequestorThrottled;

#[async_trait]
impl Rule for RequestorThrottled {
    fn name(&self) -> &'static str {
        "requestor_throttled"
    }

    async fn matches(&self, ctx: &EngineContext, a: &Attempt<'_>) -> Result<Option<Trigger>> {
        let cap = ctx.throttle.max_issuances();
        Ok(match ctx.throttle.check(a.requestor_id, a.team_id).await? {
            Some(ThrottleBlock::AtCap { cap, .. }) => Some(Trigger::Reject(Rejection::RateLimited { cap })),
            Some(ThrottleBlock::OnProbation) => Some(Trigger::Reject(Rejection::RateLimited { cap })),
            None => None,
        })
    }

    async fn apply(&self, _: &EngineContext, _: &Attempt<'_>, t: Trigger) -> Result<Outcome> {
        reject(t).await
    }
}

pub struct ApplyMuzzle;

#[async_trait]
impl Rule for ApplyMuzzle {
    fn name(&self) -> &'static str {
        "apply_muzzle"
    }

    async fn matches(&self, _: &EngineContext, _: &Attempt<'_>) -> Result<Option<Trigger>> {
        Ok(Some(Trigger::Default))
    }

    async fn apply(&self, ctx: &EngineContext, a: &Attempt<'_>, _: Trigger) -> Result<Outcome> {
        let subject_name = ctx.subject_name(a.subject_id, a.team_id).await?;
        let duration_ms = ctx.roll_duration(a.requestor_id, a.team_id).await?;
        let record = ctx
            .create_active(NewSuppression {
                subject_id: a.subject_id.to_string(),
                team_id: a.team_id.to_string(),
                kind: SuppressionKind::Muzzle,
                issuer_id: a.requestor_id.to_string(),
                duration_ms,
            })
            .await?;
        ctx.throttle.record_issuance(a.requestor_id, a.team_id).await?;
        Ok(Outcome::Applied { record, subject_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let names: Vec<_> = default_rules().iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec![
                "target_is_bot",
                "target_unresolvable",
                "target_is_requestor",
                "target_suppressed",
                "requestor_suppressed",
                "counter_ward",
                "backfire_roll",
                "defensive_item",
                "requestor_throttled",
                "apply_muzzle",
            ]
        );
    }
}
