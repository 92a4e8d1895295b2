use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use muzzle_engine::config::Config;
use muzzle_engine::dice::Dice;
use muzzle_engine::gateway::GatewayAction;
use muzzle_engine::inventory::{ItemCatalog, StoreItemResolver};
use muzzle_engine::ledger::SqliteLedger;
use muzzle_engine::logging::{log, log_swallowed, obj, v_str, Domain, Level};
use muzzle_engine::service::{Collaborators, SuppressionService};
use muzzle_engine::slack::{EventRouter, RouteResult, SlackClient, Verifier};
use muzzle_engine::store::{EphemeralStore, MemoryStore};

#[cfg(feature = "redis-store")]
async fn open_store(cfg: &Config) -> Result<Arc<dyn EphemeralStore>> {
    match &cfg.redis_url {
        Some(url) => Ok(Arc::new(muzzle_engine::store::RedisStore::connect(url).await?)),
        None => Ok(Arc::new(MemoryStore::default())),
    }
}

#[cfg(not(feature = "redis-store"))]
async fn open_store(cfg: &Config) -> Result<Arc<dyn EphemeralStore>> {
    if cfg.redis_url.is_some() {
        log(
            Level::Warn,
            Domain::System,
            "redis_unavailable",
            obj(&[("msg", v_str("built without redis-store; using in-process store"))]),
        );
    }
    Ok(Arc::new(MemoryStore::default()))
}

fn reply(text: &str) {
    println!("{}", json!({ "reply": text }));
}

/// `/muzzle <requestor> <subject> <team> <channel>` or
/// `/counter <warder> <blocked> <team>`.
async fn run_command(service: &SuppressionService, line: &str) -> Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["/muzzle", requestor, subject, team, channel] => {
            reply(&service.apply_suppression(subject, requestor, team, channel).await);
            Ok(())
        }
        ["/counter", warder, blocked, team] => {
            reply(&service.register_counter(warder, blocked, team).await);
            Ok(())
        }
        _ => Err(anyhow!("unrecognized command: {}", line)),
    }
}

/// A bare event body, or `{"timestamp", "signature", "body"}` when signed.
/// Message events come back as a handle to their background task.
async fn run_event(router: &EventRouter, line: &str) -> Result<Option<JoinHandle<GatewayAction>>> {
    let value: Value = serde_json::from_str(line)?;
    let signed = (
        value.get("timestamp").and_then(Value::as_str),
        value.get("signature").and_then(Value::as_str),
        value.get("body").and_then(Value::as_str),
    );
    let result = match signed {
        (Some(ts), Some(sig), Some(body)) => router.route_signed(ts, sig, body).await?,
        _ => router.route(serde_json::from_value(value)?).await?,
    };
    match result {
        RouteResult::Challenge(challenge) => {
            println!("{}", json!({ "challenge": challenge }));
            Ok(None)
        }
        RouteResult::Dispatched(handle) => Ok(Some(handle)),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let ledger = Arc::new(SqliteLedger::new(&cfg.sqlite_path)?);
    ledger.init()?;
    let store = open_store(&cfg).await?;
    let dice = Arc::new(Dice::from_entropy());
    let slack = Arc::new(SlackClient::from_config(&cfg)?);
    let items = Arc::new(StoreItemResolver::new(store.clone(), ItemCatalog::default(), dice.clone()));

    let service = Arc::new(SuppressionService::new(
        &cfg,
        Collaborators {
            store,
            ledger,
            messaging: slack.clone(),
            identity: slack,
            items,
            dice,
        },
    ));
    let mut router = EventRouter::new(service.clone());
    if let Some(secret) = &cfg.slack_signing_secret {
        router = router.with_verifier(Verifier {
            signing_secret: secret.clone(),
            max_age_secs: cfg.signature_max_age_secs,
        });
    }

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("general_channel", v_str(&cfg.general_channel)),
            ("signed", serde_json::Value::Bool(cfg.slack_signing_secret.is_some())),
        ]),
    );

    let mut in_flight: Vec<JoinHandle<GatewayAction>> = Vec::new();
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        in_flight.retain(|h| !h.is_finished());
        let result = if line.starts_with('/') {
            run_command(&service, line).await
        } else {
            run_event(&router, line).await.map(|handle| in_flight.extend(handle))
        };
        if let Err(e) = result {
            log_swallowed(Domain::System, "input_line", &e);
        }
    }

    // Let pending deletes and reposts finish before exiting.
    for handle in in_flight {
        if let Err(e) = handle.await {
            log_swallowed(Domain::System, "message_task", &anyhow!(e));
        }
    }

    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}
