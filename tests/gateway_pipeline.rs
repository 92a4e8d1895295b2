//! Integration tests: a suppressed user's traffic through the gateway.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use common::{build, harness, harness_with_store, quiet_rolls, test_config, CHANNEL, TEAM};
use muzzle_engine::config::Config;
use muzzle_engine::dice::{Dice, FixedRolls};
use muzzle_engine::gateway::{BotMessage, GatewayAction, IncomingMessage, MessageKind};
use muzzle_engine::ledger::{SqliteLedger, SuppressionLedger};
use muzzle_engine::logging::ts_epoch_ms;
use muzzle_engine::mocks::{MessengerFaults, Sent, UnreachableStore};
use muzzle_engine::model::SuppressionRecord;
use muzzle_engine::redactor::{deletion_stats, is_forced_token, MessageRedactor};
use muzzle_engine::slack::signing::sign_request;
use muzzle_engine::slack::{EventRouter, RouteResult, Verifier};

fn message(user: &str, text: &str, id: &str, kind: MessageKind) -> IncomingMessage {
    IncomingMessage {
        user_id: user.to_string(),
        team_id: TEAM.to_string(),
        channel: CHANNEL.to_string(),
        text: text.to_string(),
        message_id: id.to_string(),
        kind,
    }
}

fn record(h: &common::Harness, subject: &str) -> SuppressionRecord {
    h.ledger.history(subject, TEAM).unwrap().pop().expect("record exists")
}

// ---------------------------------------------------------------------------
// Scenario C: tag attempt while suppressed
// ---------------------------------------------------------------------------
#[tokio::test]
async fn g01_tag_during_topic_change_extends_by_penalty() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let before = record(&h, "U2");
    h.messenger.clear();

    let action = h
        .service
        .on_incoming_message(&message("U2", "<@U1> look at this", "100.1", MessageKind::TopicChange))
        .await;
    assert_eq!(action, GatewayAction::Abuse);

    assert_eq!(h.messenger.deleted(), vec!["100.1".to_string()]);
    let after = record(&h, "U2");
    assert_eq!(after.duration_ms, before.duration_ms + 300_000);
    assert_eq!(
        h.service.remaining("U2", TEAM).await.unwrap(),
        Some(Duration::from_millis(before.duration_ms + 300_000))
    );

    let posted = h.messenger.posted();
    assert_eq!(
        posted,
        vec![":rotating_light: <@U2> attempted to @ while muzzled or change the channel topic! Muzzle increased by 5m00s :rotating_light:".to_string()]
    );
    assert!(!posted.iter().any(|p| p.starts_with("<@U2> says")));
}

#[tokio::test]
async fn g02_broadcast_in_plain_message_is_abuse() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let action = h
        .service
        .on_incoming_message(&message("U2", "hey @channel", "100.2", MessageKind::Plain))
        .await;
    assert_eq!(action, GatewayAction::Abuse);
}

#[tokio::test]
async fn g03_tag_in_other_subtype_is_dropped_without_penalty() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let before = record(&h, "U2");
    h.messenger.clear();

    let action = h
        .service
        .on_incoming_message(&message("U2", "<@U1>", "100.3", MessageKind::Other("file_share".to_string())))
        .await;
    assert_eq!(action, GatewayAction::Dropped);
    assert_eq!(record(&h, "U2").duration_ms, before.duration_ms);
    assert!(h.messenger.posted().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario D: redaction quota
// ---------------------------------------------------------------------------
#[tokio::test]
async fn g04_quota_exhausted_deletes_without_repost() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    h.messenger.clear();

    for i in 0..7 {
        let action = h
            .service
            .on_incoming_message(&message("U2", "hello world", &format!("200.{}", i), MessageKind::Plain))
            .await;
        assert_eq!(action, GatewayAction::Redacted);
    }
    assert_eq!(h.messenger.posted().len(), 7);
    assert_eq!(h.messenger.posted()[0], "<@U2> says \"..mMm.. ..mMm..\"");

    let before = record(&h, "U2");
    let text = "one two three";
    let action = h
        .service
        .on_incoming_message(&message("U2", text, "200.7", MessageKind::Plain))
        .await;
    assert_eq!(action, GatewayAction::Dropped);
    assert_eq!(h.messenger.posted().len(), 7);
    assert_eq!(h.messenger.deleted().len(), 8);

    let after = record(&h, "U2");
    let stats = deletion_stats(text);
    assert_eq!(after.messages_suppressed, before.messages_suppressed + 1);
    assert_eq!(after.words_suppressed, before.words_suppressed + stats.words);
    assert_eq!(after.characters_suppressed, before.characters_suppressed + stats.characters);
}

#[tokio::test]
async fn g05_redacted_repost_keeps_short_words_on_heads() {
    let h = harness(FixedRolls { chance: false, coin: true, offset: 0 });
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    h.messenger.clear();
    h.service
        .on_incoming_message(&message("U2", "hi <@U3> incomprehensible", "300.1", MessageKind::Other("thread_broadcast".to_string())))
        .await;
    // a mention outside a tag-capable message is still dropped, not reposted
    assert!(h.messenger.posted().is_empty());

    h.service
        .on_incoming_message(&message("U2", "hi incomprehensible", "300.2", MessageKind::Plain))
        .await;
    assert_eq!(h.messenger.posted(), vec!["<@U2> says \"*hi* ..mMm..\"".to_string()]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------
#[test]
fn g06_forced_tokens_never_survive_redaction() {
    let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
    let pool = [
        "@channel", "@here", "<!channel>", "<!here>", "<@U1>", "<@U2|bob>", "hi", "ok", "word", "fine", "enormousness",
    ];
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for trial in 0..10_000u64 {
        let redactor = MessageRedactor::new(ledger.clone(), Arc::new(Dice::seeded(trial)), 10, "..mMm..");
        let n = rng.gen_range(1..=8);
        let tokens: Vec<&str> = (0..n).map(|_| pool[rng.gen_range(0..pool.len())]).collect();
        let text = tokens.join(" ");

        let out = redactor.compute(&text);
        let produced: Vec<&str> = out.output.split(' ').collect();
        assert_eq!(produced.len(), tokens.len());
        for (input, output) in tokens.iter().zip(&produced) {
            if is_forced_token(input) {
                assert_eq!(*output, "..mMm..", "trial {} preserved {:?}", trial, input);
            }
        }
    }
}

#[tokio::test]
async fn g07_counters_never_decrease() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;

    let script: Vec<(&str, MessageKind)> = vec![
        ("plain words", MessageKind::Plain),
        ("<@U1> hello", MessageKind::TopicChange),
        ("an edit", MessageKind::Other("message_changed".to_string())),
        ("@here", MessageKind::Other("bot_message".to_string())),
        ("more words here", MessageKind::Plain),
    ];
    let mut last = record(&h, "U2");
    for round in 0..4 {
        for (i, (text, kind)) in script.iter().enumerate() {
            h.service
                .on_incoming_message(&message("U2", text, &format!("{}.{}", round, i), kind.clone()))
                .await;
            let now = record(&h, "U2");
            assert!(now.messages_suppressed >= last.messages_suppressed);
            assert!(now.words_suppressed >= last.words_suppressed);
            assert!(now.characters_suppressed >= last.characters_suppressed);
            assert!(now.duration_ms >= last.duration_ms);
            last = now;
        }
    }
    assert_eq!(last.messages_suppressed, 20);
}

#[tokio::test]
async fn g08_extension_accumulates_exactly() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let original = record(&h, "U2").duration_ms;
    let delta = Duration::from_millis(12_345);
    for _ in 0..5 {
        h.service.state().extend_time("U2", TEAM, delta).await.unwrap();
    }
    assert_eq!(record(&h, "U2").duration_ms, original + 5 * 12_345);
    assert_eq!(
        h.service.remaining("U2", TEAM).await.unwrap(),
        Some(Duration::from_millis(original + 5 * 12_345))
    );
}

// ---------------------------------------------------------------------------
// Pass-through, failure and bot paths
// ---------------------------------------------------------------------------
#[tokio::test]
async fn g09_unsuppressed_and_expired_authors_pass_through() {
    let h = harness(quiet_rolls());
    let msg = message("U2", "<@U1> hi", "400.1", MessageKind::Plain);
    assert_eq!(h.service.on_incoming_message(&msg).await, GatewayAction::Ignored);

    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    h.clock.advance(Duration::from_secs(30));
    assert_eq!(h.service.on_incoming_message(&msg).await, GatewayAction::Ignored);
    assert!(h.messenger.deleted().is_empty());
}

#[tokio::test]
async fn g10_store_outage_fails_open() {
    let h = harness_with_store(Arc::new(UnreachableStore));
    let action = h
        .service
        .on_incoming_message(&message("U2", "hello", "500.1", MessageKind::Plain))
        .await;
    assert_eq!(action, GatewayAction::FailedOpen);
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn g11_vanished_message_still_counts() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    h.messenger.set_faults(MessengerFaults { deletes_not_found: true, ..Default::default() });
    let action = h
        .service
        .on_incoming_message(&message("U2", "gone already", "600.1", MessageKind::Plain))
        .await;
    assert_eq!(action, GatewayAction::Redacted);
    assert_eq!(record(&h, "U2").messages_suppressed, 1);
}

#[tokio::test]
async fn g12_spawned_handling_completes() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let handle = h.service.gateway().spawn(message("U2", "background", "700.1", MessageKind::Plain));
    assert_eq!(handle.await.unwrap(), GatewayAction::Redacted);
}

#[tokio::test]
async fn g13_foreign_bot_naming_suppressed_user_is_removed() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    h.messenger.clear();

    let mut post = BotMessage {
        bot_name: Some("gifbot".to_string()),
        author_id: "B1".to_string(),
        team_id: TEAM.to_string(),
        channel: CHANNEL.to_string(),
        text: "<@U2> posted a gif".to_string(),
        message_id: "800.1".to_string(),
    };
    assert_eq!(h.service.on_bot_message(&post).await, GatewayAction::Dropped);
    assert_eq!(
        h.messenger.sent(),
        vec![Sent::Deleted {
            channel: CHANNEL.to_string(),
            message_id: "800.1".to_string(),
            author_id: "B1".to_string(),
        }]
    );

    post.bot_name = Some("muzzle".to_string());
    assert_eq!(h.service.on_bot_message(&post).await, GatewayAction::Ignored);

    post.bot_name = Some("gifbot".to_string());
    post.text = "<@U3> posted a gif".to_string();
    assert_eq!(h.service.on_bot_message(&post).await, GatewayAction::Ignored);
}

// ---------------------------------------------------------------------------
// Events API routing
// ---------------------------------------------------------------------------
#[tokio::test]
async fn g14_router_dispatches_events() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let router = EventRouter::new(h.service.clone());

    let challenge = json!({"type": "url_verification", "challenge": "xyz"}).to_string();
    assert!(matches!(router.route_json(&challenge).await.unwrap(), RouteResult::Challenge(c) if c == "xyz"));

    let topic = json!({
        "type": "event_callback",
        "team_id": TEAM,
        "event": {
            "type": "message",
            "subtype": "channel_topic",
            "user": "U2",
            "text": "set the channel topic: <@U1>",
            "ts": "900.1",
            "channel": CHANNEL
        }
    })
    .to_string();
    let RouteResult::Dispatched(handle) = router.route_json(&topic).await.unwrap() else {
        panic!("message events run on their own task");
    };
    assert_eq!(handle.await.unwrap(), GatewayAction::Abuse);

    let reaction = json!({
        "type": "event_callback",
        "team_id": TEAM,
        "event": {"type": "reaction_added", "user": "U2"}
    })
    .to_string();
    assert!(matches!(router.route_json(&reaction).await.unwrap(), RouteResult::Ignored));
}

#[tokio::test]
async fn g15_router_rejects_bad_signatures() {
    let h = harness(quiet_rolls());
    let router = EventRouter::new(h.service.clone()).with_verifier(Verifier {
        signing_secret: "secret".to_string(),
        max_age_secs: 300,
    });
    let body = json!({"type": "url_verification", "challenge": "ok"}).to_string();
    let ts = (ts_epoch_ms() / 1000).to_string();

    let good = sign_request("secret", &ts, &body).unwrap();
    assert!(matches!(
        router.route_signed(&ts, &good, &body).await.unwrap(),
        RouteResult::Challenge(c) if c == "ok"
    ));

    let forged = sign_request("guess", &ts, &body).unwrap();
    assert!(router.route_signed(&ts, &forged, &body).await.is_err());
}

#[tokio::test]
async fn g16_email_address_is_not_a_broadcast() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let before = record(&h, "U2");
    h.messenger.clear();

    let action = h
        .service
        .on_incoming_message(&message("U2", "mail ops@here.com please", "950.1", MessageKind::Plain))
        .await;
    assert_eq!(action, GatewayAction::Redacted);
    assert_eq!(record(&h, "U2").duration_ms, before.duration_ms);
    assert!(!h.messenger.posted().iter().any(|p| p.contains(":rotating_light:")));
}

#[tokio::test]
async fn g17_router_returns_before_delete_retries_finish() {
    // Five retries at 200ms backoff keep the delete busy for well over a second.
    let cfg = Config { delete_backoff_ms: 200, delete_max_retries: 5, ..test_config() };
    let h = build(cfg, Dice::fixed(quiet_rolls()), None);
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    h.messenger.set_faults(MessengerFaults { deletes_fail: true, ..Default::default() });
    let router = EventRouter::new(h.service.clone());

    let event = json!({
        "type": "event_callback",
        "team_id": TEAM,
        "event": {"type": "message", "user": "U2", "text": "still here", "ts": "960.1", "channel": CHANNEL}
    })
    .to_string();

    let started = Instant::now();
    let RouteResult::Dispatched(handle) = router.route_json(&event).await.unwrap() else {
        panic!("message events run on their own task");
    };
    assert!(started.elapsed() < Duration::from_millis(200), "route waited on delete retries");
    assert!(!handle.is_finished());

    assert_eq!(handle.await.unwrap(), GatewayAction::Redacted);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn g18_router_dispatches_bot_posts() {
    let h = harness(quiet_rolls());
    h.service.apply_suppression("U2", "U1", TEAM, CHANNEL).await;
    let router = EventRouter::new(h.service.clone());

    let event = json!({
        "type": "event_callback",
        "team_id": TEAM,
        "event": {
            "type": "message",
            "subtype": "bot_message",
            "bot_id": "B1",
            "username": "gifbot",
            "text": "<@U2> posted a gif",
            "ts": "970.1",
            "channel": CHANNEL
        }
    })
    .to_string();
    let RouteResult::Dispatched(handle) = router.route_json(&event).await.unwrap() else {
        panic!("bot posts run on their own task");
    };
    assert_eq!(handle.await.unwrap(), GatewayAction::Dropped);
    assert_eq!(h.messenger.deleted(), vec!["970.1".to_string()]);
}
