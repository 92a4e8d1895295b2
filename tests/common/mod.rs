//! Shared wiring for integration tests: a full service over in-process doubles.

#![allow(dead_code)]

use std::sync::Arc;

use muzzle_engine::config::Config;
use muzzle_engine::dice::{Dice, FixedRolls};
use muzzle_engine::ledger::SqliteLedger;
use muzzle_engine::mocks::{MockClock, RecordingMessenger, StaticDirectory, StaticInventory};
use muzzle_engine::service::{Collaborators, SuppressionService};
use muzzle_engine::store::{EphemeralStore, MemoryStore};

pub const TEAM: &str = "T1";
pub const CHANNEL: &str = "C1";

pub struct Harness {
    pub service: Arc<SuppressionService>,
    pub ledger: Arc<SqliteLedger>,
    pub store: Arc<dyn EphemeralStore>,
    pub clock: MockClock,
    pub messenger: Arc<RecordingMessenger>,
    pub directory: Arc<StaticDirectory>,
    pub inventory: Arc<StaticInventory>,
}

pub fn test_config() -> Config {
    Config {
        delete_backoff_ms: 1,
        ..Config::default()
    }
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_user("U1", "alice")
        .with_user("U2", "bob")
        .with_user("U3", "carol")
        .with_user("U4", "dave")
        .with_bot("B1", "helperbot")
}

/// No backfire, coin always discards, durations at `min + offset`.
pub fn quiet_rolls() -> FixedRolls {
    FixedRolls { chance: false, coin: false, offset: 0 }
}

pub fn harness(rolls: FixedRolls) -> Harness {
    build(test_config(), Dice::fixed(rolls), None)
}

pub fn harness_with_store(store: Arc<dyn EphemeralStore>) -> Harness {
    build(test_config(), Dice::fixed(quiet_rolls()), Some(store))
}

pub fn build(cfg: Config, dice: Dice, store: Option<Arc<dyn EphemeralStore>>) -> Harness {
    let clock = MockClock::default();
    let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new(Arc::new(clock.clone()))));
    let ledger = Arc::new(SqliteLedger::in_memory().expect("in-memory ledger"));
    let messenger = Arc::new(RecordingMessenger::new());
    let directory = Arc::new(directory());
    let inventory = Arc::new(StaticInventory::new());

    let service = Arc::new(SuppressionService::new(
        &cfg,
        Collaborators {
            store: store.clone(),
            ledger: ledger.clone(),
            messaging: messenger.clone(),
            identity: directory.clone(),
            items: inventory.clone(),
            dice: Arc::new(dice),
        },
    ));

    Harness { service, ledger, store, clock, messenger, directory, inventory }
}
