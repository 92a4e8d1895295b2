//! Suppression ("muzzle") game engine for a chat bot.
//!
//! Users silence each other for a short random time; attempts can backfire,
//! be countered by a pre-armed ward, or bounce off a purchased defensive
//! item. A suppressed user's messages are deleted and reposted redacted.
//!
//! Who is suppressed, and for how long, lives only in the ephemeral store's
//! key expiries. The SQLite ledger keeps the history and counters.

pub mod clock;
pub mod config;
pub mod dice;
pub mod engine;
pub mod gateway;
pub mod impersonation;
pub mod inventory;
pub mod ledger;
pub mod logging;
pub mod mocks;
pub mod model;
pub mod ports;
pub mod redactor;
pub mod retry;
pub mod service;
pub mod slack;
pub mod state_store;
pub mod store;
pub mod throttle;
pub mod wards;

pub use config::Config;
pub use engine::{DecisionEngine, Outcome, Rejection};
pub use gateway::{GatewayAction, IncomingMessage, MessageKind, SuppressionMessageGateway};
pub use model::{time_string, SuppressionKind, SuppressionRecord};
pub use service::{Collaborators, SuppressionService};
