//! Chat workspace adapter: Web API client, request signing and event routing.

pub mod client;
pub mod events;
pub mod signing;

pub use client::SlackClient;
pub use events::{EventRouter, RouteResult, Verifier};
