//! Live push notifications for gitrelay
//!
//! One hub actor per repository fans push events out to every
//! WebSocket subscriber of that repository. Slow subscribers are dropped
//! rather than allowed to hold up the push or the other subscribers.

pub mod client;
pub mod hub;
mod server;

pub use client::{Client, ClientExit};
pub use hub::{ClientId, HubHandle, HubSettings, Subscription, SuperHub};
pub use server::subscribe_upgrade;
