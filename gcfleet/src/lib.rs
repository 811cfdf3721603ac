// gcfleet/src/lib.rs
//
// A fleet of logged-in game-client bots that answer item-inspection
// queries against a game coordinator on behalf of callers, multiplexing
// many accounts behind one dispatcher so no single session's rate limit or
// forced disconnects take the service down.

pub mod bot;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod inspect_link;
pub mod proxy;
pub mod session;
pub mod totp;

pub use bot::Bot;
pub use config::{AccountCredentials, FleetConfig};
pub use controller::BotController;
pub use error::FleetError;
pub use events::{BotState, BotStatus, FleetEvent, ItemInfo};
pub use inspect_link::InspectLink;
