//! Types shared by the tap game execution engine and its HTTP backend.

pub mod action;
pub mod api;
pub mod identity;
pub mod player;

pub use action::{Action, Event};
pub use api::{ActionResponse, LeaderboardEntry, Totals};
pub use identity::Identity;
pub use player::{PlayerInvariantError, PlayerState};
