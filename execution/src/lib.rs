//! Tap game execution layer.
//!
//! This crate contains the per-player transactional state machine (`Layer`) and the
//! pure rules it composes:
//! - [`auth`] verifies the signed launch credential and yields an [`Identity`].
//! - [`progress`] regenerates energy for the time elapsed since the last update.
//! - [`gate`] counts taps in a fixed one-second window and bans autoclickers.
//! - [`economy`] prices upgrades and applies one action to a snapshot.
//!
//! ## Transaction invariants
//! Every request is one read-modify-write cycle on a single row, executed while the
//! row's exclusive lock is held (see [`state::Store`]). Passive progress is applied
//! exactly once per transaction, before any action logic, and the full snapshot is
//! written back even when the action itself is rejected. A transaction that fails
//! before commit leaves the stored row untouched.
//!
//! Wall-clock time and randomness are injected (`process_at`, `snapshot_at`) so the
//! rules stay deterministic under test.
//!
//! ## Minimal pipeline (example)
//! ```rust
//! use tapgame_execution::{Layer, Memory};
//! use tapgame_types::{Event, Identity};
//!
//! let layer = Layer::new(Memory::default());
//! let identity = Identity::new("42");
//! let response = layer
//!     .process_at(&identity, "buy_skin", 1_700_000_000_000, &mut rand::thread_rng())
//!     .unwrap();
//! assert_eq!(response.event, Event::NotEnoughCoins { required: 1_000 });
//! ```
//!
//! [`Identity`]: tapgame_types::Identity

pub mod auth;
pub mod economy;
pub mod gate;
pub mod progress;
pub mod state;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

mod error;
mod layer;

pub use auth::{AuthError, CredentialVerifier};
pub use error::Error;
pub use layer::{now_ms, Layer, DEFAULT_BAN_MINUTES};
pub use state::{Memory, PlayerTxn, RowLocks, Store, StoreError};
