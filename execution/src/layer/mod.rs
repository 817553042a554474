use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};
use tapgame_types::{
    Action, ActionResponse, Event, Identity, LeaderboardEntry, PlayerState, Totals,
};
use tracing::{debug, warn};

use crate::economy::apply_action;
use crate::error::Error;
use crate::gate::{check_tap, TapDecision};
use crate::progress::simulate;
use crate::state::{PlayerTxn, Store};

mod handlers;

pub use handlers::DEFAULT_BAN_MINUTES;

/// Attempts made for a transaction that fails with a transient storage error.
const MAX_ATTEMPTS: usize = 2;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Copies the names carried by the credential onto the snapshot. Absent names keep
/// whatever is stored.
fn refresh_names(state: &mut PlayerState, identity: &Identity) {
    if let Some(username) = identity.username.as_deref().filter(|name| !name.is_empty()) {
        state.username = username.to_string();
    }
    if let Some(first_name) = identity
        .first_name
        .as_deref()
        .filter(|name| !name.is_empty())
    {
        state.first_name = first_name.to_string();
    }
}

fn defaults_for(identity: &Identity, now_ms: u64) -> PlayerState {
    PlayerState::new(
        identity.username_or_default(),
        identity.first_name_or_default(),
        now_ms,
    )
}

/// Action transaction coordinator.
///
/// Every mutation runs as one read-modify-write cycle inside a transaction holding
/// the player's row lock. Whatever fails before `commit` leaves the stored row as it
/// was.
pub struct Layer<S: Store> {
    store: S,
}

impl<S: Store> Layer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs `op` inside a transaction on `user_id`, retrying once when storage
    /// reports a transient failure.
    fn transact<'s, T>(
        &'s self,
        user_id: &str,
        mut op: impl FnMut(&mut S::Txn<'s>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut attempt = 1;
        loop {
            let result = self
                .store
                .begin(user_id)
                .map_err(Error::from)
                .and_then(|mut txn| {
                    let value = op(&mut txn)?;
                    txn.commit()?;
                    Ok(value)
                });
            match result {
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(user_id, attempt, error = %err, "retrying player transaction");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Applies `action_name` for `identity` using the system clock and thread RNG.
    pub fn process(&self, identity: &Identity, action_name: &str) -> Result<ActionResponse, Error> {
        self.process_at(identity, action_name, now_ms(), &mut rand::thread_rng())
    }

    /// Applies `action_name` for `identity` at `now_ms`.
    ///
    /// Gameplay rejections (ban, missing energy, unaffordable purchase, unknown action)
    /// are successful results carrying a non-`ok` event, and still persist the passive
    /// progress computed for `now_ms`.
    pub fn process_at(
        &self,
        identity: &Identity,
        action_name: &str,
        now_ms: u64,
        rng: &mut impl Rng,
    ) -> Result<ActionResponse, Error> {
        let defaults = defaults_for(identity, now_ms);
        self.transact(&identity.id, |txn| {
            txn.insert_if_absent(&defaults)?;
            let mut state = txn
                .load()?
                .ok_or_else(|| Error::StorageFatal(format!("row {} vanished", identity.id)))?;
            refresh_names(&mut state, identity);
            simulate(&mut state, now_ms);

            let event = match Action::from_name(action_name) {
                None => Event::InvalidAction,
                Some(action) => {
                    let decision = if action.is_gated() {
                        check_tap(&mut state, now_ms)
                    } else {
                        TapDecision::Allowed
                    };
                    if let TapDecision::NewlyBanned { until } = decision {
                        warn!(user_id = %identity.id, until, "autoclick detected");
                    }
                    apply_action(&mut state, action, decision, &mut *rng)
                }
            };

            state.validate()?;
            txn.update(&state)?;
            debug!(
                user_id = %identity.id,
                action = action_name,
                status = event.status(),
                "processed action"
            );
            Ok(ActionResponse { event, data: state })
        })
    }

    /// Returns the passively updated snapshot for `identity`, creating the row on
    /// first contact. Only the creation is persisted.
    pub fn snapshot(&self, identity: &Identity) -> Result<PlayerState, Error> {
        self.snapshot_at(identity, now_ms())
    }

    pub fn snapshot_at(&self, identity: &Identity, now_ms: u64) -> Result<PlayerState, Error> {
        let defaults = defaults_for(identity, now_ms);
        self.transact(&identity.id, |txn| {
            txn.insert_if_absent(&defaults)?;
            let mut state = txn
                .load()?
                .ok_or_else(|| Error::StorageFatal(format!("row {} vanished", identity.id)))?;
            refresh_names(&mut state, identity);
            simulate(&mut state, now_ms);
            Ok(state)
        })
    }

    /// Top players by coins, as of one point in time.
    pub fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, Error> {
        Ok(self.store.top_by_coins(limit)?)
    }

    pub fn totals(&self) -> Result<Totals, Error> {
        Ok(self.store.totals()?)
    }
}
