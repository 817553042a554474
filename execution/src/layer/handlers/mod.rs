use super::*;

/// Loads the locked row. Unknown players are not created.
fn require_player(txn: &mut impl PlayerTxn, user_id: &str) -> Result<PlayerState, Error> {
    txn.load()?
        .ok_or_else(|| Error::NotFound(user_id.to_string()))
}

mod admin;

pub use admin::DEFAULT_BAN_MINUTES;
