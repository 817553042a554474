use super::super::*;
use super::require_player;
use tapgame_types::api::PlayerStats;
use tracing::info;

/// Ban length applied when an operator does not give one.
pub const DEFAULT_BAN_MINUTES: u64 = 60;

impl<S: Store> Layer<S> {
    fn modify_player(
        &self,
        user_id: &str,
        mut apply: impl FnMut(&mut PlayerState),
    ) -> Result<PlayerState, Error> {
        self.transact(user_id, |txn| {
            let mut state = require_player(txn, user_id)?;
            apply(&mut state);
            state.validate()?;
            txn.update(&state)?;
            Ok(state)
        })
    }

    /// Adds `coins` to an existing player's balance.
    pub fn grant_coins(&self, user_id: &str, coins: f64) -> Result<PlayerState, Error> {
        if !coins.is_finite() || coins <= 0.0 {
            return Err(Error::InvalidRequest("invalid_coins"));
        }
        let state = self.modify_player(user_id, |state| state.coins += coins)?;
        info!(user_id, coins, balance = state.coins, "granted coins");
        Ok(state)
    }

    pub fn ban(&self, user_id: &str, minutes: Option<u64>) -> Result<PlayerState, Error> {
        self.ban_at(user_id, minutes, now_ms())
    }

    /// Bans an existing player for `minutes` (default one hour) from `now_ms`.
    pub fn ban_at(
        &self,
        user_id: &str,
        minutes: Option<u64>,
        now_ms: u64,
    ) -> Result<PlayerState, Error> {
        let minutes = minutes.unwrap_or(DEFAULT_BAN_MINUTES);
        if minutes == 0 {
            return Err(Error::InvalidRequest("invalid_minutes"));
        }
        let until = minutes
            .checked_mul(60_000)
            .and_then(|duration| now_ms.checked_add(duration))
            .ok_or(Error::InvalidRequest("invalid_minutes"))?;
        let state = self.modify_player(user_id, |state| state.ban_end_time = until)?;
        info!(user_id, minutes, until, "banned player");
        Ok(state)
    }

    pub fn reset(&self, user_id: &str) -> Result<PlayerState, Error> {
        self.reset_at(user_id, now_ms())
    }

    /// Restores gameplay defaults for an existing player, keeping display names.
    pub fn reset_at(&self, user_id: &str, now_ms: u64) -> Result<PlayerState, Error> {
        let state = self.modify_player(user_id, |state| state.reset(now_ms))?;
        info!(user_id, "reset player");
        Ok(state)
    }

    pub fn player_stats(&self, user_id: &str) -> Result<PlayerStats, Error> {
        self.player_stats_at(user_id, now_ms())
    }

    /// Stored snapshot of an existing player, without passive progress.
    pub fn player_stats_at(&self, user_id: &str, now_ms: u64) -> Result<PlayerStats, Error> {
        let data = self
            .store
            .get(user_id)?
            .ok_or_else(|| Error::NotFound(user_id.to_string()))?;
        Ok(PlayerStats {
            user_id: user_id.to_string(),
            banned_for_secs: data.banned_for_secs(now_ms),
            data,
        })
    }
}
