//! Relational player stores.
//!
//! Both backends keep one `users` row per player. Column order below is shared by
//! every `SELECT` so row decoding stays positional.

use tapgame_execution::StoreError;
use tapgame_types::PlayerState;

mod pg;
mod sqlite;

pub use pg::{validate_postgres_url, PostgresStore};
pub use sqlite::SqliteStore;

const PLAYER_COLUMNS: &str = "coins, energy, max_energy, multi_tap_level, energy_level, \
     auto_tap_level, skin_bought, last_update, username, first_name, ban_end_time, \
     tap_window_start, tap_count";

const LEADERBOARD_COLUMNS: &str = "user_id, username, first_name, coins, multi_tap_level";

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Fatal(format!("{field} out of range: {value}")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Fatal(format!("{field} out of range: {value}")))
}

fn to_u32(value: i64, field: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Fatal(format!("{field} out of range: {value}")))
}

/// Column values of one `users` row, in `PLAYER_COLUMNS` order.
struct PlayerRow {
    coins: f64,
    energy: f64,
    max_energy: i64,
    multi_tap_level: i64,
    energy_level: i64,
    auto_tap_level: i64,
    skin_bought: bool,
    last_update: i64,
    username: String,
    first_name: String,
    ban_end_time: i64,
    tap_window_start: i64,
    tap_count: i64,
}

impl PlayerRow {
    fn from_state(state: &PlayerState) -> Result<Self, StoreError> {
        Ok(Self {
            coins: state.coins,
            energy: state.energy,
            max_energy: i64::from(state.max_energy),
            multi_tap_level: i64::from(state.multi_tap_level),
            energy_level: i64::from(state.energy_level),
            auto_tap_level: i64::from(state.auto_tap_level),
            skin_bought: state.skin_bought,
            last_update: to_i64(state.last_update, "last_update")?,
            username: state.username.clone(),
            first_name: state.first_name.clone(),
            ban_end_time: to_i64(state.ban_end_time, "ban_end_time")?,
            tap_window_start: to_i64(state.tap_window_start, "tap_window_start")?,
            tap_count: i64::from(state.tap_count),
        })
    }

    fn into_state(self) -> Result<PlayerState, StoreError> {
        Ok(PlayerState {
            coins: self.coins,
            energy: self.energy,
            max_energy: to_u32(self.max_energy, "max_energy")?,
            multi_tap_level: to_u32(self.multi_tap_level, "multi_tap_level")?,
            energy_level: to_u32(self.energy_level, "energy_level")?,
            auto_tap_level: to_u32(self.auto_tap_level, "auto_tap_level")?,
            skin_bought: self.skin_bought,
            last_update: to_u64(self.last_update, "last_update")?,
            username: self.username,
            first_name: self.first_name,
            ban_end_time: to_u64(self.ban_end_time, "ban_end_time")?,
            tap_window_start: to_u64(self.tap_window_start, "tap_window_start")?,
            tap_count: to_u32(self.tap_count, "tap_count")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_conversions_reject_out_of_range() {
        assert_eq!(to_i64(7, "x"), Ok(7));
        assert!(to_i64(u64::MAX, "x").is_err());
        assert_eq!(to_u64(7, "x"), Ok(7));
        assert!(to_u64(-1, "x").is_err());
        assert!(to_u32(i64::from(u32::MAX) + 1, "x").is_err());
    }

    #[test]
    fn rows_round_trip_snapshots() {
        let state = PlayerState {
            coins: 12.5,
            ban_end_time: 99,
            tap_count: 4,
            ..PlayerState::new("ann", "Ann", 1_700_000_000_000)
        };
        let row = PlayerRow::from_state(&state).unwrap();
        assert_eq!(row.into_state().unwrap(), state);
    }

    #[test]
    fn corrupt_rows_are_fatal() {
        let mut row = PlayerRow::from_state(&PlayerState::default()).unwrap();
        row.last_update = -5;
        assert!(matches!(row.into_state(), Err(StoreError::Fatal(_))));
    }
}
