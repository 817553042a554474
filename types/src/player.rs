use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Energy capacity of a freshly created player.
pub const INITIAL_MAX_ENERGY: u32 = 1_000;
/// Capacity added by each energy upgrade.
pub const ENERGY_UPGRADE_STEP: u32 = 500;
/// Energy regenerated per elapsed second.
pub const ENERGY_REGEN_PER_SECOND: f64 = 1.0;

pub const DEFAULT_USERNAME: &str = "Аноним";
pub const DEFAULT_FIRST_NAME: &str = "Игрок";

#[derive(Debug, ThisError, PartialEq)]
pub enum PlayerInvariantError {
    #[error("energy out of range (energy={energy}, max={max})")]
    EnergyOutOfRange { energy: f64, max: u32 },
    #[error("negative coin balance ({coins})")]
    NegativeCoins { coins: f64 },
    #[error("upgrade level below 1 (multi_tap={multi_tap}, energy={energy})")]
    LevelOutOfRange { multi_tap: u32, energy: u32 },
}

/// Full persisted state of one player.
///
/// Field names match the JSON shape the mini-app reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub coins: f64,
    pub energy: f64,
    pub max_energy: u32,
    pub multi_tap_level: u32,
    pub energy_level: u32,
    pub auto_tap_level: u32,
    pub skin_bought: bool,
    /// Milliseconds since epoch of the last passive progress computation (0 = never).
    pub last_update: u64,
    pub username: String,
    pub first_name: String,
    pub ban_end_time: u64,
    pub tap_window_start: u64,
    pub tap_count: u32,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            coins: 0.0,
            energy: INITIAL_MAX_ENERGY as f64,
            max_energy: INITIAL_MAX_ENERGY,
            multi_tap_level: 1,
            energy_level: 1,
            auto_tap_level: 0,
            skin_bought: false,
            last_update: 0,
            username: DEFAULT_USERNAME.to_string(),
            first_name: DEFAULT_FIRST_NAME.to_string(),
            ban_end_time: 0,
            tap_window_start: 0,
            tap_count: 0,
        }
    }
}

impl PlayerState {
    /// Snapshot written when a player is first seen.
    pub fn new(username: &str, first_name: &str, now_ms: u64) -> Self {
        Self {
            username: username.to_string(),
            first_name: first_name.to_string(),
            last_update: now_ms,
            ..Self::default()
        }
    }

    /// Rewrites every gameplay field to its default, keeping display names.
    pub fn reset(&mut self, now_ms: u64) {
        let username = std::mem::take(&mut self.username);
        let first_name = std::mem::take(&mut self.first_name);
        *self = Self::new(&username, &first_name, now_ms);
    }

    pub fn is_banned(&self, now_ms: u64) -> bool {
        self.ban_end_time > now_ms
    }

    /// Remaining ban in whole seconds, or `None` when not banned.
    pub fn banned_for_secs(&self, now_ms: u64) -> Option<u64> {
        self.is_banned(now_ms)
            .then(|| (self.ban_end_time - now_ms) / 1_000)
    }

    pub fn validate(&self) -> Result<(), PlayerInvariantError> {
        if !(0.0..=self.max_energy as f64).contains(&self.energy) {
            return Err(PlayerInvariantError::EnergyOutOfRange {
                energy: self.energy,
                max: self.max_energy,
            });
        }
        if self.coins < 0.0 {
            return Err(PlayerInvariantError::NegativeCoins { coins: self.coins });
        }
        if self.multi_tap_level == 0 || self.energy_level == 0 {
            return Err(PlayerInvariantError::LevelOutOfRange {
                multi_tap: self.multi_tap_level,
                energy: self.energy_level,
            });
        }
        Ok(())
    }
}
