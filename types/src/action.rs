use serde::{Deserialize, Serialize};
use std::fmt;

/// A player-initiated operation applied atomically to a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Tap,
    BuyMultitap,
    BuyEnergy,
    BuyAutotap,
    BuySkin,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Tap,
        Action::BuyMultitap,
        Action::BuyEnergy,
        Action::BuyAutotap,
        Action::BuySkin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Tap => "tap",
            Action::BuyMultitap => "buy_multitap",
            Action::BuyEnergy => "buy_energy",
            Action::BuyAutotap => "buy_autotap",
            Action::BuySkin => "buy_skin",
        }
    }

    /// Resolves a wire name; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == name)
    }

    /// Whether the action passes through the anti-abuse gate.
    pub fn is_gated(&self) -> bool {
        matches!(self, Action::Tap)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one action. Every variant is a committed, successful response;
/// anything other than `Ok` is a gameplay rejection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Event {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coins_earned: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_combo: Option<bool>,
    },
    Banned {
        ban_end_time: u64,
    },
    NoEnergy,
    NotEnoughCoins {
        required: u64,
    },
    #[serde(rename = "already_bought")]
    AlreadyOwned,
    FeatureDisabled,
    InvalidAction,
}

impl Event {
    /// Plain success with no payload (purchases).
    pub const fn ok() -> Self {
        Event::Ok {
            coins_earned: None,
            is_combo: None,
        }
    }

    pub const fn tapped(coins_earned: u64, is_combo: bool) -> Self {
        Event::Ok {
            coins_earned: Some(coins_earned),
            is_combo: Some(is_combo),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Event::Ok { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Event::Ok { .. } => "ok",
            Event::Banned { .. } => "banned",
            Event::NoEnergy => "no_energy",
            Event::NotEnoughCoins { .. } => "not_enough_coins",
            Event::AlreadyOwned => "already_bought",
            Event::FeatureDisabled => "feature_disabled",
            Event::InvalidAction => "invalid_action",
        }
    }
}
