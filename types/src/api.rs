use serde::{Deserialize, Serialize};

use crate::{Event, PlayerState};

/// Number of rows returned by the public leaderboard.
pub const LEADERBOARD_LIMIT: usize = 100;
/// Default page size of the administrative player listing.
pub const ADMIN_USERS_DEFAULT_LIMIT: usize = 50;

/// Header carrying the signed launch credential.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: Option<serde_json::Value>,
}

impl ActionRequest {
    pub fn named(action: &str) -> Self {
        Self {
            action: Some(serde_json::Value::String(action.to_string())),
        }
    }

    /// Trimmed action name. Scalars other than strings are read as their JSON text,
    /// and an empty name counts as missing.
    pub fn action_name(&self) -> Option<String> {
        let name = match self.action.as_ref()? {
            serde_json::Value::Null => return None,
            serde_json::Value::String(name) => name.trim().to_string(),
            other => other.to_string(),
        };
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub event: Event,
    pub data: PlayerState,
}

/// Body of the deprecated `POST /api/user/{id}` sync endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub status: String,
    pub data: PlayerState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub username: String,
    pub first_name: String,
    pub coins: f64,
    pub multi_tap_level: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Aggregate figures for the administrative overview.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub total_users: u64,
    pub total_coins: f64,
    pub top_player: Option<LeaderboardEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrantRequest {
    pub coins: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BanRequest {
    #[serde(default)]
    pub minutes: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub user_id: String,
    pub data: PlayerState,
    pub banned_for_secs: Option<u64>,
}

/// Result of an administrative mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminOpResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PlayerState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ActionRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn action_names_are_trimmed() {
        assert_eq!(parse(r#"{"action":" tap "}"#).action_name().as_deref(), Some("tap"));
        assert_eq!(ActionRequest::named("buy_skin").action_name().as_deref(), Some("buy_skin"));
    }

    #[test]
    fn missing_or_blank_action() {
        assert_eq!(parse("{}").action_name(), None);
        assert_eq!(parse(r#"{"action":null}"#).action_name(), None);
        assert_eq!(parse(r#"{"action":"   "}"#).action_name(), None);
    }

    #[test]
    fn scalar_actions_use_json_text() {
        assert_eq!(parse(r#"{"action":5}"#).action_name().as_deref(), Some("5"));
        assert_eq!(parse(r#"{"action":true}"#).action_name().as_deref(), Some("true"));
    }

    #[test]
    fn leaderboard_entry_wire_shape() {
        let entry = LeaderboardEntry {
            user_id: "1".into(),
            username: "ann".into(),
            first_name: "Ann".into(),
            coins: 12.0,
            multi_tap_level: 2,
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!({
                "user_id": "1",
                "username": "ann",
                "first_name": "Ann",
                "coins": 12.0,
                "multi_tap_level": 2
            })
        );
    }
}
