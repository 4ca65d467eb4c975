// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub mod webapp_auth;

pub use webapp_auth::VerificationFailure;

pub const DEFAULT_GAME_TYPE: &str = "tictactoe_default_v1";
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;
pub const DEFAULT_FIRST_NAME: &str = "Player";
pub const DEFAULT_GAME_URL: &str = "https://mynameiskaveh.github.io/awesome-telegram-game/";

/// Lowest score accepted by the submit endpoint.
pub const MIN_SCORE: i64 = 0;
/// Highest score accepted by the submit endpoint.
pub const MAX_SCORE: i64 = 1_000_000;

pub type UserId = String;

/// Identity extracted from a verified Mini App launch payload.
///
/// Only [`webapp_auth::verify`] hands these out to request handlers; the
/// `Deserialize` impl exists to decode the signed `user` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

/// Display metadata kept per user, independent of any leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn from_identity(identity: &AuthenticatedIdentity, updated_at: DateTime<Utc>) -> Self {
        Self {
            username: identity.username.clone(),
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            language_code: identity.language_code.clone(),
            updated_at: Some(updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub username: String,
    pub first_name: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitScoreRequest {
    pub score: i64,
    #[serde(default)]
    pub game_type: Option<String>,
    #[serde(alias = "telegramInitData")]
    pub auth_payload: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreAction {
    Updated,
    NotUpdatedLowerScore,
}

impl ScoreAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::NotUpdatedLowerScore => "not_updated_lower_score",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitScoreResponse {
    pub status: String,
    pub message: String,
    pub user_id: UserId,
    pub submitted_score: i64,
    pub previous_score: Option<i64>,
    pub action: ScoreAction,
    pub leaderboard_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub game_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub game_type: String,
    pub leaderboard: Vec<LeaderboardEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Resolve the game type of a request, falling back to the default board.
pub fn normalize_game_type(game_type: Option<&str>) -> String {
    game_type
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_GAME_TYPE)
        .to_string()
}

pub fn clamp_leaderboard_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT)
}

/// Username shown for players who never shared one.
pub fn placeholder_username(user_id: &str) -> String {
    format!("user_{user_id}")
}

pub fn is_score_in_range(score: i64) -> bool {
    (MIN_SCORE..=MAX_SCORE).contains(&score)
}

// Telegram encodes user ids as JSON numbers; older launchers sent strings.
fn deserialize_user_id<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawUserId {
        Number(i64),
        Text(String),
    }

    match RawUserId::deserialize(deserializer)? {
        RawUserId::Number(value) => Ok(value.to_string()),
        RawUserId::Text(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_accepts_numeric_and_string_ids() {
        let numeric: AuthenticatedIdentity =
            serde_json::from_str(r#"{"id":279058397,"first_name":"Vladislav"}"#).unwrap();
        let text: AuthenticatedIdentity = serde_json::from_str(r#"{"id":"abc"}"#).unwrap();

        assert_eq!(numeric.id, "279058397");
        assert_eq!(numeric.first_name.as_deref(), Some("Vladislav"));
        assert_eq!(numeric.username, None);
        assert_eq!(text.id, "abc");
    }

    #[test]
    fn identity_ignores_unknown_launcher_fields() {
        let identity: AuthenticatedIdentity = serde_json::from_str(
            r#"{"id":1,"is_premium":true,"allows_write_to_pm":true,"photo_url":"x"}"#,
        )
        .unwrap();
        assert_eq!(identity.id, "1");
    }

    #[test]
    fn identity_without_id_is_rejected() {
        assert!(serde_json::from_str::<AuthenticatedIdentity>(r#"{"first_name":"A"}"#).is_err());
    }

    #[test]
    fn submit_request_accepts_legacy_init_data_alias() {
        let request: SubmitScoreRequest =
            serde_json::from_str(r#"{"score":5,"telegramInitData":"a=1&hash=00"}"#).unwrap();
        assert_eq!(request.auth_payload, "a=1&hash=00");
        assert_eq!(request.game_type, None);
    }

    #[test]
    fn score_action_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ScoreAction::NotUpdatedLowerScore).unwrap(),
            "\"not_updated_lower_score\""
        );
        assert_eq!(
            serde_json::to_string(&ScoreAction::Updated).unwrap(),
            "\"updated\""
        );
    }

    #[test]
    fn normalize_game_type_falls_back_to_default() {
        assert_eq!(normalize_game_type(None), DEFAULT_GAME_TYPE);
        assert_eq!(normalize_game_type(Some("   ")), DEFAULT_GAME_TYPE);
        assert_eq!(normalize_game_type(Some(" blitz ")), "blitz");
    }

    #[test]
    fn clamp_leaderboard_limit_keeps_bounds() {
        assert_eq!(clamp_leaderboard_limit(None), DEFAULT_LEADERBOARD_LIMIT);
        assert_eq!(clamp_leaderboard_limit(Some(0)), 1);
        assert_eq!(clamp_leaderboard_limit(Some(5000)), MAX_LEADERBOARD_LIMIT);
        assert_eq!(clamp_leaderboard_limit(Some(25)), 25);
    }

    #[test]
    fn score_range_includes_zero_and_rejects_negative() {
        assert!(is_score_in_range(0));
        assert!(is_score_in_range(MAX_SCORE));
        assert!(!is_score_in_range(-1));
        assert!(!is_score_in_range(MAX_SCORE + 1));
    }

    #[test]
    fn leaderboard_response_omits_missing_message() {
        let response = LeaderboardResponse {
            game_type: DEFAULT_GAME_TYPE.to_string(),
            leaderboard: vec![],
            message: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("message").is_none());
    }
}
