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

use chrono::Utc;
use tictactoe_common::{
    AuthenticatedIdentity, DEFAULT_FIRST_NAME, LeaderboardEntry, ScoreAction, UserProfile,
    normalize_game_type, placeholder_username,
};
use tracing::info;

use crate::store::{LeaderboardStore, StoreError};

/// Independent ranking namespace, one per game type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardPartition {
    game_type: String,
}

impl LeaderboardPartition {
    pub fn new(game_type: Option<&str>) -> Self {
        Self {
            game_type: normalize_game_type(game_type),
        }
    }

    pub fn game_type(&self) -> &str {
        &self.game_type
    }

    pub fn key(&self) -> String {
        format!("leaderboard:{}", self.game_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    RejectedLowerScore,
}

impl SubmitStatus {
    pub fn action(self) -> ScoreAction {
        match self {
            Self::Accepted => ScoreAction::Updated,
            Self::RejectedLowerScore => ScoreAction::NotUpdatedLowerScore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub status: SubmitStatus,
    pub previous_score: Option<i64>,
}

/// Raise the user's best score in `partition` if `score` beats it, then refresh the profile.
///
/// The profile is written even when the score is rejected. The two writes are
/// independent: a failure between them leaves the previous profile in place.
pub async fn submit(
    store: &dyn LeaderboardStore,
    partition: &LeaderboardPartition,
    identity: &AuthenticatedIdentity,
    score: i64,
) -> Result<SubmitOutcome, StoreError> {
    let write = store
        .set_if_greater(&partition.key(), &identity.id, score)
        .await?;
    let status = if write.updated {
        SubmitStatus::Accepted
    } else {
        SubmitStatus::RejectedLowerScore
    };

    info!(
        user_id = %identity.id,
        game_type = %partition.game_type(),
        score,
        previous_score = ?write.previous,
        status = ?status,
        "score submission processed"
    );

    store
        .put_profile(&identity.id, &UserProfile::from_identity(identity, Utc::now()))
        .await?;

    Ok(SubmitOutcome {
        status,
        previous_score: write.previous,
    })
}

pub async fn top_n(
    store: &dyn LeaderboardStore,
    partition: &LeaderboardPartition,
    limit: usize,
) -> Result<Vec<LeaderboardEntry>, StoreError> {
    let ranked = store.top(&partition.key(), limit).await?;
    if ranked.is_empty() {
        return Ok(vec![]);
    }

    let user_ids: Vec<String> = ranked.iter().map(|(user_id, _)| user_id.clone()).collect();
    let profiles = store.get_profiles(&user_ids).await?;

    Ok(ranked
        .into_iter()
        .zip(profiles.into_iter().chain(std::iter::repeat(None)))
        .enumerate()
        .map(|(index, ((user_id, score), profile))| {
            to_entry(index + 1, user_id, score, profile)
        })
        .collect())
}

fn to_entry(
    rank: usize,
    user_id: String,
    score: i64,
    profile: Option<UserProfile>,
) -> LeaderboardEntry {
    let profile = profile.unwrap_or_default();
    let username = profile
        .username
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| placeholder_username(&user_id));
    let first_name = profile
        .first_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FIRST_NAME.to_string());

    LeaderboardEntry {
        rank,
        user_id,
        username,
        first_name,
        score,
    }
}
