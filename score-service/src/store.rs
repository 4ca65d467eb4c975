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

use std::{collections::HashMap, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tictactoe_common::UserProfile;
use tokio::sync::Mutex;
use tracing::warn;

// Runs server side so the read and the conditional write cannot interleave
// with another submission for the same member.
const SET_IF_GREATER_SCRIPT: &str = r#"
local previous = redis.call('ZSCORE', KEYS[1], ARGV[1])
if (not previous) or tonumber(ARGV[2]) > tonumber(previous) then
  redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
  return {previous, 1}
end
return {previous, 0}
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

/// Result of a conditional best-score write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWrite {
    pub previous: Option<i64>,
    pub updated: bool,
}

#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Store `score` for `member` only when it beats the current value, atomically.
    async fn set_if_greater(&self, key: &str, member: &str, score: i64)
    -> Result<ScoreWrite, StoreError>;
    async fn put_profile(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError>;
    async fn get_profiles(&self, user_ids: &[String])
    -> Result<Vec<Option<UserProfile>>, StoreError>;
    /// Highest scores first.
    async fn top(&self, key: &str, limit: usize) -> Result<Vec<(String, i64)>, StoreError>;
    async fn ping(&self) -> Result<String, StoreError>;
}

pub fn profile_key(user_id: &str) -> String {
    format!("user_info:{user_id}")
}

/// Redis client speaking the Upstash REST protocol.
#[derive(Clone)]
pub struct UpstashStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct UpstashReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashStore {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build store HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn command(&self, args: &[String]) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("store request failed: {e}")))?;

        let status = response.status();
        let reply = response.json::<UpstashReply>().await.map_err(|e| {
            StoreError::OperationFailed(format!("invalid store reply ({status}): {e}"))
        })?;

        if let Some(error) = reply.error {
            return Err(StoreError::OperationFailed(error));
        }
        if !status.is_success() {
            return Err(StoreError::OperationFailed(format!(
                "store returned {status}"
            )));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl LeaderboardStore for UpstashStore {
    async fn set_if_greater(
        &self,
        key: &str,
        member: &str,
        score: i64,
    ) -> Result<ScoreWrite, StoreError> {
        let result = self
            .command(&[
                "EVAL".to_string(),
                SET_IF_GREATER_SCRIPT.to_string(),
                "1".to_string(),
                key.to_string(),
                member.to_string(),
                score.to_string(),
            ])
            .await?;
        parse_score_write(&result)
    }

    async fn put_profile(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(profile)
            .map_err(|e| StoreError::OperationFailed(format!("failed to encode profile: {e}")))?;
        self.command(&["SET".to_string(), profile_key(user_id), encoded])
            .await?;
        Ok(())
    }

    async fn get_profiles(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<Option<UserProfile>>, StoreError> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }
        let mut args = vec!["MGET".to_string()];
        args.extend(user_ids.iter().map(|user_id| profile_key(user_id)));
        let result = self.command(&args).await?;
        parse_profiles(&result, user_ids)
    }

    async fn top(&self, key: &str, limit: usize) -> Result<Vec<(String, i64)>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let result = self
            .command(&[
                "ZREVRANGE".to_string(),
                key.to_string(),
                "0".to_string(),
                (limit - 1).to_string(),
                "WITHSCORES".to_string(),
            ])
            .await?;
        parse_ranked_pairs(&result)
    }

    async fn ping(&self) -> Result<String, StoreError> {
        let result = self.command(&["PING".to_string()]).await?;
        Ok(match result {
            Value::String(pong) => pong,
            other => other.to_string(),
        })
    }
}

// Redis hands scores back as strings ("50" or "5e1"); JSON numbers are accepted too.
fn parse_score(value: &Value) -> Result<Option<i64>, StoreError> {
    let score = match value {
        Value::Null | Value::Bool(false) => return Ok(None),
        Value::String(text) => text.trim().parse::<f64>().map_err(|e| {
            StoreError::OperationFailed(format!("invalid score {text:?}: {e}"))
        })?,
        Value::Number(number) => number.as_f64().ok_or_else(|| {
            StoreError::OperationFailed(format!("invalid score {number}"))
        })?,
        other => {
            return Err(StoreError::OperationFailed(format!(
                "unexpected score reply {other}"
            )));
        }
    };
    Ok(Some(score.round() as i64))
}

fn parse_score_write(value: &Value) -> Result<ScoreWrite, StoreError> {
    let items = value.as_array().ok_or_else(|| {
        StoreError::OperationFailed(format!("unexpected set-if-greater reply {value}"))
    })?;
    let previous = parse_score(items.first().unwrap_or(&Value::Null))?;
    let updated = match items.get(1) {
        Some(Value::Number(flag)) => flag.as_i64() == Some(1),
        Some(Value::String(flag)) => flag == "1",
        _ => {
            return Err(StoreError::OperationFailed(format!(
                "unexpected set-if-greater reply {value}"
            )));
        }
    };
    Ok(ScoreWrite { previous, updated })
}

fn parse_ranked_pairs(value: &Value) -> Result<Vec<(String, i64)>, StoreError> {
    let items = match value {
        Value::Null => return Ok(vec![]),
        Value::Array(items) => items,
        other => {
            return Err(StoreError::OperationFailed(format!(
                "unexpected ranking reply {other}"
            )));
        }
    };
    if items.len() % 2 != 0 {
        return Err(StoreError::OperationFailed(
            "ranking reply has an odd number of items".to_string(),
        ));
    }

    items
        .chunks(2)
        .map(|pair| {
            let member = match &pair[0] {
                Value::String(member) => member.clone(),
                other => other.to_string(),
            };
            let score = parse_score(&pair[1])?.ok_or_else(|| {
                StoreError::OperationFailed(format!("missing score for {member}"))
            })?;
            Ok((member, score))
        })
        .collect()
}

fn parse_profiles(
    value: &Value,
    user_ids: &[String],
) -> Result<Vec<Option<UserProfile>>, StoreError> {
    let items = value.as_array().ok_or_else(|| {
        StoreError::OperationFailed(format!("unexpected profile reply {value}"))
    })?;

    Ok(user_ids
        .iter()
        .enumerate()
        .map(|(index, user_id)| match items.get(index) {
            Some(Value::String(encoded)) => match serde_json::from_str::<UserProfile>(encoded) {
                Ok(profile) => Some(profile),
                Err(error) => {
                    warn!(user_id = %user_id, error = %error, "ignoring unreadable user profile");
                    None
                }
            },
            _ => None,
        })
        .collect())
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    boards: HashMap<String, HashMap<String, i64>>,
    profiles: HashMap<String, UserProfile>,
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    async fn set_if_greater(
        &self,
        key: &str,
        member: &str,
        score: i64,
    ) -> Result<ScoreWrite, StoreError> {
        let mut state = self.inner.lock().await;
        let board = state.boards.entry(key.to_string()).or_default();
        let previous = board.get(member).copied();
        let updated = previous.is_none_or(|current| score > current);
        if updated {
            board.insert(member.to_string(), score);
        }
        Ok(ScoreWrite { previous, updated })
    }

    async fn put_profile(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        state
            .profiles
            .insert(user_id.to_string(), profile.clone());
        Ok(())
    }

    async fn get_profiles(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<Option<UserProfile>>, StoreError> {
        let state = self.inner.lock().await;
        Ok(user_ids
            .iter()
            .map(|user_id| state.profiles.get(user_id).cloned())
            .collect())
    }

    async fn top(&self, key: &str, limit: usize) -> Result<Vec<(String, i64)>, StoreError> {
        let state = self.inner.lock().await;
        let Some(board) = state.boards.get(key) else {
            return Ok(vec![]);
        };
        let mut ranked: Vec<(String, i64)> = board
            .iter()
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        // Same order as ZREVRANGE: score, then member, both descending.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn ping(&self) -> Result<String, StoreError> {
        Ok("PONG".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct FakeUpstash {
        commands: Arc<StdMutex<Vec<Vec<String>>>>,
        replies: Arc<StdMutex<Vec<(StatusCode, Value)>>>,
    }

    async fn fake_upstash_handler(
        State(fake): State<FakeUpstash>,
        headers: HeaderMap,
        Json(args): Json<Vec<String>>,
    ) -> (StatusCode, Json<Value>) {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer kv-token") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Unauthorized"})),
            );
        }
        fake.commands.lock().unwrap().push(args);
        let (status, body) = fake.replies.lock().unwrap().remove(0);
        (status, Json(body))
    }

    async fn spawn_fake(replies: Vec<(StatusCode, Value)>) -> (String, FakeUpstash) {
        let fake = FakeUpstash {
            commands: Arc::default(),
            replies: Arc::new(StdMutex::new(replies)),
        };
        let app = Router::new()
            .route("/", post(fake_upstash_handler))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), fake)
    }

    fn upstash(url: &str, token: &str) -> UpstashStore {
        UpstashStore::new(url, token, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn parse_score_accepts_strings_numbers_and_nil() {
        assert_eq!(parse_score(&json!("50")).unwrap(), Some(50));
        assert_eq!(parse_score(&json!("5e1")).unwrap(), Some(50));
        assert_eq!(parse_score(&json!(80)).unwrap(), Some(80));
        assert_eq!(parse_score(&Value::Null).unwrap(), None);
        assert!(parse_score(&json!("fifty")).is_err());
    }

    #[test]
    fn parse_score_write_reads_previous_and_flag() {
        assert_eq!(
            parse_score_write(&json!([null, 1])).unwrap(),
            ScoreWrite {
                previous: None,
                updated: true
            }
        );
        assert_eq!(
            parse_score_write(&json!(["50", 0])).unwrap(),
            ScoreWrite {
                previous: Some(50),
                updated: false
            }
        );
        assert!(parse_score_write(&json!("OK")).is_err());
    }

    #[test]
    fn parse_ranked_pairs_splits_flat_reply() {
        let pairs = parse_ranked_pairs(&json!(["u2", "90", "u1", "40"])).unwrap();
        assert_eq!(
            pairs,
            vec![("u2".to_string(), 90), ("u1".to_string(), 40)]
        );
        assert!(parse_ranked_pairs(&json!(["u2"])).is_err());
        assert!(parse_ranked_pairs(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn parse_profiles_skips_missing_and_legacy_garbage() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let profiles = parse_profiles(
            &json!([r#"{"username":"alice","first_name":"Alice"}"#, null, "not json"]),
            &ids,
        )
        .unwrap();
        assert_eq!(profiles[0].as_ref().unwrap().username.as_deref(), Some("alice"));
        assert!(profiles[1].is_none());
        assert!(profiles[2].is_none());
    }

    #[tokio::test]
    async fn memory_store_only_raises_scores() {
        let store = MemoryStore::default();
        let first = store.set_if_greater("board", "u1", 0).await.unwrap();
        let tie = store.set_if_greater("board", "u1", 0).await.unwrap();
        let higher = store.set_if_greater("board", "u1", 7).await.unwrap();
        let lower = store.set_if_greater("board", "u1", 3).await.unwrap();

        assert_eq!(first, ScoreWrite { previous: None, updated: true });
        assert_eq!(tie, ScoreWrite { previous: Some(0), updated: false });
        assert_eq!(higher, ScoreWrite { previous: Some(0), updated: true });
        assert_eq!(lower, ScoreWrite { previous: Some(7), updated: false });
        assert_eq!(
            store.top("board", 10).await.unwrap(),
            vec![("u1".to_string(), 7)]
        );
    }

    #[tokio::test]
    async fn memory_store_orders_like_zrevrange() {
        let store = MemoryStore::default();
        for (member, score) in [("a", 10), ("b", 30), ("c", 30), ("d", 20)] {
            store.set_if_greater("board", member, score).await.unwrap();
        }
        let top = store.top("board", 3).await.unwrap();
        assert_eq!(
            top,
            vec![
                ("c".to_string(), 30),
                ("b".to_string(), 30),
                ("d".to_string(), 20)
            ]
        );
    }

    #[tokio::test]
    async fn memory_store_concurrent_submissions_keep_maximum() {
        let store = Arc::new(MemoryStore::default());
        let mut handles = Vec::new();
        for score in [12, 99, 5, 42, 98, 1] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set_if_greater("board", "u1", score).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            store.top("board", 1).await.unwrap(),
            vec![("u1".to_string(), 99)]
        );
    }

    #[tokio::test]
    async fn upstash_set_if_greater_sends_single_eval() {
        let (url, fake) = spawn_fake(vec![(StatusCode::OK, json!({"result": ["50", 1]}))]).await;
        let store = upstash(&url, "kv-token");

        let write = store
            .set_if_greater("leaderboard:p", "u1", 80)
            .await
            .unwrap();

        assert_eq!(
            write,
            ScoreWrite {
                previous: Some(50),
                updated: true
            }
        );
        let commands = fake.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0][0], "EVAL");
        assert_eq!(&commands[0][2..], ["1", "leaderboard:p", "u1", "80"]);
    }

    #[tokio::test]
    async fn upstash_top_and_profiles_round_trip_through_rest() {
        let (url, fake) = spawn_fake(vec![
            (StatusCode::OK, json!({"result": ["u2", "90", "u1", "40"]})),
            (
                StatusCode::OK,
                json!({"result": [r#"{"username":"bob","first_name":"Bob"}"#, null]}),
            ),
        ])
        .await;
        let store = upstash(&url, "kv-token");

        let top = store.top("leaderboard:p", 2).await.unwrap();
        let ids: Vec<String> = top.iter().map(|(id, _)| id.clone()).collect();
        let profiles = store.get_profiles(&ids).await.unwrap();

        assert_eq!(top[0], ("u2".to_string(), 90));
        assert_eq!(profiles[0].as_ref().unwrap().first_name.as_deref(), Some("Bob"));
        assert!(profiles[1].is_none());
        let commands = fake.commands.lock().unwrap();
        assert_eq!(
            commands[0],
            ["ZREVRANGE", "leaderboard:p", "0", "1", "WITHSCORES"]
        );
        assert_eq!(commands[1], ["MGET", "user_info:u2", "user_info:u1"]);
    }

    #[tokio::test]
    async fn upstash_error_reply_is_operation_failure() {
        let (url, _fake) = spawn_fake(vec![]).await;
        let store = upstash(&url, "wrong-token");

        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, StoreError::OperationFailed(message) if message == "Unauthorized"));
    }

    #[tokio::test]
    async fn upstash_unreachable_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let store = upstash(&format!("http://{addr}"), "kv-token");

        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
