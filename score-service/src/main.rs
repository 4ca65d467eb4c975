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

mod config;
mod leaderboard;
mod store;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lambda_http::run as lambda_run;
use tictactoe_common::{
    AuthenticatedIdentity, LeaderboardQuery, LeaderboardResponse, MAX_SCORE, MIN_SCORE,
    SubmitScoreRequest, SubmitScoreResponse, clamp_leaderboard_limit, is_score_in_range,
    webapp_auth,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::{ANY_ORIGIN, ServiceConfig, StoreSettings},
    leaderboard::LeaderboardPartition,
    store::{LeaderboardStore, MemoryStore, StoreError, UpstashStore},
};

#[derive(Clone)]
struct AppState {
    store: Option<Arc<dyn LeaderboardStore>>,
    bot_token: Option<Arc<str>>,
}

impl AppState {
    fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let store: Option<Arc<dyn LeaderboardStore>> = match &config.store {
            StoreSettings::Upstash { url, token } => {
                info!(
                    url_prefix = %url.chars().take(20).collect::<String>(),
                    "using Upstash REST leaderboard store"
                );
                Some(Arc::new(UpstashStore::new(url, token, config.store_timeout)?))
            }
            StoreSettings::Memory => {
                warn!("using in-memory leaderboard store; scores are lost on restart");
                Some(Arc::new(MemoryStore::default()))
            }
            StoreSettings::Unconfigured => {
                warn!(
                    "KV_REST_API_URL / KV_REST_API_TOKEN not set; store-backed endpoints will fail"
                );
                None
            }
        };

        if config.bot_token.is_none() {
            warn!("BOT_TOKEN not set; score submissions cannot be authenticated");
        }

        Ok(Self {
            store,
            bot_token: config.bot_token.as_deref().map(Arc::from),
        })
    }

    fn store(&self) -> Result<&dyn LeaderboardStore, ApiError> {
        self.store
            .as_deref()
            .ok_or_else(|| ApiError::internal("leaderboard store is not configured"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "score_service=debug,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let state = AppState::from_config(&config)?;
    let app = build_router(state, &config.cors_allowed_origins);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running score-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = config.bind_addr;
    info!(%bind_addr, "score-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/score_test", get(health))
        .route("/submit-score", post(submit_score_handler))
        .route("/api/submit_score", post(submit_score_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|origin| origin == ANY_ORIGIN) {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(origin = %origin, error = %error, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let Some(store) = state.store.as_ref() else {
        return Json(serde_json::json!({
            "ok": true,
            "service": "score-service",
            "store_configured": false,
            "store_reachable": false,
        }));
    };

    match store.ping().await {
        Ok(pong) => Json(serde_json::json!({
            "ok": true,
            "service": "score-service",
            "store_configured": true,
            "store_reachable": true,
            "ping": pong,
        })),
        Err(error) => {
            warn!(error = %error, "store ping failed");
            Json(serde_json::json!({
                "ok": true,
                "service": "score-service",
                "store_configured": true,
                "store_reachable": false,
                "error": "store ping failed",
            }))
        }
    }
}

async fn submit_score_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitScoreRequest>,
) -> Result<Json<SubmitScoreResponse>, ApiError> {
    let partition = LeaderboardPartition::new(request.game_type.as_deref());
    info!(
        score = request.score,
        game_type = %partition.game_type(),
        "received score submission"
    );

    let store = state.store()?;
    let identity = authenticate(&state, &request.auth_payload)?;

    if !is_score_in_range(request.score) {
        return Err(ApiError::bad_request(format!(
            "score must be between {MIN_SCORE} and {MAX_SCORE}"
        )));
    }

    let outcome = leaderboard::submit(store, &partition, &identity, request.score)
        .await
        .map_err(|e| ApiError::from_store("failed to save score", e))?;
    let action = outcome.status.action();

    Ok(Json(SubmitScoreResponse {
        status: "success".to_string(),
        message: format!(
            "Score processed for user {}. Action: {}",
            identity.id,
            action.as_str()
        ),
        user_id: identity.id,
        submitted_score: request.score,
        previous_score: outcome.previous_score,
        action,
        leaderboard_key: partition.key(),
    }))
}

fn authenticate(
    state: &AppState,
    auth_payload: &str,
) -> Result<AuthenticatedIdentity, ApiError> {
    let bot_token = state.bot_token.as_deref().unwrap_or_default();
    webapp_auth::verify(auth_payload, bot_token).map_err(|failure| {
        if failure.is_client_error() {
            warn!(reason = %failure, "score submission rejected: authentication failed");
            ApiError::forbidden("invalid user authentication")
        } else {
            warn!(reason = %failure, "score submission cannot be authenticated");
            ApiError::internal("authentication is not configured")
        }
    })
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let partition = LeaderboardPartition::new(query.game_type.as_deref());
    let limit = clamp_leaderboard_limit(query.limit);
    let store = state.store()?;

    let leaderboard = leaderboard::top_n(store, &partition, limit)
        .await
        .map_err(|e| ApiError::from_store("failed to load leaderboard", e))?;

    let message = leaderboard
        .is_empty()
        .then(|| format!("no scores recorded for {} yet", partition.game_type()));

    Ok(Json(LeaderboardResponse {
        game_type: partition.game_type().to_string(),
        leaderboard,
        message,
    }))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    /// Store details stay in the log; clients only see `message`.
    fn from_store(message: &str, error: StoreError) -> Self {
        warn!(error = %error, "{message}");
        Self::internal(message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
