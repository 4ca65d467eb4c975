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

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lambda_http::run as lambda_run;
use serde::{Deserialize, Serialize};
use tictactoe_common::{DEFAULT_GAME_URL, webapp_auth};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

const START_TEXT: &str = "Hi! 👋 Welcome to Tic-Tac-Toe. Send /play to start a game.";
const PLAY_TEXT: &str = "Tap the button below to start playing:";
const PLAY_BUTTON_TEXT: &str = "Play Tic-Tac-Toe 🎲";
const HELP_TEXT: &str = "Sorry, I didn't get that. Send /play to start a game.";

#[derive(Clone)]
struct AppState {
    bot: Option<Arc<dyn BotApi>>,
    game_url: String,
    webhook_secret: Option<String>,
}

#[async_trait]
trait BotApi: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> anyhow::Result<()>;
}

#[derive(Clone)]
struct TelegramBotApi {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    #[serde(default)]
    update_id: Option<i64>,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct OutgoingMessage {
    chat_id: i64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct InlineKeyboardButton {
    text: String,
    web_app: WebAppInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct WebAppInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TelegramApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BotCommand {
    Start,
    Play,
    Unknown,
}

impl TelegramBotApi {
    fn new(token: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }
}

#[async_trait]
impl BotApi for TelegramBotApi {
    async fn send_message(&self, message: &OutgoingMessage) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(message)
            .send()
            .await
            // reqwest errors carry the URL, which embeds the token.
            .map_err(|e| anyhow::anyhow!("sendMessage request failed: {}", e.without_url()))?;

        let status = response.status();
        let reply = response
            .json::<TelegramApiReply>()
            .await
            .map_err(|e| anyhow::anyhow!("invalid sendMessage reply ({status}): {}", e.without_url()))?;
        if !reply.ok {
            anyhow::bail!(
                "sendMessage rejected ({status}): {}",
                reply.description.unwrap_or_default()
            );
        }

        info!(chat_id = message.chat_id, "reply sent to Telegram chat");
        Ok(())
    }
}

impl AppState {
    fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
        };

        let bot: Option<Arc<dyn BotApi>> = match non_empty("BOT_TOKEN") {
            Some(token) => {
                let api_base = non_empty("TELEGRAM_API_BASE")
                    .unwrap_or_else(|| "https://api.telegram.org".to_string());
                Some(Arc::new(TelegramBotApi::new(token, api_base)))
            }
            None => {
                warn!("BOT_TOKEN not set; webhook updates will be rejected");
                None
            }
        };

        Self {
            bot,
            game_url: non_empty("GAME_URL").unwrap_or_else(|| DEFAULT_GAME_URL.to_string()),
            webhook_secret: non_empty("TELEGRAM_WEBHOOK_SECRET"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "bot_service=debug,tower_http=info".to_string()),
        )
        .init();

    let state = AppState::from_env();
    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running bot-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("BOT_SERVICE_BIND", "0.0.0.0:8091")?;
    info!(%bind_addr, "bot-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram", post(webhook_handler))
        .route("/api/telegram", post(webhook_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "bot-service",
        "bot_configured": state.bot.is_some(),
    }))
}

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bot = state
        .bot
        .as_ref()
        .ok_or_else(|| ApiError::internal("bot not initialized"))?;

    if let Some(secret) = state.webhook_secret.as_deref() {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if !presented.is_some_and(|value| webapp_auth::secrets_match(value, secret)) {
            return Err(ApiError::forbidden("invalid webhook secret"));
        }
    }

    let update: TelegramUpdate = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;

    let Some((chat_id, text)) = update
        .message
        .and_then(|message| message.text.map(|text| (message.chat.id, text)))
    else {
        info!(update_id = ?update.update_id, "ignoring update without text message");
        return Ok(Json(serde_json::json!({"status": "ok"})));
    };

    let command = parse_command(&text);
    info!(chat_id, command = ?command, "handling bot command");
    let reply = reply_for(command, chat_id, &state.game_url);

    bot.send_message(&reply)
        .await
        .map_err(|e| ApiError::internal(format!("failed to send reply: {e}")))?;

    Ok(Json(serde_json::json!({"status": "ok"})))
}

/// Commands may carry a bot mention (`/play@SomeBot`) in group chats.
fn parse_command(text: &str) -> BotCommand {
    let first = text.split_whitespace().next().unwrap_or_default();
    let command = first.split('@').next().unwrap_or_default();
    match command {
        "/start" => BotCommand::Start,
        "/play" => BotCommand::Play,
        _ => BotCommand::Unknown,
    }
}

fn reply_for(command: BotCommand, chat_id: i64, game_url: &str) -> OutgoingMessage {
    match command {
        BotCommand::Start => OutgoingMessage {
            chat_id,
            text: START_TEXT.to_string(),
            reply_markup: None,
        },
        BotCommand::Play => OutgoingMessage {
            chat_id,
            text: PLAY_TEXT.to_string(),
            reply_markup: Some(InlineKeyboardMarkup {
                inline_keyboard: vec![vec![InlineKeyboardButton {
                    text: PLAY_BUTTON_TEXT.to_string(),
                    web_app: WebAppInfo {
                        url: game_url.to_string(),
                    },
                }]],
            }),
        },
        BotCommand::Unknown => OutgoingMessage {
            chat_id,
            text: HELP_TEXT.to_string(),
            reply_markup: None,
        },
    }
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
