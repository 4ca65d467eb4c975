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

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, bail};

const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;
/// Where the game client is served from.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://mynameiskaveh.github.io";
/// `CORS_ALLOWED_ORIGINS` value that accepts every origin.
pub const ANY_ORIGIN: &str = "*";

/// Where leaderboard data lives.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreSettings {
    Upstash { url: String, token: String },
    Memory,
    Unconfigured,
}

#[derive(Clone)]
pub struct ServiceConfig {
    pub bot_token: Option<String>,
    pub store: StoreSettings,
    pub store_timeout: Duration,
    pub cors_allowed_origins: Vec<String>,
    pub bind_addr: SocketAddr,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let backend = non_empty("SCORE_STORE_BACKEND").unwrap_or_else(|| "upstash".to_string());
        let store = match backend.trim().to_ascii_lowercase().as_str() {
            "upstash" => match (non_empty("KV_REST_API_URL"), non_empty("KV_REST_API_TOKEN")) {
                (Some(url), Some(token)) => StoreSettings::Upstash { url, token },
                _ => StoreSettings::Unconfigured,
            },
            "memory" => StoreSettings::Memory,
            other => bail!("unsupported SCORE_STORE_BACKEND {other:?} (expected upstash or memory)"),
        };

        let store_timeout = match non_empty("STORE_TIMEOUT_MS") {
            Some(value) => Duration::from_millis(
                value
                    .trim()
                    .parse::<u64>()
                    .context("invalid STORE_TIMEOUT_MS")?,
            ),
            None => Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        };

        let cors_allowed_origins = non_empty("CORS_ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(|origin| origin.trim_end_matches('/').to_string())
                    .collect()
            })
            .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);

        let bind_addr = non_empty("SCORE_SERVICE_BIND")
            .unwrap_or_else(|| "0.0.0.0:8090".to_string())
            .parse()
            .context("invalid SCORE_SERVICE_BIND")?;

        Ok(Self {
            bot_token: non_empty("BOT_TOKEN"),
            store,
            store_timeout,
            cors_allowed_origins,
            bind_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<ServiceConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ServiceConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_leave_store_unconfigured() {
        let config = config_from(&[]).unwrap();
        assert!(config.store == StoreSettings::Unconfigured);
        assert!(config.bot_token.is_none());
        assert_eq!(
            config.cors_allowed_origins,
            vec![DEFAULT_ALLOWED_ORIGIN.to_string()]
        );
        assert_eq!(config.store_timeout, Duration::from_millis(5000));
        assert_eq!(config.bind_addr, "0.0.0.0:8090".parse().unwrap());
    }

    #[test]
    fn upstash_requires_url_and_token() {
        let partial = config_from(&[("KV_REST_API_URL", "https://kv.example")]).unwrap();
        assert!(partial.store == StoreSettings::Unconfigured);

        let full = config_from(&[
            ("KV_REST_API_URL", "https://kv.example"),
            ("KV_REST_API_TOKEN", "secret"),
            ("BOT_TOKEN", "123:abc"),
        ])
        .unwrap();
        assert!(
            full.store
                == StoreSettings::Upstash {
                    url: "https://kv.example".to_string(),
                    token: "secret".to_string(),
                }
        );
        assert_eq!(full.bot_token.as_deref(), Some("123:abc"));
    }

    #[test]
    fn memory_backend_is_selectable() {
        let config = config_from(&[("SCORE_STORE_BACKEND", "Memory")]).unwrap();
        assert!(config.store == StoreSettings::Memory);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(config_from(&[("SCORE_STORE_BACKEND", "postgres")]).is_err());
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = config_from(&[(
            "CORS_ALLOWED_ORIGINS",
            " https://a.example/ , ,https://b.example",
        )])
        .unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn invalid_timeout_and_bind_are_errors() {
        assert!(config_from(&[("STORE_TIMEOUT_MS", "soon")]).is_err());
        assert!(config_from(&[("SCORE_SERVICE_BIND", "nowhere")]).is_err());
    }
}
