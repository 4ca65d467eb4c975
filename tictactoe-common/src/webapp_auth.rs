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

//! Verification of Telegram Mini App launch payloads (`initData`).
//!
//! The launcher signs every field except `hash` with a two stage
//! HMAC-SHA256 chain: the bot token is first keyed by the literal
//! `WebAppData`, and the result keys the signature over the sorted,
//! newline-joined `key=value` lines.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use sha2::Sha256;
use thiserror::Error;

use crate::AuthenticatedIdentity;

type HmacSha256 = Hmac<Sha256>;

pub const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";
pub const HASH_FIELD: &str = "hash";
pub const USER_FIELD: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("malformed auth payload: {0}")]
    MalformedPayload(String),
    #[error("auth payload signature mismatch")]
    SignatureMismatch,
    #[error("auth payload has no user field")]
    MissingUserField,
    #[error("corrupt user field: {0}")]
    CorruptUserField(String),
    #[error("bot token is not configured")]
    MissingSecret,
}

impl VerificationFailure {
    /// `false` when the failure comes from server configuration, not the caller.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::MissingSecret)
    }
}

/// Decode a form-encoded payload into its fields. Repeated keys keep the last value.
pub fn parse_payload(raw: &str) -> Result<BTreeMap<String, String>, VerificationFailure> {
    if raw.trim().is_empty() {
        return Err(VerificationFailure::MalformedPayload(
            "payload is empty".to_string(),
        ));
    }

    let fields: BTreeMap<String, String> = form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if !fields.contains_key(HASH_FIELD) {
        return Err(VerificationFailure::MalformedPayload(
            "hash field is missing".to_string(),
        ));
    }
    Ok(fields)
}

pub fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .filter(|(key, _)| key.as_str() != HASH_FIELD)
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn derive_secret(bot_token: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(WEB_APP_DATA_KEY)
        .expect("HMAC accepts keys of any length");
    mac.update(bot_token.as_bytes());
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&mac.finalize().into_bytes());
    secret
}

fn payload_mac(fields: &BTreeMap<String, String>, bot_token: &str) -> HmacSha256 {
    let secret = derive_secret(bot_token);
    let mut mac =
        HmacSha256::new_from_slice(&secret).expect("HMAC accepts keys of any length");
    mac.update(data_check_string(fields).as_bytes());
    mac
}

/// Hex signature the launcher would attach to `fields`. Any `hash` entry is ignored.
pub fn sign(fields: &BTreeMap<String, String>, bot_token: &str) -> String {
    hex::encode(payload_mac(fields, bot_token).finalize().into_bytes())
}

pub fn verify(raw: &str, bot_token: &str) -> Result<AuthenticatedIdentity, VerificationFailure> {
    if bot_token.is_empty() {
        return Err(VerificationFailure::MissingSecret);
    }

    let fields = parse_payload(raw)?;
    let received_hash = fields.get(HASH_FIELD).map(String::as_str).unwrap_or_default();
    let received = hex::decode(received_hash).map_err(|error| {
        VerificationFailure::MalformedPayload(format!("hash is not hex: {error}"))
    })?;

    payload_mac(&fields, bot_token)
        .verify_slice(&received)
        .map_err(|_| VerificationFailure::SignatureMismatch)?;

    let user = fields
        .get(USER_FIELD)
        .ok_or(VerificationFailure::MissingUserField)?;
    decode_user(user)
}

/// Constant-time equality for shared secrets such as webhook tokens.
///
/// Both sides are MACed under the same key first so the comparison does not
/// depend on the length or content of `expected`.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    let tag = |value: &str| {
        let mut mac = HmacSha256::new_from_slice(WEB_APP_DATA_KEY)
            .expect("HMAC accepts keys of any length");
        mac.update(value.as_bytes());
        mac
    };
    let expected_tag = tag(expected).finalize().into_bytes();
    tag(presented).verify_slice(&expected_tag).is_ok()
}

/// Decode the JSON `user` object, undoing one extra layer of percent-encoding if present.
pub fn decode_user(value: &str) -> Result<AuthenticatedIdentity, VerificationFailure> {
    let identity = match serde_json::from_str::<AuthenticatedIdentity>(value) {
        Ok(identity) => identity,
        Err(first_error) => {
            let decoded = percent_decode_str(value)
                .decode_utf8()
                .map_err(|error| VerificationFailure::CorruptUserField(error.to_string()))?;
            if decoded == value {
                return Err(VerificationFailure::CorruptUserField(
                    first_error.to_string(),
                ));
            }
            serde_json::from_str::<AuthenticatedIdentity>(&decoded)
                .map_err(|error| VerificationFailure::CorruptUserField(error.to_string()))?
        }
    };

    if identity.id.trim().is_empty() {
        return Err(VerificationFailure::CorruptUserField(
            "user id is empty".to_string(),
        ));
    }
    Ok(identity)
}
