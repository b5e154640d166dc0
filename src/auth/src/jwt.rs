// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The tokens handled here were just returned by an endpoint reached over
//! TLS, or mounted by the cluster. Their signatures are not verified.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// JWT segments are unpadded, but some issuers pad them anyway.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Failures reading the claims of a token.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("empty token string")]
    Empty,
    #[error("token is not a three part JWT")]
    Malformed,
    #[error("cannot decode token segment: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("cannot parse token segment: {0}")]
    Json(#[from] serde_json::Error),
    #[error("token is invalid: {0}")]
    Invalid(&'static str),
    #[error("unable to find {0} claim of token")]
    MissingClaim(&'static str),
    #[error("token life time {actual}s is less than expected {expected}s")]
    LifetimeBelowBuffer { expected: u64, actual: i64 },
}

impl Error {
    /// The token could not be parsed at all.
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            Self::Empty | Self::Malformed | Self::Decode(_) | Self::Json(_)
        )
    }
}

/// Returns `true` if the token parses and its temporal claims hold.
///
/// The `exp`, `iat` and `nbf` claims are optional. When present, the token
/// must not be expired, issued in the future, or used before `nbf`.
pub fn is_token_valid(token: &str) -> bool {
    is_token_valid_at(token, now_secs())
}

/// Returns the remaining lifetime of the token.
///
/// Fails if the token is invalid, has no `exp` claim, or has less than
/// `min_buffer` of life left. The last case tells callers to refresh the
/// token now, rather than let it expire while in use.
pub fn fetch_token_lifetime(token: &str, min_buffer: Duration) -> Result<Duration, Error> {
    fetch_token_lifetime_at(token, min_buffer, now_secs())
}

/// Returns the `account.bss` claim of an IAM access token.
pub fn account_id_from_access_token(token: &str) -> Result<String, Error> {
    let claims = parse_claims(token)?;
    claims
        .get("account")
        .and_then(|a| a.get("bss"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(Error::MissingClaim("account.bss"))
}

fn is_token_valid_at(token: &str, now: i64) -> bool {
    let claims = match parse_claims(token) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("error parsing token: {e}");
            return false;
        }
    };
    match validate(&claims, now) {
        Ok(()) => {
            tracing::debug!("token is valid");
            true
        }
        Err(e) => {
            tracing::warn!("{e}");
            false
        }
    }
}

fn fetch_token_lifetime_at(token: &str, min_buffer: Duration, now: i64) -> Result<Duration, Error> {
    let claims = parse_claims(token)?;
    validate(&claims, now)?;
    let exp = numeric_claim(&claims, "exp")?.ok_or(Error::MissingClaim("exp"))?;
    let lifetime = exp.trunc() as i64 - now;
    let expected = min_buffer.as_secs();
    if lifetime < 0 || (lifetime as u64) < expected {
        tracing::warn!(expected, actual = lifetime, "token life time is less than expected");
        return Err(Error::LifetimeBelowBuffer {
            expected,
            actual: lifetime,
        });
    }
    Ok(Duration::from_secs(lifetime as u64))
}

fn parse_claims(token: &str) -> Result<Map<String, Value>, Error> {
    if token.is_empty() {
        return Err(Error::Empty);
    }
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Malformed);
    }
    let _header: Map<String, Value> = serde_json::from_slice(&SEGMENT_ENGINE.decode(parts[0])?)?;
    let claims = serde_json::from_slice(&SEGMENT_ENGINE.decode(parts[1])?)?;
    Ok(claims)
}

fn validate(claims: &Map<String, Value>, now: i64) -> Result<(), Error> {
    let now = now as f64;
    if numeric_claim(claims, "exp")?.is_some_and(|exp| now > exp) {
        return Err(Error::Invalid("token is expired"));
    }
    if numeric_claim(claims, "iat")?.is_some_and(|iat| now < iat) {
        return Err(Error::Invalid("token used before issued"));
    }
    if numeric_claim(claims, "nbf")?.is_some_and(|nbf| now < nbf) {
        return Err(Error::Invalid("token is not valid yet"));
    }
    Ok(())
}

fn numeric_claim(claims: &Map<String, Value>, name: &'static str) -> Result<Option<f64>, Error> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or(Error::Invalid("temporal claim is not a number")),
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
