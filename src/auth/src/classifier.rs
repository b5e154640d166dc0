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

use crate::errors::{Error, ReasonCode};
use http::StatusCode;
use serde::Deserialize;

/// The `requirements.code` the IAM endpoint uses for locked accounts.
pub const ACCOUNT_LOCKED_CODE: &str = "SoftLayer_Exception_User_Customer_AccountLocked";

pub(crate) const EXCHANGE_FAILED_MSG: &str = "IAM token exchange request failed";
pub(crate) const UNEXPECTED_RESPONSE_MSG: &str = "Unexpected IAM token exchange response";
pub(crate) const ACCOUNT_LOCKED_MSG: &str = "Infrastructure account is temporarily locked";
pub(crate) const EMPTY_BODY_MSG: &str = "empty response body";

/// The error body returned by the IAM token endpoint.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub error_details: Option<String>,
    pub requirements: Option<Requirements>,
}

/// The nested `requirements` object of an [ErrorResponse].
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Requirements {
    pub error: Option<String>,
    pub code: Option<String>,
}

/// Classifies an error response from the IAM token endpoint.
///
/// The rules apply in order:
/// 1. An empty body is [ReasonCode::Unclassified] with an
///    `"empty response body"` cause.
/// 2. A body that is not an error document is
///    [ReasonCode::Unclassified].
/// 3. A `requirements.code` matching [ACCOUNT_LOCKED_CODE] is
///    [ReasonCode::ProviderAccountTemporarilyLocked].
/// 4. A body without `errorMessage` is [ReasonCode::Unclassified].
/// 5. Anything else is [ReasonCode::FailedTokenExchange].
pub fn classify(status: StatusCode, body: &str) -> Error {
    if body.trim().is_empty() {
        return empty_body();
    }
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(response) => classify_response(status, response),
        Err(e) => unexpected_response().wrap(e),
    }
}

/// Classifies an already decoded error body. See [classify].
pub fn classify_response(status: StatusCode, response: ErrorResponse) -> Error {
    let ErrorResponse {
        error_message,
        error_code,
        error_details,
        requirements,
    } = response;
    let requirements = requirements.unwrap_or_default();
    let message = error_message.filter(|m| !m.is_empty());
    let locked = requirements.code.as_deref() == Some(ACCOUNT_LOCKED_CODE);
    if message.is_none() && !locked {
        return unexpected_response();
    }

    let mut properties = vec![("status".to_string(), status.as_u16().to_string())];
    if let Some(code) = &error_code {
        properties.push(("errorCode".to_string(), code.clone()));
    }
    let inner_message = match &message {
        Some(m) => format!("{EXCHANGE_FAILED_MSG}: {m}"),
        None => EXCHANGE_FAILED_MSG.to_string(),
    };
    let mut failed = Error::new(ReasonCode::FailedTokenExchange, inner_message)
        .with_properties(properties.clone());
    if let Some(m) = &message {
        failed = failed.with_backend_error(m);
    }
    if let Some(cause) = format_cause(error_details.as_deref(), &requirements) {
        failed = failed.wrap_msg(cause);
    }
    if !locked {
        return failed;
    }
    let mut outer = Error::new(ReasonCode::ProviderAccountTemporarilyLocked, ACCOUNT_LOCKED_MSG)
        .with_properties(properties);
    if let Some(m) = failed.backend_error() {
        outer = outer.with_backend_error(m);
    }
    outer.wrap(failed)
}

/// Maps a failure to reach the endpoint, or to read its response.
pub fn transport_error<E>(cause: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::unclassified(EXCHANGE_FAILED_MSG, cause)
}

pub(crate) fn empty_body() -> Error {
    Error::new(ReasonCode::Unclassified, EXCHANGE_FAILED_MSG).wrap_msg(EMPTY_BODY_MSG)
}

pub(crate) fn unexpected_response() -> Error {
    Error::new(ReasonCode::Unclassified, UNEXPECTED_RESPONSE_MSG)
}

fn format_cause(details: Option<&str>, requirements: &Requirements) -> Option<String> {
    let details = details.unwrap_or_default();
    match (&requirements.code, &requirements.error) {
        (None, None) if details.is_empty() => None,
        (None, None) => Some(details.to_string()),
        (code, error) => {
            let code = code.as_deref().unwrap_or_default();
            let error = error.as_deref().unwrap_or_default();
            Some(format!("{details} {code}: {error}").trim_start().to_string())
        }
    }
}
