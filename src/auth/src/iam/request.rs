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

use crate::Result;
use crate::classifier::{classify, empty_body, transport_error, unexpected_response};
use crate::token::{AccessToken, ImsToken};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::{Url, form_urlencoded};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(thiserror::Error, Debug)]
pub(crate) enum TransportError {
    #[error("POST \"{url}\": unsupported protocol scheme \"{scheme}\"")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("POST \"{url}\": {source}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("POST \"{url}\": {source}")]
    Send { url: String, source: reqwest::Error },
    #[error("POST \"{url}\": cannot read response body: {source}")]
    Read { url: String, source: reqwest::Error },
}

/// The success body of the IAM token endpoint.
///
/// Every field is optional, each flow checks for the fields it needs.
#[derive(Clone, Default, Deserialize, PartialEq)]
pub(crate) struct TokenExchangeResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub expiration: Option<i64>,
    pub scope: Option<String>,
    pub ims_token: Option<String>,
    pub ims_user_id: Option<i64>,
}

impl TokenExchangeResponse {
    pub(crate) fn into_access_token(self) -> Result<AccessToken> {
        match self.access_token {
            Some(token) if !token.is_empty() => Ok(AccessToken { token }),
            _ => Err(unexpected_response()),
        }
    }

    pub(crate) fn into_ims_token(self) -> Result<ImsToken> {
        match (self.ims_token, self.ims_user_id) {
            (Some(token), Some(user_id)) if !token.is_empty() => Ok(ImsToken { user_id, token }),
            _ => Err(unexpected_response()),
        }
    }
}

impl std::fmt::Debug for TokenExchangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let censor = |v: &Option<String>| v.as_ref().map(|_| "[censored]");
        f.debug_struct("TokenExchangeResponse")
            .field("access_token", &censor(&self.access_token))
            .field("refresh_token", &censor(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expiration", &self.expiration)
            .field("scope", &self.scope)
            .field("ims_token", &censor(&self.ims_token))
            .field("ims_user_id", &self.ims_user_id)
            .finish()
    }
}

/// HTTP Basic credentials for the token endpoint.
#[derive(Clone)]
pub(crate) struct ClientAuthentication {
    client_id: String,
    client_secret: String,
}

impl ClientAuthentication {
    /// Returns `None` unless both values are set.
    pub(crate) fn new(client_id: &str, client_secret: &str) -> Option<Self> {
        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }
        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    fn inject_auth(&self, headers: &mut HeaderMap) {
        let encoded = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        if let Ok(mut value) = HeaderValue::from_str(&format!("Basic {encoded}")) {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
    }
}

/// Joins the base endpoint URL and a token path.
pub(crate) fn token_url(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

/// Sends a URL-encoded form to the token endpoint and decodes the response.
///
/// Non-2xx responses are classified. A 2xx response must carry a JSON body.
pub(crate) async fn post_form(
    client: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
    client_auth: Option<&ClientAuthentication>,
) -> Result<TokenExchangeResponse> {
    let target = parse_url(url).map_err(transport_error)?;
    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(auth) = client_auth {
        auth.inject_auth(&mut headers);
    }

    tracing::debug!(url, "sending token request");
    let response = client
        .post(target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|source| {
            transport_error(TransportError::Send {
                url: url.to_string(),
                source,
            })
        })?;

    let status = response.status();
    let text = response.text().await.map_err(|source| {
        transport_error(TransportError::Read {
            url: url.to_string(),
            source,
        })
    })?;
    tracing::debug!(url, status = status.as_u16(), "received token response");

    if !status.is_success() {
        return Err(classify(status, &text));
    }
    if text.trim().is_empty() {
        return Err(empty_body());
    }
    serde_json::from_str::<TokenExchangeResponse>(&text).map_err(|e| unexpected_response().wrap(e))
}

fn parse_url(url: &str) -> std::result::Result<Url, TransportError> {
    let unsupported = |scheme: &str| TransportError::UnsupportedScheme {
        url: url.to_string(),
        scheme: scheme.to_string(),
    };
    match Url::parse(url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(u),
        Ok(u) => Err(unsupported(u.scheme())),
        Err(url::ParseError::RelativeUrlWithoutBase) => Err(unsupported("")),
        Err(source) => Err(TransportError::InvalidUrl {
            url: url.to_string(),
            source,
        }),
    }
}
