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

//! Exchanges with the IAM token endpoint.
//!
//! [TokenExchangeService] holds no mutable state of its own. It is cheap to
//! clone and safe to use from many tasks at once.

use super::request::{ClientAuthentication, TokenExchangeResponse, post_form, token_url};
use super::{AuthConfiguration, SecretProvider};
use crate::Result;
use crate::errors::{Error, ReasonCode};
use crate::jwt;
use crate::token::{AccessToken, ImsToken};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// The path of the token endpoint, relative to the IAM URL.
pub const TOKEN_PATH: &str = "/oidc/token";

/// The timeout of the HTTP client created by [TokenExchangeService::new].
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) const REFRESH_TOKEN_GRANT_TYPE: &str = "refresh_token";
pub(crate) const API_KEY_GRANT_TYPE: &str = "apikey";
pub(crate) const DERIVE_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:derive";
const IMS_RESPONSE_TYPE: &str = "ims_portal";

/// Performs the conversations with the IAM token endpoint.
///
/// # Example
/// ```no_run
/// # use volume_iam_auth::iam::{AuthConfiguration, TokenExchangeService};
/// # async fn sample() -> anyhow::Result<()> {
/// let config = AuthConfiguration::new("https://iam.cloud.ibm.com");
/// let service = TokenExchangeService::new(&config)?;
/// let access = service.exchange_refresh_token_for_access_token("refresh-token").await?;
/// let ims = service.exchange_access_token_for_ims_token(&access).await?;
/// println!("user id = {}", ims.user_id);
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct TokenExchangeService {
    config: Arc<AuthConfiguration>,
    client: reqwest::Client,
    client_auth: Option<ClientAuthentication>,
    secret_provider: Option<Arc<dyn SecretProvider>>,
    span: tracing::Span,
}

impl std::fmt::Debug for TokenExchangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeService")
            .field("config", &self.config)
            .field("secret_provider", &self.secret_provider)
            .finish()
    }
}

impl TokenExchangeService {
    /// Creates a service with its own HTTP client.
    ///
    /// The client verifies TLS certificates and times out after
    /// [HTTP_TIMEOUT].
    pub fn new(config: &AuthConfiguration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::unclassified("cannot create HTTP client", e))?;
        Ok(Self::with_client(config, client))
    }

    /// Creates a service using a caller-configured HTTP client.
    pub fn with_client(config: &AuthConfiguration, client: reqwest::Client) -> Self {
        Self {
            client_auth: ClientAuthentication::new(
                &config.iam_client_id,
                &config.iam_client_secret,
            ),
            config: Arc::new(config.clone()),
            client,
            secret_provider: None,
            span: tracing::info_span!("token_exchange_service"),
        }
    }

    /// Sets the resolver for the IAM endpoint and the current API key.
    pub fn with_secret_provider(mut self, v: Arc<dyn SecretProvider>) -> Self {
        self.secret_provider = Some(v);
        self
    }

    /// Sets the span used for all log events of this service.
    pub fn with_span(mut self, v: tracing::Span) -> Self {
        self.span = v;
        self
    }

    /// Exchanges an IAM refresh token for an access token.
    pub async fn exchange_refresh_token_for_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<AccessToken> {
        let params = [
            ("grant_type", REFRESH_TOKEN_GRANT_TYPE),
            ("refresh_token", refresh_token),
        ];
        async {
            tracing::info!("exchanging refresh token for access token");
            self.post(&params).await.and_then(TokenExchangeResponse::into_access_token)
        }
        .instrument(self.span.clone())
        .await
        .inspect(|_| tracing::info!(parent: &self.span, "fetched access token"))
        .inspect_err(|e| log_failure(&self.span, "refresh token exchange", e))
    }

    /// Exchanges an IAM API key for an access token.
    ///
    /// An empty `api_key` selects the current key of the secret provider.
    pub async fn exchange_iam_api_key_for_access_token(
        &self,
        api_key: &str,
    ) -> Result<AccessToken> {
        async {
            tracing::info!("exchanging IAM API key for access token");
            let api_key = self.resolve_api_key(api_key)?;
            let params = [("grant_type", API_KEY_GRANT_TYPE), ("apikey", api_key.as_str())];
            self.post(&params).await.and_then(TokenExchangeResponse::into_access_token)
        }
        .instrument(self.span.clone())
        .await
        .inspect(|_| tracing::info!(parent: &self.span, "fetched access token"))
        .inspect_err(|e| log_failure(&self.span, "API key exchange", e))
    }

    /// Exchanges an access token for a workload (IMS) token.
    pub async fn exchange_access_token_for_ims_token(
        &self,
        access_token: &AccessToken,
    ) -> Result<ImsToken> {
        let params = [
            ("grant_type", DERIVE_GRANT_TYPE),
            ("response_type", IMS_RESPONSE_TYPE),
            ("access_token", access_token.token.as_str()),
        ];
        async {
            tracing::info!("exchanging access token for IMS token");
            self.post(&params).await.and_then(TokenExchangeResponse::into_ims_token)
        }
        .instrument(self.span.clone())
        .await
        .inspect(|t| tracing::info!(parent: &self.span, user_id = t.user_id, "fetched IMS token"))
        .inspect_err(|e| log_failure(&self.span, "IMS token exchange", e))
    }

    /// Exchanges an IAM API key for a workload (IMS) token.
    pub async fn exchange_iam_api_key_for_ims_token(&self, api_key: &str) -> Result<ImsToken> {
        let access = self.exchange_iam_api_key_for_access_token(api_key).await?;
        self.exchange_access_token_for_ims_token(&access).await
    }

    /// Returns the IAM account ID (the `account.bss` claim) of an access
    /// token.
    pub fn get_iam_account_id_from_access_token(
        &self,
        access_token: &AccessToken,
    ) -> Result<String> {
        let _enter = self.span.enter();
        jwt::account_id_from_access_token(&access_token.token)
            .map_err(|e| Error::unclassified("cannot read IAM account ID from access token", e))
            .inspect_err(|e| log_failure(&self.span, "account ID lookup", e))
    }

    /// Rotates the API key held by the secret provider.
    pub fn update_api_key(&self, api_key: &str) -> Result<()> {
        let _enter = self.span.enter();
        let Some(provider) = &self.secret_provider else {
            let e = Error::new(ReasonCode::Unclassified, "no secret provider configured");
            log_failure(&self.span, "API key update", &e);
            return Err(e);
        };
        provider.update_api_key(api_key)?;
        tracing::info!("updated IAM API key");
        Ok(())
    }

    fn resolve_api_key(&self, api_key: &str) -> Result<String> {
        if !api_key.is_empty() {
            return Ok(api_key.to_string());
        }
        self.secret_provider
            .as_ref()
            .and_then(|p| p.api_key())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::new(ReasonCode::Unclassified, "no IAM API key available"))
    }

    fn endpoint(&self) -> String {
        let base = self
            .secret_provider
            .as_ref()
            .and_then(|p| p.iam_url())
            .unwrap_or_else(|| self.config.iam_url.clone());
        token_url(&base, TOKEN_PATH)
    }

    async fn post(&self, params: &[(&str, &str)]) -> Result<TokenExchangeResponse> {
        post_form(
            &self.client,
            &self.endpoint(),
            params,
            self.client_auth.as_ref(),
        )
        .await
    }
}

pub(crate) fn log_failure(span: &tracing::Span, operation: &str, e: &Error) {
    tracing::warn!(parent: span, operation, reason = %e.reason(), causes = ?e.deep_unwrap(), "{e}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{
        ACCOUNT_LOCKED_CODE, ACCOUNT_LOCKED_MSG, EMPTY_BODY_MSG, EXCHANGE_FAILED_MSG,
        UNEXPECTED_RESPONSE_MSG,
    };
    use crate::iam::StaticSecretProvider;
    use crate::iam::tests::MockSecretProvider;
    use crate::jwt::tests::test_token;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;

    type TestResult = anyhow::Result<()>;

    fn service(server: &Server) -> TokenExchangeService {
        let config = AuthConfiguration::new(server.url_str(""))
            .with_iam_client_id("test")
            .with_iam_client_secret("secret");
        TokenExchangeService::new(&config).unwrap()
    }

    fn failed_body() -> String {
        json!({
            "errorMessage": "did not work",
            "errorCode": "bad_request",
            "errorDetails": "more details",
            "requirements": {"error": "requirements error", "code": "requirements code"},
        })
        .to_string()
    }

    fn expect_token_post(
        server: &Server,
        responder: impl httptest::responders::Responder + 'static,
    ) {
        server.expect(
            Expectation::matching(request::method_path("POST", TOKEN_PATH)).respond_with(responder),
        );
    }

    #[tokio::test]
    async fn refresh_token_success() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", TOKEN_PATH),
                request::headers(contains(("authorization", "Basic dGVzdDpzZWNyZXQ="))),
                request::body(url_decoded(contains(("grant_type", "refresh_token")))),
                request::body(url_decoded(contains(("refresh_token", "testrefreshtoken")))),
            ])
            .respond_with(json_encoded(json!({
                "access_token": "at_success",
                "refresh_token": "rt_success",
                "expiration": 456,
                "uaa_token": "uaa_success",
            }))),
        );

        let got = service(&server)
            .exchange_refresh_token_for_access_token("testrefreshtoken")
            .await?;
        assert_eq!(got.token, "at_success");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_failed_during_request() {
        let server = Server::run();
        expect_token_post(&server, status_code(401).body(failed_body()));

        let err = service(&server)
            .exchange_refresh_token_for_access_token("badrefreshtoken")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "IAM token exchange request failed: did not work");
        assert_eq!(err.reason(), ReasonCode::FailedTokenExchange);
        assert_eq!(
            err.deep_unwrap(),
            vec!["more details requirements code: requirements error"]
        );
    }

    #[tokio::test]
    async fn refresh_token_failed_no_message() {
        let server = Server::run();
        expect_token_post(&server, status_code(401).body("{}"));

        let err = service(&server)
            .exchange_refresh_token_for_access_token("badrefreshtoken")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), UNEXPECTED_RESPONSE_MSG);
        assert_eq!(err.reason(), ReasonCode::Unclassified);
    }

    #[tokio::test]
    async fn refresh_token_failed_no_iam_url() {
        let config = AuthConfiguration::new("")
            .with_iam_client_id("test")
            .with_iam_client_secret("secret");
        let service = TokenExchangeService::new(&config).unwrap();

        let err = service
            .exchange_refresh_token_for_access_token("testrefreshtoken")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), EXCHANGE_FAILED_MSG);
        assert_eq!(err.reason(), ReasonCode::Unclassified);
        assert_eq!(
            err.deep_unwrap(),
            vec!["POST \"/oidc/token\": unsupported protocol scheme \"\""]
        );
    }

    #[tokio::test]
    async fn refresh_token_failed_empty_body() {
        let server = Server::run();
        expect_token_post(&server, status_code(401));

        let err = service(&server)
            .exchange_refresh_token_for_access_token("badrefreshtoken")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), EXCHANGE_FAILED_MSG);
        assert_eq!(err.reason(), ReasonCode::Unclassified);
        assert_eq!(err.deep_unwrap(), vec![EMPTY_BODY_MSG]);
    }

    #[tokio::test]
    async fn refresh_token_success_without_access_token() {
        let server = Server::run();
        expect_token_post(&server, json_encoded(json!({"refresh_token": "rt_success"})));

        let err = service(&server)
            .exchange_refresh_token_for_access_token("testrefreshtoken")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), UNEXPECTED_RESPONSE_MSG);
        assert!(err.is_unclassified(), "{err:?}");
    }

    #[tokio::test]
    async fn ims_token_success() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", TOKEN_PATH),
                request::body(url_decoded(contains(("grant_type", DERIVE_GRANT_TYPE)))),
                request::body(url_decoded(contains(("response_type", "ims_portal")))),
                request::body(url_decoded(contains(("access_token", "testaccesstoken")))),
            ])
            .respond_with(json_encoded(json!({
                "access_token": "at_success",
                "refresh_token": "rt_success",
                "ims_user_id": 123,
                "ims_token": "ims_token_1",
            }))),
        );

        let access = AccessToken {
            token: "testaccesstoken".into(),
        };
        let got = service(&server)
            .exchange_access_token_for_ims_token(&access)
            .await?;
        assert_eq!(got.user_id, 123);
        assert_eq!(got.token, "ims_token_1");
        Ok(())
    }

    #[tokio::test]
    async fn ims_token_failed_during_request() {
        let server = Server::run();
        expect_token_post(&server, status_code(401).body(failed_body()));

        let access = AccessToken {
            token: "badaccesstoken".into(),
        };
        let err = service(&server)
            .exchange_access_token_for_ims_token(&access)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "IAM token exchange request failed: did not work");
        assert_eq!(err.reason(), ReasonCode::FailedTokenExchange);
        assert_eq!(
            err.deep_unwrap(),
            vec!["more details requirements code: requirements error"]
        );
    }

    #[tokio::test]
    async fn ims_token_failed_account_locked() {
        let server = Server::run();
        let body = json!({
            "errorMessage": "OpenID Connect exception",
            "errorDetails": "Failed external authentication.",
            "requirements": {
                "error": "Account has been locked for 30 minutes",
                "code": ACCOUNT_LOCKED_CODE,
            },
        });
        expect_token_post(&server, status_code(400).body(body.to_string()));

        let access = AccessToken {
            token: "testaccesstoken".into(),
        };
        let err = service(&server)
            .exchange_access_token_for_ims_token(&access)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), ACCOUNT_LOCKED_MSG);
        assert_eq!(err.reason(), ReasonCode::ProviderAccountTemporarilyLocked);
        assert_eq!(
            err.deep_unwrap(),
            vec![
                "IAM token exchange request failed: OpenID Connect exception",
                "Failed external authentication. SoftLayer_Exception_User_Customer_AccountLocked: Account has been locked for 30 minutes",
            ]
        );
    }

    #[tokio::test]
    async fn ims_token_failed_no_message() {
        let server = Server::run();
        expect_token_post(&server, status_code(401).body("{}"));

        let access = AccessToken {
            token: "testaccesstoken".into(),
        };
        let err = service(&server)
            .exchange_access_token_for_ims_token(&access)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), UNEXPECTED_RESPONSE_MSG);
        assert_eq!(err.reason(), ReasonCode::Unclassified);
    }

    #[tokio::test]
    async fn ims_token_failed_empty_body() {
        let server = Server::run();
        expect_token_post(&server, status_code(401));

        let access = AccessToken {
            token: "testaccesstoken".into(),
        };
        let err = service(&server)
            .exchange_access_token_for_ims_token(&access)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), EXCHANGE_FAILED_MSG);
        assert_eq!(err.deep_unwrap(), vec![EMPTY_BODY_MSG]);
    }

    #[tokio::test]
    async fn ims_token_missing_user_id() {
        let server = Server::run();
        expect_token_post(&server, json_encoded(json!({"ims_token": "ims_token_1"})));

        let access = AccessToken {
            token: "testaccesstoken".into(),
        };
        let err = service(&server)
            .exchange_access_token_for_ims_token(&access)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), UNEXPECTED_RESPONSE_MSG);
    }

    #[tokio::test]
    async fn api_key_for_access_token() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", TOKEN_PATH),
                request::body(url_decoded(contains(("grant_type", "apikey")))),
                request::body(url_decoded(contains(("apikey", "apikey1")))),
            ])
            .respond_with(json_encoded(json!({"access_token": "at_success"}))),
        );

        let got = service(&server)
            .exchange_iam_api_key_for_access_token("apikey1")
            .await?;
        assert_eq!(got.token, "at_success");
        Ok(())
    }

    #[tokio::test]
    async fn api_key_falls_back_to_secret_provider() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", TOKEN_PATH),
                request::body(url_decoded(contains(("apikey", "rotated-key")))),
            ])
            .respond_with(json_encoded(json!({"access_token": "at_rotated"}))),
        );

        let provider = Arc::new(StaticSecretProvider::new().with_api_key("original-key"));
        let service = service(&server).with_secret_provider(provider.clone());
        service.update_api_key("rotated-key")?;
        let got = service.exchange_iam_api_key_for_access_token("").await?;
        assert_eq!(got.token, "at_rotated");
        Ok(())
    }

    #[tokio::test]
    async fn api_key_missing() {
        let config = AuthConfiguration::new("https://iam.example.com");
        let service = TokenExchangeService::new(&config).unwrap();
        let err = service
            .exchange_iam_api_key_for_access_token("")
            .await
            .unwrap_err();
        assert!(err.is_unclassified(), "{err:?}");
    }

    #[tokio::test]
    async fn secret_provider_overrides_iam_url() -> TestResult {
        let server = Server::run();
        expect_token_post(&server, json_encoded(json!({"access_token": "at_success"})));

        let mut provider = MockSecretProvider::new();
        provider
            .expect_iam_url()
            .return_const(Some(server.url_str("")));
        let config = AuthConfiguration::new("ftp://not-used.example.com");
        let service = TokenExchangeService::new(&config)?.with_secret_provider(Arc::new(provider));
        let got = service
            .exchange_refresh_token_for_access_token("testrefreshtoken")
            .await?;
        assert_eq!(got.token, "at_success");
        Ok(())
    }

    #[tokio::test]
    async fn api_key_for_ims_token() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", TOKEN_PATH),
                request::body(url_decoded(contains(("grant_type", "apikey")))),
            ])
            .respond_with(json_encoded(json!({"access_token": "at_success"}))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", TOKEN_PATH),
                request::body(url_decoded(contains(("access_token", "at_success")))),
            ])
            .respond_with(json_encoded(json!({"ims_user_id": 123, "ims_token": "ims_token_1"}))),
        );

        let got = service(&server)
            .exchange_iam_api_key_for_ims_token("apikey1")
            .await?;
        assert_eq!(got.user_id, 123);
        assert_eq!(got.token, "ims_token_1");
        Ok(())
    }

    #[tokio::test]
    async fn api_key_for_ims_token_empty_body() {
        let server = Server::run();
        expect_token_post(&server, status_code(200));

        let err = service(&server)
            .exchange_iam_api_key_for_ims_token("badapikey")
            .await
            .unwrap_err();
        assert!(err.is_unclassified(), "{err:?}");
    }

    #[test]
    fn account_id() {
        let service = TokenExchangeService::new(&AuthConfiguration::default()).unwrap();
        let access = AccessToken {
            token: test_token(json!({"account": {"bss": "12345"}})),
        };
        assert_eq!(service.get_iam_account_id_from_access_token(&access).unwrap(), "12345");

        let access = AccessToken {
            token: "invalid".into(),
        };
        let err = service.get_iam_account_id_from_access_token(&access).unwrap_err();
        assert!(err.is_unclassified(), "{err:?}");
    }

    #[test]
    fn update_api_key_without_provider() {
        let service = TokenExchangeService::new(&AuthConfiguration::default()).unwrap();
        let err = service.update_api_key("new-key").unwrap_err();
        assert!(err.is_unclassified(), "{err:?}");
    }

    #[test]
    fn update_api_key_with_provider() {
        let mut provider = MockSecretProvider::new();
        provider
            .expect_update_api_key()
            .withf(|k| k == "new-key")
            .times(1)
            .returning(|_| Ok(()));
        let service = TokenExchangeService::new(&AuthConfiguration::default())
            .unwrap()
            .with_secret_provider(Arc::new(provider));
        service.update_api_key("new-key").unwrap();
    }

    #[tokio::test]
    async fn secrets_are_not_logged() {
        let (logs, _guard) = crate::test_logs::capture();
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", TOKEN_PATH))
                .times(2)
                .respond_with(status_code(401).body(failed_body())),
        );

        let config = AuthConfiguration::new(server.url_str(""))
            .with_iam_client_id("test")
            .with_iam_client_secret("client-secret-test-only");
        let service = TokenExchangeService::new(&config)
            .unwrap()
            .with_span(tracing::info_span!("test-span"));
        let _ = service
            .exchange_refresh_token_for_access_token("refresh-token-test-only")
            .await;
        let _ = service
            .exchange_iam_api_key_for_access_token("api-key-test-only")
            .await;

        let got = logs.contents();
        assert!(!got.contains("refresh-token-test-only"), "{got}");
        assert!(!got.contains("api-key-test-only"), "{got}");
        assert!(!got.contains("client-secret-test-only"), "{got}");
        assert!(got.contains("test-span"), "{got}");
        assert!(got.contains("ErrorFailedTokenExchange"), "{got}");
        let debug = format!("{service:?}");
        assert!(!debug.contains("client-secret-test-only"), "{debug}");
    }
}
