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

use super::ContextCredentials;
use crate::Result;
use crate::errors::{Error, ReasonCode};
use crate::iam::token_exchange::log_failure;
use crate::iam::{AuthConfiguration, TokenExchangeService};
use crate::jwt;
use crate::token::{AccessToken, TokenProvider};
use std::sync::Arc;
use tracing::Instrument;

const NO_SERVICE_MSG: &str = "no token exchange service configured";
const UPDATE_API_KEY_FAILED_MSG: &str = "failed to update api key";

/// Produces [ContextCredentials] from the credentials a provider is
/// configured with.
///
/// Errors from the underlying exchanges are returned unmodified, in
/// particular [ReasonCode::ProviderAccountTemporarilyLocked] is preserved.
///
/// # Example
/// ```no_run
/// # use volume_iam_auth::credentials::ContextCredentialsFactory;
/// # use volume_iam_auth::iam::AuthConfiguration;
/// # async fn sample() -> anyhow::Result<()> {
/// let factory = ContextCredentialsFactory::new(&AuthConfiguration::from_env())?;
/// let credentials = factory.for_refresh_token("refresh-token").await?;
/// println!("auth type: {}", credentials.auth_type);
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct ContextCredentialsFactory {
    token_exchange_service: Option<TokenExchangeService>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    span: tracing::Span,
}

impl Default for ContextCredentialsFactory {
    fn default() -> Self {
        Self {
            token_exchange_service: None,
            token_provider: None,
            span: tracing::info_span!("context_credentials_factory"),
        }
    }
}

impl ContextCredentialsFactory {
    /// Creates a factory backed by a new [TokenExchangeService].
    pub fn new(config: &AuthConfiguration) -> Result<Self> {
        Ok(Self::default().with_token_exchange_service(TokenExchangeService::new(config)?))
    }

    pub fn with_token_exchange_service(mut self, v: TokenExchangeService) -> Self {
        self.token_exchange_service = Some(v);
        self
    }

    /// Sets the workload identity used by
    /// [for_iam_access_token][Self::for_iam_access_token].
    pub fn with_token_provider(mut self, v: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(v);
        self
    }

    pub fn with_span(mut self, v: tracing::Span) -> Self {
        self.span = v;
        self
    }

    /// Exchanges a refresh token for workload (IMS) credentials.
    ///
    /// The IAM account ID of the result is empty.
    pub async fn for_refresh_token(&self, refresh_token: &str) -> Result<ContextCredentials> {
        async {
            let service = self.service()?;
            let access = service
                .exchange_refresh_token_for_access_token(refresh_token)
                .await?;
            let ims = service.exchange_access_token_for_ims_token(&access).await?;
            Ok(ContextCredentials::for_ims_token(String::new(), ims))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| log_failure(&self.span, "credentials for refresh token", e))
    }

    /// Exchanges an API key for workload (IMS) credentials in
    /// `iam_account_id`.
    pub async fn for_iam_api_key(
        &self,
        iam_account_id: &str,
        api_key: &str,
    ) -> Result<ContextCredentials> {
        async {
            let ims = self
                .service()?
                .exchange_iam_api_key_for_ims_token(api_key)
                .await?;
            Ok(ContextCredentials::for_ims_token(iam_account_id.to_string(), ims))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| log_failure(&self.span, "credentials for IAM API key", e))
    }

    /// Returns IAM access token credentials.
    ///
    /// The token comes from the default profile of the configured
    /// [TokenProvider]. Without one, `api_key` is exchanged for an access
    /// token. The account ID is read from the token claims.
    pub async fn for_iam_access_token(&self, api_key: &str) -> Result<ContextCredentials> {
        async {
            let token = match &self.token_provider {
                Some(provider) => {
                    tracing::info!("fetching IAM token via workload identity");
                    provider.default_iam_token(false).await?.token
                }
                None => {
                    self.service()?
                        .exchange_iam_api_key_for_access_token(api_key)
                        .await?
                        .token
                }
            };
            let account_id = self.account_id(AccessToken { token: token.clone() })?;
            Ok(ContextCredentials::for_iam_access_token(account_id, token))
        }
        .instrument(self.span.clone())
        .await
        .inspect_err(|e| log_failure(&self.span, "credentials for IAM access token", e))
    }

    /// Rotates the API key of the token exchange service.
    pub fn update_api_key(&self, api_key: &str) -> Result<()> {
        let _enter = self.span.enter();
        tracing::info!("updating api key");
        let Some(service) = &self.token_exchange_service else {
            let e = Error::new(ReasonCode::Unclassified, UPDATE_API_KEY_FAILED_MSG);
            log_failure(&self.span, "API key update", &e);
            return Err(e);
        };
        service.update_api_key(api_key)
    }

    fn service(&self) -> Result<&TokenExchangeService> {
        self.token_exchange_service
            .as_ref()
            .ok_or_else(|| Error::new(ReasonCode::Unclassified, NO_SERVICE_MSG))
    }

    fn account_id(&self, access_token: AccessToken) -> Result<String> {
        match &self.token_exchange_service {
            Some(service) => service.get_iam_account_id_from_access_token(&access_token),
            None => jwt::account_id_from_access_token(&access_token.token).map_err(|e| {
                Error::unclassified("cannot read IAM account ID from access token", e)
            }),
        }
    }
}
