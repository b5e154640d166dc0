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

//! Workload identity for processes running in a cluster.
//!
//! The cluster mounts a projected "vault token" into the workload. The
//! [ComputeIdentityProvider] exchanges that token for IAM tokens of a compute
//! profile. Inside a managed cluster the exchange is delegated to the
//! storage secret sidecar, which owns the credential material, over a Unix
//! domain socket.
//!
//! # Example
//! ```no_run
//! # use volume_iam_auth::iam::compute_identity::Builder;
//! # use volume_iam_auth::token::TokenProvider;
//! # async fn sample() -> anyhow::Result<()> {
//! let provider = Builder::new("my-profile-id")
//!     .with_vault_token_path("/var/run/secrets/tokens/vault-token")
//!     .build()
//!     .await?;
//! let token = provider.default_iam_token(false).await?;
//! println!("the token is valid for {:?}", token.lifetime);
//! # Ok(()) }
//! ```

use super::AuthConfiguration;
use super::request::{TokenExchangeResponse, post_form, token_url};
use super::sidecar::{self, SIDECAR_TIMEOUT};
use super::token_exchange::{HTTP_TIMEOUT, log_failure};
use super::vault::{FileVaultTokenSource, VaultTokenSource};
use crate::Result;
use crate::errors::Error;
use crate::jwt;
use crate::token::{IamToken, TokenProvider};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

/// Tokens with less remaining life than this are refreshed, never returned.
pub const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(600);

/// The path of the compute identity token endpoint, relative to the IAM URL.
pub const IDENTITY_TOKEN_PATH: &str = "/identity/token";

pub(crate) const CR_TOKEN_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:cr-token";

/// The strategy used to obtain IAM tokens.
#[async_trait::async_trait]
pub(crate) trait IamTokenSource: std::fmt::Debug + Send + Sync {
    async fn iam_token(&self, profile_id: &str, fresh_token_required: bool) -> Result<IamToken>;
}

/// Exchanges the vault token with the IAM endpoint.
struct DirectTokenSource {
    client: reqwest::Client,
    iam_url: String,
    vault: Arc<dyn VaultTokenSource>,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for DirectTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectTokenSource")
            .field("iam_url", &self.iam_url)
            .field("vault", &self.vault)
            .finish_non_exhaustive()
    }
}

struct CacheState {
    vault_token: String,
    // Keyed by profile ID.
    iam_tokens: HashMap<String, String>,
}

impl DirectTokenSource {
    async fn exchange(&self, profile_id: &str, vault_token: &str) -> Result<String> {
        tracing::info!(profile_id, "sending get token request to iam");
        let params = [
            ("grant_type", CR_TOKEN_GRANT_TYPE),
            ("cr_token", vault_token),
            ("profile_id", profile_id),
        ];
        let url = token_url(&self.iam_url, IDENTITY_TOKEN_PATH);
        post_form(&self.client, &url, &params, None)
            .await
            .and_then(TokenExchangeResponse::into_access_token)
            .map(|t| t.token)
    }
}

#[async_trait::async_trait]
impl IamTokenSource for DirectTokenSource {
    async fn iam_token(&self, profile_id: &str, fresh_token_required: bool) -> Result<IamToken> {
        // Held across the whole sequence, concurrent callers wait for the
        // first refresh and then share its result.
        let mut state = self.state.lock().await;

        if !fresh_token_required {
            if let Some(token) = state.iam_tokens.get(profile_id) {
                if let Ok(lifetime) = jwt::fetch_token_lifetime(token, TOKEN_EXPIRY_BUFFER) {
                    tracing::debug!(profile_id, "using cached iam token");
                    return Ok(IamToken {
                        token: token.clone(),
                        lifetime,
                    });
                }
            }
        }

        if !jwt::is_token_valid(&state.vault_token) {
            tracing::info!("vault token is invalid, reading it again");
            state.vault_token = self.vault.vault_token().await?;
        }

        let token = self.exchange(profile_id, &state.vault_token).await?;
        let lifetime = jwt::fetch_token_lifetime(&token, TOKEN_EXPIRY_BUFFER)
            .map_err(|e| Error::unclassified("cannot fetch iam token lifetime", e))?;
        state
            .iam_tokens
            .insert(profile_id.to_string(), token.clone());
        Ok(IamToken { token, lifetime })
    }
}

/// Delegates to the storage secret sidecar.
#[derive(Debug)]
struct SidecarTokenSource {
    socket: PathBuf,
    timeout: Duration,
}

#[async_trait::async_trait]
impl IamTokenSource for SidecarTokenSource {
    async fn iam_token(&self, profile_id: &str, fresh_token_required: bool) -> Result<IamToken> {
        tracing::info!(socket = %self.socket.display(), "fetching iam token from sidecar");
        sidecar::fetch_iam_token(&self.socket, profile_id, fresh_token_required, self.timeout)
            .await
            .map_err(|e| Error::unclassified("cannot fetch iam token from sidecar", e))
    }
}

/// Implements [TokenProvider] with workload identity.
///
/// Instances are cheap to clone, clones share the token cache.
#[derive(Clone, Debug)]
pub struct ComputeIdentityProvider {
    default_profile_id: String,
    source: Arc<dyn IamTokenSource>,
    span: tracing::Span,
}

impl ComputeIdentityProvider {
    /// Creates a provider for `profile_id` using the environment defaults.
    ///
    /// In a managed cluster the provider uses the sidecar at
    /// `SIDECAR_ENDPOINT`. Otherwise it reads the vault token from
    /// `VAULT_TOKEN_PATH` and fails if the token cannot be read.
    pub async fn new<T: Into<String>>(profile_id: T, managed_cluster: bool) -> Result<Self> {
        Builder::new(profile_id)
            .with_managed_cluster(managed_cluster)
            .build()
            .await
    }

    /// The profile used by [default_iam_token][TokenProvider::default_iam_token].
    pub fn default_profile_id(&self) -> &str {
        &self.default_profile_id
    }
}

#[async_trait::async_trait]
impl TokenProvider for ComputeIdentityProvider {
    async fn iam_token(&self, profile_id: &str, fresh_token_required: bool) -> Result<IamToken> {
        async {
            tracing::info!(
                profile_id,
                fresh_token_required,
                "fetching iam token via compute identity"
            );
            self.source.iam_token(profile_id, fresh_token_required).await
        }
        .instrument(self.span.clone())
        .await
        .inspect(|t| {
            tracing::info!(parent: &self.span, lifetime = ?t.lifetime, "fetched iam token");
        })
        .inspect_err(|e| log_failure(&self.span, "compute identity", e))
    }

    async fn default_iam_token(&self, fresh_token_required: bool) -> Result<IamToken> {
        self.iam_token(&self.default_profile_id, fresh_token_required)
            .await
    }
}

/// Builds a [ComputeIdentityProvider].
pub struct Builder {
    profile_id: String,
    managed_cluster: bool,
    sidecar_endpoint: Option<PathBuf>,
    sidecar_timeout: Duration,
    vault_token_source: Option<Arc<dyn VaultTokenSource>>,
    vault_token_path: Option<PathBuf>,
    iam_url: Option<String>,
    client: Option<reqwest::Client>,
    span: Option<tracing::Span>,
}

impl Builder {
    /// Creates a builder for a provider whose default profile is
    /// `profile_id`.
    pub fn new<T: Into<String>>(profile_id: T) -> Self {
        Self {
            profile_id: profile_id.into(),
            managed_cluster: false,
            sidecar_endpoint: None,
            sidecar_timeout: SIDECAR_TIMEOUT,
            vault_token_source: None,
            vault_token_path: None,
            iam_url: None,
            client: None,
            span: None,
        }
    }

    /// Delegates token requests to the storage secret sidecar.
    pub fn with_managed_cluster(mut self, v: bool) -> Self {
        self.managed_cluster = v;
        self
    }

    /// Sets the sidecar socket.
    ///
    /// Defaults to `SIDECAR_ENDPOINT`, or `/csi/provider.sock` if that is not
    /// set. Only used in a managed cluster.
    pub fn with_sidecar_endpoint<P: Into<PathBuf>>(mut self, v: P) -> Self {
        self.sidecar_endpoint = Some(v.into());
        self
    }

    pub(crate) fn with_sidecar_timeout(mut self, v: Duration) -> Self {
        self.sidecar_timeout = v;
        self
    }

    /// Sets the source of the vault token.
    ///
    /// Takes precedence over [with_vault_token_path][Builder::with_vault_token_path].
    pub fn with_vault_token_source(mut self, v: Arc<dyn VaultTokenSource>) -> Self {
        self.vault_token_source = Some(v);
        self
    }

    /// Reads the vault token from `v`, instead of `VAULT_TOKEN_PATH`.
    pub fn with_vault_token_path<P: Into<PathBuf>>(mut self, v: P) -> Self {
        self.vault_token_path = Some(v.into());
        self
    }

    /// Sets the IAM endpoint. Defaults to `IAM_URL`, see
    /// [AuthConfiguration::from_env].
    pub fn with_iam_url<T: Into<String>>(mut self, v: T) -> Self {
        self.iam_url = Some(v.into());
        self
    }

    /// Sets the HTTP client used for the exchange.
    pub fn with_client(mut self, v: reqwest::Client) -> Self {
        self.client = Some(v);
        self
    }

    /// Sets the span used for all log events of the provider.
    pub fn with_span(mut self, v: tracing::Span) -> Self {
        self.span = Some(v);
        self
    }

    /// Creates the provider.
    ///
    /// Outside a managed cluster this reads the vault token once, and fails
    /// if it cannot be read.
    pub async fn build(self) -> Result<ComputeIdentityProvider> {
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("compute_identity_provider"));
        let source: Arc<dyn IamTokenSource> = if self.managed_cluster {
            Arc::new(SidecarTokenSource {
                socket: self.sidecar_endpoint.unwrap_or_else(sidecar::endpoint_from_env),
                timeout: self.sidecar_timeout,
            })
        } else {
            let vault: Arc<dyn VaultTokenSource> =
                match (self.vault_token_source, self.vault_token_path) {
                    (Some(v), _) => v,
                    (None, Some(path)) => Arc::new(FileVaultTokenSource::new(path)),
                    (None, None) => Arc::new(FileVaultTokenSource::from_env()?),
                };
            let vault_token = vault
                .vault_token()
                .instrument(span.clone())
                .await
                .inspect_err(|e| {
                    log_failure(&span, "compute identity provider initialization", e)
                })?;
            let client = match self.client {
                Some(c) => c,
                None => reqwest::Client::builder()
                    .timeout(HTTP_TIMEOUT)
                    .build()
                    .map_err(|e| Error::unclassified("cannot create HTTP client", e))?,
            };
            Arc::new(DirectTokenSource {
                client,
                iam_url: self
                    .iam_url
                    .unwrap_or_else(|| AuthConfiguration::from_env().iam_url),
                vault,
                state: Mutex::new(CacheState {
                    vault_token,
                    iam_tokens: HashMap::new(),
                }),
            })
        };
        Ok(ComputeIdentityProvider {
            default_profile_id: self.profile_id,
            source,
            span,
        })
    }
}
