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

//! The IAM token endpoint and workload identity.
//!
//! [TokenExchangeService] exchanges refresh tokens and API keys for access
//! and workload tokens. [ComputeIdentityProvider] exchanges the vault token
//! mounted into a cluster workload for IAM tokens, either directly or through
//! the storage secret sidecar.

use crate::Result;
use crate::errors::{Error, ReasonCode};
use std::sync::RwLock;

pub mod compute_identity;
pub(crate) mod request;
pub(crate) mod sidecar;
pub mod token_exchange;
pub mod vault;

pub use compute_identity::ComputeIdentityProvider;
pub use token_exchange::TokenExchangeService;
pub use vault::{FileVaultTokenSource, VaultTokenSource};

/// The IAM endpoint used when `IAM_URL` is not set.
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com";

/// The IAM endpoint and the client credentials used to call it.
///
/// # Example
/// ```
/// # use volume_iam_auth::iam::AuthConfiguration;
/// let config = AuthConfiguration::new("https://iam.example.com")
///     .with_iam_client_id("my-client")
///     .with_iam_client_secret("my-secret");
/// assert_eq!(config.iam_url, "https://iam.example.com");
/// ```
#[derive(Clone, PartialEq)]
pub struct AuthConfiguration {
    /// The base URL of the IAM endpoint, without the token path.
    pub iam_url: String,
    /// The client ID used in HTTP Basic authentication.
    pub iam_client_id: String,
    /// The client secret used in HTTP Basic authentication.
    pub iam_client_secret: String,
}

impl AuthConfiguration {
    pub fn new<T: Into<String>>(iam_url: T) -> Self {
        Self {
            iam_url: iam_url.into(),
            iam_client_id: String::new(),
            iam_client_secret: String::new(),
        }
    }

    pub fn with_iam_url<T: Into<String>>(mut self, v: T) -> Self {
        self.iam_url = v.into();
        self
    }

    pub fn with_iam_client_id<T: Into<String>>(mut self, v: T) -> Self {
        self.iam_client_id = v.into();
        self
    }

    pub fn with_iam_client_secret<T: Into<String>>(mut self, v: T) -> Self {
        self.iam_client_secret = v.into();
        self
    }

    /// Loads the configuration from `IAM_URL`, `IAM_CLIENT_ID` and
    /// `IAM_CLIENT_SECRET`.
    ///
    /// `IAM_URL` defaults to [DEFAULT_IAM_URL]. The client credentials
    /// default to empty, which disables HTTP Basic authentication.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            iam_url: var("IAM_URL").unwrap_or_else(|| DEFAULT_IAM_URL.to_string()),
            iam_client_id: var("IAM_CLIENT_ID").unwrap_or_default(),
            iam_client_secret: var("IAM_CLIENT_SECRET").unwrap_or_default(),
        }
    }
}

impl Default for AuthConfiguration {
    fn default() -> Self {
        Self::new(DEFAULT_IAM_URL)
    }
}

impl std::fmt::Debug for AuthConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfiguration")
            .field("iam_url", &self.iam_url)
            .field("iam_client_id", &self.iam_client_id)
            .field("iam_client_secret", &"[censored]")
            .finish()
    }
}

/// Resolves the IAM endpoint and the current API key.
///
/// The [TokenExchangeService] consults the provider on every call, so
/// rotating the key with [update_api_key][SecretProvider::update_api_key]
/// takes effect immediately.
pub trait SecretProvider: std::fmt::Debug + Send + Sync {
    /// Overrides the configured IAM endpoint, if set.
    fn iam_url(&self) -> Option<String> {
        None
    }

    /// The current API key, if any.
    fn api_key(&self) -> Option<String>;

    /// Replaces the current API key.
    fn update_api_key(&self, api_key: &str) -> Result<()>;
}

/// A [SecretProvider] holding its values in memory.
#[derive(Default)]
pub struct StaticSecretProvider {
    iam_url: Option<String>,
    api_key: RwLock<Option<String>>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key<T: Into<String>>(self, v: T) -> Self {
        Self {
            api_key: RwLock::new(Some(v.into())),
            ..self
        }
    }

    pub fn with_iam_url<T: Into<String>>(mut self, v: T) -> Self {
        self.iam_url = Some(v.into());
        self
    }
}

impl std::fmt::Debug for StaticSecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecretProvider")
            .field("iam_url", &self.iam_url)
            .field("api_key", &"[censored]")
            .finish()
    }
}

impl SecretProvider for StaticSecretProvider {
    fn iam_url(&self) -> Option<String> {
        self.iam_url.clone()
    }

    fn api_key(&self) -> Option<String> {
        // A poisoned lock still holds a complete value.
        let guard = self.api_key.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    fn update_api_key(&self, api_key: &str) -> Result<()> {
        if api_key.is_empty() {
            return Err(Error::new(ReasonCode::Unclassified, "empty api key"));
        }
        let mut guard = self.api_key.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(api_key.to_string());
        Ok(())
    }
}
