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

//! The uniform credential record handed to volume providers.
//!
//! Providers should depend only on [ContextCredentials]. How the credential
//! was obtained (refresh token, API key, or workload identity) is captured by
//! [AuthType].

pub mod factory;

pub use factory::ContextCredentialsFactory;

/// The kind of credential in a [ContextCredentials].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AuthType {
    /// A workload (IMS) user ID and token.
    ImsToken,
    /// An IAM access token.
    IamAccessToken,
}

impl AuthType {
    /// The stable name of the auth type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImsToken => "IMS_TOKEN",
            Self::IamAccessToken => "IAM_ACCESS_TOKEN",
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for calls against the provider APIs.
#[derive(Clone, PartialEq)]
pub struct ContextCredentials {
    /// How [credential][ContextCredentials::credential] is used.
    pub auth_type: AuthType,

    /// The IAM account. May be empty if the account is not known.
    pub iam_account_id: String,

    /// The numeric workload user, as a string. Empty for IAM access tokens.
    pub user_id: String,

    /// The token itself.
    pub credential: String,
}

impl ContextCredentials {
    pub(crate) fn for_ims_token(iam_account_id: String, token: crate::token::ImsToken) -> Self {
        Self {
            auth_type: AuthType::ImsToken,
            iam_account_id,
            user_id: token.user_id.to_string(),
            credential: token.token,
        }
    }

    pub(crate) fn for_iam_access_token(iam_account_id: String, token: String) -> Self {
        Self {
            auth_type: AuthType::IamAccessToken,
            iam_account_id,
            user_id: String::new(),
            credential: token,
        }
    }
}

impl std::fmt::Debug for ContextCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCredentials")
            .field("auth_type", &self.auth_type)
            .field("iam_account_id", &self.iam_account_id)
            .field("user_id", &self.user_id)
            .field("credential", &"[censored]")
            .finish()
    }
}
