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
use std::time::Duration;

/// An IAM access token.
///
/// The token has no lifecycle beyond the call that returned it.
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    /// The bearer token, as used in `Authorization:` headers.
    pub token: String,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[censored]")
            .finish()
    }
}

/// A workload (IMS) token and the numeric user it belongs to.
#[derive(Clone, PartialEq)]
pub struct ImsToken {
    /// The numeric user identifier.
    pub user_id: i64,

    /// The bearer token.
    pub token: String,
}

impl std::fmt::Debug for ImsToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImsToken")
            .field("user_id", &self.user_id)
            .field("token", &"[censored]")
            .finish()
    }
}

/// An IAM token obtained through workload identity.
#[derive(Clone, PartialEq)]
pub struct IamToken {
    /// The bearer token.
    pub token: String,

    /// The remaining lifetime when the token was obtained.
    pub lifetime: Duration,
}

impl std::fmt::Debug for IamToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamToken")
            .field("token", &"[censored]")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Produces IAM tokens for compute profiles.
#[async_trait::async_trait]
pub trait TokenProvider: std::fmt::Debug + Send + Sync {
    /// Returns an IAM token for `profile_id`.
    ///
    /// Implementations may return a cached token unless
    /// `fresh_token_required` is set.
    async fn iam_token(&self, profile_id: &str, fresh_token_required: bool) -> Result<IamToken>;

    /// Returns an IAM token for the profile fixed at construction.
    async fn default_iam_token(&self, fresh_token_required: bool) -> Result<IamToken>;
}
