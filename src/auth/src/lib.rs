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

//! IAM credentials for storage volume providers.
//!
//! This crate turns long-lived secrets (IAM refresh tokens, IAM API keys, or
//! a cluster-mounted vault token) into the short-lived credentials that the
//! volume provider APIs accept. Every failure carries a stable
//! [ReasonCode][errors::ReasonCode], so applications can tell a transient
//! transport problem apart from a rejected exchange or a temporarily locked
//! infrastructure account, and pick the right retry policy.
//!
//! The main entry points are:
//!
//! * [ContextCredentialsFactory][credentials::ContextCredentialsFactory]
//!   produces a uniform [ContextCredentials][credentials::ContextCredentials]
//!   record for each supported input credential.
//! * [TokenExchangeService][iam::TokenExchangeService] performs the
//!   individual exchanges with the IAM token endpoint.
//! * [ComputeIdentityProvider][iam::ComputeIdentityProvider] implements
//!   workload identity, exchanging the mounted vault token directly or by
//!   delegating to a local sidecar.
//!
//! # Example
//! ```no_run
//! # use volume_iam_auth::credentials::ContextCredentialsFactory;
//! # use volume_iam_auth::iam::AuthConfiguration;
//! # async fn sample() -> anyhow::Result<()> {
//! let config = AuthConfiguration::from_env();
//! let factory = ContextCredentialsFactory::new(&config)?;
//! let credentials = factory.for_iam_api_key("account-id", "api-key").await?;
//! println!("user id: {}", credentials.user_id);
//! # Ok(()) }
//! ```
//!
//! Logging goes through [tracing]. Each component records its events inside a
//! span supplied at construction time, and secret values never appear in the
//! log output.

pub mod errors;

/// Maps IAM token endpoint error responses to reasoned errors.
pub mod classifier;

/// Types and functions to work with the tokens exchanged by this crate.
pub mod token;

/// Reads JWT claims without verifying signatures.
pub mod jwt;

/// Conversations with the IAM token endpoint, and workload identity.
pub mod iam;

/// The uniform credential record and the factory producing it.
pub mod credentials;

/// A `Result` alias where the `Err` case is
/// `volume_iam_auth::errors::Error`.
pub type Result<T> = std::result::Result<T, crate::errors::Error>;

#[cfg(test)]
pub(crate) mod test_logs;

/// Generated code for the storage secret sidecar protocol.
pub(crate) mod secretprovider {
    include!("generated/secretprovider.rs");
}
