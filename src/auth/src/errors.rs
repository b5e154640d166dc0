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

//! Errors created by this crate.
//!
//! Every error returned by a public operation is an [Error], and every
//! [Error] carries exactly one [ReasonCode]. Applications should key their
//! retry and backoff policies on the reason code, never on the message text.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

type BoxedCause = Arc<dyn std::error::Error + Send + Sync>;

/// The closed set of failure classes reported by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReasonCode {
    /// A transport failure, or a response that could not be interpreted.
    ///
    /// These failures may be transient. Applications may retry them with
    /// [exponential backoff].
    ///
    /// [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
    Unclassified,

    /// The IAM endpoint rejected the exchange with a classifiable message.
    ///
    /// Retrying the same request is unlikely to succeed.
    FailedTokenExchange,

    /// The backing infrastructure account is temporarily locked.
    ///
    /// Applications should retry after a delay, not immediately.
    ProviderAccountTemporarilyLocked,
}

impl ReasonCode {
    /// The stable string used in logs and by external callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclassified => "ErrorUnclassified",
            Self::FailedTokenExchange => "ErrorFailedTokenExchange",
            Self::ProviderAccountTemporarilyLocked => "ErrorProviderAccountTemporarilyLocked",
        }
    }
}

impl Display for ReasonCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a stable reason code and an ordered chain of causes.
///
/// The `Display` implementation prints the human-readable description only.
/// Use [deep_unwrap()][Error::deep_unwrap] to obtain the messages of the
/// nested causes.
///
/// # Example
/// ```
/// # use volume_iam_auth::errors::{Error, ReasonCode};
/// let err = Error::new(ReasonCode::FailedTokenExchange, "exchange failed")
///     .with_properties([("status", "401")]);
/// assert!(err.is_failed_token_exchange());
/// assert_eq!(err.to_string(), "exchange failed");
/// ```
#[derive(Clone, Debug)]
pub struct Error {
    reason: ReasonCode,
    message: String,
    backend_error: Option<String>,
    properties: BTreeMap<String, String>,
    wrapped: Vec<BoxedCause>,
}

impl Error {
    /// Creates an error with the given reason and description.
    pub fn new<T: Into<String>>(reason: ReasonCode, message: T) -> Self {
        Self {
            reason,
            message: message.into(),
            backend_error: None,
            properties: BTreeMap::new(),
            wrapped: Vec::new(),
        }
    }

    /// Creates an [ReasonCode::Unclassified] error caused by `source`.
    pub fn unclassified<T, E>(message: T, source: E) -> Self
    where
        T: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ReasonCode::Unclassified, message).wrap(source)
    }

    /// Appends a cause to the chain.
    pub fn wrap<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.wrapped.push(Arc::new(cause));
        self
    }

    /// Appends a cause that is only known by its message.
    pub(crate) fn wrap_msg<T: Into<String>>(self, cause: T) -> Self {
        self.wrap(Cause(cause.into()))
    }

    /// Records the message the backend returned, if any.
    pub fn with_backend_error<T: Into<String>>(mut self, v: T) -> Self {
        self.backend_error = Some(v.into());
        self
    }

    /// Attaches key/value properties to the error.
    pub fn with_properties<I, K, V>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(v.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// The reason code for this error.
    pub fn reason(&self) -> ReasonCode {
        self.reason
    }

    /// The human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The message returned by the backend, if any.
    pub fn backend_error(&self) -> Option<&str> {
        self.backend_error.as_deref()
    }

    /// Key/value properties attached to the error.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// The direct causes, outermost first.
    pub fn wrapped(
        &self,
    ) -> impl Iterator<Item = &(dyn std::error::Error + Send + Sync + 'static)> {
        self.wrapped.iter().map(|c| c.as_ref())
    }

    /// Returns the messages of all nested causes, outermost to innermost.
    ///
    /// Causes that are themselves an [Error] contribute their own message
    /// followed by their nested causes. This is intended for diagnostics and
    /// tests. Do not use it for control flow.
    pub fn deep_unwrap(&self) -> Vec<String> {
        let mut messages = Vec::new();
        self.collect_causes(&mut messages);
        messages
    }

    fn collect_causes(&self, messages: &mut Vec<String>) {
        for cause in &self.wrapped {
            messages.push(cause.to_string());
            if let Some(inner) = cause.downcast_ref::<Error>() {
                inner.collect_causes(messages);
            }
        }
    }

    /// The error reason is [ReasonCode::Unclassified].
    pub fn is_unclassified(&self) -> bool {
        self.reason == ReasonCode::Unclassified
    }

    /// The error reason is [ReasonCode::FailedTokenExchange].
    pub fn is_failed_token_exchange(&self) -> bool {
        self.reason == ReasonCode::FailedTokenExchange
    }

    /// The error reason is [ReasonCode::ProviderAccountTemporarilyLocked].
    pub fn is_account_locked(&self) -> bool {
        self.reason == ReasonCode::ProviderAccountTemporarilyLocked
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.wrapped
            .first()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
struct Cause(String);
