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

//! The vault token mounted into cluster workloads.

use crate::Result;
use crate::errors::Error;
use std::path::PathBuf;

/// The environment variable naming the vault token file.
pub const VAULT_TOKEN_PATH_ENV: &str = "VAULT_TOKEN_PATH";

#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    #[error("VAULT_TOKEN_PATH not set")]
    PathNotSet,
    #[error("cannot read vault token file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("vault token file {0} is empty")]
    Empty(PathBuf),
}

/// Reads the current vault token.
#[async_trait::async_trait]
pub trait VaultTokenSource: std::fmt::Debug + Send + Sync {
    async fn vault_token(&self) -> Result<String>;
}

/// Reads the vault token from a projected file.
///
/// The file is read on every call, the cluster rotates its content in place.
#[derive(Clone, Debug)]
pub struct FileVaultTokenSource {
    path: PathBuf,
}

impl FileVaultTokenSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Uses the path in `VAULT_TOKEN_PATH`.
    pub fn from_env() -> Result<Self> {
        std::env::var_os(VAULT_TOKEN_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(Self::new)
            .ok_or_else(|| Error::unclassified("cannot locate vault token", VaultError::PathNotSet))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read(&self) -> std::result::Result<String, VaultError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| VaultError::Read {
                path: self.path.clone(),
                source,
            })?;
        let token = content.trim_end();
        if token.is_empty() {
            return Err(VaultError::Empty(self.path.clone()));
        }
        Ok(token.to_string())
    }
}

#[async_trait::async_trait]
impl VaultTokenSource for FileVaultTokenSource {
    async fn vault_token(&self) -> Result<String> {
        self.read()
            .await
            .map_err(|e| Error::unclassified("cannot read vault token", e))
    }
}
