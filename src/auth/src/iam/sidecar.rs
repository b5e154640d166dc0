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

use crate::secretprovider::Request;
use crate::secretprovider::iam_token_provider_client::IamTokenProviderClient;
use crate::token::IamToken;
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint};

/// The socket used when `SIDECAR_ENDPOINT` is not set.
pub const DEFAULT_SIDECAR_ENDPOINT: &str = "/csi/provider.sock";

/// The environment variable naming the sidecar socket.
pub const SIDECAR_ENDPOINT_ENV: &str = "SIDECAR_ENDPOINT";

/// The upper bound for a complete sidecar call, connection included.
pub const SIDECAR_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// Never dialed. The connector below ignores the URI.
const PLACEHOLDER_URI: &str = "http://[::]:50051";

#[derive(thiserror::Error, Debug)]
pub enum SidecarError {
    #[error("unable to set up grpc session with {path}: {source}")]
    Connect {
        path: PathBuf,
        source: tonic::transport::Error,
    },
    #[error("error fetching iam token from grpc call: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("grpc call did not complete within {0:?}")]
    Timeout(Duration),
}

/// Returns the socket path from `SIDECAR_ENDPOINT`, or the default.
pub(crate) fn endpoint_from_env() -> PathBuf {
    std::env::var_os(SIDECAR_ENDPOINT_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SIDECAR_ENDPOINT))
}

/// Asks the storage secret sidecar for an IAM token.
///
/// The response is returned verbatim, including the lifetime reported by the
/// sidecar.
pub(crate) async fn fetch_iam_token(
    socket: &Path,
    profile_id: &str,
    fresh_token_required: bool,
    timeout: Duration,
) -> Result<IamToken, SidecarError> {
    let call = async {
        let mut client = IamTokenProviderClient::new(connect(socket).await?);
        let response = client
            .get_iam_token(Request {
                profile_id: profile_id.to_string(),
                is_fresh_token_required: fresh_token_required,
            })
            .await?
            .into_inner();
        Ok::<_, SidecarError>(IamToken {
            token: response.iam_token,
            lifetime: Duration::from_secs(response.token_lifetime),
        })
    };
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| SidecarError::Timeout(timeout))?
}

async fn connect(socket: &Path) -> Result<Channel, SidecarError> {
    let path = socket.to_path_buf();
    let connector = tower::service_fn(move |_: tonic::transport::Uri| {
        let path = path.clone();
        async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
    });
    Endpoint::from_static(PLACEHOLDER_URI)
        .connect_with_connector(connector)
        .await
        .map_err(|source| SidecarError::Connect {
            path: socket.to_path_buf(),
            source,
        })
}
