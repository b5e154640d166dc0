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

use httptest::{Expectation, Server, matchers::*, responders::*};
use serde_json::json;
use volume_iam_auth::credentials::{AuthType, ContextCredentialsFactory};
use volume_iam_auth::errors::ReasonCode;
use volume_iam_auth::iam::AuthConfiguration;
use volume_iam_auth::iam::compute_identity::Builder as ComputeIdentityBuilder;

type TestResult = anyhow::Result<()>;

#[cfg(test)]
mod test {
    use super::*;
    use base64::Engine;
    use base64::prelude::BASE64_URL_SAFE_NO_PAD;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn jwt(account_id: &str, lifetime_secs: u64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let header = json!({"alg": "RS256", "typ": "JWT"});
        let claims = json!({
            "iat": now,
            "exp": now + lifetime_secs,
            "account": {"bss": account_id},
        });
        format!(
            "{}.{}.signature",
            BASE64_URL_SAFE_NO_PAD.encode(header.to_string()),
            BASE64_URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn factory(server: &Server) -> anyhow::Result<ContextCredentialsFactory> {
        let config = AuthConfiguration::new(server.url_str(""))
            .with_iam_client_id("test")
            .with_iam_client_secret("secret");
        Ok(ContextCredentialsFactory::new(&config)?)
    }

    #[tokio::test]
    async fn iam_api_key_round_trip() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/oidc/token"))
                .times(2)
                .respond_with(json_encoded(json!({
                    "access_token": "at",
                    "ims_user_id": 123,
                    "ims_token": "ims1",
                }))),
        );

        let got = factory(&server)?.for_iam_api_key("12345", "k").await?;
        assert_eq!(got.auth_type, AuthType::ImsToken);
        assert_eq!(got.iam_account_id, "12345");
        assert_eq!(got.user_id, "123");
        assert_eq!(got.credential, "ims1");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_rejected() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/oidc/token")).respond_with(
                status_code(401).body(
                    json!({
                        "errorMessage": "did not work",
                        "errorCode": "bad_request",
                        "errorDetails": "more details",
                        "requirements": {"error": "requirements error", "code": "requirements code"},
                    })
                    .to_string(),
                ),
            ),
        );

        let err = factory(&server)?
            .for_refresh_token("badrefreshtoken")
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ReasonCode::FailedTokenExchange);
        assert_eq!(err.to_string(), "IAM token exchange request failed: did not work");
        assert_eq!(
            err.deep_unwrap(),
            vec!["more details requirements code: requirements error"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_iam_url() -> TestResult {
        let factory = ContextCredentialsFactory::new(&AuthConfiguration::new(""))?;
        let err = factory.for_refresh_token("testrefreshtoken").await.unwrap_err();
        assert_eq!(err.reason(), ReasonCode::Unclassified);
        assert_eq!(err.to_string(), "IAM token exchange request failed");
        assert_eq!(
            err.deep_unwrap(),
            vec![r#"POST "/oidc/token": unsupported protocol scheme """#]
        );
        Ok(())
    }

    #[tokio::test]
    async fn iam_access_token_via_compute_identity() -> TestResult {
        let server = Server::run();
        let iam_token = jwt("67890", 3600);
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/identity/token"),
                request::body(url_decoded(contains(("profile_id", "profile-test-only")))),
            ])
            .respond_with(json_encoded(json!({"access_token": iam_token}))),
        );

        let dir = tempfile::tempdir()?;
        let vault_path = dir.path().join("vault-token");
        std::fs::write(&vault_path, jwt("67890", 3600))?;
        let provider = ComputeIdentityBuilder::new("profile-test-only")
            .with_iam_url(server.url_str(""))
            .with_vault_token_path(&vault_path)
            .build()
            .await?;

        let factory = ContextCredentialsFactory::default().with_token_provider(Arc::new(provider));
        let got = factory.for_iam_access_token("").await?;
        assert_eq!(got.auth_type, AuthType::IamAccessToken);
        assert_eq!(got.iam_account_id, "67890");
        assert_eq!(got.credential, iam_token);
        Ok(())
    }
}
