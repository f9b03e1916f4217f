//! Lark OAuth code exchange.
//!
//! Two calls: an app access token from the app credentials, then the user
//! access token for the authorization code, authenticated with the first.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::persistence::AccessToken;

const APP_TOKEN_PATH: &str = "/auth/v3/app_access_token/internal";
const USER_TOKEN_PATH: &str = "/authen/v1/oidc/access_token";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token endpoint request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("app access token missing from response (code {code}: {msg})")]
    NoAppToken { code: i64, msg: String },

    #[error("code exchange rejected (code {code}: {msg})")]
    Rejected { code: i64, msg: String },

    #[error("malformed token response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Lark app credentials and API location.
#[derive(Clone)]
pub struct LarkApp {
    pub app_id: String,
    pub app_secret: String,
    /// Base URL including `/open-apis`.
    pub api_base: String,
}

impl std::fmt::Debug for LarkApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LarkApp")
            .field("app_id", &self.app_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct AppTokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    app_access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserTokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Exchanges authorization codes for user access tokens.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client: reqwest::Client,
    app: LarkApp,
    timeout: Duration,
}

impl OAuthClient {
    pub fn new(client: reqwest::Client, app: LarkApp, timeout: Duration) -> Self {
        OAuthClient {
            client,
            app,
            timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.app.api_base.trim_end_matches('/'))
    }

    /// Runs the full exchange for `code`.
    pub async fn exchange_code(&self, code: &str) -> Result<AccessToken, OAuthError> {
        let app_token = self.app_access_token().await?;
        debug!("Obtained app access token");

        let response: UserTokenResponse = self
            .client
            .post(self.endpoint(USER_TOKEN_PATH))
            .timeout(self.timeout)
            .bearer_auth(&app_token)
            .json(&json!({"grant_type": "authorization_code", "code": code}))
            .send()
            .await?
            .json()
            .await?;

        if response.code != 0 {
            return Err(OAuthError::Rejected {
                code: response.code,
                msg: response.msg,
            });
        }

        let token: AccessToken = serde_json::from_value(response.data.unwrap_or(Value::Null))?;
        info!(expires_in = ?token.expires_in, "Exchanged OAuth code for user access token");
        Ok(token)
    }

    async fn app_access_token(&self) -> Result<String, OAuthError> {
        let response: AppTokenResponse = self
            .client
            .post(self.endpoint(APP_TOKEN_PATH))
            .timeout(self.timeout)
            .json(&json!({"app_id": self.app.app_id, "app_secret": self.app.app_secret}))
            .send()
            .await?
            .json()
            .await?;

        match response.app_access_token {
            Some(token) if response.code == 0 && !token.is_empty() => Ok(token),
            _ => Err(OAuthError::NoAppToken {
                code: response.code,
                msg: response.msg,
            }),
        }
    }
}
