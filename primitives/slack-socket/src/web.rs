//! Slack Web API calls needed to run a Socket Mode session.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::SocketError;

/// Slack Web API base URL.
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error codes that mean the token itself is unusable.
const AUTH_ERRORS: [&str; 5] = [
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// Identity of the bot user, as reported by `auth.test`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// Thin Web API client holding the bot token and the app-level token.
#[derive(Debug, Clone)]
pub struct WebClient {
    http: Client,
    api_base: String,
    bot_token: SecretString,
    app_token: SecretString,
}

impl WebClient {
    /// Creates a client against `api_base` (usually [`DEFAULT_API_BASE`]).
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<SecretString>,
        app_token: impl Into<SecretString>,
    ) -> Result<Self, SocketError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SocketError::Client)?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            app_token: app_token.into(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Calls `apps.connections.open` and returns the WebSocket URL to dial.
    pub async fn open_connection(&self) -> Result<String, SocketError> {
        const METHOD: &str = "apps.connections.open";

        let body = self.call(METHOD, &self.app_token).await?;

        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(SocketError::MissingField {
                method: METHOD,
                field: "url",
            })
    }

    /// Calls `auth.test` with the bot token.
    pub async fn auth_test(&self) -> Result<Identity, SocketError> {
        const METHOD: &str = "auth.test";

        let body = self.call(METHOD, &self.bot_token).await?;

        serde_json::from_value(body).map_err(|_| SocketError::MissingField {
            method: METHOD,
            field: "user_id",
        })
    }

    async fn call(&self, method: &'static str, token: &SecretString) -> Result<Value, SocketError> {
        let url = format!("{}/{method}", self.api_base);

        let body: Value = self
            .http
            .post(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|source| SocketError::Http { method, source })?
            .json()
            .await
            .map_err(|source| SocketError::Http { method, source })?;

        check_ok(method, body)
    }
}

/// Turns a Slack `{"ok": false, "error": ...}` body into an error.
fn check_ok(method: &'static str, body: Value) -> Result<Value, SocketError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }

    let error = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    if AUTH_ERRORS.contains(&error.as_str()) {
        Err(SocketError::InvalidAuth(error))
    } else {
        Err(SocketError::Api { method, error })
    }
}
