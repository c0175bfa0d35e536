//! Startup configuration: CLI flags and the required Slack credentials.

use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;
use slack_socket::{DEFAULT_API_BASE, SessionConfig};

/// Environment variables that must be set and non-empty, in reporting order.
pub const REQUIRED_VARS: [&str; 2] = ["SLACK_AUTH_TOKEN", "SLACK_APP_TOKEN"];

/// Slack Socket Mode event logger.
#[derive(Parser, Debug, Clone)]
#[command(name = "slack-source")]
#[command(about = "Connects to Slack over Socket Mode and logs every event it receives")]
#[command(after_help = "Credentials are read from SLACK_AUTH_TOKEN and SLACK_APP_TOKEN.")]
pub struct Args {
    /// Log every Socket Mode frame and raise the default log level to debug.
    #[arg(short, long, env = "SLACK_DEBUG")]
    pub debug: bool,

    /// Slack Web API base URL.
    #[arg(long, env = "SLACK_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Seconds to wait for the event loop to finish at shutdown.
    #[arg(long, env = "SLACK_SHUTDOWN_TIMEOUT", default_value = "5")]
    pub shutdown_timeout: u64,

    /// Consecutive failed connection attempts before giving up.
    #[arg(long, env = "SLACK_MAX_RECONNECT_ATTEMPTS", default_value = "10")]
    pub max_reconnect_attempts: u32,
}

impl Args {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_attempts: self.max_reconnect_attempts,
            debug: self.debug,
            ..SessionConfig::default()
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("empty environment variables: {}", .0.join(", "))]
    MissingVars(Vec<String>),
}

/// Checks that every variable in `required` is set in the process environment.
pub fn validate_environment(required: &[&str]) -> Result<(), ConfigError> {
    validate_with(required, |name| std::env::var(name).ok())
}

/// Same as [`validate_environment`], reading values through `lookup`.
pub fn validate_with<F>(required: &[&str], lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<String> = required
        .iter()
        .copied()
        .filter(|name| lookup(*name).is_none_or(|value| value.is_empty()))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingVars(missing))
    }
}

/// The bot token and the app-level token.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub auth_token: SecretString,
    pub app_token: SecretString,
}

impl Credentials {
    /// Validates [`REQUIRED_VARS`] and reads both tokens from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        validate_environment(&REQUIRED_VARS)?;
        Ok(Self::read(|name| std::env::var(name).ok()))
    }

    fn read<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let [auth_var, app_var] = REQUIRED_VARS;
        Self {
            auth_token: SecretString::from(lookup(auth_var).unwrap_or_default()),
            app_token: SecretString::from(lookup(app_var).unwrap_or_default()),
        }
    }
}
