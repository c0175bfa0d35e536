//! Slack Source - Slack Socket Mode Event Logger
//!
//! Connects to Slack over Socket Mode and logs every event it receives:
//! platform events and slash commands get one line each, anything else is
//! logged as unhandleable together with its raw payload.
//!
//! # Usage
//!
//! ```bash
//! export SLACK_AUTH_TOKEN=xoxb-...
//! export SLACK_APP_TOKEN=xapp-...
//!
//! # Log events
//! slack-source
//!
//! # Also log every Socket Mode frame
//! slack-source --debug
//! ```
//!
//! Exits non-zero when either token is missing or the session fails for good
//! (rejected credentials, Socket Mode disabled, reconnects exhausted). SIGTERM
//! and Ctrl-C shut down cleanly with exit code 0.

mod config;
mod dispatch;
mod shutdown;

use anyhow::Context;
use clap::Parser;
use slack_socket::{SocketModeClient, WebClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{Args, Credentials},
    dispatch::TracingLog,
};

/// Default filter when `RUST_LOG` is unset.
fn default_filter(debug: bool) -> &'static str {
    if debug {
        "info,slack_source=debug,slack_socket=debug,socketmode=debug"
    } else {
        "info"
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let credentials = Credentials::from_env()?;

    let cancel = CancellationToken::new();
    let signals = shutdown::spawn_signal_listener(cancel.clone())
        .context("failed to install signal handlers")?;

    let web = WebClient::new(
        args.api_base.as_str(),
        credentials.auth_token,
        credentials.app_token,
    )
    .context("failed to build Slack Web API client")?;

    match web.auth_test().await {
        Ok(identity) => info!(
            user_id = %identity.user_id,
            user = ?identity.user,
            team = ?identity.team,
            "authenticated with Slack"
        ),
        Err(e) => warn!(error = %e, "auth.test failed"),
    }

    let (socket, events) = SocketModeClient::new(web, args.session_config());
    let dispatcher = tokio::spawn(dispatch::run(events, cancel.clone(), TracingLog));

    let session = socket.run(cancel.clone()).await;

    // Stop the dispatch loop on fatal session errors too.
    cancel.cancel();

    match tokio::time::timeout(args.shutdown_timeout(), dispatcher).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "event loop task failed"),
        Err(_) => warn!(
            timeout_secs = args.shutdown_timeout,
            "event loop did not stop in time"
        ),
    }

    if let Err(e) = signals.await {
        warn!(error = %e, "signal listener task failed");
    }

    session.context("Slack Socket Mode session failed")?;
    Ok(())
}
