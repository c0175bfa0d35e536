//! The Socket Mode run-loop.
//!
//! One [`SocketModeClient`] owns one logical session. [`SocketModeClient::run`]
//! keeps a WebSocket open to Slack until the cancellation token fires, dialing
//! a fresh URL whenever Slack asks for a reconnect or the link goes quiet.
//! Every envelope is acknowledged before it is queued, so a slow consumer
//! never causes Slack to redeliver.

use std::time::Duration;

use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::{Value, json};
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::Instant,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{SocketError, SocketEvent, WebClient};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Backoff multiplier cap: the delay stops growing after this many attempts.
const MAX_BACKOFF_STEPS: u32 = 6;

/// Tuning knobs for the run-loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the link is checked for silence. No pings are sent; Slack pings us.
    pub idle_check_interval: Duration,
    /// Silence longer than this drops the connection and reconnects.
    pub idle_timeout: Duration,
    /// Base delay between failed connection attempts (multiplied by the attempt number).
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    /// Log every frame on the `socketmode` target.
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_check_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            reconnect_delay: Duration::from_secs(2),
            max_attempts: 10,
            debug: false,
        }
    }
}

/// How a served connection ended without error.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Cancelled,
    /// Slack asked for a fresh connection.
    Refresh,
    /// The link closed or went quiet.
    Dropped,
}

/// Socket Mode client; events are delivered on the queue returned by [`SocketModeClient::new`].
#[derive(Debug)]
pub struct SocketModeClient {
    web: WebClient,
    config: SessionConfig,
    events: UnboundedSender<SocketEvent>,
}

impl SocketModeClient {
    pub fn new(web: WebClient, config: SessionConfig) -> (Self, UnboundedReceiver<SocketEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                web,
                config,
                events,
            },
            rx,
        )
    }

    /// Runs the session until `cancel` fires or a fatal error occurs.
    ///
    /// Returns `Ok(())` only on cancellation. Rejected credentials, a disabled
    /// Socket Mode link, and running out of connection attempts are returned as
    /// errors; everything else is retried.
    ///
    /// The failure count resets only once Slack has said `hello` on a
    /// connection. A socket that opens and drops before that counts as a
    /// failed attempt and goes through the backoff.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SocketError> {
        let mut failures: u32 = 0;

        loop {
            if failures > 0 {
                if failures >= self.config.max_attempts {
                    return Err(SocketError::ReconnectExhausted(failures));
                }

                let delay = self.config.reconnect_delay * failures.min(MAX_BACKOFF_STEPS);
                info!(
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    "reconnecting to Slack Socket Mode"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("shutdown during reconnect backoff");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let attempt = failures + 1;
            self.emit(SocketEvent::Connecting { attempt });

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                result = self.connect() => result,
            };

            let ws = match connected {
                Ok(ws) => ws,
                Err(SocketError::InvalidAuth(error)) => {
                    warn!(error = %error, "Slack rejected the app-level token");
                    self.emit(SocketEvent::InvalidAuth {
                        error: error.clone(),
                    });
                    return Err(SocketError::InvalidAuth(error));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "Socket Mode connection attempt failed");
                    self.emit(SocketEvent::ConnectionError {
                        attempt,
                        error: e.to_string(),
                    });
                    failures += 1;
                    continue;
                }
            };

            info!(attempt, "connected to Slack Socket Mode");
            self.emit(SocketEvent::Connected { attempt });

            let mut greeted = false;
            let served = self.serve(ws, &cancel, &mut greeted).await;
            if greeted {
                failures = 0;
            }

            match served {
                Ok(Outcome::Cancelled) => return Ok(()),
                Ok(Outcome::Refresh) if greeted => {}
                Ok(outcome) => {
                    warn!(?outcome, greeted, "Socket Mode connection ended early");
                    failures += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, greeted, "Socket Mode connection lost");
                    failures += 1;
                }
            }
        }
    }

    /// Asks Slack for a socket URL and dials it.
    async fn connect(&self) -> Result<WsStream, SocketError> {
        let url = self.web.open_connection().await?;
        if self.config.debug {
            debug!(target: "socketmode", url = %url, "dialing Socket Mode URL");
        }

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(ws)
    }

    /// Reads one connection until it ends. Sets `greeted` once `hello` arrives.
    async fn serve(
        &self,
        ws: WsStream,
        cancel: &CancellationToken,
        greeted: &mut bool,
    ) -> Result<Outcome, SocketError> {
        let (mut write, mut read): (WsSink, WsSource) = ws.split();

        let mut idle_check = tokio::time::interval(self.config.idle_check_interval);
        idle_check.tick().await;
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("closing Socket Mode connection");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "close frame not delivered");
                    }
                    return Ok(Outcome::Cancelled);
                }

                _ = idle_check.tick() => {
                    if last_seen.elapsed() > self.config.idle_timeout {
                        warn!(
                            idle_secs = last_seen.elapsed().as_secs(),
                            "Socket Mode link went quiet, reconnecting"
                        );
                        return Ok(Outcome::Dropped);
                    }
                }

                msg = read.next() => {
                    let Some(msg) = msg else {
                        info!("Socket Mode stream ended, reconnecting");
                        return Ok(Outcome::Dropped);
                    };
                    last_seen = Instant::now();

                    // Pings are answered by tungstenite itself while reading.
                    match msg? {
                        Message::Text(text) => {
                            let handled = self
                                .handle_frame(text.as_str(), &mut write, cancel, greeted)
                                .await?;
                            if let Some(outcome) = handled {
                                return Ok(outcome);
                            }
                        }
                        Message::Close(frame) => {
                            info!(?frame, "Socket Mode closed by server, reconnecting");
                            return Ok(Outcome::Dropped);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Acknowledges, queues, and reacts to one text frame.
    ///
    /// A frame whose ack is interrupted by cancellation is not queued.
    async fn handle_frame(
        &self,
        text: &str,
        write: &mut WsSink,
        cancel: &CancellationToken,
        greeted: &mut bool,
    ) -> Result<Option<Outcome>, SocketError> {
        if self.config.debug {
            debug!(target: "socketmode", frame = text, "received frame");
        }

        let event = SocketEvent::from_frame(text);

        if let Some(envelope_id) = event.envelope_id() {
            let ack = json!({ "envelope_id": envelope_id }).to_string();
            if self.config.debug {
                debug!(target: "socketmode", frame = %ack, "sending ack");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Some(Outcome::Cancelled)),
                sent = write.send(Message::Text(ack.into())) => sent?,
            }
        }

        let disconnect_reason = match &event {
            SocketEvent::Hello(_) => {
                *greeted = true;
                None
            }
            SocketEvent::Disconnect(frame) => Some(
                frame
                    .raw
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            ),
            _ => None,
        };

        self.emit(event);

        match disconnect_reason.as_deref() {
            None => Ok(None),
            Some("warning") => {
                info!("Slack warned of an upcoming disconnect");
                Ok(None)
            }
            Some("link_disabled") => Err(SocketError::LinkDisabled),
            Some(reason) => {
                info!(reason, "Slack requested disconnect, reconnecting");
                Ok(Some(Outcome::Refresh))
            }
        }
    }

    fn emit(&self, event: SocketEvent) {
        if let Err(err) = self.events.send(event) {
            debug!(tag = err.0.tag(), "event queue closed, dropping event");
        }
    }
}
