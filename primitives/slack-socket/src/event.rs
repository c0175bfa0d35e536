//! Typed view of what arrives over a Socket Mode connection.

use serde::Deserialize;
use serde_json::{Value, json};

/// A Socket Mode envelope: a payload Slack expects to be acknowledged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    pub envelope_id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub accepts_response_payload: bool,
    #[serde(default)]
    pub retry_attempt: Option<u32>,
    #[serde(default)]
    pub retry_reason: Option<String>,
}

/// A frame kept verbatim, with the `type` it announced.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub tag: String,
    pub raw: Value,
}

/// How a tagged frame is decoded.
enum Shape {
    Frame(fn(Frame) -> SocketEvent),
    Envelope(fn(Envelope) -> SocketEvent),
}

/// Everything the session reports, connection lifecycle included.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connecting { attempt: u32 },
    ConnectionError { attempt: u32, error: String },
    Connected { attempt: u32 },
    Hello(Frame),
    Disconnect(Frame),
    EventsApi(Envelope),
    Interactive(Envelope),
    SlashCommand(Envelope),
    IncomingError { error: String, raw: String },
    InvalidAuth { error: String },
    Unrecognized(Frame),
}

impl SocketEvent {
    /// Decodes one text frame received from the socket.
    pub fn from_frame(text: &str) -> Self {
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                return SocketEvent::IncomingError {
                    error: e.to_string(),
                    raw: text.to_string(),
                };
            }
        };

        let tag = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let shape = match tag.as_str() {
            "hello" => Shape::Frame(SocketEvent::Hello),
            "disconnect" => Shape::Frame(SocketEvent::Disconnect),
            "events_api" => Shape::Envelope(SocketEvent::EventsApi),
            "interactive" => Shape::Envelope(SocketEvent::Interactive),
            "slash_commands" => Shape::Envelope(SocketEvent::SlashCommand),
            _ => Shape::Frame(SocketEvent::Unrecognized),
        };

        match shape {
            Shape::Frame(wrap) => wrap(Frame { tag, raw }),
            Shape::Envelope(wrap) => match serde_json::from_value::<Envelope>(raw) {
                Ok(envelope) => wrap(envelope),
                Err(e) => SocketEvent::IncomingError {
                    error: format!("malformed {tag} envelope: {e}"),
                    raw: text.to_string(),
                },
            },
        }
    }

    /// The type tag, as Slack or the session names it.
    pub fn tag(&self) -> &str {
        match self {
            SocketEvent::Connecting { .. } => "connecting",
            SocketEvent::ConnectionError { .. } => "connection_error",
            SocketEvent::Connected { .. } => "connected",
            SocketEvent::Hello(_) => "hello",
            SocketEvent::Disconnect(_) => "disconnect",
            SocketEvent::EventsApi(_) => "events_api",
            SocketEvent::Interactive(_) => "interactive",
            SocketEvent::SlashCommand(_) => "slash_commands",
            SocketEvent::IncomingError { .. } => "incoming_error",
            SocketEvent::InvalidAuth { .. } => "invalid_auth",
            SocketEvent::Unrecognized(frame) => frame.tag.as_str(),
        }
    }

    /// The raw payload carried by the event.
    pub fn data(&self) -> Value {
        match self {
            SocketEvent::Connecting { attempt } | SocketEvent::Connected { attempt } => {
                json!({ "attempt": attempt })
            }
            SocketEvent::ConnectionError { attempt, error } => {
                json!({ "attempt": attempt, "error": error })
            }
            SocketEvent::Hello(frame)
            | SocketEvent::Disconnect(frame)
            | SocketEvent::Unrecognized(frame) => frame.raw.clone(),
            SocketEvent::EventsApi(envelope)
            | SocketEvent::Interactive(envelope)
            | SocketEvent::SlashCommand(envelope) => envelope.payload.clone(),
            SocketEvent::IncomingError { raw, .. } => Value::String(raw.clone()),
            SocketEvent::InvalidAuth { error } => json!({ "error": error }),
        }
    }

    /// Envelope id to acknowledge, if the frame carried one.
    pub fn envelope_id(&self) -> Option<&str> {
        match self {
            SocketEvent::EventsApi(envelope)
            | SocketEvent::Interactive(envelope)
            | SocketEvent::SlashCommand(envelope) => Some(envelope.envelope_id.as_str()),
            SocketEvent::Unrecognized(frame) => {
                frame.raw.get("envelope_id").and_then(Value::as_str)
            }
            _ => None,
        }
    }
}
