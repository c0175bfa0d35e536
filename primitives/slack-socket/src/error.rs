//! Errors raised by the Socket Mode session.

/// Failure modes of the Web API client and the socket run-loop.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {method} failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} returned error: {error}")]
    Api { method: &'static str, error: String },

    #[error("{method} response is missing `{field}`")]
    MissingField {
        method: &'static str,
        field: &'static str,
    },

    #[error("authentication rejected: {0}")]
    InvalidAuth(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Socket Mode is disabled for this app (link_disabled)")]
    LinkDisabled,

    #[error("gave up after {0} connection attempts")]
    ReconnectExhausted(u32),
}

impl SocketError {
    /// Errors that reconnecting cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SocketError::InvalidAuth(_)
                | SocketError::LinkDisabled
                | SocketError::ReconnectExhausted(_)
                | SocketError::Client(_)
        )
    }
}
