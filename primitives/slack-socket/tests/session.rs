//! Drives the run-loop against an in-process stand-in for Slack.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use slack_socket::{SessionConfig, SocketError, SocketEvent, SocketModeClient, WebClient};
use tokio::{
    net::TcpListener,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// What the mock socket does once its scripted frames are sent.
#[derive(Clone, Copy, Default)]
enum AfterFrames {
    /// Keep reading and forward text replies.
    #[default]
    Listen,
    /// Drop the socket without a close frame.
    HangUp,
    /// Send one ping, then forward text replies and pongs.
    Ping,
}

struct MockState {
    open_response: Value,
    frames: Vec<String>,
    after: AfterFrames,
    acks: UnboundedSender<String>,
}

struct MockSlack {
    api_base: String,
    acks: UnboundedReceiver<String>,
}

async fn open_connection(State(state): State<Arc<MockState>>) -> Json<Value> {
    Json(state.open_response.clone())
}

async fn link(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<MockState>) {
    for frame in &state.frames {
        if socket.send(Message::Text(frame.clone().into())).await.is_err() {
            return;
        }
    }

    match state.after {
        AfterFrames::Listen => {}
        AfterFrames::HangUp => return,
        AfterFrames::Ping => {
            if socket.send(Message::Ping(b"keepalive".to_vec().into())).await.is_err() {
                return;
            }
        }
    }

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let _ = state.acks.send(text.as_str().to_string());
            }
            Message::Pong(data) => {
                let _ = state
                    .acks
                    .send(format!("pong:{}", String::from_utf8_lossy(&data)));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Starts a mock whose `apps.connections.open` answers with `open_response`.
/// A `url` field in the response is replaced by the mock's own socket URL.
async fn spawn_mock(open_response: Value, frames: Vec<Value>) -> MockSlack {
    spawn_mock_with(open_response, frames, AfterFrames::default()).await
}

async fn spawn_mock_with(open_response: Value, frames: Vec<Value>, after: AfterFrames) -> MockSlack {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let ws_url = format!("ws://{addr}/link");
    let open_response = match open_response.get("url") {
        Some(_) => {
            let mut body = open_response.clone();
            body["url"] = Value::String(ws_url);
            body
        }
        None => open_response,
    };

    let (acks_tx, acks_rx) = mpsc::unbounded_channel();
    let state = Arc::new(MockState {
        open_response,
        frames: frames.iter().map(Value::to_string).collect(),
        after,
        acks: acks_tx,
    });

    let app = Router::new()
        .route("/api/apps.connections.open", post(open_connection))
        .route("/link", get(link))
        .with_state(state);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockSlack {
        api_base: format!("http://{addr}/api"),
        acks: acks_rx,
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        reconnect_delay: Duration::from_millis(10),
        max_attempts: 3,
        ..SessionConfig::default()
    }
}

fn start(
    mock: &MockSlack,
    config: SessionConfig,
) -> (
    JoinHandle<Result<(), SocketError>>,
    UnboundedReceiver<SocketEvent>,
    CancellationToken,
) {
    let web = WebClient::new(&mock.api_base, "xoxb-test", "xapp-test").unwrap();
    let (client, events) = SocketModeClient::new(web, config);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { client.run(token).await });
    (handle, events, cancel)
}

async fn next_event(events: &mut UnboundedReceiver<SocketEvent>) -> SocketEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event queue closed")
}

#[tokio::test]
async fn delivers_and_acknowledges_envelopes() {
    let mut mock = spawn_mock(
        json!({"ok": true, "url": "{url}"}),
        vec![
            json!({"type": "hello", "num_connections": 1}),
            json!({
                "type": "events_api",
                "envelope_id": "e1",
                "payload": {"event": {"type": "app_mention", "text": "hi"}}
            }),
            json!({
                "type": "slash_commands",
                "envelope_id": "e2",
                "accepts_response_payload": true,
                "payload": {"command": "/ping"}
            }),
            json!({"type": "brand_new_type", "data": 7}),
        ],
    )
    .await;

    let (handle, mut events, cancel) = start(&mock, fast_config());

    assert_eq!(next_event(&mut events).await, SocketEvent::Connecting { attempt: 1 });
    assert_eq!(next_event(&mut events).await, SocketEvent::Connected { attempt: 1 });
    assert_eq!(next_event(&mut events).await.tag(), "hello");

    let platform = next_event(&mut events).await;
    assert!(matches!(platform, SocketEvent::EventsApi(ref e) if e.envelope_id == "e1"));

    let command = next_event(&mut events).await;
    assert!(matches!(command, SocketEvent::SlashCommand(ref e) if e.payload["command"] == "/ping"));

    let unknown = next_event(&mut events).await;
    assert_eq!(unknown.tag(), "brand_new_type");
    assert_eq!(unknown.data()["data"], 7);

    for expected in ["e1", "e2"] {
        let ack = tokio::time::timeout(WAIT, mock.acks.recv())
            .await
            .expect("timed out waiting for ack")
            .expect("ack channel closed");
        let ack: Value = serde_json::from_str(&ack).unwrap();
        assert_eq!(ack, json!({"envelope_id": expected}));
    }

    cancel.cancel();
    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn invalid_auth_stops_without_retry() {
    let mock = spawn_mock(json!({"ok": false, "error": "invalid_auth"}), vec![]).await;
    let (handle, mut events, _cancel) = start(&mock, fast_config());

    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(SocketError::InvalidAuth(ref e)) if e == "invalid_auth"));

    assert_eq!(next_event(&mut events).await, SocketEvent::Connecting { attempt: 1 });
    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::InvalidAuth {
            error: "invalid_auth".into()
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let mock = spawn_mock(json!({"ok": false, "error": "internal_error"}), vec![]).await;
    let config = SessionConfig {
        max_attempts: 2,
        ..fast_config()
    };
    let (handle, mut events, _cancel) = start(&mock, config);

    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(SocketError::ReconnectExhausted(2))));

    let mut tags = Vec::new();
    while let Ok(event) = events.try_recv() {
        tags.push(event.tag().to_string());
    }
    assert_eq!(
        tags,
        ["connecting", "connection_error", "connecting", "connection_error"]
    );
}

#[tokio::test]
async fn reconnects_when_slack_asks() {
    let mock = spawn_mock(
        json!({"ok": true, "url": "{url}"}),
        vec![
            json!({"type": "hello"}),
            json!({"type": "disconnect", "reason": "refresh_requested"}),
        ],
    )
    .await;
    let (handle, mut events, cancel) = start(&mock, fast_config());

    let mut connected = 0;
    while connected < 2 {
        if let SocketEvent::Connected { attempt } = next_event(&mut events).await {
            assert_eq!(attempt, 1);
            connected += 1;
        }
    }

    cancel.cancel();
    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn link_disabled_is_fatal() {
    let mock = spawn_mock(
        json!({"ok": true, "url": "{url}"}),
        vec![json!({"type": "disconnect", "reason": "link_disabled"})],
    )
    .await;
    let (handle, _events, _cancel) = start(&mock, fast_config());

    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(SocketError::LinkDisabled)));
}

#[tokio::test]
async fn sockets_dropped_before_hello_back_off() {
    let mock = spawn_mock_with(json!({"ok": true, "url": "{url}"}), vec![], AfterFrames::HangUp).await;
    let config = SessionConfig {
        reconnect_delay: Duration::from_millis(200),
        max_attempts: 3,
        ..SessionConfig::default()
    };

    let started = Instant::now();
    let (handle, mut events, _cancel) = start(&mock, config);

    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(SocketError::ReconnectExhausted(3))));

    // 200ms after the first drop, 400ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(600));

    let mut attempts = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SocketEvent::Connected { attempt } = event {
            attempts.push(attempt);
        }
    }
    assert_eq!(attempts, [1, 2, 3]);
}

#[tokio::test]
async fn greeted_sockets_that_drop_still_wait_between_dials() {
    let mock = spawn_mock_with(
        json!({"ok": true, "url": "{url}"}),
        vec![json!({"type": "hello"})],
        AfterFrames::HangUp,
    )
    .await;
    let config = SessionConfig {
        reconnect_delay: Duration::from_millis(100),
        ..SessionConfig::default()
    };
    let (handle, mut events, cancel) = start(&mock, config);

    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();
    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());

    let mut connects = 0;
    while let Ok(event) = events.try_recv() {
        if let SocketEvent::Connected { attempt } = event {
            // The hello resets the count, so every redial is a first retry.
            assert!(attempt <= 2);
            connects += 1;
        }
    }
    assert!((2..=6).contains(&connects), "dialed {connects} times in 500ms");
}

#[tokio::test]
async fn pings_get_exactly_one_pong() {
    let mut mock = spawn_mock_with(
        json!({"ok": true, "url": "{url}"}),
        vec![json!({"type": "hello"})],
        AfterFrames::Ping,
    )
    .await;
    let (handle, _events, cancel) = start(&mock, fast_config());

    let pong = tokio::time::timeout(WAIT, mock.acks.recv())
        .await
        .expect("timed out waiting for pong")
        .expect("ack channel closed");
    assert_eq!(pong, "pong:keepalive");

    let extra = tokio::time::timeout(Duration::from_millis(300), mock.acks.recv()).await;
    assert!(extra.is_err(), "unexpected reply: {extra:?}");

    cancel.cancel();
    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}
