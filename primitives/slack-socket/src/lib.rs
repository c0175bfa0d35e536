//! Slack Socket - Socket Mode Session Layer
//!
//! Opens a Slack Socket Mode connection with an app-level token, acknowledges
//! every envelope Slack delivers, reconnects when the server asks for it or the
//! link goes quiet, and hands each inbound frame to the caller as a typed
//! [`SocketEvent`] on an ordered queue.
//!
//! # Usage
//!
//! ```no_run
//! use slack_socket::{SessionConfig, SocketModeClient, WebClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), slack_socket::SocketError> {
//! let web = WebClient::new(slack_socket::DEFAULT_API_BASE, "xoxb-...", "xapp-...")?;
//! let (client, mut events) = SocketModeClient::new(web, SessionConfig::default());
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event.tag());
//!     }
//! });
//!
//! client.run(CancellationToken::new()).await
//! # }
//! ```

mod error;
mod event;
mod session;
mod web;

pub use error::SocketError;
pub use event::{Envelope, Frame, SocketEvent};
pub use session::{SessionConfig, SocketModeClient};
pub use web::{DEFAULT_API_BASE, Identity, WebClient};
