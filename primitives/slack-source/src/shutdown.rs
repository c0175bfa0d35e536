//! Process signals to cancellation.

use tokio::{
    signal::unix::{SignalKind, signal},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `cancel` on SIGTERM or Ctrl-C.
///
/// The listener exits quietly if the token is cancelled by someone else first.
pub fn spawn_signal_listener(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = ctrl_c => info!("received SIGINT"),
        }
        cancel.cancel();
    }))
}
