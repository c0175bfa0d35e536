//! Event dispatch loop.
//!
//! Consumes the Socket Mode event queue one event at a time and writes exactly
//! one log record per event (two for events it cannot handle: the record and
//! the raw payload). Stops when the cancellation token fires, even if events
//! are still queued.

use slack_socket::SocketEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Which handler an event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PlatformEvent,
    SlashCommand,
    Unhandleable,
}

/// Routes an event by its type.
pub fn route(event: &SocketEvent) -> Route {
    match event {
        SocketEvent::EventsApi(_) => Route::PlatformEvent,
        SocketEvent::SlashCommand(_) => Route::SlashCommand,
        SocketEvent::Connecting { .. }
        | SocketEvent::ConnectionError { .. }
        | SocketEvent::Connected { .. }
        | SocketEvent::Hello(_)
        | SocketEvent::Disconnect(_)
        | SocketEvent::Interactive(_)
        | SocketEvent::IncomingError { .. }
        | SocketEvent::InvalidAuth { .. }
        | SocketEvent::Unrecognized(_) => Route::Unhandleable,
    }
}

/// One log record produced by the loop.
#[derive(Debug, Clone, Copy)]
pub enum LogEntry<'a> {
    PlatformEvent(&'a SocketEvent),
    SlashCommand(&'a SocketEvent),
    Unhandleable(&'a SocketEvent),
    /// Raw payload of an unhandleable event, logged on its own line.
    EventData(&'a SocketEvent),
    Shutdown,
}

/// Destination for the loop's log records.
pub trait EventLog {
    fn record(&mut self, entry: LogEntry<'_>);
}

/// Writes records through `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl EventLog for TracingLog {
    fn record(&mut self, entry: LogEntry<'_>) {
        match entry {
            LogEntry::PlatformEvent(event) => {
                info!(tag = event.tag(), "handling the event {event:?}");
            }
            LogEntry::SlashCommand(event) => {
                info!(tag = event.tag(), kind = "command", "received a command {event:?}");
            }
            LogEntry::Unhandleable(event) => {
                info!(tag = event.tag(), "unhandleable event: {event:?}");
            }
            LogEntry::EventData(event) => {
                info!(tag = event.tag(), "event data ---> {}", event.data());
            }
            LogEntry::Shutdown => info!("shutdown the application..."),
        }
    }
}

/// Logs one event according to its route.
pub fn handle<L: EventLog>(event: &SocketEvent, log: &mut L) {
    match route(event) {
        Route::PlatformEvent => log.record(LogEntry::PlatformEvent(event)),
        Route::SlashCommand => log.record(LogEntry::SlashCommand(event)),
        Route::Unhandleable => {
            log.record(LogEntry::Unhandleable(event));
            log.record(LogEntry::EventData(event));
        }
    }
}

/// Services `events` until `cancel` fires.
pub async fn run<L: EventLog>(
    mut events: UnboundedReceiver<SocketEvent>,
    cancel: CancellationToken,
    mut log: L,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            event = events.recv() => match event {
                Some(event) => handle(&event, &mut log),
                None => {
                    cancel.cancelled().await;
                    break;
                }
            },
        }
    }

    log.record(LogEntry::Shutdown);
}
