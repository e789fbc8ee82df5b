use std::io;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::info;

/// SIGINT/SIGTERM listener.
///
/// Handlers are registered on construction, so a signal delivered while the
/// snapshot is still replaying is not lost.
pub struct Shutdown {
    sigint: Signal,
    sigterm: Signal,
}

impl Shutdown {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves once either signal arrives.
    pub async fn recv(&mut self) {
        let name = tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        };
        info!(
            event.name = "shutdown.signal_received",
            signal = name,
            "received shutdown signal"
        );
    }
}
