//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM/SIGINT (Ctrl+C elsewhere), cancels the server's token and
//! gives live connections a bounded time to finish.

use std::time::Duration;

use tokio::signal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resource::ConnectionTracker;
use crate::Result;

/// How long [`ShutdownCoordinator::drain`] waits for live connections by default
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Turns process signals into cancellation of the server token
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn trigger(&self) {
        if !self.cancel.is_cancelled() {
            info!("Shutdown requested");
        }
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for a termination signal, or for the token to be cancelled
    /// elsewhere, then cancel the token
    pub async fn listen_for_signals(&self) -> Result<()> {
        debug!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                _ = self.cancel.cancelled() => debug!("Shutdown already in progress"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
                _ = self.cancel.cancelled() => debug!("Shutdown already in progress"),
            }
        }

        self.cancel.cancel();
        Ok(())
    }

    /// Wait until `tracker` reports no live connections or the drain timeout
    /// passes. Returns the number of connections still open.
    pub async fn drain(&self, tracker: &ConnectionTracker) -> usize {
        let start = Instant::now();
        let mut last = tracker.active();
        if last > 0 {
            info!(active = last, timeout = ?self.drain_timeout, "Waiting for connections to close");
        }

        while last > 0 && start.elapsed() < self.drain_timeout {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            let current = tracker.active();
            if current != last {
                debug!(from = last, to = current, "Active connections changed");
                last = current;
            }
        }

        if last == 0 {
            debug!(elapsed = ?start.elapsed(), "All connections closed");
        } else {
            warn!(active = last, elapsed = ?start.elapsed(), "Drain timeout reached with connections still open");
        }
        last
    }
}
