//! Connection Tracking
//!
//! Server-owned counters of active, total, peak and rejected connections,
//! an optional concurrency limit and a periodic diagnostics task that also
//! reports runtime load and relay buffer usage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::relay::BUFFER_SIZE;

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    total: AtomicUsize,
    peak: AtomicUsize,
    rejected: AtomicUsize,
}

/// Tracks live connections and enforces `max_connections` when non-zero
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
    limit: Option<Arc<Semaphore>>,
    max_connections: usize,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStats {
    pub active: usize,
    pub total: usize,
    pub peak: usize,
    pub rejected: usize,
}

impl ConnectionStats {
    /// Copy buffers held by relays, two per active connection
    pub fn relay_buffer_bytes(&self) -> usize {
        self.active * 2 * BUFFER_SIZE
    }
}

/// Load of the tokio runtime the server runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeUsage {
    pub workers: usize,
    pub alive_tasks: usize,
    pub global_queue_depth: usize,
}

impl RuntimeUsage {
    /// Snapshot of the current runtime; all zero outside of one
    pub fn current() -> Self {
        match Handle::try_current() {
            Ok(handle) => {
                let metrics = handle.metrics();
                Self {
                    workers: metrics.num_workers(),
                    alive_tasks: metrics.num_alive_tasks(),
                    global_queue_depth: metrics.global_queue_depth(),
                }
            }
            Err(_) => Self::default(),
        }
    }
}

impl ConnectionTracker {
    /// `max_connections == 0` means unlimited
    pub fn new(max_connections: usize) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            limit: (max_connections > 0).then(|| Arc::new(Semaphore::new(max_connections))),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Take a slot for a new connection, or `None` when the limit is reached
    pub fn try_acquire(&self) -> Option<ConnectionSlot> {
        let permit = match &self.limit {
            Some(limit) => match Arc::clone(limit).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        max_connections = self.max_connections,
                        "Connection limit reached, rejecting connection"
                    );
                    return None;
                }
            },
            None => None,
        };

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let active = self.counters.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.peak.fetch_max(active, Ordering::Relaxed);
        trace!(active, "Acquired connection slot");

        Some(ConnectionSlot {
            counters: Arc::clone(&self.counters),
            _permit: permit,
        })
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            active: self.counters.active.load(Ordering::Relaxed),
            total: self.counters.total.load(Ordering::Relaxed),
            peak: self.counters.peak.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Log connection counts and resource usage every `interval` until `cancel` fires
    pub fn spawn_diagnostics(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = tracker.stats();
                        let runtime = RuntimeUsage::current();
                        debug!(
                            active = stats.active,
                            total = stats.total,
                            peak = stats.peak,
                            rejected = stats.rejected,
                            relay_buffer_bytes = stats.relay_buffer_bytes(),
                            workers = runtime.workers,
                            alive_tasks = runtime.alive_tasks,
                            global_queue_depth = runtime.global_queue_depth,
                            "Connection diagnostics"
                        );
                    }
                }
            }
            trace!("Diagnostics task stopped");
        })
    }
}

/// Releases its connection slot when dropped
#[derive(Debug)]
pub struct ConnectionSlot {
    counters: Arc<Counters>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let remaining = self.counters.active.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(active = remaining, "Released connection slot");
    }
}
