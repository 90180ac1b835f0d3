//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Direction of a relayed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client -> target
    Up,
    /// target -> client
    Down,
}

/// Byte counters and activity clock for one relayed connection
#[derive(Debug)]
pub struct RelaySession {
    pub request_id: Uuid,
    pub client_addr: Option<SocketAddr>,
    pub target_addr: Option<SocketAddr>,
    start_time: Instant,
    /// Milliseconds since `start_time` of the last transfer
    last_activity: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Totals for a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub duration: Duration,
}

impl RelayStats {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }
}

impl RelaySession {
    pub fn new(
        request_id: Uuid,
        client_addr: Option<SocketAddr>,
        target_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            request_id,
            client_addr,
            target_addr,
            start_time: Instant::now(),
            last_activity: AtomicU64::new(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Count `bytes` moved in `direction` and reset the idle clock
    pub fn record(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::Up => &self.bytes_up,
            Direction::Down => &self.bytes_down,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_activity
            .store(self.duration().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since either direction last moved data
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity.load(Ordering::Relaxed));
        self.duration().saturating_sub(last)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            duration: self.duration(),
        }
    }

    pub fn log_stats(&self, user: Option<&str>) {
        let stats = self.stats();
        info!(
            request_id = %self.request_id,
            client = ?self.client_addr,
            target = ?self.target_addr,
            duration_ms = stats.duration.as_millis() as u64,
            bytes_up = stats.bytes_up,
            bytes_down = stats.bytes_down,
            total_bytes = stats.total_bytes(),
            user,
            "Relay session completed"
        );
    }
}
