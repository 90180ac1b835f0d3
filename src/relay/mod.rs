//! Data Relay Module
//! 
//! Outbound dialing and bidirectional data relay between client and target.

pub mod engine;
pub mod session;

pub use engine::{bind_udp, dial, listen, reply_for_error, RelayEngine, BUFFER_SIZE, HALF_CLOSE_TIMEOUT};
pub use session::{Direction, RelaySession, RelayStats};
