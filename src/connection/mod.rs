//! Connection Module
//! 
//! Accept loop and the per-connection SOCKS5 state machine.

pub mod handler;
pub mod server;

pub use handler::{Connection, ProxyContext};
pub use server::{Server, Socks5Config};
