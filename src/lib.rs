//! socks5d Library
//!
//! SOCKS5 proxy server (RFC 1928) with pluggable authentication (RFC 1929),
//! static and LDAP-backed credential stores, rule sets, address rewriting
//! and name resolution hooks.

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod relay;
pub mod resource;
pub mod routing;
pub mod shutdown;

pub use config::Config;
pub use connection::{Server, Socks5Config};
pub use resource::ConnectionTracker;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy server
pub type Result<T> = anyhow::Result<T>;
