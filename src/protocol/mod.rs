//! SOCKS5 Protocol Implementation
//!
//! Wire types, constants and the byte-level codec for RFC 1928 / RFC 1929.

pub mod codec;
pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::Socks5Error;
pub use types::{AddrSpec, Command, Host, Reply, Request};
