//! SOCKS5 protocol errors

use std::io;
use std::time::Duration;
use thiserror::Error;

use super::types::Reply;

/// Conditions raised while speaking the SOCKS5 protocol with a client.
///
/// Some variants map onto a reply code the client is told about before the
/// connection is closed (see [`Socks5Error::reply`]); the others close
/// the connection silently.
#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("no acceptable authentication method among {0:?}")]
    NoAcceptableMethod(Vec<u8>),

    #[error("unsupported username/password sub-negotiation version: {0:#04x}")]
    UnsupportedAuthVersion(u8),

    #[error("authentication failed for user '{0}'")]
    AuthenticationFailed(String),

    #[error("unrecognized address type: {0:#04x}")]
    AddrTypeNotSupported(u8),

    #[error("unsupported command: {0:#04x}")]
    CommandNotSupported(u8),

    #[error("invalid reserved byte: {0:#04x}")]
    InvalidReserved(u8),

    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Socks5Error {
    /// Reply owed to the client for this error, if the protocol defines one
    pub fn reply(&self) -> Option<Reply> {
        match self {
            Socks5Error::AddrTypeNotSupported(_) => Some(Reply::AddrTypeNotSupported),
            Socks5Error::CommandNotSupported(_) => Some(Reply::CommandNotSupported),
            _ => None,
        }
    }
}
