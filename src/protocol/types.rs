//! SOCKS5 Protocol Types

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use uuid::Uuid;

use super::constants::*;
use super::error::Socks5Error;
use crate::auth::AuthContext;

/// Longest domain name the one-byte length prefix can carry
pub const MAX_DOMAIN_LEN: usize = 255;

/// Host part of an [`AddrSpec`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

/// An address as it travels on the wire: IPv4, IPv6 or a domain name, plus a port.
///
/// The type tag is derived from the host, so an IPv4 tag always carries four
/// address bytes and a domain tag always carries a non-empty name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddrSpec {
    host: Host,
    port: u16,
}

impl AddrSpec {
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self {
            host: Host::Ip(ip),
            port,
        }
    }

    /// Build a domain-name address. The name must be 1 to 255 bytes long.
    pub fn from_domain(domain: impl Into<String>, port: u16) -> Result<Self, Socks5Error> {
        let domain = domain.into();
        if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
            return Err(Socks5Error::InvalidDomain(domain));
        }
        Ok(Self {
            host: Host::Domain(domain),
            port,
        })
    }

    /// `0.0.0.0:0`, used in replies that carry no meaningful address
    pub fn unspecified() -> Self {
        Self::from_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match &self.host {
            Host::Ip(ip) => Some(*ip),
            Host::Domain(_) => None,
        }
    }

    pub fn domain(&self) -> Option<&str> {
        match &self.host {
            Host::Ip(_) => None,
            Host::Domain(domain) => Some(domain),
        }
    }

    /// Wire address type tag
    pub fn address_type(&self) -> u8 {
        match &self.host {
            Host::Ip(IpAddr::V4(_)) => atyp::IPV4,
            Host::Ip(IpAddr::V6(_)) => atyp::IPV6,
            Host::Domain(_) => atyp::DOMAIN,
        }
    }

    /// Socket address, if the host is already an IP
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip().map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Append `ATYP ADDR PORT` to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.address_type());
        match &self.host {
            Host::Ip(IpAddr::V4(ip)) => buf.put_slice(&ip.octets()),
            Host::Ip(IpAddr::V6(ip)) => buf.put_slice(&ip.octets()),
            Host::Domain(domain) => {
                // length bounded by from_domain
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
            }
        }
        buf.put_u16(self.port);
    }
}

impl From<SocketAddr> for AddrSpec {
    fn from(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip(), addr.port())
    }
}

impl fmt::Display for AddrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{}]:{}", ip, self.port),
            Host::Ip(ip) => write!(f, "{}:{}", ip, self.port),
            Host::Domain(domain) => write!(f, "{}:{}", domain, self.port),
        }
    }
}

/// SOCKS5 Commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl Command {
    pub fn code(self) -> u8 {
        match self {
            Command::Connect => command::CONNECT,
            Command::Bind => command::BIND,
            Command::UdpAssociate => command::UDP_ASSOCIATE,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            command::CONNECT => Some(Command::Connect),
            command::BIND => Some(Command::Bind),
            command::UDP_ASSOCIATE => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Connect => "connect",
            Command::Bind => "bind",
            Command::UdpAssociate => "udp-associate",
        })
    }
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(Command::Connect),
            "bind" => Ok(Command::Bind),
            "udp-associate" | "associate" | "udp" => Ok(Command::UdpAssociate),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

/// Reply codes sent back to the client after a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Succeeded,
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddrTypeNotSupported,
}

impl Reply {
    pub fn code(self) -> u8 {
        match self {
            Reply::Succeeded => reply::SUCCEEDED,
            Reply::GeneralFailure => reply::GENERAL_FAILURE,
            Reply::NotAllowed => reply::NOT_ALLOWED,
            Reply::NetworkUnreachable => reply::NETWORK_UNREACHABLE,
            Reply::HostUnreachable => reply::HOST_UNREACHABLE,
            Reply::ConnectionRefused => reply::CONNECTION_REFUSED,
            Reply::TtlExpired => reply::TTL_EXPIRED,
            Reply::CommandNotSupported => reply::COMMAND_NOT_SUPPORTED,
            Reply::AddrTypeNotSupported => reply::ADDR_TYPE_NOT_SUPPORTED,
        }
    }
}

/// A parsed client request together with everything learned about it so far
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub version: u8,
    pub command: Command,
    /// Destination as the client asked for it
    pub dest: AddrSpec,
    /// Destination actually used, after address rewriting
    pub target: AddrSpec,
    /// Filled in once the target has been resolved
    pub resolved: Option<IpAddr>,
    pub remote: Option<AddrSpec>,
    pub auth: AuthContext,
}

impl Request {
    pub fn new(command: Command, dest: AddrSpec, auth: AuthContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: SOCKS5_VERSION,
            command,
            target: dest.clone(),
            dest,
            resolved: None,
            remote: None,
            auth,
        }
    }

    /// Socket address to dial: the resolved IP if any, otherwise a literal target IP
    pub fn target_socket_addr(&self) -> Option<SocketAddr> {
        self.resolved
            .or_else(|| self.target.ip())
            .map(|ip| SocketAddr::new(ip, self.target.port()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_display_formats() {
        let v4 = AddrSpec::from_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8080);
        assert_eq!(v4.to_string(), "10.0.0.1:8080");

        let v6 = AddrSpec::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST), 443);
        assert_eq!(v6.to_string(), "[::1]:443");

        let domain = AddrSpec::from_domain("example.com", 80).unwrap();
        assert_eq!(domain.to_string(), "example.com:80");
    }

    #[test]
    fn test_domain_length_bounds() {
        assert!(AddrSpec::from_domain("", 80).is_err());
        assert!(AddrSpec::from_domain("a".repeat(255), 80).is_ok());
        assert!(AddrSpec::from_domain("a".repeat(256), 80).is_err());
    }

    #[test]
    fn test_address_type_matches_host() {
        let v4 = AddrSpec::from_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let v6 = AddrSpec::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST), 1);
        let domain = AddrSpec::from_domain("localhost", 1).unwrap();

        assert_eq!(v4.address_type(), atyp::IPV4);
        assert_eq!(v6.address_type(), atyp::IPV6);
        assert_eq!(domain.address_type(), atyp::DOMAIN);
        assert!(domain.ip().is_none());
        assert_eq!(domain.domain(), Some("localhost"));
    }

    #[test]
    fn test_encode_ipv4() {
        let addr = AddrSpec::from_ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0x1f90);
        let mut buf = BytesMut::new();
        addr.encode(&mut buf);
        assert_eq!(&buf[..], &[0x01, 127, 0, 0, 1, 0x1f, 0x90]);
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!("connect".parse::<Command>().unwrap(), Command::Connect);
        assert_eq!("UDP-Associate".parse::<Command>().unwrap(), Command::UdpAssociate);
        assert!("listen".parse::<Command>().is_err());
        assert_eq!(Command::from_code(0x02), Some(Command::Bind));
        assert_eq!(Command::from_code(0x09), None);
    }

    #[test]
    fn test_request_target_socket_addr() {
        let dest = AddrSpec::from_domain("example.com", 443).unwrap();
        let mut request = Request::new(Command::Connect, dest, AuthContext::no_auth());
        assert!(request.target_socket_addr().is_none());

        request.resolved = Some(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
        assert_eq!(
            request.target_socket_addr(),
            Some("93.184.216.34:443".parse().unwrap())
        );
    }
}
