//! SOCKS5 wire codec
//!
//! Byte-level readers and writers for the handshake, the username/password
//! sub-negotiation, requests and replies. Everything is generic over tokio's
//! `AsyncRead`/`AsyncWrite` so the connection state machine can run on a
//! `TcpStream` or on an in-memory mock.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::*;
use super::error::Socks5Error;
use super::types::{AddrSpec, Command, Reply};

type Result<T> = std::result::Result<T, Socks5Error>;

/// Read the method list that follows the version byte: `NMETHODS METHODS...`
pub async fn read_methods<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let count = reader.read_u8().await?;
    let mut methods = vec![0u8; count as usize];
    reader.read_exact(&mut methods).await?;
    Ok(methods)
}

/// Write the method selection message `[VER, METHOD]`
pub async fn write_method_selection<W>(writer: &mut W, method: u8) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&[SOCKS5_VERSION, method]).await?;
    writer.flush().await?;
    Ok(())
}

/// Read an address of the given type followed by a big-endian port
pub async fn read_addr_spec<R>(reader: &mut R, address_type: u8) -> Result<AddrSpec>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let host = match address_type {
        atyp::IPV4 => {
            let mut octets = [0u8; 4];
            reader.read_exact(&mut octets).await?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        atyp::IPV6 => {
            let mut octets = [0u8; 16];
            reader.read_exact(&mut octets).await?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        atyp::DOMAIN => None,
        other => return Err(Socks5Error::AddrTypeNotSupported(other)),
    };

    match host {
        Some(ip) => {
            let port = reader.read_u16().await?;
            Ok(AddrSpec::from_ip(ip, port))
        }
        None => {
            let len = reader.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            reader.read_exact(&mut name).await?;
            let port = reader.read_u16().await?;
            let name = String::from_utf8(name).map_err(|e| {
                Socks5Error::InvalidDomain(String::from_utf8_lossy(e.as_bytes()).into_owned())
            })?;
            AddrSpec::from_domain(name, port)
        }
    }
}

/// Read a request that follows authentication: `VER CMD RSV ATYP ADDR PORT`.
///
/// The address is parsed before the command is checked, so an unknown address
/// type is reported even when the command is unknown as well.
pub async fn read_request<R>(reader: &mut R) -> Result<(Command, AddrSpec)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let [version, command, reserved, address_type] = header;

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    if reserved != SOCKS5_RESERVED {
        return Err(Socks5Error::InvalidReserved(reserved));
    }

    let dest = read_addr_spec(reader, address_type).await?;
    let command = Command::from_code(command).ok_or(Socks5Error::CommandNotSupported(command))?;
    Ok((command, dest))
}

/// Encode a reply. A missing bound address is sent as `0.0.0.0:0`.
pub fn encode_reply(reply: Reply, bound: Option<&AddrSpec>) -> BytesMut {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(reply.code());
    buf.put_u8(SOCKS5_RESERVED);
    match bound {
        Some(addr) => addr.encode(&mut buf),
        None => AddrSpec::unspecified().encode(&mut buf),
    }
    buf
}

/// Write a reply: `VER REP RSV ATYP BND.ADDR BND.PORT`
pub async fn write_reply<W>(writer: &mut W, reply: Reply, bound: Option<&AddrSpec>) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_reply(reply, bound)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the username/password request (RFC 1929):
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub async fn read_credentials<R>(reader: &mut R) -> Result<(String, String)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let version = reader.read_u8().await?;
    if version != userpass::VERSION {
        return Err(Socks5Error::UnsupportedAuthVersion(version));
    }

    let username_len = reader.read_u8().await? as usize;
    let mut username = vec![0u8; username_len];
    reader.read_exact(&mut username).await?;

    let password_len = reader.read_u8().await? as usize;
    let mut password = vec![0u8; password_len];
    reader.read_exact(&mut password).await?;

    Ok((
        String::from_utf8_lossy(&username).into_owned(),
        String::from_utf8_lossy(&password).into_owned(),
    ))
}

/// Write the sub-negotiation status `[0x01, STATUS]`
pub async fn write_auth_status<W>(writer: &mut W, success: bool) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let status = if success {
        userpass::SUCCESS
    } else {
        userpass::FAILURE
    };
    writer.write_all(&[userpass::VERSION, status]).await?;
    writer.flush().await?;
    Ok(())
}

/// Client side: encode a greeting offering `methods`
pub fn encode_greeting(methods: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(2 + methods.len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(methods.len() as u8);
    buf.put_slice(methods);
    buf
}

/// Client side: encode a username/password sub-negotiation request
pub fn encode_credentials(username: &str, password: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(3 + username.len() + password.len());
    buf.put_u8(userpass::VERSION);
    buf.put_u8(username.len() as u8);
    buf.put_slice(username.as_bytes());
    buf.put_u8(password.len() as u8);
    buf.put_slice(password.as_bytes());
    buf
}

/// Client side: encode a request for `command` to `dest`
pub fn encode_request(command: Command, dest: &AddrSpec) -> BytesMut {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(command.code());
    buf.put_u8(SOCKS5_RESERVED);
    dest.encode(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn round_trip(addr: &AddrSpec) -> AddrSpec {
        let mut buf = BytesMut::new();
        addr.encode(&mut buf);
        let mut reader = &buf[1..];
        read_addr_spec(&mut reader, buf[0]).await.unwrap()
    }

    #[tokio::test]
    async fn test_addr_spec_round_trip() {
        let cases = [
            AddrSpec::from_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), 1080),
            AddrSpec::from_ip(IpAddr::V6("2001:db8::42".parse().unwrap()), 65535),
            AddrSpec::from_domain("proxy.internal.example", 443).unwrap(),
        ];
        for addr in &cases {
            let decoded = round_trip(addr).await;
            assert_eq!(&decoded, addr);
            assert_eq!(decoded.address_type(), addr.address_type());
        }
    }

    #[tokio::test]
    async fn test_read_request_connect_domain() {
        let mut reader: &[u8] = &[
            0x05, 0x01, 0x00, 0x03, 11, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'o', b'r',
            b'g', 0x00, 0x50,
        ];
        let (command, dest) = read_request(&mut reader).await.unwrap();
        assert_eq!(command, Command::Connect);
        assert_eq!(dest.domain(), Some("example.org"));
        assert_eq!(dest.port(), 80);
    }

    #[tokio::test]
    async fn test_read_request_unknown_address_type() {
        let mut reader: &[u8] = &[0x05, 0x01, 0x00, 0x09, 1, 2, 3, 4, 0, 80];
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, Socks5Error::AddrTypeNotSupported(0x09)));
        assert_eq!(err.reply(), Some(Reply::AddrTypeNotSupported));
    }

    #[tokio::test]
    async fn test_read_request_unknown_command() {
        let mut reader: &[u8] = &[0x05, 0x7f, 0x00, 0x01, 1, 2, 3, 4, 0, 80];
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, Socks5Error::CommandNotSupported(0x7f)));
    }

    #[tokio::test]
    async fn test_read_request_truncated() {
        let mut reader: &[u8] = &[0x05, 0x01, 0x00, 0x01, 127, 0];
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, Socks5Error::Io(_)));
    }

    #[tokio::test]
    async fn test_read_credentials() {
        let buf = encode_credentials("alice", "s3cret");
        let mut reader = &buf[..];
        let (user, pass) = read_credentials(&mut reader).await.unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "s3cret");
    }

    #[tokio::test]
    async fn test_read_credentials_bad_version() {
        let mut reader: &[u8] = &[0x05, 0x01, b'a', 0x01, b'b'];
        let err = read_credentials(&mut reader).await.unwrap_err();
        assert!(matches!(err, Socks5Error::UnsupportedAuthVersion(0x05)));
    }

    #[tokio::test]
    async fn test_write_reply_without_address() {
        let mut mock = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .build();
        write_reply(&mut mock, Reply::NotAllowed, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_reply_with_ipv6_address() {
        let bound = AddrSpec::from_ip(IpAddr::V6(Ipv6Addr::LOCALHOST), 0x0438);
        let mut expected = vec![0x05, 0x00, 0x00, 0x04];
        expected.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        expected.extend_from_slice(&[0x04, 0x38]);

        let mut mock = Builder::new().write(&expected).build();
        write_reply(&mut mock, Reply::Succeeded, Some(&bound))
            .await
            .unwrap();
    }
}
