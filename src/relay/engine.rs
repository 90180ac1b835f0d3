//! Relay Engine
//!
//! Outbound dialing, mapping of dial failures onto reply codes, and the
//! bidirectional copy between client and destination.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace};

use super::session::{Direction, RelaySession};
use crate::protocol::Reply;

/// Copy buffer size per direction
pub const BUFFER_SIZE: usize = 16 * 1024;

/// Default idle limit once one direction has closed
pub const HALF_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Explicit bind IP, otherwise the unspecified address of `client`'s family
fn local_ip_for(bind_ip: Option<IpAddr>, client: Option<&SocketAddr>) -> IpAddr {
    match (bind_ip, client) {
        (Some(ip), _) => ip,
        (None, Some(SocketAddr::V6(_))) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        (None, _) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    }
}

/// Dial `target`, optionally from `bind_ip`, giving up after `dial_timeout`
pub async fn dial(
    target: SocketAddr,
    bind_ip: Option<IpAddr>,
    dial_timeout: Duration,
) -> io::Result<TcpStream> {
    let socket = match target {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Some(ip) = bind_ip {
        socket.bind(SocketAddr::new(ip, 0))?;
    }

    match timeout(dial_timeout, socket.connect(target)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {} timed out after {:?}", target, dial_timeout),
        )),
    }
}

/// Listening socket for a BIND request, in the family of the client's connection
pub async fn listen(bind_ip: Option<IpAddr>, client: Option<&SocketAddr>) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::new(local_ip_for(bind_ip, client), 0)).await
}

/// UDP socket announced to a UDP ASSOCIATE client
pub async fn bind_udp(bind_ip: Option<IpAddr>, client: Option<&SocketAddr>) -> io::Result<UdpSocket> {
    UdpSocket::bind(SocketAddr::new(local_ip_for(bind_ip, client), 0)).await
}

/// Reply code describing why a dial failed
pub fn reply_for_error(error: &io::Error) -> Reply {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => return Reply::ConnectionRefused,
        io::ErrorKind::TimedOut => return Reply::TtlExpired,
        _ => {}
    }

    let message = error.to_string().to_lowercase();
    if message.contains("network is unreachable") || message.contains("network unreachable") {
        Reply::NetworkUnreachable
    } else {
        Reply::HostUnreachable
    }
}

/// Bidirectional relay with a shared idle deadline
#[derive(Debug, Clone, Copy)]
pub struct RelayEngine {
    idle_timeout: Duration,
    half_close_timeout: Duration,
}

impl RelayEngine {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            half_close_timeout: HALF_CLOSE_TIMEOUT.min(idle_timeout),
        }
    }

    pub fn with_half_close_timeout(mut self, half_close_timeout: Duration) -> Self {
        self.half_close_timeout = half_close_timeout.min(self.idle_timeout);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn half_close_timeout(&self) -> Duration {
        self.half_close_timeout
    }

    /// Copy both directions until each side has closed its write half.
    ///
    /// EOF in one direction is forwarded as a half-close. From then on the
    /// remaining direction is given up once it has been idle for the
    /// half-close timeout. The relay fails when neither direction moves data
    /// for the idle timeout, or on the first I/O error.
    pub async fn relay<C, T>(&self, session: &RelaySession, client: C, target: T) -> io::Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let (client_read, client_write) = tokio::io::split(client);
        let (target_read, target_write) = tokio::io::split(target);

        let upstream = self.pipe(session, Direction::Up, client_read, target_write);
        let downstream = self.pipe(session, Direction::Down, target_read, client_write);
        tokio::pin!(upstream, downstream);

        tokio::select! {
            result = &mut upstream => {
                result?;
                self.finish(session, Direction::Down, downstream).await
            }
            result = &mut downstream => {
                result?;
                self.finish(session, Direction::Up, upstream).await
            }
        }
    }

    /// Drive the direction still open after the other one hit EOF
    async fn finish<F>(&self, session: &RelaySession, direction: Direction, mut rest: Pin<&mut F>) -> io::Result<()>
    where
        F: Future<Output = io::Result<()>>,
    {
        loop {
            let remaining = self.half_close_timeout.saturating_sub(session.idle_for());
            if remaining.is_zero() {
                debug!(
                    ?direction,
                    idle = ?self.half_close_timeout,
                    "Closing half-closed relay after inactivity"
                );
                return Ok(());
            }

            tokio::select! {
                result = rest.as_mut() => return result,
                _ = sleep(remaining) => {}
            }
        }
    }

    async fn pipe<R, W>(
        &self,
        session: &RelaySession,
        direction: Direction,
        mut reader: R,
        mut writer: W,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; BUFFER_SIZE];
        loop {
            let remaining = self.idle_timeout.saturating_sub(session.idle_for());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("relay idle for {:?}", self.idle_timeout),
                ));
            }

            let n = match timeout(remaining, reader.read(&mut buf)).await {
                Ok(read) => read?,
                // the other direction may have been active meanwhile
                Err(_) => continue,
            };

            if n == 0 {
                trace!(?direction, "Relay direction reached EOF");
                if let Err(e) = writer.shutdown().await {
                    debug!(?direction, error = %e, "Half-close failed");
                }
                return Ok(());
            }

            writer.write_all(&buf[..n]).await?;
            session.record(direction, n);
        }
    }
}
