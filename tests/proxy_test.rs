//! End-to-end proxy tests over loopback

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use socks5d::protocol::{codec, method, reply, AddrSpec, Command, Request};
use socks5d::routing::{AddressRewriter, NameResolver, RequestContext};
use socks5d::{Server, Socks5Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct TestProxy {
    addr: SocketAddr,
    server: Arc<Server>,
    cancel: CancellationToken,
    handle: JoinHandle<socks5d::Result<()>>,
}

impl TestProxy {
    async fn start(config: Socks5Config) -> Self {
        let cancel = CancellationToken::new();
        let server = Arc::new(Server::new(config, cancel.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };
        Self {
            addr,
            server,
            cancel,
            handle,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn greet(stream: &mut TcpStream) {
    stream.write_all(&codec::encode_greeting(&[method::NO_AUTH])).await.unwrap();
    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await.unwrap();
    assert_eq!(selection, [0x05, method::NO_AUTH]);
}

async fn read_reply(stream: &mut TcpStream) -> (u8, AddrSpec) {
    let mut head = [0u8; 3];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05);
    assert_eq!(head[2], 0x00);
    let address_type = stream.read_u8().await.unwrap();
    let bound = codec::read_addr_spec(stream, address_type).await.unwrap();
    (head[1], bound)
}

async fn request(proxy: SocketAddr, command: Command, dest: &AddrSpec) -> (TcpStream, u8, AddrSpec) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    greet(&mut stream).await;
    stream.write_all(&codec::encode_request(command, dest)).await.unwrap();
    let (code, bound) = read_reply(&mut stream).await;
    (stream, code, bound)
}

async fn assert_echo(stream: &mut TcpStream, payload: &[u8]) {
    let (mut reader, mut writer) = stream.split();
    let mut echoed = vec![0u8; payload.len()];
    let (written, read) = timeout(
        Duration::from_secs(5),
        async { tokio::join!(writer.write_all(payload), reader.read_exact(&mut echoed)) },
    )
    .await
    .unwrap();
    written.unwrap();
    read.unwrap();
    assert_eq!(echoed, payload);
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_connect_relays_both_directions() {
    let echo = echo_server().await;
    let proxy = TestProxy::start(Socks5Config::default()).await;

    let (mut stream, code, bound) = request(proxy.addr, Command::Connect, &AddrSpec::from(echo)).await;
    assert_eq!(code, reply::SUCCEEDED);
    assert_eq!(bound.ip(), Some(LOCALHOST));
    assert_ne!(bound.port(), 0);

    assert_echo(&mut stream, b"hello through the proxy").await;
    let large: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    assert_echo(&mut stream, &large).await;

    drop(stream);
    proxy.stop().await;
}

struct FixedResolver(IpAddr);

#[async_trait]
impl NameResolver for FixedResolver {
    async fn resolve(&self, _ctx: &RequestContext, domain: &str) -> io::Result<IpAddr> {
        if domain == "echo.test" {
            Ok(self.0)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, domain.to_string()))
        }
    }
}

#[tokio::test]
async fn test_connect_by_domain_uses_resolver() {
    let echo = echo_server().await;
    let proxy = TestProxy::start(Socks5Config {
        resolver: Some(Arc::new(FixedResolver(LOCALHOST))),
        ..Default::default()
    })
    .await;

    let dest = AddrSpec::from_domain("echo.test", echo.port()).unwrap();
    let (mut stream, code, _) = request(proxy.addr, Command::Connect, &dest).await;
    assert_eq!(code, reply::SUCCEEDED);
    assert_echo(&mut stream, b"resolved").await;

    let unknown = AddrSpec::from_domain("nowhere.test", echo.port()).unwrap();
    let (mut stream, code, _) = request(proxy.addr, Command::Connect, &unknown).await;
    assert_eq!(code, reply::HOST_UNREACHABLE);
    assert_closed(&mut stream).await;

    proxy.stop().await;
}

struct RedirectTo(SocketAddr);

#[async_trait]
impl AddressRewriter for RedirectTo {
    async fn rewrite(&self, _ctx: &RequestContext, _request: &Request) -> AddrSpec {
        AddrSpec::from(self.0)
    }
}

#[tokio::test]
async fn test_rewriter_redirects_destination() {
    let echo = echo_server().await;
    let proxy = TestProxy::start(Socks5Config {
        rewriter: Some(Arc::new(RedirectTo(echo))),
        ..Default::default()
    })
    .await;

    let dest = AddrSpec::from_domain("unreachable.invalid", 9).unwrap();
    let (mut stream, code, _) = request(proxy.addr, Command::Connect, &dest).await;
    assert_eq!(code, reply::SUCCEEDED);
    assert_echo(&mut stream, b"redirected").await;

    proxy.stop().await;
}

#[tokio::test]
async fn test_connect_refused() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = TestProxy::start(Socks5Config::default()).await;

    let (mut stream, code, bound) = request(proxy.addr, Command::Connect, &AddrSpec::from(closed)).await;
    assert_eq!(code, reply::CONNECTION_REFUSED);
    assert_eq!(bound, AddrSpec::unspecified());
    assert_closed(&mut stream).await;

    proxy.stop().await;
}

#[tokio::test]
async fn test_bind_flow() {
    let proxy = TestProxy::start(Socks5Config::default()).await;

    let expected_peer = AddrSpec::from_ip(LOCALHOST, 0);
    let (mut control, code, bound) = request(proxy.addr, Command::Bind, &expected_peer).await;
    assert_eq!(code, reply::SUCCEEDED);
    assert_eq!(bound.ip(), Some(LOCALHOST));
    let bound = bound.socket_addr().unwrap();

    let mut inbound = TcpStream::connect(bound).await.unwrap();
    let (code, from) = read_reply(&mut control).await;
    assert_eq!(code, reply::SUCCEEDED);
    assert_eq!(from, AddrSpec::from(inbound.local_addr().unwrap()));

    control.write_all(b"to inbound").await.unwrap();
    let mut buf = [0u8; 10];
    inbound.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"to inbound");

    inbound.write_all(b"to client").await.unwrap();
    let mut buf = [0u8; 9];
    control.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"to client");

    drop(inbound);
    assert_closed(&mut control).await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_bind_accept_timeout() {
    let proxy = TestProxy::start(Socks5Config {
        bind_accept_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let (mut control, code, _) = request(proxy.addr, Command::Bind, &AddrSpec::unspecified()).await;
    assert_eq!(code, reply::SUCCEEDED);
    let (code, _) = read_reply(&mut control).await;
    assert_eq!(code, reply::TTL_EXPIRED);
    assert_closed(&mut control).await;

    proxy.stop().await;
}

#[tokio::test]
async fn test_udp_associate_holds_until_close() {
    let proxy = TestProxy::start(Socks5Config::default()).await;

    let (mut control, code, bound) =
        request(proxy.addr, Command::UdpAssociate, &AddrSpec::unspecified()).await;
    assert_eq!(code, reply::SUCCEEDED);
    assert_eq!(bound.ip(), Some(LOCALHOST));
    assert_ne!(bound.port(), 0);

    control.shutdown().await.unwrap();
    assert_closed(&mut control).await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_concurrent_connections_are_tracked() {
    let echo = echo_server().await;
    let proxy = TestProxy::start(Socks5Config::default()).await;

    let mut clients = Vec::new();
    for i in 0..100u32 {
        let addr = proxy.addr;
        clients.push(tokio::spawn(async move {
            let (mut stream, code, _) = request(addr, Command::Connect, &AddrSpec::from(echo)).await;
            assert_eq!(code, reply::SUCCEEDED);
            assert_echo(&mut stream, format!("client {}", i).as_bytes()).await;
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let tracker = proxy.server.tracker().clone();
    timeout(Duration::from_secs(5), async {
        while tracker.active() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stats = tracker.stats();
    assert_eq!(stats.total, 100);
    assert_eq!(stats.rejected, 0);
    assert!(stats.peak >= 1);
    proxy.stop().await;
}

#[tokio::test]
async fn test_connection_limit() {
    let echo = echo_server().await;
    let proxy = TestProxy::start(Socks5Config {
        max_connections: 1,
        ..Default::default()
    })
    .await;

    let (mut first, code, _) = request(proxy.addr, Command::Connect, &AddrSpec::from(echo)).await;
    assert_eq!(code, reply::SUCCEEDED);

    let mut second = TcpStream::connect(proxy.addr).await.unwrap();
    assert_closed(&mut second).await;
    assert_eq!(proxy.server.tracker().stats().rejected, 1);

    assert_echo(&mut first, b"still served").await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_cancel_stops_accepting() {
    let proxy = TestProxy::start(Socks5Config::default()).await;
    let addr = proxy.addr;
    proxy.stop().await;

    // the listener is gone once serve returns
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_cancel_keeps_inflight_connections() {
    let echo = echo_server().await;
    let proxy = TestProxy::start(Socks5Config::default()).await;
    let addr = proxy.addr;
    let tracker = proxy.server.tracker().clone();

    let (mut stream, code, _) = request(addr, Command::Connect, &AddrSpec::from(echo)).await;
    assert_eq!(code, reply::SUCCEEDED);
    assert_echo(&mut stream, b"before shutdown").await;

    proxy.stop().await;
    assert!(TcpStream::connect(addr).await.is_err());

    // the relay started before cancellation keeps running
    assert_eq!(tracker.active(), 1);
    assert_echo(&mut stream, b"after shutdown").await;

    drop(stream);
    timeout(Duration::from_secs(5), async {
        while tracker.active() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
