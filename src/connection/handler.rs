//! Per-connection SOCKS5 state machine
//!
//! One [`Connection`] drives an accepted stream through version check, method
//! negotiation, authentication, request parsing, authorization and dispatch
//! of the requested command, then closes the stream.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::auth::{AsyncStream, AuthContext, Authenticator};
use crate::protocol::{codec, method, AddrSpec, Command, Host, Reply, Request, Socks5Error, SOCKS5_VERSION};
use crate::relay::{self, RelayEngine, RelaySession};
use crate::routing::{AddressRewriter, NameResolver, RequestContext, RuleSet};
use crate::Result;

/// Everything a connection needs from the server, shared read-only
pub struct ProxyContext {
    pub authenticators: HashMap<u8, Arc<dyn Authenticator>>,
    pub rules: Arc<dyn RuleSet>,
    pub rewriter: Arc<dyn AddressRewriter>,
    pub resolver: Arc<dyn NameResolver>,
    /// Local IP for outbound dials and BIND/UDP sockets
    pub bind_ip: Option<IpAddr>,
    pub handshake_timeout: Duration,
    pub dial_timeout: Duration,
    pub bind_accept_timeout: Duration,
    pub relay: RelayEngine,
}

impl ProxyContext {
    /// First offered method the server supports, in the client's order
    pub fn select_method(&self, offered: &[u8]) -> Option<Arc<dyn Authenticator>> {
        offered
            .iter()
            .find_map(|code| self.authenticators.get(code))
            .cloned()
    }
}

/// Bound a handshake step by `limit`
async fn bounded<T, F>(limit: Duration, what: &'static str, fut: F) -> std::result::Result<T, Socks5Error>
where
    F: Future<Output = std::result::Result<T, Socks5Error>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Socks5Error::Timeout(what, limit))?
}

/// A single accepted client connection
pub struct Connection<S> {
    id: Uuid,
    stream: S,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
    ctx: Arc<ProxyContext>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: Option<SocketAddr>,
        local: Option<SocketAddr>,
        ctx: Arc<ProxyContext>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream,
            peer,
            local,
            ctx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the connection to completion. The stream is closed on every path.
    pub async fn serve(mut self) -> Result<()> {
        let peer = self
            .peer
            .map_or_else(|| "-".to_string(), |peer| peer.to_string());
        let span = info_span!("conn", conn_id = %self.id, %peer);

        async move {
            debug!("Connection started");
            let result = self.handle().await;
            self.close().await;
            match &result {
                Ok(()) => debug!("Connection closed"),
                Err(e) => debug!(error = %e, "Connection closed with error"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Error while closing client stream");
        }
    }

    async fn handle(&mut self) -> Result<()> {
        let limit = self.ctx.handshake_timeout;
        let version = timeout(limit, self.stream.read_u8())
            .await
            .map_err(|_| Socks5Error::Timeout("version", limit))?
            .map_err(Socks5Error::from)?;
        if version != SOCKS5_VERSION {
            return Err(Socks5Error::UnsupportedVersion(version).into());
        }

        let auth = self.negotiate().await?;
        let read = bounded(limit, "request", codec::read_request(&mut self.stream)).await;
        let request = match read {
            Ok((command, dest)) => Request::new(command, dest, auth),
            Err(e) => {
                if let Some(reply) = e.reply() {
                    self.reply(reply, None).await?;
                }
                return Err(e.into());
            }
        };

        let span = info_span!(
            "request",
            req_id = %request.id,
            user = request.auth.username().unwrap_or("-")
        );
        self.process(request).instrument(span).await
    }

    async fn negotiate(&mut self) -> Result<AuthContext> {
        let limit = self.ctx.handshake_timeout;
        let offered = bounded(limit, "methods", codec::read_methods(&mut self.stream)).await?;
        let Some(authenticator) = self.ctx.select_method(&offered) else {
            bounded(
                limit,
                "method selection",
                codec::write_method_selection(&mut self.stream, method::NO_ACCEPTABLE),
            )
            .await?;
            warn!(offered = ?offered, "No acceptable authentication method");
            return Err(Socks5Error::NoAcceptableMethod(offered).into());
        };

        debug!(method = authenticator.name(), "Selected authentication method");
        bounded(
            limit,
            "method selection",
            codec::write_method_selection(&mut self.stream, authenticator.code()),
        )
        .await?;

        let stream: &mut dyn AsyncStream = &mut self.stream;
        let auth = timeout(limit, authenticator.authenticate(stream))
            .await
            .map_err(|_| Socks5Error::Timeout("authentication", limit))??;
        Ok(auth)
    }

    async fn reply(&mut self, reply: Reply, bound: Option<&AddrSpec>) -> Result<()> {
        let limit = self.ctx.handshake_timeout;
        bounded(limit, "reply", codec::write_reply(&mut self.stream, reply, bound))
            .await
            .with_context(|| format!("failed to send {:?} reply", reply))
    }

    async fn process(&mut self, mut request: Request) -> Result<()> {
        request.remote = self.peer.map(AddrSpec::from);
        let mut rctx = RequestContext::new(&request, self.peer);

        request.target = self.ctx.rewriter.rewrite(&rctx, &request).await;
        info!(
            command = %request.command,
            dest = %request.dest,
            target = %request.target,
            "Request received"
        );

        if !self.ctx.rules.permit(&mut rctx, &request).await {
            warn!(command = %request.command, target = %request.target, "Request denied by rule set");
            self.reply(Reply::NotAllowed, None).await?;
            bail!("{} to {} not allowed", request.command, request.target);
        }

        match request.command {
            Command::Connect => self.handle_connect(&rctx, request).await,
            Command::Bind => self.handle_bind(request).await,
            Command::UdpAssociate => self.handle_associate(request).await,
        }
    }

    /// Replace an unspecified bound IP with the address the client reached us on
    fn public_addr(&self, bound: SocketAddr) -> AddrSpec {
        match self.local {
            Some(local) if bound.ip().is_unspecified() => {
                AddrSpec::from(SocketAddr::new(local.ip(), bound.port()))
            }
            _ => AddrSpec::from(bound),
        }
    }

    async fn handle_connect(&mut self, rctx: &RequestContext, mut request: Request) -> Result<()> {
        if let Host::Domain(domain) = request.target.host() {
            match self.ctx.resolver.resolve(rctx, domain).await {
                Ok(ip) => {
                    if !self.ctx.rules.permit_resolved(rctx, &request, ip).await {
                        warn!(%domain, resolved = %ip, "Resolved destination denied by rule set");
                        self.reply(Reply::NotAllowed, None).await?;
                        bail!("{} resolves to {}, which is not allowed", domain, ip);
                    }
                    request.resolved = Some(ip);
                }
                Err(e) => {
                    warn!(%domain, error = %e, "Failed to resolve destination");
                    self.reply(Reply::HostUnreachable, None).await?;
                    return Err(anyhow!(e).context(format!("failed to resolve {}", domain)));
                }
            }
        }

        let Some(target) = request.target_socket_addr() else {
            self.reply(Reply::GeneralFailure, None).await?;
            bail!("no address to dial for {}", request.target);
        };

        let outbound = match relay::dial(target, self.ctx.bind_ip, self.ctx.dial_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                let reply = relay::reply_for_error(&e);
                warn!(%target, error = %e, ?reply, "Failed to connect to destination");
                self.reply(reply, None).await?;
                return Err(anyhow!(e).context(format!("connect to {} failed", target)));
            }
        };

        let local = outbound.local_addr().context("outbound socket has no local address")?;
        self.reply(Reply::Succeeded, Some(&AddrSpec::from(local))).await?;
        debug!(%target, %local, "Connected to destination");

        let session = RelaySession::new(request.id, self.peer, Some(target));
        let result = self.ctx.relay.relay(&session, &mut self.stream, outbound).await;
        session.log_stats(request.auth.username());
        result.context("relay failed")
    }

    async fn handle_bind(&mut self, request: Request) -> Result<()> {
        let listener = match relay::listen(self.ctx.bind_ip, self.local.as_ref()).await {
            Ok(listener) => listener,
            Err(e) => {
                self.reply(Reply::GeneralFailure, None).await?;
                return Err(anyhow!(e).context("failed to open BIND listener"));
            }
        };
        let bound = self.public_addr(listener.local_addr()?);
        self.reply(Reply::Succeeded, Some(&bound)).await?;
        debug!(%bound, "Waiting for inbound BIND connection");

        let (inbound, from) = match timeout(self.ctx.bind_accept_timeout, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                self.reply(Reply::GeneralFailure, None).await?;
                return Err(anyhow!(e).context("BIND accept failed"));
            }
            Err(_) => {
                self.reply(Reply::TtlExpired, None).await?;
                bail!(
                    "no inbound BIND connection within {:?}",
                    self.ctx.bind_accept_timeout
                );
            }
        };
        drop(listener);

        // an IP destination names the only host allowed to connect
        if let Some(expected) = request.target.ip().filter(|ip| !ip.is_unspecified()) {
            if expected != from.ip() {
                warn!(%expected, %from, "Inbound BIND connection from unexpected host");
                self.reply(Reply::NotAllowed, None).await?;
                bail!("BIND peer {} does not match {}", from, expected);
            }
        }

        self.reply(Reply::Succeeded, Some(&AddrSpec::from(from))).await?;
        info!(%from, "Inbound BIND connection accepted");

        let session = RelaySession::new(request.id, self.peer, Some(from));
        let result = self.ctx.relay.relay(&session, &mut self.stream, inbound).await;
        session.log_stats(request.auth.username());
        result.context("relay failed")
    }

    async fn handle_associate(&mut self, _request: Request) -> Result<()> {
        let socket = match relay::bind_udp(self.ctx.bind_ip, self.peer.as_ref()).await {
            Ok(socket) => socket,
            Err(e) => {
                self.reply(Reply::GeneralFailure, None).await?;
                return Err(anyhow!(e).context("failed to open UDP socket"));
            }
        };
        let bound = self.public_addr(socket.local_addr()?);
        self.reply(Reply::Succeeded, Some(&bound)).await?;
        info!(%bound, "UDP association established");

        // the association lives as long as the control connection
        let idle = self.ctx.relay.idle_timeout();
        let mut buf = [0u8; 512];
        loop {
            match timeout(idle, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => trace!(bytes = n, "Ignoring data on UDP control connection"),
                Ok(Err(e)) => return Err(e).context("UDP control connection failed"),
                Err(_) => bail!("UDP association idle for {:?}", idle),
            }
        }
        debug!(%bound, "UDP association ended");
        drop(socket);
        Ok(())
    }
}
