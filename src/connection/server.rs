//! SOCKS5 server: listener ownership and the accept loop

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use super::handler::{Connection, ProxyContext};
use crate::auth::{Authenticator, CredentialStore, NoAuthAuthenticator, UserPassAuthenticator};
use crate::relay::{RelayEngine, HALF_CLOSE_TIMEOUT};
use crate::resource::ConnectionTracker;
use crate::routing::{AddressRewriter, DnsResolver, NameResolver, NoRewrite, PermitAll, RuleSet};
use crate::Result;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_BIND_ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(5);

/// Server construction options. Unset hooks fall back to their defaults.
#[derive(Clone)]
pub struct Socks5Config {
    /// Supported methods. Empty means user/pass when `credentials` is set,
    /// no-auth otherwise.
    pub authenticators: Vec<Arc<dyn Authenticator>>,
    pub credentials: Option<Arc<dyn CredentialStore>>,
    pub rules: Option<Arc<dyn RuleSet>>,
    pub rewriter: Option<Arc<dyn AddressRewriter>>,
    pub resolver: Option<Arc<dyn NameResolver>>,
    pub bind_ip: Option<IpAddr>,
    pub handshake_timeout: Duration,
    pub dial_timeout: Duration,
    pub idle_timeout: Duration,
    /// Idle limit for the remaining direction after one side sent EOF
    pub half_close_timeout: Duration,
    pub bind_accept_timeout: Duration,
    /// 0 means unlimited
    pub max_connections: usize,
    pub diagnostics_interval: Duration,
}

impl Default for Socks5Config {
    fn default() -> Self {
        Self {
            authenticators: Vec::new(),
            credentials: None,
            rules: None,
            rewriter: None,
            resolver: None,
            bind_ip: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            half_close_timeout: HALF_CLOSE_TIMEOUT,
            bind_accept_timeout: DEFAULT_BIND_ACCEPT_TIMEOUT,
            max_connections: 0,
            diagnostics_interval: DEFAULT_DIAGNOSTICS_INTERVAL,
        }
    }
}

impl Socks5Config {
    pub(crate) fn into_context(self) -> ProxyContext {
        let authenticators: Vec<Arc<dyn Authenticator>> = if !self.authenticators.is_empty() {
            self.authenticators
        } else if let Some(credentials) = self.credentials {
            vec![Arc::new(UserPassAuthenticator::new(credentials))]
        } else {
            vec![Arc::new(NoAuthAuthenticator)]
        };

        let mut registry = HashMap::new();
        for authenticator in authenticators {
            if registry.insert(authenticator.code(), authenticator).is_some() {
                warn!("Duplicate authenticator registered, keeping the last one");
            }
        }

        ProxyContext {
            authenticators: registry,
            rules: self.rules.unwrap_or_else(|| Arc::new(PermitAll)),
            rewriter: self.rewriter.unwrap_or_else(|| Arc::new(NoRewrite)),
            resolver: self.resolver.unwrap_or_else(|| Arc::new(DnsResolver)),
            bind_ip: self.bind_ip,
            handshake_timeout: self.handshake_timeout,
            dial_timeout: self.dial_timeout,
            bind_accept_timeout: self.bind_accept_timeout,
            relay: RelayEngine::new(self.idle_timeout).with_half_close_timeout(self.half_close_timeout),
        }
    }
}

/// Accepts SOCKS5 clients and runs each on its own task
pub struct Server {
    ctx: Arc<ProxyContext>,
    tracker: ConnectionTracker,
    diagnostics_interval: Duration,
    cancel: CancellationToken,
}

impl Server {
    pub fn new(config: Socks5Config, cancel: CancellationToken) -> Self {
        let tracker = ConnectionTracker::new(config.max_connections);
        let diagnostics_interval = config.diagnostics_interval;
        let ctx = Arc::new(config.into_context());
        let mut methods: Vec<&'static str> = ctx.authenticators.values().map(|a| a.name()).collect();
        methods.sort_unstable();
        debug!(?methods, "Server configured");

        Self {
            ctx,
            tracker,
            diagnostics_interval,
            cancel,
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bind `addr` and serve until cancelled
    pub async fn listen_and_serve(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind SOCKS5 listener on {}", addr))?;
        self.serve(listener).await
    }

    /// Accept connections from `listener` until the cancellation token fires.
    ///
    /// Returns `Ok(())` on cancellation and the accept error otherwise.
    /// Connections already running are left to finish on their own.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().context("listener has no local address")?;
        info!(addr = %local, "SOCKS5 listener ready");

        let diagnostics = self
            .tracker
            .spawn_diagnostics(self.diagnostics_interval, self.cancel.child_token());

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(addr = %local, "Listener closed");
                    break Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Accept failed, stopping listener");
                            break Err(anyhow::Error::new(e).context("failed to accept connection"));
                        }
                    };

                    let Some(slot) = self.tracker.try_acquire() else {
                        debug!(%peer, "Dropping connection over the limit");
                        continue;
                    };

                    let local = stream.local_addr().ok();
                    let connection = Connection::new(stream, Some(peer), local, Arc::clone(&self.ctx));
                    trace!(conn_id = %connection.id(), %peer, "Accepted connection");
                    tokio::spawn(
                        async move {
                            // errors are logged by the connection itself
                            let _ = connection.serve().await;
                            drop(slot);
                        }
                        .in_current_span(),
                    );
                }
            }
        };

        diagnostics.abort();
        result
    }
}
