//! Destination name resolution

use std::io;
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tracing::debug;

use super::types::RequestContext;

/// Resolves a destination domain name to a single IP
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, ctx: &RequestContext, domain: &str) -> io::Result<IpAddr>;
}

/// System resolver. Picks the first address of the family the context allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, ctx: &RequestContext, domain: &str) -> io::Result<IpAddr> {
        let ip = lookup_host((domain, 0))
            .await?
            .map(|addr| addr.ip())
            .find(|ip| ctx.family.allows(ip))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no {:?} address found for {}", ctx.family, domain),
                )
            })?;
        debug!(%domain, %ip, "Resolved destination");
        Ok(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::protocol::{AddrSpec, Command, Request};
    use crate::routing::AddrFamily;

    fn ctx(family: AddrFamily) -> RequestContext {
        let dest = AddrSpec::from_domain("localhost", 80).unwrap();
        let request = Request::new(Command::Connect, dest, AuthContext::no_auth());
        let mut ctx = RequestContext::new(&request, None);
        ctx.family = family;
        ctx
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let ip = DnsResolver.resolve(&ctx(AddrFamily::Any), "127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));
    }

    #[tokio::test]
    async fn test_family_mismatch_is_not_found() {
        let err = DnsResolver
            .resolve(&ctx(AddrFamily::Ipv6), "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
