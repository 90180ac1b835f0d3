//! Routing Types

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::protocol::Request;

/// Which address family a destination may be resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrFamily {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl AddrFamily {
    pub fn allows(self, ip: &IpAddr) -> bool {
        match self {
            AddrFamily::Any => true,
            AddrFamily::Ipv4 => ip.is_ipv4(),
            AddrFamily::Ipv6 => ip.is_ipv6(),
        }
    }
}

/// Per-request state handed to the rule set, rewriter and resolver.
///
/// Rule sets may narrow `family` to steer resolution of the destination.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub client: Option<SocketAddr>,
    pub user: Option<String>,
    pub family: AddrFamily,
}

impl RequestContext {
    pub fn new(request: &Request, client: Option<SocketAddr>) -> Self {
        Self {
            request_id: request.id,
            client,
            user: request.auth.username().map(str::to_string),
            family: AddrFamily::Any,
        }
    }
}

/// Access control policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Allow,
    Deny,
}

impl Policy {
    pub fn is_allow(self) -> bool {
        self == Policy::Allow
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "permit" => Ok(Policy::Allow),
            "deny" | "block" => Ok(Policy::Deny),
            other => Err(format!("unknown policy '{}', expected allow or deny", other)),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Policy::Allow => "allow",
            Policy::Deny => "deny",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::protocol::{AddrSpec, Command};

    #[test]
    fn test_policy_parsing() {
        assert_eq!("allow".parse::<Policy>().unwrap(), Policy::Allow);
        assert_eq!("BLOCK".parse::<Policy>().unwrap(), Policy::Deny);
        assert!("maybe".parse::<Policy>().is_err());
    }

    #[test]
    fn test_family_filter() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        assert!(AddrFamily::Any.allows(&v4) && AddrFamily::Any.allows(&v6));
        assert!(AddrFamily::Ipv4.allows(&v4) && !AddrFamily::Ipv4.allows(&v6));
        assert!(!AddrFamily::Ipv6.allows(&v4) && AddrFamily::Ipv6.allows(&v6));
    }

    #[test]
    fn test_context_carries_user() {
        let dest = AddrSpec::from_domain("example.com", 443).unwrap();
        let request = Request::new(Command::Connect, dest, AuthContext::user_pass("bob".to_string()));
        let ctx = RequestContext::new(&request, None);
        assert_eq!(ctx.request_id, request.id);
        assert_eq!(ctx.user.as_deref(), Some("bob"));
        assert_eq!(ctx.family, AddrFamily::Any);
    }
}
