//! Access Control List rule set
//!
//! Rules are written as `allow|deny <pattern>[:port[,port...]]`. A pattern is
//! `*`, an IP address, a CIDR network, a domain name or `*.domain`. IPv6
//! addresses combined with ports are bracketed: `deny [2001:db8::1]:22`.
//! The first matching rule decides; otherwise the default policy applies.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use ipnet::IpNet;
use tracing::debug;

use super::rules::RuleSet;
use super::types::{Policy, RequestContext};
use crate::protocol::{AddrSpec, Host, Request};

/// What a rule matches against the destination host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Network(IpNet),
    Domain(String),
    /// `*.example.com`: the domain itself and every subdomain
    Subdomain(String),
}

impl Pattern {
    pub fn matches(&self, host: &Host) -> bool {
        match (self, host) {
            (Pattern::Any, _) => true,
            (Pattern::Network(net), Host::Ip(ip)) => net.contains(ip),
            (Pattern::Domain(domain), Host::Domain(name)) => domain.eq_ignore_ascii_case(name),
            (Pattern::Subdomain(suffix), Host::Domain(name)) => {
                let name = name.to_ascii_lowercase();
                name == *suffix
                    || (name.len() > suffix.len()
                        && name.ends_with(suffix.as_str())
                        && name.as_bytes()[name.len() - suffix.len() - 1] == b'.')
            }
            _ => false,
        }
    }
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty pattern".to_string());
        }
        if s == "*" {
            return Ok(Pattern::Any);
        }
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Pattern::Network(net));
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Pattern::Network(IpNet::from(ip)));
        }
        if let Some(suffix) = s.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(format!("invalid wildcard pattern '{}'", s));
            }
            return Ok(Pattern::Subdomain(suffix.to_ascii_lowercase()));
        }
        if s.contains(['*', '/', ' ']) {
            return Err(format!("invalid pattern '{}'", s));
        }
        Ok(Pattern::Domain(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("*"),
            Pattern::Network(net) => write!(f, "{}", net),
            Pattern::Domain(domain) => f.write_str(domain),
            Pattern::Subdomain(suffix) => write!(f, "*.{}", suffix),
        }
    }
}

/// One ACL entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRule {
    pub action: Policy,
    pub pattern: Pattern,
    /// Empty means every port
    pub ports: Vec<u16>,
}

impl AclRule {
    pub fn matches(&self, dest: &AddrSpec) -> bool {
        self.matches_port(dest) && self.pattern.matches(dest.host())
    }

    /// Like [`AclRule::matches`], also trying the address `dest` resolved to
    pub fn matches_resolved(&self, dest: &AddrSpec, resolved: IpAddr) -> bool {
        self.matches_port(dest)
            && (self.pattern.matches(dest.host()) || self.pattern.matches(&Host::Ip(resolved)))
    }

    fn matches_port(&self, dest: &AddrSpec) -> bool {
        self.ports.is_empty() || self.ports.contains(&dest.port())
    }
}

fn parse_ports(s: &str) -> Result<Vec<u16>, String> {
    s.split(',')
        .map(|port| match port.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(format!("invalid port '{}'", port.trim())),
            Ok(port) => Ok(port),
        })
        .collect()
}

/// Split `pattern[:ports]`, honouring bracketed IPv6 literals
fn split_ports(target: &str) -> Result<(&str, Option<&str>), String> {
    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated '[' in '{}'", target))?;
        return match tail {
            "" => Ok((host, None)),
            tail => match tail.strip_prefix(':') {
                Some(ports) => Ok((host, Some(ports))),
                None => Err(format!("unexpected '{}' after ']'", tail)),
            },
        };
    }
    // bare IPv6 addresses and networks carry no ports
    if target.parse::<IpAddr>().is_ok() || target.parse::<IpNet>().is_ok() {
        return Ok((target, None));
    }
    Ok(match target.rsplit_once(':') {
        Some((host, ports)) => (host, Some(ports)),
        None => (target, None),
    })
}

impl FromStr for AclRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let action = parts
            .next()
            .ok_or_else(|| "empty rule".to_string())?
            .parse::<Policy>()?;
        let target = parts
            .next()
            .ok_or_else(|| format!("rule '{}' has no pattern", s.trim()))?;
        if let Some(extra) = parts.next() {
            return Err(format!("unexpected '{}' in rule '{}'", extra, s.trim()));
        }

        let (pattern, ports) = split_ports(target)?;
        Ok(Self {
            action,
            pattern: pattern.parse()?,
            ports: ports.map(parse_ports).transpose()?.unwrap_or_default(),
        })
    }
}

impl fmt::Display for AclRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.pattern)?;
        if !self.ports.is_empty() {
            let ports: Vec<String> = self.ports.iter().map(u16::to_string).collect();
            write!(f, ":{}", ports.join(","))?;
        }
        Ok(())
    }
}

/// Ordered ACL evaluated against the rewritten destination of a request
#[derive(Debug, Clone)]
pub struct AclRuleSet {
    default_policy: Policy,
    rules: Vec<AclRule>,
}

impl AclRuleSet {
    pub fn new(default_policy: Policy) -> Self {
        Self {
            default_policy,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: AclRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Parse a `;` or newline separated list of rules
    pub fn parse_rules(default_policy: Policy, rules: &str) -> Result<Self, String> {
        let rules = rules
            .split([';', '\n'])
            .map(str::trim)
            .filter(|rule| !rule.is_empty())
            .map(|rule| rule.parse::<AclRule>().map_err(|e| format!("{}: {}", rule, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            default_policy,
            rules,
        })
    }

    pub fn default_policy(&self) -> Policy {
        self.default_policy
    }

    pub fn rules(&self) -> &[AclRule] {
        &self.rules
    }

    /// Verdict for `dest`: the first matching rule, or the default policy
    pub fn evaluate(&self, dest: &AddrSpec) -> Policy {
        self.rules
            .iter()
            .find(|rule| rule.matches(dest))
            .map_or(self.default_policy, |rule| rule.action)
    }

    /// Verdict for a domain `dest` after it resolved to `resolved`.
    ///
    /// A rule matches on either the name or the address, so network rules
    /// also cover names that point into the network.
    pub fn evaluate_resolved(&self, dest: &AddrSpec, resolved: IpAddr) -> Policy {
        self.rules
            .iter()
            .find(|rule| rule.matches_resolved(dest, resolved))
            .map_or(self.default_policy, |rule| rule.action)
    }
}

#[async_trait]
impl RuleSet for AclRuleSet {
    async fn permit(&self, ctx: &mut RequestContext, request: &Request) -> bool {
        let verdict = self.evaluate(&request.target);
        debug!(request_id = %ctx.request_id, target = %request.target, %verdict, "ACL verdict");
        verdict.is_allow()
    }

    async fn permit_resolved(&self, ctx: &RequestContext, request: &Request, resolved: IpAddr) -> bool {
        let verdict = self.evaluate_resolved(&request.target, resolved);
        debug!(
            request_id = %ctx.request_id,
            target = %request.target,
            %resolved,
            %verdict,
            "ACL verdict for resolved address"
        );
        verdict.is_allow()
    }
}
