//! Authorization rule sets consulted after a request is parsed

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::RequestContext;
use crate::protocol::{Command, Request};

/// Decides whether a request may proceed.
///
/// Implementations may adjust the context, for instance to restrict the
/// address family the destination is resolved to.
#[async_trait]
pub trait RuleSet: Send + Sync {
    async fn permit(&self, ctx: &mut RequestContext, request: &Request) -> bool;

    /// Checked again once a domain target has been resolved to `resolved`
    async fn permit_resolved(&self, _ctx: &RequestContext, _request: &Request, _resolved: IpAddr) -> bool {
        true
    }
}

/// Permits every request
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

#[async_trait]
impl RuleSet for PermitAll {
    async fn permit(&self, _ctx: &mut RequestContext, _request: &Request) -> bool {
        true
    }
}

/// Permits requests by command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitCommand {
    pub connect: bool,
    pub bind: bool,
    pub associate: bool,
}

impl PermitCommand {
    pub fn all() -> Self {
        Self {
            connect: true,
            bind: true,
            associate: true,
        }
    }

    pub fn none() -> Self {
        Self {
            connect: false,
            bind: false,
            associate: false,
        }
    }

    /// Permit exactly the listed commands
    pub fn only(commands: &[Command]) -> Self {
        Self {
            connect: commands.contains(&Command::Connect),
            bind: commands.contains(&Command::Bind),
            associate: commands.contains(&Command::UdpAssociate),
        }
    }

    pub fn allows(&self, command: Command) -> bool {
        match command {
            Command::Connect => self.connect,
            Command::Bind => self.bind,
            Command::UdpAssociate => self.associate,
        }
    }
}

impl Default for PermitCommand {
    fn default() -> Self {
        Self::all()
    }
}

#[async_trait]
impl RuleSet for PermitCommand {
    async fn permit(&self, _ctx: &mut RequestContext, request: &Request) -> bool {
        self.allows(request.command)
    }
}

/// Permits a request only if every rule set in order permits it
#[derive(Clone, Default)]
pub struct RuleChain {
    rules: Vec<Arc<dyn RuleSet>>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rules: Arc<dyn RuleSet>) -> Self {
        self.rules.push(rules);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl RuleSet for RuleChain {
    async fn permit(&self, ctx: &mut RequestContext, request: &Request) -> bool {
        for rules in &self.rules {
            if !rules.permit(ctx, request).await {
                return false;
            }
        }
        true
    }

    async fn permit_resolved(&self, ctx: &RequestContext, request: &Request, resolved: IpAddr) -> bool {
        for rules in &self.rules {
            if !rules.permit_resolved(ctx, request, resolved).await {
                return false;
            }
        }
        true
    }
}
