//! Destination rewriting applied before authorization

use async_trait::async_trait;

use super::types::RequestContext;
use crate::protocol::{AddrSpec, Request};

/// Maps the requested destination to the one actually used
#[async_trait]
pub trait AddressRewriter: Send + Sync {
    async fn rewrite(&self, ctx: &RequestContext, request: &Request) -> AddrSpec;
}

/// Leaves the destination untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRewrite;

#[async_trait]
impl AddressRewriter for NoRewrite {
    async fn rewrite(&self, _ctx: &RequestContext, request: &Request) -> AddrSpec {
        request.dest.clone()
    }
}
