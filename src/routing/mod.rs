//! Routing Module
//! 
//! Per-request authorization, destination rewriting and name resolution.

pub mod acl;
pub mod resolver;
pub mod rewriter;
pub mod rules;
pub mod types;

pub use acl::{AclRule, AclRuleSet, Pattern};
pub use resolver::{DnsResolver, NameResolver};
pub use rewriter::{AddressRewriter, NoRewrite};
pub use rules::{PermitAll, PermitCommand, RuleChain, RuleSet};
pub use types::*;
