//! Configuration Types

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::auth::LdapSettings;
use crate::protocol::Command;
use crate::routing::Policy;

/// Written in place of secrets when the configuration is printed
pub const REDACTED: &str = "<redacted>";

/// Serialize a secret as [`REDACTED`], or as an empty string when unset
pub fn redact<S: Serializer>(secret: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if secret.is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str(REDACTED)
    }
}

/// Authentication method offered to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    None,
    Static,
    Ldap,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub access_control: AccessControlConfig,
    pub log_level: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub bind_ip: Option<IpAddr>,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub half_close_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub bind_accept_timeout: Duration,
    pub max_connections: usize,
    #[serde(with = "humantime_serde")]
    pub diagnostics_interval: Duration,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_user: Option<StaticUserConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ldap: Option<LdapConfig>,
}

/// The single user accepted by static authentication
#[derive(Debug, Clone, Serialize)]
pub struct StaticUserConfig {
    pub username: String,
    #[serde(serialize_with = "redact")]
    pub password: String,
    #[serde(with = "humantime_serde")]
    pub failure_delay: Duration,
}

/// LDAP directory and result cache settings
#[derive(Debug, Clone, Serialize)]
pub struct LdapConfig {
    #[serde(flatten)]
    pub directory: LdapSettings,
    #[serde(with = "humantime_serde")]
    pub positive_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub negative_ttl: Duration,
}

/// Access control configuration
#[derive(Debug, Clone, Serialize)]
pub struct AccessControlConfig {
    pub allowed_commands: Vec<Command>,
    pub default_policy: Policy,
    pub rules: Vec<String>,
}
