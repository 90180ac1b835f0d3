//! Command-line and environment options

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use super::types::AuthMethod;
use crate::protocol::Command;
use crate::routing::Policy;

/// Every option can also be given through its `SOCKS5D_*` environment variable.
/// Flags take precedence over the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "socks5d")]
#[command(about = "SOCKS5 proxy server with pluggable authentication")]
#[command(version)]
#[command(long_about = "
SOCKS5 proxy server (RFC 1928) with no-auth, static username/password and
LDAP-backed username/password (RFC 1929) authentication.

Environment variables:
  SOCKS5D_LISTEN                - Listen address (default 127.0.0.1:1080)
  SOCKS5D_LOG_LEVEL             - trace, debug, info, warn or error
  SOCKS5D_AUTH_METHOD           - none, static or ldap
  SOCKS5D_STATIC_USER           - Username for static authentication
  SOCKS5D_STATIC_PASS           - Password for static authentication
  SOCKS5D_STATIC_FAILURE_DELAY  - Delay before answering a failed static login
  SOCKS5D_LDAP_URL              - ldap://host:port
  SOCKS5D_LDAP_BIND_DN          - Service account DN
  SOCKS5D_LDAP_BIND_PASS        - Service account password
  SOCKS5D_LDAP_BASE_DN          - Search base for user entries
  SOCKS5D_LDAP_FILTER           - Search filter, {username} is substituted
  SOCKS5D_LDAP_POSITIVE_TTL     - How long a successful login is cached
  SOCKS5D_LDAP_NEGATIVE_TTL     - How long a failed login is cached
  SOCKS5D_LDAP_TIMEOUT          - Limit for one directory lookup
  SOCKS5D_BIND_IP               - Local IP for outbound connections
  SOCKS5D_HANDSHAKE_TIMEOUT     - Limit for each handshake step
  SOCKS5D_DIAL_TIMEOUT          - Limit for connecting to a destination
  SOCKS5D_IDLE_TIMEOUT          - Relay idle limit
  SOCKS5D_HALF_CLOSE_TIMEOUT    - Relay idle limit after one side has closed
  SOCKS5D_BIND_ACCEPT_TIMEOUT   - Limit for the inbound BIND connection
  SOCKS5D_MAX_CONNECTIONS       - Concurrent connection limit, 0 for none
  SOCKS5D_ALLOWED_COMMANDS      - Comma separated: connect,bind,udp-associate
  SOCKS5D_ACL_DEFAULT           - allow or deny when no ACL rule matches
  SOCKS5D_ACL_RULES             - ';' separated, e.g. 'deny 10.0.0.0/8; allow *.example.com:443'
  SOCKS5D_DIAGNOSTICS_INTERVAL  - Interval of connection and resource usage logging

Durations accept humantime syntax such as 500ms, 30s or 5m.
")]
pub struct CliArgs {
    /// Address to accept SOCKS5 clients on
    #[arg(long, env = "SOCKS5D_LISTEN", default_value = "127.0.0.1:1080")]
    pub listen: SocketAddr,

    /// Log level, overridden by RUST_LOG when set
    #[arg(long, env = "SOCKS5D_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Authentication method offered to clients
    #[arg(long, env = "SOCKS5D_AUTH_METHOD", value_enum, default_value_t = AuthMethod::None)]
    pub auth_method: AuthMethod,

    #[arg(long, env = "SOCKS5D_STATIC_USER")]
    pub static_user: Option<String>,

    #[arg(long, env = "SOCKS5D_STATIC_PASS", hide_env_values = true)]
    pub static_pass: Option<String>,

    /// Delay before a failed static login is answered
    #[arg(long, env = "SOCKS5D_STATIC_FAILURE_DELAY", default_value = "2s", value_parser = humantime::parse_duration)]
    pub static_failure_delay: Duration,

    #[arg(long, env = "SOCKS5D_LDAP_URL")]
    pub ldap_url: Option<String>,

    #[arg(long, env = "SOCKS5D_LDAP_BIND_DN")]
    pub ldap_bind_dn: Option<String>,

    #[arg(long, env = "SOCKS5D_LDAP_BIND_PASS", hide_env_values = true)]
    pub ldap_bind_pass: Option<String>,

    #[arg(long, env = "SOCKS5D_LDAP_BASE_DN")]
    pub ldap_base_dn: Option<String>,

    /// User search filter; {username} is replaced by the escaped username
    #[arg(long, env = "SOCKS5D_LDAP_FILTER", default_value = "(uid={username})")]
    pub ldap_filter: String,

    #[arg(long, env = "SOCKS5D_LDAP_POSITIVE_TTL", default_value = "30s", value_parser = humantime::parse_duration)]
    pub ldap_positive_ttl: Duration,

    #[arg(long, env = "SOCKS5D_LDAP_NEGATIVE_TTL", default_value = "10s", value_parser = humantime::parse_duration)]
    pub ldap_negative_ttl: Duration,

    #[arg(long, env = "SOCKS5D_LDAP_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub ldap_timeout: Duration,

    /// Local IP used for outbound connections and BIND/UDP sockets
    #[arg(long, env = "SOCKS5D_BIND_IP")]
    pub bind_ip: Option<IpAddr>,

    #[arg(long, env = "SOCKS5D_HANDSHAKE_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    pub handshake_timeout: Duration,

    #[arg(long, env = "SOCKS5D_DIAL_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    pub dial_timeout: Duration,

    #[arg(long, env = "SOCKS5D_IDLE_TIMEOUT", default_value = "5m", value_parser = humantime::parse_duration)]
    pub idle_timeout: Duration,

    /// How long the open direction may sit idle once the other has closed
    #[arg(long, env = "SOCKS5D_HALF_CLOSE_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub half_close_timeout: Duration,

    #[arg(long, env = "SOCKS5D_BIND_ACCEPT_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub bind_accept_timeout: Duration,

    /// Maximum concurrent connections, 0 for unlimited
    #[arg(long, env = "SOCKS5D_MAX_CONNECTIONS", default_value_t = 0)]
    pub max_connections: usize,

    #[arg(
        long,
        env = "SOCKS5D_ALLOWED_COMMANDS",
        value_delimiter = ',',
        default_value = "connect,bind,udp-associate"
    )]
    pub allowed_commands: Vec<Command>,

    /// Verdict when no ACL rule matches
    #[arg(long, env = "SOCKS5D_ACL_DEFAULT", default_value = "allow")]
    pub acl_default: Policy,

    /// ACL rules separated by ';'
    #[arg(long, env = "SOCKS5D_ACL_RULES")]
    pub acl_rules: Option<String>,

    #[arg(long, env = "SOCKS5D_DIAGNOSTICS_INTERVAL", default_value = "5s", value_parser = humantime::parse_duration)]
    pub diagnostics_interval: Duration,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["socks5d"]).unwrap();
        assert_eq!(args.listen, "127.0.0.1:1080".parse().unwrap());
        assert_eq!(args.auth_method, AuthMethod::None);
        assert_eq!(args.ldap_filter, "(uid={username})");
        assert_eq!(args.ldap_positive_ttl, Duration::from_secs(30));
        assert_eq!(args.idle_timeout, Duration::from_secs(300));
        assert_eq!(args.half_close_timeout, Duration::from_secs(30));
        assert_eq!(
            args.allowed_commands,
            vec![Command::Connect, Command::Bind, Command::UdpAssociate]
        );
        assert_eq!(args.acl_default, Policy::Allow);
        assert!(!args.print_config);
    }

    #[test]
    fn test_flags() {
        let args = CliArgs::try_parse_from([
            "socks5d",
            "--listen",
            "0.0.0.0:9050",
            "--auth-method",
            "static",
            "--static-user",
            "admin",
            "--static-pass",
            "secret",
            "--allowed-commands",
            "connect",
            "--dial-timeout",
            "1500ms",
            "--acl-default",
            "deny",
        ])
        .unwrap();
        assert_eq!(args.listen.port(), 9050);
        assert_eq!(args.auth_method, AuthMethod::Static);
        assert_eq!(args.static_user.as_deref(), Some("admin"));
        assert_eq!(args.allowed_commands, vec![Command::Connect]);
        assert_eq!(args.dial_timeout, Duration::from_millis(1500));
        assert_eq!(args.acl_default, Policy::Deny);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(CliArgs::try_parse_from(["socks5d", "--auth-method", "kerberos"]).is_err());
        assert!(CliArgs::try_parse_from(["socks5d", "--idle-timeout", "soon"]).is_err());
        assert!(CliArgs::try_parse_from(["socks5d", "--allowed-commands", "connect,listen"]).is_err());
    }

    #[test]
    fn test_help_is_reported_as_error_kind() {
        let err = CliArgs::try_parse_from(["socks5d", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
