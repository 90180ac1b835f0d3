//! Configuration Manager

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use super::cli::CliArgs;
use super::types::{
    AccessControlConfig, AuthConfig, AuthMethod, Config, LdapConfig, ServerConfig, StaticUserConfig,
};
use crate::auth::{AuthManager, LdapSettings};
use crate::connection::Socks5Config;
use crate::routing::{AclRuleSet, PermitCommand, Policy, RuleChain, RuleSet};
use crate::Result;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// RFC 1929 carries lengths in a single byte
const MAX_CREDENTIAL_LEN: usize = 255;

/// Builds and validates the configuration
pub struct ConfigManager;

impl ConfigManager {
    /// Resolve parsed command-line/environment options into a validated [`Config`]
    pub fn from_args(args: CliArgs) -> Result<Config> {
        let static_user = (args.auth_method == AuthMethod::Static).then(|| StaticUserConfig {
            username: args.static_user.unwrap_or_default(),
            password: args.static_pass.unwrap_or_default(),
            failure_delay: args.static_failure_delay,
        });

        let ldap = (args.auth_method == AuthMethod::Ldap).then(|| LdapConfig {
            directory: LdapSettings {
                url: args.ldap_url.unwrap_or_default(),
                bind_dn: args.ldap_bind_dn.unwrap_or_default(),
                bind_password: args.ldap_bind_pass.unwrap_or_default(),
                base_dn: args.ldap_base_dn.unwrap_or_default(),
                filter: args.ldap_filter,
                timeout: args.ldap_timeout,
            },
            positive_ttl: args.ldap_positive_ttl,
            negative_ttl: args.ldap_negative_ttl,
        });

        let rules = args
            .acl_rules
            .as_deref()
            .map(|rules| {
                rules
                    .split([';', '\n'])
                    .map(str::trim)
                    .filter(|rule| !rule.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let config = Config {
            server: ServerConfig {
                listen: args.listen,
                bind_ip: args.bind_ip,
                handshake_timeout: args.handshake_timeout,
                dial_timeout: args.dial_timeout,
                idle_timeout: args.idle_timeout,
                half_close_timeout: args.half_close_timeout,
                bind_accept_timeout: args.bind_accept_timeout,
                max_connections: args.max_connections,
                diagnostics_interval: args.diagnostics_interval,
            },
            auth: AuthConfig {
                method: args.auth_method,
                static_user,
                ldap,
            },
            access_control: AccessControlConfig {
                allowed_commands: args.allowed_commands,
                default_policy: args.acl_default,
                rules,
            },
            log_level: args.log_level.to_lowercase(),
        };

        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .context("Server configuration validation failed")?;

        self.validate_auth_config()
            .context("Authentication configuration validation failed")?;

        self.validate_access_control_config()
            .context("Access control configuration validation failed")?;

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            bail!("log_level must be one of: {}", LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        let timeouts: [(&str, Duration); 6] = [
            ("handshake_timeout", self.server.handshake_timeout),
            ("dial_timeout", self.server.dial_timeout),
            ("idle_timeout", self.server.idle_timeout),
            ("half_close_timeout", self.server.half_close_timeout),
            ("bind_accept_timeout", self.server.bind_accept_timeout),
            ("diagnostics_interval", self.server.diagnostics_interval),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                bail!("{} must be greater than 0", name);
            }
        }
        Ok(())
    }

    fn validate_auth_config(&self) -> Result<()> {
        match self.auth.method {
            AuthMethod::None => {}
            AuthMethod::Static => {
                let Some(user) = &self.auth.static_user else {
                    bail!("static authentication requires a username and password");
                };
                if user.username.is_empty() || user.password.is_empty() {
                    bail!("static authentication requires a non-empty username and password");
                }
                if user.username.len() > MAX_CREDENTIAL_LEN || user.password.len() > MAX_CREDENTIAL_LEN {
                    bail!(
                        "static username and password cannot exceed {} bytes",
                        MAX_CREDENTIAL_LEN
                    );
                }
                // the rejection status must reach the client before the handshake deadline
                if user.failure_delay >= self.server.handshake_timeout {
                    bail!(
                        "static failure delay ({:?}) must be shorter than the handshake timeout ({:?})",
                        user.failure_delay,
                        self.server.handshake_timeout
                    );
                }
            }
            AuthMethod::Ldap => {
                let Some(ldap) = &self.auth.ldap else {
                    bail!("ldap authentication requires directory settings");
                };
                ldap.directory.validate()?;
            }
        }
        Ok(())
    }

    fn validate_access_control_config(&self) -> Result<()> {
        if self.access_control.allowed_commands.is_empty() {
            bail!("at least one command must be allowed");
        }
        self.acl()?;
        Ok(())
    }

    /// The configured ACL, or `None` when it would allow everything
    pub fn acl(&self) -> Result<Option<AclRuleSet>> {
        let acl = &self.access_control;
        if acl.rules.is_empty() && acl.default_policy == Policy::Allow {
            return Ok(None);
        }
        let rules = AclRuleSet::parse_rules(acl.default_policy, &acl.rules.join(";"))
            .map_err(|e| anyhow::anyhow!("invalid ACL rule {}", e))?;
        Ok(Some(rules))
    }

    /// Pretty JSON with every secret replaced by a placeholder
    pub fn to_redacted_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Build the server options: authenticators, rule chain, limits and timeouts
    pub fn socks5_config(&self) -> Result<Socks5Config> {
        let authenticators = AuthManager::authenticators(&self.auth)?;

        let mut chain = RuleChain::new().with(Arc::new(PermitCommand::only(
            &self.access_control.allowed_commands,
        )));
        if let Some(acl) = self.acl()? {
            chain = chain.with(Arc::new(acl));
        }
        let rules: Arc<dyn RuleSet> = Arc::new(chain);

        Ok(Socks5Config {
            authenticators,
            credentials: None,
            rules: Some(rules),
            rewriter: None,
            resolver: None,
            bind_ip: self.server.bind_ip,
            handshake_timeout: self.server.handshake_timeout,
            dial_timeout: self.server.dial_timeout,
            idle_timeout: self.server.idle_timeout,
            half_close_timeout: self.server.half_close_timeout,
            bind_accept_timeout: self.server.bind_accept_timeout,
            max_connections: self.server.max_connections,
            diagnostics_interval: self.server.diagnostics_interval,
        })
    }
}
