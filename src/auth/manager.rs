//! Authentication Manager
//!
//! Turns the authentication section of the configuration into the
//! authenticator set offered to clients.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use super::authenticator::{Authenticator, NoAuthAuthenticator, UserPassAuthenticator};
use super::directory::DirectoryCredentials;
use super::ldap::LdapDirectory;
use super::store::{CredentialStore, StaticCredentials};
use crate::config::{AuthConfig, AuthMethod};
use crate::Result;

/// Builds authenticators and credential stores from [`AuthConfig`]
pub struct AuthManager;

impl AuthManager {
    /// The credential store for username/password methods, `None` for `none`
    pub fn credential_store(config: &AuthConfig) -> Result<Option<Arc<dyn CredentialStore>>> {
        match config.method {
            AuthMethod::None => Ok(None),
            AuthMethod::Static => {
                let user = config
                    .static_user
                    .as_ref()
                    .context("static authentication selected without credentials")?;
                let store: Arc<dyn CredentialStore> = Arc::new(
                    StaticCredentials::new(user.username.as_str(), user.password.as_str())?
                        .with_failure_delay(user.failure_delay),
                );
                info!(user = %user.username, "Using static credentials");
                Ok(Some(store))
            }
            AuthMethod::Ldap => {
                let ldap = config
                    .ldap
                    .as_ref()
                    .context("ldap authentication selected without directory settings")?;
                let directory = LdapDirectory::new(ldap.directory.clone())
                    .context("Failed to configure LDAP directory")?;
                info!(
                    url = %ldap.directory.url,
                    base_dn = %ldap.directory.base_dn,
                    positive_ttl = ?ldap.positive_ttl,
                    negative_ttl = ?ldap.negative_ttl,
                    "Using LDAP credentials"
                );
                let store: Arc<dyn CredentialStore> = Arc::new(DirectoryCredentials::with_ttl(
                    directory,
                    ldap.positive_ttl,
                    ldap.negative_ttl,
                ));
                Ok(Some(store))
            }
        }
    }

    /// The authenticator set for the configured method
    pub fn authenticators(config: &AuthConfig) -> Result<Vec<Arc<dyn Authenticator>>> {
        let authenticator: Arc<dyn Authenticator> = match Self::credential_store(config)? {
            Some(store) => Arc::new(UserPassAuthenticator::new(store)),
            None => Arc::new(NoAuthAuthenticator),
        };
        Ok(vec![authenticator])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LdapSettings;
    use crate::config::{LdapConfig, StaticUserConfig};
    use crate::protocol::method;
    use std::time::Duration;

    fn auth(method: AuthMethod) -> AuthConfig {
        AuthConfig {
            method,
            static_user: None,
            ldap: None,
        }
    }

    #[test]
    fn test_none_offers_no_auth() {
        let authenticators = AuthManager::authenticators(&auth(AuthMethod::None)).unwrap();
        assert_eq!(authenticators.len(), 1);
        assert_eq!(authenticators[0].code(), method::NO_AUTH);
    }

    #[tokio::test]
    async fn test_static_store() {
        let mut config = auth(AuthMethod::Static);
        config.static_user = Some(StaticUserConfig {
            username: "admin".to_string(),
            password: "secret".to_string(),
            failure_delay: Duration::ZERO,
        });

        let store = AuthManager::credential_store(&config).unwrap().unwrap();
        assert!(store.validate("admin", "secret").await);
        assert!(!store.validate("admin", "wrong").await);

        let authenticators = AuthManager::authenticators(&config).unwrap();
        assert_eq!(authenticators[0].code(), method::USER_PASS);
    }

    #[test]
    fn test_static_rejects_empty_credentials() {
        let mut config = auth(AuthMethod::Static);
        assert!(AuthManager::authenticators(&config).is_err());

        config.static_user = Some(StaticUserConfig {
            username: "admin".to_string(),
            password: String::new(),
            failure_delay: Duration::ZERO,
        });
        assert!(AuthManager::authenticators(&config).is_err());
    }

    #[test]
    fn test_ldap_store() {
        let mut config = auth(AuthMethod::Ldap);
        assert!(AuthManager::authenticators(&config).is_err());

        config.ldap = Some(LdapConfig {
            directory: LdapSettings {
                url: "ldap://127.0.0.1:389".to_string(),
                bind_dn: "cn=proxy,dc=example,dc=org".to_string(),
                bind_password: "service".to_string(),
                base_dn: "dc=example,dc=org".to_string(),
                filter: "(uid={username})".to_string(),
                timeout: Duration::from_secs(5),
            },
            positive_ttl: Duration::from_secs(30),
            negative_ttl: Duration::from_secs(10),
        });
        let authenticators = AuthManager::authenticators(&config).unwrap();
        assert_eq!(authenticators[0].code(), method::USER_PASS);
        assert_eq!(authenticators[0].name(), "userpass");
    }
}
