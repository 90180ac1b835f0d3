//! LDAP-backed [`Directory`]
//!
//! Every lookup opens its own connection: service bind, subtree search for the
//! user's DN, then a bind as that DN with the offered password. Results are
//! cached one level up by [`DirectoryCredentials`](super::DirectoryCredentials).

use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::Serialize;
use tracing::{debug, warn};

use super::directory::{Directory, DirectoryError};
use crate::Result;

/// Placeholder substituted with the escaped username in the search filter
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// LDAP result code for a failed simple bind
const RC_INVALID_CREDENTIALS: u32 = 49;

#[derive(Debug, Clone, Serialize)]
pub struct LdapSettings {
    pub url: String,
    pub bind_dn: String,
    #[serde(serialize_with = "crate::config::redact")]
    pub bind_password: String,
    pub base_dn: String,
    pub filter: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl LdapSettings {
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            bail!("LDAP URL is required");
        }
        if !self.url.starts_with("ldap://") {
            bail!("LDAP URL must use the ldap:// scheme, got '{}'", self.url);
        }
        if self.base_dn.is_empty() {
            bail!("LDAP base DN is required");
        }
        if !self.filter.contains(USERNAME_PLACEHOLDER) {
            bail!(
                "LDAP filter '{}' must contain the {} placeholder",
                self.filter,
                USERNAME_PLACEHOLDER
            );
        }
        if self.timeout.is_zero() {
            bail!("LDAP timeout must be greater than 0");
        }
        Ok(())
    }
}

pub struct LdapDirectory {
    settings: LdapSettings,
}

impl LdapDirectory {
    pub fn new(settings: LdapSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &LdapSettings {
        &self.settings
    }

    /// Search filter for `username`, escaped per RFC 4515
    pub fn user_filter(&self, username: &str) -> String {
        self.settings
            .filter
            .replace(USERNAME_PLACEHOLDER, &ldap_escape(username))
    }

    async fn connect(&self) -> std::result::Result<Ldap, DirectoryError> {
        let conn_settings = LdapConnSettings::new().set_conn_timeout(self.settings.timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(conn_settings, &self.settings.url)
            .await
            .map_err(|e| DirectoryError::Connect {
                url: self.settings.url.clone(),
                reason: e.to_string(),
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection terminated with error");
            }
        });

        Ok(ldap)
    }

    async fn lookup(
        &self,
        ldap: &mut Ldap,
        username: &str,
        password: &str,
    ) -> std::result::Result<bool, DirectoryError> {
        ldap.simple_bind(&self.settings.bind_dn, &self.settings.bind_password)
            .await
            .and_then(|res| res.success())
            .map_err(|e| DirectoryError::ServiceBind {
                dn: self.settings.bind_dn.clone(),
                reason: e.to_string(),
            })?;

        let filter = self.user_filter(username);
        let (entries, _) = ldap
            .search(&self.settings.base_dn, Scope::Subtree, &filter, vec!["dn"])
            .await
            .and_then(|res| res.success())
            .map_err(|e| DirectoryError::Search {
                filter: filter.clone(),
                reason: e.to_string(),
            })?;

        let Some(entry) = entries.into_iter().last() else {
            debug!(user = %username, %filter, "No directory entry matched");
            return Ok(false);
        };
        let user_dn = SearchEntry::construct(entry).dn;
        debug!(user = %username, dn = %user_dn, "Binding as directory user");

        let result = ldap
            .simple_bind(&user_dn, password)
            .await
            .map_err(|e| DirectoryError::UserBind {
                dn: user_dn.clone(),
                reason: e.to_string(),
            })?;

        match result.rc {
            0 => Ok(true),
            RC_INVALID_CREDENTIALS => Ok(false),
            rc => Err(DirectoryError::UserBind {
                dn: user_dn,
                reason: format!("result code {}: {}", rc, result.text),
            }),
        }
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn verify(&self, username: &str, password: &str) -> std::result::Result<bool, DirectoryError> {
        // an empty password would be an unauthenticated bind that always succeeds
        if password.is_empty() {
            return Ok(false);
        }

        let attempt = async {
            let mut ldap = self.connect().await?;
            let outcome = self.lookup(&mut ldap, username, password).await;
            if let Err(e) = ldap.unbind().await {
                debug!(error = %e, "LDAP unbind failed");
            }
            outcome
        };

        tokio::time::timeout(self.settings.timeout, attempt)
            .await
            .map_err(|_| DirectoryError::Timeout(self.settings.timeout))?
    }
}
