//! Directory-service backed credential store with an outcome cache

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use super::cache::CredentialCache;
use super::store::CredentialStore;
use super::types::Outcome;

/// Default lifetime of a cached successful login
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(30);
/// Default lifetime of a cached rejected login
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(10);

/// Failures of the directory service itself, as opposed to wrong credentials
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to connect to directory {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("service bind as '{dn}' failed: {reason}")]
    ServiceBind { dn: String, reason: String },

    #[error("search with filter '{filter}' failed: {reason}")]
    Search { filter: String, reason: String },

    #[error("user bind as '{dn}' failed: {reason}")]
    UserBind { dn: String, reason: String },

    #[error("directory lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// A directory that can decide whether a username/password pair is genuine
#[async_trait]
pub trait Directory: Send + Sync {
    /// `Ok(true)` for valid credentials, `Ok(false)` for rejected ones
    async fn verify(&self, username: &str, password: &str) -> Result<bool, DirectoryError>;
}

/// Credential store that asks a [`Directory`] and remembers the answer for a while
pub struct DirectoryCredentials<D> {
    directory: D,
    cache: CredentialCache,
}

impl<D: Directory> DirectoryCredentials<D> {
    pub fn new(directory: D) -> Self {
        Self::with_ttl(directory, DEFAULT_POSITIVE_TTL, DEFAULT_NEGATIVE_TTL)
    }

    pub fn with_ttl(directory: D, positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            directory,
            cache: CredentialCache::new(positive_ttl, negative_ttl),
        }
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }
}

#[async_trait]
impl<D: Directory> CredentialStore for DirectoryCredentials<D> {
    async fn validate(&self, username: &str, password: &str) -> bool {
        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!(purged, "Purged expired credential cache entries");
        }

        if let Some(outcome) = self.cache.lookup(username, password) {
            debug!(user = %username, ?outcome, "Credential cache hit");
            return outcome.is_valid();
        }

        let outcome = match self.directory.verify(username, password).await {
            Ok(valid) => Outcome::from(valid),
            Err(e) => {
                error!(user = %username, error = %e, "Directory unavailable, rejecting login");
                Outcome::Invalid
            }
        };
        self.cache.insert(username, password, outcome);
        outcome.is_valid()
    }
}
