//! Credential stores backing username/password authentication

use std::collections::HashMap;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use super::cache::hash_password;
use crate::Result;

/// Validates a username/password pair
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn validate(&self, username: &str, password: &str) -> bool;
}

/// A single configured username/password pair
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
    failure_delay: Duration,
}

impl StaticCredentials {
    /// Both the username and the password must be non-empty
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() || password.is_empty() {
            bail!("static credentials require a non-empty username and password");
        }
        Ok(Self {
            username,
            password,
            failure_delay: Duration::ZERO,
        })
    }

    /// Hold every rejected attempt for `delay` before answering
    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn validate(&self, username: &str, password: &str) -> bool {
        if self.username == username && self.password == password {
            return true;
        }
        if !self.failure_delay.is_zero() {
            debug!(user = %username, delay = ?self.failure_delay, "Delaying rejected static login");
            tokio::time::sleep(self.failure_delay).await;
        }
        false
    }
}

/// A table of users, passwords kept only as hashes
#[derive(Debug, Default, Clone)]
pub struct CredentialTable {
    users: HashMap<String, String>,
}

impl CredentialTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user. Empty usernames are refused.
    pub fn insert(&mut self, username: impl Into<String>, password: &str) -> Result<()> {
        let username = username.into();
        if username.is_empty() {
            bail!("username cannot be empty");
        }
        self.users.insert(username, hash_password(password));
        Ok(())
    }

    pub fn remove(&mut self, username: &str) -> bool {
        self.users.remove(username).is_some()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialStore for CredentialTable {
    async fn validate(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|stored| *stored == hash_password(password))
    }
}
