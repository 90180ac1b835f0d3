//! Time-bounded cache of credential check outcomes

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use super::types::Outcome;

/// Base64 SHA-256 of a password. Plaintext passwords are never stored.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    STANDARD.encode(digest)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: Outcome,
    password_hash: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Outcomes keyed by username.
///
/// An entry answers only for the exact password it was recorded with; valid
/// and invalid outcomes expire after their own windows. Each entry is read
/// and replaced as a whole under its shard lock.
#[derive(Debug)]
pub struct CredentialCache {
    entries: DashMap<String, CacheEntry>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl CredentialCache {
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            positive_ttl,
            negative_ttl,
        }
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Cached outcome for this exact username/password, if still live
    pub fn lookup(&self, username: &str, password: &str) -> Option<Outcome> {
        let entry = self.entries.get(username)?;
        if !entry.is_live(Instant::now()) {
            return None;
        }
        (entry.password_hash == hash_password(password)).then_some(entry.outcome)
    }

    pub fn insert(&self, username: &str, password: &str, outcome: Outcome) {
        let ttl = match outcome {
            Outcome::Valid => self.positive_ttl,
            Outcome::Invalid => self.negative_ttl,
        };
        let entry = CacheEntry {
            outcome,
            password_hash: hash_password(password),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(username.to_string(), entry);
    }

    pub fn invalidate(&self, username: &str) -> bool {
        self.entries.remove(username).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> CredentialCache {
        CredentialCache::new(Duration::from_secs(30), Duration::from_secs(10))
    }

    #[test]
    fn test_hash_is_stable_and_opaque() {
        let hash = hash_password("secret");
        assert_eq!(hash, hash_password("secret"));
        assert_ne!(hash, hash_password("Secret"));
        assert!(!hash.contains("secret"));
        // 32 byte digest -> 44 base64 chars
        assert_eq!(hash.len(), 44);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_requires_matching_password() {
        let cache = cache();
        cache.insert("alice", "right", Outcome::Valid);

        assert_eq!(cache.lookup("alice", "right"), Some(Outcome::Valid));
        assert_eq!(cache.lookup("alice", "wrong"), None);
        assert_eq!(cache.lookup("bob", "right"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_and_negative_windows() {
        let cache = cache();
        cache.insert("alice", "right", Outcome::Valid);
        cache.insert("mallory", "guess", Outcome::Invalid);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.lookup("alice", "right"), Some(Outcome::Valid));
        assert_eq!(cache.lookup("mallory", "guess"), None);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.lookup("alice", "right"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache();
        cache.insert("alice", "right", Outcome::Valid);
        cache.insert("mallory", "guess", Outcome::Invalid);
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }
}
